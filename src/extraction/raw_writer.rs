use chrono::{Local, NaiveDateTime};
use std::fs::OpenOptions;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

use crate::models::DataTable;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("could not create artifact file: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not encode CSV: {0}")]
    Csv(#[from] csv::Error),
}

/// Result of persisting one artifact
#[derive(Debug, Clone)]
pub enum WriteOutcome {
    Written(PathBuf),
    Failed { path: PathBuf, error: Arc<WriteError> },
}

impl WriteOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, WriteOutcome::Written(_))
    }

    pub fn path(&self) -> &Path {
        match self {
            WriteOutcome::Written(path) => path,
            WriteOutcome::Failed { path, .. } => path,
        }
    }
}

/// Writes raw extraction results as timestamped CSV artifacts
#[derive(Debug, Clone)]
pub struct RawDataWriter {
    dir: PathBuf,
}

impl RawDataWriter {
    /// Create the writer, creating the target directory if needed.
    /// A directory that cannot be created is logged; later writes will report failure.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            error!("Failed to create raw data directory {}: {}", dir.display(), e);
        }
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `{identifier}_{data_type}_{YYYYMMDD_HHMMSS}.csv`
    pub fn file_name(identifier: &str, data_type: &str, captured_at: NaiveDateTime) -> String {
        format!(
            "{}_{}_{}.csv",
            identifier,
            data_type,
            captured_at.format("%Y%m%d_%H%M%S")
        )
    }

    /// Persist `table` stamped with the current local time.
    pub fn save(&self, table: &DataTable, identifier: &str, data_type: &str) -> WriteOutcome {
        self.save_at(table, identifier, data_type, Local::now().naive_local())
    }

    /// Persist `table` under an explicit capture timestamp.
    ///
    /// Never fails: errors are logged and reported through the outcome. Existing
    /// artifacts are never overwritten.
    pub fn save_at(
        &self,
        table: &DataTable,
        identifier: &str,
        data_type: &str,
        captured_at: NaiveDateTime,
    ) -> WriteOutcome {
        let path = self
            .dir
            .join(Self::file_name(identifier, data_type, captured_at));

        match self.write(table, &path) {
            Ok(()) => {
                info!("💾 Data saved to {}", path.display());
                WriteOutcome::Written(path)
            }
            Err(e) => {
                error!("Failed to save data to {}: {}", path.display(), e);
                WriteOutcome::Failed {
                    path,
                    error: Arc::new(e),
                }
            }
        }
    }

    fn write(&self, table: &DataTable, path: &Path) -> Result<(), WriteError> {
        let file = OpenOptions::new().write(true).create_new(true).open(path)?;
        table.write_csv(BufWriter::new(file))?;
        Ok(())
    }
}
