use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use super::{DatabaseConnector, DbError};

pub const INDEXES_SCRIPT: &str = "indexes.sql";
pub const CLEANUP_SCRIPT: &str = "cleanup.sql";

/// Runs the maintenance scripts under `<sql_dir>/maintenance/`
pub struct DatabaseMaintenance {
    db: DatabaseConnector,
    sql_dir: PathBuf,
}

impl DatabaseMaintenance {
    /// The connector is opened on first use.
    pub fn new(db: DatabaseConnector, sql_dir: impl Into<PathBuf>) -> Self {
        Self {
            db,
            sql_dir: sql_dir.into(),
        }
    }

    pub fn script_path(&self, name: &str) -> PathBuf {
        self.sql_dir.join("maintenance").join(name)
    }

    pub fn connector(&self) -> &DatabaseConnector {
        &self.db
    }

    /// Create the indexes from `indexes.sql`. Returns false on any failure.
    pub async fn create_indexes(&mut self) -> bool {
        match self.run_script(INDEXES_SCRIPT).await {
            Ok(()) => {
                info!("✅ Successfully created database indexes");
                true
            }
            Err(e) => {
                error!("Error creating database indexes: {}", e);
                self.rollback_if_connected().await;
                false
            }
        }
    }

    /// Apply `cleanup.sql`. Returns false on any failure.
    pub async fn cleanup_database(&mut self) -> bool {
        match self.run_script(CLEANUP_SCRIPT).await {
            Ok(()) => {
                info!("🧹 Successfully cleaned up database");
                true
            }
            Err(e) => {
                error!("Error cleaning up database: {}", e);
                self.rollback_if_connected().await;
                false
            }
        }
    }

    pub async fn close(&mut self) {
        self.db.close().await;
    }

    async fn run_script(&mut self, name: &str) -> Result<(), DbError> {
        self.db.connect().await?;

        let path = self.script_path(name);
        let script = read_script(&path)?;
        self.db.execute_script(&script).await
    }

    async fn rollback_if_connected(&mut self) {
        if self.db.is_connected() {
            if let Err(e) = self.db.rollback().await {
                warn!("Rollback failed: {}", e);
            }
        }
    }
}

fn read_script(path: &Path) -> Result<String, DbError> {
    std::fs::read_to_string(path).map_err(|source| DbError::Script {
        path: path.to_path_buf(),
        source,
    })
}
