//! Extractors that pull provider data into [`DataTable`]s and persist raw CSV artifacts.
//!
//! Every extractor method returns `Result<Extracted<T>, ExtractError>`: failures are
//! logged where they happen and surfaced as a typed cause, successes carry the data
//! together with the outcome of each artifact write.

use crate::models::DataTable;

pub mod alpha_vantage;
pub mod raw_writer;
pub mod yahoo_finance;

pub use alpha_vantage::AlphaVantageExtractor;
pub use raw_writer::{RawDataWriter, WriteError, WriteOutcome};
pub use yahoo_finance::YahooFinanceExtractor;

/// Extracted data plus the outcome of every artifact written for it
#[derive(Debug, Clone)]
pub struct Extracted<T> {
    pub data: T,
    pub artifacts: Vec<WriteOutcome>,
}

impl<T> Extracted<T> {
    pub fn new(data: T, artifacts: Vec<WriteOutcome>) -> Self {
        Self { data, artifacts }
    }

    pub fn all_written(&self) -> bool {
        self.artifacts.iter().all(WriteOutcome::is_written)
    }
}

impl Extracted<DataTable> {
    pub fn table(&self) -> &DataTable {
        &self.data
    }
}
