//! Artifact naming and round trips through the CSV writer

use assert_matches::assert_matches;
use chrono::{DateTime, NaiveDate};
use pretty_assertions::assert_eq;

use stock_extract::extraction::{RawDataWriter, WriteError, WriteOutcome};
use stock_extract::models::{Cell, DataTable};

use crate::common::{artifact_names, logging};

#[test]
fn test_round_trip_preserves_columns_and_values() {
    logging::init_test_logging();
    logging::log_test_step("Writing and reading back a mixed table");

    let mut table = DataTable::new(["date", "open", "volume", "symbol", "note", "flag", "ts"]);
    table.push_row(vec![
        Cell::Date(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()),
        Cell::Float(185.0),
        Cell::Int(82488674),
        Cell::Text("AAPL".to_string()),
        Cell::Text("contains, a comma".to_string()),
        Cell::Bool(true),
        Cell::DateTime(DateTime::parse_from_rfc3339("2024-01-02T00:00:00-05:00").unwrap()),
    ]);
    table.push_row(vec![
        Cell::Date(NaiveDate::from_ymd_opt(2024, 1, 3).unwrap()),
        Cell::Float(184.22),
        Cell::Int(58414460),
        Cell::Text("AAPL".to_string()),
        Cell::Null,
        Cell::Bool(false),
        Cell::DateTime(DateTime::parse_from_rfc3339("2024-01-03T00:00:00-05:00").unwrap()),
    ]);

    let dir = tempfile::tempdir().unwrap();
    let writer = RawDataWriter::new(dir.path());
    let outcome = writer.save(&table, "AAPL", "historical_1y_1d");

    assert!(outcome.is_written());
    let read_back = DataTable::read_csv(outcome.path()).unwrap();
    assert_eq!(read_back, table);
}

#[test]
fn test_writer_creates_nested_directory() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("raw").join("yahoo_finance");

    let writer = RawDataWriter::new(&target);
    assert!(target.is_dir());

    let outcome = writer.save(&DataTable::new(["a"]), "MSFT", "company_info");
    assert!(outcome.is_written());

    let names = artifact_names(&target);
    assert_eq!(names.len(), 1);
    // MSFT_company_info_YYYYMMDD_HHMMSS.csv
    let stamp = names[0]
        .strip_prefix("MSFT_company_info_")
        .and_then(|rest| rest.strip_suffix(".csv"))
        .unwrap();
    assert_eq!(stamp.len(), 15);
    assert!(chrono::NaiveDateTime::parse_from_str(stamp, "%Y%m%d_%H%M%S").is_ok());
}

#[test]
fn test_failed_write_is_reported_not_raised() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not_a_dir");
    std::fs::write(&blocker, b"").unwrap();

    let writer = RawDataWriter::new(&blocker);
    let outcome = writer.save(&DataTable::new(["a"]), "AAPL", "daily_adjusted");

    match outcome {
        WriteOutcome::Failed { path, error } => {
            assert!(path.starts_with(&blocker));
            assert_matches!(&*error, WriteError::Io(_));
        }
        other => panic!("expected a failed write, got {:?}", other),
    }
}
