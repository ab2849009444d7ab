//! Yahoo extractor behavior over an in-memory market data source

use assert_matches::assert_matches;
use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use std::sync::Arc;

use stock_extract::extraction::{RawDataWriter, YahooFinanceExtractor};
use stock_extract::models::{
    Cell, DataTable, DownloadWindow, FinancialStatement, LineItem, StatementKind,
};
use stock_extract::ExtractError;

use crate::common::api_mock::FakeMarketData;
use crate::common::{artifact_names, fixtures, logging};

fn extractor(fake: Arc<FakeMarketData>, dir: &std::path::Path) -> YahooFinanceExtractor {
    YahooFinanceExtractor::with_client(fake, RawDataWriter::new(dir))
}

fn symbols(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_partial_response_skips_absent_symbols() {
    logging::init_test_logging();
    logging::log_test_step("AAA and BBB requested, only AAA returned");

    let fake = Arc::new(FakeMarketData::default().with_bars(
        "AAA",
        vec![fixtures::bar("2024-01-02", 10.0), fixtures::bar("2024-01-03", 11.0)],
    ));
    let dir = tempfile::tempdir().unwrap();

    let result = extractor(fake, dir.path())
        .get_multiple_tickers_data(&symbols(&["AAA", "BBB"]), None, None)
        .await
        .unwrap();

    assert_eq!(result.data.columns(), &["date", "open", "high", "low", "close", "volume", "symbol"]);
    assert_eq!(result.data.len(), 2);
    assert!(result.data.column("symbol").iter().all(|c| **c == Cell::Text("AAA".to_string())));

    let names = artifact_names(dir.path());
    assert_eq!(names.len(), 1);
    assert!(names[0].starts_with("AAA_BBB_historical_multiple_"), "{}", names[0]);
}

#[tokio::test]
async fn test_multi_symbol_rows_follow_request_order() {
    let fake = Arc::new(
        FakeMarketData::default()
            .with_bars("MSFT", vec![fixtures::bar("2024-01-02", 370.0)])
            .with_bars("AAPL", vec![fixtures::bar("2024-01-02", 185.0)]),
    );
    let dir = tempfile::tempdir().unwrap();

    let result = extractor(fake, dir.path())
        .get_multiple_tickers_data(&symbols(&["MSFT", "AAPL"]), None, None)
        .await
        .unwrap();

    let tagged: Vec<String> = result
        .data
        .column("symbol")
        .iter()
        .map(|c| c.to_string())
        .collect();
    assert_eq!(tagged, vec!["MSFT", "AAPL"]);
}

#[tokio::test]
async fn test_window_defaults_to_one_year() {
    let fake = Arc::new(FakeMarketData::default().with_bars("AAPL", vec![fixtures::bar("2024-01-02", 185.0)]));
    let dir = tempfile::tempdir().unwrap();
    let extractor = extractor(fake.clone(), dir.path());
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let end = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();

    extractor.get_multiple_tickers_data(&symbols(&["AAPL"]), None, None).await.unwrap();
    extractor.get_multiple_tickers_data(&symbols(&["AAPL"]), Some(start), None).await.unwrap();
    extractor.get_multiple_tickers_data(&symbols(&["AAPL"]), Some(start), Some(end)).await.unwrap();

    assert_eq!(
        fake.recorded_windows(),
        vec![
            DownloadWindow::Period("1y".to_string()),
            DownloadWindow::Period("1y".to_string()),
            DownloadWindow::Range { start, end },
        ]
    );
}

#[tokio::test]
async fn test_empty_bulk_result_fails_without_writing() {
    let fake = Arc::new(FakeMarketData::default());
    let dir = tempfile::tempdir().unwrap();

    let result = extractor(fake, dir.path())
        .get_multiple_tickers_data(&symbols(&["AAA", "BBB"]), None, None)
        .await;

    assert_matches!(result, Err(ExtractError::Empty(id)) if id == "AAA_BBB");
    assert!(artifact_names(dir.path()).is_empty());
}

#[tokio::test]
async fn test_history_artifact_name_carries_period_and_interval() {
    let fake = Arc::new(FakeMarketData::default().with_bars("AAPL", vec![fixtures::bar("2024-01-02", 185.0)]));
    let dir = tempfile::tempdir().unwrap();

    let result = extractor(fake, dir.path())
        .get_historical_data("AAPL", "1y", "1d")
        .await
        .unwrap();

    assert_eq!(result.data.get(0, "stock_splits"), Some(&Cell::Float(0.0)));
    let names = artifact_names(dir.path());
    assert!(names[0].starts_with("AAPL_historical_1y_1d_"), "{}", names[0]);
}

#[tokio::test]
async fn test_financials_persist_only_non_empty_statements() {
    let balance_sheet = FinancialStatement {
        periods: vec![
            NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
            NaiveDate::from_ymd_opt(2022, 12, 31).unwrap(),
        ],
        line_items: vec![
            LineItem { name: "totalAssets".to_string(), values: vec![Some(402392000000.0), Some(365264000000.0)] },
            LineItem { name: "totalLiab".to_string(), values: vec![Some(119013000000.0), None] },
        ],
    };
    let fake = Arc::new(FakeMarketData {
        statements: vec![(StatementKind::BalanceSheet, balance_sheet.clone())],
        ..FakeMarketData::default()
    });
    let dir = tempfile::tempdir().unwrap();

    let result = extractor(fake, dir.path()).get_financials("GOOGL").await.unwrap();

    assert!(result.data.income_statement.is_empty());
    assert!(result.data.cash_flow.is_empty());
    assert_eq!(result.data.balance_sheet, balance_sheet);

    let names = artifact_names(dir.path());
    assert_eq!(names.len(), 1);
    assert!(names[0].starts_with("GOOGL_balance_sheet_"));

    let saved = DataTable::read_csv(result.artifacts[0].path()).unwrap();
    assert_eq!(saved.columns(), &["index", "2023-12-31", "2022-12-31"]);
    assert_eq!(saved.get(1, "index"), Some(&Cell::Text("totalLiab".to_string())));
    assert_eq!(saved.get(1, "2022-12-31"), Some(&Cell::Null));
}

#[tokio::test]
async fn test_company_info_failure_is_typed() {
    let fake = Arc::new(FakeMarketData::default());
    let dir = tempfile::tempdir().unwrap();

    assert_matches!(
        extractor(fake, dir.path()).get_company_info("ZZZZ").await,
        Err(ExtractError::Empty(_))
    );
    assert!(artifact_names(dir.path()).is_empty());
}
