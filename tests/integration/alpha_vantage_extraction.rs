//! Alpha Vantage extraction against a mock HTTP server

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use stock_extract::api::{AlphaVantageClient, Unthrottled};
use stock_extract::extraction::{AlphaVantageExtractor, RawDataWriter};
use stock_extract::models::{Cell, Credentials, DataTable, OutputSize};
use stock_extract::ExtractError;

use crate::common::api_mock::CountingLimiter;
use crate::common::{artifact_names, fixtures, logging};

fn extractor(server: &MockServer, api_key: Option<&str>, dir: &std::path::Path) -> AlphaVantageExtractor {
    let client = AlphaVantageClient::new(api_key.map(String::from))
        .unwrap()
        .with_base_url(format!("{}/query", server.uri()));
    AlphaVantageExtractor::with_client(client, RawDataWriter::new(dir))
        .with_rate_limiter(Arc::new(Unthrottled))
}

#[tokio::test]
async fn test_daily_adjusted_aapl_example() {
    logging::init_test_logging();
    logging::log_test_step("Daily adjusted AAPL with two trading dates");

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/query"))
        .and(query_param("function", "TIME_SERIES_DAILY_ADJUSTED"))
        .and(query_param("symbol", "AAPL"))
        .and(query_param("outputsize", "compact"))
        .and(query_param("datatype", "json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(fixtures::daily_series(&[
            ("2024-01-03", 184.25),
            ("2024-01-02", 185.64),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let result = extractor(&server, Some("demo"), dir.path())
        .get_daily_adjusted("AAPL", OutputSize::Compact)
        .await
        .unwrap();

    let table = &result.data;
    logging::log_test_data("columns", &table.columns());
    assert_eq!(table.len(), 2);
    assert_eq!(
        table.columns(),
        &[
            "date", "open", "high", "low", "close", "adjusted_close", "volume", "dividend",
            "split_coefficient", "symbol"
        ]
    );
    assert!(table.column("symbol").iter().all(|c| **c == Cell::Text("AAPL".to_string())));
    assert_eq!(table.get(1, "close"), Some(&Cell::Float(185.64)));

    let names = artifact_names(dir.path());
    assert_eq!(names.len(), 1);
    assert!(names[0].starts_with("AAPL_daily_adjusted_"), "{}", names[0]);

    let saved = DataTable::read_csv(result.artifacts[0].path()).unwrap();
    assert_eq!(&saved, table);
}

#[tokio::test]
async fn test_provider_error_writes_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Error Message": "Invalid API call. Please retry or visit the documentation for TIME_SERIES_DAILY_ADJUSTED."
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let result = extractor(&server, Some("demo"), dir.path())
        .get_daily_adjusted("NOPE", OutputSize::Full)
        .await;

    assert_matches!(result, Err(ExtractError::Provider(msg)) if msg.starts_with("Invalid API call"));
    assert!(artifact_names(dir.path()).is_empty());
}

#[tokio::test]
async fn test_missing_series_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Meta Data": {"2. Symbol": "AAPL"}
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let result = extractor(&server, Some("demo"), dir.path())
        .get_daily_adjusted("AAPL", OutputSize::Compact)
        .await;

    assert_matches!(result, Err(ExtractError::Malformed(_)));
    assert!(artifact_names(dir.path()).is_empty());
}

#[tokio::test]
async fn test_http_failure_is_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let result = extractor(&server, Some("demo"), dir.path())
        .get_company_overview("IBM")
        .await;

    assert_matches!(result, Err(ExtractError::Network(_)));
    assert!(artifact_names(dir.path()).is_empty());
}

#[tokio::test]
async fn test_placeholder_key_never_calls_the_api() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let credentials = Credentials {
        alpha_vantage_api_key: Some("YOUR_ALPHA_VANTAGE_API_KEY".to_string()),
    };
    let client = AlphaVantageClient::new(credentials.usable_alpha_vantage_key().map(String::from))
        .unwrap()
        .with_base_url(format!("{}/query", server.uri()));
    let extractor = AlphaVantageExtractor::with_client(client, RawDataWriter::new(dir.path()));

    assert_matches!(
        extractor.get_daily_adjusted("AAPL", OutputSize::Full).await,
        Err(ExtractError::MissingApiKey)
    );
    assert_matches!(extractor.get_company_overview("AAPL").await, Err(ExtractError::MissingApiKey));
    assert!(artifact_names(dir.path()).is_empty());
}

#[tokio::test]
async fn test_overview_persists_one_row_and_waits() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/query"))
        .and(query_param("function", "OVERVIEW"))
        .and(query_param("symbol", "IBM"))
        .respond_with(ResponseTemplate::new(200).set_body_json(fixtures::overview("IBM")))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let limiter = Arc::new(CountingLimiter::default());
    let extractor = extractor(&server, Some("demo"), dir.path()).with_rate_limiter(limiter.clone());

    let result = extractor.get_company_overview("IBM").await.unwrap();

    assert_eq!(limiter.waits(), 1);
    assert_eq!(result.data.len(), 1);
    assert_eq!(result.data.columns()[0], "Symbol");
    assert_eq!(result.data.get(0, "Sector"), Some(&Cell::Text("TECHNOLOGY".to_string())));

    let names = artifact_names(dir.path());
    assert_eq!(names.len(), 1);
    assert!(names[0].starts_with("IBM_company_overview_"));
}

#[tokio::test]
async fn test_overview_batch_continues_after_a_failed_symbol() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/query"))
        .and(query_param("symbol", "BAD"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Error Message": "Invalid API call."
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/query"))
        .and(query_param("symbol", "IBM"))
        .respond_with(ResponseTemplate::new(200).set_body_json(fixtures::overview("IBM")))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let limiter = Arc::new(CountingLimiter::default());
    let extractor = extractor(&server, Some("demo"), dir.path()).with_rate_limiter(limiter.clone());

    let results = extractor
        .get_company_overviews(&["BAD".to_string(), "IBM".to_string()])
        .await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, "BAD");
    assert_matches!(&results[0].1, Err(ExtractError::Provider(_)));
    assert_eq!(results[1].0, "IBM");
    assert!(results[1].1.is_ok());
    assert_eq!(limiter.waits(), 1);
    assert_eq!(artifact_names(dir.path()).len(), 1);
}

#[tokio::test]
async fn test_empty_overview_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let limiter = Arc::new(CountingLimiter::default());
    let extractor = extractor(&server, Some("demo"), dir.path()).with_rate_limiter(limiter.clone());

    assert_matches!(extractor.get_company_overview("ZZZZ").await, Err(ExtractError::Empty(_)));
    assert_eq!(limiter.waits(), 0);
    assert!(artifact_names(dir.path()).is_empty());
}
