use reqwest::Client;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ExtractError;
use crate::models::OutputSize;

pub const ALPHA_VANTAGE_BASE_URL: &str = "https://www.alphavantage.co/query";

/// Payload key holding the adjusted daily series
pub const DAILY_SERIES_KEY: &str = "Time Series (Daily)";

/// Keys Alpha Vantage uses to report failures and throttling inside a 200 response
const ERROR_MESSAGE_KEY: &str = "Error Message";
const THROTTLE_KEYS: [&str; 2] = ["Note", "Information"];

/// Alpha Vantage API client
#[derive(Clone)]
pub struct AlphaVantageClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl AlphaVantageClient {
    pub fn new(api_key: Option<String>) -> Result<Self, ExtractError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("stock-extract/0.1")
            .build()
            .map_err(|e| ExtractError::Network(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            base_url: ALPHA_VANTAGE_BASE_URL.to_string(),
        })
    }

    /// Point the client at another endpoint (mock servers, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Fetch the adjusted daily series and return the `date -> fields` mapping.
    pub async fn get_daily_adjusted(
        &self,
        symbol: &str,
        size: OutputSize,
    ) -> Result<Map<String, Value>, ExtractError> {
        let api_key = self.api_key.as_deref().ok_or(ExtractError::MissingApiKey)?;
        let params = [
            ("function", "TIME_SERIES_DAILY_ADJUSTED"),
            ("symbol", symbol),
            ("outputsize", size.as_str()),
            ("apikey", api_key),
            ("datatype", "json"),
        ];

        let mut payload = self.query(&params).await?;
        check_provider_error(&payload)?;

        match payload.remove(DAILY_SERIES_KEY) {
            Some(Value::Object(series)) => Ok(series),
            Some(other) => Err(ExtractError::malformed(format!(
                "`{}` is not an object: {}",
                DAILY_SERIES_KEY,
                type_name(&other)
            ))),
            None => Err(ExtractError::malformed(format!(
                "unexpected data format, keys: {:?}",
                payload.keys().collect::<Vec<_>>()
            ))),
        }
    }

    /// Fetch the flat company overview record.
    pub async fn get_company_overview(
        &self,
        symbol: &str,
    ) -> Result<Map<String, Value>, ExtractError> {
        let api_key = self.api_key.as_deref().ok_or(ExtractError::MissingApiKey)?;
        let params = [("function", "OVERVIEW"), ("symbol", symbol), ("apikey", api_key)];

        let payload = self.query(&params).await?;
        check_provider_error(&payload)?;

        if payload.is_empty() {
            return Err(ExtractError::Empty(symbol.to_string()));
        }
        Ok(payload)
    }

    async fn query(&self, params: &[(&str, &str)]) -> Result<Map<String, Value>, ExtractError> {
        debug!("Requesting {} function={}", self.base_url, params[0].1);

        let response = self
            .client
            .get(&self.base_url)
            .query(params)
            .send()
            .await?
            .error_for_status()?;

        let body: Value = response.json().await?;
        match body {
            Value::Object(map) => Ok(map),
            other => Err(ExtractError::malformed(format!(
                "expected a JSON object, got {}",
                type_name(&other)
            ))),
        }
    }
}

fn check_provider_error(payload: &Map<String, Value>) -> Result<(), ExtractError> {
    if let Some(message) = payload.get(ERROR_MESSAGE_KEY) {
        return Err(ExtractError::Provider(value_text(message)));
    }
    // Throttling notices replace the whole body
    if payload.len() == 1 {
        if let Some(message) = THROTTLE_KEYS.iter().find_map(|key| payload.get(*key)) {
            warn!("Alpha Vantage throttled the request");
            return Err(ExtractError::Provider(value_text(message)));
        }
    }
    Ok(())
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
