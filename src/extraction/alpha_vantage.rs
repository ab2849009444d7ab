use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument, Span};

use super::{Extracted, RawDataWriter};
use crate::api::{AlphaVantageClient, ApiRateLimiter, RateLimiter};
use crate::error::ExtractError;
use crate::models::{Cell, Credentials, DataTable, OutputSize};

/// Canonical name for an Alpha Vantage daily field; unknown fields keep theirs.
fn column_name(field: &str) -> &str {
    match field {
        "1. open" => "open",
        "2. high" => "high",
        "3. low" => "low",
        "4. close" => "close",
        "5. adjusted close" => "adjusted_close",
        "6. volume" => "volume",
        "7. dividend amount" => "dividend",
        "8. split coefficient" => "split_coefficient",
        other => other,
    }
}

fn raw_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.trim().to_string()),
        other => Some(other.to_string()),
    }
}

/// Coerce one column: integers when every value is integral, floats otherwise.
fn coerce_column(field: &str, raw: &[Option<String>]) -> Result<Vec<Cell>, ExtractError> {
    let all_integers = raw
        .iter()
        .flatten()
        .all(|value| value.parse::<i64>().is_ok());

    raw.iter()
        .map(|value| match value {
            None => Ok(Cell::Null),
            Some(value) if all_integers => value.parse::<i64>().map(Cell::Int).map_err(|e| {
                ExtractError::malformed(format!("`{}` value {:?}: {}", field, value, e))
            }),
            Some(value) => value.parse::<f64>().map(Cell::from_f64).map_err(|_| {
                ExtractError::malformed(format!("`{}` value {:?} is not numeric", field, value))
            }),
        })
        .collect()
}

/// Flatten the `date -> fields` series into `date, <fields...>, symbol` rows,
/// keeping the provider's date order.
pub(crate) fn daily_table(
    symbol: &str,
    series: &Map<String, Value>,
) -> Result<DataTable, ExtractError> {
    let mut fields: Vec<String> = Vec::new();
    let mut dates = Vec::with_capacity(series.len());

    for (date, entry) in series {
        let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|e| ExtractError::malformed(format!("date {:?}: {}", date, e)))?;
        dates.push(parsed);

        let entry = entry
            .as_object()
            .ok_or_else(|| ExtractError::malformed(format!("entry for {} is not an object", date)))?;
        for field in entry.keys() {
            if !fields.contains(field) {
                fields.push(field.clone());
            }
        }
    }

    let mut columns = Vec::with_capacity(fields.len());
    for field in &fields {
        let raw: Vec<Option<String>> = series
            .values()
            .map(|entry| entry.get(field).and_then(raw_text))
            .collect();
        columns.push(coerce_column(field, &raw)?);
    }

    let mut table = DataTable::new(
        std::iter::once("date").chain(fields.iter().map(|f| column_name(f))),
    );
    for (row_idx, date) in dates.into_iter().enumerate() {
        let mut row = Vec::with_capacity(columns.len() + 1);
        row.push(Cell::Date(date));
        row.extend(columns.iter().map(|column| column[row_idx].clone()));
        table.push_row(row);
    }
    table.push_constant_column("symbol", Cell::Text(symbol.to_string()));

    Ok(table)
}

/// Single-row overview table; every value kept as provider text.
pub(crate) fn overview_table(record: &Map<String, Value>) -> DataTable {
    DataTable::single_row(record.iter().map(|(key, value)| {
        let cell = match raw_text(value) {
            Some(text) => Cell::Text(text),
            None => Cell::Null,
        };
        (key.clone(), cell)
    }))
}

/// Extracts daily quotes and company overviews from Alpha Vantage
pub struct AlphaVantageExtractor {
    client: AlphaVantageClient,
    writer: RawDataWriter,
    rate_limiter: Arc<dyn RateLimiter>,
    span: Span,
}

impl AlphaVantageExtractor {
    /// Build an extractor writing into `raw_data_dir`. A missing or placeholder
    /// key is only a warning here; each call fails with `MissingApiKey` instead.
    pub fn new(
        credentials: &Credentials,
        raw_data_dir: impl Into<PathBuf>,
    ) -> Result<Self, ExtractError> {
        let api_key = credentials.usable_alpha_vantage_key().map(String::from);
        if api_key.is_none() {
            warn!("Alpha Vantage API key is not configured, set it in config/credentials.yml or ALPHA_VANTAGE_API_KEY");
        }
        let client = AlphaVantageClient::new(api_key)?;
        Ok(Self::with_client(client, RawDataWriter::new(raw_data_dir)))
    }

    pub fn with_client(client: AlphaVantageClient, writer: RawDataWriter) -> Self {
        Self {
            client,
            writer,
            rate_limiter: Arc::new(ApiRateLimiter::default()),
            span: info_span!("alpha_vantage_extractor"),
        }
    }

    /// Replace the post-overview cooldown, e.g. to share one limiter across extractors.
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    pub fn writer(&self) -> &RawDataWriter {
        &self.writer
    }

    /// Adjusted daily series as `date, open, high, low, close, adjusted_close,
    /// volume, dividend, split_coefficient, symbol`, persisted as `daily_adjusted`.
    pub async fn get_daily_adjusted(
        &self,
        symbol: &str,
        size: OutputSize,
    ) -> Result<Extracted<DataTable>, ExtractError> {
        async {
            info!("📈 Extracting daily adjusted data for {} ({})", symbol, size.as_str());

            let series = self.client.get_daily_adjusted(symbol, size).await?;
            if series.is_empty() {
                return Err(ExtractError::Empty(symbol.to_string()));
            }
            let table = daily_table(symbol, &series)?;
            info!("✅ Parsed {} daily rows for {}", table.len(), symbol);

            let outcome = self.writer.save(&table, symbol, "daily_adjusted");
            Ok::<_, ExtractError>(Extracted::new(table, vec![outcome]))
        }
        .instrument(self.span.clone())
        .await
        .inspect_err(|e| error!("Daily extraction failed for {}: {}", symbol, e))
    }

    /// Company overview as one row of text cells, persisted as `company_overview`.
    /// Waits on the rate limiter before returning.
    pub async fn get_company_overview(
        &self,
        symbol: &str,
    ) -> Result<Extracted<DataTable>, ExtractError> {
        async {
            info!("🏢 Extracting company overview for {}", symbol);

            let record = self.client.get_company_overview(symbol).await?;
            let table = overview_table(&record);
            let outcome = self.writer.save(&table, symbol, "company_overview");

            self.rate_limiter.wait().await;
            Ok::<_, ExtractError>(Extracted::new(table, vec![outcome]))
        }
        .instrument(self.span.clone())
        .await
        .inspect_err(|e| error!("Overview extraction failed for {}: {}", symbol, e))
    }

    /// Overviews for several symbols in order. A failed symbol does not stop the rest.
    pub async fn get_company_overviews(
        &self,
        symbols: &[String],
    ) -> Vec<(String, Result<Extracted<DataTable>, ExtractError>)> {
        let mut results = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let result = self.get_company_overview(symbol).await;
            results.push((symbol.clone(), result));
        }
        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        info!("✅ Extracted {} of {} company overviews", results.len() - failed, results.len());
        results
    }
}
