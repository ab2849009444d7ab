use async_trait::async_trait;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Offset, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::MarketDataClient;
use crate::error::ExtractError;
use crate::models::{
    DownloadWindow, FinancialStatement, LineItem, PriceBar, StatementKind,
};

pub const YAHOO_QUERY_URL: &str = "https://query1.finance.yahoo.com";
pub const YAHOO_COOKIE_URL: &str = "https://fc.yahoo.com";

const INFO_MODULES: &str =
    "assetProfile,summaryProfile,summaryDetail,defaultKeyStatistics,financialData,quoteType,price";

/// quoteSummary module and list key holding the annual statements
fn statement_module(kind: StatementKind) -> (&'static str, &'static str) {
    match kind {
        StatementKind::Income => ("incomeStatementHistory", "incomeStatementHistory"),
        StatementKind::BalanceSheet => ("balanceSheetHistory", "balanceSheetStatements"),
        StatementKind::CashFlow => ("cashflowStatementHistory", "cashflowStatements"),
    }
}

// ============================================================================
// Wire formats
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    result: Option<Vec<ChartResult>>,
    error: Option<YahooErrorBody>,
}

#[derive(Debug, Deserialize)]
struct YahooErrorBody {
    code: Option<String>,
    description: Option<String>,
}

impl YahooErrorBody {
    fn message(&self) -> String {
        match (&self.code, &self.description) {
            (Some(code), Some(description)) => format!("{}: {}", code, description),
            (None, Some(description)) => description.clone(),
            (Some(code), None) => code.clone(),
            (None, None) => String::from("unknown Yahoo error"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    #[serde(default)]
    events: Option<ChartEvents>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    #[serde(default)]
    gmtoffset: i32,
}

#[derive(Debug, Default, Deserialize)]
struct ChartEvents {
    #[serde(default)]
    dividends: HashMap<String, DividendEvent>,
    #[serde(default)]
    splits: HashMap<String, SplitEvent>,
}

#[derive(Debug, Deserialize)]
struct DividendEvent {
    amount: f64,
    date: i64,
}

#[derive(Debug, Deserialize)]
struct SplitEvent {
    date: i64,
    numerator: f64,
    denominator: f64,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteIndicator>,
    #[serde(default)]
    adjclose: Vec<AdjCloseIndicator>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteIndicator {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseIndicator {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteSummaryEnvelope {
    quote_summary: QuoteSummaryBody,
}

#[derive(Debug, Deserialize)]
struct QuoteSummaryBody {
    result: Option<Vec<Map<String, Value>>>,
    error: Option<YahooErrorBody>,
}

// ============================================================================
// Parsing
// ============================================================================

/// Daily and longer bars are stamped at exchange-local midnight
fn is_daily_or_longer(interval: &str) -> bool {
    interval.ends_with('d') || interval.ends_with("wk") || interval.ends_with("mo")
}

fn at(index: usize, values: &[Option<f64>]) -> Option<f64> {
    values.get(index).copied().flatten()
}

/// Turn a chart response body into bars. Rows without a close are dropped.
pub(crate) fn parse_chart(body: &str, interval: &str) -> Result<Vec<PriceBar>, ExtractError> {
    let envelope: ChartEnvelope = serde_json::from_str(body)?;
    if let Some(error) = envelope.chart.error {
        return Err(ExtractError::Provider(error.message()));
    }

    let result = match envelope.chart.result.and_then(|r| r.into_iter().next()) {
        Some(result) => result,
        None => return Ok(Vec::new()),
    };

    let offset = FixedOffset::east_opt(result.meta.gmtoffset).unwrap_or(Utc.fix());
    let daily = is_daily_or_longer(interval);

    let localize = |ts: i64| -> Option<DateTime<FixedOffset>> {
        let local = DateTime::<Utc>::from_timestamp(ts, 0)?.with_timezone(&offset);
        if daily {
            let midnight = local.date_naive().and_hms_opt(0, 0, 0)?;
            offset.from_local_datetime(&midnight).single()
        } else {
            Some(local)
        }
    };
    // Events are matched to bars by local day for daily data, exact time otherwise
    let event_key = |ts: DateTime<FixedOffset>| -> i64 {
        if daily {
            ts.date_naive().num_days_from_ce() as i64
        } else {
            ts.timestamp()
        }
    };

    let events = result.events.unwrap_or_default();
    let mut dividends: HashMap<i64, f64> = HashMap::new();
    for event in events.dividends.values() {
        if let Some(ts) = localize(event.date) {
            *dividends.entry(event_key(ts)).or_insert(0.0) += event.amount;
        }
    }
    let mut splits: HashMap<i64, f64> = HashMap::new();
    for event in events.splits.values() {
        if event.denominator == 0.0 {
            continue;
        }
        if let Some(ts) = localize(event.date) {
            splits.insert(event_key(ts), event.numerator / event.denominator);
        }
    }

    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
    let adjclose = result
        .indicators
        .adjclose
        .into_iter()
        .next()
        .map(|a| a.adjclose)
        .unwrap_or_default();

    let mut bars = Vec::with_capacity(result.timestamp.len());
    for (i, ts) in result.timestamp.iter().enumerate() {
        let close = match at(i, &quote.close) {
            Some(close) => close,
            None => continue,
        };
        let timestamp = match localize(*ts) {
            Some(timestamp) => timestamp,
            None => {
                return Err(ExtractError::malformed(format!("invalid timestamp {}", ts)));
            }
        };
        let key = event_key(timestamp);
        bars.push(PriceBar {
            timestamp,
            open: at(i, &quote.open).unwrap_or(f64::NAN),
            high: at(i, &quote.high).unwrap_or(f64::NAN),
            low: at(i, &quote.low).unwrap_or(f64::NAN),
            close,
            adj_close: at(i, &adjclose),
            volume: at(i, &quote.volume).map(|v| v.max(0.0) as u64).unwrap_or(0),
            dividends: dividends.get(&key).copied().unwrap_or(0.0),
            stock_splits: splits.get(&key).copied().unwrap_or(0.0),
        });
    }

    Ok(bars)
}

fn parse_quote_summary(body: &str) -> Result<Map<String, Value>, ExtractError> {
    let envelope: QuoteSummaryEnvelope = serde_json::from_str(body)?;
    if let Some(error) = envelope.quote_summary.error {
        return Err(ExtractError::Provider(error.message()));
    }
    Ok(envelope
        .quote_summary
        .result
        .and_then(|r| r.into_iter().next())
        .unwrap_or_default())
}

/// Collapse quoteSummary modules into one flat record. `{raw, fmt}` wrappers become
/// their raw value; the first module to define a key wins.
pub(crate) fn flatten_info(modules: &Map<String, Value>) -> Map<String, Value> {
    let mut info = Map::new();
    for module in modules.values() {
        let fields = match module.as_object() {
            Some(fields) => fields,
            None => continue,
        };
        for (key, value) in fields {
            if key == "maxAge" || info.contains_key(key) {
                continue;
            }
            let flattened = match value {
                Value::Object(inner) if inner.is_empty() => continue,
                Value::Object(inner) if inner.contains_key("raw") => inner["raw"].clone(),
                Value::Object(inner) if inner.contains_key("fmt") => inner["fmt"].clone(),
                other => other.clone(),
            };
            info.insert(key.clone(), flattened);
        }
    }
    info
}

fn raw_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Object(inner) => inner.get("raw").and_then(Value::as_f64),
        _ => None,
    }
}

fn period_end(value: &Value) -> Option<NaiveDate> {
    if let Some(fmt) = value.get("fmt").and_then(Value::as_str) {
        if let Ok(date) = NaiveDate::parse_from_str(fmt, "%Y-%m-%d") {
            return Some(date);
        }
    }
    let raw = value.get("raw").and_then(Value::as_i64)?;
    DateTime::<Utc>::from_timestamp(raw, 0).map(|ts| ts.date_naive())
}

/// Pivot a quoteSummary statement history into line items x periods.
pub(crate) fn parse_statement(
    result: &Map<String, Value>,
    kind: StatementKind,
) -> Result<FinancialStatement, ExtractError> {
    let (module, list_key) = statement_module(kind);
    let entries = match result
        .get(module)
        .and_then(|m| m.get(list_key))
        .and_then(Value::as_array)
    {
        Some(entries) => entries,
        None => return Ok(FinancialStatement::default()),
    };

    let mut statement = FinancialStatement::default();
    let mut item_index: HashMap<String, usize> = HashMap::new();

    for (period_idx, entry) in entries.iter().enumerate() {
        let fields = entry
            .as_object()
            .ok_or_else(|| ExtractError::malformed(format!("{} entry is not an object", module)))?;
        let end = fields
            .get("endDate")
            .and_then(period_end)
            .ok_or_else(|| ExtractError::malformed(format!("{} entry has no endDate", module)))?;
        statement.periods.push(end);

        for (key, value) in fields {
            if key == "endDate" || key == "maxAge" {
                continue;
            }
            let idx = *item_index.entry(key.clone()).or_insert_with(|| {
                statement.line_items.push(LineItem {
                    name: key.clone(),
                    values: vec![None; period_idx],
                });
                statement.line_items.len() - 1
            });
            statement.line_items[idx].values.push(raw_number(value));
        }
        // Items this period did not report
        for item in &mut statement.line_items {
            item.values.resize(period_idx + 1, None);
        }
    }

    Ok(statement)
}

// ============================================================================
// Client
// ============================================================================

/// Yahoo Finance client over the chart and quoteSummary endpoints.
///
/// quoteSummary needs a session cookie plus crumb token; the crumb is fetched
/// lazily and cached until Yahoo rejects it.
pub struct YahooClient {
    client: Client,
    base_url: String,
    cookie_url: String,
    crumb: Mutex<Option<String>>,
}

impl YahooClient {
    pub fn new() -> Result<Self, ExtractError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (X11; Linux x86_64) stock-extract/0.1")
            .cookie_store(true)
            .build()
            .map_err(|e| ExtractError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: YAHOO_QUERY_URL.to_string(),
            cookie_url: YAHOO_COOKIE_URL.to_string(),
            crumb: Mutex::new(None),
        })
    }

    /// Point the client at other hosts (mock servers, proxies).
    pub fn with_urls(mut self, base_url: impl Into<String>, cookie_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self.cookie_url = cookie_url.into();
        self
    }

    async fn get_text(&self, url: &str, params: &[(&str, String)]) -> Result<(StatusCode, String), ExtractError> {
        debug!("Making request to: {}", url);
        let response = self
            .client
            .get(url)
            .header("referer", "https://finance.yahoo.com/")
            .query(params)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }

    async fn chart(
        &self,
        symbol: &str,
        params: Vec<(&str, String)>,
        interval: &str,
    ) -> Result<Vec<PriceBar>, ExtractError> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol);
        let (status, body) = self.get_text(&url, &params).await?;

        // Unknown symbols come back as 404 with a JSON error body
        match parse_chart(&body, interval) {
            Ok(bars) if status.is_success() => Ok(bars),
            Err(ExtractError::Provider(message)) => Err(ExtractError::Provider(message)),
            _ if !status.is_success() => Err(ExtractError::Network(format!(
                "Yahoo chart returned status {}",
                status
            ))),
            other => other,
        }
    }

    async fn crumb(&self) -> Result<String, ExtractError> {
        let mut cached = self.crumb.lock().await;
        if let Some(crumb) = cached.as_ref() {
            return Ok(crumb.clone());
        }

        // The cookie endpoint answers 404 but still sets the session cookie
        if let Err(e) = self.client.get(&self.cookie_url).send().await {
            warn!("Failed to fetch Yahoo session cookie: {}", e);
        }

        let url = format!("{}/v1/test/getcrumb", self.base_url);
        let (status, body) = self.get_text(&url, &[]).await?;
        let body = body.trim();

        if status == StatusCode::TOO_MANY_REQUESTS || body.to_lowercase().contains("too many requests") {
            return Err(ExtractError::Provider("Yahoo rate limited the crumb request".to_string()));
        }
        if !status.is_success() || body.is_empty() || body.len() >= 100 || body.contains(char::is_whitespace) || body.contains("<html") {
            return Err(ExtractError::Provider("failed to obtain Yahoo crumb".to_string()));
        }

        info!("🔑 Obtained Yahoo crumb");
        *cached = Some(body.to_string());
        Ok(body.to_string())
    }

    async fn quote_summary(&self, symbol: &str, modules: &str) -> Result<Map<String, Value>, ExtractError> {
        let crumb = self.crumb().await?;
        let url = format!("{}/v10/finance/quoteSummary/{}", self.base_url, symbol);
        let params = [("modules", modules.to_string()), ("crumb", crumb)];
        let (status, body) = self.get_text(&url, &params).await?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            // Force a fresh handshake on the next call
            *self.crumb.lock().await = None;
            return Err(ExtractError::Provider(format!(
                "Yahoo rejected the session (status {})",
                status
            )));
        }

        match parse_quote_summary(&body) {
            Ok(result) if status.is_success() => Ok(result),
            Err(ExtractError::Provider(message)) => Err(ExtractError::Provider(message)),
            _ if !status.is_success() => Err(ExtractError::Network(format!(
                "Yahoo quoteSummary returned status {}",
                status
            ))),
            other => other,
        }
    }
}

#[async_trait]
impl MarketDataClient for YahooClient {
    async fn history(
        &self,
        symbol: &str,
        period: &str,
        interval: &str,
    ) -> Result<Vec<PriceBar>, ExtractError> {
        let params = vec![
            ("range", period.to_string()),
            ("interval", interval.to_string()),
            ("events", "div,splits".to_string()),
            ("includeAdjustedClose", "true".to_string()),
        ];
        let bars = self.chart(symbol, params, interval).await?;
        Ok(bars.iter().map(PriceBar::auto_adjusted).collect())
    }

    async fn info(&self, symbol: &str) -> Result<Map<String, Value>, ExtractError> {
        let modules = self.quote_summary(symbol, INFO_MODULES).await?;
        let info = flatten_info(&modules);
        if info.is_empty() {
            return Err(ExtractError::Empty(symbol.to_string()));
        }
        Ok(info)
    }

    async fn statement(
        &self,
        symbol: &str,
        kind: StatementKind,
    ) -> Result<FinancialStatement, ExtractError> {
        let (module, _) = statement_module(kind);
        let result = self.quote_summary(symbol, module).await?;
        parse_statement(&result, kind)
    }

    async fn download(
        &self,
        symbols: &[String],
        window: &DownloadWindow,
    ) -> Result<BTreeMap<String, Vec<PriceBar>>, ExtractError> {
        let mut window_params = match window {
            DownloadWindow::Period(period) => vec![("range", period.clone())],
            DownloadWindow::Range { start, end } => vec![
                ("period1", midnight_utc(*start).to_string()),
                ("period2", midnight_utc(*end).to_string()),
            ],
        };
        window_params.push(("interval", "1d".to_string()));
        window_params.push(("includeAdjustedClose", "true".to_string()));

        let mut grouped = BTreeMap::new();
        for symbol in symbols {
            match self.chart(symbol, window_params.clone(), "1d").await {
                Ok(bars) if !bars.is_empty() => {
                    let adjusted = bars.iter().map(PriceBar::auto_adjusted).collect();
                    grouped.insert(symbol.clone(), adjusted);
                }
                Ok(_) => warn!("No data downloaded for {}", symbol),
                Err(e) => warn!("Failed to download {}: {}", symbol, e),
            }
        }
        Ok(grouped)
    }
}

fn midnight_utc(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}
