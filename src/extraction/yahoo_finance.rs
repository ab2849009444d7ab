use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument, Span};

use super::{Extracted, RawDataWriter};
use crate::api::{MarketDataClient, YahooClient};
use crate::error::ExtractError;
use crate::models::{
    download_table, history_table, Cell, DataTable, DownloadWindow, Financials, StatementKind,
};

pub const DEFAULT_PERIOD: &str = "max";
pub const DEFAULT_INTERVAL: &str = "1d";
/// Trailing window used when a multi-symbol request has no explicit dates
pub const DEFAULT_MULTI_PERIOD: &str = "1y";

/// Extracts history, company info and statements from Yahoo Finance
pub struct YahooFinanceExtractor {
    client: Arc<dyn MarketDataClient>,
    writer: RawDataWriter,
    span: Span,
}

impl YahooFinanceExtractor {
    pub fn new(raw_data_dir: impl Into<PathBuf>) -> Result<Self, ExtractError> {
        let client = YahooClient::new()?;
        Ok(Self::with_client(Arc::new(client), RawDataWriter::new(raw_data_dir)))
    }

    pub fn with_client(client: Arc<dyn MarketDataClient>, writer: RawDataWriter) -> Self {
        Self {
            client,
            writer,
            span: info_span!("yahoo_finance_extractor"),
        }
    }

    pub fn writer(&self) -> &RawDataWriter {
        &self.writer
    }

    /// Price history with corporate actions, persisted as `historical_{period}_{interval}`.
    pub async fn get_historical_data(
        &self,
        symbol: &str,
        period: &str,
        interval: &str,
    ) -> Result<Extracted<DataTable>, ExtractError> {
        async {
            info!(
                "📈 Extracting historical data for {} (period: {}, interval: {})",
                symbol, period, interval
            );

            let bars = self.client.history(symbol, period, interval).await?;
            if bars.is_empty() {
                warn!("No data returned for {}", symbol);
                return Err(ExtractError::Empty(symbol.to_string()));
            }

            let table = history_table(symbol, &bars);
            let data_type = format!("historical_{}_{}", period, interval);
            let outcome = self.writer.save(&table, symbol, &data_type);
            Ok::<_, ExtractError>(Extracted::new(table, vec![outcome]))
        }
        .instrument(self.span.clone())
        .await
        .inspect_err(|e| error!("Historical extraction failed for {}: {}", symbol, e))
    }

    /// The provider's info record, untouched. A one-row copy is persisted as `company_info`.
    pub async fn get_company_info(
        &self,
        symbol: &str,
    ) -> Result<Extracted<Map<String, Value>>, ExtractError> {
        async {
            info!("🏢 Extracting company info for {}", symbol);

            let info = self.client.info(symbol).await?;
            let table = DataTable::single_row(
                info.iter().map(|(key, value)| (key.clone(), Cell::from_json(value))),
            );
            let outcome = self.writer.save(&table, symbol, "company_info");
            Ok::<_, ExtractError>(Extracted::new(info, vec![outcome]))
        }
        .instrument(self.span.clone())
        .await
        .inspect_err(|e| error!("Company info extraction failed for {}: {}", symbol, e))
    }

    /// All three statements. Empty ones are returned but not persisted.
    pub async fn get_financials(&self, symbol: &str) -> Result<Extracted<Financials>, ExtractError> {
        async {
            info!("📊 Extracting financial statements for {}", symbol);

            let financials = Financials {
                income_statement: self.client.statement(symbol, StatementKind::Income).await?,
                balance_sheet: self.client.statement(symbol, StatementKind::BalanceSheet).await?,
                cash_flow: self.client.statement(symbol, StatementKind::CashFlow).await?,
            };

            let mut artifacts = Vec::new();
            for kind in StatementKind::ALL {
                let statement = financials.statement(kind);
                if statement.is_empty() {
                    info!("No {} reported for {}", kind.data_type(), symbol);
                    continue;
                }
                artifacts.push(self.writer.save(&statement.to_table(), symbol, kind.data_type()));
            }

            Ok::<_, ExtractError>(Extracted::new(financials, artifacts))
        }
        .instrument(self.span.clone())
        .await
        .inspect_err(|e| error!("Financials extraction failed for {}: {}", symbol, e))
    }

    /// Auto-adjusted daily bars for several symbols in one table, persisted as
    /// `historical_multiple`. Without both dates the trailing year is used.
    pub async fn get_multiple_tickers_data(
        &self,
        symbols: &[String],
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Extracted<DataTable>, ExtractError> {
        let joined = symbols.join("_");
        async {
            info!("📈 Extracting data for multiple symbols: {:?}", symbols);

            let window = match (start_date, end_date) {
                (Some(start), Some(end)) => DownloadWindow::Range { start, end },
                _ => DownloadWindow::Period(DEFAULT_MULTI_PERIOD.to_string()),
            };

            let mut grouped = self.client.download(symbols, &window).await?;
            if grouped.is_empty() {
                warn!("No data returned for symbols {:?}", symbols);
                return Err(ExtractError::Empty(joined.clone()));
            }

            let (identifier, table) = if let [symbol] = symbols {
                // Single request: the only group is the answer
                let bars = match grouped.remove(symbol) {
                    Some(bars) => bars,
                    None => grouped.into_values().next().unwrap_or_default(),
                };
                (symbol.clone(), download_table(symbol, &bars))
            } else {
                let slices: Vec<DataTable> = symbols
                    .iter()
                    .filter_map(|symbol| grouped.get(symbol).map(|bars| download_table(symbol, bars)))
                    .collect();
                if slices.is_empty() {
                    warn!("None of the requested symbols were returned");
                    return Err(ExtractError::Empty(joined.clone()));
                }
                (joined.clone(), DataTable::concat(slices))
            };

            if table.is_empty() {
                return Err(ExtractError::Empty(identifier));
            }

            let outcome = self.writer.save(&table, &identifier, "historical_multiple");
            Ok::<_, ExtractError>(Extracted::new(table, vec![outcome]))
        }
        .instrument(self.span.clone())
        .await
        .inspect_err(|e| error!("Multi-symbol extraction failed for {}: {}", joined, e))
    }
}
