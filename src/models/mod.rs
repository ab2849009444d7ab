use chrono::{DateTime, FixedOffset, NaiveDate};
use serde_json::Value;
use std::fmt;
use std::io::Write;
use std::path::Path;

pub mod config;
pub use config::{Config, ConfigError, Credentials, DatabaseSettings};

/// Format used for timestamped cells, matching what pandas writes for tz-aware indexes.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%:z";

/// A single loosely-typed table cell
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(DateTime<FixedOffset>),
}

impl Cell {
    /// Infer a cell from its CSV rendering.
    pub fn infer(raw: &str) -> Cell {
        if raw.is_empty() {
            return Cell::Null;
        }
        match raw {
            "True" => return Cell::Bool(true),
            "False" => return Cell::Bool(false),
            _ => {}
        }
        if let Ok(value) = raw.parse::<i64>() {
            return Cell::Int(value);
        }
        // f64 parsing accepts "inf"/"NaN"; only treat digit-bearing text as a number
        if raw.bytes().any(|b| b.is_ascii_digit()) {
            if let Ok(value) = raw.parse::<f64>() {
                return Cell::Float(value);
            }
        }
        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            return Cell::Date(date);
        }
        if let Ok(ts) = DateTime::parse_from_str(raw, DATETIME_FORMAT) {
            return Cell::DateTime(ts);
        }
        Cell::Text(raw.to_string())
    }

    pub fn from_f64(value: f64) -> Cell {
        if value.is_nan() {
            Cell::Null
        } else {
            Cell::Float(value)
        }
    }

    /// Convert a JSON value from a provider payload into a cell.
    /// Nested arrays and objects are kept as their JSON text.
    pub fn from_json(value: &Value) -> Cell {
        match value {
            Value::Null => Cell::Null,
            Value::Bool(b) => Cell::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Cell::Int(i),
                None => n.as_f64().map(Cell::from_f64).unwrap_or(Cell::Null),
            },
            Value::String(s) => Cell::Text(s.clone()),
            other => Cell::Text(other.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Bool(true) => f.write_str("True"),
            Cell::Bool(false) => f.write_str("False"),
            Cell::Int(i) => write!(f, "{}", i),
            // Whole floats keep their decimal point so they read back as floats
            Cell::Float(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 => {
                write!(f, "{:.1}", v)
            }
            Cell::Float(v) if v.is_nan() => Ok(()),
            Cell::Float(v) => write!(f, "{}", v),
            Cell::Text(s) => f.write_str(s),
            Cell::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Cell::DateTime(ts) => write!(f, "{}", ts.format(DATETIME_FORMAT)),
        }
    }
}

/// Canonical tabular form returned by every extractor
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataTable {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl DataTable {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Build a one-row table from ordered key/value pairs.
    pub fn single_row<I>(record: I) -> Self
    where
        I: IntoIterator<Item = (String, Cell)>,
    {
        let (columns, row): (Vec<String>, Vec<Cell>) = record.into_iter().unzip();
        Self {
            columns,
            rows: vec![row],
        }
    }

    /// Append a row. Short rows are padded with nulls, long rows truncated.
    pub fn push_row(&mut self, mut row: Vec<Cell>) {
        row.resize(self.columns.len(), Cell::Null);
        self.rows.push(row);
    }

    /// Append a column filled with the same value on every row.
    pub fn push_constant_column(&mut self, name: impl Into<String>, value: Cell) {
        self.columns.push(name.into());
        for row in &mut self.rows {
            row.push(value.clone());
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Cell> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    pub fn column(&self, name: &str) -> Vec<&Cell> {
        match self.column_index(name) {
            Some(idx) => self.rows.iter().map(|r| &r[idx]).collect(),
            None => Vec::new(),
        }
    }

    /// Stack tables vertically. Columns are the union in first-seen order;
    /// cells missing from a given table become nulls.
    pub fn concat(tables: Vec<DataTable>) -> DataTable {
        let mut columns: Vec<String> = Vec::new();
        for table in &tables {
            for column in &table.columns {
                if !columns.contains(column) {
                    columns.push(column.clone());
                }
            }
        }

        let mut combined = DataTable::new(columns.clone());
        for table in tables {
            let mapping: Vec<Option<usize>> = columns
                .iter()
                .map(|c| table.column_index(c))
                .collect();
            for row in table.rows {
                let cells = mapping
                    .iter()
                    .map(|idx| idx.map(|i| row[i].clone()).unwrap_or(Cell::Null))
                    .collect();
                combined.rows.push(cells);
            }
        }
        combined
    }

    /// Write the header and all rows as CSV, without any index column.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(&self.columns)?;
        for row in &self.rows {
            csv_writer.write_record(row.iter().map(|cell| cell.to_string()))?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    /// Read a CSV artifact back, inferring cell types.
    pub fn read_csv(path: impl AsRef<Path>) -> Result<DataTable, csv::Error> {
        let mut reader = csv::Reader::from_path(path)?;
        let columns: Vec<String> = reader.headers()?.iter().map(String::from).collect();
        let mut table = DataTable::new(columns);
        for record in reader.records() {
            let record = record?;
            table.push_row(record.iter().map(Cell::infer).collect());
        }
        Ok(table)
    }
}

/// One bar of a Yahoo price series
#[derive(Debug, Clone, PartialEq)]
pub struct PriceBar {
    pub timestamp: DateTime<FixedOffset>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adj_close: Option<f64>,
    pub volume: u64,
    pub dividends: f64,
    pub stock_splits: f64,
}

impl PriceBar {
    /// Scale OHLC by the adjusted/raw close ratio, as an auto-adjusted download does.
    pub fn auto_adjusted(&self) -> PriceBar {
        let ratio = match self.adj_close {
            Some(adj) if self.close != 0.0 => adj / self.close,
            _ => 1.0,
        };
        PriceBar {
            open: self.open * ratio,
            high: self.high * ratio,
            low: self.low * ratio,
            close: self.adj_close.unwrap_or(self.close),
            adj_close: None,
            ..self.clone()
        }
    }
}

/// Build the canonical history table: corporate actions included.
pub fn history_table(symbol: &str, bars: &[PriceBar]) -> DataTable {
    let mut table = DataTable::new([
        "date", "open", "high", "low", "close", "volume", "dividends", "stock_splits",
    ]);
    for bar in bars {
        table.push_row(vec![
            Cell::DateTime(bar.timestamp),
            Cell::from_f64(bar.open),
            Cell::from_f64(bar.high),
            Cell::from_f64(bar.low),
            Cell::from_f64(bar.close),
            Cell::Int(bar.volume as i64),
            Cell::from_f64(bar.dividends),
            Cell::from_f64(bar.stock_splits),
        ]);
    }
    table.push_constant_column("symbol", Cell::Text(symbol.to_string()));
    table
}

/// Build the canonical bulk-download table: prices only.
pub fn download_table(symbol: &str, bars: &[PriceBar]) -> DataTable {
    let mut table = DataTable::new(["date", "open", "high", "low", "close", "volume"]);
    for bar in bars {
        table.push_row(vec![
            Cell::DateTime(bar.timestamp),
            Cell::from_f64(bar.open),
            Cell::from_f64(bar.high),
            Cell::from_f64(bar.low),
            Cell::from_f64(bar.close),
            Cell::Int(bar.volume as i64),
        ]);
    }
    table.push_constant_column("symbol", Cell::Text(symbol.to_string()));
    table
}

/// Which financial statement to fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Income,
    BalanceSheet,
    CashFlow,
}

impl StatementKind {
    pub const ALL: [StatementKind; 3] = [
        StatementKind::Income,
        StatementKind::BalanceSheet,
        StatementKind::CashFlow,
    ];

    /// Tag used in artifact filenames
    pub fn data_type(&self) -> &'static str {
        match self {
            StatementKind::Income => "income_statement",
            StatementKind::BalanceSheet => "balance_sheet",
            StatementKind::CashFlow => "cash_flow",
        }
    }
}

/// A single line of a financial statement, one value per reporting period
#[derive(Debug, Clone, PartialEq)]
pub struct LineItem {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

/// Statement indexed by line item with one column per reporting period
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FinancialStatement {
    pub periods: Vec<NaiveDate>,
    pub line_items: Vec<LineItem>,
}

impl FinancialStatement {
    pub fn is_empty(&self) -> bool {
        self.periods.is_empty() || self.line_items.is_empty()
    }

    /// Promote the line-item index to a leading `index` column.
    pub fn to_table(&self) -> DataTable {
        let mut columns = vec![String::from("index")];
        columns.extend(self.periods.iter().map(|p| p.format("%Y-%m-%d").to_string()));
        let mut table = DataTable::new(columns);
        for item in &self.line_items {
            let mut row = vec![Cell::Text(item.name.clone())];
            row.extend(
                item.values
                    .iter()
                    .map(|v| v.map(Cell::from_f64).unwrap_or(Cell::Null)),
            );
            table.push_row(row);
        }
        table
    }
}

/// The three statements returned together
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Financials {
    pub income_statement: FinancialStatement,
    pub balance_sheet: FinancialStatement,
    pub cash_flow: FinancialStatement,
}

impl Financials {
    pub fn statement(&self, kind: StatementKind) -> &FinancialStatement {
        match kind {
            StatementKind::Income => &self.income_statement,
            StatementKind::BalanceSheet => &self.balance_sheet,
            StatementKind::CashFlow => &self.cash_flow,
        }
    }
}

/// Time window for a bulk multi-symbol download
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadWindow {
    /// Named trailing period such as `1y`
    Period(String),
    /// Explicit start (inclusive) to end (exclusive) range
    Range { start: NaiveDate, end: NaiveDate },
}

/// Alpha Vantage daily series size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputSize {
    /// Latest 100 data points
    Compact,
    /// Full 20+ year history
    #[default]
    Full,
}

impl OutputSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputSize::Compact => "compact",
            OutputSize::Full => "full",
        }
    }
}

impl From<&str> for OutputSize {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "compact" => OutputSize::Compact,
            _ => OutputSize::Full,
        }
    }
}
