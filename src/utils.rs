use chrono::NaiveDate;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Default filter when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "stock_extract=info";

/// `--verbose` wins, then `RUST_LOG`, then the default.
pub fn log_filter(verbose: bool, rust_log: Option<&str>) -> EnvFilter {
    if verbose {
        return EnvFilter::new("stock_extract=debug");
    }
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install the global subscriber. Call once at process start; later calls are ignored.
/// `.env` is loaded first so a `RUST_LOG` set there applies.
pub fn init_logging(verbose: bool) {
    dotenvy::dotenv().ok();
    let filter = log_filter(verbose, std::env::var("RUST_LOG").ok().as_deref());

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("Global subscriber already installed");
    }
}

/// Parse a `YYYY-MM-DD` command line date
pub fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| format!("invalid date {:?} (expected YYYY-MM-DD): {}", raw, e))
}

/// Split `AAPL,MSFT googl` style input into upper-cased symbols
pub fn parse_symbols<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    raw.iter()
        .flat_map(|chunk| chunk.as_ref().split(',').map(str::to_string).collect::<Vec<_>>())
        .map(|symbol| symbol.trim().to_uppercase())
        .filter(|symbol| !symbol.is_empty())
        .collect()
}
