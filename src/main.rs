use anyhow::{bail, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use stock_extract::api::{ApiRateLimiter, QuotaLimiter, RateLimiter};
use stock_extract::database::{DatabaseConnector, DatabaseMaintenance};
use stock_extract::extraction::yahoo_finance::{DEFAULT_INTERVAL, DEFAULT_PERIOD};
use stock_extract::extraction::{AlphaVantageExtractor, WriteOutcome, YahooFinanceExtractor};
use stock_extract::models::{Config, Credentials, DataTable, OutputSize, StatementKind};
use stock_extract::utils::{init_logging, parse_date, parse_symbols};

#[derive(Parser)]
#[command(author, version, about = "Extract market data from Alpha Vantage and Yahoo Finance", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Root of the raw data directory (defaults to STOCK_EXTRACT_DATA_DIR or ./data)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Credentials file with the Alpha Vantage key
    #[arg(long, global = true)]
    credentials: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Alpha Vantage adjusted daily series
    Daily {
        symbol: String,
        /// compact (100 points) or full
        #[arg(long, default_value = "full")]
        outputsize: String,
    },
    /// Alpha Vantage company overview
    Overview {
        symbols: Vec<String>,
        /// Allowed requests per minute instead of the fixed cooldown
        #[arg(long)]
        per_minute: Option<u32>,
    },
    /// Yahoo Finance price history
    History {
        symbol: String,
        #[arg(long, default_value = DEFAULT_PERIOD)]
        period: String,
        #[arg(long, default_value = DEFAULT_INTERVAL)]
        interval: String,
    },
    /// Yahoo Finance company info
    Info { symbol: String },
    /// Yahoo Finance income statement, balance sheet and cash flow
    Financials { symbol: String },
    /// Yahoo Finance bulk download for several symbols
    Multi {
        symbols: Vec<String>,
        /// Start date (YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        start: Option<NaiveDate>,
        /// End date, exclusive (YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        end: Option<NaiveDate>,
    },
    /// Database maintenance
    Db {
        #[command(subcommand)]
        action: DbAction,
        /// Environment section of the database config
        #[arg(long)]
        env: Option<String>,
        /// Database config file
        #[arg(long)]
        db_config: Option<PathBuf>,
    },
}

#[derive(Subcommand, Clone, Copy)]
enum DbAction {
    /// Run sql/maintenance/indexes.sql
    Indexes,
    /// Run sql/maintenance/cleanup.sql
    Cleanup,
}

fn report(artifacts: &[WriteOutcome]) {
    for artifact in artifacts {
        match artifact {
            WriteOutcome::Written(path) => println!("💾 {}", path.display()),
            WriteOutcome::Failed { path, error } => {
                eprintln!("⚠️  Could not write {}: {}", path.display(), error)
            }
        }
    }
}

fn preview(table: &DataTable) {
    println!("{}", table.columns().join(" | "));
    for row in table.rows().iter().take(5) {
        let cells: Vec<String> = row.iter().map(ToString::to_string).collect();
        println!("{}", cells.join(" | "));
    }
    println!("({} rows)", table.len());
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::from_env();
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(credentials) = cli.credentials {
        config.credentials_path = credentials;
    }

    match cli.command {
        Commands::Daily { symbol, outputsize } => {
            let credentials = Credentials::resolve(&config.credentials_path);
            let extractor = AlphaVantageExtractor::new(&credentials, config.alpha_vantage_dir())?;
            let result = extractor
                .get_daily_adjusted(&symbol.to_uppercase(), OutputSize::from(outputsize.as_str()))
                .await?;
            preview(&result.data);
            report(&result.artifacts);
        }
        Commands::Overview { symbols, per_minute } => {
            let credentials = Credentials::resolve(&config.credentials_path);
            let limiter: Arc<dyn RateLimiter> = match per_minute.and_then(NonZeroU32::new) {
                Some(rate) => Arc::new(QuotaLimiter::per_minute(rate)),
                None => Arc::new(ApiRateLimiter::default()),
            };
            let extractor = AlphaVantageExtractor::new(&credentials, config.alpha_vantage_dir())?
                .with_rate_limiter(limiter);

            for (symbol, result) in extractor.get_company_overviews(&parse_symbols(&symbols)).await {
                match result {
                    Ok(result) => report(&result.artifacts),
                    Err(e) => eprintln!("❌ {}: {}", symbol, e),
                }
            }
        }
        Commands::History { symbol, period, interval } => {
            let extractor = YahooFinanceExtractor::new(config.yahoo_finance_dir())?;
            let result = extractor
                .get_historical_data(&symbol.to_uppercase(), &period, &interval)
                .await?;
            preview(&result.data);
            report(&result.artifacts);
        }
        Commands::Info { symbol } => {
            let extractor = YahooFinanceExtractor::new(config.yahoo_finance_dir())?;
            let result = extractor.get_company_info(&symbol.to_uppercase()).await?;
            for key in ["longName", "sector", "industry", "marketCap", "currency"] {
                if let Some(value) = result.data.get(key) {
                    println!("{}: {}", key, value);
                }
            }
            report(&result.artifacts);
        }
        Commands::Financials { symbol } => {
            let extractor = YahooFinanceExtractor::new(config.yahoo_finance_dir())?;
            let result = extractor.get_financials(&symbol.to_uppercase()).await?;
            for kind in StatementKind::ALL {
                let statement = result.data.statement(kind);
                println!(
                    "{}: {} line items over {} periods",
                    kind.data_type(),
                    statement.line_items.len(),
                    statement.periods.len()
                );
            }
            report(&result.artifacts);
        }
        Commands::Multi { symbols, start, end } => {
            let symbols = parse_symbols(&symbols);
            if symbols.is_empty() {
                bail!("at least one symbol is required");
            }
            let extractor = YahooFinanceExtractor::new(config.yahoo_finance_dir())?;
            let result = extractor.get_multiple_tickers_data(&symbols, start, end).await?;
            preview(&result.data);
            report(&result.artifacts);
        }
        Commands::Db { action, env, db_config } => {
            let environment = env.unwrap_or_else(|| config.environment.clone());
            let db_config = db_config.unwrap_or_else(|| config.db_config_path.clone());
            info!("🗄️  Using database environment {}", environment);

            let connector = DatabaseConnector::new(&db_config, &environment)?;
            let mut maintenance = DatabaseMaintenance::new(connector, &config.sql_dir);
            let succeeded = match action {
                DbAction::Indexes => maintenance.create_indexes().await,
                DbAction::Cleanup => maintenance.cleanup_database().await,
            };
            maintenance.close().await;

            if !succeeded {
                bail!("database maintenance failed, see the log for details");
            }
        }
    }

    Ok(())
}
