use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, warn};

/// Keys shipped in sample credentials files
pub const PLACEHOLDER_API_KEYS: &[&str] = &["YOUR_ALPHA_VANTAGE_API_KEY", "VOTRE_CLE_ALPHA_VANTAGE"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("configuration section `{0}` is missing")]
    MissingSection(String),
}

fn read_yaml(path: &Path) -> Result<Value, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_yaml::from_str(&content)?)
}

/// API credentials loaded from `config/credentials.yml`
#[derive(Clone, Default)]
pub struct Credentials {
    pub alpha_vantage_api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CredentialsFile {
    api: ApiSection,
}

#[derive(Debug, Deserialize)]
struct ApiSection {
    alpha_vantage: AlphaVantageSection,
}

#[derive(Debug, Deserialize)]
struct AlphaVantageSection {
    api_key: Option<String>,
}

impl Credentials {
    /// Parse the credentials file. Fails on missing file or missing `api.alpha_vantage`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let value = read_yaml(path.as_ref())?;
        let file: CredentialsFile = serde_yaml::from_value(value)?;
        Ok(Self {
            alpha_vantage_api_key: file.api.alpha_vantage.api_key,
        })
    }

    /// Resolve credentials the lenient way: `ALPHA_VANTAGE_API_KEY` wins, then the
    /// file. A broken file is logged and treated as "no key".
    pub fn resolve(path: impl AsRef<Path>) -> Self {
        if let Ok(key) = std::env::var("ALPHA_VANTAGE_API_KEY") {
            if !key.trim().is_empty() {
                return Self {
                    alpha_vantage_api_key: Some(key),
                };
            }
        }

        match Self::load(path.as_ref()) {
            Ok(credentials) => credentials,
            Err(e) => {
                error!("Failed to load credentials from {}: {}", path.as_ref().display(), e);
                Self::default()
            }
        }
    }

    /// The Alpha Vantage key if it is set to something other than a placeholder.
    pub fn usable_alpha_vantage_key(&self) -> Option<&str> {
        self.alpha_vantage_api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty() && !PLACEHOLDER_API_KEYS.contains(key))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field(
                "alpha_vantage_api_key",
                &self.alpha_vantage_api_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// PostgreSQL connection settings: `database.postgres` merged with `environments.<env>`
#[derive(Clone, Deserialize, PartialEq)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl DatabaseSettings {
    /// Load and merge the static block with the environment overlay.
    /// The overlay wins on conflicting keys.
    pub fn load(path: impl AsRef<Path>, environment: &str) -> Result<Self, ConfigError> {
        let root = read_yaml(path.as_ref())?;

        let base = root
            .get("database")
            .and_then(|db| db.get("postgres"))
            .and_then(Value::as_mapping)
            .ok_or_else(|| ConfigError::MissingSection("database.postgres".to_string()))?;

        let overlay = root
            .get("environments")
            .and_then(|envs| envs.get(environment))
            .and_then(Value::as_mapping)
            .ok_or_else(|| ConfigError::MissingSection(format!("environments.{}", environment)))?;

        let mut merged: Mapping = base.clone();
        for (key, value) in overlay {
            merged.insert(key.clone(), value.clone());
        }

        Ok(serde_yaml::from_value(Value::Mapping(merged))?)
    }
}

impl fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Process-level settings for the command line tool
#[derive(Debug, Clone)]
pub struct Config {
    pub credentials_path: PathBuf,
    pub db_config_path: PathBuf,
    pub environment: String,
    pub data_dir: PathBuf,
    pub sql_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok(); // Load .env file if it exists

        let var = |name: &str, default: &str| {
            std::env::var(name).unwrap_or_else(|_| default.to_string())
        };

        let environment = var("STOCK_EXTRACT_ENV", "development");
        if environment.trim().is_empty() {
            warn!("STOCK_EXTRACT_ENV is empty, falling back to development");
        }

        Config {
            credentials_path: PathBuf::from(var("STOCK_EXTRACT_CREDENTIALS", "config/credentials.yml")),
            db_config_path: PathBuf::from(var("STOCK_EXTRACT_DB_CONFIG", "config/db_config.yml")),
            environment: if environment.trim().is_empty() {
                "development".to_string()
            } else {
                environment
            },
            data_dir: PathBuf::from(var("STOCK_EXTRACT_DATA_DIR", "data")),
            sql_dir: PathBuf::from(var("STOCK_EXTRACT_SQL_DIR", "sql")),
        }
    }

    pub fn alpha_vantage_dir(&self) -> PathBuf {
        self.data_dir.join("raw").join("alpha_vantage")
    }

    pub fn yahoo_finance_dir(&self) -> PathBuf {
        self.data_dir.join("raw").join("yahoo_finance")
    }
}
