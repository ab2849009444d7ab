use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgColumn, PgConnectOptions, PgConnection, PgRow, Postgres};
use sqlx::query::Query;
use sqlx::types::Uuid;
use sqlx::{Column, Connection, Executor, Row, TypeInfo};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::models::{ConfigError, DatabaseSettings};

pub mod maintenance;
pub use maintenance::DatabaseMaintenance;

/// A result row keyed by column name
pub type Record = Map<String, Value>;

/// Positional query parameter (`$1`, `$2`, ...)
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("database is not connected")]
    NotConnected,

    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    #[error("failed to read SQL script {path}: {source}")]
    Script {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One live database session. Statements run inside an implicitly begun
/// transaction that stays open until `commit` or `rollback`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SqlBackend: Send {
    async fn fetch_all(&mut self, query: &str, params: &[SqlParam]) -> Result<Vec<Record>, sqlx::Error>;

    /// Returns the number of affected rows
    async fn execute(&mut self, query: &str, params: &[SqlParam]) -> Result<u64, sqlx::Error>;

    /// Run a multi-statement script verbatim, without parameters
    async fn execute_script(&mut self, script: &str) -> Result<(), sqlx::Error>;

    async fn commit(&mut self) -> Result<(), sqlx::Error>;

    async fn rollback(&mut self) -> Result<(), sqlx::Error>;

    async fn close(&mut self) -> Result<(), sqlx::Error>;
}

/// PostgreSQL session over a single sqlx connection
pub struct PgBackend {
    conn: Option<PgConnection>,
    in_transaction: bool,
}

impl PgBackend {
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self, sqlx::Error> {
        let options = PgConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .database(&settings.database)
            .username(&settings.username)
            .password(&settings.password);

        let conn = PgConnection::connect_with(&options).await?;
        Ok(Self {
            conn: Some(conn),
            in_transaction: false,
        })
    }

    fn conn(&mut self) -> Result<&mut PgConnection, sqlx::Error> {
        self.conn.as_mut().ok_or(sqlx::Error::PoolClosed)
    }

    async fn begin_if_needed(&mut self) -> Result<(), sqlx::Error> {
        if !self.in_transaction {
            self.conn()?.execute(sqlx::raw_sql("BEGIN")).await?;
            self.in_transaction = true;
        }
        Ok(())
    }

    async fn finish(&mut self, statement: &'static str) -> Result<(), sqlx::Error> {
        if self.in_transaction {
            // The transaction is over whether or not the statement succeeds
            self.in_transaction = false;
            self.conn()?.execute(sqlx::raw_sql(statement)).await?;
        }
        Ok(())
    }
}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [SqlParam],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            SqlParam::Null => query.bind(None::<String>),
            SqlParam::Bool(value) => query.bind(*value),
            SqlParam::Int(value) => query.bind(*value),
            SqlParam::Float(value) => query.bind(*value),
            SqlParam::Text(value) => query.bind(value.as_str()),
            SqlParam::Date(value) => query.bind(*value),
            SqlParam::Timestamp(value) => query.bind(*value),
        };
    }
    query
}

/// How a Postgres column type is rendered into a JSON value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Uuid,
    Json,
    Text,
}

impl ColumnKind {
    fn from_type_name(type_name: &str) -> Option<Self> {
        let kind = match type_name.to_ascii_uppercase().as_str() {
            "BOOL" => Self::Bool,
            "INT2" => Self::Int2,
            "INT4" => Self::Int4,
            "INT8" => Self::Int8,
            "FLOAT4" => Self::Float4,
            "FLOAT8" => Self::Float8,
            "NUMERIC" => Self::Numeric,
            "DATE" => Self::Date,
            "TIME" => Self::Time,
            "TIMESTAMP" => Self::Timestamp,
            "TIMESTAMPTZ" => Self::TimestampTz,
            "UUID" => Self::Uuid,
            "JSON" | "JSONB" => Self::Json,
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CITEXT" | "UNKNOWN" => Self::Text,
            _ => return None,
        };
        Some(kind)
    }
}

/// Integral NUMERICs (scale 0) become JSON integers, the rest floats.
/// Values that fit neither are kept as their decimal string.
fn decimal_to_json(value: Decimal) -> Value {
    if value.scale() == 0 {
        if let Some(int) = value.to_i64() {
            return Value::from(int);
        }
    }
    value
        .to_f64()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::from(value.to_string()))
}

fn decode_column(row: &PgRow, column: &PgColumn) -> Result<Value, sqlx::Error> {
    let idx = column.ordinal();
    let type_name = column.type_info().name();
    let kind = ColumnKind::from_type_name(type_name).ok_or_else(|| sqlx::Error::ColumnDecode {
        index: column.name().to_string(),
        source: format!("unsupported column type {}", type_name).into(),
    })?;

    let value = match kind {
        ColumnKind::Bool => row.try_get::<Option<bool>, _>(idx)?.map(Value::from),
        ColumnKind::Int2 => row.try_get::<Option<i16>, _>(idx)?.map(Value::from),
        ColumnKind::Int4 => row.try_get::<Option<i32>, _>(idx)?.map(Value::from),
        ColumnKind::Int8 => row.try_get::<Option<i64>, _>(idx)?.map(Value::from),
        ColumnKind::Float4 => row.try_get::<Option<f32>, _>(idx)?.map(Value::from),
        ColumnKind::Float8 => row.try_get::<Option<f64>, _>(idx)?.map(Value::from),
        ColumnKind::Numeric => row.try_get::<Option<Decimal>, _>(idx)?.map(decimal_to_json),
        ColumnKind::Date => row
            .try_get::<Option<NaiveDate>, _>(idx)?
            .map(|d| Value::from(d.to_string())),
        ColumnKind::Time => row
            .try_get::<Option<NaiveTime>, _>(idx)?
            .map(|t| Value::from(t.to_string())),
        ColumnKind::Timestamp => row
            .try_get::<Option<NaiveDateTime>, _>(idx)?
            .map(|ts| Value::from(ts.to_string())),
        ColumnKind::TimestampTz => row
            .try_get::<Option<DateTime<Utc>>, _>(idx)?
            .map(|ts| Value::from(ts.to_rfc3339())),
        ColumnKind::Uuid => row
            .try_get::<Option<Uuid>, _>(idx)?
            .map(|id| Value::from(id.to_string())),
        ColumnKind::Json => row.try_get::<Option<Value>, _>(idx)?,
        ColumnKind::Text => row.try_get::<Option<String>, _>(idx)?.map(Value::from),
    };

    Ok(value.unwrap_or(Value::Null))
}

fn row_to_record(row: &PgRow) -> Result<Record, sqlx::Error> {
    row.columns()
        .iter()
        .map(|column| Ok((column.name().to_string(), decode_column(row, column)?)))
        .collect()
}

#[async_trait]
impl SqlBackend for PgBackend {
    async fn fetch_all(&mut self, query: &str, params: &[SqlParam]) -> Result<Vec<Record>, sqlx::Error> {
        self.begin_if_needed().await?;
        let rows = self
            .conn()?
            .fetch_all(bind_params(sqlx::query(query), params))
            .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn execute(&mut self, query: &str, params: &[SqlParam]) -> Result<u64, sqlx::Error> {
        self.begin_if_needed().await?;
        let result = self
            .conn()?
            .execute(bind_params(sqlx::query(query), params))
            .await?;
        Ok(result.rows_affected())
    }

    async fn execute_script(&mut self, script: &str) -> Result<(), sqlx::Error> {
        self.begin_if_needed().await?;
        self.conn()?.execute(sqlx::raw_sql(script)).await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), sqlx::Error> {
        self.finish("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), sqlx::Error> {
        self.finish("ROLLBACK").await
    }

    async fn close(&mut self) -> Result<(), sqlx::Error> {
        self.in_transaction = false;
        match self.conn.take() {
            Some(conn) => conn.close().await,
            None => Ok(()),
        }
    }
}

/// PostgreSQL connector configured from `config/db_config.yml`
pub struct DatabaseConnector {
    settings: DatabaseSettings,
    backend: Option<Box<dyn SqlBackend>>,
}

impl std::fmt::Debug for DatabaseConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConnector")
            .field("connected", &self.backend.is_some())
            .finish_non_exhaustive()
    }
}

impl DatabaseConnector {
    /// Load settings for `environment`. Fails immediately on a missing file,
    /// malformed YAML or a missing section.
    pub fn new(config_path: impl AsRef<Path>, environment: &str) -> Result<Self, DbError> {
        let settings = DatabaseSettings::load(config_path.as_ref(), environment).inspect_err(|e| {
            error!(
                "Error loading database configuration from {}: {}",
                config_path.as_ref().display(),
                e
            )
        })?;
        Ok(Self::from_settings(settings))
    }

    pub fn from_settings(settings: DatabaseSettings) -> Self {
        Self {
            settings,
            backend: None,
        }
    }

    /// Wrap an already open session.
    pub fn with_backend(settings: DatabaseSettings, backend: Box<dyn SqlBackend>) -> Self {
        Self {
            settings,
            backend: Some(backend),
        }
    }

    pub fn settings(&self) -> &DatabaseSettings {
        &self.settings
    }

    pub fn is_connected(&self) -> bool {
        self.backend.is_some()
    }

    /// Open the connection. An existing connection is kept.
    pub async fn connect(&mut self) -> Result<(), DbError> {
        if self.is_connected() {
            debug!("Database connection already open");
            return Ok(());
        }

        let backend = PgBackend::connect(&self.settings).await.map_err(|e| {
            error!(
                "Error connecting to database {} at {}:{}: {}",
                self.settings.database, self.settings.host, self.settings.port, e
            );
            DbError::Connect(e)
        })?;

        info!("🗄️  Database connection established");
        self.backend = Some(Box::new(backend));
        Ok(())
    }

    fn backend(&mut self) -> Result<&mut Box<dyn SqlBackend>, DbError> {
        self.backend.as_mut().ok_or_else(|| {
            error!("Error executing query: database is not connected");
            DbError::NotConnected
        })
    }

    /// Run a parameterized statement. With `fetch` every row is returned and the
    /// transaction stays open; otherwise the statement is committed and `None`
    /// returned. Any failure rolls back and hands back the original error.
    pub async fn execute(
        &mut self,
        query: &str,
        params: &[SqlParam],
        fetch: bool,
    ) -> Result<Option<Vec<Record>>, DbError> {
        let backend = self.backend()?;

        let result = if fetch {
            backend.fetch_all(query, params).await.map(Some)
        } else {
            match backend.execute(query, params).await {
                Ok(affected) => {
                    debug!("{} rows affected", affected);
                    backend.commit().await.map(|_| None)
                }
                Err(e) => Err(e),
            }
        };

        match result {
            Ok(rows) => Ok(rows),
            Err(e) => {
                error!("Error executing query: {}", e);
                if let Err(rollback_error) = backend.rollback().await {
                    warn!("Rollback failed: {}", rollback_error);
                }
                Err(DbError::Query(e))
            }
        }
    }

    /// Execute a multi-statement script and commit it. Rolling back is left to the caller.
    pub async fn execute_script(&mut self, script: &str) -> Result<(), DbError> {
        let backend = self.backend()?;
        backend.execute_script(script).await.map_err(DbError::Query)?;
        backend.commit().await.map_err(DbError::Query)
    }

    pub async fn commit(&mut self) -> Result<(), DbError> {
        self.backend()?.commit().await.map_err(DbError::Query)
    }

    pub async fn rollback(&mut self) -> Result<(), DbError> {
        self.backend()?.rollback().await.map_err(DbError::Query)
    }

    /// Release the connection. Safe to call when never connected or already closed.
    pub async fn close(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            match backend.close().await {
                Ok(()) => info!("Database connection closed"),
                Err(e) => warn!("Error while closing database connection: {}", e),
            }
        }
    }
}
