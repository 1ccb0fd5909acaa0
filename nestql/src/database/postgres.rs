use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use sqlparser::dialect::{Dialect, PostgreSqlDialect};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::types::{BigDecimal, JsonValue, Uuid};
use sqlx::{Column, Either, Executor, Row, Statement, TypeInfo, ValueRef};
use tracing::{debug, info};

use super::Database;
use crate::builder::BoundStatement;
use crate::column::TableName;
use crate::eav::{EavBatch, EavSink, EavStatements};
use crate::session::{ConnectionProvider, PrimaryKeyLookup, RawColumn, RawResult, StatementExecutor};
use crate::{NestError, NestResult};

#[derive(Clone, Debug)]
pub struct Postgres;

static POSTGRES_DIALECT: PostgreSqlDialect = PostgreSqlDialect {};

impl Database for Postgres {
    fn dialect() -> &'static dyn Dialect {
        &POSTGRES_DIALECT
    }

    /// Binds are sent as text and cast to the given type. Untyped binds
    /// stay bare until [PgSession] has asked the server what they are.
    fn bind_marker(slot: usize, type_name: Option<&str>) -> String {
        match type_name.filter(|name| is_castable(name)) {
            Some(type_name) => format!("CAST(${slot} AS {type_name})"),
            None => format!("${slot}"),
        }
    }
}

fn is_castable(type_name: &str) -> bool {
    !type_name.is_empty()
        && type_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ' ' | '[' | ']'))
        && type_name.starts_with(|c: char| c.is_ascii_alphabetic())
}

impl From<sqlx::Error> for NestError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                NestError::Connection(error.to_string())
            }
            other => NestError::SqlExecution(other.to_string()),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct PoolConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default)]
    pub min_connections: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: Option<u64>,
    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: Option<u64>,
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> Option<u64> {
    Some(600)
}

fn default_max_lifetime_secs() -> Option<u64> {
    Some(1800)
}

impl PoolConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: default_max_connections(),
            min_connections: 0,
            acquire_timeout_secs: default_acquire_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            max_lifetime_secs: default_max_lifetime_secs(),
        }
    }
}

fn pool_options(config: &PoolConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(config.idle_timeout_secs.map(Duration::from_secs))
        .max_lifetime(config.max_lifetime_secs.map(Duration::from_secs))
}

#[derive(Clone, Debug)]
pub struct PgProvider {
    pool: PgPool,
}

impl PgProvider {
    pub async fn connect(config: &PoolConfig) -> NestResult<Self> {
        let pool = pool_options(config)
            .connect(&config.url)
            .await
            .map_err(|e| NestError::Connection(e.to_string()))?;

        info!(max_connections = config.max_connections, "connected to postgres");
        Ok(Self { pool })
    }

    /// A pool that opens its first connection on first acquire.
    pub fn connect_lazy(config: &PoolConfig) -> NestResult<Self> {
        let pool = pool_options(config)
            .connect_lazy(&config.url)
            .map_err(|e| NestError::Connection(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ConnectionProvider<Postgres> for PgProvider {
    type Connection = PgSession;

    async fn acquire(&self) -> NestResult<PgSession> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| NestError::Connection(e.to_string()))?;
        debug!("acquired connection");
        Ok(PgSession { conn })
    }

    async fn release(&self, session: PgSession) {
        drop(session.conn);
        debug!("released connection");
    }
}

/// One pooled connection, held for the duration of a resolution.
pub struct PgSession {
    conn: PoolConnection<sqlx::Postgres>,
}

#[async_trait]
impl StatementExecutor<Postgres> for PgSession {
    async fn run(&mut self, statement: &BoundStatement<Postgres>) -> NestResult<RawResult> {
        let typed;
        let statement = if statement.untyped_slots().next().is_some() {
            typed = self.infer_types(statement).await;
            &typed
        } else {
            statement
        };

        let mut query = sqlx::query(statement.sql());
        for param in statement.params() {
            query = query.bind(param.as_str());
        }
        let rows = query.fetch_all(&mut *self.conn).await?;

        let columns = match rows.first() {
            Some(row) => row.columns().iter().map(raw_column).collect(),
            None => vec![],
        };
        let rows = rows
            .iter()
            .map(decode_row)
            .collect::<NestResult<Vec<_>>>()?;

        Ok(RawResult { columns, rows })
    }
}

impl PgSession {
    /// Type untyped binds the way the server would type an untyped literal
    /// in the same place. Binds it cannot type are read as text.
    async fn infer_types(&mut self, statement: &BoundStatement<Postgres>) -> BoundStatement<Postgres> {
        let inferred: Vec<String> = match (&mut *self.conn).prepare(statement.sql()).await {
            Ok(prepared) => match prepared.parameters() {
                Some(Either::Left(types)) => types.iter().map(|ty| ty.name().to_owned()).collect(),
                _ => vec![],
            },
            Err(error) => {
                debug!(%error, "parameter types not inferred");
                vec![]
            }
        };
        debug!(?inferred, "inferred parameter types");
        statement.with_types(|slot| Some(untyped_type(&inferred, slot)))
    }
}

fn untyped_type(inferred: &[String], slot: usize) -> String {
    match inferred.get(slot - 1) {
        Some(name) if is_castable(name) && name != "UNKNOWN" => name.clone(),
        _ => "TEXT".to_string(),
    }
}

const PRIMARY_KEY_SQL: &str = "\
SELECT kcu.column_name::text \
FROM information_schema.table_constraints tc \
JOIN information_schema.key_column_usage kcu \
  ON kcu.constraint_catalog = tc.constraint_catalog \
 AND kcu.constraint_schema = tc.constraint_schema \
 AND kcu.constraint_name = tc.constraint_name \
 AND kcu.table_name = tc.table_name \
WHERE tc.constraint_type = 'PRIMARY KEY' \
  AND tc.table_name::text = $1 \
  AND tc.table_schema::text = COALESCE($2::text, current_schema()::text) \
  AND tc.table_catalog::text = COALESCE($3::text, current_database()::text) \
ORDER BY kcu.ordinal_position";

#[async_trait]
impl PrimaryKeyLookup for PgSession {
    async fn primary_keys(&mut self, table: &TableName) -> NestResult<BTreeSet<String>> {
        let keys: Vec<String> = sqlx::query_scalar(PRIMARY_KEY_SQL)
            .bind(table.table.as_str())
            .bind(table.schema.as_deref())
            .bind(table.catalog.as_deref())
            .fetch_all(&mut *self.conn)
            .await?;
        debug!(%table, ?keys, "primary keys");
        Ok(keys.into_iter().collect())
    }
}

fn raw_column(column: &sqlx::postgres::PgColumn) -> RawColumn {
    let type_name = column.type_info().name();
    RawColumn::new(column.name(), type_name)
        .with_type_id(sql_type_id(type_name))
        .with_class_name(native_class(type_name))
}

fn decode_row(row: &PgRow) -> NestResult<Vec<Option<String>>> {
    row.columns()
        .iter()
        .map(|column| decode_text(row, column.ordinal(), column.type_info().name()))
        .collect()
}

/// The value of one cell as text, `None` for NULL. Types without a known
/// decoding are read as text, and as empty text when even that fails.
fn decode_text(row: &PgRow, index: usize, type_name: &str) -> NestResult<Option<String>> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(None);
    }

    let text = match type_name {
        "BOOL" => row.try_get::<bool, _>(index)?.to_string(),
        "INT2" => row.try_get::<i16, _>(index)?.to_string(),
        "INT4" => row.try_get::<i32, _>(index)?.to_string(),
        "INT8" => row.try_get::<i64, _>(index)?.to_string(),
        "FLOAT4" => row.try_get::<f32, _>(index)?.to_string(),
        "FLOAT8" => row.try_get::<f64, _>(index)?.to_string(),
        "NUMERIC" => row.try_get::<BigDecimal, _>(index)?.to_string(),
        "DATE" => row.try_get::<NaiveDate, _>(index)?.to_string(),
        "TIME" => row.try_get::<NaiveTime, _>(index)?.to_string(),
        "TIMESTAMP" => row.try_get::<NaiveDateTime, _>(index)?.to_string(),
        "TIMESTAMPTZ" => row.try_get::<DateTime<Utc>, _>(index)?.to_rfc3339(),
        "UUID" => row.try_get::<Uuid, _>(index)?.to_string(),
        "JSON" | "JSONB" => row.try_get::<JsonValue, _>(index)?.to_string(),
        "BYTEA" => {
            let bytes = row.try_get::<Vec<u8>, _>(index)?;
            let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
            format!("\\x{hex}")
        }
        _ => match row.try_get_unchecked::<String, _>(index) {
            Ok(text) => text,
            Err(error) => {
                debug!(type_name, %error, "undecodable value");
                String::new()
            }
        },
    };
    Ok(Some(text))
}

/// Type codes as used by JDBC's `java.sql.Types`, so that documents keep
/// the same `dataTypeId` whatever produced them.
pub fn sql_type_id(type_name: &str) -> i32 {
    match type_name {
        "BOOL" => 16,
        "INT2" => 5,
        "INT4" => 4,
        "INT8" => -5,
        "FLOAT4" => 7,
        "FLOAT8" => 8,
        "NUMERIC" => 2,
        "VARCHAR" | "TEXT" | "NAME" => 12,
        "BPCHAR" | "CHAR" => 1,
        "DATE" => 91,
        "TIME" => 92,
        "TIMESTAMP" => 93,
        "TIMESTAMPTZ" => 2014,
        "BYTEA" => -2,
        _ => 1111,
    }
}

/// The Rust type a value of `type_name` decodes to.
pub fn native_class(type_name: &str) -> &'static str {
    match type_name {
        "BOOL" => "bool",
        "INT2" => "i16",
        "INT4" => "i32",
        "INT8" => "i64",
        "FLOAT4" => "f32",
        "FLOAT8" => "f64",
        "NUMERIC" => "BigDecimal",
        "DATE" => "NaiveDate",
        "TIME" => "NaiveTime",
        "TIMESTAMP" => "NaiveDateTime",
        "TIMESTAMPTZ" => "DateTime<Utc>",
        "UUID" => "Uuid",
        "JSON" | "JSONB" => "JsonValue",
        "BYTEA" => "Vec<u8>",
        _ => "String",
    }
}

/// Stores EAV batches, one transaction per batch.
pub struct PgEavSink {
    pool: PgPool,
    statements: EavStatements,
}

impl PgEavSink {
    pub fn new(pool: PgPool, statements: EavStatements) -> Self {
        Self { pool, statements }
    }
}

#[async_trait]
impl EavSink for PgEavSink {
    async fn store(&mut self, batch: &EavBatch) -> NestResult<()> {
        let mut tx = self.pool.begin().await?;

        for row in &batch.values {
            sqlx::query(&self.statements.insert_value)
                .bind(row.entity_id.as_str())
                .bind(row.attribute.as_str())
                .bind(row.value.as_str())
                .execute(&mut *tx)
                .await?;
        }

        for row in &batch.metadata {
            sqlx::query(&self.statements.insert_metadata)
                .bind(row.entity_id.as_str())
                .bind(row.attribute.as_str())
                .bind(row.metadata_type)
                .bind(row.metadata_value.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        debug!(
            values = batch.values.len(),
            metadata = batch.metadata.len(),
            "committed eav batch"
        );
        Ok(())
    }
}
