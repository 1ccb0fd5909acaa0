use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::debug;

use crate::builder::BoundStatement;
use crate::column::TableName;
use crate::validate::{validate, Validated};
use crate::{Database, NestResult};

/// Column description as reported by the driver.
#[derive(Clone, Debug, PartialEq)]
pub struct RawColumn {
    pub name: String,
    pub label: String,
    pub type_id: i32,
    pub type_name: String,
    pub class_name: String,
    /// Table the column was read from, when the driver knows.
    pub origin: Option<TableName>,
}

impl RawColumn {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            type_id: 1111,
            type_name: type_name.into(),
            class_name: "String".to_string(),
            origin: None,
        }
    }

    pub fn with_type_id(mut self, type_id: i32) -> Self {
        self.type_id = type_id;
        self
    }

    pub fn with_class_name(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = class_name.into();
        self
    }

    pub fn with_origin(mut self, origin: TableName) -> Self {
        self.origin = Some(origin);
        self
    }
}

/// Rows as text, `None` for SQL NULL.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawResult {
    pub columns: Vec<RawColumn>,
    pub rows: Vec<Vec<Option<String>>>,
}

#[async_trait]
pub trait StatementExecutor<DB: Database>: Send {
    async fn run(&mut self, statement: &BoundStatement<DB>) -> NestResult<RawResult>;
}

#[async_trait]
pub trait PrimaryKeyLookup: Send {
    /// Primary-key column names of `table`. Empty when it has none.
    async fn primary_keys(&mut self, table: &TableName) -> NestResult<BTreeSet<String>>;
}

/// Hands out one connection per resolution.
#[async_trait]
pub trait ConnectionProvider<DB: Database>: Send + Sync {
    type Connection: StatementExecutor<DB> + PrimaryKeyLookup;

    async fn acquire(&self) -> NestResult<Self::Connection>;

    async fn release(&self, connection: Self::Connection);
}

/// Validate, then run. Nothing reaches the executor unless validation passed.
pub async fn validate_and_run<DB, E>(
    executor: &mut E,
    statement: &BoundStatement<DB>,
) -> NestResult<(Validated, RawResult)>
where
    DB: Database,
    E: StatementExecutor<DB> + ?Sized,
{
    let validated = validate(statement)?;
    debug!(sql = statement.sql(), params = ?statement.params(), "running statement");
    let result = executor.run(statement).await?;
    debug!(rows = result.rows.len(), columns = result.columns.len(), "statement done");
    Ok((validated, result))
}
