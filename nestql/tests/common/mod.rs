//! In-memory database for engine tests. Statements are matched on their
//! rendered SQL.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use nestql::builder::BoundStatement;
use nestql::column::TableName;
use nestql::database::Generic;
use nestql::session::{ConnectionProvider, PrimaryKeyLookup, RawColumn, RawResult, StatementExecutor};
use nestql::{NestError, NestResult};

type Handler = Box<dyn Fn(&[String]) -> NestResult<RawResult> + Send + Sync>;

#[derive(Default)]
pub struct Catalog {
    statements: Vec<(String, Handler)>,
    keys: BTreeMap<String, BTreeSet<String>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `sql` (as rendered, binds being `$n`) through `handler`.
    pub fn respond(
        mut self,
        sql: &str,
        handler: impl Fn(&[String]) -> NestResult<RawResult> + Send + Sync + 'static,
    ) -> Self {
        self.statements.push((sql.to_string(), Box::new(handler)));
        self
    }

    pub fn table(mut self, table: &str, keys: &[&str]) -> Self {
        self.keys.insert(
            table.to_string(),
            keys.iter().map(|key| key.to_string()).collect(),
        );
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Executed {
    pub sql: String,
    pub params: Vec<String>,
}

#[derive(Clone)]
pub struct FakeProvider {
    catalog: Arc<Catalog>,
    executed: Arc<Mutex<Vec<Executed>>>,
    acquired: Arc<Mutex<usize>>,
    released: Arc<Mutex<usize>>,
    delay: Option<Duration>,
    key_delay: Option<Duration>,
}

impl FakeProvider {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog: Arc::new(catalog),
            executed: Default::default(),
            acquired: Default::default(),
            released: Default::default(),
            delay: None,
            key_delay: None,
        }
    }

    /// Every statement sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every primary-key lookup sleeps this long before answering.
    pub fn with_key_delay(mut self, delay: Duration) -> Self {
        self.key_delay = Some(delay);
        self
    }

    pub fn executed(&self) -> Vec<Executed> {
        self.executed.lock().clone()
    }

    pub fn acquired(&self) -> usize {
        *self.acquired.lock()
    }

    pub fn released(&self) -> usize {
        *self.released.lock()
    }
}

pub struct FakeConnection {
    catalog: Arc<Catalog>,
    executed: Arc<Mutex<Vec<Executed>>>,
    delay: Option<Duration>,
    key_delay: Option<Duration>,
}

#[async_trait]
impl StatementExecutor<Generic> for FakeConnection {
    async fn run(&mut self, statement: &BoundStatement<Generic>) -> NestResult<RawResult> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.executed.lock().push(Executed {
            sql: statement.sql().to_string(),
            params: statement.params().to_vec(),
        });

        let (_, handler) = self
            .catalog
            .statements
            .iter()
            .find(|(sql, _)| sql == statement.sql())
            .ok_or_else(|| NestError::SqlExecution(format!("relation missing: {statement}")))?;
        handler(statement.params())
    }
}

#[async_trait]
impl PrimaryKeyLookup for FakeConnection {
    async fn primary_keys(&mut self, table: &TableName) -> NestResult<BTreeSet<String>> {
        if let Some(delay) = self.key_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.catalog.keys.get(&table.table).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl ConnectionProvider<Generic> for FakeProvider {
    type Connection = FakeConnection;

    async fn acquire(&self) -> NestResult<FakeConnection> {
        *self.acquired.lock() += 1;
        Ok(FakeConnection {
            catalog: self.catalog.clone(),
            executed: self.executed.clone(),
            delay: self.delay,
            key_delay: self.key_delay,
        })
    }

    async fn release(&self, _: FakeConnection) {
        *self.released.lock() += 1;
    }
}

/// A text result with untyped columns.
pub fn rows(columns: &[&str], rows: &[&[&str]]) -> RawResult {
    RawResult {
        columns: columns
            .iter()
            .map(|name| RawColumn::new(*name, "TEXT").with_type_id(12))
            .collect(),
        rows: rows
            .iter()
            .map(|row| row.iter().map(|value| Some(value.to_string())).collect())
            .collect(),
    }
}

pub fn failure(message: &str) -> NestResult<RawResult> {
    Err(NestError::SqlExecution(message.to_string()))
}

pub const AGENTS: &str = "select agent_code, agent_name from agents";
pub const ORDERS: &str = "select ord_num, agent_code from orders where agent_code='[$agent_code]'";
pub const ORDERS_SQL: &str = "select ord_num, agent_code from orders where agent_code=$1";

/// Two agents. A001 has two orders, A002 one.
pub fn agents_and_orders() -> Catalog {
    Catalog::new()
        .table("agents", &["agent_code"])
        .table("orders", &["ord_num"])
        .respond(AGENTS, |_| {
            Ok(rows(
                &["agent_code", "agent_name"],
                &[&["A001", "Alex"], &["A002", "Ramasundar"]],
            ))
        })
        .respond(ORDERS_SQL, |params| match params[0].as_str() {
            "A001" => Ok(rows(
                &["ord_num", "agent_code"],
                &[&["200100", "A001"], &["200107", "A001"]],
            )),
            "A002" => Ok(rows(&["ord_num", "agent_code"], &[&["200101", "A002"]])),
            _ => Ok(RawResult::default()),
        })
}
