use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::builder::BoundStatement;
use crate::request::QueryNode;
use crate::session::{validate_and_run, ConnectionProvider, PrimaryKeyLookup, StatementExecutor};
use crate::template::RowValues;
use crate::tracker::{self, KeyCache};
use crate::tree::ResultTree;
use crate::validate::validate;
use crate::{Database, NestError, NestResult};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Upper bound for one whole resolution. `None` waits forever.
    pub timeout: Option<Duration>,
}

/// A child query that failed for one parent record. Its tree is left empty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BranchWarning {
    /// 1-based level of the failed node.
    pub level: usize,
    pub node: String,
    pub parent_ordinal: usize,
    pub message: String,
}

#[derive(Debug)]
pub struct Resolution {
    pub tree: ResultTree,
    pub warnings: Vec<BranchWarning>,
}

/// Resolves query chains against the connections of one provider.
pub struct Engine<DB: Database, P: ConnectionProvider<DB>> {
    provider: Arc<P>,
    options: ResolveOptions,
    db: std::marker::PhantomData<DB>,
}

impl<DB: Database, P: ConnectionProvider<DB>> Clone for Engine<DB, P> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            options: self.options,
            db: std::marker::PhantomData,
        }
    }
}

impl<DB: Database, P: ConnectionProvider<DB>> Engine<DB, P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider: Arc::new(provider),
            options: ResolveOptions::default(),
            db: std::marker::PhantomData,
        }
    }

    pub fn with_options(mut self, options: ResolveOptions) -> Self {
        self.options = options;
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn options(&self) -> ResolveOptions {
        self.options
    }

    /// Run `root` once, then every child once per record of its parent,
    /// level by level.
    ///
    /// All templates are validated before a connection is taken. The
    /// connection is released exactly once, whatever the outcome.
    pub async fn resolve(&self, root: &QueryNode) -> NestResult<Resolution> {
        for node in root.walk() {
            validate(&node.template().preview::<DB>())?;
        }

        let deadline = self
            .options
            .timeout
            .map(|timeout| (Instant::now() + timeout, timeout));

        let mut connection = self.provider.acquire().await?;
        let outcome = Resolver::<'_, DB, P::Connection> {
            connection: &mut connection,
            deadline,
            cache: KeyCache::new(),
            warnings: vec![],
            db: std::marker::PhantomData,
        }
        .run(root)
        .await;
        self.provider.release(connection).await;

        outcome
    }
}

struct Resolver<'c, DB: Database, C> {
    connection: &'c mut C,
    deadline: Option<(Instant, Duration)>,
    cache: KeyCache,
    warnings: Vec<BranchWarning>,
    db: std::marker::PhantomData<DB>,
}

impl<'c, DB, C> Resolver<'c, DB, C>
where
    DB: Database,
    C: StatementExecutor<DB> + PrimaryKeyLookup,
{
    async fn run(mut self, root: &QueryNode) -> NestResult<Resolution> {
        self.check_deadline()?;
        let mut tree = match root.template().bind::<DB>(&RowValues::new()) {
            Ok(statement) => self.execute(root, &statement).await,
            Err(error) => Err(error),
        }
        .map_err(|error| fatal(root, error))?;

        let mut pending: VecDeque<(&QueryNode, Vec<String>, usize)> = root
            .children()
            .iter()
            .map(|child| (child, vec![], 2))
            .collect();

        while let Some((node, path, level)) = pending.pop_front() {
            self.check_deadline()?;

            let mut parents = vec![];
            tree.parents_along(&path, &mut parents);
            debug!(node = node.name(), level, parents = parents.len(), "fanning out");

            for (columns, record) in parents {
                let row = record.values(columns);
                let child = self.resolve_branch(node, level, record.ordinal, &row).await?;
                record.attach(child);
            }

            let mut child_path = path;
            child_path.push(node.name().to_owned());
            pending.extend(
                node.children()
                    .iter()
                    .map(|child| (child, child_path.clone(), level + 1)),
            );
        }

        Ok(Resolution {
            tree,
            warnings: self.warnings,
        })
    }

    /// A failing branch yields an empty tree and a warning. Only a missed
    /// deadline or a statement that fails validation ends the resolution.
    async fn resolve_branch(
        &mut self,
        node: &QueryNode,
        level: usize,
        parent_ordinal: usize,
        row: &RowValues,
    ) -> NestResult<ResultTree> {
        let outcome = match node.template().bind::<DB>(row) {
            Ok(statement) => self.execute(node, &statement).await,
            Err(error) => Err(error),
        };

        match outcome {
            Ok(tree) => Ok(tree),
            Err(error @ (NestError::DeadlineExceeded(_) | NestError::UnsupportedStatement(_))) => {
                Err(error)
            }
            Err(error) => {
                warn!(node = node.name(), level, parent_ordinal, %error, "branch failed");
                self.warnings.push(BranchWarning {
                    level,
                    node: node.name().to_owned(),
                    parent_ordinal,
                    message: error.to_string(),
                });
                Ok(ResultTree::empty(node.name()))
            }
        }
    }

    /// Run one statement and track its columns, all within the deadline.
    async fn execute(
        &mut self,
        node: &QueryNode,
        statement: &BoundStatement<DB>,
    ) -> NestResult<ResultTree> {
        let deadline = self.deadline;
        let work = self.execute_unbounded(node, statement);
        match deadline {
            Some((deadline, timeout)) => tokio::time::timeout_at(deadline, work)
                .await
                .map_err(|_| NestError::DeadlineExceeded(timeout))?,
            None => work.await,
        }
    }

    async fn execute_unbounded(
        &mut self,
        node: &QueryNode,
        statement: &BoundStatement<DB>,
    ) -> NestResult<ResultTree> {
        let (validated, raw) = validate_and_run(&mut *self.connection, statement).await?;
        let columns = tracker::track(
            &raw.columns,
            validated.tables(),
            &mut *self.connection,
            &mut self.cache,
        )
        .await;

        Ok(ResultTree::from_rows(node.name(), columns, &raw.rows))
    }

    fn check_deadline(&self) -> NestResult<()> {
        match self.deadline {
            Some((deadline, timeout)) if Instant::now() >= deadline => {
                Err(NestError::DeadlineExceeded(timeout))
            }
            _ => Ok(()),
        }
    }
}

/// Failures of the first level end the resolution, wrapped with the node name.
fn fatal(node: &QueryNode, error: NestError) -> NestError {
    match error {
        NestError::DeadlineExceeded(_) | NestError::UnsupportedStatement(_) => error,
        other => NestError::QueryExecution {
            node: node.name().to_owned(),
            source: Box::new(other),
        },
    }
}
