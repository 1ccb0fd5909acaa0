//!
//! Resolve a chain of SQL templates into one document tree.
//!
//! ```text
//! 1. chain          2. resolved tree
//!
//! agents            agents
//!  \                 |-A001 --- orders --- 200100
//!   orders           |                 \-- 200107
//!    \               \-A002 --- orders --- 200101
//!     customer                          \- customer ...
//! ```
//!
//! Every level runs once per record of the level above it. Values of the
//! parent record are bound into the child template through `[$column]`
//! placeholders. The resolved tree is rendered as JSON or XML below a
//! `contentData` wrapper, each record keyed by its primary key value.
//!

use tracing::info;

pub mod builder;
pub mod column;
pub mod database;
pub mod eav;
pub mod engine;
pub mod render;
pub mod request;
pub mod session;
pub mod template;
pub mod tracker;
pub mod tree;
pub mod validate;

pub use database::Database;
pub use engine::{BranchWarning, Engine, Resolution, ResolveOptions};
pub use render::{Format, OutputMode};
pub use request::{QueryNode, QueryRequest};

#[derive(thiserror::Error, Debug, Clone)]
pub enum NestError {
    #[error("Malformed query request: {0}")]
    MalformedSpec(String),

    #[error("Unsupported statement: {0}")]
    UnsupportedStatement(String),

    #[error("SQL execution error: {0}")]
    SqlExecution(String),

    #[error("Unresolved placeholder [${0}]")]
    UnresolvedPlaceholder(String),

    #[error("Query '{node}' failed: {source}")]
    QueryExecution {
        node: String,
        source: Box<NestError>,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Deadline of {0:?} exceeded")]
    DeadlineExceeded(std::time::Duration),

    #[error("Malformed document: {0}")]
    MalformedDocument(String),
}

impl NestError {
    /// Whether the caller (rather than the database or the service) is at fault.
    pub fn is_client_error(&self) -> bool {
        match self {
            NestError::MalformedSpec(_)
            | NestError::UnsupportedStatement(_)
            | NestError::UnresolvedPlaceholder(_)
            | NestError::Serialization(_)
            | NestError::MalformedDocument(_) => true,
            NestError::QueryExecution { source, .. } => source.is_client_error(),
            NestError::SqlExecution(_)
            | NestError::Connection(_)
            | NestError::DeadlineExceeded(_) => false,
        }
    }
}

pub type NestResult<T> = Result<T, NestError>;

/// A rendered document plus the branches that failed while producing it.
#[derive(Debug)]
pub struct Processed {
    pub document: String,
    pub warnings: Vec<BranchWarning>,
}

/// Parse a query request, resolve it against the engine's database and
/// render the result.
///
/// Console and HTTP entry points both go through here.
pub async fn process<DB, P>(
    engine: &Engine<DB, P>,
    request: &serde_json::Value,
    mode: OutputMode,
) -> NestResult<Processed>
where
    DB: Database,
    P: session::ConnectionProvider<DB>,
{
    let request = QueryRequest::parse(request)?;
    let resolution = engine.resolve(request.root()).await?;
    let document = render::serialize(&resolution.tree, request.include_metadata(), mode)?;

    info!(
        root = request.root().name(),
        records = resolution.tree.records.len(),
        warnings = resolution.warnings.len(),
        format = ?mode.format,
        "processed query request"
    );

    Ok(Processed {
        document,
        warnings: resolution.warnings,
    })
}
