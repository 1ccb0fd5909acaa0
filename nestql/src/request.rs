//! Query requests.
//!
//! A request names a chain of queries, each level being one `name` and
//! one `statement`. Two shapes are accepted:
//!
//! ```json
//! { "query": { "name": "agents", "statement": "...",
//!     "subquery": { "query": { "name": "orders", "statement": "..." } } },
//!   "includeMetadata": true }
//! ```
//!
//! and the flattened form where the first level sits at the top:
//!
//! ```json
//! { "name": "agents", "statement": "...",
//!   "subquery": { "name": "orders", "statement": "..." } }
//! ```

use serde_json::{Map, Value};

use crate::template::Template;
use crate::{NestError, NestResult};

const NAME: &str = "name";
const STATEMENT: &str = "statement";
const SUBQUERY: &str = "subquery";
const INCLUDE_METADATA: &str = "includeMetadata";

#[derive(Clone, Debug, PartialEq)]
pub struct QueryNode {
    name: String,
    template: Template,
    children: Vec<QueryNode>,
}

impl QueryNode {
    pub fn new(name: impl Into<String>, statement: &str) -> Self {
        Self {
            name: name.into(),
            template: Template::parse(statement),
            children: vec![],
        }
    }

    pub fn with_child(mut self, child: QueryNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn statement(&self) -> &str {
        self.template.source()
    }

    pub fn children(&self) -> &[QueryNode] {
        &self.children
    }

    /// Number of levels from this node down, this node included.
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(QueryNode::depth).max().unwrap_or(0)
    }

    /// This node and all descendants, breadth first.
    pub fn walk(&self) -> Vec<&QueryNode> {
        let mut nodes = vec![self];
        let mut i = 0;
        while i < nodes.len() {
            let node = nodes[i];
            nodes.extend(node.children.iter());
            i += 1;
        }
        nodes
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueryRequest {
    root: QueryNode,
    include_metadata: bool,
}

impl QueryRequest {
    pub fn new(root: QueryNode) -> Self {
        Self {
            root,
            include_metadata: false,
        }
    }

    pub fn with_metadata(mut self, include_metadata: bool) -> Self {
        self.include_metadata = include_metadata;
        self
    }

    pub fn root(&self) -> &QueryNode {
        &self.root
    }

    pub fn include_metadata(&self) -> bool {
        self.include_metadata
    }

    pub fn from_json(text: &str) -> NestResult<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| NestError::MalformedSpec(format!("request is not JSON: {e}")))?;
        Self::parse(&value)
    }

    pub fn parse(value: &Value) -> NestResult<Self> {
        let Value::Object(object) = value else {
            return Err(NestError::MalformedSpec(
                "request must be a JSON object".to_string(),
            ));
        };

        let mut chain = Chain::default();
        chain.visit_object(object)?;
        let root = chain.into_root()?;

        Ok(Self {
            root,
            include_metadata: include_metadata(object)?,
        })
    }
}

fn include_metadata(object: &Map<String, Value>) -> NestResult<bool> {
    match object.get(INCLUDE_METADATA) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(flag)) => Ok(*flag),
        Some(Value::String(text)) if text.eq_ignore_ascii_case("true") => Ok(true),
        Some(Value::String(text)) if text.eq_ignore_ascii_case("false") => Ok(false),
        Some(other) => Err(NestError::MalformedSpec(format!(
            "`{INCLUDE_METADATA}` must be a boolean, found {other}"
        ))),
    }
}

/// Levels in the order they are discovered.
#[derive(Default)]
struct Chain {
    levels: Vec<(String, String)>,
}

impl Chain {
    /// Entries are taken in document order. Nested query objects become
    /// levels where they appear, and the object's own `name`/`statement`
    /// pair becomes a level where its second half appears.
    fn visit_object(&mut self, object: &Map<String, Value>) -> NestResult<()> {
        let mut name = None;
        let mut statement = None;

        for (key, value) in object {
            match (key.as_str(), value) {
                (NAME, value) => name = Some(string_field(NAME, value)?),
                (STATEMENT, value) => statement = Some(string_field(STATEMENT, value)?),
                (_, Value::Object(query)) => self.visit_query(query)?,
                (SUBQUERY, Value::Null) => {}
                (SUBQUERY, other) => {
                    return Err(NestError::MalformedSpec(format!(
                        "`{SUBQUERY}` must be an object, found {other}"
                    )))
                }
                _ => continue,
            }

            if let (Some(level), Some(sql)) = (&name, &statement) {
                self.push(level.clone(), sql.clone())?;
                name = None;
                statement = None;
            }
        }

        match (name, statement) {
            (None, None) => Ok(()),
            (Some(name), _) => Err(NestError::MalformedSpec(format!(
                "query '{name}' has no `{STATEMENT}`"
            ))),
            (None, Some(_)) => Err(NestError::MalformedSpec(format!(
                "`{STATEMENT}` without a `{NAME}`"
            ))),
        }
    }

    /// A query object: `name` and `statement` are required, `subquery`
    /// continues the chain.
    fn visit_query(&mut self, query: &Map<String, Value>) -> NestResult<()> {
        let field = |key: &str| match query.get(key) {
            Some(value) => string_field(key, value),
            None => Err(NestError::MalformedSpec(format!(
                "query object is missing `{key}`"
            ))),
        };
        self.push(field(NAME)?, field(STATEMENT)?)?;

        match query.get(SUBQUERY) {
            None | Some(Value::Null) => Ok(()),
            Some(Value::Object(subquery)) => self.visit_object(subquery),
            Some(other) => Err(NestError::MalformedSpec(format!(
                "`{SUBQUERY}` must be an object, found {other}"
            ))),
        }
    }

    fn push(&mut self, name: String, statement: String) -> NestResult<()> {
        if self.levels.iter().any(|(existing, _)| *existing == name) {
            return Err(NestError::MalformedSpec(format!(
                "query name '{name}' is used twice"
            )));
        }
        self.levels.push((name, statement));
        Ok(())
    }

    fn into_root(self) -> NestResult<QueryNode> {
        self.levels
            .into_iter()
            .rev()
            .fold(None, |child: Option<QueryNode>, (name, statement)| {
                let node = QueryNode::new(name, &statement);
                Some(match child {
                    Some(child) => node.with_child(child),
                    None => node,
                })
            })
            .ok_or_else(|| NestError::MalformedSpec("request names no query".to_string()))
    }
}

fn string_field(key: &str, value: &Value) -> NestResult<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Ok(text.trim().to_owned()),
        Value::String(_) => Err(NestError::MalformedSpec(format!("`{key}` is empty"))),
        other => Err(NestError::MalformedSpec(format!(
            "`{key}` must be a string, found {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn names(request: &QueryRequest) -> Vec<&str> {
        request.root().walk().into_iter().map(QueryNode::name).collect()
    }

    fn assert_malformed(value: Value) {
        let result = QueryRequest::parse(&value);
        assert!(
            matches!(result, Err(NestError::MalformedSpec(_))),
            "{value} gave {result:?}"
        );
    }

    #[test]
    fn nested_query_objects() {
        let request = QueryRequest::parse(&json!({
            "query": {
                "name": "agents",
                "statement": "select agent_code from agents",
                "subquery": {
                    "query": {
                        "name": "orders",
                        "statement": "select * from orders where agent_code='[$agent_code]'"
                    }
                }
            },
            "includeMetadata": true
        }))
        .unwrap();

        assert_eq!(names(&request), ["agents", "orders"]);
        assert_eq!(request.root().depth(), 2);
        assert!(request.include_metadata());
        assert_eq!(
            request.root().children()[0].statement(),
            "select * from orders where agent_code='[$agent_code]'"
        );
    }

    #[test]
    fn flattened_top_level() {
        let request = QueryRequest::parse(&json!({
            "name": "agents",
            "statement": "select * from agents",
            "subquery": {
                "name": "orders",
                "statement": "select * from orders",
                "subquery": { "name": "customer", "statement": "select * from customer" }
            }
        }))
        .unwrap();

        assert_eq!(names(&request), ["agents", "orders", "customer"]);
        assert!(!request.include_metadata());
    }

    #[test]
    fn levels_follow_document_order() {
        let request = QueryRequest::parse(&json!({
            "subquery": {
                "name": "orders",
                "statement": "select * from orders",
                "subquery": { "name": "customer", "statement": "select * from customer" }
            },
            "name": "agents",
            "statement": "select * from agents"
        }))
        .unwrap();
        assert_eq!(names(&request), ["orders", "customer", "agents"]);

        let request = QueryRequest::parse(&json!({
            "name": "agents",
            "subquery": { "name": "orders", "statement": "select * from orders" },
            "statement": "select * from agents"
        }))
        .unwrap();
        assert_eq!(names(&request), ["orders", "agents"]);
    }

    #[test]
    fn include_metadata_accepts_strings() {
        let request = QueryRequest::parse(&json!({
            "name": "a", "statement": "select 1", "includeMetadata": "TRUE"
        }))
        .unwrap();
        assert!(request.include_metadata());
        assert_malformed(json!({ "name": "a", "statement": "select 1", "includeMetadata": 1 }));
    }

    #[test]
    fn rejects_missing_pieces() {
        assert_malformed(json!({}));
        assert_malformed(json!([]));
        assert_malformed(json!({ "name": "agents" }));
        assert_malformed(json!({ "statement": "select 1" }));
        assert_malformed(json!({ "query": { "name": "agents" } }));
        assert_malformed(json!({ "name": "a", "statement": 5 }));
        assert_malformed(json!({ "name": " ", "statement": "select 1" }));
        assert_malformed(json!({ "name": "a", "statement": "select 1", "subquery": "x" }));
    }

    #[test]
    fn rejects_duplicate_names() {
        assert_malformed(json!({
            "query": {
                "name": "agents",
                "statement": "select 1",
                "subquery": { "query": { "name": "agents", "statement": "select 2" } }
            }
        }));
    }

    #[test]
    fn from_json_text() {
        let request =
            QueryRequest::from_json(r#"{"query":{"name":"a","statement":"select 1"}}"#).unwrap();
        assert_eq!(request.root().name(), "a");
        assert!(matches!(
            QueryRequest::from_json("{"),
            Err(NestError::MalformedSpec(_))
        ));
    }
}
