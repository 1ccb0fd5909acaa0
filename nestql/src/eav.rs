//! The inverse mapping: a rendered JSON document is flattened into
//! entity/attribute/value rows.
//!
//! Every object of the document becomes one entity. Its scalar values are
//! stored under the dot-joined key path leading to them, e.g.
//! `agents.A001.orders.200100.ord_num`. Column metadata blocks
//! (`<column>_metadata`) become six metadata rows each.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::column::ColumnMetadata;
use crate::render::{
    CLASS_NAME, COLUMN_NUMBER, CONTENT_DATA, DATA_TYPE_ID, DATA_TYPE_NAME, IS_PRIMARY_KEY,
    METADATA_SUFFIX,
};
use crate::{NestError, NestResult};

#[derive(Clone, Debug, PartialEq)]
pub enum Attribute {
    Text(String),
    Object(DynamicObject),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DynamicObject {
    attributes: Vec<(String, Attribute)>,
    metadata: Vec<(String, ColumnMetadata)>,
}

impl DynamicObject {
    pub fn attributes(&self) -> &[(String, Attribute)] {
        &self.attributes
    }

    /// Metadata by column name.
    pub fn metadata(&self) -> &[(String, ColumnMetadata)] {
        &self.metadata
    }

    pub fn attribute(&self, key: &str) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, attribute)| attribute)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.attribute(key)? {
            Attribute::Text(text) => Some(text),
            Attribute::Object(_) => None,
        }
    }

    pub fn child(&self, key: &str) -> Option<&DynamicObject> {
        match self.attribute(key)? {
            Attribute::Object(object) => Some(object),
            Attribute::Text(_) => None,
        }
    }

    pub fn metadata_for(&self, column: &str) -> Option<&ColumnMetadata> {
        self.metadata
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, metadata)| metadata)
    }
}

/// Parse a `{"contentData": {...}}` document.
pub fn parse_document(text: &str) -> NestResult<DynamicObject> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| NestError::MalformedDocument(format!("document is not JSON: {e}")))?;
    parse_value(&value)
}

pub fn parse_value(value: &Value) -> NestResult<DynamicObject> {
    match value.get(CONTENT_DATA) {
        Some(Value::Object(content)) => parse_object(content),
        Some(_) => Err(NestError::MalformedDocument(format!(
            "`{CONTENT_DATA}` must be an object"
        ))),
        None => Err(NestError::MalformedDocument(format!(
            "document has no `{CONTENT_DATA}` object"
        ))),
    }
}

fn parse_object(object: &Map<String, Value>) -> NestResult<DynamicObject> {
    let mut parsed = DynamicObject::default();
    for (key, value) in object {
        match (key.strip_suffix(METADATA_SUFFIX), value) {
            (Some(column), Value::Object(metadata)) => {
                parsed
                    .metadata
                    .push((column.to_owned(), parse_metadata(column, metadata)?));
            }
            (_, Value::Object(child)) => {
                parsed
                    .attributes
                    .push((key.clone(), Attribute::Object(parse_object(child)?)));
            }
            (_, Value::String(text)) => {
                parsed.attributes.push((key.clone(), Attribute::Text(text.clone())));
            }
            (_, Value::Number(_) | Value::Bool(_)) => {
                parsed
                    .attributes
                    .push((key.clone(), Attribute::Text(value.to_string())));
            }
            (_, Value::Null) => {
                parsed.attributes.push((key.clone(), Attribute::Text(String::new())));
            }
            (_, Value::Array(_)) => {
                return Err(NestError::MalformedDocument(format!(
                    "arrays are not supported, found one at `{key}`"
                )))
            }
        }
    }
    Ok(parsed)
}

fn parse_metadata(column: &str, metadata: &Map<String, Value>) -> NestResult<ColumnMetadata> {
    let missing = |field: &str| {
        NestError::MalformedDocument(format!(
            "metadata of `{column}` lacks a valid `{field}`"
        ))
    };
    let integer = |field: &str| {
        metadata
            .get(field)
            .and_then(Value::as_i64)
            .ok_or_else(|| missing(field))
    };
    let text = |field: &str| {
        metadata
            .get(field)
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| missing(field))
    };

    let index = usize::try_from(integer(COLUMN_NUMBER)?).map_err(|_| missing(COLUMN_NUMBER))?;
    let sql_type_id = i32::try_from(integer(DATA_TYPE_ID)?).map_err(|_| missing(DATA_TYPE_ID))?;

    let mut parsed = ColumnMetadata::new(index, column);
    parsed.sql_type_id = sql_type_id;
    parsed.sql_type_name = text(DATA_TYPE_NAME)?;
    parsed.native_class_name = text(CLASS_NAME)?;
    parsed.is_primary_key = metadata
        .get(IS_PRIMARY_KEY)
        .and_then(Value::as_bool)
        .ok_or_else(|| missing(IS_PRIMARY_KEY))?;
    Ok(parsed)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EavValue {
    pub entity_id: String,
    pub attribute: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EavMetadata {
    pub entity_id: String,
    pub attribute: String,
    pub metadata_type: &'static str,
    pub metadata_value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EavBatch {
    pub values: Vec<EavValue>,
    pub metadata: Vec<EavMetadata>,
}

impl EavBatch {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.metadata.is_empty()
    }

    /// Distinct entity ids, in order of first appearance.
    pub fn entities(&self) -> Vec<&str> {
        let mut entities: Vec<&str> = vec![];
        let ids = self
            .values
            .iter()
            .map(|row| row.entity_id.as_str())
            .chain(self.metadata.iter().map(|row| row.entity_id.as_str()));
        for id in ids {
            if !entities.contains(&id) {
                entities.push(id);
            }
        }
        entities
    }
}

/// Flatten with random entity ids.
pub fn flatten(object: &DynamicObject) -> EavBatch {
    flatten_with(object, |_| uuid::Uuid::new_v4().simple().to_string())
}

pub fn flatten_with<F>(object: &DynamicObject, mut next_id: F) -> EavBatch
where
    F: FnMut(&DynamicObject) -> String,
{
    let mut batch = EavBatch::default();
    flatten_into(object, "", &mut next_id, &mut batch);
    batch
}

fn flatten_into<F>(object: &DynamicObject, parent_key: &str, next_id: &mut F, batch: &mut EavBatch)
where
    F: FnMut(&DynamicObject) -> String,
{
    let entity_id = next_id(object);

    for (key, attribute) in &object.attributes {
        let path = if parent_key.is_empty() {
            key.clone()
        } else {
            format!("{parent_key}.{key}")
        };
        match attribute {
            Attribute::Object(child) => flatten_into(child, &path, next_id, batch),
            Attribute::Text(value) => batch.values.push(EavValue {
                entity_id: entity_id.clone(),
                attribute: path,
                value: value.clone(),
            }),
        }
    }

    for (column, metadata) in &object.metadata {
        let rows = [
            ("columnNumber", metadata.index.to_string()),
            ("columnName", metadata.name.clone()),
            ("columnSqlDataType", metadata.sql_type_id.to_string()),
            ("columnSqlDataTypeName", metadata.sql_type_name.clone()),
            ("columnClassName", metadata.native_class_name.clone()),
            ("isPrimaryKey", metadata.is_primary_key.to_string()),
        ];
        for (metadata_type, metadata_value) in rows {
            batch.metadata.push(EavMetadata {
                entity_id: entity_id.clone(),
                attribute: column.clone(),
                metadata_type,
                metadata_value,
            });
        }
    }
}

/// Insert statements for the EAV tables. Values bind as `$1..$3`,
/// metadata as `$1..$4`.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EavStatements {
    pub insert_value: String,
    pub insert_metadata: String,
}

impl Default for EavStatements {
    fn default() -> Self {
        Self {
            insert_value: "INSERT INTO eav_data (entity_id, attribute, value) VALUES ($1, $2, $3)"
                .to_string(),
            insert_metadata: "INSERT INTO eav_metadata (entity_id, attribute, metadata_type, metadata_value) VALUES ($1, $2, $3, $4)"
                .to_string(),
        }
    }
}

#[async_trait]
pub trait EavSink: Send {
    async fn store(&mut self, batch: &EavBatch) -> NestResult<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IngestSummary {
    pub entities: usize,
    pub values: usize,
    pub metadata: usize,
}

/// Parse, flatten and store one document.
pub async fn ingest<S>(sink: &mut S, document: &str) -> NestResult<IngestSummary>
where
    S: EavSink + ?Sized,
{
    let object = parse_document(document)?;
    let batch = flatten(&object);
    sink.store(&batch).await?;

    let summary = IngestSummary {
        entities: batch.entities().len(),
        values: batch.values.len(),
        metadata: batch.metadata.len(),
    };
    info!(
        entities = summary.entities,
        values = summary.values,
        metadata = summary.metadata,
        "stored document"
    );
    Ok(summary)
}
