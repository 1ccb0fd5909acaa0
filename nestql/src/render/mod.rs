use std::collections::BTreeSet;
use std::str::FromStr;

use crate::column::ColumnMetadata;
use crate::tree::{Record, ResultTree};
use crate::{NestError, NestResult};

pub mod json;
pub mod xml;

pub const CONTENT_DATA: &str = "contentData";
pub const METADATA_SUFFIX: &str = "_metadata";

pub const COLUMN_NUMBER: &str = "columnNumber";
pub const IS_PRIMARY_KEY: &str = "isPrimaryKey";
pub const DATA_TYPE_NAME: &str = "dataTypeName";
pub const DATA_TYPE_ID: &str = "dataTypeId";
pub const CLASS_NAME: &str = "className";

pub const MODE_JSON: &str = "application/json";
pub const MODE_XML: &str = "application/xml";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Json,
    Xml,
}

impl Format {
    pub fn content_type(&self) -> &'static str {
        match self {
            Format::Json => MODE_JSON,
            Format::Xml => MODE_XML,
        }
    }
}

impl FromStr for Format {
    type Err = NestError;

    fn from_str(mode: &str) -> NestResult<Self> {
        let mode = mode.trim();
        if mode.eq_ignore_ascii_case(MODE_JSON) || mode.eq_ignore_ascii_case("json") {
            Ok(Format::Json)
        } else if mode.eq_ignore_ascii_case(MODE_XML) || mode.eq_ignore_ascii_case("xml") {
            Ok(Format::Xml)
        } else {
            Err(NestError::Serialization(format!(
                "unsupported output mode '{mode}'"
            )))
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputMode {
    pub format: Format,
    pub pretty: bool,
}

impl OutputMode {
    pub fn new(format: Format) -> Self {
        Self {
            format,
            pretty: false,
        }
    }

    pub fn pretty(mut self) -> Self {
        self.pretty = true;
        self
    }
}

impl FromStr for OutputMode {
    type Err = NestError;

    fn from_str(mode: &str) -> NestResult<Self> {
        Ok(Self::new(mode.parse()?))
    }
}

pub fn serialize(tree: &ResultTree, include_metadata: bool, mode: OutputMode) -> NestResult<String> {
    match mode.format {
        Format::Json => json::render(tree, include_metadata, mode.pretty),
        Format::Xml => Ok(xml::render(tree, include_metadata, mode.pretty)),
    }
}

/// The key of a record: the value of its first primary-key column, or
/// its ordinal when the result has no key column.
pub fn record_key(tree: &ResultTree, record: &Record) -> String {
    tree.columns
        .first_key()
        .and_then(|column| record.field(column.index))
        .map(str::to_owned)
        .unwrap_or_else(|| record.ordinal.to_string())
}

/// Records of `tree` with unique keys. A key seen before within the same
/// tree is suffixed with `_<ordinal>`.
pub(crate) fn keyed_records(tree: &ResultTree) -> Vec<(String, &Record)> {
    let mut seen = BTreeSet::new();
    tree.records
        .iter()
        .map(|record| {
            let mut key = record_key(tree, record);
            if !seen.insert(key.clone()) {
                key = format!("{key}_{}", record.ordinal);
                seen.insert(key.clone());
            }
            (key, record)
        })
        .collect()
}

/// One named part of a rendered record, in output order.
pub(crate) enum Entry<'t> {
    Field {
        name: String,
        metadata_name: String,
        value: &'t str,
        column: &'t ColumnMetadata,
    },
    Child {
        name: String,
        tree: &'t ResultTree,
    },
}

/// The fields, then the child trees, of `record` under names unique within
/// the record. A column repeated by a join, or a child named like a column,
/// gets a `_<n>` suffix.
pub(crate) fn record_entries<'t>(tree: &'t ResultTree, record: &'t Record) -> Vec<Entry<'t>> {
    let mut names = UniqueNames::default();
    let mut entries = vec![];

    for field in &record.fields {
        let Some(column) = tree.columns.get(field.column_index) else {
            continue;
        };
        let name = names.claim(&column.name);
        let metadata_name = names.claim(&format!("{name}{METADATA_SUFFIX}"));
        entries.push(Entry::Field {
            name,
            metadata_name,
            value: &field.value,
            column,
        });
    }

    for child in record.children.values().flatten() {
        entries.push(Entry::Child {
            name: names.claim(&child.node_name),
            tree: child,
        });
    }
    entries
}

#[derive(Default)]
struct UniqueNames {
    used: BTreeSet<String>,
}

impl UniqueNames {
    fn claim(&mut self, name: &str) -> String {
        let mut candidate = name.to_owned();
        let mut n = 2;
        while !self.used.insert(candidate.clone()) {
            candidate = format!("{name}_{n}");
            n += 1;
        }
        candidate
    }
}
