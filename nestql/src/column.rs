use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::session::RawColumn;

/// A possibly qualified relation name, as it appears in a statement.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableName {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub table: String,
}

impl TableName {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            catalog: None,
            schema: None,
            table: table.into(),
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// From name parts, innermost last. Parts beyond catalog are ignored.
    pub fn from_parts(parts: &[String]) -> Option<Self> {
        match parts {
            [] => None,
            [table] => Some(Self::new(table.clone())),
            [schema, table] => Some(Self::new(table.clone()).with_schema(schema.clone())),
            [.., catalog, schema, table] => Some(Self {
                catalog: Some(catalog.clone()),
                schema: Some(schema.clone()),
                table: table.clone(),
            }),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(catalog) = &self.catalog {
            write!(f, "{catalog}.")?;
        }
        if let Some(schema) = &self.schema {
            write!(f, "{schema}.")?;
        }
        f.write_str(&self.table)
    }
}

/// A table a column may originate from, with its primary-key columns.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableRef {
    pub name: TableName,
    pub primary_key_fields: BTreeSet<String>,
}

impl TableRef {
    pub fn new(name: TableName, primary_key_fields: BTreeSet<String>) -> Self {
        Self {
            name,
            primary_key_fields,
        }
    }

    pub fn is_key_field(&self, column: &str) -> bool {
        self.primary_key_fields
            .iter()
            .any(|field| field.eq_ignore_ascii_case(column))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnMetadata {
    /// 1-based position in the result set.
    pub index: usize,
    /// Lowercased and trimmed.
    pub name: String,
    /// Lowercased and trimmed.
    pub label: String,
    pub sql_type_id: i32,
    pub sql_type_name: String,
    pub native_class_name: String,
    pub is_primary_key: bool,
    pub source_tables: BTreeSet<TableRef>,
}

impl ColumnMetadata {
    pub fn new(index: usize, name: &str) -> Self {
        let name = normalize(name);
        Self {
            index,
            label: name.clone(),
            name,
            sql_type_id: 0,
            sql_type_name: String::new(),
            native_class_name: String::new(),
            is_primary_key: false,
            source_tables: BTreeSet::new(),
        }
    }

    pub fn from_raw(index: usize, raw: &RawColumn) -> Self {
        Self {
            index,
            name: normalize(&raw.name),
            label: normalize(&raw.label),
            sql_type_id: raw.type_id,
            sql_type_name: raw.type_name.clone(),
            native_class_name: raw.class_name.clone(),
            is_primary_key: false,
            source_tables: BTreeSet::new(),
        }
    }

    pub fn add_source_table(&mut self, table: TableRef) {
        self.source_tables.insert(table);
    }

    /// Mark the column as a key if any source table lists it among its
    /// primary-key fields.
    pub fn check_primary_key(&mut self) {
        self.is_primary_key = self
            .source_tables
            .iter()
            .any(|table| table.is_key_field(&self.name));
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Column metadata of one result set, by 1-based index.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColumnSet {
    columns: BTreeMap<usize, ColumnMetadata>,
}

impl ColumnSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column, assigning it the next index.
    pub fn push(&mut self, mut column: ColumnMetadata) -> usize {
        let index = self.columns.len() + 1;
        column.index = index;
        self.columns.insert(index, column);
        index
    }

    pub fn get(&self, index: usize) -> Option<&ColumnMetadata> {
        self.columns.get(&index)
    }

    pub fn by_name(&self, name: &str) -> Option<&ColumnMetadata> {
        self.iter().find(|column| column.name.eq_ignore_ascii_case(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnMetadata> {
        self.columns.values()
    }

    /// The first primary-key column in result order.
    pub fn first_key(&self) -> Option<&ColumnMetadata> {
        self.iter().find(|column| column.is_primary_key)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl FromIterator<ColumnMetadata> for ColumnSet {
    fn from_iter<I: IntoIterator<Item = ColumnMetadata>>(iter: I) -> Self {
        let mut set = ColumnSet::new();
        for column in iter {
            set.push(column);
        }
        set
    }
}
