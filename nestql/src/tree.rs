use std::collections::BTreeMap;

use crate::column::ColumnSet;
use crate::template::RowValues;

/// One cell, by 1-based column index. NULL is stored as the empty string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldValue {
    pub column_index: usize,
    pub value: String,
}

impl FieldValue {
    pub fn new(column_index: usize, value: Option<&str>) -> Self {
        Self {
            column_index,
            value: value.map(str::trim).unwrap_or_default().to_owned(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    /// 1-based position in the result set.
    pub ordinal: usize,
    pub fields: Vec<FieldValue>,
    /// Child trees by node name.
    pub children: BTreeMap<String, Vec<ResultTree>>,
}

impl Record {
    pub fn from_row(ordinal: usize, row: &[Option<String>]) -> Self {
        Self {
            ordinal,
            fields: row
                .iter()
                .enumerate()
                .map(|(i, value)| FieldValue::new(i + 1, value.as_deref()))
                .collect(),
            children: BTreeMap::new(),
        }
    }

    pub fn field(&self, column_index: usize) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.column_index == column_index)
            .map(|field| field.value.as_str())
    }

    /// The values a child template may reference.
    pub fn values(&self, columns: &ColumnSet) -> RowValues {
        let mut values = RowValues::new();
        for field in &self.fields {
            if let Some(column) = columns.get(field.column_index) {
                values.insert(&column.name, field.value.clone(), Some(column.sql_type_name.as_str()));
            }
        }
        values
    }

    pub fn attach(&mut self, tree: ResultTree) {
        self.children
            .entry(tree.node_name.clone())
            .or_default()
            .push(tree);
    }

    pub fn child(&self, node_name: &str) -> Option<&ResultTree> {
        self.children.get(node_name).and_then(|trees| trees.first())
    }
}

/// The rows one query node produced for one parent record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResultTree {
    pub node_name: String,
    pub columns: ColumnSet,
    pub records: Vec<Record>,
}

impl ResultTree {
    pub fn empty(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            columns: ColumnSet::new(),
            records: vec![],
        }
    }

    pub fn from_rows(
        node_name: impl Into<String>,
        columns: ColumnSet,
        rows: &[Vec<Option<String>>],
    ) -> Self {
        Self {
            node_name: node_name.into(),
            columns,
            records: rows
                .iter()
                .enumerate()
                .map(|(i, row)| Record::from_row(i + 1, row))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Every record reached by following `path` (node names below this
    /// tree), each paired with the columns of the tree holding it.
    pub fn parents_along<'t>(
        &'t mut self,
        path: &[String],
        out: &mut Vec<(&'t ColumnSet, &'t mut Record)>,
    ) {
        let ResultTree {
            columns, records, ..
        } = self;
        let columns: &'t ColumnSet = columns;

        match path.split_first() {
            None => out.extend(records.iter_mut().map(move |record| (columns, record))),
            Some((next, rest)) => {
                for record in records.iter_mut() {
                    if let Some(trees) = record.children.get_mut(next) {
                        for tree in trees.iter_mut() {
                            tree.parents_along(rest, out);
                        }
                    }
                }
            }
        }
    }

    /// Number of records at `depth` below this tree, this tree being depth 0.
    pub fn count_at(&self, depth: usize) -> usize {
        if depth == 0 {
            return self.records.len();
        }
        self.records
            .iter()
            .flat_map(|record| record.children.values().flatten())
            .map(|tree| tree.count_at(depth - 1))
            .sum()
    }
}
