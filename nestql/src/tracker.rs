use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::column::{ColumnMetadata, ColumnSet, TableName, TableRef};
use crate::session::{PrimaryKeyLookup, RawColumn};

/// Primary keys looked up during one resolution.
#[derive(Debug, Default)]
pub struct KeyCache {
    tables: BTreeMap<TableName, BTreeSet<String>>,
}

impl KeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up once per table. A failed lookup counts as "no primary key".
    pub async fn primary_keys<L>(&mut self, lookup: &mut L, table: &TableName) -> BTreeSet<String>
    where
        L: PrimaryKeyLookup + ?Sized,
    {
        if let Some(keys) = self.tables.get(table) {
            return keys.clone();
        }

        let keys = match lookup.primary_keys(table).await {
            Ok(keys) => keys,
            Err(error) => {
                warn!(%table, %error, "primary key lookup failed");
                BTreeSet::new()
            }
        };
        self.tables.insert(table.clone(), keys.clone());
        keys
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Build the column metadata of a result set.
///
/// A column whose origin table is known only considers that table,
/// otherwise every table the statement references is a candidate.
pub async fn track<L>(
    raw: &[RawColumn],
    referenced: &[TableName],
    lookup: &mut L,
    cache: &mut KeyCache,
) -> ColumnSet
where
    L: PrimaryKeyLookup + ?Sized,
{
    let mut columns = ColumnSet::new();
    for column in raw {
        let mut metadata = ColumnMetadata::from_raw(columns.len() + 1, column);
        let candidates = match &column.origin {
            Some(origin) => std::slice::from_ref(origin),
            None => referenced,
        };
        for table in candidates {
            let keys = cache.primary_keys(lookup, table).await;
            metadata.add_source_table(TableRef::new(table.clone(), keys));
        }
        metadata.check_primary_key();
        columns.push(metadata);
    }
    columns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NestError, NestResult};
    use async_trait::async_trait;

    #[derive(Default)]
    struct Lookups {
        calls: Vec<String>,
    }

    #[async_trait]
    impl PrimaryKeyLookup for Lookups {
        async fn primary_keys(&mut self, table: &TableName) -> NestResult<BTreeSet<String>> {
            self.calls.push(table.to_string());
            match table.table.as_str() {
                "agents" => Ok(["agent_code".to_string()].into()),
                "orders" => Ok(["ord_num".to_string()].into()),
                _ => Err(NestError::SqlExecution("no such table".to_string())),
            }
        }
    }

    #[tokio::test]
    async fn marks_key_columns_and_caches_lookups() {
        let raw = vec![
            RawColumn::new("ORD_NUM", "INT4"),
            RawColumn::new("agent_code", "BPCHAR"),
        ];
        let referenced = vec![TableName::new("orders")];
        let mut lookups = Lookups::default();
        let mut cache = KeyCache::new();

        let columns = track(&raw, &referenced, &mut lookups, &mut cache).await;
        let again = track(&raw, &referenced, &mut lookups, &mut cache).await;

        assert_eq!(columns, again);
        assert_eq!(lookups.calls, ["orders"]);
        assert!(columns.get(1).unwrap().is_primary_key);
        assert!(!columns.get(2).unwrap().is_primary_key);
        assert_eq!(columns.get(1).unwrap().name, "ord_num");
    }

    #[tokio::test]
    async fn origin_narrows_candidates() {
        let raw = vec![RawColumn::new("agent_code", "BPCHAR").with_origin(TableName::new("orders"))];
        let referenced = vec![TableName::new("orders"), TableName::new("agents")];
        let mut lookups = Lookups::default();

        let columns = track(&raw, &referenced, &mut lookups, &mut KeyCache::new()).await;

        assert!(!columns.get(1).unwrap().is_primary_key);
        assert_eq!(columns.get(1).unwrap().source_tables.len(), 1);
        assert_eq!(lookups.calls, ["orders"]);
    }

    #[tokio::test]
    async fn failed_lookup_means_no_key() {
        let raw = vec![RawColumn::new("id", "INT4")];
        let referenced = vec![TableName::new("missing")];

        let columns = track(&raw, &referenced, &mut Lookups::default(), &mut KeyCache::new()).await;

        assert!(!columns.get(1).unwrap().is_primary_key);
    }
}
