use serde_json::{Map, Value};

use super::{
    keyed_records, record_entries, Entry, CLASS_NAME, COLUMN_NUMBER, CONTENT_DATA, DATA_TYPE_ID,
    DATA_TYPE_NAME, IS_PRIMARY_KEY,
};
use crate::column::ColumnMetadata;
use crate::tree::{Record, ResultTree};
use crate::{NestError, NestResult};

pub fn render(tree: &ResultTree, include_metadata: bool, pretty: bool) -> NestResult<String> {
    let document = to_value(tree, include_metadata);
    let text = if pretty {
        serde_json::to_string_pretty(&document)
    } else {
        serde_json::to_string(&document)
    };
    text.map_err(|e| NestError::Serialization(e.to_string()))
}

/// The document as a JSON value, below the `contentData` wrapper.
pub fn to_value(tree: &ResultTree, include_metadata: bool) -> Value {
    let mut content = Map::new();
    content.insert(tree.node_name.clone(), tree_value(tree, include_metadata));

    let mut root = Map::new();
    root.insert(CONTENT_DATA.to_string(), Value::Object(content));
    Value::Object(root)
}

fn tree_value(tree: &ResultTree, include_metadata: bool) -> Value {
    let mut records = Map::new();
    for (key, record) in keyed_records(tree) {
        records.insert(key, record_value(tree, record, include_metadata));
    }
    Value::Object(records)
}

fn record_value(tree: &ResultTree, record: &Record, include_metadata: bool) -> Value {
    let mut detail = Map::new();
    for entry in record_entries(tree, record) {
        match entry {
            Entry::Field {
                name,
                metadata_name,
                value,
                column,
            } => {
                detail.insert(name, Value::from(value));
                if include_metadata {
                    detail.insert(metadata_name, metadata_value(column));
                }
            }
            Entry::Child { name, tree } => {
                detail.insert(name, tree_value(tree, include_metadata));
            }
        }
    }
    Value::Object(detail)
}

fn metadata_value(column: &ColumnMetadata) -> Value {
    let mut metadata = Map::new();
    metadata.insert(COLUMN_NUMBER.to_string(), Value::from(column.index));
    metadata.insert(IS_PRIMARY_KEY.to_string(), Value::from(column.is_primary_key));
    metadata.insert(
        DATA_TYPE_NAME.to_string(),
        Value::from(column.sql_type_name.clone()),
    );
    metadata.insert(DATA_TYPE_ID.to_string(), Value::from(column.sql_type_id));
    metadata.insert(
        CLASS_NAME.to_string(),
        Value::from(column.native_class_name.clone()),
    );
    Value::Object(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::fixture::{agents, clashing};
    use serde_json::json;

    #[test]
    fn nests_children_under_their_parent() {
        let text = render(&agents(), false, false).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(
            value,
            json!({
                "contentData": {
                    "agents": {
                        "A001": {
                            "agent_code": "A001",
                            "agent_name": "Alex",
                            "orders": {
                                "200100": { "ord_num": "200100", "agent_code": "A001" },
                                "200107": { "ord_num": "200107", "agent_code": "A001" }
                            }
                        },
                        "A002": {
                            "agent_code": "A002",
                            "agent_name": "Ramasundar",
                            "orders": {}
                        }
                    }
                }
            })
        );
    }

    #[test]
    fn properties_follow_column_order() {
        let text = render(&agents(), true, false).unwrap();
        let start = text.find("\"A001\"").unwrap();
        let record = &text[start..];
        let positions: Vec<usize> = [
            "\"agent_code\"",
            "\"agent_code_metadata\"",
            "\"agent_name\"",
            "\"orders\"",
        ]
        .iter()
        .map(|needle| record.find(needle).unwrap())
        .collect();

        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn metadata_shape() {
        let value = to_value(&agents(), true);
        assert_eq!(
            value["contentData"]["agents"]["A001"]["agent_code_metadata"],
            json!({
                "columnNumber": 1,
                "isPrimaryKey": true,
                "dataTypeName": "BPCHAR",
                "dataTypeId": 1,
                "className": "String"
            })
        );
    }

    #[test]
    fn pretty_output_parses_the_same() {
        let compact: Value = serde_json::from_str(&render(&agents(), true, false).unwrap()).unwrap();
        let pretty: Value = serde_json::from_str(&render(&agents(), true, true).unwrap()).unwrap();
        assert_eq!(compact, pretty);
    }

    #[test]
    fn clashing_names_keep_every_value() {
        let value = to_value(&clashing(), true);
        let agent = &value["contentData"]["agents"]["A001"];

        assert_eq!(agent["agent_code"], "A001");
        assert_eq!(agent["agent_code_2"], "A001");
        assert_eq!(agent["agent_code_2_metadata"]["columnNumber"], 3);
        assert_eq!(agent["agent_name"], "Alex");
        assert_eq!(agent["agent_name_2"]["Al"]["alias"], "Al");
    }
}
