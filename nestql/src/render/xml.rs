use super::{
    keyed_records, record_entries, Entry, CLASS_NAME, COLUMN_NUMBER, CONTENT_DATA, DATA_TYPE_ID,
    DATA_TYPE_NAME, IS_PRIMARY_KEY,
};
use crate::column::ColumnMetadata;
use crate::tree::{Record, ResultTree};

const ENTITY: &str = "entity";
const KEY: &str = "key";

pub fn render(tree: &ResultTree, include_metadata: bool, pretty: bool) -> String {
    let mut builder = XmlBuilder::new(pretty);
    builder.push(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    builder.start(CONTENT_DATA, None);
    push_tree(&mut builder, &tree.node_name, tree, include_metadata);
    builder.end();
    builder.build()
}

fn push_tree(builder: &mut XmlBuilder, name: &str, tree: &ResultTree, include_metadata: bool) {
    builder.start(&element_name(name), None);
    for (key, record) in keyed_records(tree) {
        builder.start(ENTITY, Some((KEY, key.as_str())));
        push_record(builder, tree, record, include_metadata);
        builder.end();
    }
    builder.end();
}

fn push_record(builder: &mut XmlBuilder, tree: &ResultTree, record: &Record, include_metadata: bool) {
    for entry in record_entries(tree, record) {
        match entry {
            Entry::Field {
                name,
                metadata_name,
                value,
                column,
            } => {
                builder.leaf(&element_name(&name), value);
                if include_metadata {
                    push_metadata(builder, &metadata_name, column);
                }
            }
            Entry::Child { name, tree } => push_tree(builder, &name, tree, include_metadata),
        }
    }
}

fn push_metadata(builder: &mut XmlBuilder, name: &str, column: &ColumnMetadata) {
    builder.start(&element_name(name), None);
    builder.leaf(COLUMN_NUMBER, &column.index.to_string());
    builder.leaf(IS_PRIMARY_KEY, &column.is_primary_key.to_string());
    builder.leaf(DATA_TYPE_NAME, &column.sql_type_name);
    builder.leaf(DATA_TYPE_ID, &column.sql_type_id.to_string());
    builder.leaf(CLASS_NAME, &column.native_class_name);
    builder.end();
}

/// Writes elements, optionally one per line and indented by depth.
struct XmlBuilder {
    pretty: bool,
    buf: String,
    /// Open elements, and whether each has children yet.
    open: Vec<(String, bool)>,
}

impl XmlBuilder {
    fn new(pretty: bool) -> Self {
        Self {
            pretty,
            buf: String::new(),
            open: vec![],
        }
    }

    fn build(self) -> String {
        self.buf
    }

    fn push(&mut self, str: &str) {
        self.buf.push_str(str);
    }

    fn start(&mut self, name: &str, attribute: Option<(&str, &str)>) {
        self.mark_parent();
        self.newline();
        self.push("<");
        self.push(name);
        if let Some((key, value)) = attribute {
            self.push(" ");
            self.push(key);
            self.push("=\"");
            self.push(&escape(value));
            self.push("\"");
        }
        self.push(">");
        self.open.push((name.to_owned(), false));
    }

    fn end(&mut self) {
        if let Some((name, has_children)) = self.open.pop() {
            if has_children {
                self.newline();
            }
            self.push("</");
            self.push(&name);
            self.push(">");
        }
    }

    fn leaf(&mut self, name: &str, text: &str) {
        self.mark_parent();
        self.newline();
        self.push(&format!("<{name}>{}</{name}>", escape(text)));
    }

    fn mark_parent(&mut self) {
        if let Some((_, has_children)) = self.open.last_mut() {
            *has_children = true;
        }
    }

    fn newline(&mut self) {
        if self.pretty && !self.buf.is_empty() {
            self.push("\n");
            self.buf.extend((0..self.open.len() * 2).map(|_| ' '));
        }
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// A valid element name: invalid characters become `_`, and a name not
/// starting with a letter or `_` gets a `_` prefix.
pub fn element_name(raw: &str) -> String {
    let mut name: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if !name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        name.insert(0, '_');
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::fixture::{agents, clashing, column, tree};

    #[test]
    fn compact_document() {
        let xml = render(&agents(), false, false);
        assert_eq!(
            xml,
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8"?>"#,
                "<contentData><agents>",
                r#"<entity key="A001"><agent_code>A001</agent_code><agent_name>Alex</agent_name>"#,
                "<orders>",
                r#"<entity key="200100"><ord_num>200100</ord_num><agent_code>A001</agent_code></entity>"#,
                r#"<entity key="200107"><ord_num>200107</ord_num><agent_code>A001</agent_code></entity>"#,
                "</orders></entity>",
                r#"<entity key="A002"><agent_code>A002</agent_code><agent_name>Ramasundar</agent_name>"#,
                "<orders></orders></entity>",
                "</agents></contentData>",
            )
        );
    }

    #[test]
    fn pretty_document_indents_by_depth() {
        let xml = render(&agents(), false, true);
        let lines: Vec<&str> = xml.lines().collect();
        assert_eq!(lines[1], "<contentData>");
        assert_eq!(lines[2], "  <agents>");
        assert_eq!(lines[3], r#"    <entity key="A001">"#);
        assert_eq!(lines[4], "      <agent_code>A001</agent_code>");
        assert_eq!(lines.last(), Some(&"</contentData>"));
        assert!(xml.contains("<orders></orders>"));
    }

    #[test]
    fn metadata_elements_follow_their_column() {
        let xml = render(&agents(), true, false);
        assert!(xml.contains(concat!(
            "<agent_code>A001</agent_code><agent_code_metadata>",
            "<columnNumber>1</columnNumber><isPrimaryKey>true</isPrimaryKey>",
            "<dataTypeName>BPCHAR</dataTypeName><dataTypeId>1</dataTypeId>",
            "<className>String</className></agent_code_metadata>"
        )));
    }

    #[test]
    fn escapes_text_and_sanitizes_names() {
        let tree = tree(
            "odd node",
            vec![column("1st col", "TEXT", 12, true)],
            &[&["a<b & \"c\""]],
        );
        let xml = render(&tree, false, false);
        assert!(xml.contains(r#"<odd_node><entity key="a&lt;b &amp; &quot;c&quot;">"#));
        assert!(xml.contains("<_1st_col>a&lt;b &amp; &quot;c&quot;</_1st_col>"));
    }

    #[test]
    fn clashing_names_match_json() {
        let xml = render(&clashing(), false, false);
        assert!(xml.contains(concat!(
            "<agent_code>A001</agent_code><agent_name>Alex</agent_name>",
            "<agent_code_2>A001</agent_code_2>",
            r#"<agent_name_2><entity key="Al"><alias>Al</alias></entity></agent_name_2>"#
        )));
    }
}
