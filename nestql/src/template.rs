use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::builder::{BoundStatement, StatementBuilder};
use crate::{Database, NestError, NestResult};

/// Bracketed tokens, `[...]`. Only `[$...]` tokens are placeholders.
static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(.*?)\]").unwrap());

/// The parent values visible to a child template, keyed by lowercase
/// column name.
#[derive(Clone, Debug, Default)]
pub struct RowValues {
    entries: BTreeMap<String, RowValue>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowValue {
    pub text: String,
    pub type_name: Option<String>,
}

impl RowValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value. The first column with a given name wins.
    pub fn insert(&mut self, name: &str, text: impl Into<String>, type_name: Option<&str>) {
        self.entries
            .entry(name.trim().to_lowercase())
            .or_insert_with(|| RowValue {
                text: text.into(),
                type_name: type_name.map(str::to_owned),
            });
    }

    pub fn get(&self, key: &str) -> Option<&RowValue> {
        self.entries.get(&key.trim().to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for RowValues {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut values = RowValues::new();
        for (key, value) in iter {
            values.insert(key.as_ref(), value, None);
        }
        values
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Placeholder {
    /// Column name, lowercased, without the `$`.
    pub key: String,
    /// The token as written, e.g. `[$Agent_Code]`.
    pub token: String,
    pub quoting: Quoting,
}

/// Where a placeholder sits relative to SQL string literals.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Quoting {
    /// Outside any string literal, e.g. `id = [$id]`.
    Bare,
    /// The whole literal, e.g. `code = '[$code]'`. The quotes are not part
    /// of the neighbouring literal segments.
    Whole,
    /// Part of a longer literal, e.g. `note = 'agent [$code]'`.
    Embedded,
}

/// A parsed SQL template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Self {
        let mut segments = vec![];
        let mut cursor = 0;

        for found in TOKEN.find_iter(source) {
            let token = found.as_str();
            let Some(key) = token[1..token.len() - 1].strip_prefix('$') else {
                continue;
            };

            let mut before = &source[cursor..found.start()];
            let in_string = source[..found.start()].matches('\'').count() % 2 == 1;
            let quoting = if !in_string {
                Quoting::Bare
            } else if before.ends_with('\'') && source[found.end()..].starts_with('\'') {
                Quoting::Whole
            } else {
                Quoting::Embedded
            };
            if quoting == Quoting::Whole {
                before = &before[..before.len() - 1];
            }

            push_literal(&mut segments, before);
            segments.push(Segment::Placeholder(Placeholder {
                key: key.trim().to_lowercase(),
                token: token.to_owned(),
                quoting,
            }));
            cursor = found.end() + usize::from(quoting == Quoting::Whole);
        }
        push_literal(&mut segments, &source[cursor..]);

        Self {
            source: source.to_owned(),
            segments,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &Placeholder> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Placeholder(placeholder) => Some(placeholder),
            Segment::Literal(_) => None,
        })
    }

    /// Textual substitution. Unknown keys keep their token.
    ///
    /// Only meant for previews and logs, executable statements come from [Template::bind].
    pub fn substitute(&self, row: &RowValues) -> String {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(placeholder) => {
                    let text = match row.get(&placeholder.key) {
                        Some(value) => value.text.as_str(),
                        None => placeholder.token.as_str(),
                    };
                    if placeholder.quoting == Quoting::Whole {
                        out.push('\'');
                        out.push_str(text);
                        out.push('\'');
                    } else {
                        out.push_str(text);
                    }
                }
            }
        }
        out
    }

    /// Produce an executable statement, every placeholder becoming a
    /// bound parameter.
    ///
    /// A bare placeholder is typed after its parent column. A placeholder
    /// forming a whole string literal is left untyped so the database types
    /// it from context. One embedded in a longer literal is spliced in as
    /// text with `||`.
    pub fn bind<DB: Database>(&self, row: &RowValues) -> NestResult<BoundStatement<DB>> {
        let mut builder = StatementBuilder::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => builder.push(text),
                Segment::Placeholder(placeholder) => {
                    let value = row
                        .get(&placeholder.key)
                        .ok_or_else(|| NestError::UnresolvedPlaceholder(placeholder.key.clone()))?;
                    push_placeholder(
                        &mut builder,
                        placeholder.quoting,
                        value.text.clone(),
                        value.type_name.as_deref(),
                    );
                }
            }
        }
        Ok(builder.build())
    }

    /// The statement shape with empty, untyped parameters. Used to
    /// validate a template before any parent row exists.
    pub fn preview<DB: Database>(&self) -> BoundStatement<DB> {
        let mut builder = StatementBuilder::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => builder.push(text),
                Segment::Placeholder(placeholder) => {
                    push_placeholder(&mut builder, placeholder.quoting, String::new(), None)
                }
            }
        }
        builder.build()
    }
}

fn push_placeholder<DB: Database>(
    builder: &mut StatementBuilder<DB>,
    quoting: Quoting,
    value: String,
    type_name: Option<&str>,
) {
    match quoting {
        Quoting::Bare => builder.push_bind(value, type_name),
        Quoting::Whole => builder.push_untyped_bind(value),
        Quoting::Embedded => {
            builder.push_sql("' || ");
            builder.push_bind(value, Some("TEXT"));
            builder.push_sql(" || '");
        }
    }
}

fn push_literal(segments: &mut Vec<Segment>, text: &str) {
    if text.is_empty() {
        return;
    }
    match segments.last_mut() {
        Some(Segment::Literal(last)) => last.push_str(text),
        _ => segments.push(Segment::Literal(text.to_owned())),
    }
}

/// Keys of every placeholder in `template`, in order of appearance.
pub fn placeholder_keys(template: &str) -> Vec<String> {
    Template::parse(template)
        .placeholders()
        .map(|placeholder| placeholder.key.clone())
        .collect()
}

pub fn substitute(template: &str, row: &RowValues) -> String {
    Template::parse(template).substitute(row)
}
