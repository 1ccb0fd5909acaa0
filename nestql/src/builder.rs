use std::ops::Range;

use crate::Database;

/// Accumulates one executable statement.
///
/// Literal template text goes to both the SQL buffer and the literal
/// buffer. Bound values only leave a marker in the SQL buffer, so the
/// literal buffer holds exactly what the template author wrote.
pub struct StatementBuilder<DB: Database> {
    db: std::marker::PhantomData<DB>,
    buf: String,
    literal: String,
    params: Vec<String>,
    untyped: Vec<UntypedBind>,
}

impl<DB: Database> StatementBuilder<DB> {
    pub fn new() -> Self {
        Self {
            db: std::marker::PhantomData,
            buf: String::new(),
            literal: String::new(),
            params: vec![],
            untyped: vec![],
        }
    }

    pub fn build(self) -> BoundStatement<DB> {
        BoundStatement {
            db: std::marker::PhantomData,
            sql: self.buf,
            literal: self.literal,
            params: self.params,
            untyped: self.untyped,
        }
    }

    pub fn push(&mut self, str: &str) {
        self.buf.push_str(str);
        self.literal.push_str(str);
    }

    pub fn push_bind(&mut self, value: String, type_name: Option<&str>) {
        self.params.push(value);
        let marker = DB::bind_marker(self.params.len(), type_name);
        self.buf.push_str(&marker);
    }

    /// Bind a value whose type is decided by where it is used, the way an
    /// untyped string literal is.
    pub fn push_untyped_bind(&mut self, value: String) {
        self.params.push(value);
        let slot = self.params.len();
        let start = self.buf.len();
        self.buf.push_str(&DB::bind_marker(slot, None));
        self.untyped.push(UntypedBind {
            slot,
            range: start..self.buf.len(),
        });
    }

    /// SQL the template author did not write, e.g. the operators splicing
    /// a bind into a string literal.
    pub fn push_sql(&mut self, str: &str) {
        self.buf.push_str(str);
    }
}

impl<DB: Database> Default for StatementBuilder<DB> {
    fn default() -> Self {
        Self::new()
    }
}

/// SQL text with positional parameters, ready for a [StatementExecutor](crate::session::StatementExecutor).
#[derive(Clone, Debug)]
pub struct BoundStatement<DB: Database> {
    db: std::marker::PhantomData<DB>,
    sql: String,
    literal: String,
    params: Vec<String>,
    untyped: Vec<UntypedBind>,
}

/// Position of an untyped marker within the SQL text.
#[derive(Clone, Debug, PartialEq, Eq)]
struct UntypedBind {
    slot: usize,
    range: Range<usize>,
}

impl<DB: Database> BoundStatement<DB> {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// The template text with every placeholder removed.
    pub fn literal(&self) -> &str {
        &self.literal
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Slots (1-based) of binds that still need a type.
    pub fn untyped_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.untyped.iter().map(|bind| bind.slot)
    }

    /// The same statement with every untyped marker rendered for the type
    /// `type_of` reports for its slot.
    pub fn with_types<F>(&self, type_of: F) -> Self
    where
        F: Fn(usize) -> Option<String>,
    {
        let mut sql = String::with_capacity(self.sql.len());
        let mut cursor = 0;
        for bind in &self.untyped {
            sql.push_str(&self.sql[cursor..bind.range.start]);
            sql.push_str(&DB::bind_marker(bind.slot, type_of(bind.slot).as_deref()));
            cursor = bind.range.end;
        }
        sql.push_str(&self.sql[cursor..]);

        Self {
            db: std::marker::PhantomData,
            sql,
            literal: self.literal.clone(),
            params: self.params.clone(),
            untyped: vec![],
        }
    }
}

impl<DB: Database> std::fmt::Display for BoundStatement<DB> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Generic;

    #[test]
    fn binds_leave_markers_only_in_sql() {
        let mut builder = StatementBuilder::<Generic>::new();
        builder.push("select * from orders where agent_code = ");
        builder.push_bind("A001".to_string(), Some("TEXT"));
        builder.push(" and ord_amount > ");
        builder.push_bind("100".to_string(), None);

        let statement = builder.build();
        assert_eq!(
            statement.sql(),
            "select * from orders where agent_code = $1 and ord_amount > $2"
        );
        assert_eq!(
            statement.literal(),
            "select * from orders where agent_code =  and ord_amount > "
        );
        assert_eq!(statement.params(), ["A001", "100"]);
    }

    #[test]
    fn untyped_binds_take_their_type_later() {
        let mut builder = StatementBuilder::<Generic>::new();
        builder.push("select * from t where a = ");
        builder.push_untyped_bind("1".to_string());
        builder.push(" and b = ");
        builder.push_bind("2".to_string(), None);
        builder.push(" and c = ");
        builder.push_untyped_bind("3".to_string());

        let statement = builder.build();
        assert_eq!(statement.untyped_slots().collect::<Vec<_>>(), [1, 3]);

        let typed = statement.with_types(|slot| Some(format!("T{slot}")));
        assert_eq!(typed.sql(), statement.sql());
        assert_eq!(typed.untyped_slots().count(), 0);
        assert_eq!(typed.params(), statement.params());
    }
}
