//! Statement gate: only a single, plain SELECT may reach the database.

use std::ops::ControlFlow;

use sqlparser::ast::{visit_relations, ObjectNamePart, SetExpr, Statement};
use sqlparser::parser::Parser;

use crate::builder::BoundStatement;
use crate::column::TableName;
use crate::{Database, NestError, NestResult};

/// What a statement that passed validation reads from.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Validated {
    tables: Vec<TableName>,
}

impl Validated {
    /// Referenced base relations, in order of first appearance. CTE names
    /// are not included.
    pub fn tables(&self) -> &[TableName] {
        &self.tables
    }
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || "_ ,.*=<>!()'\"-".contains(c)
}

pub fn validate<DB: Database>(statement: &BoundStatement<DB>) -> NestResult<Validated> {
    if let Some(invalid) = statement.literal().chars().find(|c| !is_allowed(*c)) {
        return Err(NestError::UnsupportedStatement(format!(
            "character {invalid:?} is not allowed in a statement"
        )));
    }

    let statements = Parser::parse_sql(DB::dialect(), statement.sql()).map_err(|e| {
        NestError::UnsupportedStatement(format!("statement does not parse: {e}"))
    })?;

    let [parsed] = statements.as_slice() else {
        return Err(NestError::UnsupportedStatement(format!(
            "expected exactly one statement, found {}",
            statements.len()
        )));
    };

    let Statement::Query(query) = parsed else {
        return Err(NestError::UnsupportedStatement(
            "only SELECT statements are allowed".to_string(),
        ));
    };

    if matches!(query.body.as_ref(), SetExpr::Select(select) if select.into.is_some()) {
        return Err(NestError::UnsupportedStatement(
            "SELECT ... INTO is not allowed".to_string(),
        ));
    }

    let ctes: Vec<String> = query
        .with
        .iter()
        .flat_map(|with| with.cte_tables.iter())
        .map(|cte| cte.alias.name.value.to_lowercase())
        .collect();

    let mut tables: Vec<TableName> = vec![];
    let _ = visit_relations(parsed, |relation| {
        let parts: Vec<String> = relation
            .0
            .iter()
            .map(|part| match part {
                ObjectNamePart::Identifier(ident) if ident.quote_style.is_some() => {
                    ident.value.clone()
                }
                ObjectNamePart::Identifier(ident) => ident.value.to_lowercase(),
            })
            .collect();

        if let Some(table) = TableName::from_parts(&parts) {
            let is_cte = table.schema.is_none() && ctes.contains(&table.table.to_lowercase());
            if !is_cte && !tables.contains(&table) {
                tables.push(table);
            }
        }
        ControlFlow::<()>::Continue(())
    });

    Ok(Validated { tables })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Generic;
    use crate::template::Template;

    fn check(sql: &str) -> NestResult<Validated> {
        validate(&Template::parse(sql).preview::<Generic>())
    }

    fn assert_rejected(sql: &str) {
        let result = check(sql);
        assert!(
            matches!(result, Err(NestError::UnsupportedStatement(_))),
            "{sql} gave {result:?}"
        );
    }

    #[test]
    fn accepts_select_with_placeholders() {
        let validated = check("select * from orders where agent_code='[$agent_code]'").unwrap();
        assert_eq!(validated.tables(), [TableName::new("orders")]);
    }

    #[test]
    fn reports_joined_and_qualified_tables() {
        let validated = check(
            "select o.ord_num from Public.Orders o join agents a on a.agent_code = o.agent_code",
        )
        .unwrap();
        assert_eq!(
            validated.tables(),
            [
                TableName::new("orders").with_schema("public"),
                TableName::new("agents")
            ]
        );
    }

    #[test]
    fn quoted_identifiers_keep_their_case() {
        let validated = check("select * from \"Sales\".\"Orders\" join agents on true").unwrap();
        assert_eq!(
            validated.tables(),
            [
                TableName::new("Orders").with_schema("Sales"),
                TableName::new("agents")
            ]
        );
    }

    #[test]
    fn cte_names_are_not_tables() {
        let validated =
            check("with recent as (select * from orders) select * from recent").unwrap();
        assert_eq!(validated.tables(), [TableName::new("orders")]);
    }

    #[test]
    fn rejects_statement_separator() {
        assert_rejected("select * from agents;--");
    }

    #[test]
    fn rejects_comment_and_newline() {
        assert_rejected("select * from agents /* x */");
        assert_rejected("select *\nfrom agents");
    }

    #[test]
    fn rejects_non_select() {
        assert_rejected("DROP TABLE agents");
        assert_rejected("delete from agents where agent_code = 'A001'");
        assert_rejected("update agents set agent_name = 'x'");
    }

    #[test]
    fn rejects_select_into() {
        assert_rejected("select * into backup from agents");
    }

    #[test]
    fn rejects_garbage() {
        assert_rejected("selec * from agents");
    }
}
