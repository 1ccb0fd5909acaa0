use sqlparser::dialect::{Dialect, GenericDialect};

#[cfg(feature = "postgres")]
pub mod postgres;

pub trait Database: std::fmt::Debug + Sync + Send + Clone + 'static {
    /// Dialect used to validate rendered statements.
    fn dialect() -> &'static dyn Dialect;

    /// Placeholder text for the bound parameter in `slot` (1-based).
    ///
    /// `type_name` is the database type of the parent column the value
    /// came from, when known.
    fn bind_marker(slot: usize, type_name: Option<&str>) -> String;
}

/// Database without type information. Binds render as `$n`.
#[derive(Clone, Debug)]
pub struct Generic;

static GENERIC_DIALECT: GenericDialect = GenericDialect {};

impl Database for Generic {
    fn dialect() -> &'static dyn Dialect {
        &GENERIC_DIALECT
    }

    fn bind_marker(slot: usize, _: Option<&str>) -> String {
        format!("${slot}")
    }
}
