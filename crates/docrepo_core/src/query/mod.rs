//! Store query language: definitions, predicate builder, parser and engine.
//!
//! # Responsibility
//! - Carry query text plus named parameters to a store (`QueryDefinition`).
//! - Build discriminator-safe predicates without hand-written query text.
//! - Parse and evaluate the supported SQL subset for the bundled stores.
//!
//! # Invariants
//! - Predicate values are always bound as `@pN` parameters, never inlined.
//! - Rendered text round-trips through `parser::parse`.

pub mod engine;
pub mod filter;
pub mod parser;

use serde_json::Value;
use thiserror::Error;

pub use filter::{field, Field, Filter};

/// Query text plus its named parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDefinition {
    text: String,
    parameters: Vec<(String, Value)>,
}

impl QueryDefinition {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parameters: Vec::new(),
        }
    }

    /// Binds `name` (including the leading `@`) to `value`, replacing any
    /// earlier binding with the same name.
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.parameters.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = value,
            None => self.parameters.push((name, value)),
        }
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn parameters(&self) -> &[(String, Value)] {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
    }
}

impl From<&str> for QueryDefinition {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for QueryDefinition {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Sort direction for `ORDER BY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Structured `SELECT * FROM c` statement assembled from a [`Filter`].
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    filter: Filter,
    order_by: Vec<(String, SortOrder)>,
    top: Option<usize>,
}

impl Query {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            order_by: Vec::new(),
            top: None,
        }
    }

    pub fn order_by(mut self, path: impl Into<String>, order: SortOrder) -> Self {
        self.order_by.push((path.into(), order));
        self
    }

    pub fn top(mut self, count: usize) -> Self {
        self.top = Some(count);
        self
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Renders `SELECT [TOP n] * FROM c [WHERE ...] [ORDER BY ...]`.
    pub fn to_definition(&self) -> QueryDefinition {
        let mut binder = filter::ParameterBinder::default();
        let mut text = String::from("SELECT ");
        if let Some(top) = self.top {
            text.push_str(&format!("TOP {top} "));
        }
        text.push_str("* FROM c");

        let condition = self.filter.render(&mut binder);
        if condition != filter::TRUE_LITERAL {
            text.push_str(" WHERE ");
            text.push_str(&condition);
        }

        if !self.order_by.is_empty() {
            let clauses = self
                .order_by
                .iter()
                .map(|(path, order)| {
                    let direction = match order {
                        SortOrder::Ascending => "ASC",
                        SortOrder::Descending => "DESC",
                    };
                    format!("{} {direction}", filter::render_path(path))
                })
                .collect::<Vec<_>>();
            text.push_str(" ORDER BY ");
            text.push_str(&clauses.join(", "));
        }

        binder.into_definition(text)
    }

    /// Renders `SELECT VALUE COUNT(1) FROM c [WHERE ...]`.
    pub fn to_count_definition(&self) -> QueryDefinition {
        let mut binder = filter::ParameterBinder::default();
        let mut text = String::from("SELECT VALUE COUNT(1) FROM c");
        let condition = self.filter.render(&mut binder);
        if condition != filter::TRUE_LITERAL {
            text.push_str(" WHERE ");
            text.push_str(&condition);
        }
        binder.into_definition(text)
    }
}

impl From<Filter> for Query {
    fn from(value: Filter) -> Self {
        Self::new(value)
    }
}

/// Errors raised while parsing or evaluating query text.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },
    #[error("query parameter `{0}` is not bound")]
    UnboundParameter(String),
    #[error("unsupported function `{0}`")]
    UnsupportedFunction(String),
    #[error("invalid arguments for `{function}`: {message}")]
    InvalidArguments {
        function: &'static str,
        message: String,
    },
    #[error("invalid continuation token `{0}`")]
    InvalidContinuation(String),
}

#[cfg(test)]
mod tests {
    use super::{field, Filter, Query, QueryDefinition, SortOrder};
    use serde_json::json;

    #[test]
    fn with_parameter_replaces_existing_binding() {
        let definition = QueryDefinition::new("SELECT * FROM c WHERE c.a = @a")
            .with_parameter("@a", 1)
            .with_parameter("@a", 2);
        assert_eq!(definition.parameters().len(), 1);
        assert_eq!(definition.parameter("@a"), Some(&json!(2)));
    }

    #[test]
    fn renders_select_with_filter_order_and_top() {
        let definition = Query::new(field("customerId").eq("c1").and(field("total").gt(10)))
            .order_by("total", SortOrder::Descending)
            .top(5)
            .to_definition();

        assert_eq!(
            definition.text(),
            "SELECT TOP 5 * FROM c WHERE (c.customerId = @p0 AND c.total > @p1) ORDER BY c.total DESC"
        );
        assert_eq!(definition.parameter("@p0"), Some(&json!("c1")));
        assert_eq!(definition.parameter("@p1"), Some(&json!(10)));
    }

    #[test]
    fn renders_without_where_for_match_all() {
        let definition = Query::new(Filter::All).to_definition();
        assert_eq!(definition.text(), "SELECT * FROM c");
        assert!(definition.parameters().is_empty());
    }

    #[test]
    fn renders_count_statement() {
        let definition = Query::new(field("type").eq("Order")).to_count_definition();
        assert_eq!(
            definition.text(),
            "SELECT VALUE COUNT(1) FROM c WHERE c.type = @p0"
        );
    }
}
