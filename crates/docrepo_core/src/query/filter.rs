//! Predicate builder rendered into parameterized query text.
//!
//! # Invariants
//! - Every literal becomes a bound parameter (`@p0`, `@p1`, ...).
//! - `Filter::All` renders as `true` and is elided by `and`/`or`.

use super::QueryDefinition;
use serde_json::Value;

pub(crate) const TRUE_LITERAL: &str = "true";
const ROOT_ALIAS: &str = "c";

/// Comparison operator used by [`Filter::Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Type-safe predicate over document fields (dot-separated paths).
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document.
    All,
    Compare {
        path: String,
        op: CompareOp,
        value: Value,
    },
    IsDefined {
        path: String,
        defined: bool,
    },
    StartsWith {
        path: String,
        prefix: String,
    },
    EndsWith {
        path: String,
        suffix: String,
    },
    Contains {
        path: String,
        needle: String,
    },
    /// Array field contains `value`.
    ArrayContains {
        path: String,
        value: Value,
    },
    /// Field value is one of `values`.
    In {
        path: String,
        values: Vec<Value>,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn and(self, other: Filter) -> Filter {
        match (self, other) {
            (Filter::All, other) => other,
            (this, Filter::All) => this,
            (Filter::And(mut left), Filter::And(right)) => {
                left.extend(right);
                Filter::And(left)
            }
            (Filter::And(mut left), other) => {
                left.push(other);
                Filter::And(left)
            }
            (this, other) => Filter::And(vec![this, other]),
        }
    }

    pub fn or(self, other: Filter) -> Filter {
        match (self, other) {
            (Filter::All, _) | (_, Filter::All) => Filter::All,
            (Filter::Or(mut left), Filter::Or(right)) => {
                left.extend(right);
                Filter::Or(left)
            }
            (Filter::Or(mut left), other) => {
                left.push(other);
                Filter::Or(left)
            }
            (this, other) => Filter::Or(vec![this, other]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Filter {
        Filter::Not(Box::new(self))
    }

    pub(crate) fn render(&self, binder: &mut ParameterBinder) -> String {
        match self {
            Filter::All => TRUE_LITERAL.to_string(),
            Filter::Compare { path, op, value } => {
                let param = binder.bind(value.clone());
                format!("{} {} {param}", render_path(path), op.as_str())
            }
            Filter::IsDefined { path, defined } => {
                let call = format!("IS_DEFINED({})", render_path(path));
                if *defined {
                    call
                } else {
                    format!("NOT {call}")
                }
            }
            Filter::StartsWith { path, prefix } => {
                let param = binder.bind(Value::String(prefix.clone()));
                format!("STARTSWITH({}, {param})", render_path(path))
            }
            Filter::EndsWith { path, suffix } => {
                let param = binder.bind(Value::String(suffix.clone()));
                format!("ENDSWITH({}, {param})", render_path(path))
            }
            Filter::Contains { path, needle } => {
                let param = binder.bind(Value::String(needle.clone()));
                format!("CONTAINS({}, {param})", render_path(path))
            }
            Filter::ArrayContains { path, value } => {
                let param = binder.bind(value.clone());
                format!("ARRAY_CONTAINS({}, {param})", render_path(path))
            }
            Filter::In { path, values } => {
                let param = binder.bind(Value::Array(values.clone()));
                format!("ARRAY_CONTAINS({param}, {})", render_path(path))
            }
            Filter::And(filters) => render_group(filters, "AND", binder),
            Filter::Or(filters) => render_group(filters, "OR", binder),
            Filter::Not(inner) => format!("NOT ({})", inner.render(binder)),
        }
    }
}

fn render_group(filters: &[Filter], joiner: &str, binder: &mut ParameterBinder) -> String {
    match filters {
        [] => TRUE_LITERAL.to_string(),
        [single] => single.render(binder),
        many => {
            let parts = many
                .iter()
                .map(|filter| filter.render(binder))
                .collect::<Vec<_>>();
            format!("({})", parts.join(&format!(" {joiner} ")))
        }
    }
}

/// Renders a dot path as `c.a.b`, quoting segments that are not identifiers.
pub(crate) fn render_path(path: &str) -> String {
    let mut rendered = String::from(ROOT_ALIAS);
    for segment in path.trim_start_matches('/').split(|c: char| c == '.' || c == '/') {
        if is_identifier(segment) {
            rendered.push('.');
            rendered.push_str(segment);
        } else {
            rendered.push_str("[\"");
            rendered.push_str(&segment.replace('\\', "\\\\").replace('"', "\\\""));
            rendered.push_str("\"]");
        }
    }
    rendered
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Assigns sequential `@pN` names to bound values.
#[derive(Debug, Default)]
pub(crate) struct ParameterBinder {
    parameters: Vec<(String, Value)>,
}

impl ParameterBinder {
    pub(crate) fn bind(&mut self, value: Value) -> String {
        let name = format!("@p{}", self.parameters.len());
        self.parameters.push((name.clone(), value));
        name
    }

    pub(crate) fn into_definition(self, text: String) -> QueryDefinition {
        self.parameters
            .into_iter()
            .fold(QueryDefinition::new(text), |definition, (name, value)| {
                definition.with_parameter(name, value)
            })
    }
}

/// Entry point for building predicates: `field("customerId").eq("c1")`.
pub fn field(path: impl Into<String>) -> Field {
    Field(path.into())
}

/// A document field reference used to build [`Filter`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field(String);

impl Field {
    fn compare(self, op: CompareOp, value: impl Into<Value>) -> Filter {
        Filter::Compare {
            path: self.0,
            op,
            value: value.into(),
        }
    }

    pub fn eq(self, value: impl Into<Value>) -> Filter {
        self.compare(CompareOp::Eq, value)
    }

    pub fn ne(self, value: impl Into<Value>) -> Filter {
        self.compare(CompareOp::Ne, value)
    }

    pub fn lt(self, value: impl Into<Value>) -> Filter {
        self.compare(CompareOp::Lt, value)
    }

    pub fn le(self, value: impl Into<Value>) -> Filter {
        self.compare(CompareOp::Le, value)
    }

    pub fn gt(self, value: impl Into<Value>) -> Filter {
        self.compare(CompareOp::Gt, value)
    }

    pub fn ge(self, value: impl Into<Value>) -> Filter {
        self.compare(CompareOp::Ge, value)
    }

    pub fn is_defined(self) -> Filter {
        Filter::IsDefined {
            path: self.0,
            defined: true,
        }
    }

    pub fn is_undefined(self) -> Filter {
        Filter::IsDefined {
            path: self.0,
            defined: false,
        }
    }

    pub fn starts_with(self, prefix: impl Into<String>) -> Filter {
        Filter::StartsWith {
            path: self.0,
            prefix: prefix.into(),
        }
    }

    pub fn ends_with(self, suffix: impl Into<String>) -> Filter {
        Filter::EndsWith {
            path: self.0,
            suffix: suffix.into(),
        }
    }

    pub fn contains(self, needle: impl Into<String>) -> Filter {
        Filter::Contains {
            path: self.0,
            needle: needle.into(),
        }
    }

    pub fn array_contains(self, value: impl Into<Value>) -> Filter {
        Filter::ArrayContains {
            path: self.0,
            value: value.into(),
        }
    }

    pub fn in_values<I, V>(self, values: I) -> Filter
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Filter::In {
            path: self.0,
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{field, render_path, Filter, ParameterBinder};
    use serde_json::json;

    fn render(filter: &Filter) -> (String, Vec<(String, serde_json::Value)>) {
        let mut binder = ParameterBinder::default();
        let text = filter.render(&mut binder);
        (text, binder.parameters)
    }

    #[test]
    fn and_flattens_and_drops_match_all() {
        let filter = Filter::All
            .and(field("a").eq(1))
            .and(field("b").eq(2))
            .and(Filter::All)
            .and(field("c").eq(3));
        match &filter {
            Filter::And(parts) => assert_eq!(parts.len(), 3),
            other => panic!("expected And, got {other:?}"),
        }
        let (text, params) = render(&filter);
        assert_eq!(text, "(c.a = @p0 AND c.b = @p1 AND c.c = @p2)");
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn or_with_match_all_matches_everything() {
        assert_eq!(field("a").eq(1).or(Filter::All), Filter::All);
    }

    #[test]
    fn renders_functions_and_negation() {
        let filter = field("name")
            .starts_with("re")
            .or(field("tags").array_contains("sale"))
            .and(field("deletedAt").is_undefined())
            .and(field("status").in_values(["open", "held"]).not());
        let (text, params) = render(&filter);
        assert_eq!(
            text,
            "((STARTSWITH(c.name, @p0) OR ARRAY_CONTAINS(c.tags, @p1)) AND NOT IS_DEFINED(c.deletedAt) AND NOT (ARRAY_CONTAINS(@p2, c.status)))"
        );
        assert_eq!(params[2].1, json!(["open", "held"]));
    }

    #[test]
    fn render_path_quotes_non_identifier_segments() {
        assert_eq!(render_path("customer.address.city"), "c.customer.address.city");
        assert_eq!(render_path("/embeddings"), "c.embeddings");
        assert_eq!(render_path("meta.content-type"), "c.meta[\"content-type\"]");
    }
}
