//! In-process evaluator for parsed statements.
//!
//! # Responsibility
//! - Filter, order, project and count JSON documents for the bundled stores.
//! - Page result sets with opaque offset continuations.
//!
//! # Invariants
//! - Missing properties evaluate to "undefined" (`None`), never `null`.
//! - Only `Some(Bool(true))` admits a document through `WHERE`.
//! - `ORDER BY VectorDistance(...)` without a direction yields the most
//!   similar documents first for the configured distance function.

use super::parser::{
    parse, BinaryOp, Expr, OrderItem, PathSegment, Projection, SelectStatement,
};
use super::{QueryDefinition, QueryError, SortOrder};
use crate::options::vector::DistanceFunction;
use crate::store::properties::VectorEmbeddingPolicy;
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Inputs shared by every evaluation of one statement.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    parameters: &'a [(String, Value)],
    vector_policy: Option<&'a VectorEmbeddingPolicy>,
}

impl<'a> EvalContext<'a> {
    pub fn new(
        parameters: &'a [(String, Value)],
        vector_policy: Option<&'a VectorEmbeddingPolicy>,
    ) -> Self {
        Self {
            parameters,
            vector_policy,
        }
    }

    fn parameter(&self, name: &str) -> Result<&'a Value, QueryError> {
        self.parameters
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
            .ok_or_else(|| QueryError::UnboundParameter(name.to_string()))
    }

    fn distance_function(&self, path: Option<String>) -> DistanceFunction {
        let (Some(policy), Some(path)) = (self.vector_policy, path) else {
            return DistanceFunction::default();
        };
        policy
            .embeddings
            .iter()
            .find(|embedding| embedding.path == path)
            .map(|embedding| embedding.distance_function)
            .unwrap_or_default()
    }
}

/// Parses and evaluates `definition` over `documents`.
pub fn run<'d>(
    definition: &QueryDefinition,
    documents: impl IntoIterator<Item = &'d Value>,
    vector_policy: Option<&VectorEmbeddingPolicy>,
) -> Result<Vec<Value>, QueryError> {
    let statement = parse(definition.text())?;
    execute(
        &statement,
        documents,
        EvalContext::new(definition.parameters(), vector_policy),
    )
}

/// Evaluates a parsed statement. Input order is the tie-breaker for sorting.
pub fn execute<'d>(
    statement: &SelectStatement,
    documents: impl IntoIterator<Item = &'d Value>,
    ctx: EvalContext<'_>,
) -> Result<Vec<Value>, QueryError> {
    let mut matched = Vec::new();
    for document in documents {
        let admitted = match &statement.filter {
            Some(filter) => matches!(eval(filter, document, ctx)?, Some(Value::Bool(true))),
            None => true,
        };
        if admitted {
            matched.push(document);
        }
    }

    if let Projection::Count { alias } = &statement.projection {
        let count = Value::from(matched.len());
        if statement.value {
            return Ok(vec![count]);
        }
        let mut row = Map::new();
        row.insert(alias.clone().unwrap_or_else(|| "$1".to_string()), count);
        return Ok(vec![Value::Object(row)]);
    }

    if !statement.order_by.is_empty() {
        matched = sort_documents(matched, &statement.order_by, ctx)?;
    }

    let skip = statement.offset.unwrap_or(0);
    let take = match (statement.limit, statement.top) {
        (Some(limit), Some(top)) => limit.min(top),
        (Some(limit), None) => limit,
        (None, Some(top)) => top,
        (None, None) => usize::MAX,
    };

    matched
        .into_iter()
        .skip(skip)
        .take(take)
        .filter_map(|document| project(statement, document, ctx).transpose())
        .collect()
}

/// Slices `rows` into one page. Continuations are decimal row offsets.
pub fn page_rows(
    rows: Vec<Value>,
    continuation: Option<&str>,
    max_item_count: Option<usize>,
) -> Result<(Vec<Value>, Option<String>), QueryError> {
    let start = match continuation {
        Some(token) => token
            .parse::<usize>()
            .map_err(|_| QueryError::InvalidContinuation(token.to_string()))?,
        None => 0,
    };
    if start > rows.len() {
        return Err(QueryError::InvalidContinuation(start.to_string()));
    }

    let size = max_item_count.filter(|size| *size > 0).unwrap_or(usize::MAX);
    let end = start.saturating_add(size).min(rows.len());
    let next = (end < rows.len()).then(|| end.to_string());
    let page = rows.into_iter().skip(start).take(end - start).collect();
    Ok((page, next))
}

fn sort_documents<'d>(
    documents: Vec<&'d Value>,
    order_by: &[OrderItem],
    ctx: EvalContext<'_>,
) -> Result<Vec<&'d Value>, QueryError> {
    let directions = order_by
        .iter()
        .map(|item| effective_direction(item, ctx))
        .collect::<Vec<_>>();

    let mut keyed = Vec::with_capacity(documents.len());
    for document in documents {
        let keys = order_by
            .iter()
            .map(|item| eval(&item.expr, document, ctx))
            .collect::<Result<Vec<_>, _>>()?;
        keyed.push((keys, document));
    }

    keyed.sort_by(|(left, _), (right, _)| {
        for ((left, right), direction) in left.iter().zip(right).zip(&directions) {
            let ordering = compare_for_sort(left, right);
            let ordering = match direction {
                SortOrder::Ascending => ordering,
                SortOrder::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });

    Ok(keyed.into_iter().map(|(_, document)| document).collect())
}

fn effective_direction(item: &OrderItem, ctx: EvalContext<'_>) -> SortOrder {
    if let Some(direction) = item.direction {
        return direction;
    }
    match &item.expr {
        Expr::Call { name, args } if name == "VECTORDISTANCE" => {
            let function = ctx.distance_function(args.first().and_then(document_path));
            if function.higher_is_closer() {
                SortOrder::Descending
            } else {
                SortOrder::Ascending
            }
        }
        _ => SortOrder::Ascending,
    }
}

fn project(
    statement: &SelectStatement,
    document: &Value,
    ctx: EvalContext<'_>,
) -> Result<Option<Value>, QueryError> {
    let items = match &statement.projection {
        Projection::Star => return Ok(Some(document.clone())),
        Projection::Count { .. } => return Ok(None),
        Projection::Items(items) => items,
    };

    if statement.value {
        return match items.first() {
            Some(item) => eval(&item.expr, document, ctx),
            None => Ok(None),
        };
    }

    let mut row = Map::new();
    for (index, item) in items.iter().enumerate() {
        let Some(value) = eval(&item.expr, document, ctx)? else {
            continue;
        };
        let name = match (&item.alias, &item.expr) {
            (Some(alias), _) => alias.clone(),
            (None, Expr::Path { segments, .. }) => match segments.last() {
                Some(PathSegment::Field(name)) => name.clone(),
                _ => format!("${}", index + 1),
            },
            _ => format!("${}", index + 1),
        };
        row.insert(name, value);
    }
    Ok(Some(Value::Object(row)))
}

/// Evaluates `expr` against one document. `None` is "undefined".
fn eval(expr: &Expr, document: &Value, ctx: EvalContext<'_>) -> Result<Option<Value>, QueryError> {
    match expr {
        Expr::Literal(value) => Ok(Some(value.clone())),
        Expr::Parameter(name) => ctx.parameter(name).map(|value| Some(value.clone())),
        Expr::Path { segments, .. } => Ok(resolve_path(document, segments).cloned()),
        Expr::Not(inner) => Ok(match eval(inner, document, ctx)? {
            Some(Value::Bool(value)) => Some(Value::Bool(!value)),
            _ => None,
        }),
        Expr::Binary { op, left, right } => {
            let left = eval(left, document, ctx)?;
            let right = eval(right, document, ctx)?;
            Ok(binary(*op, left, right))
        }
        Expr::In {
            expr,
            list,
            negated,
        } => {
            let Some(needle) = eval(expr, document, ctx)? else {
                return Ok(None);
            };
            let mut found = false;
            for candidate in list {
                if let Some(candidate) = eval(candidate, document, ctx)? {
                    if values_equal(&needle, &candidate) {
                        found = true;
                        break;
                    }
                }
            }
            Ok(Some(Value::Bool(found != *negated)))
        }
        Expr::Call { name, args } => call(name, args, document, ctx),
    }
}

fn resolve_path<'v>(document: &'v Value, segments: &[PathSegment]) -> Option<&'v Value> {
    segments
        .iter()
        .try_fold(document, |current, segment| match segment {
            PathSegment::Field(name) => current.as_object()?.get(name),
            PathSegment::Index(index) => current.as_array()?.get(*index),
        })
}

/// Renders a path expression as a `/a/b` document path.
fn document_path(expr: &Expr) -> Option<String> {
    let Expr::Path { segments, .. } = expr else {
        return None;
    };
    let mut path = String::new();
    for segment in segments {
        match segment {
            PathSegment::Field(name) => {
                path.push('/');
                path.push_str(name);
            }
            PathSegment::Index(_) => return None,
        }
    }
    Some(path)
}

fn binary(op: BinaryOp, left: Option<Value>, right: Option<Value>) -> Option<Value> {
    match op {
        BinaryOp::And => match (left, right) {
            (Some(Value::Bool(false)), _) | (_, Some(Value::Bool(false))) => {
                Some(Value::Bool(false))
            }
            (Some(Value::Bool(true)), Some(Value::Bool(true))) => Some(Value::Bool(true)),
            _ => None,
        },
        BinaryOp::Or => match (left, right) {
            (Some(Value::Bool(true)), _) | (_, Some(Value::Bool(true))) => Some(Value::Bool(true)),
            (Some(Value::Bool(false)), Some(Value::Bool(false))) => Some(Value::Bool(false)),
            _ => None,
        },
        BinaryOp::Eq | BinaryOp::Ne => {
            let (left, right) = (left?, right?);
            let equal = values_equal(&left, &right);
            Some(Value::Bool(if op == BinaryOp::Eq { equal } else { !equal }))
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare_same_type(&left?, &right?)?;
            let result = match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            Some(Value::Bool(result))
        }
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(left), Value::Number(right)) => left.as_f64() == right.as_f64(),
        _ => left == right,
    }
}

/// Orders two values of the same scalar type; `None` across types.
fn compare_same_type(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(left), Value::Number(right)) => left.as_f64()?.partial_cmp(&right.as_f64()?),
        (Value::String(left), Value::String(right)) => Some(left.cmp(right)),
        (Value::Bool(left), Value::Bool(right)) => Some(left.cmp(right)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Total order used by `ORDER BY`: undefined, null, bool, number, string, other.
fn compare_for_sort(left: &Option<Value>, right: &Option<Value>) -> Ordering {
    fn rank(value: &Option<Value>) -> u8 {
        match value {
            None => 0,
            Some(Value::Null) => 1,
            Some(Value::Bool(_)) => 2,
            Some(Value::Number(_)) => 3,
            Some(Value::String(_)) => 4,
            Some(_) => 5,
        }
    }

    rank(left).cmp(&rank(right)).then_with(|| match (left, right) {
        (Some(left), Some(right)) => compare_same_type(left, right).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    })
}

fn call(
    name: &str,
    args: &[Expr],
    document: &Value,
    ctx: EvalContext<'_>,
) -> Result<Option<Value>, QueryError> {
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(eval(arg, document, ctx)?);
    }

    let result = match name {
        "IS_DEFINED" => {
            expect_arity("IS_DEFINED", &values, 1, 1)?;
            Some(Value::Bool(values[0].is_some()))
        }
        "IS_NULL" => {
            expect_arity("IS_NULL", &values, 1, 1)?;
            Some(Value::Bool(matches!(values[0], Some(Value::Null))))
        }
        "STARTSWITH" => string_predicate("STARTSWITH", &values, |s, p| s.starts_with(p))?,
        "ENDSWITH" => string_predicate("ENDSWITH", &values, |s, p| s.ends_with(p))?,
        "CONTAINS" => string_predicate("CONTAINS", &values, |s, p| s.contains(p))?,
        "LOWER" => {
            expect_arity("LOWER", &values, 1, 1)?;
            values[0]
                .as_ref()
                .and_then(Value::as_str)
                .map(|text| Value::String(text.to_lowercase()))
        }
        "UPPER" => {
            expect_arity("UPPER", &values, 1, 1)?;
            values[0]
                .as_ref()
                .and_then(Value::as_str)
                .map(|text| Value::String(text.to_uppercase()))
        }
        "ARRAY_LENGTH" => {
            expect_arity("ARRAY_LENGTH", &values, 1, 1)?;
            values[0]
                .as_ref()
                .and_then(Value::as_array)
                .map(|items| Value::from(items.len()))
        }
        "ARRAY_CONTAINS" => {
            expect_arity("ARRAY_CONTAINS", &values, 2, 3)?;
            let partial = matches!(values.get(2), Some(Some(Value::Bool(true))));
            match (&values[0], &values[1]) {
                (Some(Value::Array(items)), Some(needle)) => Some(Value::Bool(
                    items
                        .iter()
                        .any(|item| values_equal(item, needle) || (partial && is_subset(needle, item))),
                )),
                _ => None,
            }
        }
        "VECTORDISTANCE" => {
            expect_arity("VECTORDISTANCE", &values, 2, 4)?;
            let function = ctx.distance_function(args.first().and_then(document_path));
            match (numeric_vector(&values[0]), numeric_vector(&values[1])) {
                (Some(left), Some(right)) if left.is_empty() || right.is_empty() => None,
                (Some(left), Some(right)) => {
                    if left.len() != right.len() {
                        return Err(QueryError::InvalidArguments {
                            function: "VectorDistance",
                            message: format!(
                                "vector lengths differ ({} vs {})",
                                left.len(),
                                right.len()
                            ),
                        });
                    }
                    serde_json::Number::from_f64(vector_distance(function, &left, &right))
                        .map(Value::Number)
                }
                _ => None,
            }
        }
        other => return Err(QueryError::UnsupportedFunction(other.to_string())),
    };
    Ok(result)
}

fn expect_arity(
    function: &'static str,
    values: &[Option<Value>],
    min: usize,
    max: usize,
) -> Result<(), QueryError> {
    if (min..=max).contains(&values.len()) {
        Ok(())
    } else {
        Err(QueryError::InvalidArguments {
            function,
            message: format!("expected {min}..={max} arguments, got {}", values.len()),
        })
    }
}

fn string_predicate(
    function: &'static str,
    values: &[Option<Value>],
    predicate: impl Fn(&str, &str) -> bool,
) -> Result<Option<Value>, QueryError> {
    expect_arity(function, values, 2, 3)?;
    let ignore_case = matches!(values.get(2), Some(Some(Value::Bool(true))));
    let (Some(Value::String(text)), Some(Value::String(pattern))) = (&values[0], &values[1]) else {
        return Ok(None);
    };
    let matched = if ignore_case {
        predicate(&text.to_lowercase(), &pattern.to_lowercase())
    } else {
        predicate(text, pattern)
    };
    Ok(Some(Value::Bool(matched)))
}

fn is_subset(needle: &Value, candidate: &Value) -> bool {
    match (needle, candidate) {
        (Value::Object(needle), Value::Object(candidate)) => needle.iter().all(|(key, value)| {
            candidate
                .get(key)
                .is_some_and(|existing| values_equal(existing, value))
        }),
        _ => false,
    }
}

fn numeric_vector(value: &Option<Value>) -> Option<Vec<f64>> {
    value
        .as_ref()?
        .as_array()?
        .iter()
        .map(Value::as_f64)
        .collect()
}

fn vector_distance(function: DistanceFunction, left: &[f64], right: &[f64]) -> f64 {
    let dot = left.iter().zip(right).map(|(a, b)| a * b).sum::<f64>();
    match function {
        DistanceFunction::DotProduct => dot,
        DistanceFunction::Euclidean => left
            .iter()
            .zip(right)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt(),
        DistanceFunction::Cosine => {
            let norm = |values: &[f64]| values.iter().map(|v| v * v).sum::<f64>().sqrt();
            let denominator = norm(left) * norm(right);
            if denominator == 0.0 {
                0.0
            } else {
                dot / denominator
            }
        }
    }
}
