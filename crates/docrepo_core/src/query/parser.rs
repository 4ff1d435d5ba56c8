//! Recursive-descent parser for the supported store SQL subset.
//!
//! ```text
//! SELECT [TOP n] [VALUE] (* | COUNT(1) | expr [AS alias], ...)
//! FROM <alias> [WHERE expr] [ORDER BY expr [ASC|DESC], ...] [OFFSET n LIMIT m]
//! ```

use super::{QueryError, SortOrder};
use serde_json::Value;

/// Parsed `SELECT` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub top: Option<usize>,
    pub value: bool,
    pub projection: Projection,
    pub alias: String,
    pub filter: Option<Expr>,
    pub order_by: Vec<OrderItem>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Star,
    Count { alias: Option<String> },
    Items(Vec<ProjectionItem>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: Expr,
    /// `None` when the statement gave no explicit direction.
    pub direction: Option<SortOrder>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Parameter(String),
    Path {
        root: String,
        segments: Vec<PathSegment>,
    },
    Not(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Function call; `name` is upper-cased.
    Call {
        name: String,
        args: Vec<Expr>,
    },
    In {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(Value),
    Str(String),
    Param(String),
    Symbol(&'static str),
}

const SYMBOLS: &[&str] = &[
    "<=", ">=", "!=", "<>", "*", ",", "(", ")", ".", "[", "]", "=", "<", ">", "-",
];

/// Parses `text` into a [`SelectStatement`].
pub fn parse(text: &str) -> Result<SelectStatement, QueryError> {
    let tokens = tokenize(text)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: text.len(),
    };
    let statement = parser.select()?;
    if let Some((_, offset)) = parser.tokens.get(parser.pos) {
        return Err(syntax(*offset, "unexpected trailing input"));
    }
    validate_roots(&statement)?;
    Ok(statement)
}

fn syntax(offset: usize, message: impl Into<String>) -> QueryError {
    QueryError::Syntax {
        offset,
        message: message.into(),
    }
}

fn tokenize(text: &str) -> Result<Vec<(Token, usize)>, QueryError> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        let start = i;
        if c.is_ascii_alphabetic() || c == '_' {
            while i < bytes.len() && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
            {
                i += 1;
            }
            tokens.push((Token::Ident(text[start..i].to_string()), start));
        } else if c == '@' {
            i += 1;
            while i < bytes.len() && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
            {
                i += 1;
            }
            if i == start + 1 {
                return Err(syntax(start, "parameter name expected after `@`"));
            }
            tokens.push((Token::Param(text[start..i].to_string()), start));
        } else if c.is_ascii_digit() {
            let mut is_float = false;
            while i < bytes.len() && (bytes[i].is_ascii_digit() || (bytes[i] == b'.' && !is_float))
            {
                if bytes[i] == b'.' {
                    is_float = true;
                }
                i += 1;
            }
            let literal = &text[start..i];
            let number = if is_float {
                literal
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
            } else {
                literal.parse::<i64>().ok().map(Value::from)
            };
            let number = number.ok_or_else(|| syntax(start, format!("invalid number `{literal}`")))?;
            tokens.push((Token::Number(number), start));
        } else if c == '\'' || c == '"' {
            let (value, next) = read_string(text, start, c)?;
            tokens.push((Token::Str(value), start));
            i = next;
        } else {
            let rest = &text[i..];
            let symbol = SYMBOLS
                .iter()
                .find(|symbol| rest.starts_with(**symbol))
                .ok_or_else(|| syntax(start, format!("unexpected character `{c}`")))?;
            i += symbol.len();
            tokens.push((Token::Symbol(*symbol), start));
        }
    }

    Ok(tokens)
}

fn read_string(text: &str, start: usize, quote: char) -> Result<(String, usize), QueryError> {
    let mut value = String::new();
    let mut chars = text[start + 1..].char_indices();
    while let Some((offset, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, 'n')) => value.push('\n'),
                Some((_, 't')) => value.push('\t'),
                Some((_, escaped)) => value.push(escaped),
                None => break,
            },
            c if c == quote => return Ok((value, start + 1 + offset + c.len_utf8())),
            c => value.push(c),
        }
    }
    Err(syntax(start, "unterminated string literal"))
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(token, _)| token)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map_or(self.end, |(_, offset)| *offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(token, _)| token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(ident)) if ident.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), QueryError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(syntax(self.offset(), format!("expected `{keyword}`")))
        }
    }

    fn eat_symbol(&mut self, symbol: &str) -> bool {
        if matches!(self.peek(), Some(Token::Symbol(s)) if *s == symbol) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, symbol: &str) -> Result<(), QueryError> {
        if self.eat_symbol(symbol) {
            Ok(())
        } else {
            Err(syntax(self.offset(), format!("expected `{symbol}`")))
        }
    }

    fn identifier(&mut self) -> Result<String, QueryError> {
        match self.advance() {
            Some(Token::Ident(ident)) if !is_reserved(&ident) => Ok(ident),
            _ => Err(syntax(self.offset(), "identifier expected")),
        }
    }

    fn unsigned(&mut self) -> Result<usize, QueryError> {
        let offset = self.offset();
        match self.advance() {
            Some(Token::Number(Value::Number(number))) => number
                .as_u64()
                .and_then(|value| usize::try_from(value).ok())
                .ok_or_else(|| syntax(offset, "non-negative integer expected")),
            _ => Err(syntax(offset, "integer expected")),
        }
    }

    fn select(&mut self) -> Result<SelectStatement, QueryError> {
        self.expect_keyword("SELECT")?;
        let top = if self.eat_keyword("TOP") {
            Some(self.unsigned()?)
        } else {
            None
        };
        let value = self.eat_keyword("VALUE");
        let projection = self.projection()?;

        self.expect_keyword("FROM")?;
        let alias = self.identifier()?;

        let filter = if self.eat_keyword("WHERE") {
            Some(self.expr()?)
        } else {
            None
        };

        let mut order_by = Vec::new();
        if self.eat_keyword("ORDER") {
            self.expect_keyword("BY")?;
            loop {
                let expr = self.expr()?;
                let direction = if self.eat_keyword("ASC") {
                    Some(SortOrder::Ascending)
                } else if self.eat_keyword("DESC") {
                    Some(SortOrder::Descending)
                } else {
                    None
                };
                order_by.push(OrderItem { expr, direction });
                if !self.eat_symbol(",") {
                    break;
                }
            }
        }

        let (offset, limit) = if self.eat_keyword("OFFSET") {
            let offset = self.unsigned()?;
            self.expect_keyword("LIMIT")?;
            (Some(offset), Some(self.unsigned()?))
        } else {
            (None, None)
        };

        Ok(SelectStatement {
            top,
            value,
            projection,
            alias,
            filter,
            order_by,
            offset,
            limit,
        })
    }

    fn projection(&mut self) -> Result<Projection, QueryError> {
        if self.eat_symbol("*") {
            return Ok(Projection::Star);
        }

        let mut items = Vec::new();
        loop {
            let expr = self.expr()?;
            let alias = if self.eat_keyword("AS") {
                Some(self.identifier()?)
            } else {
                None
            };
            items.push(ProjectionItem { expr, alias });
            if !self.eat_symbol(",") {
                break;
            }
        }

        if let [ProjectionItem {
            expr: Expr::Call { name, .. },
            alias,
        }] = items.as_slice()
        {
            if name == "COUNT" {
                return Ok(Projection::Count {
                    alias: alias.clone(),
                });
            }
        }
        Ok(Projection::Items(items))
    }

    fn expr(&mut self) -> Result<Expr, QueryError> {
        let mut left = self.and_expr()?;
        while self.eat_keyword("OR") {
            let right = self.and_expr()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, QueryError> {
        let mut left = self.not_expr()?;
        while self.eat_keyword("AND") {
            let right = self.not_expr()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, QueryError> {
        if self.eat_keyword("NOT") {
            return Ok(Expr::Not(Box::new(self.not_expr()?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, QueryError> {
        let left = self.primary()?;

        let negated = self.peek_keyword("NOT")
            && matches!(self.tokens.get(self.pos + 1), Some((Token::Ident(next), _)) if next.eq_ignore_ascii_case("IN"));
        if negated {
            self.pos += 1;
        }
        if self.eat_keyword("IN") {
            self.expect_symbol("(")?;
            let mut list = vec![self.expr()?];
            while self.eat_symbol(",") {
                list.push(self.expr()?);
            }
            self.expect_symbol(")")?;
            return Ok(Expr::In {
                expr: Box::new(left),
                list,
                negated,
            });
        }

        let op = match self.peek() {
            Some(Token::Symbol("=")) => BinaryOp::Eq,
            Some(Token::Symbol("!=")) | Some(Token::Symbol("<>")) => BinaryOp::Ne,
            Some(Token::Symbol("<")) => BinaryOp::Lt,
            Some(Token::Symbol("<=")) => BinaryOp::Le,
            Some(Token::Symbol(">")) => BinaryOp::Gt,
            Some(Token::Symbol(">=")) => BinaryOp::Ge,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.primary()?;
        Ok(binary(op, left, right))
    }

    fn primary(&mut self) -> Result<Expr, QueryError> {
        let offset = self.offset();
        match self.advance() {
            Some(Token::Number(number)) => Ok(Expr::Literal(number)),
            Some(Token::Str(value)) => Ok(Expr::Literal(Value::String(value))),
            Some(Token::Param(name)) => Ok(Expr::Parameter(name)),
            Some(Token::Symbol("-")) => match self.advance() {
                Some(Token::Number(Value::Number(number))) => {
                    let negated = if let Some(value) = number.as_i64() {
                        Value::from(-value)
                    } else {
                        number
                            .as_f64()
                            .and_then(|value| serde_json::Number::from_f64(-value))
                            .map_or(Value::Null, Value::Number)
                    };
                    Ok(Expr::Literal(negated))
                }
                _ => Err(syntax(offset, "number expected after `-`")),
            },
            Some(Token::Symbol("(")) => {
                let inner = self.expr()?;
                self.expect_symbol(")")?;
                Ok(inner)
            }
            Some(Token::Ident(ident)) => {
                if ident.eq_ignore_ascii_case("true") {
                    return Ok(Expr::Literal(Value::Bool(true)));
                }
                if ident.eq_ignore_ascii_case("false") {
                    return Ok(Expr::Literal(Value::Bool(false)));
                }
                if ident.eq_ignore_ascii_case("null") {
                    return Ok(Expr::Literal(Value::Null));
                }
                if self.eat_symbol("(") {
                    return self.call(ident);
                }
                if is_reserved(&ident) {
                    return Err(syntax(offset, format!("unexpected keyword `{ident}`")));
                }
                self.path(ident)
            }
            _ => Err(syntax(offset, "expression expected")),
        }
    }

    fn call(&mut self, name: String) -> Result<Expr, QueryError> {
        let mut args = Vec::new();
        if !self.eat_symbol(")") {
            loop {
                args.push(self.expr()?);
                if !self.eat_symbol(",") {
                    break;
                }
            }
            self.expect_symbol(")")?;
        }
        Ok(Expr::Call {
            name: name.to_ascii_uppercase(),
            args,
        })
    }

    fn path(&mut self, root: String) -> Result<Expr, QueryError> {
        let mut segments = Vec::new();
        loop {
            if self.eat_symbol(".") {
                segments.push(PathSegment::Field(self.identifier()?));
            } else if self.eat_symbol("[") {
                let offset = self.offset();
                let segment = match self.advance() {
                    Some(Token::Str(name)) => PathSegment::Field(name),
                    Some(Token::Number(Value::Number(index))) => index
                        .as_u64()
                        .and_then(|value| usize::try_from(value).ok())
                        .map(PathSegment::Index)
                        .ok_or_else(|| syntax(offset, "array index must be a non-negative integer"))?,
                    _ => return Err(syntax(offset, "property name or index expected")),
                };
                self.expect_symbol("]")?;
                segments.push(segment);
            } else {
                break;
            }
        }
        Ok(Expr::Path { root, segments })
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn is_reserved(ident: &str) -> bool {
    const RESERVED: &[&str] = &[
        "SELECT", "TOP", "VALUE", "FROM", "WHERE", "ORDER", "BY", "ASC", "DESC", "AND", "OR",
        "NOT", "IN", "AS", "OFFSET", "LIMIT",
    ];
    RESERVED
        .iter()
        .any(|keyword| keyword.eq_ignore_ascii_case(ident))
}

fn validate_roots(statement: &SelectStatement) -> Result<(), QueryError> {
    let mut exprs: Vec<&Expr> = Vec::new();
    if let Projection::Items(items) = &statement.projection {
        exprs.extend(items.iter().map(|item| &item.expr));
    }
    exprs.extend(statement.filter.iter());
    exprs.extend(statement.order_by.iter().map(|item| &item.expr));

    while let Some(expr) = exprs.pop() {
        match expr {
            Expr::Path { root, .. } if *root != statement.alias => {
                return Err(syntax(
                    0,
                    format!("identifier `{root}` does not match source alias `{}`", statement.alias),
                ));
            }
            Expr::Not(inner) => exprs.push(inner),
            Expr::Binary { left, right, .. } => {
                exprs.push(left);
                exprs.push(right);
            }
            Expr::Call { args, .. } => exprs.extend(args.iter()),
            Expr::In { expr, list, .. } => {
                exprs.push(expr);
                exprs.extend(list.iter());
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{parse, BinaryOp, Expr, PathSegment, Projection};
    use crate::query::{QueryError, SortOrder};
    use serde_json::json;

    #[test]
    fn parses_star_with_where_and_order() {
        let statement = parse(
            "SELECT * FROM c WHERE c.type = @p0 AND c.total >= 10.5 ORDER BY c.total DESC, c.id",
        )
        .expect("valid query");

        assert_eq!(statement.projection, Projection::Star);
        assert_eq!(statement.alias, "c");
        assert_eq!(statement.order_by.len(), 2);
        assert_eq!(statement.order_by[0].direction, Some(SortOrder::Descending));
        assert_eq!(statement.order_by[1].direction, None);
        match statement.filter.expect("where clause") {
            Expr::Binary {
                op: BinaryOp::And,
                right,
                ..
            } => assert_eq!(
                *right,
                Expr::Binary {
                    op: BinaryOp::Ge,
                    left: Box::new(Expr::Path {
                        root: "c".to_string(),
                        segments: vec![PathSegment::Field("total".to_string())],
                    }),
                    right: Box::new(Expr::Literal(json!(10.5))),
                }
            ),
            other => panic!("unexpected filter {other:?}"),
        }
    }

    #[test]
    fn parses_vector_similarity_query() {
        let statement = parse(
            "SELECT TOP 5 c.id, VectorDistance(c.embeddings, @vector) AS score FROM c ORDER BY VectorDistance(c.embeddings, @vector, false)",
        )
        .expect("valid vector query");

        assert_eq!(statement.top, Some(5));
        let Projection::Items(items) = &statement.projection else {
            panic!("expected projection items");
        };
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].alias.as_deref(), Some("score"));
        assert!(matches!(&items[1].expr, Expr::Call { name, args } if name == "VECTORDISTANCE" && args.len() == 2));
        assert!(matches!(&statement.order_by[0].expr, Expr::Call { args, .. } if args.len() == 3));
    }

    #[test]
    fn parses_count_value_and_offset_limit() {
        let statement =
            parse("select value count(1) from root r where r.a != 'x' offset 2 limit 3").expect("valid");
        assert!(statement.value);
        assert_eq!(statement.projection, Projection::Count { alias: None });
        assert_eq!(statement.offset, Some(2));
        assert_eq!(statement.limit, Some(3));
    }

    #[test]
    fn parses_in_lists_and_bracket_paths() {
        let statement = parse("SELECT * FROM c WHERE c[\"content-type\"] NOT IN ('a', \"b\") AND c.tags[0] = -1")
            .expect("valid");
        let Some(Expr::Binary { left, .. }) = statement.filter else {
            panic!("expected conjunction");
        };
        assert!(matches!(*left, Expr::In { negated: true, ref list, .. } if list.len() == 2));
    }

    #[test]
    fn rejects_mismatched_alias_and_garbage() {
        assert!(matches!(
            parse("SELECT * FROM c WHERE d.id = 1"),
            Err(QueryError::Syntax { .. })
        ));
        assert!(matches!(
            parse("SELECT * FROM c WHERE"),
            Err(QueryError::Syntax { .. })
        ));
        assert!(matches!(
            parse("SELECT * FROM c WHERE c.a = 'open"),
            Err(QueryError::Syntax { .. })
        ));
        assert!(matches!(
            parse("SELECT * FROM c extra"),
            Err(QueryError::Syntax { .. })
        ));
    }
}
