//! Path expressions selecting parts of a JSON payload.
//!
//! Supported syntax is a subset of JMESPath:
//!
//! | Form | Example |
//! |------|---------|
//! | field / sub-expression | `body.user.id` |
//! | quoted field | `headers."x-request-id"` |
//! | index (negative from end) | `records[0]`, `records[-1]` |
//! | current node | `@` |
//! | multiselect list | `[user, order.id]` |
//! | multiselect hash | `{user: user, order: order.id}` |
//! | JSON-in-string decode | `powertools_json(body).address` |
//!
//! Missing fields and type mismatches evaluate to `null`.

use std::iter::Peekable;
use std::str::Chars;

use serde_json::{Map, Value};

use crate::error::{IdempotencyError, Result};

/// Name of the function decoding a JSON document held in a string.
pub const JSON_DECODE_FUNCTION: &str = "powertools_json";

/// A parsed path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathExpr {
    /// `@`
    Current,
    /// `name` or `"quoted name"`
    Field(String),
    /// `[n]`
    Index(i64),
    /// `[a, b]`
    MultiList(Vec<PathExpr>),
    /// `{x: a, y: b}`
    MultiHash(Vec<(String, PathExpr)>),
    /// `powertools_json(expr)`
    JsonDecode(Box<PathExpr>),
    /// `lhs.rhs` or `lhs[n]`: evaluate `rhs` against the result of `lhs`.
    Sub(Box<PathExpr>, Box<PathExpr>),
}

impl PathExpr {
    /// Parse an expression.
    ///
    /// # Errors
    ///
    /// Returns [`IdempotencyError::Configuration`] on a syntax error or an
    /// unknown function name.
    pub fn parse(source: &str) -> Result<Self> {
        let mut parser = Parser {
            chars: source.chars().peekable(),
            source,
        };
        let expr = parser.parse_expression()?;
        parser.skip_ws();
        match parser.chars.next() {
            None => Ok(expr),
            Some(c) => Err(parser.error(&format!("unexpected trailing character '{c}'"))),
        }
    }

    /// Evaluate against `value`.
    ///
    /// # Errors
    ///
    /// Returns [`IdempotencyError::Key`] when `powertools_json` is applied to
    /// something that is not a JSON document in a string.
    pub fn evaluate(&self, value: &Value) -> Result<Value> {
        match self {
            Self::Current => Ok(value.clone()),
            Self::Field(name) => Ok(value
                .as_object()
                .and_then(|map| map.get(name))
                .cloned()
                .unwrap_or(Value::Null)),
            Self::Index(index) => Ok(value
                .as_array()
                .and_then(|items| resolve_index(items.len(), *index).and_then(|i| items.get(i)))
                .cloned()
                .unwrap_or(Value::Null)),
            Self::MultiList(exprs) => {
                if value.is_null() {
                    return Ok(Value::Null);
                }
                exprs
                    .iter()
                    .map(|expr| expr.evaluate(value))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::Array)
            }
            Self::MultiHash(entries) => {
                if value.is_null() {
                    return Ok(Value::Null);
                }
                entries
                    .iter()
                    .map(|(key, expr)| expr.evaluate(value).map(|v| (key.clone(), v)))
                    .collect::<Result<Map<String, Value>>>()
                    .map(Value::Object)
            }
            Self::JsonDecode(arg) => match arg.evaluate(value)? {
                Value::Null => Ok(Value::Null),
                Value::String(text) => serde_json::from_str(&text).map_err(|e| {
                    IdempotencyError::key(format!("{JSON_DECODE_FUNCTION}: invalid JSON: {e}"))
                }),
                other => Err(IdempotencyError::key(format!(
                    "{JSON_DECODE_FUNCTION}: expected a string, got {}",
                    type_name(&other)
                ))),
            },
            Self::Sub(lhs, rhs) => {
                let left = lhs.evaluate(value)?;
                if left.is_null() {
                    Ok(Value::Null)
                } else {
                    rhs.evaluate(&left)
                }
            }
        }
    }
}

fn resolve_index(len: usize, index: i64) -> Option<usize> {
    if index >= 0 {
        usize::try_from(index).ok()
    } else {
        i64::try_from(len)
            .ok()
            .and_then(|len| len.checked_add(index))
            .and_then(|i| usize::try_from(i).ok())
    }
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

struct Parser<'a> {
    chars: Peekable<Chars<'a>>,
    source: &'a str,
}

impl Parser<'_> {
    fn error(&self, reason: &str) -> IdempotencyError {
        IdempotencyError::configuration(format!("invalid path '{}': {reason}", self.source))
    }

    fn skip_ws(&mut self) {
        while self.chars.next_if(|c| c.is_whitespace()).is_some() {}
    }

    fn expect(&mut self, wanted: char) -> Result<()> {
        self.skip_ws();
        match self.chars.next() {
            Some(c) if c == wanted => Ok(()),
            Some(c) => Err(self.error(&format!("expected '{wanted}', found '{c}'"))),
            None => Err(self.error(&format!("expected '{wanted}', found end of input"))),
        }
    }

    fn parse_expression(&mut self) -> Result<PathExpr> {
        let mut expr = self.parse_term()?;
        loop {
            self.skip_ws();
            match self.chars.peek() {
                Some('.') => {
                    self.chars.next();
                    let step = self.parse_term()?;
                    expr = PathExpr::Sub(Box::new(expr), Box::new(step));
                }
                Some('[') => {
                    self.chars.next();
                    let index = self.parse_index()?;
                    expr = PathExpr::Sub(Box::new(expr), Box::new(PathExpr::Index(index)));
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_term(&mut self) -> Result<PathExpr> {
        self.skip_ws();
        match self.chars.peek().copied() {
            Some('@') => {
                self.chars.next();
                Ok(PathExpr::Current)
            }
            Some('[') => {
                self.chars.next();
                self.skip_ws();
                if matches!(self.chars.peek(), Some(c) if c.is_ascii_digit() || *c == '-') {
                    self.parse_index().map(PathExpr::Index)
                } else {
                    self.parse_multi_list()
                }
            }
            Some('{') => {
                self.chars.next();
                self.parse_multi_hash()
            }
            Some('"') => self.parse_quoted().map(PathExpr::Field),
            Some(c) if is_ident_start(c) => {
                let name = self.parse_identifier();
                self.skip_ws();
                if self.chars.next_if_eq(&'(').is_some() {
                    self.parse_function(&name)
                } else {
                    Ok(PathExpr::Field(name))
                }
            }
            Some(c) => Err(self.error(&format!("unexpected character '{c}'"))),
            None => Err(self.error("unexpected end of input")),
        }
    }

    /// Parses `n]` after an opening bracket.
    fn parse_index(&mut self) -> Result<i64> {
        self.skip_ws();
        let mut digits = String::new();
        if let Some(sign) = self.chars.next_if_eq(&'-') {
            digits.push(sign);
        }
        while let Some(d) = self.chars.next_if(char::is_ascii_digit) {
            digits.push(d);
        }
        let index = digits
            .parse::<i64>()
            .map_err(|_| self.error(&format!("invalid index '{digits}'")))?;
        self.expect(']')?;
        Ok(index)
    }

    fn parse_multi_list(&mut self) -> Result<PathExpr> {
        let mut items = Vec::new();
        loop {
            items.push(self.parse_expression()?);
            self.skip_ws();
            match self.chars.next() {
                Some(',') => {}
                Some(']') => return Ok(PathExpr::MultiList(items)),
                Some(c) => return Err(self.error(&format!("expected ',' or ']', found '{c}'"))),
                None => return Err(self.error("unterminated multiselect list")),
            }
        }
    }

    fn parse_multi_hash(&mut self) -> Result<PathExpr> {
        let mut entries = Vec::new();
        loop {
            self.skip_ws();
            let key = match self.chars.peek().copied() {
                Some('"') => self.parse_quoted()?,
                Some(c) if is_ident_start(c) => self.parse_identifier(),
                _ => return Err(self.error("expected a key in multiselect hash")),
            };
            self.expect(':')?;
            entries.push((key, self.parse_expression()?));
            self.skip_ws();
            match self.chars.next() {
                Some(',') => {}
                Some('}') => return Ok(PathExpr::MultiHash(entries)),
                Some(c) => return Err(self.error(&format!("expected ',' or '}}', found '{c}'"))),
                None => return Err(self.error("unterminated multiselect hash")),
            }
        }
    }

    fn parse_function(&mut self, name: &str) -> Result<PathExpr> {
        if name != JSON_DECODE_FUNCTION {
            return Err(self.error(&format!("unknown function '{name}'")));
        }
        let arg = self.parse_expression()?;
        self.expect(')')?;
        Ok(PathExpr::JsonDecode(Box::new(arg)))
    }

    fn parse_identifier(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self.chars.next_if(|c| c.is_ascii_alphanumeric() || *c == '_') {
            name.push(c);
        }
        name
    }

    fn parse_quoted(&mut self) -> Result<String> {
        self.chars.next();
        let mut name = String::new();
        loop {
            match self.chars.next() {
                Some('"') => return Ok(name),
                Some('\\') => match self.chars.next() {
                    Some(escaped) => name.push(escaped),
                    None => return Err(self.error("unterminated escape")),
                },
                Some(c) => name.push(c),
                None => return Err(self.error("unterminated quoted identifier")),
            }
        }
    }
}

const fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(path: &str, value: &Value) -> Result<Value> {
        PathExpr::parse(path)?.evaluate(value)
    }

    #[test]
    fn test_field_chain() {
        let payload = json!({"body": {"user": {"id": "u-1"}}});
        assert_eq!(eval("body.user.id", &payload), Ok(json!("u-1")));
        assert_eq!(eval("body.missing.id", &payload), Ok(Value::Null));
        assert_eq!(eval("body.user.id.deeper", &payload), Ok(Value::Null));
    }

    #[test]
    fn test_quoted_field() {
        let payload = json!({"headers": {"x-request-id": "r-9"}});
        assert_eq!(eval(r#"headers."x-request-id""#, &payload), Ok(json!("r-9")));
    }

    #[test]
    fn test_index() {
        let payload = json!({"records": [{"id": 1}, {"id": 2}, {"id": 3}]});
        assert_eq!(eval("records[0].id", &payload), Ok(json!(1)));
        assert_eq!(eval("records[-1].id", &payload), Ok(json!(3)));
        assert_eq!(eval("records[7].id", &payload), Ok(Value::Null));
        assert_eq!(eval("records[-4]", &payload), Ok(Value::Null));
    }

    #[test]
    fn test_top_level_index() {
        assert_eq!(eval("[1]", &json!(["a", "b"])), Ok(json!("b")));
    }

    #[test]
    fn test_multiselect_list() {
        let payload = json!({"user": "u", "order": {"id": 7}});
        assert_eq!(eval("[user, order.id]", &payload), Ok(json!(["u", 7])));
        assert_eq!(eval("order.[id, missing]", &payload), Ok(json!([7, null])));
    }

    #[test]
    fn test_multiselect_hash() {
        let payload = json!({"user": "u", "order": {"id": 7}});
        assert_eq!(
            eval("{who: user, what: order.id}", &payload),
            Ok(json!({"who": "u", "what": 7}))
        );
    }

    #[test]
    fn test_multiselect_on_null_is_null() {
        assert_eq!(eval("missing.[a, b]", &json!({})), Ok(Value::Null));
    }

    #[test]
    fn test_current_node() {
        let payload = json!({"a": 1});
        assert_eq!(eval("@", &payload), Ok(payload.clone()));
    }

    #[test]
    fn test_json_decode() {
        let payload = json!({"body": "{\"address\": \"https://checkip.amazonaws.com\"}"});
        assert_eq!(
            eval("powertools_json(body).address", &payload),
            Ok(json!("https://checkip.amazonaws.com"))
        );
        assert_eq!(eval("powertools_json(missing)", &payload), Ok(Value::Null));
    }

    #[test]
    fn test_json_decode_rejects_garbage() {
        let payload = json!({"body": "not json", "n": 3});
        assert!(matches!(
            eval("powertools_json(body)", &payload),
            Err(IdempotencyError::Key { .. })
        ));
        assert!(matches!(
            eval("powertools_json(n)", &payload),
            Err(IdempotencyError::Key { .. })
        ));
    }

    #[test]
    fn test_syntax_errors() {
        for bad in ["", "a.", "a[", "a[x]", "[a, b", "{a b}", "a..b", "nope(a)", "a b", "\"open"] {
            assert!(
                matches!(PathExpr::parse(bad), Err(IdempotencyError::Configuration { .. })),
                "expected syntax error for {bad:?}"
            );
        }
    }

    #[test]
    fn test_whitespace_is_tolerated() {
        assert_eq!(
            PathExpr::parse(" [ a , b . c ] "),
            PathExpr::parse("[a,b.c]")
        );
    }
}
