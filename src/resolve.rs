//! Resolves a field-name string against a [`Scope`]: integer/float/string
//! literals in-place, or dotted/bracket field-access expressions.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{MextError, SourceLocation};
use crate::value::{Scope, Value};

static INT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[-+]?\d+$").unwrap());
static FLOAT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[-+]?(\d+(\.\d*)?|\.\d+)([eE][-+]?\d+)?$").unwrap());

/// Resolves `name` against `scope`. `loc` lazily builds the error location
/// only when an error actually needs to be raised.
pub fn resolve(name: &str, scope: &Scope, loc: impl Fn() -> SourceLocation) -> Result<Value, MextError> {
    if INT_RE.is_match(name) {
        return name
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| MextError::runtime(format!("invalid integer literal: {e}"), loc()));
    }
    if FLOAT_RE.is_match(name) {
        return name
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| MextError::runtime(format!("invalid float literal: {e}"), loc()));
    }
    if let Some(s) = parse_string_literal(name) {
        return Ok(Value::Str(s));
    }
    resolve_field_access(name, scope, &loc)
}

fn parse_string_literal(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    if bytes.len() < 2 || bytes[0] != b'"' || bytes[bytes.len() - 1] != b'"' {
        return None;
    }
    let inner = &name[1..name.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}

enum Accessor {
    Field(String),
    Index(String),
}

fn parse_path(expr: &str) -> Vec<Accessor> {
    let mut out = Vec::new();
    let chars: Vec<char> = expr.chars().collect();
    let n = chars.len();
    let mut i = 0;

    let mut head = String::new();
    while i < n && chars[i] != '.' && chars[i] != '[' {
        head.push(chars[i]);
        i += 1;
    }
    out.push(Accessor::Field(head));

    while i < n {
        match chars[i] {
            '.' => {
                i += 1;
                let mut seg = String::new();
                while i < n && chars[i] != '.' && chars[i] != '[' {
                    seg.push(chars[i]);
                    i += 1;
                }
                out.push(Accessor::Field(seg));
            }
            '[' => {
                i += 1;
                let mut depth = 1;
                let mut inner = String::new();
                while i < n && depth > 0 {
                    match chars[i] {
                        '[' => {
                            depth += 1;
                            inner.push('[');
                        }
                        ']' => {
                            depth -= 1;
                            if depth > 0 {
                                inner.push(']');
                            }
                        }
                        c => inner.push(c),
                    }
                    i += 1;
                }
                out.push(Accessor::Index(inner));
            }
            _ => i += 1,
        }
    }
    out
}

fn resolve_field_access(
    expr: &str,
    scope: &Scope,
    loc: &impl Fn() -> SourceLocation,
) -> Result<Value, MextError> {
    let path = parse_path(expr);
    let Accessor::Field(head) = &path[0] else {
        unreachable!("first path segment is always Field")
    };
    if head.is_empty() {
        return Err(MextError::runtime(
            format!("invalid variable expression \"{expr}\""),
            loc(),
        ));
    }

    let mut current = scope
        .get(head)
        .cloned()
        .ok_or_else(|| MextError::runtime(format!("name '{head}' is not defined"), loc()))?;

    for accessor in &path[1..] {
        current = match accessor {
            Accessor::Field(field) => match &current {
                Value::Map(m) => m.get(field).cloned().ok_or_else(|| {
                    MextError::runtime(format!("key '{field}' not found"), loc())
                })?,
                other => {
                    return Err(MextError::runtime(
                        format!("cannot access field '{field}' on {other:?}"),
                        loc(),
                    ));
                }
            },
            Accessor::Index(inner) => {
                let index_value = resolve(inner, scope, loc)?;
                index_into(&current, &index_value, loc)?
            }
        };
    }

    Ok(current)
}

fn index_into(
    current: &Value,
    index_value: &Value,
    loc: &impl Fn() -> SourceLocation,
) -> Result<Value, MextError> {
    match (current, index_value) {
        (Value::List(list), Value::Int(i)) => {
            let idx = resolve_index(*i, list.len()).ok_or_else(|| {
                MextError::runtime(format!("list index {i} out of range"), loc())
            })?;
            Ok(list[idx].clone())
        }
        (Value::Map(map), Value::Str(key)) => map
            .get(key)
            .cloned()
            .ok_or_else(|| MextError::runtime(format!("key '{key}' not found"), loc())),
        (Value::Map(map), Value::Int(i)) => {
            let key = i.to_string();
            map.get(&key)
                .cloned()
                .ok_or_else(|| MextError::runtime(format!("key '{key}' not found"), loc()))
        }
        _ => Err(MextError::runtime(
            "index access requires a list with an integer index or a mapping with a string key",
            loc(),
        )),
    }
}

fn resolve_index(idx: i64, len: usize) -> Option<usize> {
    if idx >= 0 {
        let idx = idx as usize;
        if idx < len { Some(idx) } else { None }
    } else {
        let off = (-idx) as usize;
        if off <= len { Some(len - off) } else { None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn scope_with(vars: &[(&str, Value)]) -> Scope {
        let mut params = IndexMap::new();
        for (k, v) in vars {
            params.insert((*k).to_string(), v.clone());
        }
        Scope::new(params)
    }

    fn loc() -> SourceLocation {
        SourceLocation::unknown()
    }

    #[test]
    fn resolves_int_literal() {
        let s = scope_with(&[]);
        assert_eq!(resolve("42", &s, loc).unwrap(), Value::Int(42));
        assert_eq!(resolve("-7", &s, loc).unwrap(), Value::Int(-7));
    }

    #[test]
    fn resolves_float_literal() {
        let s = scope_with(&[]);
        assert_eq!(resolve("3.14", &s, loc).unwrap(), Value::Float(3.14));
    }

    #[test]
    fn resolves_string_literal() {
        let s = scope_with(&[]);
        assert_eq!(resolve("\"hi\"", &s, loc).unwrap(), Value::Str("hi".into()));
    }

    #[test]
    fn resolves_constants() {
        let s = scope_with(&[]);
        assert_eq!(resolve("true", &s, loc).unwrap(), Value::Bool(true));
        assert_eq!(resolve("none", &s, loc).unwrap(), Value::Null);
    }

    #[test]
    fn resolves_dotted_and_bracket_access() {
        let mut inner = IndexMap::new();
        inner.insert("b".to_string(), Value::List(vec![Value::Int(1), Value::Int(2)]));
        let s = scope_with(&[("a", Value::Map(inner))]);
        assert_eq!(resolve("a.b[1]", &s, loc).unwrap(), Value::Int(2));
        assert_eq!(resolve("a.b[-1]", &s, loc).unwrap(), Value::Int(2));
    }

    #[test]
    fn undefined_variable_is_runtime_error() {
        let s = scope_with(&[]);
        assert!(resolve("nope", &s, loc).is_err());
    }
}
