//! The [`Value`] tree and the layered [`Scope`] it is read from.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::MextError;

/// A zero-argument host callable. Per the whitespace/resolution design
/// notes, these are never auto-invoked during name resolution — only a
/// formatter or an explicit caller can call one.
pub type Callable = Rc<dyn Fn() -> Result<Value, MextError>>;

/// The tagged union every template value lives in: scalars, ordered
/// lists/maps, and opaque host callables.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
    Callable(Callable),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b:?})"),
            Value::Int(i) => write!(f, "Int({i:?})"),
            Value::Float(x) => write!(f, "Float({x:?})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::List(l) => write!(f, "List({l:?})"),
            Value::Map(m) => write!(f, "Map({m:?})"),
            Value::Callable(_) => write!(f, "Callable(..)"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    /// Length for `empty` testing, mirroring Python's `__len__` duck type:
    /// strings, lists, and maps have a length; everything else does not.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::Str(s) => Some(s.chars().count()),
            Value::List(l) => Some(l.len()),
            Value::Map(m) => Some(m.len()),
            _ => None,
        }
    }

    /// `empty NAME` semantics from §4.6: null, or has a length of zero.
    pub fn is_empty_test(&self) -> bool {
        match self {
            Value::Null => true,
            other => other.len().map(|n| n == 0).unwrap_or(false),
        }
    }

    /// Standard truthiness used for `@if NAME` with no operator.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(x) => *x != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Map(m) => !m.is_empty(),
            Value::Callable(_) => true,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// `str(value)` — the text the engine appends to output for a plain
    /// field reference (no conversion/format spec).
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => "None".to_string(),
            Value::Bool(b) => if *b { "True".to_string() } else { "False".to_string() },
            Value::Int(i) => i.to_string(),
            Value::Float(x) => format_float(*x),
            Value::Str(s) => s.clone(),
            Value::List(l) => format!(
                "[{}]",
                l.iter().map(Value::to_repr_string).collect::<Vec<_>>().join(", ")
            ),
            Value::Map(m) => format!(
                "{{{}}}",
                m.iter()
                    .map(|(k, v)| format!("'{}': {}", k, v.to_repr_string()))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Value::Callable(_) => "<callable>".to_string(),
        }
    }

    /// `repr(value)` — quotes strings, used by the `r` conversion and the
    /// `repr` formatter.
    pub fn to_repr_string(&self) -> String {
        match self {
            Value::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            other => other.to_display_string(),
        }
    }

    /// Converts into a JSON value for the `json` formatter and for
    /// `@format json` style rendering. Callables have no JSON
    /// representation and become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::Number((*i).into()),
            Value::Float(x) => serde_json::Number::from_f64(*x)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::List(l) => serde_json::Value::Array(l.iter().map(Value::to_json).collect()),
            Value::Map(m) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in m {
                    obj.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(obj)
            }
            Value::Callable(_) => serde_json::Value::Null,
        }
    }
}

fn format_float(x: f64) -> String {
    if x.fract() == 0.0 && x.is_finite() {
        format!("{x:.1}")
    } else {
        x.to_string()
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(a) => Value::List(a.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(o) => {
                let mut m = IndexMap::new();
                for (k, v) in o {
                    m.insert(k, Value::from(v));
                }
                Value::Map(m)
            }
        }
    }
}

impl From<serde_yaml::Value> for Value {
    fn from(v: serde_yaml::Value) -> Self {
        match v {
            serde_yaml::Value::Null => Value::Null,
            serde_yaml::Value::Bool(b) => Value::Bool(b),
            serde_yaml::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_yaml::Value::String(s) => Value::Str(s),
            serde_yaml::Value::Sequence(a) => Value::List(a.into_iter().map(Value::from).collect()),
            serde_yaml::Value::Mapping(o) => {
                let mut m = IndexMap::new();
                for (k, v) in o {
                    if let serde_yaml::Value::String(k) = k {
                        m.insert(k, Value::from(v));
                    }
                }
                Value::Map(m)
            }
            serde_yaml::Value::Tagged(t) => Value::from(t.value),
        }
    }
}

/// Three layered read-only mappings plus one mutable one, resolved in
/// `constants < params < locals` order when reading a name. Writes always
/// land in `locals` — this is what keeps `@default` and `@set` distinct and
/// keeps a nested `@include`'s local additions from leaking back.
#[derive(Clone, Default)]
pub struct Scope {
    constants: IndexMap<String, Value>,
    params: IndexMap<String, Value>,
    locals: IndexMap<String, Value>,
}

impl Scope {
    pub fn new(params: IndexMap<String, Value>) -> Self {
        let mut constants = IndexMap::new();
        constants.insert("true".to_string(), Value::Bool(true));
        constants.insert("false".to_string(), Value::Bool(false));
        constants.insert("none".to_string(), Value::Null);
        Self {
            constants,
            params,
            locals: IndexMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.locals
            .get(name)
            .or_else(|| self.params.get(name))
            .or_else(|| self.constants.get(name))
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn set_local(&mut self, name: impl Into<String>, value: Value) {
        self.locals.insert(name.into(), value);
    }

    pub fn locals(&self) -> &IndexMap<String, Value> {
        &self.locals
    }

    /// The caller's own params, used to seed a nested `@include`'s scope
    /// (locals are deliberately not inherited).
    pub fn params(&self) -> &IndexMap<String, Value> {
        &self.params
    }

    pub fn merge_locals(&mut self, other: IndexMap<String, Value>) {
        for (k, v) in other {
            self.locals.insert(k, v);
        }
    }

    /// The full merged view used by `@default`'s "not visible in any scope"
    /// check and by import-without-namespace.
    pub fn all_variables(&self) -> IndexMap<String, Value> {
        let mut out = self.constants.clone();
        out.extend(self.params.clone());
        out.extend(self.locals.clone());
        out
    }
}
