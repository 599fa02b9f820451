//! The formatter registry: name → formatter function, backed by
//! `DashMap` so concurrent renders can register/look up formatters without
//! a shared mutex.

use std::rc::Rc;

use dashmap::DashMap;
use indexmap::IndexMap;

use crate::error::{MextError, SourceLocation};
use crate::value::Value;

pub type FormatterFn = Rc<dyn Fn(&Value, &IndexMap<String, Value>) -> Result<String, MextError>>;

pub struct FormatterRegistry {
    formatters: DashMap<String, FormatterFn>,
}

impl Default for FormatterRegistry {
    fn default() -> Self {
        let reg = Self {
            formatters: DashMap::new(),
        };
        reg.register("json", Rc::new(format_json));
        reg.register("repr", Rc::new(format_repr));
        reg.register("escape", Rc::new(format_escape));
        reg.register("fenced_block", Rc::new(format_fenced_block));
        reg.register("lower", Rc::new(format_lower));
        reg.register("upper", Rc::new(format_upper));
        reg.register("capitalize", Rc::new(format_capitalize));
        reg
    }
}

impl FormatterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, formatter: FormatterFn) {
        self.formatters.insert(name.into(), formatter);
    }

    pub fn remove(&self, name: &str) -> Option<FormatterFn> {
        self.formatters.remove(name).map(|(_, f)| f)
    }

    pub fn invoke(
        &self,
        name: &str,
        value: &Value,
        params: &IndexMap<String, Value>,
        loc: impl Fn() -> SourceLocation,
    ) -> Result<String, MextError> {
        match self.formatters.get(name) {
            Some(f) => f(value, params),
            None => Err(MextError::runtime(
                format!("Format \"{name}\" is not registered."),
                loc(),
            )),
        }
    }
}

fn format_json(value: &Value, _params: &IndexMap<String, Value>) -> Result<String, MextError> {
    serde_json::to_string_pretty(&value.to_json())
        .map_err(|e| MextError::runtime(format!("failed to serialize value as json: {e}"), SourceLocation::unknown()))
}

fn format_repr(value: &Value, _params: &IndexMap<String, Value>) -> Result<String, MextError> {
    Ok(value.to_repr_string())
}

/// Doubles `{`/`}` so the value can be embedded back into a template
/// without its contents being mistaken for placeholders.
fn format_escape(value: &Value, _params: &IndexMap<String, Value>) -> Result<String, MextError> {
    Ok(value
        .to_display_string()
        .replace('{', "{{")
        .replace('}', "}}"))
}

fn format_lower(value: &Value, _params: &IndexMap<String, Value>) -> Result<String, MextError> {
    Ok(value.to_display_string().to_lowercase())
}

fn format_upper(value: &Value, _params: &IndexMap<String, Value>) -> Result<String, MextError> {
    Ok(value.to_display_string().to_uppercase())
}

fn format_capitalize(value: &Value, _params: &IndexMap<String, Value>) -> Result<String, MextError> {
    let s = value.to_display_string();
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => Ok(format!("{}{}", first.to_uppercase(), chars.as_str().to_lowercase())),
        None => Ok(s),
    }
}

/// Wraps content in a backtick fence wide enough that any backtick run
/// already inside the content can't prematurely close it. An optional
/// `lang` param names the fence's info string.
fn format_fenced_block(value: &Value, params: &IndexMap<String, Value>) -> Result<String, MextError> {
    let content = value.to_display_string();
    let lang = params
        .get("lang")
        .and_then(Value::as_str)
        .unwrap_or("");

    let mut max_run = 0usize;
    let mut run = 0usize;
    for c in content.chars() {
        if c == '`' {
            run += 1;
            max_run = max_run.max(run);
        } else {
            run = 0;
        }
    }
    let fence_len = (max_run + 1).max(3);
    let fence = "`".repeat(fence_len);

    Ok(format!("{fence}{lang}\n{content}\n{fence}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> SourceLocation {
        SourceLocation::unknown()
    }

    #[test]
    fn json_formatter_matches_two_space_indent() {
        let reg = FormatterRegistry::new();
        let mut map = IndexMap::new();
        map.insert("n".to_string(), Value::Str("A".to_string()));
        let arr = Value::List(vec![Value::Map(map)]);
        let out = reg.invoke("json", &arr, &IndexMap::new(), loc).unwrap();
        assert!(out.contains("  \"n\""));
    }

    #[test]
    fn unregistered_formatter_errors() {
        let reg = FormatterRegistry::new();
        assert!(reg.invoke("nope", &Value::Null, &IndexMap::new(), loc).is_err());
    }

    #[test]
    fn fenced_block_widens_past_existing_backticks() {
        let reg = FormatterRegistry::new();
        let value = Value::Str("```already fenced```".to_string());
        let out = reg.invoke("fenced_block", &value, &IndexMap::new(), loc).unwrap();
        assert!(out.starts_with("````"));
    }

    #[test]
    fn escape_doubles_braces() {
        let reg = FormatterRegistry::new();
        let value = Value::Str("{x}".to_string());
        let out = reg.invoke("escape", &value, &IndexMap::new(), loc).unwrap();
        assert_eq!(out, "{{x}}");
    }
}
