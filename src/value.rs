//! The dynamic value domain every expression evaluates to.
//!
//! This mirrors a typical scripting engine's `Dynamic`/`Union` split, but with
//! a fixed, small set of variants: the DSL has no user-defined types, so there
//! is no need for a `Variant` trait-object escape hatch.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smartstring::alias::String as SmartString;

/// An opaque handle to a platform object (e.g. `message.reply_to_message`)
/// that the DSL can pass around and null-check but never construct or compare.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opaque {
    pub type_name: String,
    #[serde(skip)]
    pub handle: Option<Arc<dyn std::any::Any + Send + Sync>>,
}

impl PartialEq for Opaque {
    fn eq(&self, other: &Self) -> bool {
        // Opaque values are never equal to anything, including another
        // opaque of the same platform type; the DSL can only null-check them.
        let _ = other;
        false
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Str(SmartString),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    #[serde(skip)]
    Opaque(Opaque),
}

impl Value {
    pub fn str(s: impl Into<SmartString>) -> Self {
        Value::Str(s.into())
    }

    /// Truthiness used by `and`/`or`/`not`/`if`/`foreach`: `false`, `null`,
    /// `0`, `""`, `[]`, `{}` are falsy; everything else (including opaque
    /// platform objects) is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Map(m) => !m.is_empty(),
            Value::Opaque(_) => true,
        }
    }

    /// Renders a value the way `str()` and implicit string concatenation do.
    pub fn render(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Str(s) => s.to_string(),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(Value::render).collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Map(map) => {
                let parts: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("{k}: {}", v.render()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Value::Opaque(o) => format!("<{}>", o.type_name),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Opaque(_) => "opaque",
        }
    }
}

/// A whole-valued number is rendered without a trailing `.0`.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_numbers_render_without_trailing_zero() {
        assert_eq!(Value::Number(3.0).render(), "3");
        assert_eq!(Value::Number(3.5).render(), "3.5");
    }

    #[test]
    fn truthiness_follows_the_documented_rules() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(!Value::Map(Default::default()).is_truthy());
        assert!(Value::Number(0.1).is_truthy());
        assert!(Value::from("x").is_truthy());
    }
}
