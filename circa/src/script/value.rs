//! Runtime value type for circa script variables.
//!
//! The script language is stringly typed; every expression resolves to text.
//! Binary variables (filled by `sock -rb` and `fread -b`) share the same
//! namespace: a name holds either text or bytes at any moment, and the last
//! assignment decides which.

use std::fmt;

/// A script variable value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Binary(Vec<u8>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Text(String::new())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "{s}"),
            Value::Binary(b) => write!(f, "{}", String::from_utf8_lossy(b)),
        }
    }
}

impl Value {
    /// Coerce to text (lossy for binary values).
    pub fn as_text(&self) -> String {
        self.to_string()
    }

    /// Raw bytes of the value.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Value::Text(s) => s.as_bytes(),
            Value::Binary(b) => b,
        }
    }

    /// Coerce to a number; `0.0` when the value does not parse.
    /// `inc`/`dec` rely on this never failing.
    pub fn as_num(&self) -> f64 {
        match self {
            Value::Text(s) => s.trim().parse().unwrap_or(0.0),
            Value::Binary(_) => 0.0,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Value::Binary(_))
    }

    /// Format a number the way the language prints it: integral values
    /// without a fractional part, everything else as-is.
    pub fn from_num(n: f64) -> Value {
        if n.fract() == 0.0 && n.abs() < 1e15 {
            Value::Text(format!("{}", n as i64))
        } else {
            Value::Text(format!("{n}"))
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Binary(b)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
