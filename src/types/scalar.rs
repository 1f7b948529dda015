//! Heterogeneous metric value type and safe-cast helpers.
//!
//! Field controllers emit samples as numbers, quoted booleans, free text, or
//! JSON blobs. `Scalar` carries whichever shape arrived; algorithms decide
//! how to coerce it rather than have the gateway guess.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single metric or setting value as it arrives from the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Num(f64),
    Bool(bool),
    Text(String),
    Json(Value),
}

impl Scalar {
    /// Coerce to a number, falling back to `default` when the value can't be
    /// interpreted as one (e.g. free text that isn't numeric).
    pub fn parse_safe_number(&self, default: f64) -> f64 {
        match self {
            Scalar::Num(n) => *n,
            Scalar::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Scalar::Text(s) => s.trim().parse::<f64>().unwrap_or(default),
            Scalar::Json(v) => v.as_f64().unwrap_or(default),
        }
    }

    /// Coerce to a boolean, falling back to `default`.
    ///
    /// Recognizes `1.0`/`0.0` and the strings `"true"`/`"false"` (any case)
    /// in addition to native booleans, since downstream schemas mix both
    /// conventions.
    pub fn parse_safe_bool(&self, default: bool) -> bool {
        match self {
            Scalar::Bool(b) => *b,
            Scalar::Num(n) => *n != 0.0,
            Scalar::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => true,
                "false" | "0" => false,
                _ => default,
            },
            Scalar::Json(v) => v.as_bool().unwrap_or(default),
        }
    }

    /// Coerce to text, for fields where the caller only needs display value.
    pub fn parse_safe_text(&self) -> String {
        match self {
            Scalar::Num(n) => n.to_string(),
            Scalar::Bool(b) => b.to_string(),
            Scalar::Text(s) => s.clone(),
            Scalar::Json(v) => v.to_string(),
        }
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Num(v)
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_passthrough() {
        assert_eq!(Scalar::Num(39.9).parse_safe_number(0.0), 39.9);
    }

    #[test]
    fn text_number_parses() {
        assert_eq!(Scalar::Text("72.5".into()).parse_safe_number(-1.0), 72.5);
    }

    #[test]
    fn unparseable_text_falls_back() {
        assert_eq!(Scalar::Text("n/a".into()).parse_safe_number(50.0), 50.0);
    }

    #[test]
    fn quoted_bool_conventions() {
        assert!(Scalar::Text("true".into()).parse_safe_bool(false));
        assert!(!Scalar::Text("FALSE".into()).parse_safe_bool(true));
        assert!(Scalar::Num(1.0).parse_safe_bool(false));
        assert!(!Scalar::Num(0.0).parse_safe_bool(true));
    }

    #[test]
    fn unparseable_bool_falls_back_to_default() {
        assert!(Scalar::Text("maybe".into()).parse_safe_bool(true));
    }
}
