//! Attribute scalars shared by spans and log records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Attribute map. Ordered so serialized records are stable.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// A scalar attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// String value.
    String(String),
}

impl AttributeValue {
    /// Returns true if the value's string form equals `expected`.
    ///
    /// Filters carry attribute constraints as strings, so `200` matches `"200"`.
    #[must_use]
    pub fn matches(&self, expected: &str) -> bool {
        match self {
            Self::String(s) => s == expected,
            other => other.to_string() == expected,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for AttributeValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// Returns true if every constraint in `filter` is satisfied by `attributes`.
pub(crate) fn attributes_match(attributes: &Attributes, filter: &BTreeMap<String, String>) -> bool {
    filter.iter().all(|(key, expected)| {
        attributes
            .get(key)
            .is_some_and(|value| value.matches(expected))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_deserialization() {
        let attrs: Attributes =
            serde_json::from_str(r#"{"a": true, "b": 200, "c": 1.5, "d": "GET"}"#).unwrap();
        assert_eq!(attrs["a"], AttributeValue::Bool(true));
        assert_eq!(attrs["b"], AttributeValue::Int(200));
        assert_eq!(attrs["c"], AttributeValue::Float(1.5));
        assert_eq!(attrs["d"], AttributeValue::String("GET".into()));
    }

    #[test]
    fn test_matches_string_form() {
        assert!(AttributeValue::Int(200).matches("200"));
        assert!(AttributeValue::Bool(false).matches("false"));
        assert!(!AttributeValue::String("GET".into()).matches("get"));
    }

    #[test]
    fn test_attributes_match_all_constraints() {
        let mut attrs = Attributes::new();
        attrs.insert("http.method".into(), "GET".into());
        attrs.insert("http.status_code".into(), 500.into());

        let mut filter = BTreeMap::new();
        filter.insert("http.method".to_string(), "GET".to_string());
        assert!(attributes_match(&attrs, &filter));

        filter.insert("http.status_code".to_string(), "200".to_string());
        assert!(!attributes_match(&attrs, &filter));
    }
}
