//! Typed encoding of attribute bag values
//!
//! Every attribute is persisted as a string. Strings pass through untouched,
//! integers and booleans are encoded explicitly and composite values are
//! stored as a JSON blob. Readers pick the decoder matching the type they
//! expect.

use crate::error::{Result, StateError};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// A typed attribute value before it is encoded into the store
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Str(String),
    Int(i64),
    Bool(bool),
    Json(serde_json::Value),
}

impl AttrValue {
    /// Serialize any value into a JSON attribute
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        Ok(AttrValue::Json(serde_json::to_value(value)?))
    }

    /// Encode into the persisted string form
    pub fn encode(&self) -> Result<String> {
        Ok(match self {
            AttrValue::Str(s) => s.clone(),
            AttrValue::Int(i) => i.to_string(),
            AttrValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            AttrValue::Json(v) => serde_json::to_string(v)?,
        })
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Str(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<serde_json::Value> for AttrValue {
    fn from(value: serde_json::Value) -> Self {
        AttrValue::Json(value)
    }
}

pub fn decode_int(key: &str, raw: &str) -> Result<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|e| invalid(key, raw, e.to_string()))
}

pub fn decode_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim() {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(invalid(key, raw, "expected a boolean".to_string())),
    }
}

pub fn decode_json<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| invalid(key, raw, e.to_string()))
}

fn invalid(key: &str, raw: &str, reason: String) -> StateError {
    StateError::InvalidAttribute {
        key: key.to_string(),
        value: raw.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strings_pass_through() {
        let value = AttrValue::from("i-0abc 123");
        assert_eq!(value.encode().unwrap(), "i-0abc 123");
    }

    #[test]
    fn test_bool_encoding_accepts_legacy_words() {
        assert_eq!(AttrValue::Bool(true).encode().unwrap(), "1");
        assert!(decode_bool("obsolete", "1").unwrap());
        assert!(decode_bool("obsolete", "true").unwrap());
        assert!(!decode_bool("obsolete", "0").unwrap());
        assert!(decode_bool("obsolete", "yes").is_err());
    }

    #[test]
    fn test_invalid_int_reports_key() {
        let err = decode_int("index", "seven").unwrap_err();
        assert!(err.to_string().contains("index"));
    }

    #[test]
    fn test_json_blob() {
        let value = AttrValue::Json(json!({"20240101": {"status": "complete"}}));
        let raw = value.encode().unwrap();
        let back: serde_json::Value = decode_json("backups", &raw).unwrap();
        assert_eq!(back["20240101"]["status"], "complete");
    }
}
