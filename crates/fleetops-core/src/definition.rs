//! Evaluated deployment definitions
//!
//! Definitions are recomputed from the sources on every run and never
//! persisted.

use crate::error::{EvalError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Key listing explicit dependencies of a resource
pub const DEPENDS_ON: &str = "depends-on";

/// Desired configuration of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    pub name: String,

    /// Backend type tag
    #[serde(rename = "type")]
    pub resource_type: String,

    /// Backend-specific configuration (always a JSON object)
    pub config: Value,
}

impl Definition {
    pub fn new(name: impl Into<String>, resource_type: impl Into<String>, config: Value) -> Self {
        let config = match config {
            Value::Object(_) => config,
            Value::Null => Value::Object(Default::default()),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other);
                Value::Object(map)
            }
        };
        Self {
            name: name.into(),
            resource_type: resource_type.into(),
            config,
        }
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.value(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.value(key).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.value(key).and_then(Value::as_bool)
    }

    /// Deserialize a configuration value into `T`
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.value(key)
            .map(|v| {
                serde_json::from_value(v.clone()).map_err(|e| EvalError::InvalidValue {
                    resource: self.name.clone(),
                    key: key.to_string(),
                    message: e.to_string(),
                })
            })
            .transpose()
    }

    /// A string or a list of strings under `key`
    pub fn get_list(&self, key: &str) -> Vec<String> {
        match self.value(key) {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Names listed under `depends-on`
    pub fn depends_on(&self) -> BTreeSet<String> {
        self.get_list(DEPENDS_ON).into_iter().collect()
    }
}

/// Deployment-wide settings declared in the `network` node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub description: Option<String>,
    pub rollback_enabled: Option<bool>,
}

/// Result of evaluating a deployment's sources
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    pub network: NetworkInfo,
    pub definitions: BTreeMap<String, Definition>,
}

impl Evaluation {
    pub fn insert(&mut self, definition: Definition) -> Result<()> {
        if self.definitions.contains_key(&definition.name) {
            return Err(EvalError::DuplicateDefinition {
                name: definition.name,
            });
        }
        self.definitions.insert(definition.name.clone(), definition);
        Ok(())
    }
}
