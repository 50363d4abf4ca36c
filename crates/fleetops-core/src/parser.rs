//! KDL parsing of rendered deployment sources
//!
//! Top-level nodes:
//!
//! ```kdl
//! network {
//!     description "production"
//!     rollback-enabled #true
//! }
//! defaults {
//!     target-user "root"
//! }
//! machine "web" {
//!     backend "none"
//!     target-host "10.0.0.2"
//!     depends-on "deploy-key"
//! }
//! keypair "deploy-key"
//! resource "sakura-server" "app" {
//!     zone "is1a"
//! }
//! ```

use crate::definition::{Definition, Evaluation};
use crate::error::{EvalError, Result};
use kdl::{KdlDocument, KdlNode, KdlValue};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::warn;

/// Machine backend used when a `machine` node names none
pub const DEFAULT_MACHINE_BACKEND: &str = "none";

/// Resource type created by `keypair` nodes
pub const KEYPAIR_TYPE: &str = "ssh-keypair";

/// Parse one rendered source file into `evaluation`
pub fn parse_source(content: &str, file: &Path, evaluation: &mut Evaluation) -> Result<()> {
    let doc: KdlDocument = content.parse().map_err(|e: kdl::KdlError| EvalError::Kdl {
        file: file.to_path_buf(),
        message: e.to_string(),
    })?;

    // defaults apply to machines in the same file only
    let defaults = doc
        .nodes()
        .iter()
        .filter(|n| n.name().value() == "defaults")
        .map(node_to_object)
        .fold(Map::new(), |mut acc, m| {
            acc.extend(m);
            acc
        });

    for node in doc.nodes() {
        match node.name().value() {
            "network" => parse_network(node, evaluation),
            "defaults" => {}
            "machine" => {
                let name = node_name(node, 0, "machine")?;
                let mut config = node_to_object(node);
                for (key, value) in &defaults {
                    config.entry(key.clone()).or_insert_with(|| value.clone());
                }
                let backend = config
                    .remove("backend")
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_else(|| DEFAULT_MACHINE_BACKEND.to_string());
                evaluation.insert(Definition::new(name, backend, Value::Object(config)))?;
            }
            "keypair" => {
                let name = node_name(node, 0, "keypair")?;
                evaluation.insert(Definition::new(
                    name,
                    KEYPAIR_TYPE,
                    Value::Object(node_to_object(node)),
                ))?;
            }
            "resource" => {
                let resource_type = node_name(node, 0, "resource")?;
                let name = node_name(node, 1, "resource")?;
                evaluation.insert(Definition::new(
                    name,
                    resource_type,
                    Value::Object(node_to_object(node)),
                ))?;
            }
            other => {
                warn!(node = %other, file = %file.display(), "Ignoring unknown top-level node");
            }
        }
    }

    Ok(())
}

fn parse_network(node: &KdlNode, evaluation: &mut Evaluation) {
    let config = node_to_object(node);
    if let Some(description) = config.get("description").and_then(Value::as_str) {
        evaluation.network.description = Some(description.to_string());
    }
    if let Some(enabled) = config
        .get("rollback-enabled")
        .or_else(|| config.get("rollback_enabled"))
        .and_then(Value::as_bool)
    {
        evaluation.network.rollback_enabled = Some(enabled);
    }
}

/// The `position`-th positional argument, which must be a string
fn node_name(node: &KdlNode, position: usize, kind: &str) -> Result<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .nth(position)
        .and_then(|e| e.value().as_string())
        .map(str::to_string)
        .ok_or_else(|| {
            EvalError::InvalidDefinition(format!(
                "`{kind}` node requires {} string argument(s)",
                position + 1
            ))
        })
}

/// Convert a node's properties and children into a JSON object
///
/// Positional arguments of the node itself are not part of the object.
fn node_to_object(node: &KdlNode) -> Map<String, Value> {
    let mut object = Map::new();

    for entry in node.entries() {
        if let Some(name) = entry.name() {
            object.insert(name.value().to_string(), kdl_value_to_json(entry.value()));
        }
    }

    if let Some(children) = node.children() {
        for child in children.nodes() {
            let key = child.name().value().to_string();
            let value = node_to_value(child);
            match object.remove(&key) {
                None => {
                    object.insert(key, value);
                }
                // repeated child names collect into a list
                Some(Value::Array(mut items)) => {
                    extend_list(&mut items, value);
                    object.insert(key, Value::Array(items));
                }
                Some(previous) => {
                    let mut items = vec![previous];
                    extend_list(&mut items, value);
                    object.insert(key, Value::Array(items));
                }
            }
        }
    }

    object
}

fn extend_list(items: &mut Vec<Value>, value: Value) {
    match value {
        Value::Array(more) => items.extend(more),
        other => items.push(other),
    }
}

/// Value of a child node
///
/// - `key "a"` is a scalar
/// - `key "a" "b"` is a list
/// - `key` alone is `true`
/// - properties or children make it an object
fn node_to_value(node: &KdlNode) -> Value {
    let args: Vec<Value> = node
        .entries()
        .iter()
        .filter(|e| e.name().is_none())
        .map(|e| kdl_value_to_json(e.value()))
        .collect();
    let has_props = node.entries().iter().any(|e| e.name().is_some());

    if node.children().is_some() || has_props {
        let mut object = node_to_object(node);
        match args.len() {
            0 => {}
            1 => {
                object.insert("value".to_string(), args.into_iter().next().unwrap_or(Value::Null));
            }
            _ => {
                object.insert("value".to_string(), Value::Array(args));
            }
        }
        return Value::Object(object);
    }

    match args.len() {
        0 => Value::Bool(true),
        1 => args.into_iter().next().unwrap_or(Value::Null),
        _ => Value::Array(args),
    }
}

fn kdl_value_to_json(value: &KdlValue) -> Value {
    if let Some(s) = value.as_string() {
        Value::String(s.to_string())
    } else if let Some(i) = value.as_integer() {
        Value::Number((i as i64).into())
    } else if let Some(f) = value.as_float() {
        serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    } else if let Some(b) = value.as_bool() {
        Value::Bool(b)
    } else {
        Value::Null
    }
}
