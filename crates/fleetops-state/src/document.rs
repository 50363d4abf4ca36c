//! In-memory model of the state file
//!
//! The whole state file is one JSON document holding every deployment and,
//! per deployment, every resource row with its attribute bag.

use crate::attr::{AttrValue, decode_bool, decode_int, decode_json};
use crate::error::{Result, StateError};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Current state file schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Identifier of a resource row, unique within its deployment
pub type ResourceId = u64;

/// Well-known deployment attribute keys
pub mod keys {
    pub const NAME: &str = "name";
    pub const DESCRIPTION: &str = "description";
    pub const SOURCES: &str = "sources";
    pub const ARGS: &str = "args";
    pub const ROLLBACK_ENABLED: &str = "rollbackEnabled";
    pub const NEXT_INDEX: &str = "nextIndex";
    pub const GENERATION: &str = "generation";
}

/// Root of the persisted state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    /// State file schema version
    pub version: u32,

    /// Last commit timestamp
    pub updated_at: DateTime<Utc>,

    /// Deployments indexed by UUID
    pub deployments: BTreeMap<Uuid, DeploymentRecord>,
}

impl Default for StateDocument {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            updated_at: Utc::now(),
            deployments: BTreeMap::new(),
        }
    }
}

impl StateDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deployment(&self, uuid: &Uuid) -> Result<&DeploymentRecord> {
        self.deployments
            .get(uuid)
            .ok_or_else(|| StateError::DeploymentNotFound(uuid.to_string()))
    }

    pub fn deployment_mut(&mut self, uuid: &Uuid) -> Result<&mut DeploymentRecord> {
        self.deployments
            .get_mut(uuid)
            .ok_or_else(|| StateError::DeploymentNotFound(uuid.to_string()))
    }

    /// Create an empty deployment and return its UUID
    pub fn create_deployment(&mut self) -> Uuid {
        let uuid = Uuid::new_v4();
        self.deployments.insert(uuid, DeploymentRecord::new(uuid));
        uuid
    }

    /// Remove a deployment. Refuses while resources remain unless `force`.
    pub fn delete_deployment(&mut self, uuid: &Uuid, force: bool) -> Result<DeploymentRecord> {
        let record = self.deployment(uuid)?;
        if !force && !record.resources.is_empty() {
            return Err(StateError::DeploymentNotEmpty {
                uuid: *uuid,
                count: record.resources.len(),
            });
        }
        self.deployments
            .remove(uuid)
            .ok_or_else(|| StateError::DeploymentNotFound(uuid.to_string()))
    }

    /// Resolve a deployment by UUID or by its `name` attribute
    pub fn find_deployment(&self, selector: &str) -> Result<Uuid> {
        if let Ok(uuid) = Uuid::parse_str(selector)
            && self.deployments.contains_key(&uuid)
        {
            return Ok(uuid);
        }

        let matches: Vec<Uuid> = self
            .deployments
            .values()
            .filter(|d| d.name().as_deref() == Some(selector))
            .map(|d| d.uuid)
            .collect();

        match matches.as_slice() {
            [uuid] => Ok(*uuid),
            [] => Err(StateError::DeploymentNotFound(selector.to_string())),
            _ => Err(StateError::AmbiguousDeployment(selector.to_string())),
        }
    }

    /// Resolve the default deployment when exactly one exists
    pub fn only_deployment(&self) -> Option<Uuid> {
        if self.deployments.len() == 1 {
            self.deployments.keys().next().copied()
        } else {
            None
        }
    }
}

/// One deployment: its attributes and its resource rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub uuid: Uuid,

    /// Deployment-level attributes (name, description, sources, args, ...)
    pub attrs: BTreeMap<String, String>,

    /// Resource rows indexed by their id
    pub resources: BTreeMap<ResourceId, ResourceRecord>,

    /// Next resource id to hand out
    pub next_resource_id: ResourceId,

    pub created_at: DateTime<Utc>,
}

impl DeploymentRecord {
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            attrs: BTreeMap::new(),
            resources: BTreeMap::new(),
            next_resource_id: 1,
            created_at: Utc::now(),
        }
    }

    pub fn name(&self) -> Option<String> {
        self.attrs.get(keys::NAME).cloned()
    }

    pub fn set_attr(&mut self, key: &str, value: impl Into<AttrValue>) -> Result<()> {
        self.attrs.insert(key.to_string(), value.into().encode()?);
        Ok(())
    }

    pub fn remove_attr(&mut self, key: &str) -> Option<String> {
        self.attrs.remove(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    pub fn get_int(&self, key: &str) -> Result<Option<i64>> {
        self.attrs
            .get(key)
            .map(|raw| decode_int(key, raw))
            .transpose()
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        Ok(self
            .attrs
            .get(key)
            .map(|raw| decode_bool(key, raw))
            .transpose()?
            .unwrap_or(false))
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.attrs
            .get(key)
            .map(|raw| decode_json(key, raw))
            .transpose()
    }

    /// Add a resource row. Names are unique within the deployment.
    pub fn create_resource(&mut self, name: &str, resource_type: &str) -> Result<ResourceId> {
        if self.find_resource(name).is_some() {
            return Err(StateError::DuplicateResource {
                deployment: self.uuid,
                name: name.to_string(),
            });
        }

        let id = self.next_resource_id;
        self.next_resource_id += 1;
        self.resources
            .insert(id, ResourceRecord::new(id, name, resource_type));
        Ok(id)
    }

    pub fn resource(&self, id: ResourceId) -> Result<&ResourceRecord> {
        self.resources
            .get(&id)
            .ok_or_else(|| StateError::ResourceNotFound(format!("#{id}")))
    }

    pub fn resource_mut(&mut self, id: ResourceId) -> Result<&mut ResourceRecord> {
        self.resources
            .get_mut(&id)
            .ok_or_else(|| StateError::ResourceNotFound(format!("#{id}")))
    }

    pub fn find_resource(&self, name: &str) -> Option<&ResourceRecord> {
        self.resources.values().find(|r| r.name == name)
    }

    pub fn find_resource_mut(&mut self, name: &str) -> Option<&mut ResourceRecord> {
        self.resources.values_mut().find(|r| r.name == name)
    }

    pub fn remove_resource(&mut self, id: ResourceId) -> Option<ResourceRecord> {
        self.resources.remove(&id)
    }

    /// Rows must sit under their own id and carry unique names.
    /// Used on rows that did not come through [`Self::create_resource`].
    pub fn check_consistency(&self) -> Result<()> {
        let mut names = BTreeSet::new();
        for (key, row) in &self.resources {
            if *key != row.id {
                return Err(StateError::MisplacedResource {
                    name: row.name.clone(),
                    key: *key,
                    id: row.id,
                });
            }
            if !names.insert(row.name.as_str()) {
                return Err(StateError::DuplicateResource {
                    deployment: self.uuid,
                    name: row.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Change a resource's name key, keeping its id, type and attributes
    pub fn rename_resource(&mut self, from: &str, to: &str) -> Result<ResourceId> {
        if self.find_resource(to).is_some() {
            return Err(StateError::DuplicateResource {
                deployment: self.uuid,
                name: to.to_string(),
            });
        }
        let record = self
            .find_resource_mut(from)
            .ok_or_else(|| StateError::ResourceNotFound(from.to_string()))?;
        record.name = to.to_string();
        Ok(record.id)
    }
}

/// One resource row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: ResourceId,

    pub name: String,

    /// Backend type tag; never changes for the lifetime of the row
    #[serde(rename = "type")]
    pub resource_type: String,

    /// Backend-specific attribute bag
    pub attrs: BTreeMap<String, String>,
}

impl ResourceRecord {
    pub fn new(id: ResourceId, name: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            resource_type: resource_type.into(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn set_attr(&mut self, key: &str, value: impl Into<AttrValue>) -> Result<()> {
        self.attrs.insert(key.to_string(), value.into().encode()?);
        Ok(())
    }

    pub fn set_attrs<I, K>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, AttrValue)>,
        K: AsRef<str>,
    {
        for (key, value) in values {
            self.attrs.insert(key.as_ref().to_string(), value.encode()?);
        }
        Ok(())
    }

    pub fn remove_attr(&mut self, key: &str) -> Option<String> {
        self.attrs.remove(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    pub fn get_int(&self, key: &str) -> Result<Option<i64>> {
        self.attrs
            .get(key)
            .map(|raw| decode_int(key, raw))
            .transpose()
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        Ok(self
            .attrs
            .get(key)
            .map(|raw| decode_bool(key, raw))
            .transpose()?
            .unwrap_or(false))
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.attrs
            .get(key)
            .map(|raw| decode_json(key, raw))
            .transpose()
    }
}
