//! Typed persistence declarations
//!
//! A chart's values document carries a `persistence` map from logical volume
//! name to declaration. The declarations are validated once when read; keys
//! the converter does not manage are carried through untouched.

use super::{LOCAL_VOLUME_TYPE, VOLUME_TYPE_ANNOTATION};
use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key of the persistence section in a values document
pub const PERSISTENCE_KEY: &str = "persistence";

// =============================================================================
// Access Mode
// =============================================================================

/// Claim access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    ReadWriteOnce,
    ReadOnlyMany,
    ReadWriteMany,
    ReadWriteOncePod,
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessMode::ReadWriteOnce => write!(f, "ReadWriteOnce"),
            AccessMode::ReadOnlyMany => write!(f, "ReadOnlyMany"),
            AccessMode::ReadWriteMany => write!(f, "ReadWriteMany"),
            AccessMode::ReadWriteOncePod => write!(f, "ReadWriteOncePod"),
        }
    }
}

// =============================================================================
// Quantity
// =============================================================================

/// Size of a declaration, kept in the form the chart author wrote it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Quantity {
    /// Quantity string such as `1Gi`
    Text(String),
    /// Plain number of bytes
    Number(serde_json::Number),
}

impl std::fmt::Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Quantity::Text(s) => write!(f, "{}", s),
            Quantity::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<&str> for Quantity {
    fn from(s: &str) -> Self {
        Quantity::Text(s.to_string())
    }
}

// =============================================================================
// Volume Declaration
// =============================================================================

/// One logical persistent volume declared by a chart
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeDeclaration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retain: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_mode: Option<AccessMode>,

    /// Requested size quantity (e.g. "1Gi")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Quantity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<IndexMap<String, String>>,

    /// Chart-specific keys (mountPath, storageClass, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VolumeDeclaration {
    /// Declaration of a retained, local, single-writer volume
    pub fn local(size: impl Into<String>) -> Self {
        let mut annotations = IndexMap::new();
        annotations.insert(VOLUME_TYPE_ANNOTATION.to_string(), LOCAL_VOLUME_TYPE.to_string());

        Self {
            enabled: Some(true),
            retain: Some(true),
            access_mode: Some(AccessMode::ReadWriteOnce),
            size: Some(Quantity::Text(size.into())),
            annotations: Some(annotations),
            extra: Map::new(),
        }
    }

    /// Request a local volume, keeping any other annotations
    pub fn mark_local(&mut self) {
        self.annotations
            .get_or_insert_with(IndexMap::new)
            .insert(VOLUME_TYPE_ANNOTATION.to_string(), LOCAL_VOLUME_TYPE.to_string());
    }

    /// Whether the declaration requests a local volume
    pub fn is_local(&self) -> bool {
        self.annotations
            .as_ref()
            .and_then(|a| a.get(VOLUME_TYPE_ANNOTATION))
            .map(|v| v == LOCAL_VOLUME_TYPE)
            .unwrap_or(false)
    }

    /// Whether the chart renders a claim for this declaration
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }
}

// =============================================================================
// Volume Declaration Set
// =============================================================================

/// Mapping from logical volume name to declaration, in document order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolumeDeclarationSet(IndexMap<String, VolumeDeclaration>);

impl VolumeDeclarationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&VolumeDeclaration> {
        self.0.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut VolumeDeclaration> {
        self.0.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Insert or replace a declaration, returning the previous one
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        declaration: VolumeDeclaration,
    ) -> Option<VolumeDeclaration> {
        self.0.insert(name.into(), declaration)
    }

    /// Remove a declaration, keeping the order of the others
    pub fn remove(&mut self, name: &str) -> Option<VolumeDeclaration> {
        self.0.shift_remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &VolumeDeclaration)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// =============================================================================
// Chart Values
// =============================================================================

/// A chart's whole values document together with its validated persistence set
#[derive(Debug, Clone, PartialEq)]
pub struct ChartValues {
    /// Values document as read from the resource
    document: Value,
    /// Typed view of `document.persistence`, mutated in place
    pub persistence: VolumeDeclarationSet,
}

impl ChartValues {
    /// Validate a values document read from `resource`
    pub fn from_document(resource: &str, document: Value) -> Result<Self> {
        let section = match &document {
            Value::Object(map) => map.get(PERSISTENCE_KEY),
            Value::Null => None,
            _ => {
                return Err(Error::InvalidValues {
                    resource: resource.to_string(),
                    reason: "values document is not a map".into(),
                })
            }
        };

        let entries = match section {
            None | Some(Value::Null) => {
                return Err(Error::ValuesNotFound {
                    resource: resource.to_string(),
                    section: "persistence values".into(),
                })
            }
            Some(Value::Object(entries)) => entries,
            Some(_) => {
                return Err(Error::InvalidValues {
                    resource: resource.to_string(),
                    reason: "persistence is not a map".into(),
                })
            }
        };

        let mut persistence = VolumeDeclarationSet::new();
        for (name, entry) in entries {
            let declaration: VolumeDeclaration =
                serde_json::from_value(entry.clone()).map_err(|e| Error::InvalidValues {
                    resource: resource.to_string(),
                    reason: format!("persistence.{}: {}", name, e),
                })?;
            persistence.insert(name.clone(), declaration);
        }

        Ok(Self {
            document,
            persistence,
        })
    }

    /// Values document with the current persistence set written back
    pub fn to_document(&self) -> Result<Value> {
        let mut document = self.document.clone();
        if let Value::Object(map) = &mut document {
            map.insert(
                PERSISTENCE_KEY.to_string(),
                serde_json::to_value(&self.persistence)?,
            );
        }
        Ok(document)
    }

    /// Current persistence set as a JSON value
    pub fn persistence_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(&self.persistence)?)
    }
}
