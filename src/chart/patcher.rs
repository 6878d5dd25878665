//! Chart Patchers
//!
//! Per-kind strategies for reading the persistence declarations out of a
//! chart resource and encoding the patch that writes them back:
//! - HelmChart: values are a YAML document in `spec.valuesContent`
//! - HelmRelease: values are a native map in `spec.values`

use super::values::{ChartValues, PERSISTENCE_KEY};
use super::ChartKind;
use crate::domain::ports::{ChartPatch, PatchEncoding};
use crate::error::{Error, Result};
use serde_json::{json, Value};
use std::sync::Arc;

// =============================================================================
// Patch Operation
// =============================================================================

/// Mutation applied to the persistence set before encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatchOperation {
    /// A declaration was added
    Declare,
    /// Annotations of an existing declaration changed
    Annotate,
    /// A declaration was removed
    Remove,
}

impl std::fmt::Display for PatchOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatchOperation::Declare => write!(f, "declare"),
            PatchOperation::Annotate => write!(f, "annotate"),
            PatchOperation::Remove => write!(f, "remove"),
        }
    }
}

// =============================================================================
// Resource Patcher Port
// =============================================================================

/// Strategy for one chart kind
pub trait ResourcePatcher: Send + Sync {
    /// Chart kind handled by this patcher
    fn kind(&self) -> ChartKind;

    /// Namespace the chart deploys its workload into
    fn locate_namespace(&self, resource: &Value) -> Result<String>;

    /// Read and validate the values document and its persistence set
    fn read_volume_declarations(&self, resource: &Value, resource_name: &str)
        -> Result<ChartValues>;

    /// Encode the patch writing `values` back to the resource.
    ///
    /// `target` is the logical name of the declaration the operation touched.
    fn encode_patch(
        &self,
        values: &ChartValues,
        target: &str,
        operation: PatchOperation,
    ) -> Result<ChartPatch>;
}

/// Walk a path of object keys
pub fn nested<'a>(document: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter()
        .try_fold(document, |current, key| current.as_object()?.get(*key))
}

fn nested_str<'a>(document: &'a Value, path: &[&str]) -> Option<&'a str> {
    nested(document, path).and_then(Value::as_str)
}

fn contains_null(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.iter().any(contains_null),
        Value::Object(map) => map.values().any(contains_null),
        _ => false,
    }
}

/// Escape a key for use as one JSON Pointer reference token
fn escape_pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

// =============================================================================
// HelmChart Patcher
// =============================================================================

/// Patcher for `helm.cattle.io/v1` HelmChart resources
#[derive(Debug, Clone, Copy, Default)]
pub struct HelmChartPatcher;

impl HelmChartPatcher {
    const VALUES_PATH: [&'static str; 2] = ["spec", "valuesContent"];
}

impl ResourcePatcher for HelmChartPatcher {
    fn kind(&self) -> ChartKind {
        ChartKind::HelmChart
    }

    fn locate_namespace(&self, resource: &Value) -> Result<String> {
        nested_str(resource, &["spec", "targetNamespace"])
            .or_else(|| nested_str(resource, &["metadata", "namespace"]))
            .map(str::to_string)
            .ok_or_else(|| Error::ValuesNotFound {
                resource: nested_str(resource, &["metadata", "name"])
                    .unwrap_or_default()
                    .to_string(),
                section: "spec.targetNamespace".into(),
            })
    }

    fn read_volume_declarations(
        &self,
        resource: &Value,
        resource_name: &str,
    ) -> Result<ChartValues> {
        let content = match nested(resource, &Self::VALUES_PATH) {
            None | Some(Value::Null) => {
                return Err(Error::ValuesNotFound {
                    resource: resource_name.to_string(),
                    section: "valuesContent".into(),
                })
            }
            Some(Value::String(content)) => content,
            Some(_) => {
                return Err(Error::InvalidValues {
                    resource: resource_name.to_string(),
                    reason: "spec.valuesContent is not a string".into(),
                })
            }
        };

        let document: Value = serde_yaml::from_str(content).map_err(|e| Error::InvalidValues {
            resource: resource_name.to_string(),
            reason: format!("valuesContent is not valid YAML: {}", e),
        })?;

        ChartValues::from_document(resource_name, document)
    }

    fn encode_patch(
        &self,
        values: &ChartValues,
        _target: &str,
        _operation: PatchOperation,
    ) -> Result<ChartPatch> {
        let content = serde_yaml::to_string(&values.to_document()?)?;

        Ok(ChartPatch {
            encoding: PatchEncoding::JsonPatch,
            payload: json!([{
                "op": "replace",
                "path": "/spec/valuesContent",
                "value": content,
            }]),
        })
    }
}

// =============================================================================
// HelmRelease Patcher
// =============================================================================

/// Patcher for `helm.toolkit.fluxcd.io` HelmRelease resources
#[derive(Debug, Clone, Copy, Default)]
pub struct HelmReleasePatcher;

impl HelmReleasePatcher {
    const VALUES_PATH: [&'static str; 2] = ["spec", "values"];
}

impl ResourcePatcher for HelmReleasePatcher {
    fn kind(&self) -> ChartKind {
        ChartKind::HelmRelease
    }

    fn locate_namespace(&self, resource: &Value) -> Result<String> {
        nested_str(resource, &["metadata", "namespace"])
            .map(str::to_string)
            .ok_or_else(|| Error::ValuesNotFound {
                resource: nested_str(resource, &["metadata", "name"])
                    .unwrap_or_default()
                    .to_string(),
                section: "metadata.namespace".into(),
            })
    }

    fn read_volume_declarations(
        &self,
        resource: &Value,
        resource_name: &str,
    ) -> Result<ChartValues> {
        let document = match nested(resource, &Self::VALUES_PATH) {
            None | Some(Value::Null) => {
                return Err(Error::ValuesNotFound {
                    resource: resource_name.to_string(),
                    section: "values".into(),
                })
            }
            Some(document) => document.clone(),
        };

        ChartValues::from_document(resource_name, document)
    }

    fn encode_patch(
        &self,
        values: &ChartValues,
        target: &str,
        operation: PatchOperation,
    ) -> Result<ChartPatch> {
        match operation {
            PatchOperation::Remove => Ok(ChartPatch {
                encoding: PatchEncoding::JsonPatch,
                payload: json!([{
                    "op": "remove",
                    "path": format!(
                        "/spec/values/{}/{}",
                        PERSISTENCE_KEY,
                        escape_pointer_token(target)
                    ),
                }]),
            }),
            PatchOperation::Declare | PatchOperation::Annotate => {
                let persistence = values.persistence_value()?;

                // a merge patch would delete keys explicitly set to null
                if contains_null(&persistence) {
                    return Ok(ChartPatch {
                        encoding: PatchEncoding::JsonPatch,
                        payload: json!([{
                            "op": "replace",
                            "path": format!("/spec/values/{}", PERSISTENCE_KEY),
                            "value": persistence,
                        }]),
                    });
                }

                Ok(ChartPatch {
                    encoding: PatchEncoding::MergePatch,
                    payload: json!({
                        "spec": {
                            "values": {
                                PERSISTENCE_KEY: persistence,
                            }
                        }
                    }),
                })
            }
        }
    }
}

// =============================================================================
// Patcher Factory
// =============================================================================

/// Factory for selecting the patcher of a chart kind
pub struct PatcherFactory;

impl PatcherFactory {
    /// Patcher for a known kind
    pub fn for_kind(kind: ChartKind) -> Arc<dyn ResourcePatcher> {
        match kind {
            ChartKind::HelmChart => Arc::new(HelmChartPatcher),
            ChartKind::HelmRelease => Arc::new(HelmReleasePatcher),
        }
    }

    /// Patcher for a kind name such as `HelmRelease`
    pub fn from_kind_name(name: &str) -> Result<Arc<dyn ResourcePatcher>> {
        Ok(Self::for_kind(name.parse()?))
    }

    /// Patcher for an untyped resource, dispatching on its `kind`
    pub fn for_resource(resource: &Value) -> Result<Arc<dyn ResourcePatcher>> {
        let kind = nested_str(resource, &["kind"]).ok_or_else(|| {
            Error::Configuration("resource has no kind".into())
        })?;
        Self::from_kind_name(kind)
    }
}
