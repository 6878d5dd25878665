//! Chart resources and their persistence declarations
//!
//! This module contains:
//! - ChartKind: the two supported chart object kinds
//! - values: typed persistence declarations embedded in chart values
//! - patcher: per-kind strategies that read and encode chart patches
//! - editor: fetch/mutate/patch operations against a live chart

pub mod editor;
pub mod patcher;
pub mod values;

pub use editor::*;
pub use patcher::*;
pub use values::*;

use crate::error::{Error, Result};
use kube::discovery::ApiResource;
use serde::{Deserialize, Serialize};

/// Suffix distinguishing the temporary declaration from the permanent one
pub const TEMP_SUFFIX: &str = "-temp";

/// Annotation read by the provisioner to pick the volume type
pub const VOLUME_TYPE_ANNOTATION: &str = "volumeType";

/// Annotation value requesting a local volume
pub const LOCAL_VOLUME_TYPE: &str = "local";

/// Label linking claims and pods to the chart that owns them
pub const CHART_NAME_LABEL: &str = "app.kubernetes.io/name";

// =============================================================================
// Chart Kind
// =============================================================================

/// Supported chart object kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChartKind {
    /// k3s helm-controller chart (`helm.cattle.io`)
    HelmChart,
    /// Flux helm release (`helm.toolkit.fluxcd.io`)
    HelmRelease,
}

impl ChartKind {
    /// All supported kinds, in discovery order
    pub const ALL: [ChartKind; 2] = [ChartKind::HelmRelease, ChartKind::HelmChart];

    pub fn group(&self) -> &'static str {
        match self {
            ChartKind::HelmChart => "helm.cattle.io",
            ChartKind::HelmRelease => "helm.toolkit.fluxcd.io",
        }
    }

    pub fn version(&self) -> &'static str {
        match self {
            ChartKind::HelmChart => "v1",
            ChartKind::HelmRelease => "v2beta1",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            ChartKind::HelmChart => "helmcharts",
            ChartKind::HelmRelease => "helmreleases",
        }
    }

    /// Dynamic API resource used to address this kind
    pub fn api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.group().to_string(),
            version: self.version().to_string(),
            api_version: format!("{}/{}", self.group(), self.version()),
            kind: self.to_string(),
            plural: self.plural().to_string(),
        }
    }
}

impl std::fmt::Display for ChartKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChartKind::HelmChart => write!(f, "HelmChart"),
            ChartKind::HelmRelease => write!(f, "HelmRelease"),
        }
    }
}

impl std::str::FromStr for ChartKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "HelmChart" => Ok(ChartKind::HelmChart),
            "HelmRelease" => Ok(ChartKind::HelmRelease),
            other => Err(Error::Configuration(format!(
                "unsupported chart kind: {}",
                other
            ))),
        }
    }
}

// =============================================================================
// Chart Reference
// =============================================================================

/// Identity of a chart resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChartRef {
    pub kind: ChartKind,
    /// Namespace the chart object itself lives in
    pub namespace: String,
    pub name: String,
}

impl ChartRef {
    pub fn new(kind: ChartKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Label selector matching the claims and pods rendered by this chart
    pub fn label_selector(&self) -> String {
        format!("{}={}", CHART_NAME_LABEL, self.name)
    }
}

impl std::fmt::Display for ChartRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

// =============================================================================
// Claim Naming
// =============================================================================

/// Logical name of the temporary declaration for a volume
pub fn temp_volume_name(volume_name: &str) -> String {
    format!("{}{}", volume_name, TEMP_SUFFIX)
}

/// Whether a declaration or claim name denotes a temporary volume
pub fn is_temp_name(name: &str) -> bool {
    name.ends_with(TEMP_SUFFIX)
}

/// Claim name the chart renders for a logical volume
pub fn claim_name(chart_name: &str, volume_name: &str) -> String {
    format!("{}-{}", chart_name, volume_name)
}

/// Recover the logical volume name from a claim rendered by `chart_name`
pub fn logical_volume_name(chart_name: &str, claim_name: &str) -> Result<String> {
    claim_name
        .strip_prefix(chart_name)
        .and_then(|rest| rest.strip_prefix('-'))
        .filter(|rest| !rest.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::Configuration(format!(
                "claim {} does not follow the <chart>-<volume> naming of chart {}",
                claim_name, chart_name
            ))
        })
}
