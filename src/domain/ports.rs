//! Domain Ports - Core trait definitions for the volume converter
//!
//! These traits define the boundaries between the conversion logic and the
//! cluster control plane / external copy tool. Adapters implement these
//! traits to provide concrete functionality.

use crate::chart::ChartKind;
use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

// =============================================================================
// Migration Context
// =============================================================================

/// Default namespace the migration jobs run in
pub const DEFAULT_MIGRATION_NAMESPACE: &str = "pv-migration";

/// Default service account the migration jobs run as
pub const DEFAULT_MIGRATION_SERVICE_ACCOUNT: &str = "pv-migrate";

/// Identity used to run migration jobs with elevated privilege.
///
/// Shared by every conversion of a CLI session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationContext {
    /// Dedicated migration namespace
    pub namespace: String,
    /// Service account bound to the `edit` cluster role
    pub service_account: String,
}

impl Default for MigrationContext {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_MIGRATION_NAMESPACE.to_string(),
            service_account: DEFAULT_MIGRATION_SERVICE_ACCOUNT.to_string(),
        }
    }
}

impl MigrationContext {
    pub fn new(namespace: impl Into<String>, service_account: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            service_account: service_account.into(),
        }
    }

    /// Name of the cluster role binding granting the service account access
    pub fn role_binding_name(&self) -> String {
        format!("{}-{}", self.namespace, self.service_account)
    }
}

// =============================================================================
// Claims and Volumes
// =============================================================================

/// Lifecycle phase of a persistent volume claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClaimPhase {
    Pending,
    Bound,
    Lost,
}

impl ClaimPhase {
    /// Parse the phase reported in `status.phase`
    pub fn from_status(phase: Option<&str>) -> Self {
        match phase {
            Some("Bound") => ClaimPhase::Bound,
            Some("Lost") => ClaimPhase::Lost,
            _ => ClaimPhase::Pending,
        }
    }
}

impl std::fmt::Display for ClaimPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClaimPhase::Pending => write!(f, "Pending"),
            ClaimPhase::Bound => write!(f, "Bound"),
            ClaimPhase::Lost => write!(f, "Lost"),
        }
    }
}

/// Backing source of a persistent volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VolumeSource {
    HostPath,
    Local,
    Other,
}

impl std::fmt::Display for VolumeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumeSource::HostPath => write!(f, "hostPath"),
            VolumeSource::Local => write!(f, "local"),
            VolumeSource::Other => write!(f, "other"),
        }
    }
}

/// Persistent volume claim as seen by the converter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimInfo {
    pub namespace: String,
    pub name: String,
    pub phase: ClaimPhase,
    /// Name of the bound volume, once provisioning completed
    pub volume_name: Option<String>,
}

/// Persistent volume as seen by the converter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub name: String,
    pub source: VolumeSource,
    /// Storage capacity quantity (e.g. "1Gi")
    pub capacity: Option<String>,
    /// Namespace of the claim this volume is bound to
    pub claim_namespace: Option<String>,
    /// Name of the claim this volume is bound to
    pub claim_name: Option<String>,
}

/// Workload pod as seen by the converter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodInfo {
    pub namespace: String,
    pub name: String,
    /// Whether the `Ready` condition is `True`
    pub ready: bool,
}

// =============================================================================
// Jobs
// =============================================================================

/// Observed state of a migration job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Running,
    Complete,
    Failed,
}

/// Migration job as seen by the converter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    pub namespace: String,
    pub name: String,
    pub state: JobState,
    /// Message of the terminal condition, if any
    pub message: Option<String>,
}

/// Outcome of submitting a copy between two claims
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationHandle {
    /// Submitted as a cluster job; completion must be awaited
    Job { namespace: String, name: String },
    /// Ran to completion synchronously
    Completed { output: String },
}

// =============================================================================
// Patches
// =============================================================================

/// Content type of a chart patch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatchEncoding {
    /// RFC 6902 JSON Patch
    JsonPatch,
    /// RFC 7386 JSON Merge Patch
    MergePatch,
}

impl std::fmt::Display for PatchEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatchEncoding::JsonPatch => write!(f, "json-patch"),
            PatchEncoding::MergePatch => write!(f, "merge-patch"),
        }
    }
}

/// Encoded mutation of a chart resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPatch {
    pub encoding: PatchEncoding,
    pub payload: Value,
}

/// Cluster role binding for a namespaced service account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleBindingRequest {
    pub name: String,
    pub cluster_role: String,
    pub subject_namespace: String,
    pub subject_name: String,
}

// =============================================================================
// Cluster Client Port
// =============================================================================

/// Port for control plane operations.
///
/// Lookups of single objects return `Ok(None)` when the object does not
/// exist (yet) so that pollers can keep waiting.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List namespace names
    async fn list_namespaces(&self) -> Result<Vec<String>>;

    /// Create a namespace
    async fn create_namespace(&self, name: &str) -> Result<()>;

    /// Delete a namespace and everything in it
    async fn delete_namespace(&self, name: &str) -> Result<()>;

    /// Create a service account
    async fn create_service_account(&self, namespace: &str, name: &str) -> Result<()>;

    /// Create a cluster role binding
    async fn create_cluster_role_binding(&self, binding: &RoleBindingRequest) -> Result<()>;

    /// Delete a cluster role binding
    async fn delete_cluster_role_binding(&self, name: &str) -> Result<()>;

    /// List chart resources of a kind in a namespace
    async fn list_charts(&self, kind: ChartKind, namespace: &str) -> Result<Vec<Value>>;

    /// Get a chart resource as an untyped document
    async fn get_chart(&self, kind: ChartKind, namespace: &str, name: &str) -> Result<Value>;

    /// Submit a patch against a chart resource
    async fn patch_chart(
        &self,
        kind: ChartKind,
        namespace: &str,
        name: &str,
        patch: &ChartPatch,
    ) -> Result<()>;

    /// Get a claim
    async fn get_claim(&self, namespace: &str, name: &str) -> Result<Option<ClaimInfo>>;

    /// List claims matching a label selector
    async fn list_claims(&self, namespace: &str, label_selector: &str) -> Result<Vec<ClaimInfo>>;

    /// Delete a claim with foreground propagation
    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<()>;

    /// Get a persistent volume
    async fn get_volume(&self, name: &str) -> Result<Option<VolumeInfo>>;

    /// List pods matching a label selector
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<PodInfo>>;

    /// Set the replica count through the deployment scale subresource
    async fn scale_deployment(&self, namespace: &str, name: &str, replicas: i32) -> Result<()>;

    /// Create a job, returning its server-assigned name
    async fn create_job(&self, namespace: &str, job: &Job) -> Result<String>;

    /// Get a job
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<JobInfo>>;
}

// =============================================================================
// Migration Launcher Port
// =============================================================================

/// Port for the one-directional copy between two claims
#[async_trait]
pub trait MigrationLauncher: Send + Sync {
    /// Start copying `source` to `destination`, both claims in `namespace`
    async fn launch(
        &self,
        context: &MigrationContext,
        namespace: &str,
        source: &str,
        destination: &str,
    ) -> Result<MigrationHandle>;

    /// Get launcher name
    fn launcher_name(&self) -> &str;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ClusterClientRef = Arc<dyn ClusterClient>;
pub type MigrationLauncherRef = Arc<dyn MigrationLauncher>;
