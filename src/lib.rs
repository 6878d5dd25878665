//! Local Volume Converter
//!
//! Moves the data of chart-deployed workloads from hostPath-provisioned
//! volumes to local volumes, without losing data and without the workload
//! ever losing its claim name.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                     Volume Conversion Orchestrator                          │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │  Chart Editor   │  │    Condition    │  │     Migration Launcher      │  │
//! │  │ (HelmChart /    │  │     Poller      │  │   (pv-migrate Job / exec)   │  │
//! │  │  HelmRelease)   │  │                 │  │                             │  │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────────┬───────────────┘  │
//! │           └────────────────────┼─────────────────────────┘                  │
//! │                    ┌───────────┴───────────┐                                │
//! │                    │     ClusterClient     │                                │
//! │                    │    (kube-rs adapter)  │                                │
//! │                    └───────────────────────┘                                │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`chart`]: Chart kinds, persistence declarations and patch encoding
//! - [`cluster`]: kube-rs implementation of the cluster port
//! - [`controlplane`]: Poller, launchers, picker and the orchestrator
//! - [`domain`]: Core domain types and traits
//! - [`error`]: Error types and handling

pub mod chart;
pub mod cluster;
pub mod controlplane;
pub mod domain;
pub mod error;

// Re-export commonly used types
pub use chart::{
    ChartEditor, ChartKind, ChartRef, ChartValues, PatchOperation, PatcherFactory,
    ResourcePatcher, VolumeDeclaration, VolumeDeclarationSet,
};

pub use cluster::{create_client, KubeClusterClient};

pub use controlplane::{
    ConditionPoller, ConversionReport, ConversionRequest, ConversionState, ConverterConfig,
    ExecLauncherConfig, JobLauncherConfig, LauncherConfig, LauncherFactory,
    MigrationNamespaceManager, PollOutcome, PollerConfig, ResourcePicker,
    VolumeConversionOrchestrator,
};

pub use domain::ports::{
    ClaimInfo, ClusterClient, ClusterClientRef, MigrationContext, MigrationHandle,
    MigrationLauncher, MigrationLauncherRef, VolumeInfo, VolumeSource,
};

pub use error::{Error, Result};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
