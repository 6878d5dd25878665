//! Migration Launchers
//!
//! Strategies performing the one-directional copy between two claims:
//! - job: a `pv-migrate` Job submitted to the cluster
//! - exec: a local `pv-migrate` binary run as a child process

pub mod exec;
pub mod job;

pub use exec::*;
pub use job::*;

use crate::domain::ports::{ClusterClientRef, MigrationLauncherRef};
use crate::error::{Error, Result};
use std::sync::Arc;

/// Combined launcher configuration
#[derive(Debug, Clone, Default)]
pub struct LauncherConfig {
    pub job: JobLauncherConfig,
    /// Set to run a local binary instead of cluster jobs
    pub exec: Option<ExecLauncherConfig>,
}

/// Factory for creating migration launchers
pub struct LauncherFactory;

impl LauncherFactory {
    /// Create a launcher by name
    pub fn create(
        name: &str,
        cluster: ClusterClientRef,
        config: LauncherConfig,
    ) -> Result<MigrationLauncherRef> {
        match name.to_lowercase().as_str() {
            "job" => Ok(Arc::new(JobLauncher::new(cluster, config.job))),
            "exec" => {
                let exec = config.exec.ok_or_else(|| {
                    Error::Configuration("exec launcher requires a pv-migrate binary".into())
                })?;
                Ok(Arc::new(ExecLauncher::new(exec)))
            }
            other => Err(Error::Configuration(format!("unknown launcher: {}", other))),
        }
    }

    /// Exec launcher when a binary is configured, job launcher otherwise
    pub fn from_config(cluster: ClusterClientRef, config: LauncherConfig) -> Result<MigrationLauncherRef> {
        let name = if config.exec.is_some() { "exec" } else { "job" };
        Self::create(name, cluster, config)
    }
}
