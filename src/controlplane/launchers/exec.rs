//! Local Binary Launcher
//!
//! Runs a local `pv-migrate` binary against the cluster of the current
//! kubeconfig and waits for it to finish. The tool reports success on stdout;
//! a zero exit status alone is not trusted.

use crate::controlplane::conditions::COPY_TOOL;
use crate::domain::ports::{MigrationContext, MigrationHandle, MigrationLauncher};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use super::job::migrate_args;

/// Marker printed by the copy tool on success
pub const SUCCESS_MARKER: &str = "Migration succeeded";

/// Configuration for the exec launcher
#[derive(Debug, Clone)]
pub struct ExecLauncherConfig {
    /// Path of the copy tool binary
    pub binary: PathBuf,
    /// Kubeconfig handed to the tool, if not the default one
    pub kubeconfig: Option<PathBuf>,
}

/// Launcher running the copy tool as a child process
pub struct ExecLauncher {
    config: ExecLauncherConfig,
}

impl ExecLauncher {
    pub fn new(config: ExecLauncherConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MigrationLauncher for ExecLauncher {
    async fn launch(
        &self,
        _context: &MigrationContext,
        namespace: &str,
        source: &str,
        destination: &str,
    ) -> Result<MigrationHandle> {
        let target = format!("{}/{} -> {}/{}", namespace, source, namespace, destination);
        info!("Running {} for {}", self.config.binary.display(), target);

        let mut command = Command::new(&self.config.binary);
        command
            .args(migrate_args(namespace, source, destination))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(kubeconfig) = &self.config.kubeconfig {
            command.env("KUBECONFIG", kubeconfig);
        }

        let output = command.output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!("{} output:\n{}", COPY_TOOL, stdout);

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::ExternalToolFailure {
                tool: COPY_TOOL.to_string(),
                target,
                reason: format!("{}\n{}{}", output.status, stdout, stderr),
            });
        }

        if !stdout.contains(SUCCESS_MARKER) {
            return Err(Error::ExternalToolFailure {
                tool: COPY_TOOL.to_string(),
                target,
                reason: format!("no success marker in output:\n{}", stdout),
            });
        }

        Ok(MigrationHandle::Completed { output: stdout })
    }

    fn launcher_name(&self) -> &str {
        "exec"
    }
}
