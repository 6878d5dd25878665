//! Volume Conversion Orchestrator
//!
//! Moves the data of a hostPath-backed claim onto a local volume by bouncing
//! it through a temporary claim:
//! - declare a local `-temp` volume in the chart and wait for its claim
//! - stop the workload and copy the data into the temporary claim
//! - delete the original claim and re-declare it as local
//! - stop the workload again and copy the data back
//! - drop the temporary declaration and claim
//!
//! Every failure aborts the conversion where it stands. Nothing is rolled
//! back: between deleting the original claim and the restored claim binding,
//! the data only exists on the temporary claim.

use crate::chart::{logical_volume_name, ChartEditor, ChartRef, PatcherFactory};
use crate::controlplane::conditions;
use crate::controlplane::launchers::{LauncherConfig, LauncherFactory};
use crate::controlplane::poller::{ConditionPoller, PollerConfig};
use crate::domain::ports::{
    ClusterClientRef, MigrationContext, MigrationHandle, MigrationLauncherRef, VolumeInfo,
};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

// =============================================================================
// Conversion State
// =============================================================================

/// Checkpoints of one conversion, in the order they are reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversionState {
    Start,
    TempClaimDeclared,
    TempClaimBound,
    /// Workload scaled to zero before the first (1) or second (2) copy
    WorkloadQuiesced(u8),
    ForwardCopyComplete,
    OldClaimDeleted,
    OriginalDeclarationRestored,
    OriginalClaimBound,
    ReverseCopyComplete,
    TempDeclarationRemoved,
    TempClaimDeleted,
    WorkloadReady,
    Done,
}

impl std::fmt::Display for ConversionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversionState::WorkloadQuiesced(pass) => write!(f, "WorkloadQuiesced({})", pass),
            other => write!(f, "{:?}", other),
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the converter
#[derive(Debug, Clone, Default)]
pub struct ConverterConfig {
    /// Namespace and service account the copies run with
    pub context: MigrationContext,
    pub poller: PollerConfig,
    pub launcher: LauncherConfig,
}

// =============================================================================
// Request and Report
// =============================================================================

/// One claim selected for conversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRequest {
    /// Chart declaring the volume
    pub chart: ChartRef,
    /// Namespace the chart deploys its workload into
    pub workload_namespace: String,
    /// Claim currently bound to the hostPath volume
    pub claim_name: String,
    /// The hostPath volume
    pub volume: VolumeInfo,
}

/// Outcome of a finished conversion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionReport {
    pub chart: ChartRef,
    pub workload_namespace: String,
    pub claim_name: String,
    pub temp_claim_name: String,
    /// Logical volume name in the chart values
    pub volume_name: String,
    /// Every state reached, starting with `Start`
    pub states: Vec<ConversionState>,
    /// Message for the operator to carry the change into the chart source
    pub notice: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Text telling the operator to persist the local annotation in their source
pub fn completion_notice(request: &ConversionRequest, volume_name: &str) -> String {
    format!(
        "Converted {}/{} to a local volume.\n\
         Add the following to persistence.{} of {} in your chart source,\n\
         otherwise the next upgrade renders a hostPath claim again:\n\
         \n\
         annotations:\n  volumeType: local\n",
        request.workload_namespace, request.claim_name, volume_name, request.chart
    )
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Drives one conversion at a time
pub struct VolumeConversionOrchestrator {
    cluster: ClusterClientRef,
    launcher: MigrationLauncherRef,
    poller: ConditionPoller,
    context: MigrationContext,
    /// Last state reached by the running or last conversion
    current: Mutex<ConversionState>,
}

impl VolumeConversionOrchestrator {
    /// Create an orchestrator, picking the launcher from the configuration
    pub fn new(
        config: ConverterConfig,
        cluster: ClusterClientRef,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let launcher = LauncherFactory::from_config(cluster.clone(), config.launcher)?;
        Ok(Self::with_launcher(
            config.context,
            config.poller,
            cluster,
            launcher,
            cancel,
        ))
    }

    pub fn with_launcher(
        context: MigrationContext,
        poller: PollerConfig,
        cluster: ClusterClientRef,
        launcher: MigrationLauncherRef,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cluster,
            launcher,
            poller: ConditionPoller::new(poller, cancel),
            context,
            current: Mutex::new(ConversionState::Start),
        }
    }

    /// Last state reached
    pub fn current_state(&self) -> ConversionState {
        *self.current.lock()
    }

    /// Convert the claim of `request` to a local volume
    pub async fn convert(&self, request: &ConversionRequest) -> Result<ConversionReport> {
        let volume_name = logical_volume_name(&request.chart.name, &request.claim_name)?;
        let size = request.volume.capacity.clone().ok_or_else(|| {
            Error::Configuration(format!("volume {} has no capacity", request.volume.name))
        })?;

        *self.current.lock() = ConversionState::Start;
        info!(
            "Converting {}/{} ({} volume {}, {}) declared by {} using the {} launcher",
            request.workload_namespace,
            request.claim_name,
            request.volume.source,
            request.volume.name,
            size,
            request.chart,
            self.launcher.launcher_name()
        );

        let mut report = ConversionReport {
            chart: request.chart.clone(),
            workload_namespace: request.workload_namespace.clone(),
            claim_name: request.claim_name.clone(),
            temp_claim_name: String::new(),
            volume_name: volume_name.clone(),
            states: vec![ConversionState::Start],
            notice: String::new(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };

        match self.run(request, &volume_name, &size, &mut report).await {
            Ok(()) => {
                report.notice = completion_notice(request, &volume_name);
                report.finished_at = Utc::now();
                self.transition(&mut report, ConversionState::Done);
                Ok(report)
            }
            Err(e) => {
                error!(
                    "Conversion of {}/{} aborted in state {}: {}",
                    request.workload_namespace,
                    request.claim_name,
                    self.current_state(),
                    e
                );
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        request: &ConversionRequest,
        volume_name: &str,
        size: &str,
        report: &mut ConversionReport,
    ) -> Result<()> {
        let ns = request.workload_namespace.as_str();
        let claim = request.claim_name.as_str();
        let workload = request.chart.name.as_str();
        let editor = ChartEditor::new(
            self.cluster.clone(),
            PatcherFactory::for_kind(request.chart.kind),
            request.chart.clone(),
        );

        let temp = editor.declare_temp_claim(volume_name, size).await?;
        report.temp_claim_name = temp.clone();
        self.transition(report, ConversionState::TempClaimDeclared);

        self.wait_bound_local(ns, &temp).await?;
        self.transition(report, ConversionState::TempClaimBound);

        self.quiesce(ns, workload).await?;
        self.transition(report, ConversionState::WorkloadQuiesced(1));

        self.copy(ns, claim, &temp).await?;
        self.transition(report, ConversionState::ForwardCopyComplete);

        self.cluster.delete_claim(ns, claim).await?;
        self.transition(report, ConversionState::OldClaimDeleted);

        editor.mark_local(volume_name).await?;
        self.transition(report, ConversionState::OriginalDeclarationRestored);

        self.wait_bound_local(ns, claim).await?;
        self.transition(report, ConversionState::OriginalClaimBound);

        self.quiesce(ns, workload).await?;
        self.transition(report, ConversionState::WorkloadQuiesced(2));

        self.copy(ns, &temp, claim).await?;
        self.transition(report, ConversionState::ReverseCopyComplete);

        editor.remove_temp_declaration(volume_name).await?;
        self.transition(report, ConversionState::TempDeclarationRemoved);

        self.cluster.delete_claim(ns, &temp).await?;
        self.transition(report, ConversionState::TempClaimDeleted);

        self.wait_pod_ready(ns, workload).await?;
        self.transition(report, ConversionState::WorkloadReady);

        Ok(())
    }

    fn transition(&self, report: &mut ConversionReport, state: ConversionState) {
        *self.current.lock() = state;
        report.states.push(state);
        info!(
            "{}/{}: {}",
            report.workload_namespace, report.claim_name, state
        );
    }

    async fn wait_bound_local(&self, namespace: &str, claim: &str) -> Result<()> {
        let cluster = self.cluster.as_ref();
        let description = format!("claim {}/{} bound to a local volume", namespace, claim);
        self.poller
            .wait_for(&description, || {
                conditions::claim_bound_local(cluster, namespace, claim)
            })
            .await?;
        Ok(())
    }

    async fn wait_pod_ready(&self, namespace: &str, workload: &str) -> Result<()> {
        let cluster = self.cluster.as_ref();
        let description = format!("pod of {}/{} ready", namespace, workload);
        self.poller
            .wait_for(&description, || conditions::pod_ready(cluster, namespace, workload))
            .await?;
        Ok(())
    }

    /// Wait for the workload to run, then scale it to zero and wait for its pod to go
    async fn quiesce(&self, namespace: &str, workload: &str) -> Result<()> {
        self.wait_pod_ready(namespace, workload).await?;

        self.cluster.scale_deployment(namespace, workload, 0).await?;

        let cluster = self.cluster.as_ref();
        let description = format!("pods of {}/{} gone", namespace, workload);
        self.poller
            .wait_for(&description, || conditions::pod_gone(cluster, namespace, workload))
            .await?;
        Ok(())
    }

    async fn copy(&self, namespace: &str, source: &str, destination: &str) -> Result<()> {
        let handle = self
            .launcher
            .launch(&self.context, namespace, source, destination)
            .await?;

        match handle {
            MigrationHandle::Job {
                namespace: job_namespace,
                name,
            } => {
                let cluster = self.cluster.as_ref();
                let description = format!("job {}/{}", job_namespace, name);
                self.poller
                    .wait_for(&description, || {
                        conditions::job_finished(cluster, &job_namespace, &name)
                    })
                    .await?;
            }
            MigrationHandle::Completed { .. } => {}
        }

        info!("Copied {}/{} to {}/{}", namespace, source, namespace, destination);
        Ok(())
    }
}
