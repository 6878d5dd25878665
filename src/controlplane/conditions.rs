//! Poll conditions evaluated against the cluster
//!
//! Each condition is a single evaluation suitable for
//! [`ConditionPoller::wait_for`](super::poller::ConditionPoller::wait_for).
//! Objects that do not exist yet surface as transient lookups.

use super::poller::PollOutcome;
use crate::chart::CHART_NAME_LABEL;
use crate::domain::ports::{ClaimPhase, ClusterClient, JobState, VolumeSource};
use crate::error::{Error, Result};
use tracing::debug;

/// Tool name reported when a migration job fails
pub const COPY_TOOL: &str = "pv-migrate";

fn selector(workload: &str) -> String {
    format!("{}={}", CHART_NAME_LABEL, workload)
}

/// Claim is bound, and bound to a local volume
pub async fn claim_bound_local(
    cluster: &dyn ClusterClient,
    namespace: &str,
    claim: &str,
) -> Result<PollOutcome> {
    let info = cluster
        .get_claim(namespace, claim)
        .await?
        .ok_or_else(|| Error::TransientLookup {
            kind: "PersistentVolumeClaim".into(),
            name: format!("{}/{}", namespace, claim),
        })?;

    let volume_name = match (info.phase, info.volume_name) {
        (ClaimPhase::Bound, Some(volume)) => volume,
        (phase, _) => {
            debug!("Claim {}/{} is {}", namespace, claim, phase);
            return Ok(PollOutcome::Pending);
        }
    };

    let volume = cluster
        .get_volume(&volume_name)
        .await?
        .ok_or_else(|| Error::TransientLookup {
            kind: "PersistentVolume".into(),
            name: volume_name.clone(),
        })?;

    if volume.source != VolumeSource::Local {
        debug!(
            "Claim {}/{} still bound to {} volume {}",
            namespace, claim, volume.source, volume.name
        );
        return Ok(PollOutcome::Pending);
    }

    Ok(PollOutcome::Satisfied)
}

/// Exactly one pod of the workload exists and it is ready
pub async fn pod_ready(
    cluster: &dyn ClusterClient,
    namespace: &str,
    workload: &str,
) -> Result<PollOutcome> {
    let pods = cluster.list_pods(namespace, &selector(workload)).await?;

    match pods.as_slice() {
        [pod] if pod.ready => Ok(PollOutcome::Satisfied),
        [] => Ok(PollOutcome::Pending),
        [pod] => {
            debug!("Pod {}/{} not ready", namespace, pod.name);
            Ok(PollOutcome::Pending)
        }
        many => {
            debug!("{} pods found for {}/{}", many.len(), namespace, workload);
            Ok(PollOutcome::Pending)
        }
    }
}

/// No pod of the workload exists
pub async fn pod_gone(
    cluster: &dyn ClusterClient,
    namespace: &str,
    workload: &str,
) -> Result<PollOutcome> {
    let pods = cluster.list_pods(namespace, &selector(workload)).await?;
    if pods.is_empty() {
        Ok(PollOutcome::Satisfied)
    } else {
        Ok(PollOutcome::Pending)
    }
}

/// Job completed; a failed job ends the wait with an error
pub async fn job_finished(
    cluster: &dyn ClusterClient,
    namespace: &str,
    job: &str,
) -> Result<PollOutcome> {
    let info = cluster
        .get_job(namespace, job)
        .await?
        .ok_or_else(|| Error::TransientLookup {
            kind: "Job".into(),
            name: format!("{}/{}", namespace, job),
        })?;

    match info.state {
        JobState::Complete => Ok(PollOutcome::Satisfied),
        JobState::Running => Ok(PollOutcome::Pending),
        JobState::Failed => Err(Error::ExternalToolFailure {
            tool: COPY_TOOL.to_string(),
            target: format!("job {}/{}", namespace, job),
            reason: info.message.unwrap_or_else(|| "job failed".to_string()),
        }),
    }
}
