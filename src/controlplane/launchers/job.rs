//! Cluster Job Launcher
//!
//! Submits a one-shot `pv-migrate` Job in the migration namespace, run as the
//! migration service account. Completion is observed separately through the
//! `job_finished` condition.

use crate::domain::ports::{
    ClusterClientRef, MigrationContext, MigrationHandle, MigrationLauncher,
};
use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use tracing::info;

/// Prefix of the server-generated job names
pub const JOB_NAME_PREFIX: &str = "pv-migrate-";

/// Label marking objects created by the converter
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`]
pub const MANAGED_BY: &str = "local-volume-converter";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the job launcher
#[derive(Debug, Clone)]
pub struct JobLauncherConfig {
    /// Image running the copy tool
    pub image: String,
    /// Pull policy of the copy container
    pub image_pull_policy: String,
}

impl Default for JobLauncherConfig {
    fn default() -> Self {
        Self {
            image: "docker.io/utkuozdemir/pv-migrate:1.7.1".to_string(),
            image_pull_policy: "IfNotPresent".to_string(),
        }
    }
}

/// Arguments of one copy between two claims of `namespace`
pub fn migrate_args(namespace: &str, source: &str, destination: &str) -> Vec<String> {
    vec![
        "migrate".to_string(),
        source.to_string(),
        destination.to_string(),
        "-n".to_string(),
        namespace.to_string(),
        "-N".to_string(),
        namespace.to_string(),
    ]
}

/// Build the Job copying `source` to `destination`.
///
/// The Job is never retried (`backoffLimit: 0`, `restartPolicy: Never`).
pub fn build_migration_job(
    config: &JobLauncherConfig,
    context: &MigrationContext,
    namespace: &str,
    source: &str,
    destination: &str,
) -> Job {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());

    let container = Container {
        name: "pv-migrate".to_string(),
        image: Some(config.image.clone()),
        image_pull_policy: Some(config.image_pull_policy.clone()),
        args: Some(migrate_args(namespace, source, destination)),
        ..Default::default()
    };

    Job {
        metadata: ObjectMeta {
            generate_name: Some(JOB_NAME_PREFIX.to_string()),
            namespace: Some(context.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    service_account_name: Some(context.service_account.clone()),
                    restart_policy: Some("Never".to_string()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

// =============================================================================
// Job Launcher
// =============================================================================

/// Launcher submitting cluster jobs
pub struct JobLauncher {
    cluster: ClusterClientRef,
    config: JobLauncherConfig,
}

impl JobLauncher {
    pub fn new(cluster: ClusterClientRef, config: JobLauncherConfig) -> Self {
        Self { cluster, config }
    }
}

#[async_trait]
impl MigrationLauncher for JobLauncher {
    async fn launch(
        &self,
        context: &MigrationContext,
        namespace: &str,
        source: &str,
        destination: &str,
    ) -> Result<MigrationHandle> {
        let job = build_migration_job(&self.config, context, namespace, source, destination);
        let name = self.cluster.create_job(&context.namespace, &job).await?;

        info!(
            "Submitted job {}/{} copying {} to {} in {}",
            context.namespace, name, source, destination, namespace
        );

        Ok(MigrationHandle::Job {
            namespace: context.namespace.clone(),
            name,
        })
    }

    fn launcher_name(&self) -> &str {
        "job"
    }
}
