//! Kubernetes Cluster Adapter
//!
//! Implements the [`ClusterClient`] port on top of kube-rs. Typed
//! `k8s-openapi` objects are used for core resources; chart resources are
//! addressed as dynamic objects through their [`ApiResource`].

#[cfg(test)]
pub(crate) mod memory;

use crate::chart::ChartKind;
use crate::domain::ports::{
    ChartPatch, ClaimInfo, ClaimPhase, ClusterClient, JobInfo, JobState, PatchEncoding, PodInfo,
    RoleBindingRequest, VolumeInfo, VolumeSource,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{
    Namespace, PersistentVolume, PersistentVolumeClaim, Pod, ServiceAccount,
};
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};

/// Create a kube client from an optional kubeconfig path.
///
/// Without a path the configuration is inferred (in-cluster service account
/// or the default kubeconfig).
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client> {
    let config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::Configuration(format!(
                    "failed to read kubeconfig {}: {}",
                    path.display(),
                    e
                ))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::Configuration(format!("failed to load kubeconfig: {}", e)))?
        }
        None => Config::infer()
            .await
            .map_err(|e| Error::Configuration(format!("failed to infer config: {}", e)))?,
    };

    info!("Connecting to cluster at {}", config.cluster_url);
    Ok(Client::try_from(config)?)
}

fn status_code(error: &kube::Error) -> Option<u16> {
    match error {
        kube::Error::Api(response) => Some(response.code),
        _ => None,
    }
}

fn on_create<T>(result: kube::Result<T>, kind: &str, name: &str) -> Result<T> {
    result.map_err(|e| match status_code(&e) {
        Some(409) => Error::ResourceExists {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        _ => Error::Kube(e),
    })
}

fn on_delete<T>(result: kube::Result<T>, kind: &str, name: &str) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if status_code(&e) == Some(404) => Err(Error::ResourceNotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        }),
        Err(e) => Err(Error::Kube(e)),
    }
}

// =============================================================================
// Conversions
// =============================================================================

fn claim_info(claim: PersistentVolumeClaim) -> ClaimInfo {
    ClaimInfo {
        namespace: claim.metadata.namespace.unwrap_or_default(),
        name: claim.metadata.name.unwrap_or_default(),
        phase: ClaimPhase::from_status(claim.status.as_ref().and_then(|s| s.phase.as_deref())),
        volume_name: claim.spec.and_then(|s| s.volume_name),
    }
}

fn volume_info(volume: PersistentVolume) -> VolumeInfo {
    let name = volume.metadata.name.unwrap_or_default();
    let spec = volume.spec.unwrap_or_default();

    let source = if spec.local.is_some() {
        VolumeSource::Local
    } else if spec.host_path.is_some() {
        VolumeSource::HostPath
    } else {
        VolumeSource::Other
    };
    let capacity = spec
        .capacity
        .as_ref()
        .and_then(|c| c.get("storage"))
        .map(|q| q.0.clone());
    let claim_ref = spec.claim_ref.unwrap_or_default();

    VolumeInfo {
        name,
        source,
        capacity,
        claim_namespace: claim_ref.namespace,
        claim_name: claim_ref.name,
    }
}

fn pod_info(pod: Pod) -> PodInfo {
    let ready = pod
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false);

    PodInfo {
        namespace: pod.metadata.namespace.unwrap_or_default(),
        name: pod.metadata.name.unwrap_or_default(),
        ready,
    }
}

fn job_info(job: Job) -> JobInfo {
    let conditions = job
        .status
        .and_then(|s| s.conditions)
        .unwrap_or_default();
    let terminal = |kind: &str| {
        conditions
            .iter()
            .find(|c| c.type_ == kind && c.status == "True")
    };

    let (state, message) = if let Some(c) = terminal("Complete") {
        (JobState::Complete, c.message.clone())
    } else if let Some(c) = terminal("Failed") {
        (JobState::Failed, c.message.clone().or_else(|| c.reason.clone()))
    } else {
        (JobState::Running, None)
    };

    JobInfo {
        namespace: job.metadata.namespace.unwrap_or_default(),
        name: job.metadata.name.unwrap_or_default(),
        state,
        message,
    }
}

// =============================================================================
// Kube Cluster Client
// =============================================================================

/// [`ClusterClient`] backed by a live API server
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn charts(&self, kind: ChartKind, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &kind.api_resource())
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        on_create(
            api.create(&PostParams::default(), &namespace).await,
            "Namespace",
            name,
        )?;
        info!("Created namespace {}", name);
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        on_delete(
            api.delete(name, &DeleteParams::default()).await,
            "Namespace",
            name,
        )?;
        info!("Deleted namespace {}", name);
        Ok(())
    }

    async fn create_service_account(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let account = ServiceAccount {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        on_create(
            api.create(&PostParams::default(), &account).await,
            "ServiceAccount",
            name,
        )?;
        info!("Created service account {}/{}", namespace, name);
        Ok(())
    }

    async fn create_cluster_role_binding(&self, binding: &RoleBindingRequest) -> Result<()> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        let object = ClusterRoleBinding {
            metadata: ObjectMeta {
                name: Some(binding.name.clone()),
                ..Default::default()
            },
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "ClusterRole".to_string(),
                name: binding.cluster_role.clone(),
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: binding.subject_name.clone(),
                namespace: Some(binding.subject_namespace.clone()),
                ..Default::default()
            }]),
        };
        on_create(
            api.create(&PostParams::default(), &object).await,
            "ClusterRoleBinding",
            &binding.name,
        )?;
        info!(
            "Bound {}/{} to cluster role {}",
            binding.subject_namespace, binding.subject_name, binding.cluster_role
        );
        Ok(())
    }

    async fn delete_cluster_role_binding(&self, name: &str) -> Result<()> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        on_delete(
            api.delete(name, &DeleteParams::default()).await,
            "ClusterRoleBinding",
            name,
        )?;
        info!("Deleted cluster role binding {}", name);
        Ok(())
    }

    async fn list_charts(&self, kind: ChartKind, namespace: &str) -> Result<Vec<Value>> {
        match self.charts(kind, namespace).list(&ListParams::default()).await {
            Ok(list) => list
                .items
                .into_iter()
                .map(|obj| Ok(serde_json::to_value(obj)?))
                .collect(),
            // CRD not installed
            Err(e) if status_code(&e) == Some(404) => {
                debug!("{} resources not served by this cluster", kind);
                Ok(Vec::new())
            }
            Err(e) => Err(Error::Kube(e)),
        }
    }

    async fn get_chart(&self, kind: ChartKind, namespace: &str, name: &str) -> Result<Value> {
        let object = self
            .charts(kind, namespace)
            .get_opt(name)
            .await?
            .ok_or_else(|| Error::ResourceNotFound {
                kind: kind.to_string(),
                name: format!("{}/{}", namespace, name),
            })?;
        Ok(serde_json::to_value(object)?)
    }

    async fn patch_chart(
        &self,
        kind: ChartKind,
        namespace: &str,
        name: &str,
        patch: &ChartPatch,
    ) -> Result<()> {
        let api = self.charts(kind, namespace);
        let params = PatchParams::default();

        let result = match patch.encoding {
            PatchEncoding::JsonPatch => {
                let ops: json_patch::Patch = serde_json::from_value(patch.payload.clone())?;
                api.patch(name, &params, &Patch::Json::<()>(ops)).await
            }
            PatchEncoding::MergePatch => api.patch(name, &params, &Patch::Merge(&patch.payload)).await,
        };

        match result {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 409 || response.code == 422 => {
                Err(Error::PatchConflict {
                    kind: kind.to_string(),
                    name: format!("{}/{}", namespace, name),
                    reason: response.message,
                })
            }
            Err(e) => Err(Error::Kube(e)),
        }
    }

    async fn get_claim(&self, namespace: &str, name: &str) -> Result<Option<ClaimInfo>> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?.map(claim_info))
    }

    async fn list_claims(&self, namespace: &str, label_selector: &str) -> Result<Vec<ClaimInfo>> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list.items.into_iter().map(claim_info).collect())
    }

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        on_delete(
            api.delete(name, &DeleteParams::foreground()).await,
            "PersistentVolumeClaim",
            &format!("{}/{}", namespace, name),
        )?;
        info!("Deleted claim {}/{}", namespace, name);
        Ok(())
    }

    async fn get_volume(&self, name: &str) -> Result<Option<VolumeInfo>> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?.map(volume_info))
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<PodInfo>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list.items.into_iter().map(pod_info).collect())
    }

    async fn scale_deployment(&self, namespace: &str, name: &str, replicas: i32) -> Result<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);

        let mut scale = match api.get_scale(name).await {
            Ok(scale) => scale,
            Err(e) if status_code(&e) == Some(404) => {
                return Err(Error::ResourceNotFound {
                    kind: "Deployment".into(),
                    name: format!("{}/{}", namespace, name),
                })
            }
            Err(e) => return Err(Error::Kube(e)),
        };
        scale.spec.get_or_insert_with(Default::default).replicas = Some(replicas);

        api.replace_scale(name, &PostParams::default(), serde_json::to_vec(&scale)?)
            .await?;
        info!("Scaled deployment {}/{} to {}", namespace, name, replicas);
        Ok(())
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<String> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        let created = api.create(&PostParams::default(), job).await?;
        created.metadata.name.ok_or_else(|| {
            Error::Internal(format!("job created in {} without a name", namespace))
        })
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<JobInfo>> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?.map(job_info))
    }
}
