//! In-memory control plane
//!
//! Simulates the parts of a cluster the converter talks to: the helm
//! controller re-rendering claims when a chart is patched, a provisioner that
//! binds new claims after a configurable number of lookups, a deployment whose
//! single pod is ready once its declared claims are, migration jobs with
//! scripted outcomes that copy claim data, and claims that linger for a while
//! after deletion.

use crate::chart::{
    claim_name, ChartKind, ChartRef, PatcherFactory, VolumeDeclarationSet, CHART_NAME_LABEL,
};
use crate::domain::ports::{
    ChartPatch, ClaimInfo, ClaimPhase, ClusterClient, JobInfo, JobState, PatchEncoding, PodInfo,
    RoleBindingRequest, VolumeInfo, VolumeSource,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

#[derive(Debug, Clone)]
struct ClaimRecord {
    info: ClaimInfo,
    chart: String,
    /// Lookups left before the provisioner has bound the claim
    lookups_until_bound: u32,
    /// Lookups left before a deleted claim disappears
    terminating: Option<u32>,
}

#[derive(Debug, Clone)]
struct PendingClaim {
    namespace: String,
    name: String,
    chart: String,
    local: bool,
    capacity: Option<String>,
}

/// Record of a submitted migration job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub namespace: String,
    pub name: String,
    pub service_account: Option<String>,
    pub backoff_limit: Option<i32>,
    pub args: Vec<String>,
    pub state: JobState,
}

#[derive(Default)]
struct State {
    namespaces: BTreeSet<String>,
    service_accounts: BTreeSet<Key>,
    role_bindings: BTreeMap<String, RoleBindingRequest>,
    charts: BTreeMap<(ChartKind, String, String), Value>,
    claims: BTreeMap<Key, ClaimRecord>,
    pending_claims: Vec<PendingClaim>,
    volumes: BTreeMap<String, VolumeInfo>,
    volume_data: BTreeMap<String, String>,
    deployments: BTreeMap<Key, i32>,
    jobs: BTreeMap<Key, JobRecord>,
    job_outcomes: VecDeque<JobState>,
    submitted: Vec<PatchEncoding>,
    bind_lag: u32,
    claim_linger: u32,
    reject_patches: bool,
    fail_deletes: bool,
    forbidden_namespaces: BTreeSet<String>,
    volume_counter: u32,
    job_counter: u32,
}

/// Simulated cluster implementing [`ClusterClient`]
#[derive(Default)]
pub struct InMemoryCluster {
    state: Mutex<State>,
}

impl InMemoryCluster {
    pub fn new() -> Arc<Self> {
        let cluster = Self::default();
        {
            let mut state = cluster.state.lock();
            state.claim_linger = 1;
            state.namespaces.insert("default".into());
            state.namespaces.insert("kube-system".into());
        }
        Arc::new(cluster)
    }

    /// Cluster with one chart whose `config` volume is bound to hostPath
    pub fn with_chart(kind: ChartKind, name: &str, namespace: &str, size: &str) -> Arc<Self> {
        let cluster = Self::new();
        cluster.add_chart(kind, name, namespace, size);
        cluster
    }

    /// Add a chart with a `config` declaration and its hostPath claim
    pub fn add_chart(&self, kind: ChartKind, name: &str, namespace: &str, size: &str) {
        let values = json!({
            "image": { "repository": format!("ghcr.io/onedr0p/{}", name), "tag": "latest" },
            "persistence": {
                "config": {
                    "enabled": true,
                    "retain": true,
                    "accessMode": "ReadWriteOnce",
                    "size": size,
                    "mountPath": "/config",
                }
            }
        });

        let (chart_namespace, resource) = match kind {
            ChartKind::HelmChart => (
                "kube-system".to_string(),
                json!({
                    "apiVersion": "helm.cattle.io/v1",
                    "kind": "HelmChart",
                    "metadata": { "name": name, "namespace": "kube-system" },
                    "spec": {
                        "chart": name,
                        "targetNamespace": namespace,
                        "valuesContent": serde_yaml::to_string(&values).unwrap(),
                    }
                }),
            ),
            ChartKind::HelmRelease => (
                namespace.to_string(),
                json!({
                    "apiVersion": "helm.toolkit.fluxcd.io/v2beta1",
                    "kind": "HelmRelease",
                    "metadata": { "name": name, "namespace": namespace },
                    "spec": {
                        "chart": { "spec": { "chart": name } },
                        "values": values,
                    }
                }),
            ),
        };

        let mut state = self.state.lock();
        state.namespaces.insert(namespace.to_string());
        state
            .charts
            .insert((kind, chart_namespace, name.to_string()), resource);
        state.deployments.insert(key(namespace, name), 1);

        let claim = claim_name(name, "config");
        let volume = state.provision(VolumeSource::HostPath, Some(size.to_string()), namespace, &claim);
        state
            .volume_data
            .insert(volume.clone(), format!("hello from {}", name));
        state.claims.insert(
            key(namespace, &claim),
            ClaimRecord {
                info: ClaimInfo {
                    namespace: namespace.to_string(),
                    name: claim,
                    phase: ClaimPhase::Bound,
                    volume_name: Some(volume),
                },
                chart: name.to_string(),
                lookups_until_bound: 0,
                terminating: None,
            },
        );
    }

    /// Add a chart whose claims are already on local volumes
    pub fn add_converted_chart(&self, kind: ChartKind, name: &str, namespace: &str) {
        self.add_chart(kind, name, namespace, "1Gi");
        let mut state = self.state.lock();
        let volume = state
            .claims
            .get(&key(namespace, &claim_name(name, "config")))
            .and_then(|c| c.info.volume_name.clone())
            .unwrap();
        state.volumes.get_mut(&volume).unwrap().source = VolumeSource::Local;
    }

    pub fn chart_ref(&self, kind: ChartKind, name: &str) -> ChartRef {
        let state = self.state.lock();
        let (_, namespace, _) = state
            .charts
            .keys()
            .find(|(k, _, n)| *k == kind && n == name)
            .cloned()
            .unwrap();
        ChartRef::new(kind, namespace, name)
    }

    // =========================================================================
    // Scripting
    // =========================================================================

    /// Number of lookups a new claim stays invisible before it is bound
    pub fn set_bind_lag(&self, lookups: u32) {
        self.state.lock().bind_lag = lookups;
    }

    /// Number of lookups a deleted claim stays visible
    pub fn set_claim_linger(&self, lookups: u32) {
        self.state.lock().claim_linger = lookups;
    }

    /// Outcome of the next submitted job (default: complete)
    pub fn push_job_outcome(&self, outcome: JobState) {
        self.state.lock().job_outcomes.push_back(outcome);
    }

    pub fn reject_patches(&self) {
        self.state.lock().reject_patches = true;
    }

    pub fn fail_deletes(&self) {
        self.state.lock().fail_deletes = true;
    }

    /// Deny listing charts in `namespace` as RBAC would
    pub fn forbid_chart_lists(&self, namespace: &str) {
        self.state.lock().forbidden_namespaces.insert(namespace.to_string());
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn declarations(&self, kind: ChartKind, name: &str) -> VolumeDeclarationSet {
        let state = self.state.lock();
        let resource = state
            .charts
            .iter()
            .find(|((k, _, n), _)| *k == kind && n == name)
            .map(|(_, v)| v.clone())
            .unwrap();
        PatcherFactory::for_kind(kind)
            .read_volume_declarations(&resource, name)
            .unwrap()
            .persistence
    }

    pub fn submitted_encodings(&self) -> Vec<PatchEncoding> {
        self.state.lock().submitted.clone()
    }

    /// Live (not terminating) claim
    pub fn claim(&self, namespace: &str, name: &str) -> Option<ClaimInfo> {
        self.state
            .lock()
            .claims
            .get(&key(namespace, name))
            .filter(|c| c.terminating.is_none())
            .map(|c| c.info.clone())
    }

    pub fn volume(&self, name: &str) -> Option<VolumeInfo> {
        self.state.lock().volumes.get(name).cloned()
    }

    /// Data stored on the volume bound to a live claim
    pub fn claim_data(&self, namespace: &str, name: &str) -> Option<String> {
        let volume = self.claim(namespace, name)?.volume_name?;
        self.state.lock().volume_data.get(&volume).cloned()
    }

    pub fn replicas(&self, namespace: &str, name: &str) -> Option<i32> {
        self.state.lock().deployments.get(&key(namespace, name)).copied()
    }

    pub fn namespaces(&self) -> BTreeSet<String> {
        self.state.lock().namespaces.clone()
    }

    pub fn service_accounts(&self) -> BTreeSet<Key> {
        self.state.lock().service_accounts.clone()
    }

    pub fn role_bindings(&self) -> Vec<RoleBindingRequest> {
        self.state.lock().role_bindings.values().cloned().collect()
    }

    pub fn jobs(&self) -> Vec<JobRecord> {
        self.state.lock().jobs.values().cloned().collect()
    }

    pub fn pod_ready(&self, namespace: &str, name: &str) -> bool {
        self.state
            .lock()
            .pods(namespace, name)
            .iter()
            .any(|p| p.ready)
    }
}

impl State {
    fn provision(
        &mut self,
        source: VolumeSource,
        capacity: Option<String>,
        namespace: &str,
        claim: &str,
    ) -> String {
        self.volume_counter += 1;
        let name = format!("pvc-{:04}", self.volume_counter);
        self.volumes.insert(
            name.clone(),
            VolumeInfo {
                name: name.clone(),
                source,
                capacity,
                claim_namespace: Some(namespace.to_string()),
                claim_name: Some(claim.to_string()),
            },
        );
        name
    }

    /// Helm controller: queue claims for every enabled declaration
    fn render(&mut self, kind: ChartKind, resource: &Value, chart: &str) -> Result<()> {
        let patcher = PatcherFactory::for_kind(kind);
        let namespace = patcher.locate_namespace(resource)?;
        let values = patcher.read_volume_declarations(resource, chart)?;

        for (volume, declaration) in values.persistence.iter() {
            if !declaration.is_enabled() {
                continue;
            }
            let claim = claim_name(chart, volume);
            let live = self
                .claims
                .get(&key(&namespace, &claim))
                .map(|c| c.terminating.is_none())
                .unwrap_or(false);
            let queued = self
                .pending_claims
                .iter()
                .any(|p| p.namespace == namespace && p.name == claim);
            if !live && !queued {
                self.pending_claims.push(PendingClaim {
                    namespace: namespace.clone(),
                    name: claim,
                    chart: chart.to_string(),
                    local: declaration.is_local(),
                    capacity: declaration.size.as_ref().map(ToString::to_string),
                });
            }
        }

        // an upgrade restores the replica count declared by the chart
        self.deployments.insert(key(&namespace, chart), 1);
        Ok(())
    }

    /// Create queued claims whose previous incarnation is gone
    fn settle(&mut self) {
        let pending = std::mem::take(&mut self.pending_claims);
        for claim in pending {
            let k = key(&claim.namespace, &claim.name);
            if self.claims.contains_key(&k) {
                self.pending_claims.push(claim);
                continue;
            }
            let source = if claim.local {
                VolumeSource::Local
            } else {
                VolumeSource::HostPath
            };
            let volume = self.provision(source, claim.capacity.clone(), &claim.namespace, &claim.name);
            self.claims.insert(
                k,
                ClaimRecord {
                    info: ClaimInfo {
                        namespace: claim.namespace,
                        name: claim.name,
                        phase: ClaimPhase::Bound,
                        volume_name: Some(volume),
                    },
                    chart: claim.chart,
                    lookups_until_bound: self.bind_lag,
                    terminating: None,
                },
            );
        }
    }

    fn declared_claims(&self, namespace: &str, chart: &str) -> Vec<String> {
        self.charts
            .iter()
            .filter(|((_, _, n), _)| n == chart)
            .filter_map(|((kind, _, _), resource)| {
                let patcher = PatcherFactory::for_kind(*kind);
                if patcher.locate_namespace(resource).ok()? != namespace {
                    return None;
                }
                let values = patcher.read_volume_declarations(resource, chart).ok()?;
                Some(
                    values
                        .persistence
                        .iter()
                        .filter(|(_, d)| d.is_enabled())
                        .map(|(v, _)| claim_name(chart, v))
                        .collect::<Vec<_>>(),
                )
            })
            .flatten()
            .collect()
    }

    fn pods(&self, namespace: &str, chart: &str) -> Vec<PodInfo> {
        let replicas = self.deployments.get(&key(namespace, chart)).copied().unwrap_or(0);
        if replicas <= 0 {
            return Vec::new();
        }

        let ready = self.declared_claims(namespace, chart).iter().all(|claim| {
            self.claims
                .get(&key(namespace, claim))
                .map(|c| c.terminating.is_none() && c.lookups_until_bound == 0)
                .unwrap_or(false)
        });

        vec![PodInfo {
            namespace: namespace.to_string(),
            name: format!("{}-7d9f8b6c4-x2k9p", chart),
            ready,
        }]
    }

    fn claim_volume(&self, namespace: &str, claim: &str) -> Result<String> {
        self.claims
            .get(&key(namespace, claim))
            .and_then(|c| c.info.volume_name.clone())
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "PersistentVolumeClaim".into(),
                name: format!("{}/{}", namespace, claim),
            })
    }

    fn run_copy(&mut self, args: &[String]) -> Result<()> {
        let (source, destination, namespace) = match args {
            [cmd, src, dst, flag, ns, ..] if cmd == "migrate" && flag == "-n" => {
                (src.clone(), dst.clone(), ns.clone())
            }
            _ => return Err(Error::Internal(format!("unexpected job args {:?}", args))),
        };
        let from = self.claim_volume(&namespace, &source)?;
        let to = self.claim_volume(&namespace, &destination)?;
        if let Some(data) = self.volume_data.get(&from).cloned() {
            self.volume_data.insert(to, data);
        }
        Ok(())
    }
}

fn selector_value<'a>(label_selector: &'a str) -> Option<&'a str> {
    label_selector
        .split_once('=')
        .filter(|(k, _)| *k == CHART_NAME_LABEL)
        .map(|(_, v)| v)
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn list_namespaces(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().namespaces.iter().cloned().collect())
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        if !self.state.lock().namespaces.insert(name.to_string()) {
            return Err(Error::ResourceExists {
                kind: "Namespace".into(),
                name: name.into(),
            });
        }
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_deletes {
            return Err(Error::Internal("delete refused".into()));
        }
        state.namespaces.remove(name);
        state.service_accounts.retain(|(ns, _)| ns != name);
        state.jobs.retain(|(ns, _), _| ns != name);
        Ok(())
    }

    async fn create_service_account(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        if !state.namespaces.contains(namespace) {
            return Err(Error::ResourceNotFound {
                kind: "Namespace".into(),
                name: namespace.into(),
            });
        }
        if !state.service_accounts.insert(key(namespace, name)) {
            return Err(Error::ResourceExists {
                kind: "ServiceAccount".into(),
                name: name.into(),
            });
        }
        Ok(())
    }

    async fn create_cluster_role_binding(&self, binding: &RoleBindingRequest) -> Result<()> {
        let mut state = self.state.lock();
        if state.role_bindings.contains_key(&binding.name) {
            return Err(Error::ResourceExists {
                kind: "ClusterRoleBinding".into(),
                name: binding.name.clone(),
            });
        }
        state
            .role_bindings
            .insert(binding.name.clone(), binding.clone());
        Ok(())
    }

    async fn delete_cluster_role_binding(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_deletes {
            return Err(Error::Internal("delete refused".into()));
        }
        state.role_bindings.remove(name);
        Ok(())
    }

    async fn list_charts(&self, kind: ChartKind, namespace: &str) -> Result<Vec<Value>> {
        let state = self.state.lock();
        if state.forbidden_namespaces.contains(namespace) {
            return Err(Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
                status: "Failure".to_string(),
                message: format!("cannot list {} in namespace {}", kind, namespace),
                reason: "Forbidden".to_string(),
                code: 403,
            })));
        }
        Ok(state
            .charts
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && ns == namespace)
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn get_chart(&self, kind: ChartKind, namespace: &str, name: &str) -> Result<Value> {
        self.state
            .lock()
            .charts
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound {
                kind: kind.to_string(),
                name: format!("{}/{}", namespace, name),
            })
    }

    async fn patch_chart(
        &self,
        kind: ChartKind,
        namespace: &str,
        name: &str,
        patch: &ChartPatch,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let conflict = |reason: String| Error::PatchConflict {
            kind: kind.to_string(),
            name: name.to_string(),
            reason,
        };
        if state.reject_patches {
            return Err(conflict("the object has been modified".into()));
        }

        let chart_key = (kind, namespace.to_string(), name.to_string());
        let mut resource = state
            .charts
            .get(&chart_key)
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            })?;

        match patch.encoding {
            PatchEncoding::JsonPatch => {
                let ops: json_patch::Patch = serde_json::from_value(patch.payload.clone())?;
                json_patch::patch(&mut resource, &ops.0).map_err(|e| conflict(e.to_string()))?;
            }
            PatchEncoding::MergePatch => json_patch::merge(&mut resource, &patch.payload),
        }

        state.render(kind, &resource, name)?;
        state.charts.insert(chart_key, resource);
        state.submitted.push(patch.encoding);
        Ok(())
    }

    async fn get_claim(&self, namespace: &str, name: &str) -> Result<Option<ClaimInfo>> {
        let mut state = self.state.lock();
        state.settle();

        let k = key(namespace, name);
        let Some(record) = state.claims.get_mut(&k) else {
            return Ok(None);
        };

        if let Some(remaining) = record.terminating {
            let info = record.info.clone();
            if remaining <= 1 {
                state.claims.remove(&k);
            } else {
                record.terminating = Some(remaining - 1);
            }
            return Ok(Some(info));
        }

        if record.lookups_until_bound > 0 {
            record.lookups_until_bound -= 1;
            return Ok(None);
        }
        Ok(Some(record.info.clone()))
    }

    async fn list_claims(&self, namespace: &str, label_selector: &str) -> Result<Vec<ClaimInfo>> {
        let mut state = self.state.lock();
        state.settle();
        let chart = selector_value(label_selector);
        Ok(state
            .claims
            .values()
            .filter(|c| c.info.namespace == namespace)
            .filter(|c| chart.map(|n| n == c.chart).unwrap_or(true))
            .filter(|c| c.terminating.is_none() && c.lookups_until_bound == 0)
            .map(|c| c.info.clone())
            .collect())
    }

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        let linger = state.claim_linger;
        let record = state
            .claims
            .get_mut(&key(namespace, name))
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "PersistentVolumeClaim".into(),
                name: format!("{}/{}", namespace, name),
            })?;
        let volume = record.info.volume_name.clone();

        if linger == 0 {
            state.claims.remove(&key(namespace, name));
        } else {
            record.terminating = Some(linger);
        }
        if let Some(volume) = volume {
            if let Some(pv) = state.volumes.get_mut(&volume) {
                pv.claim_namespace = None;
                pv.claim_name = None;
            }
        }
        Ok(())
    }

    async fn get_volume(&self, name: &str) -> Result<Option<VolumeInfo>> {
        Ok(self.state.lock().volumes.get(name).cloned())
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<PodInfo>> {
        let mut state = self.state.lock();
        state.settle();
        Ok(selector_value(label_selector)
            .map(|chart| state.pods(namespace, chart))
            .unwrap_or_default())
    }

    async fn scale_deployment(&self, namespace: &str, name: &str, replicas: i32) -> Result<()> {
        let mut state = self.state.lock();
        let current = state
            .deployments
            .get_mut(&key(namespace, name))
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "Deployment".into(),
                name: format!("{}/{}", namespace, name),
            })?;
        *current = replicas;
        Ok(())
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<String> {
        let mut state = self.state.lock();
        if !state.namespaces.contains(namespace) {
            return Err(Error::ResourceNotFound {
                kind: "Namespace".into(),
                name: namespace.into(),
            });
        }

        state.job_counter += 1;
        let prefix = job
            .metadata
            .generate_name
            .clone()
            .or_else(|| job.metadata.name.clone())
            .unwrap_or_default();
        let name = format!("{}{:05}", prefix, state.job_counter);

        let spec = job.spec.as_ref();
        let pod = spec.and_then(|s| s.template.spec.as_ref());
        let args = pod
            .and_then(|p| p.containers.first())
            .and_then(|c| c.args.clone())
            .unwrap_or_default();

        let outcome = state.job_outcomes.pop_front().unwrap_or(JobState::Complete);
        if outcome == JobState::Complete {
            state.run_copy(&args)?;
        }

        state.jobs.insert(
            key(namespace, &name),
            JobRecord {
                namespace: namespace.to_string(),
                name: name.clone(),
                service_account: pod.and_then(|p| p.service_account_name.clone()),
                backoff_limit: spec.and_then(|s| s.backoff_limit),
                args,
                state: outcome,
            },
        );
        Ok(name)
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<JobInfo>> {
        Ok(self
            .state
            .lock()
            .jobs
            .get(&key(namespace, name))
            .map(|job| JobInfo {
                namespace: job.namespace.clone(),
                name: job.name.clone(),
                state: job.state,
                message: match job.state {
                    JobState::Failed => Some("BackoffLimitExceeded".into()),
                    _ => None,
                },
            }))
    }
}
