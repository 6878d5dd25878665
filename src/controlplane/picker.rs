//! Resource Picker
//!
//! Discovers chart-declared claims still bound to hostPath volumes and
//! resolves an operator selection against them.

use crate::chart::{is_temp_name, logical_volume_name, ChartKind, ChartRef, PatcherFactory};
use crate::controlplane::orchestrator::ConversionRequest;
use crate::domain::ports::{ClaimInfo, ClaimPhase, ClusterClientRef, VolumeInfo, VolumeSource};
use crate::error::{Error, Result};
use futures::future::try_join_all;
use serde_json::Value;
use std::fmt::Write;
use tracing::{debug, warn};

/// A claim that can be converted
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub claim: ClaimInfo,
    pub volume: VolumeInfo,
    /// Logical volume name in the chart values
    pub volume_name: String,
}

/// A chart with convertible claims
#[derive(Debug, Clone, PartialEq)]
pub struct ChartCandidates {
    pub chart: ChartRef,
    pub workload_namespace: String,
    pub volumes: Vec<Candidate>,
}

/// Charts with convertible claims, grouped by the namespace the chart object lives in
#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceCandidates {
    pub namespace: String,
    pub charts: Vec<ChartCandidates>,
}

impl NamespaceCandidates {
    pub fn volume_count(&self) -> usize {
        self.charts.iter().map(|c| c.volumes.len()).sum()
    }
}

/// Discovers and selects conversion candidates
pub struct ResourcePicker {
    cluster: ClusterClientRef,
}

impl ResourcePicker {
    pub fn new(cluster: ClusterClientRef) -> Self {
        Self { cluster }
    }

    /// Every namespace holding charts with hostPath claims
    pub async fn discover(&self) -> Result<Vec<NamespaceCandidates>> {
        let namespaces = self.cluster.list_namespaces().await?;
        let found = try_join_all(namespaces.iter().map(|ns| self.discover_namespace(ns))).await?;

        Ok(found
            .into_iter()
            .filter(|ns| !ns.charts.is_empty())
            .collect())
    }

    async fn discover_namespace(&self, namespace: &str) -> Result<NamespaceCandidates> {
        let mut charts = Vec::new();

        for kind in ChartKind::ALL {
            let resources = match self.cluster.list_charts(kind, namespace).await {
                Ok(resources) => resources,
                Err(e) => {
                    warn!("Skipping {} charts in {}: {}", kind, namespace, e);
                    continue;
                }
            };
            for resource in resources {
                match self.discover_chart(kind, namespace, &resource).await {
                    Ok(Some(found)) => charts.push(found),
                    Ok(None) => {}
                    Err(e) => warn!("Skipping {} chart in {}: {}", kind, namespace, e),
                }
            }
        }

        Ok(NamespaceCandidates {
            namespace: namespace.to_string(),
            charts,
        })
    }

    async fn discover_chart(
        &self,
        kind: ChartKind,
        namespace: &str,
        resource: &Value,
    ) -> Result<Option<ChartCandidates>> {
        let Some(name) = resource
            .pointer("/metadata/name")
            .and_then(Value::as_str)
        else {
            return Ok(None);
        };
        let chart = ChartRef::new(kind, namespace, name);

        let workload_namespace = match PatcherFactory::for_kind(kind).locate_namespace(resource) {
            Ok(ns) => ns,
            Err(e) => {
                warn!("Skipping {}: {}", chart, e);
                return Ok(None);
            }
        };

        let claims = self
            .cluster
            .list_claims(&workload_namespace, &chart.label_selector())
            .await?;

        let mut volumes = Vec::new();
        for claim in claims {
            if is_temp_name(&claim.name) || claim.phase != ClaimPhase::Bound {
                continue;
            }
            let Ok(volume_name) = logical_volume_name(name, &claim.name) else {
                debug!("Claim {} not named after {}", claim.name, chart);
                continue;
            };
            let Some(volume) = self.bound_volume(&claim).await? else {
                continue;
            };
            if volume.source == VolumeSource::HostPath {
                volumes.push(Candidate {
                    claim,
                    volume,
                    volume_name,
                });
            }
        }

        if volumes.is_empty() {
            return Ok(None);
        }
        Ok(Some(ChartCandidates {
            chart,
            workload_namespace,
            volumes,
        }))
    }

    async fn bound_volume(&self, claim: &ClaimInfo) -> Result<Option<VolumeInfo>> {
        match &claim.volume_name {
            Some(name) => self.cluster.get_volume(name).await,
            None => Ok(None),
        }
    }

    /// Resolve a selection; `volume` is a logical volume name or a claim name
    pub async fn select(&self, namespace: &str, chart: &str, volume: &str) -> Result<ConversionRequest> {
        let discovered = self.discover().await?;
        resolve(&discovered, namespace, chart, volume)
    }
}

/// Resolve a selection against discovered candidates
pub fn resolve(
    discovered: &[NamespaceCandidates],
    namespace: &str,
    chart: &str,
    volume: &str,
) -> Result<ConversionRequest> {
    let charts = discovered
        .iter()
        .find(|ns| ns.namespace == namespace)
        .ok_or_else(|| {
            Error::Configuration(format!(
                "no chart with hostPath volumes in namespace {}",
                namespace
            ))
        })?;

    let found = charts
        .charts
        .iter()
        .find(|c| c.chart.name == chart)
        .ok_or_else(|| {
            Error::Configuration(format!(
                "chart {} in namespace {} has no hostPath volumes",
                chart, namespace
            ))
        })?;

    let candidate = found
        .volumes
        .iter()
        .find(|v| v.volume_name == volume || v.claim.name == volume)
        .ok_or_else(|| {
            let known: Vec<_> = found.volumes.iter().map(|v| v.volume_name.as_str()).collect();
            Error::Configuration(format!(
                "{} is not a hostPath volume of {} (candidates: {})",
                volume,
                found.chart,
                known.join(", ")
            ))
        })?;

    Ok(ConversionRequest {
        chart: found.chart.clone(),
        workload_namespace: found.workload_namespace.clone(),
        claim_name: candidate.claim.name.clone(),
        volume: candidate.volume.clone(),
    })
}

/// Human readable discovery tree with counts
pub fn render_candidates(discovered: &[NamespaceCandidates]) -> String {
    let mut out = String::new();
    if discovered.is_empty() {
        out.push_str("No hostPath volumes declared by charts\n");
        return out;
    }

    for ns in discovered {
        let _ = writeln!(
            out,
            "{} ({} charts, {} volumes)",
            ns.namespace,
            ns.charts.len(),
            ns.volume_count()
        );
        for chart in &ns.charts {
            let _ = writeln!(
                out,
                "  {} {} -> {} ({} volumes)",
                chart.chart.kind,
                chart.chart.name,
                chart.workload_namespace,
                chart.volumes.len()
            );
            for candidate in &chart.volumes {
                let _ = writeln!(
                    out,
                    "    {:<12} {:<28} {} {}",
                    candidate.volume_name,
                    candidate.claim.name,
                    candidate.volume.name,
                    candidate.volume.capacity.as_deref().unwrap_or("-")
                );
            }
        }
    }
    out
}
