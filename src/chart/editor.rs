//! Chart Editor
//!
//! Read-mutate-patch operations on the persistence declarations of a live
//! chart resource. Each operation is a single patch call, but the read and
//! the patch are not transactional: a concurrent edit of the same chart in
//! between is lost.

use super::patcher::{PatchOperation, ResourcePatcher};
use super::values::{VolumeDeclaration, VolumeDeclarationSet};
use super::{claim_name, temp_volume_name, ChartRef};
use crate::domain::ports::ClusterClientRef;
use crate::error::{Error, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Edits the persistence declarations of one chart
pub struct ChartEditor {
    cluster: ClusterClientRef,
    patcher: Arc<dyn ResourcePatcher>,
    chart: ChartRef,
}

impl ChartEditor {
    pub fn new(cluster: ClusterClientRef, patcher: Arc<dyn ResourcePatcher>, chart: ChartRef) -> Self {
        Self {
            cluster,
            patcher,
            chart,
        }
    }

    pub fn chart(&self) -> &ChartRef {
        &self.chart
    }

    /// Declare `<volume>-temp` as a local volume of `size`.
    ///
    /// Returns the name of the claim the chart will render for it.
    pub async fn declare_temp_claim(&self, volume_name: &str, size: &str) -> Result<String> {
        let temp_name = temp_volume_name(volume_name);

        self.apply(&temp_name, PatchOperation::Declare, |persistence| {
            if persistence
                .insert(temp_name.clone(), VolumeDeclaration::local(size))
                .is_some()
            {
                warn!(
                    "Replacing leftover declaration {} on {}",
                    temp_name, self.chart
                );
            }
            Ok(())
        })
        .await?;

        Ok(claim_name(&self.chart.name, &temp_name))
    }

    /// Annotate the declaration of `volume_name` with `volumeType: local`
    pub async fn mark_local(&self, volume_name: &str) -> Result<()> {
        self.apply(volume_name, PatchOperation::Annotate, |persistence| {
            persistence
                .get_mut(volume_name)
                .map(VolumeDeclaration::mark_local)
                .ok_or_else(|| self.missing(volume_name))
        })
        .await
    }

    /// Remove the `<volume>-temp` declaration
    pub async fn remove_temp_declaration(&self, volume_name: &str) -> Result<()> {
        let temp_name = temp_volume_name(volume_name);

        self.apply(&temp_name, PatchOperation::Remove, |persistence| {
            persistence
                .remove(&temp_name)
                .map(|_| ())
                .ok_or_else(|| self.missing(&temp_name))
        })
        .await
    }

    async fn apply<F>(&self, target: &str, operation: PatchOperation, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut VolumeDeclarationSet) -> Result<()>,
    {
        let resource = self
            .cluster
            .get_chart(self.chart.kind, &self.chart.namespace, &self.chart.name)
            .await?;

        let mut values = self
            .patcher
            .read_volume_declarations(&resource, &self.chart.name)?;
        mutate(&mut values.persistence)?;

        let patch = self.patcher.encode_patch(&values, target, operation)?;
        self.cluster
            .patch_chart(self.chart.kind, &self.chart.namespace, &self.chart.name, &patch)
            .await?;

        info!(
            "Patched {} ({} {} via {})",
            self.chart, operation, target, patch.encoding
        );

        Ok(())
    }

    fn missing(&self, volume_name: &str) -> Error {
        Error::ValuesNotFound {
            resource: self.chart.name.clone(),
            section: format!("persistence.{}", volume_name),
        }
    }
}
