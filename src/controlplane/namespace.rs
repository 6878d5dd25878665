//! Migration Namespace Manager
//!
//! Creates and removes the namespace, service account and cluster role
//! binding the migration jobs run with. Set up once per session.

use crate::domain::ports::{ClusterClientRef, MigrationContext, RoleBindingRequest};
use crate::error::{Error, Result};
use tracing::{debug, info, warn};

/// Cluster role granted to the migration service account
pub const MIGRATION_CLUSTER_ROLE: &str = "edit";

/// Manages the migration namespace of one session
pub struct MigrationNamespaceManager {
    cluster: ClusterClientRef,
    context: MigrationContext,
}

impl MigrationNamespaceManager {
    pub fn new(cluster: ClusterClientRef, context: MigrationContext) -> Self {
        Self { cluster, context }
    }

    pub fn context(&self) -> &MigrationContext {
        &self.context
    }

    fn binding(&self) -> RoleBindingRequest {
        RoleBindingRequest {
            name: self.context.role_binding_name(),
            cluster_role: MIGRATION_CLUSTER_ROLE.to_string(),
            subject_namespace: self.context.namespace.clone(),
            subject_name: self.context.service_account.clone(),
        }
    }

    /// Create the namespace, service account and role binding.
    ///
    /// Objects that already exist are reused.
    pub async fn ensure(&self) -> Result<()> {
        let ctx = &self.context;

        tolerate_existing(self.cluster.create_namespace(&ctx.namespace).await)?;
        tolerate_existing(
            self.cluster
                .create_service_account(&ctx.namespace, &ctx.service_account)
                .await,
        )?;
        tolerate_existing(self.cluster.create_cluster_role_binding(&self.binding()).await)?;

        info!(
            "Migration namespace {} ready (service account {})",
            ctx.namespace, ctx.service_account
        );
        Ok(())
    }

    /// Remove the role binding and the namespace. Failures are only logged.
    pub async fn teardown(&self) {
        let binding = self.context.role_binding_name();
        if let Err(e) = self.cluster.delete_cluster_role_binding(&binding).await {
            warn!("Failed to delete cluster role binding {}: {}", binding, e);
        }

        match self.cluster.delete_namespace(&self.context.namespace).await {
            Ok(()) => info!("Removed migration namespace {}", self.context.namespace),
            Err(e) => warn!(
                "Failed to delete migration namespace {}: {}",
                self.context.namespace, e
            ),
        }
    }
}

fn tolerate_existing(result: Result<()>) -> Result<()> {
    match result {
        Err(Error::ResourceExists { kind, name }) => {
            debug!("{} {} already exists", kind, name);
            Ok(())
        }
        other => other,
    }
}
