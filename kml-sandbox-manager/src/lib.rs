//! Idempotent creation and deletion of the shared base snapshot used by
//! every session of a service (C5).

use std::time::Duration;

use kml_catalog::SessionCatalog;
use kml_core::error::Result;
use kml_core::recipe::BuildRecipe;
use kml_edge_client::EdgeClient;
use kml_sandbox_client::SandboxProviderClient;
use tracing::{info, warn};

const SNAPSHOT_CPU: u32 = 2;
const SNAPSHOT_MEMORY_GIB: u32 = 4;
const SNAPSHOT_DISK_GIB: u32 = 10;
const DEPLOY_WAIT_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const DELETE_PROPAGATION_DELAY: Duration = Duration::from_secs(2);

pub fn snapshot_name(service_name: &str) -> String {
    format!("kml-{service_name}")
}

pub struct SandboxManager<'a> {
    provider: &'a SandboxProviderClient,
    edge: &'a EdgeClient,
    service_name: String,
}

impl<'a> SandboxManager<'a> {
    pub fn new(provider: &'a SandboxProviderClient, edge: &'a EdgeClient, service_name: impl Into<String>) -> Self {
        Self { provider, edge, service_name: service_name.into() }
    }

    /// Build the base snapshot if it doesn't already exist. No-op
    /// otherwise.
    pub async fn deploy(&self, recipe: &dyn BuildRecipe) -> Result<()> {
        let name = snapshot_name(&self.service_name);
        if self.provider.find_snapshot_by_name(&name).await?.is_some() {
            info!(snapshot = %name, "base snapshot already exists, skipping deploy");
            return Ok(());
        }
        self.build_snapshot(&name, recipe).await
    }

    /// Unconditionally rebuild the base snapshot: delete any existing one,
    /// wait briefly for deletion to propagate, then build fresh.
    pub async fn snapshot_create(&self, recipe: &dyn BuildRecipe) -> Result<()> {
        let name = snapshot_name(&self.service_name);
        if let Some(existing) = self.provider.find_snapshot_by_name(&name).await? {
            self.provider.delete_snapshot(&existing.id).await?;
            tokio::time::sleep(DELETE_PROPAGATION_DELAY).await;
        }
        self.build_snapshot(&name, recipe).await
    }

    async fn build_snapshot(&self, name: &str, recipe: &dyn BuildRecipe) -> Result<()> {
        info!(snapshot = %name, "building base snapshot");
        let created = self
            .provider
            .create_snapshot(name, &recipe.dockerfile(), SNAPSHOT_CPU, SNAPSHOT_MEMORY_GIB, SNAPSHOT_DISK_GIB)
            .await?;
        self.provider.wait_for_snapshot(&created.id, DEPLOY_WAIT_TIMEOUT).await?;
        info!(snapshot = %name, "base snapshot ready");
        Ok(())
    }

    /// Delete the base snapshot, if present.
    pub async fn snapshot_delete(&self) -> Result<()> {
        let name = snapshot_name(&self.service_name);
        if let Some(existing) = self.provider.find_snapshot_by_name(&name).await? {
            self.provider.delete_snapshot(&existing.id).await?;
        }
        Ok(())
    }

    /// Sweep every session in the catalog: delete its sandbox, edge
    /// worker, and tunnel (tolerating absence of any of them), then
    /// invoke `forget` to remove it from the catalog. The base snapshot
    /// is left intact.
    pub async fn destroy<F>(&self, catalog: &SessionCatalog, domain: &str, mut forget: F) -> Result<()>
    where
        F: FnMut(&str) -> Result<()>,
    {
        for (slug, record) in catalog.all() {
            if let Some(sandbox_id) = &record.sandbox_id {
                if let Err(err) = self.provider.delete_sandbox(sandbox_id).await {
                    warn!(slug = %slug, %err, "destroy: failed to delete sandbox, continuing");
                }
            }

            let worker_name = format!("kml-{}-{}", self.service_name, slug);
            let hostname = format!("{slug}.{domain}");
            self.edge.delete_worker(&worker_name, &hostname).await;

            if let Some(tunnel_id) = &record.tunnel_id {
                self.edge.delete_tunnel(tunnel_id).await;
            }

            forget(&slug)?;
        }
        Ok(())
    }
}
