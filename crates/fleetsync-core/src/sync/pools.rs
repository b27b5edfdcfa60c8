//! IP pool synchronizer

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::Clock;
use crate::matcher::match_by_external_id;
use crate::model::{
    parse_ranges, DevicePool, EntityClass, PoolKind, Router, SyncResult,
};
use crate::traits::repository::NewIpPool;
use crate::traits::{DeviceClient, Repository};
use crate::{Error, Result};

use super::RouterSynchronizer;

/// Reconciles device IP pools against the mirror's pool rows
pub struct PoolSynchronizer {
    client: Arc<dyn DeviceClient>,
    repo: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    auto_create: bool,
}

impl PoolSynchronizer {
    pub fn new(
        client: Arc<dyn DeviceClient>,
        repo: Arc<dyn Repository>,
        clock: Arc<dyn Clock>,
        auto_create: bool,
    ) -> Self {
        Self {
            client,
            repo,
            clock,
            auto_create,
        }
    }

    /// Reconcile one matched (device pool, mirror row) pair
    async fn sync_pair(
        &self,
        router: &Router,
        dev: &DevicePool,
        row: &crate::model::IpPool,
    ) -> SyncResult {
        let class = EntityClass::Pools;

        if let Err(reason) = parse_ranges(&dev.ranges) {
            warn!(router = %router.id, payload = ?dev, "malformed device pool: {reason}");
            return SyncResult::error(
                class,
                &router.id,
                Some(&dev.external_id),
                &Error::validation(reason),
            );
        }

        let mut row = row.clone();
        let mut changed: Vec<String> = Vec::new();
        if row.name != dev.name {
            row.name = dev.name.clone();
            changed.push("name".into());
        }
        if row.ranges != dev.ranges {
            row.ranges = dev.ranges.clone();
            changed.push("ranges".into());
        }
        let kind = PoolKind::infer(&dev.name);
        if row.kind != kind {
            row.kind = kind;
            changed.push("kind".into());
        }
        row.last_synced_at = Some(self.clock.now());

        if let Err(e) = self.repo.update_pool(&row).await {
            warn!(router = %router.id, pool = %dev.external_id, "pool update failed: {e}");
            return SyncResult::error(class, &router.id, Some(&dev.external_id), &e);
        }

        if changed.is_empty() {
            SyncResult::verified(class, &router.id, &dev.external_id)
        } else {
            debug!(router = %router.id, pool = %dev.external_id, ?changed, "pool drifted");
            SyncResult::updated(class, &router.id, &dev.external_id, changed)
        }
    }

    /// Create a mirror row from a device pool (auto-create path)
    async fn create_row(&self, router: &Router, dev: &DevicePool) -> SyncResult {
        let class = EntityClass::Pools;

        if let Err(reason) = parse_ranges(&dev.ranges) {
            warn!(router = %router.id, payload = ?dev, "malformed device pool: {reason}");
            return SyncResult::error(
                class,
                &router.id,
                Some(&dev.external_id),
                &Error::validation(reason),
            );
        }

        let new_pool = NewIpPool {
            router_id: router.id.clone(),
            external_id: dev.external_id.clone(),
            name: dev.name.clone(),
            ranges: dev.ranges.clone(),
            kind: PoolKind::infer(&dev.name),
            last_synced_at: Some(self.clock.now()),
        };
        match self.repo.insert_pool(new_pool).await {
            Ok(_) => {
                info!(router = %router.id, pool = %dev.external_id, name = %dev.name, "pool created");
                SyncResult::created(class, &router.id, &dev.external_id)
            }
            Err(e) => {
                warn!(router = %router.id, pool = %dev.external_id, "pool create failed: {e}");
                SyncResult::error(class, &router.id, Some(&dev.external_id), &e)
            }
        }
    }
}

#[async_trait]
impl RouterSynchronizer for PoolSynchronizer {
    fn class(&self) -> EntityClass {
        EntityClass::Pools
    }

    async fn sync_router(&self, router: &Router) -> Result<Vec<SyncResult>> {
        let class = EntityClass::Pools;
        let device_pools = self.client.list_ip_pools(router).await?;
        let local_pools = self.repo.list_pools(&router.id).await?;

        let join = match_by_external_id(
            &device_pools,
            &local_pools,
            |d| &d.external_id,
            |l| &l.external_id,
        );

        let mut results = Vec::with_capacity(device_pools.len() + join.missing_in_device.len());

        for (dev, row) in &join.matched {
            results.push(self.sync_pair(router, dev, row).await);
        }

        for dev in &join.missing_in_db {
            if self.auto_create {
                results.push(self.create_row(router, dev).await);
            } else {
                info!(
                    router = %router.id, pool = %dev.external_id, name = %dev.name,
                    "device pool has no mirror row (auto-create disabled)"
                );
                results.push(SyncResult::missing_in_db(class, &router.id, &dev.external_id));
            }
        }

        for row in &join.missing_in_device {
            warn!(
                router = %router.id, pool = %row.external_id, name = %row.name,
                "mirror pool no longer reported by device"
            );
            results.push(SyncResult::missing_in_router(class, &router.id, &row.external_id));
        }

        Ok(results)
    }
}
