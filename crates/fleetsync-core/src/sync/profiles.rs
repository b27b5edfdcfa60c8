//! PPPoE profile synchronizer
//!
//! Engine-owned fields are the display name and the rate/burst
//! parameters. The billing package link is locally-set and survives every
//! update.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::Clock;
use crate::matcher::match_by_external_id;
use crate::model::{DeviceProfile, EntityClass, PppoeProfile, Router, SyncResult};
use crate::traits::repository::NewPppoeProfile;
use crate::traits::{DeviceClient, Repository};
use crate::{Error, Result};

use super::RouterSynchronizer;

/// Reconciles device PPPoE profiles against the mirror's profile rows
pub struct ProfileSynchronizer {
    client: Arc<dyn DeviceClient>,
    repo: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    auto_create: bool,
}

impl ProfileSynchronizer {
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

    async fn sync_pair(
        &self,
        router: &Router,
        dev: &DeviceProfile,
        row: &PppoeProfile,
    ) -> SyncResult {
        let class = EntityClass::Profiles;

        if dev.name.is_empty() {
            warn!(router = %router.id, payload = ?dev, "malformed device profile: empty name");
            return SyncResult::error(
                class,
                &router.id,
                Some(&dev.external_id),
                &Error::validation("device profile has an empty name"),
            );
        }

        let mut row = row.clone();
        let mut changed: Vec<String> = Vec::new();
        if row.name != dev.name {
            row.name = dev.name.clone();
            changed.push("name".into());
        }
        if row.rate_limit != dev.rate_limit {
            row.rate_limit = dev.rate_limit.clone();
            changed.push("rate_limit".into());
        }
        if row.burst != dev.burst {
            row.burst = dev.burst.clone();
            changed.push("burst".into());
        }
        row.last_synced_at = Some(self.clock.now());

        if let Err(e) = self.repo.update_profile(&row).await {
            warn!(router = %router.id, profile = %dev.external_id, "profile update failed: {e}");
            return SyncResult::error(class, &router.id, Some(&dev.external_id), &e);
        }

        if changed.is_empty() {
            SyncResult::verified(class, &router.id, &dev.external_id)
        } else {
            debug!(router = %router.id, profile = %dev.external_id, ?changed, "profile drifted");
            SyncResult::updated(class, &router.id, &dev.external_id, changed)
        }
    }

    async fn create_row(&self, router: &Router, dev: &DeviceProfile) -> SyncResult {
        let class = EntityClass::Profiles;
        let new_profile = NewPppoeProfile {
            router_id: router.id.clone(),
            external_id: dev.external_id.clone(),
            name: dev.name.clone(),
            rate_limit: dev.rate_limit.clone(),
            burst: dev.burst.clone(),
            last_synced_at: Some(self.clock.now()),
        };
        match self.repo.insert_profile(new_profile).await {
            Ok(_) => {
                info!(router = %router.id, profile = %dev.external_id, name = %dev.name, "profile created");
                SyncResult::created(class, &router.id, &dev.external_id)
            }
            Err(e) => {
                warn!(router = %router.id, profile = %dev.external_id, "profile create failed: {e}");
                SyncResult::error(class, &router.id, Some(&dev.external_id), &e)
            }
        }
    }
}

#[async_trait]
impl RouterSynchronizer for ProfileSynchronizer {
    fn class(&self) -> EntityClass {
        EntityClass::Profiles
    }

    async fn sync_router(&self, router: &Router) -> Result<Vec<SyncResult>> {
        let class = EntityClass::Profiles;
        let device_profiles = self.client.list_profiles(router).await?;
        let local_profiles = self.repo.list_profiles(&router.id).await?;

        let join = match_by_external_id(
            &device_profiles,
            &local_profiles,
            |d| &d.external_id,
            |l| &l.external_id,
        );

        let mut results =
            Vec::with_capacity(device_profiles.len() + join.missing_in_device.len());

        for (dev, row) in &join.matched {
            results.push(self.sync_pair(router, dev, row).await);
        }

        for dev in &join.missing_in_db {
            if self.auto_create {
                results.push(self.create_row(router, dev).await);
            } else {
                info!(
                    router = %router.id, profile = %dev.external_id, name = %dev.name,
                    "device profile has no mirror row (auto-create disabled)"
                );
                results.push(SyncResult::missing_in_db(class, &router.id, &dev.external_id));
            }
        }

        for row in &join.missing_in_device {
            warn!(
                router = %router.id, profile = %row.external_id, name = %row.name,
                "mirror profile no longer reported by device"
            );
            results.push(SyncResult::missing_in_router(class, &router.id, &row.external_id));
        }

        Ok(results)
    }
}
