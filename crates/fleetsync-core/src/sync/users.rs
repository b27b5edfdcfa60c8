//! PPPoE user synchronizer
//!
//! Engine-owned fields are the username, the linked profile external id,
//! the service status, and the static address. The billing subscriber
//! link is locally-set and survives every update.
//!
//! When a user's static address changes device-side, the old address rows
//! owned by that user are severed (owner links cleared, status left
//! alone). The rows converge back to available through the orphan sweep
//! or the next address pass.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::Clock;
use crate::matcher::match_by_external_id;
use crate::model::{DeviceUser, EntityClass, PppoeUser, Router, SyncResult, UserStatus};
use crate::traits::repository::NewPppoeUser;
use crate::traits::{DeviceClient, Repository};
use crate::{Error, Result};

use super::RouterSynchronizer;

/// Reconciles device PPPoE accounts against the mirror's user rows
pub struct UserSynchronizer {
    client: Arc<dyn DeviceClient>,
    repo: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    auto_create: bool,
}

impl UserSynchronizer {
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

    async fn sync_pair(&self, router: &Router, dev: &DeviceUser, row: &PppoeUser) -> SyncResult {
        let class = EntityClass::Users;

        if dev.username.is_empty() {
            warn!(router = %router.id, payload = ?dev, "malformed device user: empty username");
            return SyncResult::error(
                class,
                &router.id,
                Some(&dev.external_id),
                &Error::validation("device user has an empty username"),
            );
        }

        let mut row = row.clone();
        let mut changed: Vec<String> = Vec::new();
        if row.username != dev.username {
            row.username = dev.username.clone();
            changed.push("username".into());
        }
        if row.profile_external_id != dev.profile {
            row.profile_external_id = dev.profile.clone();
            changed.push("profile".into());
        }
        let status = if dev.disabled {
            UserStatus::Disabled
        } else {
            UserStatus::Active
        };
        if row.status != status {
            row.status = status;
            changed.push("status".into());
        }
        let address_moved = row.static_address != dev.static_address;
        if address_moved {
            row.static_address = dev.static_address;
            changed.push("static_address".into());
        }
        row.last_synced_at = Some(self.clock.now());

        if let Err(e) = self.repo.update_user(&row).await {
            warn!(router = %router.id, user = %dev.external_id, "user update failed: {e}");
            return SyncResult::error(class, &router.id, Some(&dev.external_id), &e);
        }

        // The old address rows now point at a user that moved; sever the
        // links so the orphan sweep can reclaim them.
        if address_moved {
            match self.repo.clear_user_ownership(&row.id).await {
                Ok(severed) if severed > 0 => {
                    info!(router = %router.id, user = %dev.external_id, severed, "severed stale address ownership");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(router = %router.id, user = %dev.external_id, "severing ownership failed: {e}");
                    return SyncResult::error(class, &router.id, Some(&dev.external_id), &e);
                }
            }
        }

        if changed.is_empty() {
            SyncResult::verified(class, &router.id, &dev.external_id)
        } else {
            debug!(router = %router.id, user = %dev.external_id, ?changed, "user drifted");
            SyncResult::updated(class, &router.id, &dev.external_id, changed)
        }
    }

    async fn create_row(&self, router: &Router, dev: &DeviceUser) -> SyncResult {
        let class = EntityClass::Users;
        let new_user = NewPppoeUser {
            router_id: router.id.clone(),
            external_id: dev.external_id.clone(),
            username: dev.username.clone(),
            profile_external_id: dev.profile.clone(),
            status: if dev.disabled {
                UserStatus::Disabled
            } else {
                UserStatus::Active
            },
            static_address: dev.static_address,
            last_synced_at: Some(self.clock.now()),
        };
        match self.repo.insert_user(new_user).await {
            Ok(_) => {
                info!(router = %router.id, user = %dev.external_id, username = %dev.username, "user created");
                SyncResult::created(class, &router.id, &dev.external_id)
            }
            Err(e) => {
                warn!(router = %router.id, user = %dev.external_id, "user create failed: {e}");
                SyncResult::error(class, &router.id, Some(&dev.external_id), &e)
            }
        }
    }

    /// Manual single-user sync: reconcile one mirror row against the
    /// device, bypassing the fleet pass (and its cursor).
    pub async fn sync_user(&self, router: &Router, row: &PppoeUser) -> Result<SyncResult> {
        let device_users = self
            .client
            .list_users(router)
            .await
            .map_err(|e| {
                warn!(router = %router.id, user = %row.external_id, "device fetch failed: {e}");
                e
            })?;

        match device_users
            .iter()
            .find(|d| d.external_id == row.external_id)
        {
            Some(dev) => Ok(self.sync_pair(router, dev, row).await),
            None => {
                warn!(
                    router = %router.id, user = %row.external_id, username = %row.username,
                    "mirror user no longer reported by device"
                );
                Ok(SyncResult::missing_in_router(
                    EntityClass::Users,
                    &router.id,
                    &row.external_id,
                ))
            }
        }
    }
}

#[async_trait]
impl RouterSynchronizer for UserSynchronizer {
    fn class(&self) -> EntityClass {
        EntityClass::Users
    }

    async fn sync_router(&self, router: &Router) -> Result<Vec<SyncResult>> {
        let class = EntityClass::Users;
        let device_users = self.client.list_users(router).await?;
        let local_users = self.repo.list_users(&router.id).await?;

        let join = match_by_external_id(
            &device_users,
            &local_users,
            |d| &d.external_id,
            |l| &l.external_id,
        );

        let mut results = Vec::with_capacity(device_users.len() + join.missing_in_device.len());

        for (dev, row) in &join.matched {
            results.push(self.sync_pair(router, dev, row).await);
        }

        for dev in &join.missing_in_db {
            if self.auto_create {
                results.push(self.create_row(router, dev).await);
            } else {
                info!(
                    router = %router.id, user = %dev.external_id, username = %dev.username,
                    "device user has no mirror row (auto-create disabled)"
                );
                results.push(SyncResult::missing_in_db(class, &router.id, &dev.external_id));
            }
        }

        for row in &join.missing_in_device {
            warn!(
                router = %router.id, user = %row.external_id, username = %row.username,
                "mirror user no longer reported by device"
            );
            results.push(SyncResult::missing_in_router(class, &router.id, &row.external_id));
        }

        Ok(results)
    }
}
