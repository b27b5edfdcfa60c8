//! IP address synchronizer
//!
//! The device reports only two buckets per pool, `used` and `available`;
//! the mirror additionally holds rows the device no longer reports.
//! One pass classifies every row of a pool:
//!
//! 1. `used` addresses are found-or-created as assigned (owner links are
//!    left alone; ownership is written by provisioning, not by this pass).
//! 2. `available` addresses are found-or-created as available; a
//!    previously-assigned row found here is **freed** — the subscriber
//!    disconnected or was removed device-side — and its owner links are
//!    cleared.
//! 3. Rows in neither bucket are no longer part of the pool's range
//!    (e.g. the pool was resized) and are set to blocked for human
//!    review. Nothing is ever deleted.
//!
//! Addresses carry no billing linkage, so rows are always auto-created.

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::model::{
    AddressPoolReport, AddressStatus, EntityClass, IpAddress, IpPool, Router, SyncResult,
};
use crate::traits::{DeviceClient, Repository};
use crate::{Error, Result};

use super::RouterSynchronizer;

/// Reconciles per-pool device address occupancy against the mirror
pub struct AddressSynchronizer {
    client: Arc<dyn DeviceClient>,
    repo: Arc<dyn Repository>,
}

impl AddressSynchronizer {
    pub fn new(client: Arc<dyn DeviceClient>, repo: Arc<dyn Repository>) -> Self {
        Self { client, repo }
    }

    /// Reconcile one pool's address book. Public because the manual
    /// single-pool sync enters here, bypassing the fleet pass.
    pub async fn sync_pool(&self, router: &Router, pool: &IpPool) -> Result<AddressPoolReport> {
        let book = self
            .client
            .list_pool_addresses(router, &pool.external_id)
            .await?;
        let rows = self.repo.list_addresses(&pool.id).await?;

        let mut by_addr: HashMap<IpAddr, IpAddress> =
            rows.into_iter().map(|row| (row.address, row)).collect();
        let mut report = AddressPoolReport::new(&pool.external_id);

        for addr in &book.used {
            match by_addr.remove(addr) {
                Some(row) if row.status == AddressStatus::Assigned => report.verified += 1,
                Some(mut row) => {
                    row.status = AddressStatus::Assigned;
                    match self.repo.update_address(&row).await {
                        Ok(()) => report.updated += 1,
                        Err(e) => {
                            warn!(pool = %pool.external_id, address = %addr, "address update failed: {e}");
                            report.errors += 1;
                        }
                    }
                }
                None => match self
                    .repo
                    .upsert_address(&pool.id, *addr, AddressStatus::Assigned, false)
                    .await
                {
                    Ok(up) if up.created => report.created += 1,
                    Ok(_) => report.updated += 1,
                    Err(e) => {
                        warn!(pool = %pool.external_id, address = %addr, "address upsert failed: {e}");
                        report.errors += 1;
                    }
                },
            }
        }

        for addr in &book.available {
            match by_addr.remove(addr) {
                Some(row) if row.status == AddressStatus::Available => report.verified += 1,
                Some(mut row) => {
                    let was_assigned = row.status == AddressStatus::Assigned;
                    row.release();
                    match self.repo.update_address(&row).await {
                        Ok(()) if was_assigned => {
                            debug!(pool = %pool.external_id, address = %addr, "address freed");
                            report.freed += 1;
                        }
                        Ok(()) => report.updated += 1,
                        Err(e) => {
                            warn!(pool = %pool.external_id, address = %addr, "address update failed: {e}");
                            report.errors += 1;
                        }
                    }
                }
                None => match self
                    .repo
                    .upsert_address(&pool.id, *addr, AddressStatus::Available, false)
                    .await
                {
                    Ok(up) if up.created => report.created += 1,
                    Ok(_) => report.updated += 1,
                    Err(e) => {
                        warn!(pool = %pool.external_id, address = %addr, "address upsert failed: {e}");
                        report.errors += 1;
                    }
                },
            }
        }

        // Rows the device no longer reports in either bucket
        for (addr, mut row) in by_addr {
            if row.status == AddressStatus::Blocked {
                continue;
            }
            row.status = AddressStatus::Blocked;
            match self.repo.update_address(&row).await {
                Ok(()) => {
                    warn!(pool = %pool.external_id, address = %addr, "address left the pool range, blocked");
                    report.blocked += 1;
                }
                Err(e) => {
                    warn!(pool = %pool.external_id, address = %addr, "address update failed: {e}");
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }

    pub(crate) fn report_to_result(&self, router: &Router, report: AddressPoolReport) -> SyncResult {
        let class = EntityClass::Addresses;
        let message = report.to_string();
        if report.errors > 0 {
            SyncResult::error(
                class,
                &router.id,
                Some(&report.pool_external_id),
                &Error::persistence(format!(
                    "{} address write failures ({message})",
                    report.errors
                )),
            )
        } else if report.changed() {
            SyncResult::updated(class, &router.id, &report.pool_external_id, Vec::new())
                .with_message(message)
        } else {
            SyncResult::verified(class, &router.id, &report.pool_external_id)
                .with_message(message)
        }
    }
}

#[async_trait]
impl RouterSynchronizer for AddressSynchronizer {
    fn class(&self) -> EntityClass {
        EntityClass::Addresses
    }

    async fn sync_router(&self, router: &Router) -> Result<Vec<SyncResult>> {
        let pools = self.repo.list_pools(&router.id).await?;
        let mut results = Vec::with_capacity(pools.len());

        for pool in &pools {
            match self.sync_pool(router, pool).await {
                Ok(report) => results.push(self.report_to_result(router, report)),
                Err(e) => {
                    warn!(router = %router.id, pool = %pool.external_id, "pool address sync failed: {e}");
                    results.push(SyncResult::error(
                        EntityClass::Addresses,
                        &router.id,
                        Some(&pool.external_id),
                        &e,
                    ));
                }
            }
        }

        Ok(results)
    }
}
