//! Orphan reclaimer
//!
//! Independent global sweep over the address mirror: every row marked
//! assigned whose PPPoE user link has gone dangling is returned to
//! available with its owner fields cleared.
//!
//! A user pass can sever a linkage without revisiting the corresponding
//! address row in the same pass; this sweep guarantees convergence. It is
//! idempotent and runs strictly after a user pass completes, never
//! concurrently with one.

use std::sync::Arc;
use tracing::{debug, info};

use crate::Result;
use crate::model::ReclaimReport;
use crate::traits::Repository;

/// Sweeps dangling-assigned addresses back to available
pub struct OrphanReclaimer {
    repo: Arc<dyn Repository>,
}

impl OrphanReclaimer {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Run one sweep. Store failures propagate; this is a store-level
    /// operation with no per-record recovery story.
    pub async fn reclaim(&self) -> Result<ReclaimReport> {
        let orphans = self.repo.list_orphaned_addresses().await?;
        let mut report = ReclaimReport::default();

        for mut row in orphans {
            debug!(address = %row.address, pool = %row.pool_id, "reclaiming orphaned address");
            row.release();
            self.repo.update_address(&row).await?;
            report.freed += 1;
        }

        if report.freed > 0 {
            info!(freed = report.freed, "orphan sweep reclaimed addresses");
        }
        Ok(report)
    }
}
