//! Entity synchronizers
//!
//! One synchronizer per reconciled entity class, all implementing the
//! shared [`RouterSynchronizer`] contract. A synchronizer owns the full
//! pass for one router: fetch the device listing through the adapter,
//! join it to the mirror rows by external id, overwrite drifted
//! engine-owned fields, and produce one [`SyncResult`] per record.
//!
//! ## Failure scopes
//!
//! - Device fetch failure: the whole router fails; `sync_router` returns
//!   the transport error and the engine records one error result for the
//!   router. Other routers of the pass are unaffected.
//! - Malformed device record: one validation error result, raw payload
//!   logged, pass continues.
//! - Store write failure on one record: one persistence error result,
//!   pass continues; the scheduler withholds the class cursor.
//! - Store read failure (listing the mirror rows): the router fails with
//!   a persistence error, fatal to the class run at the scheduler.

use async_trait::async_trait;

use crate::Result;
use crate::model::{EntityClass, Router, SyncResult};

mod addresses;
mod pools;
mod profiles;
mod users;

pub use addresses::AddressSynchronizer;
pub use pools::PoolSynchronizer;
pub use profiles::ProfileSynchronizer;
pub use users::UserSynchronizer;

/// Shared contract of the four entity synchronizers
#[async_trait]
pub trait RouterSynchronizer: Send + Sync {
    /// The entity class this synchronizer reconciles
    fn class(&self) -> EntityClass;

    /// Reconcile one router for this class.
    ///
    /// Returns one result per touched record. Errors are returned only
    /// for router-scoped failures (device unreachable, mirror unreadable);
    /// record-scoped failures are embedded as `Error` results and the
    /// pass continues.
    async fn sync_router(&self, router: &Router) -> Result<Vec<SyncResult>>;
}
