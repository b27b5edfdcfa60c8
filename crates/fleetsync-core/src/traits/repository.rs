// # Repository Trait
//
// Defines the interface to the relational mirror.
//
// ## Purpose
//
// The repository is the single shared mutable resource of a fleet pass.
// Synchronizers read mirror rows through it, overwrite engine-owned fields
// on drift, and create rows on first device observation. Concurrent
// workers target disjoint (router_id, external_id) keys, so correctness
// relies on the unique-key guarantees below rather than external locking.
//
// ## Field precedence
//
// Device truth always wins for engine-owned fields (names, ranges, rate
// parameters, status, addresses). Locally-set fields — billing package and
// subscriber links, comments — are never written by a synchronizer and
// must survive every update.
//
// ## Unique keys
//
// Implementations must enforce the per-entity unique keys:
// pools/profiles/users on (router_id, external_id), addresses on
// (pool_id, address). `insert_*` fails with a persistence error on a
// duplicate key; `upsert_address` is atomic find-or-create on its key.
//
// ## Implementations
//
// - In-memory: `store::MemoryRepository` (tests, demos, embedding)
// - Deployments register their SQL-backed implementation through the
//   component registry

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::net::IpAddr;

use crate::model::{
    AddressStatus, IpAddress, IpPool, PoolId, PoolKind, PppoeProfile, PppoeUser, Router, RouterId,
    UserId, UserStatus,
};

/// Insert payload for a pool row; the repository assigns the row id
#[derive(Debug, Clone)]
pub struct NewIpPool {
    pub router_id: RouterId,
    pub external_id: String,
    pub name: String,
    pub ranges: String,
    pub kind: PoolKind,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Insert payload for a profile row; the repository assigns the row id
#[derive(Debug, Clone)]
pub struct NewPppoeProfile {
    pub router_id: RouterId,
    pub external_id: String,
    pub name: String,
    pub rate_limit: String,
    pub burst: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Insert payload for a user row; the repository assigns the row id
#[derive(Debug, Clone)]
pub struct NewPppoeUser {
    pub router_id: RouterId,
    pub external_id: String,
    pub username: String,
    pub profile_external_id: String,
    pub status: UserStatus,
    pub static_address: Option<IpAddr>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Result of an upsert: the stored row plus whether it was created
#[derive(Debug, Clone)]
pub struct Upserted<T> {
    pub record: T,
    pub created: bool,
}

/// Typed CRUD plus find-or-create against the relational mirror
///
/// All methods must be safe to call concurrently from multiple workers.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- routers (read-only to the engine) ---

    /// Routers eligible for fleet passes
    async fn list_active_routers(&self) -> Result<Vec<Router>, crate::Error>;

    async fn get_router(&self, id: &RouterId) -> Result<Option<Router>, crate::Error>;

    // --- pools ---

    async fn find_pool(
        &self,
        router: &RouterId,
        external_id: &str,
    ) -> Result<Option<IpPool>, crate::Error>;

    async fn get_pool(&self, id: &PoolId) -> Result<Option<IpPool>, crate::Error>;

    async fn list_pools(&self, router: &RouterId) -> Result<Vec<IpPool>, crate::Error>;

    async fn insert_pool(&self, pool: NewIpPool) -> Result<IpPool, crate::Error>;

    /// Overwrite an existing pool row (matched by `pool.id`)
    async fn update_pool(&self, pool: &IpPool) -> Result<(), crate::Error>;

    // --- addresses ---

    async fn list_addresses(&self, pool: &PoolId) -> Result<Vec<IpAddress>, crate::Error>;

    /// Atomic find-or-create on (pool_id, address).
    ///
    /// An existing row gets `status` written (device truth); owner links
    /// are cleared only when `clear_owner` is set, otherwise they survive.
    /// A created row starts unowned in the given status.
    async fn upsert_address(
        &self,
        pool: &PoolId,
        address: IpAddr,
        status: AddressStatus,
        clear_owner: bool,
    ) -> Result<Upserted<IpAddress>, crate::Error>;

    /// Overwrite an existing address row (matched by `addr.id`)
    async fn update_address(&self, addr: &IpAddress) -> Result<(), crate::Error>;

    /// Assigned rows whose user link has gone dangling, fleet-wide
    async fn list_orphaned_addresses(&self) -> Result<Vec<IpAddress>, crate::Error>;

    /// Clear the owner pair on every row owned by the given user, leaving
    /// statuses untouched. Returns the number of severed rows.
    async fn clear_user_ownership(&self, user: &UserId) -> Result<usize, crate::Error>;

    // --- profiles ---

    async fn find_profile(
        &self,
        router: &RouterId,
        external_id: &str,
    ) -> Result<Option<PppoeProfile>, crate::Error>;

    async fn list_profiles(&self, router: &RouterId) -> Result<Vec<PppoeProfile>, crate::Error>;

    async fn insert_profile(&self, profile: NewPppoeProfile)
    -> Result<PppoeProfile, crate::Error>;

    /// Overwrite an existing profile row (matched by `profile.id`)
    async fn update_profile(&self, profile: &PppoeProfile) -> Result<(), crate::Error>;

    // --- users ---

    async fn find_user(
        &self,
        router: &RouterId,
        external_id: &str,
    ) -> Result<Option<PppoeUser>, crate::Error>;

    async fn get_user(&self, id: &UserId) -> Result<Option<PppoeUser>, crate::Error>;

    async fn list_users(&self, router: &RouterId) -> Result<Vec<PppoeUser>, crate::Error>;

    async fn insert_user(&self, user: NewPppoeUser) -> Result<PppoeUser, crate::Error>;

    /// Overwrite an existing user row (matched by `user.id`)
    async fn update_user(&self, user: &PppoeUser) -> Result<(), crate::Error>;
}

/// Helper trait for constructing repositories from configuration
pub trait RepositoryFactory: Send + Sync {
    /// Create a Repository instance from configuration
    fn create(
        &self,
        config: &serde_json::Value,
    ) -> Result<std::sync::Arc<dyn Repository>, crate::Error>;
}
