// # Memory Repository & Cursor Store
//
// In-memory implementations of the persistence seams.
//
// ## Purpose
//
// A complete, thread-safe mirror that doesn't persist across restarts.
// Used by the contract tests, the demos, and embedders that bring their
// own durability. Deployments register a SQL-backed repository through
// the component registry instead.
//
// Unique keys are enforced the same way a relational store would:
// duplicate-key inserts fail with a persistence error, and
// `upsert_address` is find-or-create on (pool_id, address).

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::model::{
    AddressId, AddressStatus, IpAddress, IpPool, PoolId, PppoeProfile, PppoeUser, ProfileId,
    Router, RouterId, SyncCursors, UserId,
};
use crate::traits::repository::{
    NewIpPool, NewPppoeProfile, NewPppoeUser, Repository, RepositoryFactory, Upserted,
};
use crate::traits::CursorStore;

#[derive(Default)]
struct Inner {
    routers: HashMap<RouterId, Router>,
    pools: HashMap<PoolId, IpPool>,
    addresses: HashMap<AddressId, IpAddress>,
    profiles: HashMap<ProfileId, PppoeProfile>,
    users: HashMap<UserId, PppoeUser>,
    next_id: u64,
}

impl Inner {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }
}

/// In-memory repository implementation
///
/// All state lives in maps behind one RwLock; row ids are assigned
/// sequentially per store instance.
#[derive(Default)]
pub struct MemoryRepository {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryRepository {
    /// Create a new empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a router (routers are read-only to the engine, so seeding is
    /// a store concern, not a repository-trait concern)
    pub async fn add_router(&self, router: Router) {
        self.inner.write().await.routers.insert(router.id.clone(), router);
    }

    /// Number of pool rows in the store
    pub async fn pool_count(&self) -> usize {
        self.inner.read().await.pools.len()
    }

    /// Number of address rows in the store
    pub async fn address_count(&self) -> usize {
        self.inner.read().await.addresses.len()
    }

    /// Number of profile rows in the store
    pub async fn profile_count(&self) -> usize {
        self.inner.read().await.profiles.len()
    }

    /// Number of user rows in the store
    pub async fn user_count(&self) -> usize {
        self.inner.read().await.users.len()
    }

    /// Fetch an address row by (pool, address), for assertions and seeding
    pub async fn find_address(&self, pool: &PoolId, address: IpAddr) -> Option<IpAddress> {
        self.inner
            .read()
            .await
            .addresses
            .values()
            .find(|a| &a.pool_id == pool && a.address == address)
            .cloned()
    }

    /// Overwrite an address row directly, bypassing upsert semantics.
    ///
    /// Seeding hook for tests that need pre-existing rows in a specific
    /// state (e.g. dangling-assigned orphans).
    pub async fn put_address(&self, addr: IpAddress) {
        self.inner.write().await.addresses.insert(addr.id.clone(), addr);
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn list_active_routers(&self) -> Result<Vec<Router>, Error> {
        let inner = self.inner.read().await;
        Ok(inner.routers.values().filter(|r| r.active).cloned().collect())
    }

    async fn get_router(&self, id: &RouterId) -> Result<Option<Router>, Error> {
        Ok(self.inner.read().await.routers.get(id).cloned())
    }

    async fn find_pool(
        &self,
        router: &RouterId,
        external_id: &str,
    ) -> Result<Option<IpPool>, Error> {
        let inner = self.inner.read().await;
        Ok(inner
            .pools
            .values()
            .find(|p| &p.router_id == router && p.external_id == external_id)
            .cloned())
    }

    async fn get_pool(&self, id: &PoolId) -> Result<Option<IpPool>, Error> {
        Ok(self.inner.read().await.pools.get(id).cloned())
    }

    async fn list_pools(&self, router: &RouterId) -> Result<Vec<IpPool>, Error> {
        let inner = self.inner.read().await;
        Ok(inner
            .pools
            .values()
            .filter(|p| &p.router_id == router)
            .cloned()
            .collect())
    }

    async fn insert_pool(&self, pool: NewIpPool) -> Result<IpPool, Error> {
        let mut inner = self.inner.write().await;
        if inner
            .pools
            .values()
            .any(|p| p.router_id == pool.router_id && p.external_id == pool.external_id)
        {
            return Err(Error::persistence(format!(
                "duplicate pool key ({}, {})",
                pool.router_id, pool.external_id
            )));
        }
        let id = PoolId(inner.next_id("pool"));
        let row = IpPool {
            id: id.clone(),
            router_id: pool.router_id,
            external_id: pool.external_id,
            name: pool.name,
            ranges: pool.ranges,
            kind: pool.kind,
            comment: None,
            last_synced_at: pool.last_synced_at,
        };
        inner.pools.insert(id, row.clone());
        Ok(row)
    }

    async fn update_pool(&self, pool: &IpPool) -> Result<(), Error> {
        let mut inner = self.inner.write().await;
        if !inner.pools.contains_key(&pool.id) {
            return Err(Error::persistence(format!("no pool row {}", pool.id)));
        }
        inner.pools.insert(pool.id.clone(), pool.clone());
        Ok(())
    }

    async fn list_addresses(&self, pool: &PoolId) -> Result<Vec<IpAddress>, Error> {
        let inner = self.inner.read().await;
        Ok(inner
            .addresses
            .values()
            .filter(|a| &a.pool_id == pool)
            .cloned()
            .collect())
    }

    async fn upsert_address(
        &self,
        pool: &PoolId,
        address: IpAddr,
        status: AddressStatus,
        clear_owner: bool,
    ) -> Result<Upserted<IpAddress>, Error> {
        let mut inner = self.inner.write().await;
        let existing = inner
            .addresses
            .values()
            .find(|a| &a.pool_id == pool && a.address == address)
            .map(|a| a.id.clone());

        match existing {
            Some(id) => {
                let row = inner.addresses.get_mut(&id).expect("row exists");
                row.status = status;
                if clear_owner {
                    row.sever_owner();
                }
                Ok(Upserted {
                    record: row.clone(),
                    created: false,
                })
            }
            None => {
                let id = AddressId(inner.next_id("addr"));
                let row = IpAddress::new(id.clone(), pool.clone(), address, status);
                inner.addresses.insert(id, row.clone());
                Ok(Upserted {
                    record: row,
                    created: true,
                })
            }
        }
    }

    async fn update_address(&self, addr: &IpAddress) -> Result<(), Error> {
        let mut inner = self.inner.write().await;
        if !inner.addresses.contains_key(&addr.id) {
            return Err(Error::persistence(format!("no address row {}", addr.id)));
        }
        inner.addresses.insert(addr.id.clone(), addr.clone());
        Ok(())
    }

    async fn list_orphaned_addresses(&self) -> Result<Vec<IpAddress>, Error> {
        let inner = self.inner.read().await;
        Ok(inner
            .addresses
            .values()
            .filter(|a| a.is_orphaned())
            .cloned()
            .collect())
    }

    async fn clear_user_ownership(&self, user: &UserId) -> Result<usize, Error> {
        let mut inner = self.inner.write().await;
        let mut severed = 0;
        for row in inner.addresses.values_mut() {
            if row.pppoe_user_id() == Some(user) {
                row.sever_owner();
                severed += 1;
            }
        }
        Ok(severed)
    }

    async fn find_profile(
        &self,
        router: &RouterId,
        external_id: &str,
    ) -> Result<Option<PppoeProfile>, Error> {
        let inner = self.inner.read().await;
        Ok(inner
            .profiles
            .values()
            .find(|p| &p.router_id == router && p.external_id == external_id)
            .cloned())
    }

    async fn list_profiles(&self, router: &RouterId) -> Result<Vec<PppoeProfile>, Error> {
        let inner = self.inner.read().await;
        Ok(inner
            .profiles
            .values()
            .filter(|p| &p.router_id == router)
            .cloned()
            .collect())
    }

    async fn insert_profile(&self, profile: NewPppoeProfile) -> Result<PppoeProfile, Error> {
        let mut inner = self.inner.write().await;
        if inner
            .profiles
            .values()
            .any(|p| p.router_id == profile.router_id && p.external_id == profile.external_id)
        {
            return Err(Error::persistence(format!(
                "duplicate profile key ({}, {})",
                profile.router_id, profile.external_id
            )));
        }
        let id = ProfileId(inner.next_id("profile"));
        let row = PppoeProfile {
            id: id.clone(),
            router_id: profile.router_id,
            external_id: profile.external_id,
            name: profile.name,
            rate_limit: profile.rate_limit,
            burst: profile.burst,
            package_id: None,
            last_synced_at: profile.last_synced_at,
        };
        inner.profiles.insert(id, row.clone());
        Ok(row)
    }

    async fn update_profile(&self, profile: &PppoeProfile) -> Result<(), Error> {
        let mut inner = self.inner.write().await;
        if !inner.profiles.contains_key(&profile.id) {
            return Err(Error::persistence(format!("no profile row {}", profile.id)));
        }
        inner.profiles.insert(profile.id.clone(), profile.clone());
        Ok(())
    }

    async fn find_user(
        &self,
        router: &RouterId,
        external_id: &str,
    ) -> Result<Option<PppoeUser>, Error> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .values()
            .find(|u| &u.router_id == router && u.external_id == external_id)
            .cloned())
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<PppoeUser>, Error> {
        Ok(self.inner.read().await.users.get(id).cloned())
    }

    async fn list_users(&self, router: &RouterId) -> Result<Vec<PppoeUser>, Error> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .values()
            .filter(|u| &u.router_id == router)
            .cloned()
            .collect())
    }

    async fn insert_user(&self, user: NewPppoeUser) -> Result<PppoeUser, Error> {
        let mut inner = self.inner.write().await;
        if inner
            .users
            .values()
            .any(|u| u.router_id == user.router_id && u.external_id == user.external_id)
        {
            return Err(Error::persistence(format!(
                "duplicate user key ({}, {})",
                user.router_id, user.external_id
            )));
        }
        let id = UserId(inner.next_id("user"));
        let row = PppoeUser {
            id: id.clone(),
            router_id: user.router_id,
            external_id: user.external_id,
            username: user.username,
            profile_external_id: user.profile_external_id,
            status: user.status,
            static_address: user.static_address,
            subscriber_id: None,
            last_synced_at: user.last_synced_at,
        };
        inner.users.insert(id, row.clone());
        Ok(row)
    }

    async fn update_user(&self, user: &PppoeUser) -> Result<(), Error> {
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(&user.id) {
            return Err(Error::persistence(format!("no user row {}", user.id)));
        }
        inner.users.insert(user.id.clone(), user.clone());
        Ok(())
    }
}

/// Factory for the in-memory repository
pub struct MemoryRepositoryFactory;

impl RepositoryFactory for MemoryRepositoryFactory {
    fn create(&self, _config: &serde_json::Value) -> Result<Arc<dyn Repository>, Error> {
        Ok(Arc::new(MemoryRepository::new()))
    }
}

/// In-memory cursor store implementation
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    inner: RwLock<SyncCursors>,
}

impl MemoryCursorStore {
    /// Create a new empty cursor store (every class due)
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self) -> Result<SyncCursors, Error> {
        Ok(self.inner.read().await.clone())
    }

    async fn store(&self, cursors: &SyncCursors) -> Result<(), Error> {
        *self.inner.write().await = cursors.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PoolKind;

    fn new_pool(router: &str, ext: &str) -> NewIpPool {
        NewIpPool {
            router_id: RouterId::from(router),
            external_id: ext.to_string(),
            name: format!("pool-{ext}"),
            ranges: "10.0.0.2-10.0.0.254".to_string(),
            kind: PoolKind::Active,
            last_synced_at: None,
        }
    }

    #[tokio::test]
    async fn insert_enforces_unique_pool_key() {
        let repo = MemoryRepository::new();
        repo.insert_pool(new_pool("r1", "*1")).await.unwrap();

        // Same external id on another router is a distinct key
        repo.insert_pool(new_pool("r2", "*1")).await.unwrap();

        let err = repo.insert_pool(new_pool("r1", "*1")).await.unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
        assert_eq!(repo.pool_count().await, 2);
    }

    #[tokio::test]
    async fn upsert_address_is_find_or_create() {
        let repo = MemoryRepository::new();
        let pool = repo.insert_pool(new_pool("r1", "*1")).await.unwrap();
        let addr: IpAddr = "10.0.0.5".parse().unwrap();

        let first = repo
            .upsert_address(&pool.id, addr, AddressStatus::Assigned, false)
            .await
            .unwrap();
        assert!(first.created);

        let second = repo
            .upsert_address(&pool.id, addr, AddressStatus::Available, true)
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.record.id, first.record.id);
        assert_eq!(second.record.status, AddressStatus::Available);
        assert_eq!(repo.address_count().await, 1);
    }

    #[tokio::test]
    async fn clear_user_ownership_severs_links_only() {
        let repo = MemoryRepository::new();
        let pool = repo.insert_pool(new_pool("r1", "*1")).await.unwrap();
        let addr: IpAddr = "10.0.0.9".parse().unwrap();
        let mut row = repo
            .upsert_address(&pool.id, addr, AddressStatus::Available, false)
            .await
            .unwrap()
            .record;
        row.assign(
            crate::model::SubscriberId::from("sub-1"),
            UserId::from("user-7"),
        );
        repo.update_address(&row).await.unwrap();

        let severed = repo
            .clear_user_ownership(&UserId::from("user-7"))
            .await
            .unwrap();
        assert_eq!(severed, 1);

        let row = repo.find_address(&pool.id, addr).await.unwrap();
        assert_eq!(row.status, AddressStatus::Assigned);
        assert!(row.is_orphaned());
    }

    #[tokio::test]
    async fn memory_cursor_store_roundtrip() {
        let store = MemoryCursorStore::new();
        let mut cursors = store.load().await.unwrap();
        assert!(cursors.get(crate::model::EntityClass::Pools).is_none());

        cursors.set(crate::model::EntityClass::Pools, chrono::Utc::now());
        store.store(&cursors).await.unwrap();
        assert_eq!(store.load().await.unwrap(), cursors);
    }
}
