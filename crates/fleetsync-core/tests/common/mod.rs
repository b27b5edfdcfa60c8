//! Test doubles and common utilities for the contract tests
//!
//! A scripted device client whose per-router state the tests program
//! directly, and a repository wrapper that injects store write failures.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;

use fleetsync_core::config::SyncConfig;
use fleetsync_core::engine::EngineEvent;
use fleetsync_core::error::Result;
use fleetsync_core::model::{
    AddressStatus, DeviceAddressBook, DevicePool, DeviceProfile, DeviceUser, IpAddress, IpPool,
    PoolId, PppoeProfile, PppoeUser, Router, RouterId, UserId,
};
use fleetsync_core::store::{MemoryCursorStore, MemoryRepository};
use fleetsync_core::traits::repository::{
    NewIpPool, NewPppoeProfile, NewPppoeUser, Repository, Upserted,
};
use fleetsync_core::traits::DeviceClient;
use fleetsync_core::{Error, ReconcileEngine};

/// Scripted per-router device state
#[derive(Debug, Clone, Default)]
pub struct DeviceState {
    pub pools: Vec<DevicePool>,
    /// Address buckets keyed by pool external id
    pub addresses: HashMap<String, DeviceAddressBook>,
    pub profiles: Vec<DeviceProfile>,
    pub users: Vec<DeviceUser>,
    /// Simulate the router being unreachable
    pub unreachable: bool,
}

/// A device client whose answers the test programs per router
pub struct ScriptedDeviceClient {
    state: Mutex<HashMap<RouterId, DeviceState>>,
    call_count: AtomicUsize,
}

impl ScriptedDeviceClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Program the full device state of one router
    pub fn set_state(&self, router: &RouterId, state: DeviceState) {
        self.state.lock().unwrap().insert(router.clone(), state);
    }

    /// Toggle reachability of one router
    pub fn set_unreachable(&self, router: &RouterId, unreachable: bool) {
        self.state
            .lock()
            .unwrap()
            .entry(router.clone())
            .or_default()
            .unreachable = unreachable;
    }

    /// Total number of device queries made
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    fn fetch(&self, router: &Router) -> Result<DeviceState> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let state = self
            .state
            .lock()
            .unwrap()
            .get(&router.id)
            .cloned()
            .unwrap_or_default();
        if state.unreachable {
            return Err(Error::transport(router.id.as_str(), "connection refused"));
        }
        Ok(state)
    }
}

#[async_trait]
impl DeviceClient for ScriptedDeviceClient {
    async fn list_ip_pools(&self, router: &Router) -> Result<Vec<DevicePool>> {
        Ok(self.fetch(router)?.pools)
    }

    async fn list_pool_addresses(
        &self,
        router: &Router,
        pool_external_id: &str,
    ) -> Result<DeviceAddressBook> {
        Ok(self
            .fetch(router)?
            .addresses
            .get(pool_external_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_profiles(&self, router: &Router) -> Result<Vec<DeviceProfile>> {
        Ok(self.fetch(router)?.profiles)
    }

    async fn list_users(&self, router: &Router) -> Result<Vec<DeviceUser>> {
        Ok(self.fetch(router)?.users)
    }

    fn adapter_name(&self) -> &'static str {
        "scripted"
    }
}

/// Repository wrapper that injects write failures and counts writes
pub struct FlakyRepository {
    inner: Arc<MemoryRepository>,
    fail_writes: AtomicBool,
    write_count: AtomicUsize,
}

impl FlakyRepository {
    pub fn new(inner: Arc<MemoryRepository>) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
            write_count: AtomicUsize::new(0),
        }
    }

    /// Make every subsequent write fail with a persistence error
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes
    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }

    fn gate(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::persistence("injected write failure"));
        }
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Repository for FlakyRepository {
    async fn list_active_routers(&self) -> Result<Vec<Router>> {
        self.inner.list_active_routers().await
    }

    async fn get_router(&self, id: &RouterId) -> Result<Option<Router>> {
        self.inner.get_router(id).await
    }

    async fn find_pool(&self, router: &RouterId, external_id: &str) -> Result<Option<IpPool>> {
        self.inner.find_pool(router, external_id).await
    }

    async fn get_pool(&self, id: &PoolId) -> Result<Option<IpPool>> {
        self.inner.get_pool(id).await
    }

    async fn list_pools(&self, router: &RouterId) -> Result<Vec<IpPool>> {
        self.inner.list_pools(router).await
    }

    async fn insert_pool(&self, pool: NewIpPool) -> Result<IpPool> {
        self.gate()?;
        self.inner.insert_pool(pool).await
    }

    async fn update_pool(&self, pool: &IpPool) -> Result<()> {
        self.gate()?;
        self.inner.update_pool(pool).await
    }

    async fn list_addresses(&self, pool: &PoolId) -> Result<Vec<IpAddress>> {
        self.inner.list_addresses(pool).await
    }

    async fn upsert_address(
        &self,
        pool: &PoolId,
        address: IpAddr,
        status: AddressStatus,
        clear_owner: bool,
    ) -> Result<Upserted<IpAddress>> {
        self.gate()?;
        self.inner
            .upsert_address(pool, address, status, clear_owner)
            .await
    }

    async fn update_address(&self, addr: &IpAddress) -> Result<()> {
        self.gate()?;
        self.inner.update_address(addr).await
    }

    async fn list_orphaned_addresses(&self) -> Result<Vec<IpAddress>> {
        self.inner.list_orphaned_addresses().await
    }

    async fn clear_user_ownership(&self, user: &UserId) -> Result<usize> {
        self.gate()?;
        self.inner.clear_user_ownership(user).await
    }

    async fn find_profile(
        &self,
        router: &RouterId,
        external_id: &str,
    ) -> Result<Option<PppoeProfile>> {
        self.inner.find_profile(router, external_id).await
    }

    async fn list_profiles(&self, router: &RouterId) -> Result<Vec<PppoeProfile>> {
        self.inner.list_profiles(router).await
    }

    async fn insert_profile(&self, profile: NewPppoeProfile) -> Result<PppoeProfile> {
        self.gate()?;
        self.inner.insert_profile(profile).await
    }

    async fn update_profile(&self, profile: &PppoeProfile) -> Result<()> {
        self.gate()?;
        self.inner.update_profile(profile).await
    }

    async fn find_user(&self, router: &RouterId, external_id: &str) -> Result<Option<PppoeUser>> {
        self.inner.find_user(router, external_id).await
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<PppoeUser>> {
        self.inner.get_user(id).await
    }

    async fn list_users(&self, router: &RouterId) -> Result<Vec<PppoeUser>> {
        self.inner.list_users(router).await
    }

    async fn insert_user(&self, user: NewPppoeUser) -> Result<PppoeUser> {
        self.gate()?;
        self.inner.insert_user(user).await
    }

    async fn update_user(&self, user: &PppoeUser) -> Result<()> {
        self.gate()?;
        self.inner.update_user(user).await
    }
}

// ---------------------------------------------------------------------------
// Builders and fixtures
// ---------------------------------------------------------------------------

pub fn router(id: &str) -> Router {
    Router {
        id: RouterId::from(id),
        name: format!("router-{id}"),
        connection: format!("{id}.example.net"),
        active: true,
    }
}

pub fn device_pool(external_id: &str, name: &str, ranges: &str) -> DevicePool {
    DevicePool {
        external_id: external_id.to_string(),
        name: name.to_string(),
        ranges: ranges.to_string(),
    }
}

pub fn device_profile(external_id: &str, name: &str, rate_limit: &str) -> DeviceProfile {
    DeviceProfile {
        external_id: external_id.to_string(),
        name: name.to_string(),
        rate_limit: rate_limit.to_string(),
        burst: None,
    }
}

pub fn device_user(external_id: &str, username: &str, profile: &str) -> DeviceUser {
    DeviceUser {
        external_id: external_id.to_string(),
        username: username.to_string(),
        profile: profile.to_string(),
        disabled: false,
        static_address: None,
    }
}

pub fn ip(s: &str) -> IpAddr {
    s.parse().expect("valid test address")
}

/// Sync config with auto-create enabled for every class
pub fn auto_create_config() -> SyncConfig {
    SyncConfig {
        auto_create: fleetsync_core::config::AutoCreatePolicy {
            pools: true,
            profiles: true,
            users: true,
        },
        poll_interval_secs: 1,
        ..SyncConfig::default()
    }
}

/// Sync config with the default notify-only policy
pub fn notify_only_config() -> SyncConfig {
    SyncConfig {
        poll_interval_secs: 1,
        ..SyncConfig::default()
    }
}

/// Everything a contract test needs in one place
pub struct Harness {
    pub client: Arc<ScriptedDeviceClient>,
    pub repo: Arc<MemoryRepository>,
    pub flaky: Arc<FlakyRepository>,
    pub cursors: Arc<MemoryCursorStore>,
    pub engine: ReconcileEngine,
    pub events: mpsc::Receiver<EngineEvent>,
}

/// Build an engine over scripted devices, a flaky-wrapped memory
/// repository and a memory cursor store, with the routers seeded.
pub async fn harness(routers: &[Router], config: SyncConfig) -> Harness {
    let client = Arc::new(ScriptedDeviceClient::new());
    let repo = Arc::new(MemoryRepository::new());
    for r in routers {
        repo.add_router(r.clone()).await;
    }
    let flaky = Arc::new(FlakyRepository::new(repo.clone()));
    let cursors = Arc::new(MemoryCursorStore::new());

    let (engine, events) = ReconcileEngine::new(
        client.clone(),
        flaky.clone(),
        cursors.clone(),
        config,
    )
    .expect("engine construction succeeds");

    Harness {
        client,
        repo,
        flaky,
        cursors,
        engine,
        events,
    }
}

/// Drain whatever events are immediately available
pub fn drain_events(rx: &mut mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
