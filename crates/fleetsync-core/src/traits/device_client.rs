// # Device Client Trait
//
// Defines the read-only interface to one access router.
//
// ## Implementations
//
// - RouterOS REST: `fleetsync-device-routeros` crate
// - Test doubles: scripted clients in the contract tests
//
// Adapters are isolated, stateless, single-shot components. Each method
// performs one query against one router and returns the listing or a
// transport error scoped to that router. Everything else is owned
// elsewhere:
//
// - Retry and scheduling decisions: owned by the engine
// - Diffing and persistence: owned by the synchronizers
// - Request timeout policy: owned by the adapter; a timeout surfaces as an
//   ordinary transport error
//
// Adapters must not cache listings between calls, spawn background tasks,
// or touch the persistence store.

use async_trait::async_trait;

use crate::model::{DeviceAddressBook, DevicePool, DeviceProfile, DeviceUser, Router};

/// Read-only per-router queries against the device
///
/// Implementations must be thread-safe; a fleet pass calls them from a
/// bounded worker pool, one router per worker.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// List the IP pools configured on the router
    async fn list_ip_pools(&self, router: &Router) -> Result<Vec<DevicePool>, crate::Error>;

    /// List the used/available address buckets of one pool.
    ///
    /// The device reports exactly two buckets; mirror rows in neither are
    /// classified by the address synchronizer, not the adapter.
    async fn list_pool_addresses(
        &self,
        router: &Router,
        pool_external_id: &str,
    ) -> Result<DeviceAddressBook, crate::Error>;

    /// List the PPPoE service profiles configured on the router
    async fn list_profiles(&self, router: &Router) -> Result<Vec<DeviceProfile>, crate::Error>;

    /// List the PPPoE subscriber accounts configured on the router
    async fn list_users(&self, router: &Router) -> Result<Vec<DeviceUser>, crate::Error>;

    /// Adapter name for logging/debugging (e.g. "routeros")
    fn adapter_name(&self) -> &'static str;
}

/// Helper trait for constructing device clients from configuration
pub trait DeviceClientFactory: Send + Sync {
    /// Create a DeviceClient instance from configuration
    fn create(
        &self,
        config: &crate::config::AdapterConfig,
    ) -> Result<Box<dyn DeviceClient>, crate::Error>;
}
