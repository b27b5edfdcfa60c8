//! Minimal embedding example for fleetsync-core
//!
//! Demonstrates using the engine as a library in a custom application:
//! in-memory stores, a hand-rolled device client, and a manually driven
//! reconciliation run. The engine lifecycle is fully managed by the
//! application; no daemon involved.

use std::sync::Arc;
use std::sync::Mutex;

use fleetsync_core::config::SyncConfig;
use fleetsync_core::model::{
    DeviceAddressBook, DevicePool, DeviceProfile, DeviceUser, EntityClass, Router, RouterId,
};
use fleetsync_core::store::{MemoryCursorStore, MemoryRepository};
use fleetsync_core::traits::DeviceClient;
use fleetsync_core::{ReconcileEngine, Result};

/// Device client backed by a fixed in-memory snapshot
struct SnapshotDeviceClient {
    profiles: Mutex<Vec<DeviceProfile>>,
}

impl SnapshotDeviceClient {
    fn new() -> Self {
        Self {
            profiles: Mutex::new(vec![DeviceProfile {
                external_id: "*2".to_string(),
                name: "10M".to_string(),
                rate_limit: "10M/2M".to_string(),
                burst: None,
            }]),
        }
    }

    /// Simulate a rename on the device
    fn rename_profile(&self, external_id: &str, new_name: &str) {
        let mut profiles = self.profiles.lock().unwrap();
        if let Some(profile) = profiles.iter_mut().find(|p| p.external_id == external_id) {
            profile.name = new_name.to_string();
        }
    }
}

#[async_trait::async_trait]
impl DeviceClient for SnapshotDeviceClient {
    async fn list_ip_pools(&self, _router: &Router) -> Result<Vec<DevicePool>> {
        Ok(Vec::new())
    }

    async fn list_pool_addresses(
        &self,
        _router: &Router,
        _pool_external_id: &str,
    ) -> Result<DeviceAddressBook> {
        Ok(DeviceAddressBook::default())
    }

    async fn list_profiles(&self, _router: &Router) -> Result<Vec<DeviceProfile>> {
        Ok(self.profiles.lock().unwrap().clone())
    }

    async fn list_users(&self, _router: &Router) -> Result<Vec<DeviceUser>> {
        Ok(Vec::new())
    }

    fn adapter_name(&self) -> &'static str {
        "snapshot"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Embedded fleetsync-core Example ===\n");

    // Custom components, all in-process
    let client = Arc::new(SnapshotDeviceClient::new());
    let repo = Arc::new(MemoryRepository::new());
    let cursors = Arc::new(MemoryCursorStore::new());

    repo.add_router(Router {
        id: RouterId::from("edge-1"),
        name: "edge-1".to_string(),
        connection: "10.0.0.1".to_string(),
        active: true,
    })
    .await;

    let config = SyncConfig {
        auto_create: fleetsync_core::config::AutoCreatePolicy {
            profiles: true,
            ..Default::default()
        },
        ..SyncConfig::default()
    };

    println!("1. Creating engine...");
    let (engine, mut event_rx) =
        ReconcileEngine::new(client.clone(), repo.clone(), cursors, config)?;

    // Optional: watch engine events
    let event_listener = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            println!("[Event] {event:?}");
        }
    });

    println!("2. First profile pass (device profile is new to the mirror)...");
    let report = engine.run_class(EntityClass::Profiles).await?;
    for result in &report.results {
        println!("   {:?} {:?}", result.outcome, result.external_id);
    }

    println!("3. Device-side rename; external id unchanged...");
    client.rename_profile("*2", "10M-Promo");
    let report = engine.run_class(EntityClass::Profiles).await?;
    for result in &report.results {
        println!(
            "   {:?} {:?} changed={:?}",
            result.outcome, result.external_id, result.changed_fields
        );
    }

    println!("4. Mirror still holds exactly {} profile row", repo.profile_count().await);

    drop(engine);
    let _ = tokio::time::timeout(
        tokio::time::Duration::from_millis(100),
        event_listener,
    )
    .await;

    println!("\n=== Embedding Successful ===");
    println!("Key Points:");
    println!("- Engine lifecycle is fully controlled by the application");
    println!("- Rows are matched by external id, tolerant of renames");
    println!("- All components are custom (not fleetsyncd defaults)");

    Ok(())
}
