// # fleetsync-core
//
// Core library for the router fleet reconciliation engine.
//
// ## Architecture Overview
//
// A fleet of network access routers is the authoritative source of
// subscriber connectivity state: IP pools, PPPoE profiles, PPPoE
// accounts. A relational mirror keeps that state queryable without ever
// touching a router synchronously; this library keeps the mirror
// consistent with device reality:
//
// - **DeviceClient**: trait for read-only per-router device queries
// - **Repository**: trait for the relational mirror (typed CRUD + upsert)
// - **CursorStore**: trait for the per-class last-run cursor document
// - **Identity matcher**: rename-tolerant hash join on external ids
// - **Entity synchronizers**: pools, addresses, profiles, users
// - **ReconcileEngine**: interval-gated scheduling, bounded per-router
//   fan-out, orphan reclaim, structured run summaries
// - **ComponentRegistry**: plugin-based registry for adapters and stores
//
// ## Design Principles
//
// 1. **Polling only**: synchronization is strictly poll-based; adapters
//    are stateless single-shot queries
// 2. **Device truth wins**: engine-owned fields are overwritten on drift;
//    locally-set billing links always survive
// 3. **Never delete**: records absent from the device are flagged for
//    human review, never removed
// 4. **Isolate failures**: per-record and per-router errors are recovered
//    locally; only store-level failures withhold a cursor
// 5. **Library-first**: the engine embeds without the daemon

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod model;
pub mod reclaim;
pub mod registry;
pub mod store;
pub mod sync;
pub mod traits;

// Re-export core types for convenience
pub use cache::{Clock, SystemClock, TtlCache};
pub use config::{AdapterConfig, CursorStoreConfig, FleetConfig, RepositoryConfig, SyncConfig};
pub use engine::{ClassState, EngineEvent, ReconcileEngine};
pub use error::{Error, Result};
pub use model::{
    ClassRunReport, EntityClass, ReclaimReport, RunSummary, SyncOutcome, SyncResult,
};
pub use registry::ComponentRegistry;
pub use store::{FileCursorStore, MemoryCursorStore, MemoryRepository};
pub use traits::{CursorStore, DeviceClient, Repository};
