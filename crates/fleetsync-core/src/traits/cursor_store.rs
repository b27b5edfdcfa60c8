// # Cursor Store Trait
//
// Defines the interface for persisting the sync cursor document.
//
// ## Purpose
//
// The cursor document holds one timestamp per entity class: the last
// successful fleet-pass completion. The scheduler reads it at run start
// and writes it back only when a class pass completes without a
// store-level failure, so an interrupted pass stays due and retries on
// the next invocation.
//
// An unreadable store is a config-level fatal error; the run aborts
// before any device call is made.
//
// ## Implementations
//
// - File-based JSON with atomic writes: `store::FileCursorStore`
// - In-memory: `store::MemoryCursorStore` (tests, embedding)

use async_trait::async_trait;

use crate::model::SyncCursors;

/// Load/store of the single per-class cursor document
///
/// Implementations must be thread-safe and usable across async tasks.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Load the cursor document.
    ///
    /// A store with no document yet returns the empty default (every class
    /// due); an unreadable or corrupted store returns a cursor-store error.
    async fn load(&self) -> Result<SyncCursors, crate::Error>;

    /// Persist the cursor document
    async fn store(&self, cursors: &SyncCursors) -> Result<(), crate::Error>;
}

/// Helper trait for constructing cursor stores from configuration
pub trait CursorStoreFactory: Send + Sync {
    /// Create a CursorStore instance from configuration
    fn create(
        &self,
        config: &crate::config::CursorStoreConfig,
    ) -> Result<Box<dyn CursorStore>, crate::Error>;
}
