//! Built-in store implementations

pub mod file;
pub mod memory;

pub use file::{DefaultCursorStoreFactory, FileCursorStore};
pub use memory::{MemoryCursorStore, MemoryRepository, MemoryRepositoryFactory};
