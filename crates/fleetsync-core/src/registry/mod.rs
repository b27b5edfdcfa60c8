//! Plugin-based component registry
//!
//! Device adapters, repositories and cursor stores are capability traits
//! implemented by named variants and selected through this name-keyed
//! registry — no hardcoded if-else chains and no runtime property
//! probing.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fleetsync_core::registry::ComponentRegistry;
//!
//! let registry = ComponentRegistry::new();
//! fleetsync_device_routeros::register(&registry);
//!
//! let client = registry.create_device_client(&config.adapter)?;
//! let repo = registry.create_repository(&config.repository)?;
//! let cursors = registry.create_cursor_store(&config.cursor_store)?;
//! ```
//!
//! Implementations register themselves during initialization; the core
//! ships the memory repository and the file/memory cursor stores
//! pre-registered via [`ComponentRegistry::with_builtins`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::config::{AdapterConfig, CursorStoreConfig, RepositoryConfig};
use crate::error::{Error, Result};
use crate::store::{DefaultCursorStoreFactory, MemoryRepositoryFactory};
use crate::traits::{
    CursorStore, CursorStoreFactory, DeviceClient, DeviceClientFactory, Repository,
    RepositoryFactory,
};

/// Name-keyed factory registry for the engine's pluggable seams
///
/// ## Thread Safety
///
/// Interior mutability with RwLock: concurrent reads, exclusive writes.
#[derive(Default)]
pub struct ComponentRegistry {
    adapters: RwLock<HashMap<String, Box<dyn DeviceClientFactory>>>,
    repositories: RwLock<HashMap<String, Box<dyn RepositoryFactory>>>,
    cursor_stores: RwLock<HashMap<String, Box<dyn CursorStoreFactory>>>,
}

impl ComponentRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in store factories registered
    /// ("memory" repository, "file" and "memory" cursor stores)
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_repository("memory", Box::new(MemoryRepositoryFactory));
        registry.register_cursor_store("file", Box::new(DefaultCursorStoreFactory));
        registry.register_cursor_store("memory", Box::new(DefaultCursorStoreFactory));
        registry
    }

    /// Register a device adapter factory under a type name
    pub fn register_adapter(&self, name: impl Into<String>, factory: Box<dyn DeviceClientFactory>) {
        self.adapters.write().unwrap().insert(name.into(), factory);
    }

    /// Register a repository factory under a type name
    pub fn register_repository(
        &self,
        name: impl Into<String>,
        factory: Box<dyn RepositoryFactory>,
    ) {
        self.repositories
            .write()
            .unwrap()
            .insert(name.into(), factory);
    }

    /// Register a cursor store factory under a type name
    pub fn register_cursor_store(
        &self,
        name: impl Into<String>,
        factory: Box<dyn CursorStoreFactory>,
    ) {
        self.cursor_stores
            .write()
            .unwrap()
            .insert(name.into(), factory);
    }

    /// Create a device client from configuration
    pub fn create_device_client(&self, config: &AdapterConfig) -> Result<Box<dyn DeviceClient>> {
        let adapters = self.adapters.read().unwrap();
        let factory = adapters
            .get(config.type_name())
            .ok_or_else(|| Error::config(format!("unknown adapter type: {}", config.type_name())))?;
        factory.create(config)
    }

    /// Create a repository from configuration
    pub fn create_repository(&self, config: &RepositoryConfig) -> Result<Arc<dyn Repository>> {
        let repositories = self.repositories.read().unwrap();
        let factory = repositories.get(config.type_name()).ok_or_else(|| {
            Error::config(format!("unknown repository type: {}", config.type_name()))
        })?;
        let config_json = match config {
            RepositoryConfig::Custom { config, .. } => config.clone(),
            RepositoryConfig::Memory => serde_json::Value::Null,
        };
        factory.create(&config_json)
    }

    /// Create a cursor store from configuration
    pub fn create_cursor_store(&self, config: &CursorStoreConfig) -> Result<Box<dyn CursorStore>> {
        let stores = self.cursor_stores.read().unwrap();
        let factory = stores.get(config.type_name()).ok_or_else(|| {
            Error::config(format!("unknown cursor store type: {}", config.type_name()))
        })?;
        factory.create(config)
    }

    /// List all registered adapter types
    pub fn list_adapters(&self) -> Vec<String> {
        self.adapters.read().unwrap().keys().cloned().collect()
    }

    /// Check if an adapter type is registered
    pub fn has_adapter(&self, name: &str) -> bool {
        self.adapters.read().unwrap().contains_key(name)
    }

    /// Check if a repository type is registered
    pub fn has_repository(&self, name: &str) -> bool {
        self.repositories.read().unwrap().contains_key(name)
    }

    /// Check if a cursor store type is registered
    pub fn has_cursor_store(&self, name: &str) -> bool {
        self.cursor_stores.read().unwrap().contains_key(name)
    }
}
