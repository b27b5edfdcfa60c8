//! Configuration types for the reconciliation engine
//!
//! A typed configuration object, loaded once at startup with defaults
//! merged in code. Nothing re-reads config at call time.

use serde::{Deserialize, Serialize};

use crate::model::EntityClass;

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Device adapter configuration
    pub adapter: AdapterConfig,

    /// Persistence store configuration
    #[serde(default)]
    pub repository: RepositoryConfig,

    /// Cursor store configuration
    #[serde(default)]
    pub cursor_store: CursorStoreConfig,

    /// Scheduling and pass behavior
    #[serde(default)]
    pub sync: SyncConfig,
}

impl FleetConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.adapter.validate()?;
        self.sync.validate()?;
        Ok(())
    }
}

/// Device adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdapterConfig {
    /// RouterOS REST adapter
    Routeros {
        /// API username shared across the fleet
        username: String,
        /// API password shared across the fleet
        password: String,
        /// Use https towards the routers
        #[serde(default = "default_tls")]
        tls: bool,
        /// Override the REST port (defaults to the scheme's port)
        #[serde(default)]
        port: Option<u16>,
    },

    /// Custom adapter resolved through the registry
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl AdapterConfig {
    /// Validate the adapter configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            AdapterConfig::Routeros { username, .. } => {
                if username.is_empty() {
                    return Err(crate::Error::config("RouterOS username cannot be empty"));
                }
                Ok(())
            }
            AdapterConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config("Custom adapter factory cannot be empty"));
                }
                if config.is_null() {
                    return Err(crate::Error::config("Custom adapter config cannot be null"));
                }
                Ok(())
            }
        }
    }

    /// Get the adapter type name
    pub fn type_name(&self) -> &str {
        match self {
            AdapterConfig::Routeros { .. } => "routeros",
            AdapterConfig::Custom { factory, .. } => factory,
        }
    }
}

fn default_tls() -> bool {
    true
}

/// Persistence store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RepositoryConfig {
    /// In-memory mirror (not persistent; tests, demos, embedding)
    #[default]
    Memory,

    /// Custom repository resolved through the registry
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl RepositoryConfig {
    /// Get the repository type name
    pub fn type_name(&self) -> &str {
        match self {
            RepositoryConfig::Memory => "memory",
            RepositoryConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Cursor store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CursorStoreConfig {
    /// File-based cursor document
    File {
        /// Path to the cursor file
        path: String,
    },

    /// In-memory cursor document (not persistent)
    #[default]
    Memory,

    /// Custom store resolved through the registry
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl CursorStoreConfig {
    /// Get the cursor store type name
    pub fn type_name(&self) -> &str {
        match self {
            CursorStoreConfig::File { .. } => "file",
            CursorStoreConfig::Memory => "memory",
            CursorStoreConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Per-class auto-create policy
///
/// Creating a local pool/profile/user without its billing linkage would
/// desynchronize billing, so creation is explicit and opt-in per class.
/// Addresses carry no billing linkage and are always created.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AutoCreatePolicy {
    #[serde(default)]
    pub pools: bool,
    #[serde(default)]
    pub profiles: bool,
    #[serde(default)]
    pub users: bool,
}

/// Scheduling and pass behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Interval between pool fleet passes (seconds)
    #[serde(default = "default_pool_interval_secs")]
    pub pool_interval_secs: u64,

    /// Interval between address fleet passes (seconds)
    #[serde(default = "default_address_interval_secs")]
    pub address_interval_secs: u64,

    /// Interval between profile fleet passes (seconds)
    #[serde(default = "default_profile_interval_secs")]
    pub profile_interval_secs: u64,

    /// Interval between user fleet passes (seconds)
    #[serde(default = "default_user_interval_secs")]
    pub user_interval_secs: u64,

    /// Per-class auto-create policy
    #[serde(default)]
    pub auto_create: AutoCreatePolicy,

    /// Routers processed concurrently within one class pass
    #[serde(default = "default_router_concurrency")]
    pub router_concurrency: usize,

    /// Lifetime of the cached active-router listing (seconds)
    #[serde(default = "default_router_cache_ttl_secs")]
    pub router_cache_ttl_secs: u64,

    /// How often the daemon loop re-evaluates class due-ness (seconds)
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Capacity of the internal event channel
    ///
    /// When full, new engine events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl SyncConfig {
    /// Interval for one entity class
    pub fn interval_secs(&self, class: EntityClass) -> u64 {
        match class {
            EntityClass::Pools => self.pool_interval_secs,
            EntityClass::Addresses => self.address_interval_secs,
            EntityClass::Profiles => self.profile_interval_secs,
            EntityClass::Users => self.user_interval_secs,
        }
    }

    /// Whether auto-create is enabled for one entity class.
    ///
    /// Addresses are always created; they carry no billing linkage.
    pub fn auto_create(&self, class: EntityClass) -> bool {
        match class {
            EntityClass::Pools => self.auto_create.pools,
            EntityClass::Addresses => true,
            EntityClass::Profiles => self.auto_create.profiles,
            EntityClass::Users => self.auto_create.users,
        }
    }

    /// Validate the scheduling configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        for class in EntityClass::ALL {
            if self.interval_secs(class) == 0 {
                return Err(crate::Error::config(format!(
                    "sync interval for {class} must be > 0"
                )));
            }
        }
        if self.router_concurrency == 0 {
            return Err(crate::Error::config("router_concurrency must be > 0"));
        }
        if self.poll_interval_secs == 0 {
            return Err(crate::Error::config("poll_interval_secs must be > 0"));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            pool_interval_secs: default_pool_interval_secs(),
            address_interval_secs: default_address_interval_secs(),
            profile_interval_secs: default_profile_interval_secs(),
            user_interval_secs: default_user_interval_secs(),
            auto_create: AutoCreatePolicy::default(),
            router_concurrency: default_router_concurrency(),
            router_cache_ttl_secs: default_router_cache_ttl_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_pool_interval_secs() -> u64 {
    86_400 // 24h
}

fn default_address_interval_secs() -> u64 {
    86_400 // 24h
}

fn default_profile_interval_secs() -> u64 {
    43_200 // 12h
}

fn default_user_interval_secs() -> u64 {
    259_200 // 72h
}

fn default_router_concurrency() -> usize {
    4
}

fn default_router_cache_ttl_secs() -> u64 {
    300
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_event_channel_capacity() -> usize {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let sync = SyncConfig::default();
        assert!(sync.validate().is_ok());
        assert_eq!(sync.interval_secs(EntityClass::Users), 259_200);
        assert!(!sync.auto_create(EntityClass::Profiles));
        assert!(sync.auto_create(EntityClass::Addresses));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let sync = SyncConfig {
            profile_interval_secs: 0,
            ..SyncConfig::default()
        };
        assert!(sync.validate().is_err());
    }

    #[test]
    fn adapter_config_parses_from_json() {
        let cfg: FleetConfig = serde_json::from_str(
            r#"{
                "adapter": {"type": "routeros", "username": "sync", "password": "s3cret"},
                "cursor_store": {"type": "file", "path": "/var/lib/fleetsync/cursors.json"}
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.adapter.type_name(), "routeros");
        assert_eq!(cfg.cursor_store.type_name(), "file");
        assert_eq!(cfg.sync.router_concurrency, 4);
        cfg.validate().unwrap();
    }
}
