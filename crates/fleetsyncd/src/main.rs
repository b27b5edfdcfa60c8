// # fleetsyncd - Fleet Reconciliation Daemon
//
// Thin integration layer over fleetsync-core:
// 1. Read configuration from environment variables
// 2. Initialize tracing
// 3. Register adapters and stores
// 4. Start the reconciliation engine and wait for shutdown signals
//
// No reconciliation logic lives here; everything is in fleetsync-core.
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Device adapter
// - `FLEETSYNC_ADAPTER_TYPE`: adapter type (routeros)
// - `FLEETSYNC_ADAPTER_USERNAME`: API username
// - `FLEETSYNC_ADAPTER_PASSWORD`: API password
// - `FLEETSYNC_ADAPTER_TLS`: use https towards routers (default true)
// - `FLEETSYNC_ADAPTER_PORT`: REST port override (optional)
//
// ### Stores
// - `FLEETSYNC_REPOSITORY_TYPE`: repository type (memory, or a registered
//   custom type)
// - `FLEETSYNC_CURSOR_STORE_TYPE`: cursor store type (file, memory)
// - `FLEETSYNC_CURSOR_STORE_PATH`: path to the cursor file (for file)
//
// ### Scheduling
// - `FLEETSYNC_POOL_INTERVAL_SECS`, `FLEETSYNC_ADDRESS_INTERVAL_SECS`,
//   `FLEETSYNC_PROFILE_INTERVAL_SECS`, `FLEETSYNC_USER_INTERVAL_SECS`
// - `FLEETSYNC_POLL_INTERVAL_SECS`: due-ness re-evaluation period
// - `FLEETSYNC_ROUTER_CONCURRENCY`: routers synced concurrently per pass
// - `FLEETSYNC_AUTO_CREATE`: comma-separated classes to auto-create
//   (pools,profiles,users)
//
// ### Logging
// - `FLEETSYNC_LOG_LEVEL`: trace|debug|info|warn|error (default info)
//
// ## Example
//
// ```bash
// export FLEETSYNC_ADAPTER_TYPE=routeros
// export FLEETSYNC_ADAPTER_USERNAME=sync
// export FLEETSYNC_ADAPTER_PASSWORD=...
// export FLEETSYNC_CURSOR_STORE_TYPE=file
// export FLEETSYNC_CURSOR_STORE_PATH=/var/lib/fleetsync/cursors.json
// export FLEETSYNC_AUTO_CREATE=profiles
//
// fleetsyncd
// ```

use anyhow::Result;
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use fleetsync_core::config::{
    AdapterConfig, AutoCreatePolicy, CursorStoreConfig, FleetConfig, RepositoryConfig, SyncConfig,
};
use fleetsync_core::engine::EngineEvent;
use fleetsync_core::{ComponentRegistry, ReconcileEngine};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes following systemd conventions
#[derive(Debug, Clone, Copy)]
enum DaemonExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<DaemonExitCode> for ExitCode {
    fn from(code: DaemonExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration gathered from the environment
struct Config {
    adapter_type: String,
    adapter_username: String,
    adapter_password: String,
    adapter_tls: bool,
    adapter_port: Option<u16>,
    repository_type: String,
    cursor_store_type: String,
    cursor_store_path: Option<String>,
    sync: SyncConfig,
    log_level: String,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{key} has an invalid value: {raw:?}")),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        let mut sync = SyncConfig::default();
        if let Some(v) = env_parse("FLEETSYNC_POOL_INTERVAL_SECS")? {
            sync.pool_interval_secs = v;
        }
        if let Some(v) = env_parse("FLEETSYNC_ADDRESS_INTERVAL_SECS")? {
            sync.address_interval_secs = v;
        }
        if let Some(v) = env_parse("FLEETSYNC_PROFILE_INTERVAL_SECS")? {
            sync.profile_interval_secs = v;
        }
        if let Some(v) = env_parse("FLEETSYNC_USER_INTERVAL_SECS")? {
            sync.user_interval_secs = v;
        }
        if let Some(v) = env_parse("FLEETSYNC_POLL_INTERVAL_SECS")? {
            sync.poll_interval_secs = v;
        }
        if let Some(v) = env_parse("FLEETSYNC_ROUTER_CONCURRENCY")? {
            sync.router_concurrency = v;
        }
        sync.auto_create = parse_auto_create(
            &env::var("FLEETSYNC_AUTO_CREATE").unwrap_or_default(),
        )?;

        Ok(Self {
            adapter_type: env::var("FLEETSYNC_ADAPTER_TYPE")
                .unwrap_or_else(|_| "routeros".to_string()),
            adapter_username: env::var("FLEETSYNC_ADAPTER_USERNAME").unwrap_or_default(),
            adapter_password: env::var("FLEETSYNC_ADAPTER_PASSWORD").unwrap_or_default(),
            adapter_tls: env_parse("FLEETSYNC_ADAPTER_TLS")?.unwrap_or(true),
            adapter_port: env_parse("FLEETSYNC_ADAPTER_PORT")?,
            repository_type: env::var("FLEETSYNC_REPOSITORY_TYPE")
                .unwrap_or_else(|_| "memory".to_string()),
            cursor_store_type: env::var("FLEETSYNC_CURSOR_STORE_TYPE")
                .unwrap_or_else(|_| "file".to_string()),
            cursor_store_path: env::var("FLEETSYNC_CURSOR_STORE_PATH").ok(),
            sync,
            log_level: env::var("FLEETSYNC_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the configuration before any component is built
    fn validate(&self) -> Result<()> {
        if self.adapter_type == "routeros" {
            if self.adapter_username.is_empty() {
                anyhow::bail!(
                    "FLEETSYNC_ADAPTER_USERNAME is required. \
                    Set it via: export FLEETSYNC_ADAPTER_USERNAME=sync"
                );
            }
            if self.adapter_password.is_empty() {
                anyhow::bail!(
                    "FLEETSYNC_ADAPTER_PASSWORD is required. \
                    Set it via: export FLEETSYNC_ADAPTER_PASSWORD=..."
                );
            }
            let lowered = self.adapter_password.to_lowercase();
            if lowered.contains("your_password") || lowered.contains("replace_me") {
                anyhow::bail!(
                    "FLEETSYNC_ADAPTER_PASSWORD appears to be a placeholder. \
                    Use the actual API credentials."
                );
            }
        }

        if self.cursor_store_type == "file" && self.cursor_store_path.is_none() {
            anyhow::bail!(
                "FLEETSYNC_CURSOR_STORE_PATH is required for the file cursor store. \
                Set it via: export FLEETSYNC_CURSOR_STORE_PATH=/var/lib/fleetsync/cursors.json"
            );
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            anyhow::bail!(
                "FLEETSYNC_LOG_LEVEL must be one of {valid_levels:?}, got {:?}",
                self.log_level
            );
        }

        Ok(())
    }

    /// Assemble the typed engine configuration
    fn fleet_config(&self) -> FleetConfig {
        let adapter = match self.adapter_type.as_str() {
            "routeros" => AdapterConfig::Routeros {
                username: self.adapter_username.clone(),
                password: self.adapter_password.clone(),
                tls: self.adapter_tls,
                port: self.adapter_port,
            },
            other => AdapterConfig::Custom {
                factory: other.to_string(),
                config: serde_json::json!({}),
            },
        };

        let repository = match self.repository_type.as_str() {
            "memory" => RepositoryConfig::Memory,
            other => RepositoryConfig::Custom {
                factory: other.to_string(),
                config: serde_json::json!({}),
            },
        };

        let cursor_store = match self.cursor_store_type.as_str() {
            "memory" => CursorStoreConfig::Memory,
            "file" => CursorStoreConfig::File {
                path: self
                    .cursor_store_path
                    .clone()
                    .unwrap_or_else(|| "/var/lib/fleetsync/cursors.json".to_string()),
            },
            other => CursorStoreConfig::Custom {
                factory: other.to_string(),
                config: serde_json::json!({}),
            },
        };

        FleetConfig {
            adapter,
            repository,
            cursor_store,
            sync: self.sync.clone(),
        }
    }
}

/// Parse the comma-separated auto-create class list
fn parse_auto_create(raw: &str) -> Result<AutoCreatePolicy> {
    let mut policy = AutoCreatePolicy::default();
    for class in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match class {
            "pools" => policy.pools = true,
            "profiles" => policy.profiles = true,
            "users" => policy.users = true,
            other => anyhow::bail!(
                "FLEETSYNC_AUTO_CREATE accepts pools, profiles, users; got {other:?}"
            ),
        }
    }
    Ok(policy)
}

fn init_tracing(level: &str) -> Result<()> {
    let level: Level = level
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid log level: {level:?}"))?;
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("failed to set tracing subscriber: {e}"))?;
    Ok(())
}

/// Wire components and run the engine until a shutdown signal
async fn run(config: Config) -> Result<()> {
    let registry = ComponentRegistry::with_builtins();
    #[cfg(feature = "routeros")]
    fleetsync_device_routeros::register(&registry);

    let fleet_config = config.fleet_config();
    fleet_config.validate()?;

    let client: Arc<dyn fleetsync_core::DeviceClient> =
        Arc::from(registry.create_device_client(&fleet_config.adapter)?);
    let repo = registry.create_repository(&fleet_config.repository)?;
    let cursor_store: Arc<dyn fleetsync_core::CursorStore> =
        Arc::from(registry.create_cursor_store(&fleet_config.cursor_store)?);

    let (engine, mut events) =
        ReconcileEngine::new(client, repo, cursor_store, fleet_config.sync)?;

    // Surface engine events in the log stream
    let event_logger = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                EngineEvent::RouterFailed {
                    class,
                    router_id,
                    error,
                } => warn!(%class, router = %router_id, "router pass failed: {error}"),
                EngineEvent::ClassRunCompleted {
                    class,
                    cursor_advanced,
                    results,
                } => info!(%class, cursor_advanced, results, "class pass completed"),
                EngineEvent::OrphansReclaimed { freed } if freed > 0 => {
                    info!(freed, "orphan sweep reclaimed addresses");
                }
                other => tracing::debug!(event = ?other, "engine event"),
            }
        }
    });

    // Translate process signals into the engine's shutdown channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(());
    });

    info!("fleetsyncd started");
    let outcome = engine.run_with_shutdown(Some(shutdown_rx)).await;
    event_logger.abort();
    outcome?;
    info!("fleetsyncd stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("cannot install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
        _ = sigterm.recv() => info!("SIGTERM received"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return DaemonExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("configuration error: {e}");
        return DaemonExitCode::ConfigError.into();
    }

    if let Err(e) = init_tracing(&config.log_level) {
        eprintln!("startup error: {e}");
        return DaemonExitCode::ConfigError.into();
    }

    match run(config).await {
        Ok(()) => DaemonExitCode::CleanShutdown.into(),
        Err(e) => {
            error!("fleetsyncd failed: {e}");
            DaemonExitCode::RuntimeError.into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_create_list_parses() {
        let policy = parse_auto_create("profiles, users").unwrap();
        assert!(!policy.pools);
        assert!(policy.profiles);
        assert!(policy.users);

        assert!(parse_auto_create("").unwrap().pools == false);
        assert!(parse_auto_create("gateways").is_err());
    }
}
