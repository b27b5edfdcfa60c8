//! Core reconciliation engine
//!
//! The engine drives fleet-wide reconciliation passes:
//!
//! ```text
//! ┌──────────────┐   cursors    ┌──────────────────┐
//! │ CursorStore  │◀────────────▶│ ReconcileEngine  │
//! └──────────────┘              └──────────────────┘
//!                                  │ per due class
//!                  ┌───────────────┼────────────────┐
//!                  ▼               ▼                ▼
//!          ┌──────────────┐ ┌──────────────┐ ┌─────────────┐
//!          │ DeviceClient │ │ Synchronizer │ │ Repository  │
//!          │ (listings)   │ │ (diff/apply) │ │ (mirror)    │
//!          └──────────────┘ └──────────────┘ └─────────────┘
//! ```
//!
//! One scheduled invocation reads the cursor document, runs every due
//! entity class across the active routers on a bounded worker pool,
//! advances each class cursor on clean completion, and finishes with the
//! orphan sweep when a user pass ran. Per-router and per-record failures
//! are isolated and reported in the run summary; store-level failures
//! withhold the cursor so the class stays due and retries next
//! invocation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cache::{Clock, SystemClock, TtlCache};
use crate::config::SyncConfig;
use crate::model::{
    ClassRunReport, EntityClass, PoolId, ReclaimReport, Router, RouterId, RunSummary,
    SyncCursors, SyncResult, UserId,
};
use crate::reclaim::OrphanReclaimer;
use crate::sync::{
    AddressSynchronizer, PoolSynchronizer, ProfileSynchronizer, RouterSynchronizer,
    UserSynchronizer,
};
use crate::traits::{CursorStore, DeviceClient, Repository};
use crate::{Error, Result};

mod gate;

pub use gate::{ClassGates, ClassState};

/// Events emitted by the engine for external monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Engine loop started
    Started { poll_interval_secs: u64 },

    /// A class pass began across the fleet
    ClassRunStarted { class: EntityClass, routers: usize },

    /// One router finished its pass for a class
    RouterSynced {
        class: EntityClass,
        router_id: RouterId,
        results: usize,
    },

    /// One router failed its pass; the class run continued
    RouterFailed {
        class: EntityClass,
        router_id: RouterId,
        error: String,
    },

    /// A class pass finished
    ClassRunCompleted {
        class: EntityClass,
        cursor_advanced: bool,
        results: usize,
    },

    /// The orphan sweep ran
    OrphansReclaimed { freed: usize },

    /// Engine loop stopped
    Stopped { reason: String },
}

/// Core reconciliation engine
///
/// ## Lifecycle
///
/// 1. Create with [`ReconcileEngine::new()`]
/// 2. Either drive it yourself ([`run_full_reconciliation`] and the
///    manual sync entry points), or start the scheduling loop with
///    [`run()`] and let it gate passes by interval
/// 3. The loop runs until a shutdown signal; cancellation is honored
///    between router iterations, never mid-call, and a cancelled pass
///    does not advance its cursor
///
/// [`run_full_reconciliation`]: ReconcileEngine::run_full_reconciliation
/// [`run()`]: ReconcileEngine::run
pub struct ReconcileEngine {
    repo: Arc<dyn Repository>,
    cursor_store: Arc<dyn CursorStore>,
    config: SyncConfig,
    clock: Arc<dyn Clock>,

    /// Active-router listing shared across the class passes of one run
    router_cache: TtlCache<(), Vec<Router>>,

    pools: Arc<PoolSynchronizer>,
    addresses: Arc<AddressSynchronizer>,
    profiles: Arc<ProfileSynchronizer>,
    users: Arc<UserSynchronizer>,
    reclaimer: OrphanReclaimer,

    gates: ClassGates,
    cancelled: AtomicBool,
    event_tx: mpsc::Sender<EngineEvent>,
}

impl ReconcileEngine {
    /// Create a new engine with the wall clock.
    ///
    /// Returns a tuple of (engine, event_receiver) where event_receiver
    /// yields engine events.
    pub fn new(
        client: Arc<dyn DeviceClient>,
        repo: Arc<dyn Repository>,
        cursor_store: Arc<dyn CursorStore>,
        config: SyncConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        Self::with_clock(client, repo, cursor_store, config, Arc::new(SystemClock))
    }

    /// Create a new engine with an injected clock (tests drive time)
    pub fn with_clock(
        client: Arc<dyn DeviceClient>,
        repo: Arc<dyn Repository>,
        cursor_store: Arc<dyn CursorStore>,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.event_channel_capacity);

        let engine = Self {
            router_cache: TtlCache::new(config.router_cache_ttl_secs, clock.clone()),
            pools: Arc::new(PoolSynchronizer::new(
                client.clone(),
                repo.clone(),
                clock.clone(),
                config.auto_create.pools,
            )),
            addresses: Arc::new(AddressSynchronizer::new(client.clone(), repo.clone())),
            profiles: Arc::new(ProfileSynchronizer::new(
                client.clone(),
                repo.clone(),
                clock.clone(),
                config.auto_create.profiles,
            )),
            users: Arc::new(UserSynchronizer::new(
                client.clone(),
                repo.clone(),
                clock.clone(),
                config.auto_create.users,
            )),
            reclaimer: OrphanReclaimer::new(repo.clone()),
            repo,
            cursor_store,
            config,
            clock,
            gates: ClassGates::new(),
            cancelled: AtomicBool::new(false),
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    /// The synchronizer for one entity class
    fn synchronizer_for(&self, class: EntityClass) -> Arc<dyn RouterSynchronizer> {
        match class {
            EntityClass::Pools => self.pools.clone(),
            EntityClass::Addresses => self.addresses.clone(),
            EntityClass::Profiles => self.profiles.clone(),
            EntityClass::Users => self.users.clone(),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Scheduling state of one class, for observability
    pub async fn class_state(&self, class: EntityClass) -> Result<ClassState> {
        let cursors = self.cursor_store.load().await?;
        Ok(self.gates.state(
            &cursors,
            class,
            self.clock.now(),
            self.config.interval_secs(class),
        ))
    }

    /// Active routers, cached across the class passes of one run
    async fn active_routers(&self) -> Result<Vec<Router>> {
        if let Some(routers) = self.router_cache.get(&()) {
            return Ok(routers);
        }
        let routers = self.repo.list_active_routers().await?;
        self.router_cache.insert((), routers.clone());
        Ok(routers)
    }

    /// Run every due entity class across the fleet.
    ///
    /// Reads the cursor document once at run start; an unreadable cursor
    /// store aborts here, before any device call. Classes whose interval
    /// has not elapsed are skipped and listed in the summary. When the
    /// user pass completes cleanly the orphan sweep runs as its dependent
    /// follow-up step.
    ///
    /// Per-record and per-router failures never fail this method; they
    /// are reported in the summary.
    pub async fn run_full_reconciliation(&self) -> Result<RunSummary> {
        let mut cursors = self.cursor_store.load().await?;
        let now = self.clock.now();
        let mut summary = RunSummary::new(now);
        let mut users_ran_clean = false;

        for class in EntityClass::ALL {
            if self.is_cancelled() {
                debug!("run cancelled; remaining classes skipped");
                summary.skipped.push(class);
                continue;
            }
            if !ClassGates::is_due(&cursors, class, now, self.config.interval_secs(class)) {
                debug!(%class, "interval not elapsed, skipping");
                summary.skipped.push(class);
                continue;
            }

            let report = self.run_class_pass(class, &mut cursors).await;
            if class == EntityClass::Users && report.cursor_advanced {
                users_ran_clean = true;
            }
            summary.classes.push(report);
        }

        // Strictly after the user pass, never concurrently with it
        if users_ran_clean && !self.is_cancelled() {
            match self.reclaimer.reclaim().await {
                Ok(report) => {
                    self.emit_event(EngineEvent::OrphansReclaimed {
                        freed: report.freed,
                    });
                    summary.reclaim = Some(report);
                }
                Err(e) => warn!("orphan sweep failed: {e}"),
            }
        }

        summary.finished_at = self.clock.now();
        Ok(summary)
    }

    /// Run one class across the fleet regardless of its interval gate.
    ///
    /// Advances the class cursor on clean completion, exactly like a
    /// scheduled pass.
    pub async fn run_class(&self, class: EntityClass) -> Result<ClassRunReport> {
        let mut cursors = self.cursor_store.load().await?;
        Ok(self.run_class_pass(class, &mut cursors).await)
    }

    /// One gated class pass: fan out over the routers, collect results,
    /// advance the cursor unless a store-level failure or cancellation
    /// intervened.
    async fn run_class_pass(
        &self,
        class: EntityClass,
        cursors: &mut SyncCursors,
    ) -> ClassRunReport {
        let mut report = ClassRunReport::new(class);

        if !self.gates.begin(class) {
            warn!(%class, "pass already running, refusing overlap");
            report.error = Some("class pass already running".to_string());
            return report;
        }

        let routers = match self.active_routers().await {
            Ok(routers) => routers,
            Err(e) => {
                error!(%class, "cannot list active routers: {e}");
                report.error = Some(e.to_string());
                self.gates.finish(class);
                return report;
            }
        };

        info!(%class, routers = routers.len(), "class pass started");
        self.emit_event(EngineEvent::ClassRunStarted {
            class,
            routers: routers.len(),
        });

        report.routers_total = routers.len();
        let (results, failed) = self.run_router_pass(class, &routers).await;
        report.routers_failed = failed;
        report.results = results;

        if self.is_cancelled() {
            info!(%class, "pass cancelled; cursor withheld");
            report.error = Some("pass cancelled".to_string());
        } else if report.has_persistence_error() {
            error!(%class, "persistence failure during pass; cursor withheld");
            report.error = Some("persistence failure during pass".to_string());
        } else {
            // Isolated per-record/per-router errors do not block the
            // cursor; only store-level failures do.
            let mut candidate = cursors.clone();
            candidate.set(class, self.clock.now());
            match self.cursor_store.store(&candidate).await {
                Ok(()) => {
                    *cursors = candidate;
                    report.cursor_advanced = true;
                }
                Err(e) => {
                    error!(%class, "cursor write failed; class stays due: {e}");
                    report.error = Some(e.to_string());
                }
            }
        }

        info!(
            %class,
            results = report.results.len(),
            failed_routers = report.routers_failed,
            cursor_advanced = report.cursor_advanced,
            "class pass finished"
        );
        self.emit_event(EngineEvent::ClassRunCompleted {
            class,
            cursor_advanced: report.cursor_advanced,
            results: report.results.len(),
        });
        self.gates.finish(class);
        report
    }

    /// Fan one class out over the routers on a bounded worker pool.
    ///
    /// Routers are mutually independent; concurrent workers write
    /// disjoint (router, external id) keys. Cancellation is checked
    /// between router iterations only.
    async fn run_router_pass(
        &self,
        class: EntityClass,
        routers: &[Router],
    ) -> (Vec<SyncResult>, usize) {
        let semaphore = Arc::new(Semaphore::new(self.config.router_concurrency));
        let mut tasks = JoinSet::new();

        for router in routers {
            if self.is_cancelled() {
                break;
            }
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore never closed");
            let synchronizer = self.synchronizer_for(class);
            let router = router.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = synchronizer.sync_router(&router).await;
                (router, outcome)
            });
        }

        let mut results = Vec::new();
        let mut failed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((router, Ok(router_results))) => {
                    debug!(%class, router = %router.id, results = router_results.len(), "router synced");
                    self.emit_event(EngineEvent::RouterSynced {
                        class,
                        router_id: router.id.clone(),
                        results: router_results.len(),
                    });
                    results.extend(router_results);
                }
                Ok((router, Err(e))) => {
                    warn!(%class, router = %router.id, "router pass failed: {e}");
                    failed += 1;
                    self.emit_event(EngineEvent::RouterFailed {
                        class,
                        router_id: router.id.clone(),
                        error: e.to_string(),
                    });
                    results.push(SyncResult::error(class, &router.id, None, &e));
                }
                Err(join_err) => {
                    error!(%class, "router task aborted: {join_err}");
                    failed += 1;
                }
            }
        }

        (results, failed)
    }

    // -----------------------------------------------------------------
    // Manual entry points — bypass the interval gate, never touch the
    // shared cursor, so they cannot mask fleet-wide drift.
    // -----------------------------------------------------------------

    /// Reconcile one router for one class, immediately
    pub async fn sync_one_router(
        &self,
        router_id: &RouterId,
        class: EntityClass,
    ) -> Result<Vec<SyncResult>> {
        let router = self
            .repo
            .get_router(router_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("router {router_id}")))?;
        if !router.active {
            warn!(router = %router_id, "manual sync of an inactive router");
        }

        match self.synchronizer_for(class).sync_router(&router).await {
            Ok(results) => Ok(results),
            Err(e @ Error::Transport { .. }) => {
                Ok(vec![SyncResult::error(class, &router.id, None, &e)])
            }
            Err(e) => Err(e),
        }
    }

    /// Reconcile one pool's address book, immediately
    pub async fn sync_one_pool(&self, pool_id: &PoolId) -> Result<SyncResult> {
        let pool = self
            .repo
            .get_pool(pool_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("pool {pool_id}")))?;
        let router = self
            .repo
            .get_router(&pool.router_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("router {}", pool.router_id)))?;

        match self.addresses.sync_pool(&router, &pool).await {
            Ok(report) => Ok(self.addresses.report_to_result(&router, report)),
            Err(e @ Error::Transport { .. }) => Ok(SyncResult::error(
                EntityClass::Addresses,
                &router.id,
                Some(&pool.external_id),
                &e,
            )),
            Err(e) => Err(e),
        }
    }

    /// Reconcile one PPPoE user against its router, immediately
    pub async fn sync_one_user(&self, user_id: &UserId) -> Result<SyncResult> {
        let user = self
            .repo
            .get_user(user_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("user {user_id}")))?;
        let router = self
            .repo
            .get_router(&user.router_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("router {}", user.router_id)))?;

        match self.users.sync_user(&router, &user).await {
            Ok(result) => Ok(result),
            Err(e @ Error::Transport { .. }) => Ok(SyncResult::error(
                EntityClass::Users,
                &router.id,
                Some(&user.external_id),
                &e,
            )),
            Err(e) => Err(e),
        }
    }

    /// Run the orphan sweep, immediately
    pub async fn reclaim_orphans(&self) -> Result<ReclaimReport> {
        let report = self.reclaimer.reclaim().await?;
        self.emit_event(EngineEvent::OrphansReclaimed {
            freed: report.freed,
        });
        Ok(report)
    }

    // -----------------------------------------------------------------
    // Scheduling loop
    // -----------------------------------------------------------------

    /// Run the scheduling loop until SIGINT/SIGTERM.
    ///
    /// Every poll interval the engine re-evaluates class due-ness and
    /// runs whatever is due.
    pub async fn run(&self) -> Result<()> {
        self.run_internal(None).await
    }

    /// Test-only variant of [`run()`](ReconcileEngine::run) with a
    /// controlled shutdown signal.
    pub async fn run_with_shutdown(
        &self,
        shutdown_rx: Option<tokio::sync::oneshot::Receiver<()>>,
    ) -> Result<()> {
        self.run_internal(shutdown_rx).await
    }

    async fn run_internal(
        &self,
        shutdown_rx: Option<tokio::sync::oneshot::Receiver<()>>,
    ) -> Result<()> {
        self.emit_event(EngineEvent::Started {
            poll_interval_secs: self.config.poll_interval_secs,
        });

        let mut shutdown: Pin<Box<dyn Future<Output = ()> + Send + '_>> = match shutdown_rx {
            Some(rx) => Box::pin(async move {
                let _ = rx.await;
            }),
            None => Box::pin(async {
                let _ = tokio::signal::ctrl_c().await;
            }),
        };

        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
            self.config.poll_interval_secs,
        ));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown signal received");
                    self.cancelled.store(true, Ordering::SeqCst);
                    break;
                }

                _ = ticker.tick() => {
                    let run = self.run_full_reconciliation();
                    tokio::pin!(run);
                    tokio::select! {
                        outcome = &mut run => {
                            match outcome {
                                Ok(summary) => debug!(
                                    classes = summary.classes.len(),
                                    skipped = summary.skipped.len(),
                                    "scheduled run finished"
                                ),
                                Err(e) => error!("scheduled run failed: {e}"),
                            }
                        }
                        _ = &mut shutdown => {
                            info!("shutdown signal received, winding down in-flight pass");
                            self.cancelled.store(true, Ordering::SeqCst);
                            // The pass stops between router iterations and
                            // withholds its cursors.
                            if let Err(e) = (&mut run).await {
                                error!("in-flight run failed during shutdown: {e}");
                            }
                        }
                    }
                    if self.is_cancelled() {
                        break;
                    }
                }
            }
        }

        self.emit_event(EngineEvent::Stopped {
            reason: "shutdown signal".to_string(),
        });
        Ok(())
    }

    /// Emit an engine event
    fn emit_event(&self, event: EngineEvent) {
        // Dropping beats unbounded growth when the consumer lags
        if self.event_tx.try_send(event).is_err() {
            warn!("event channel full, dropping event; consider raising event_channel_capacity");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_events_are_cloneable() {
        let event = EngineEvent::ClassRunStarted {
            class: EntityClass::Pools,
            routers: 3,
        };
        assert_eq!(event.clone(), event);
    }
}
