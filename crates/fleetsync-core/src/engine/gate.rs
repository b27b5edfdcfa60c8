//! Per-class scheduling gate
//!
//! Tracks the state machine of each entity class:
//!
//! ```text
//! Idle ──interval elapsed──▶ Due ──begin──▶ Running ──finish──▶ CoolingDown
//!   ▲                                                               │
//!   └────────────────────────── interval elapsed ───────────────────┘
//! ```
//!
//! Due-ness is computed from the persisted cursor; Running and
//! CoolingDown are process-local (a class completed in this process but
//! whose interval has not elapsed is cooling down, one we have never run
//! and whose interval has not elapsed is idle).

use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::Mutex;

use crate::model::{EntityClass, SyncCursors};

/// Observable scheduling state of one entity class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassState {
    Idle,
    Due,
    Running,
    CoolingDown,
}

/// Process-local gate over the persisted cursors
#[derive(Debug, Default)]
pub struct ClassGates {
    inner: Mutex<GateInner>,
}

#[derive(Debug, Default)]
struct GateInner {
    running: HashSet<EntityClass>,
    completed: HashSet<EntityClass>,
}

impl ClassGates {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the class's interval has elapsed since its cursor (a
    /// class with no cursor has never completed a pass and is always due)
    pub fn is_due(
        cursors: &SyncCursors,
        class: EntityClass,
        now: DateTime<Utc>,
        interval_secs: u64,
    ) -> bool {
        match cursors.get(class) {
            None => true,
            Some(last) => now.signed_duration_since(last) >= Duration::seconds(interval_secs as i64),
        }
    }

    /// Current state of one class
    pub fn state(
        &self,
        cursors: &SyncCursors,
        class: EntityClass,
        now: DateTime<Utc>,
        interval_secs: u64,
    ) -> ClassState {
        let inner = self.inner.lock().unwrap();
        if inner.running.contains(&class) {
            ClassState::Running
        } else if Self::is_due(cursors, class, now, interval_secs) {
            ClassState::Due
        } else if inner.completed.contains(&class) {
            ClassState::CoolingDown
        } else {
            ClassState::Idle
        }
    }

    /// Transition to Running. Returns false when the class is already
    /// running (overlapping passes of one class are never started).
    pub fn begin(&self, class: EntityClass) -> bool {
        self.inner.lock().unwrap().running.insert(class)
    }

    /// Transition out of Running, recording the completion
    pub fn finish(&self, class: EntityClass) {
        let mut inner = self.inner.lock().unwrap();
        inner.running.remove(&class);
        inner.completed.insert(class);
    }
}
