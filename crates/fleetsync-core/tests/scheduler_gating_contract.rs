//! Contract: interval gating and cursor discipline
//!
//! Scheduled passes are gated per class by interval and advance the
//! shared cursor; manual single-target syncs bypass the gate and never
//! touch the cursor, so they cannot mask fleet-wide drift.

mod common;

use common::*;
use fleetsync_core::model::{EntityClass, SyncOutcome};
use fleetsync_core::traits::{CursorStore, Repository};
use fleetsync_core::{ClassState, EngineEvent};

fn one_profile_state() -> DeviceState {
    DeviceState {
        profiles: vec![device_profile("*2", "10M", "10M/2M")],
        ..DeviceState::default()
    }
}

#[tokio::test]
async fn second_scheduled_run_is_gated_by_interval() {
    let r1 = router("r1");
    let h = harness(&[r1.clone()], auto_create_config()).await;
    h.client.set_state(&r1.id, one_profile_state());

    let first = h.engine.run_full_reconciliation().await.unwrap();
    assert_eq!(first.classes.len(), 4, "every class due on first run");
    assert!(first.skipped.is_empty());

    let second = h.engine.run_full_reconciliation().await.unwrap();
    assert!(second.classes.is_empty(), "nothing due immediately after");
    assert_eq!(second.skipped.len(), 4);
}

#[tokio::test]
async fn class_state_walks_due_running_cooling_down() {
    let r1 = router("r1");
    let h = harness(&[r1.clone()], auto_create_config()).await;
    h.client.set_state(&r1.id, one_profile_state());

    assert_eq!(
        h.engine.class_state(EntityClass::Profiles).await.unwrap(),
        ClassState::Due
    );

    h.engine.run_full_reconciliation().await.unwrap();

    assert_eq!(
        h.engine.class_state(EntityClass::Profiles).await.unwrap(),
        ClassState::CoolingDown
    );
}

#[tokio::test]
async fn manual_syncs_bypass_the_gate_and_leave_the_cursor_alone() {
    let r1 = router("r1");
    let h = harness(&[r1.clone()], auto_create_config()).await;
    h.client.set_state(&r1.id, one_profile_state());

    let results = h
        .engine
        .sync_one_router(&r1.id, EntityClass::Profiles)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].outcome, SyncOutcome::Created);

    // The manual sync worked but the shared cursor is untouched
    let cursors = h.cursors.load().await.unwrap();
    assert!(cursors.get(EntityClass::Profiles).is_none());

    // And the class is still due for the fleet pass
    assert_eq!(
        h.engine.class_state(EntityClass::Profiles).await.unwrap(),
        ClassState::Due
    );

    // Same discipline for the single-user entry point
    let user = h.repo.find_user(&r1.id, "*2").await.unwrap();
    assert!(user.is_none(), "profile sync creates no users");
}

#[tokio::test]
async fn cursors_advance_even_with_isolated_router_failures() {
    let routers = [router("r1"), router("r2")];
    let h = harness(&routers, auto_create_config()).await;
    h.client.set_state(&routers[0].id, one_profile_state());
    h.client.set_unreachable(&routers[1].id, true);

    let summary = h.engine.run_full_reconciliation().await.unwrap();
    let report = summary.class(EntityClass::Profiles).unwrap();
    assert_eq!(report.routers_failed, 1);
    assert!(report.cursor_advanced);

    let cursors = h.cursors.load().await.unwrap();
    assert!(cursors.get(EntityClass::Profiles).is_some());
}

#[tokio::test]
async fn scheduling_loop_runs_on_start_and_stops_cleanly() {
    let r1 = router("r1");
    let mut h = harness(&[r1.clone()], auto_create_config()).await;
    h.client.set_state(&r1.id, one_profile_state());

    let engine = h.engine;
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let handle =
        tokio::spawn(async move { engine.run_with_shutdown(Some(shutdown_rx)).await });

    // The first tick fires immediately; give the pass a moment
    tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;
    shutdown_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();

    assert_eq!(h.repo.profile_count().await, 1, "startup pass ran");

    let events = drain_events(&mut h.events);
    assert!(
        events
            .iter()
            .any(|e| matches!(e, EngineEvent::Started { .. })),
        "{events:?}"
    );
    assert!(
        events
            .iter()
            .any(|e| matches!(e, EngineEvent::Stopped { .. })),
        "{events:?}"
    );
}
