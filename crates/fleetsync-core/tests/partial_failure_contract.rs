//! Contract: partial-failure isolation
//!
//! A transport failure is scoped to its router, a malformed record to
//! itself; neither blocks the class cursor. A persistence failure is
//! isolated per record inside the pass but withholds the cursor so the
//! class stays due.

mod common;

use common::*;
use fleetsync_core::model::{EntityClass, ErrorClass, SyncOutcome};
use fleetsync_core::traits::CursorStore;

#[tokio::test]
async fn unreachable_router_does_not_block_the_fleet() {
    let routers = [router("r1"), router("r2"), router("r3")];
    let h = harness(&routers, auto_create_config()).await;

    for r in &routers {
        h.client.set_state(
            &r.id,
            DeviceState {
                profiles: vec![device_profile("*2", "10M", "10M/2M")],
                ..DeviceState::default()
            },
        );
    }
    h.client.set_unreachable(&routers[1].id, true);

    let report = h.engine.run_class(EntityClass::Profiles).await.unwrap();

    assert_eq!(report.routers_total, 3);
    assert_eq!(report.routers_failed, 1);

    let created: Vec<_> = report
        .results
        .iter()
        .filter(|r| r.outcome == SyncOutcome::Created)
        .collect();
    assert_eq!(created.len(), 2, "both reachable routers synced");

    let errors: Vec<_> = report
        .results
        .iter()
        .filter(|r| r.outcome == SyncOutcome::Error(ErrorClass::Transport))
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].router_id, routers[1].id);
    assert!(errors[0].external_id.is_none(), "router-scoped failure");

    // Transport errors never withhold the cursor
    assert!(report.cursor_advanced);
}

#[tokio::test]
async fn malformed_record_is_isolated_to_itself() {
    let r1 = router("r1");
    let h = harness(&[r1.clone()], auto_create_config()).await;

    h.client.set_state(
        &r1.id,
        DeviceState {
            pools: vec![
                device_pool("*1", "pppoe-active", "10.0.0.2-10.0.0.254"),
                device_pool("*2", "broken", "not-a-range"),
            ],
            ..DeviceState::default()
        },
    );

    let report = h.engine.run_class(EntityClass::Pools).await.unwrap();
    assert_eq!(report.results.len(), 2);
    assert_eq!(report.count(&SyncOutcome::Created), 1);
    assert_eq!(
        report.count(&SyncOutcome::Error(ErrorClass::Validation)),
        1
    );

    // Only the good pool landed; validation does not withhold the cursor
    assert_eq!(h.repo.pool_count().await, 1);
    assert!(report.cursor_advanced);
}

#[tokio::test]
async fn persistence_failure_withholds_the_cursor() {
    let r1 = router("r1");
    let h = harness(&[r1.clone()], auto_create_config()).await;

    h.client.set_state(
        &r1.id,
        DeviceState {
            profiles: vec![device_profile("*2", "10M", "10M/2M")],
            ..DeviceState::default()
        },
    );

    h.flaky.set_fail_writes(true);
    let report = h.engine.run_class(EntityClass::Profiles).await.unwrap();

    assert!(report.has_persistence_error());
    assert!(!report.cursor_advanced, "cursor withheld on store failure");
    assert!(report.error.is_some());

    let cursors = h.cursors.load().await.unwrap();
    assert!(
        cursors.get(EntityClass::Profiles).is_none(),
        "class stays due for the next invocation"
    );

    // The store recovers; the retry converges and advances the cursor
    h.flaky.set_fail_writes(false);
    let report = h.engine.run_class(EntityClass::Profiles).await.unwrap();
    assert_eq!(report.count(&SyncOutcome::Created), 1);
    assert!(report.cursor_advanced);
    assert!(h.cursors.load().await.unwrap().get(EntityClass::Profiles).is_some());
}

#[tokio::test]
async fn record_failure_does_not_stop_the_rest_of_the_router() {
    let r1 = router("r1");
    let h = harness(&[r1.clone()], auto_create_config()).await;

    // One existing row that will fail to update, one new record that
    // would be created — writes fail across the board, but the pass
    // still reports both records rather than stopping at the first.
    h.client.set_state(
        &r1.id,
        DeviceState {
            profiles: vec![device_profile("*2", "10M", "10M/2M")],
            ..DeviceState::default()
        },
    );
    h.engine.run_class(EntityClass::Profiles).await.unwrap();

    h.client.set_state(
        &r1.id,
        DeviceState {
            profiles: vec![
                device_profile("*2", "10M-Promo", "10M/2M"),
                device_profile("*5", "50M", "50M/10M"),
            ],
            ..DeviceState::default()
        },
    );
    h.flaky.set_fail_writes(true);

    let report = h.engine.run_class(EntityClass::Profiles).await.unwrap();
    assert_eq!(report.results.len(), 2, "per-record isolation continues the pass");
    assert_eq!(
        report.count(&SyncOutcome::Error(ErrorClass::Persistence)),
        2
    );
    assert!(!report.cursor_advanced);
}
