//! Contract: address three-bucket classification
//!
//! The device reports only `used` and `available`; the mirror derives the
//! third state. Given used=[A,B], available=[C] and a pre-existing row D
//! in neither bucket, one pass must leave A and B assigned, C available
//! and D blocked — and never delete anything.

mod common;

use common::*;
use fleetsync_core::model::{AddressStatus, DeviceAddressBook, PoolKind, SubscriberId, UserId};
use fleetsync_core::traits::Repository;
use fleetsync_core::traits::repository::NewIpPool;
use std::collections::HashMap;

const A: &str = "10.0.0.11";
const B: &str = "10.0.0.12";
const C: &str = "10.0.0.13";
const D: &str = "10.0.0.14";

async fn seed_pool(h: &Harness, router: &fleetsync_core::model::Router) -> fleetsync_core::model::IpPool {
    h.repo
        .insert_pool(NewIpPool {
            router_id: router.id.clone(),
            external_id: "*1".to_string(),
            name: "pppoe-active".to_string(),
            ranges: "10.0.0.2-10.0.0.254".to_string(),
            kind: PoolKind::Active,
            last_synced_at: None,
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn three_bucket_classification() {
    let r1 = router("r1");
    let h = harness(&[r1.clone()], auto_create_config()).await;
    let pool = seed_pool(&h, &r1).await;

    // Pre-existing row D, reported by the device in neither bucket
    h.repo
        .upsert_address(&pool.id, ip(D), AddressStatus::Available, false)
        .await
        .unwrap();

    let mut addresses = HashMap::new();
    addresses.insert(
        "*1".to_string(),
        DeviceAddressBook {
            used: vec![ip(A), ip(B)],
            available: vec![ip(C)],
        },
    );
    h.client.set_state(
        &r1.id,
        DeviceState {
            addresses,
            ..DeviceState::default()
        },
    );

    let result = h.engine.sync_one_pool(&pool.id).await.unwrap();
    assert_eq!(result.outcome, fleetsync_core::SyncOutcome::Updated);

    let status = |addr: &str| {
        let pool_id = pool.id.clone();
        let repo = h.repo.clone();
        let addr = ip(addr);
        async move { repo.find_address(&pool_id, addr).await.unwrap().status }
    };

    assert_eq!(status(A).await, AddressStatus::Assigned);
    assert_eq!(status(B).await, AddressStatus::Assigned);
    assert_eq!(status(C).await, AddressStatus::Available);
    assert_eq!(status(D).await, AddressStatus::Blocked);
    assert_eq!(h.repo.address_count().await, 4);
}

#[tokio::test]
async fn previously_assigned_address_is_freed_with_owner_cleared() {
    let r1 = router("r1");
    let h = harness(&[r1.clone()], auto_create_config()).await;
    let pool = seed_pool(&h, &r1).await;

    // An assigned row with a live owner pair
    let mut row = h
        .repo
        .upsert_address(&pool.id, ip(A), AddressStatus::Available, false)
        .await
        .unwrap()
        .record;
    row.assign(SubscriberId::from("sub-4"), UserId::from("user-4"));
    h.repo.update_address(&row).await.unwrap();

    // The subscriber disconnected: the device now reports A available
    let mut addresses = HashMap::new();
    addresses.insert(
        "*1".to_string(),
        DeviceAddressBook {
            used: vec![],
            available: vec![ip(A)],
        },
    );
    h.client.set_state(
        &r1.id,
        DeviceState {
            addresses,
            ..DeviceState::default()
        },
    );

    let result = h.engine.sync_one_pool(&pool.id).await.unwrap();
    assert!(
        result
            .message
            .as_deref()
            .is_some_and(|m| m.contains("freed=1")),
        "freed count surfaces in the result: {result:?}"
    );

    let row = h.repo.find_address(&pool.id, ip(A)).await.unwrap();
    assert_eq!(row.status, AddressStatus::Available);
    assert!(row.owner().is_none(), "owner links cleared on free");
}

#[tokio::test]
async fn pool_rows_survive_arbitrary_device_shrinkage() {
    let r1 = router("r1");
    let h = harness(&[r1.clone()], auto_create_config()).await;
    let pool = seed_pool(&h, &r1).await;

    let mut addresses = HashMap::new();
    addresses.insert(
        "*1".to_string(),
        DeviceAddressBook {
            used: vec![ip(A), ip(B)],
            available: vec![ip(C)],
        },
    );
    h.client.set_state(
        &r1.id,
        DeviceState {
            addresses: addresses.clone(),
            ..DeviceState::default()
        },
    );
    h.engine.sync_one_pool(&pool.id).await.unwrap();
    assert_eq!(h.repo.address_count().await, 3);

    // The pool shrinks run after run; rows only ever change status
    for shrunk in [vec![ip(A)], vec![], vec![]] {
        let mut addresses = HashMap::new();
        addresses.insert(
            "*1".to_string(),
            DeviceAddressBook {
                used: shrunk,
                available: vec![],
            },
        );
        h.client.set_state(
            &r1.id,
            DeviceState {
                addresses,
                ..DeviceState::default()
            },
        );
        h.engine.sync_one_pool(&pool.id).await.unwrap();
        assert_eq!(h.repo.address_count().await, 3, "no row is ever deleted");
    }

    let row = h.repo.find_address(&pool.id, ip(A)).await.unwrap();
    assert_eq!(row.status, AddressStatus::Blocked);

    // A second identical pass is a no-op
    let result = h.engine.sync_one_pool(&pool.id).await.unwrap();
    assert_eq!(result.outcome, fleetsync_core::SyncOutcome::Verified);
}
