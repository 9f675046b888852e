// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! Tests for the budget ledger.

use super::*;

fn ledger(ceiling: u64, margin: u64) -> Arc<BudgetLedger> {
    Arc::new(BudgetLedger::new(ceiling, margin))
}

#[test]
fn usable_budget_subtracts_margin() {
    let l = ledger(8000, 512);
    assert_eq!(l.usable_mb(), 7488);
    assert_eq!(l.free_mb(), 7488);
}

#[test]
fn reservation_counts_as_committed_until_settled() {
    let l = ledger(8000, 512);
    let id = ModelId::from("p/a");

    let r = l.try_reserve(&id, 3000).unwrap();
    assert_eq!(l.committed_mb(), 3000);
    assert_eq!(l.reserved_mb(), 3000);
    assert_eq!(l.commitment(&id), None);

    r.commit();
    assert_eq!(l.committed_mb(), 3000);
    assert_eq!(l.reserved_mb(), 0);
    assert_eq!(l.commitment(&id), Some(3000));
}

#[test]
fn dropped_reservation_is_released() {
    let l = ledger(8000, 512);
    {
        let _r = l.try_reserve(&ModelId::from("p/a"), 4000).unwrap();
        assert_eq!(l.free_mb(), 3488);
    }
    assert_eq!(l.committed_mb(), 0);
    assert_eq!(l.free_mb(), 7488);
}

#[test]
fn oversize_request_exceeds_ceiling() {
    let l = ledger(8000, 512);
    let err = l.try_reserve(&ModelId::from("p/huge"), 7489).unwrap_err();
    assert_eq!(err, BudgetError::ExceedsCeiling { requested_mb: 7489, usable_mb: 7488 });
}

#[test]
fn pending_claim_reports_conflict() {
    let l = ledger(8000, 512);
    let _first = l.try_reserve(&ModelId::from("p/a"), 5000).unwrap();

    // Would fit against standing commitments alone, but the pending claim wins.
    let err = l.try_reserve(&ModelId::from("p/b"), 4000).unwrap_err();
    assert!(matches!(err, BudgetError::Conflict { requested_mb: 4000, pending_mb: 5000, .. }));
}

#[test]
fn standing_commitments_report_insufficient() {
    let l = ledger(8000, 512);
    l.try_reserve(&ModelId::from("p/a"), 5000).unwrap().commit();

    let err = l.try_reserve(&ModelId::from("p/b"), 4000).unwrap_err();
    assert_eq!(err, BudgetError::Insufficient { requested_mb: 4000, free_mb: 2488 });
}

#[test]
fn release_commitment_frees_capacity() {
    let l = ledger(8000, 512);
    let id = ModelId::from("p/a");
    l.try_reserve(&id, 4500).unwrap().commit();

    assert_eq!(l.release_commitment(&id), 4500);
    assert_eq!(l.committed_mb(), 0);
    assert_eq!(l.release_commitment(&id), 0);
}

#[test]
fn adopt_replaces_rather_than_double_counts() {
    let l = ledger(8000, 512);
    let id = ModelId::from("p/external");

    assert!(l.adopt(&id, 2000));
    assert!(l.adopt(&id, 2500));
    assert_eq!(l.committed_mb(), 2500);
    assert_eq!(l.commitment(&id), Some(2500));
}

#[test]
fn adopt_reports_overcommit() {
    let l = ledger(4000, 0);
    l.try_reserve(&ModelId::from("p/a"), 3000).unwrap().commit();
    assert!(!l.adopt(&ModelId::from("p/b"), 2000));
    assert!(!l.is_within_budget());
}

#[test]
fn snapshot_tracks_peak_and_commitments() {
    let l = ledger(8000, 512);
    let a = ModelId::from("p/a");
    l.try_reserve(&a, 3000).unwrap().commit();
    let r = l.try_reserve(&ModelId::from("p/b"), 2000).unwrap();
    drop(r);

    let snap = l.snapshot();
    assert_eq!(snap.committed_mb, 3000);
    assert_eq!(snap.peak_committed_mb, 5000);
    assert_eq!(snap.commitments.get("p/a"), Some(&3000));
    assert!(snap.within_budget());
}

#[tokio::test]
async fn release_wakes_waiters() {
    let l = ledger(8000, 512);
    let id = ModelId::from("p/a");
    l.try_reserve(&id, 3000).unwrap().commit();

    let waiter = {
        let l = Arc::clone(&l);
        let epoch = l.release_epoch();
        tokio::spawn(async move { l.wait_for_release(epoch, Duration::from_secs(5)).await })
    };
    tokio::task::yield_now().await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    l.release_commitment(&id);
    assert!(waiter.await.unwrap());
}

#[tokio::test]
async fn waiter_stays_pending_until_release() {
    let l = ledger(8000, 512);
    let id = ModelId::from("p/a");
    l.try_reserve(&id, 1000).unwrap().commit();

    let mut wait = tokio_test::task::spawn(l.wait_for_release(l.release_epoch(), Duration::from_secs(60)));
    tokio_test::assert_pending!(wait.poll());

    // a release of nothing wakes no one
    assert_eq!(l.release_commitment(&ModelId::from("p/none")), 0);
    tokio_test::assert_pending!(wait.poll());

    l.release_commitment(&id);
    assert!(wait.is_woken());
    assert!(tokio_test::assert_ready!(wait.poll()));
}

#[tokio::test]
async fn wait_for_release_times_out() {
    let l = ledger(8000, 512);
    assert!(!l.wait_for_release(l.release_epoch(), Duration::from_millis(10)).await);
}

#[tokio::test]
async fn release_before_wait_is_not_missed() {
    let l = ledger(8000, 512);
    let id = ModelId::from("p/a");
    l.try_reserve(&id, 1000).unwrap().commit();

    // Epoch taken while checking capacity; the release lands before waiting.
    let epoch = l.release_epoch();
    l.release_commitment(&id);

    let started = tokio::time::Instant::now();
    assert!(l.wait_for_release(epoch, Duration::from_secs(60)).await);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn abandoned_reservation_advances_release_epoch() {
    let l = ledger(8000, 512);
    let epoch = l.release_epoch();
    drop(l.try_reserve(&ModelId::from("p/a"), 1000).unwrap());
    assert_eq!(l.release_epoch(), epoch + 1);

    l.try_reserve(&ModelId::from("p/b"), 1000).unwrap().commit();
    assert_eq!(l.release_epoch(), epoch + 1);
}

#[test]
fn concurrent_reservations_never_overcommit() {
    let l = ledger(10_000, 0);
    let handles: Vec<_> = (0..16)
        .map(|i| {
            let l = Arc::clone(&l);
            std::thread::spawn(move || {
                let id = ModelId::from(format!("p/m{}", i));
                if let Ok(r) = l.try_reserve(&id, 1500) {
                    assert!(l.committed_mb() <= l.usable_mb());
                    r.commit();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert!(l.committed_mb() <= 10_000);
    assert_eq!(l.committed_mb(), 6 * 1500);
}
