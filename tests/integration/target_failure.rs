//! Integration test: targets that fail to start, become unreachable, or
//! are aborted during a rebuild.

use std::time::Duration;

use scour_integration_tests::{RebuildCluster, pool, rank};
use scour_net::ReplyStatus;
use scour_rebuild::FailPoint;
use scour_types::events::{ScanAborted, ScanCompleted, ShipmentAbandoned};

/// A target that cannot start scanning is named in the aggregated reply;
/// the others scan anyway.
#[tokio::test]
async fn test_start_failure_is_reported() {
    let mut c = RebuildCluster::new(6);
    c.populate(200);
    c.node(3).faults.arm(FailPoint::TargetStartFail);
    c.kill_node(1).await;

    let reply = c.trigger(&c.request(0, &[1], 1)).await;
    assert!(matches!(reply.status, ReplyStatus::Failed { code: -22, .. }));
    assert_eq!(reply.failed_ranks, Some(vec![rank(3)]));

    c.wait_scans(1).await;
    assert!(c.node(3).registry.tracker(pool(), 1).is_none());
    assert_eq!(c.trackers(1).len(), 4);
    assert_eq!(c.delivered(), c.expected(&[0, 2, 4, 5], &[1]));
}

/// An unreachable target is reported, and shipments to it are abandoned
/// once the pool map marks it down.
#[tokio::test]
async fn test_unreachable_target_is_reported_and_abandoned() {
    let mut c = RebuildCluster::new(6);
    c.populate(300);
    let scanners = [0, 1, 3, 4];
    let mut abandoned: Vec<_> = scanners
        .iter()
        .map(|&i| c.node(i).events.subscribe::<ShipmentAbandoned>())
        .collect();
    let mut completed: Vec<_> = scanners
        .iter()
        .map(|&i| c.node(i).events.subscribe::<ScanCompleted>())
        .collect();

    c.kill_node(2).await;
    c.partition(5).await;
    let expected = c.expected(&scanners, &[2]);
    assert!(expected.iter().any(|(target, _, _)| *target == rank(5)));

    let reply = c.trigger(&c.request(0, &[2], 1)).await;
    assert!(matches!(reply.status, ReplyStatus::Failed { code: -5, .. }));
    assert_eq!(reply.failed_ranks, Some(vec![rank(5)]));

    // Shippers keep retrying rank 5 until the map says it is gone.
    tokio::time::sleep(Duration::from_millis(200)).await;
    c.mark_down(5);
    c.wait_scans(1).await;

    let reachable: std::collections::BTreeSet<_> = expected
        .iter()
        .filter(|(target, _, _)| *target != rank(5))
        .copied()
        .collect();
    assert_eq!(c.delivered(), reachable);

    let mut dropped = 0;
    for rx in &mut abandoned {
        while let Some(event) = rx.try_recv() {
            assert_eq!(event.target, rank(5));
            dropped += event.dropped;
        }
    }
    assert!(dropped > 0);
    for rx in &mut completed {
        assert!(rx.try_recv().is_some(), "abandonment is not a scan failure");
    }
}

/// Aborting the rebuild stops every scan and ships nothing.
#[tokio::test]
async fn test_abort_stops_every_scan() {
    let mut c = RebuildCluster::new(5);
    c.populate(200);
    let mut aborted: Vec<_> = (0..5)
        .map(|i| c.node(i).events.subscribe::<ScanAborted>())
        .collect();
    for i in 0..c.len() {
        c.node(i).faults.arm(FailPoint::ScanHang);
    }
    c.kill_node(0).await;

    assert!(c.trigger(&c.request(1, &[0], 3)).await.status.is_ok());
    tokio::time::sleep(Duration::from_millis(20)).await;
    for i in 1..c.len() {
        assert!(c.node(i).registry.abort(pool(), 3));
    }
    c.wait_scans(3).await;

    assert!(c.delivered().is_empty());
    for (i, tracker) in c.trackers(3) {
        assert_eq!(tracker.first_error().as_deref(), Some("rebuild aborted"));
        assert!(aborted[i].try_recv().is_some());
    }
}

/// A failed rank missing from the pool map fails every scan after it
/// started; the trigger itself succeeds.
#[tokio::test]
async fn test_failed_rank_missing_from_map() {
    let mut c = RebuildCluster::new(4);
    c.populate(50);

    let mut request = c.request(0, &[], 1);
    request.failed_targets = vec![rank(9)];
    let reply = c.trigger(&request).await;
    assert!(reply.status.is_ok());

    c.wait_scans(1).await;
    assert_eq!(c.trackers(1).len(), 4);
    for (_, tracker) in c.trackers(1) {
        assert!(
            tracker
                .first_error()
                .is_some_and(|e| e.contains("not in the pool map"))
        );
    }
    assert!(c.delivered().is_empty());
}
