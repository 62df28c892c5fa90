//! Integration test: rebuild scan and shipment across a pool.
//!
//! A leader triggers the scan on every surviving target; each one scans its
//! objects and ships descriptors to the targets that must rebuild them.

use scour_integration_tests::{RebuildCluster, pool, rank};
use scour_placement::PlacementOracle;
use scour_types::events::{ScanCompleted, ScanStarted};

/// 6 targets, one fails: every affected shard reaches its spare.
#[tokio::test]
async fn test_single_failure_rebuilds_every_shard() {
    let mut c = RebuildCluster::new(6);
    c.populate(400);
    let mut completed: Vec<_> = (0..6)
        .map(|i| c.node(i).events.subscribe::<ScanCompleted>())
        .collect();

    c.kill_node(2).await;
    let request = c.request(0, &[2], 1);
    let reply = c.trigger(&request).await;
    assert!(reply.status.is_ok(), "trigger failed: {reply:?}");
    assert_eq!(reply.failed_ranks, None);

    c.wait_scans(1).await;
    let scanners = [0, 1, 3, 4, 5];
    assert_eq!(c.trackers(1).len(), scanners.len());

    let expected = c.expected(&scanners, &[2]);
    assert!(!expected.is_empty());
    let delivered = c.delivered();
    assert_eq!(delivered, expected);
    assert!(delivered.iter().all(|(target, _, _)| *target != rank(2)));

    for i in scanners {
        assert!(completed[i].try_recv().is_some(), "node {i} did not complete");
        assert_eq!(c.node(i).oracle.view_version(pool()), None);
    }
    assert!(completed[2].try_recv().is_none());
    for (i, tracker) in c.trackers(1) {
        assert_eq!(tracker.first_error(), None, "node {i} recorded an error");
    }
}

/// Two failed targets in one rebuild.
#[tokio::test]
async fn test_two_failures_in_one_rebuild() {
    let mut c = RebuildCluster::new(8);
    c.populate(500);
    c.kill_node(1).await;
    c.kill_node(6).await;

    let reply = c.trigger(&c.request(0, &[1, 6], 4)).await;
    assert!(reply.status.is_ok());
    c.wait_scans(4).await;

    let expected = c.expected(&[0, 2, 3, 4, 5, 7], &[1, 6]);
    assert_eq!(c.delivered(), expected);
    for (_, tracker) in c.trackers(4) {
        assert!(!tracker.is_scanning());
        assert_eq!(tracker.first_error(), None);
    }
}

/// Shipments never exceed the batch cap and always validate.
#[tokio::test]
async fn test_shipments_respect_batch_cap() {
    let mut c = RebuildCluster::new(5);
    c.populate(4000);
    c.kill_node(3).await;

    assert!(c.trigger(&c.request(0, &[3], 1)).await.status.is_ok());
    c.wait_scans(1).await;

    let mut largest = 0;
    for i in 0..c.len() {
        for request in c.node(i).sink.received() {
            request.validate().unwrap();
            assert!(request.len() <= 512);
            assert_ne!(request.sender_rank, rank(i), "node {i} shipped to itself");
            assert_eq!(request.rebuild_version, 1);
            largest = largest.max(request.len());
        }
    }
    assert_eq!(largest, 512, "expected at least one full batch");
    assert_eq!(c.delivered(), c.expected(&[0, 1, 2, 4], &[3]));
}

/// Re-sending the trigger never starts a second scan; a newer term moves
/// the master.
#[tokio::test]
async fn test_repeat_trigger_starts_one_scan() {
    let mut c = RebuildCluster::new(5);
    c.populate(100);
    let mut started: Vec<_> = (0..5)
        .map(|i| c.node(i).events.subscribe::<ScanStarted>())
        .collect();
    c.kill_node(4).await;

    let request = c.request(0, &[4], 2);
    assert!(c.trigger(&request).await.status.is_ok());
    assert!(c.trigger(&request).await.status.is_ok());

    let mut newer = request.clone();
    newer.leader_term = 2;
    newer.master_rank = rank(1);
    assert!(c.trigger(&newer).await.status.is_ok());
    c.wait_scans(2).await;

    for i in 0..4 {
        assert!(started[i].try_recv().is_some());
        assert!(started[i].try_recv().is_none(), "node {i} started twice");
    }
    for (_, tracker) in c.trackers(2) {
        assert_eq!(tracker.leader_term(), 2);
        assert_eq!(tracker.master_rank(), rank(1));
    }
    assert_eq!(c.delivered(), c.expected(&[0, 1, 2, 3], &[4]));
}
