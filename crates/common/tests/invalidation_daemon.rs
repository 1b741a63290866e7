//! Integration tests for the periodic invalidation daemon

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::common::{config, page, setup_test_env};

use ::common::export::Registry;
use ::common::graph::HandleKey;
use ::common::upcall::{
    ChangedAttrs, ChannelConsumer, InvalidationDaemon, ShutdownOutcome, Upcall, UpcallError,
    UpstreamConsumer,
};
use s3ns_store::testkit::ScriptedClient;

/// Consumer whose every call blocks forever.
#[derive(Debug)]
struct StuckConsumer;

#[async_trait]
impl UpstreamConsumer for StuckConsumer {
    async fn update(&self, _key: &HandleKey, _changed: &ChangedAttrs) -> Result<(), UpcallError> {
        std::future::pending().await
    }

    async fn invalidate(&self, _key: &HandleKey) -> Result<(), UpcallError> {
        std::future::pending().await
    }

    async fn invalidate_close(&self, _key: &HandleKey) -> Result<(), UpcallError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_zero_period_disables_daemon() {
    let env = setup_test_env();

    let handle = InvalidationDaemon::new(env.registry.clone(), Duration::ZERO).spawn();

    assert!(handle.is_none());
    assert!(env.upcalls.is_empty());
}

#[tokio::test]
async fn test_tick_sends_one_of_each_upcall() {
    let env = setup_test_env();
    env.client
        .set_listing("", page(&["a/", "b/"], &[("c", 1), ("d", 2)]));
    let root = env.export.root().unwrap();
    env.export.refresh(root).await.unwrap();

    let mut rng = StdRng::seed_from_u64(7);
    let report = InvalidationDaemon::tick(&env.registry, &mut rng).await;

    assert_eq!(report.exports, 1);
    assert_eq!(report.updates, 1);
    assert_eq!(report.invalidates, 1);
    assert_eq!(report.invalidate_closes, 1);
    assert_eq!(report.failures, 0);

    let upcalls: Vec<_> = env.upcalls.try_iter().collect();
    assert_eq!(upcalls.len(), 3);
    assert!(matches!(upcalls[0], Upcall::Update { .. }));
    assert!(matches!(upcalls[1], Upcall::Invalidate { .. }));
    assert!(matches!(upcalls[2], Upcall::InvalidateClose { .. }));
    for upcall in &upcalls {
        assert!(env.export.resolve_key(upcall.key().as_bytes()).is_ok());
    }
}

#[tokio::test]
async fn test_update_advances_change_counter() {
    let env = setup_test_env();
    let root = env.export.root().unwrap();
    let before = env.export.getattr(root).unwrap();

    // with only the root alive every sample lands on it
    let mut rng = StdRng::seed_from_u64(1);
    InvalidationDaemon::tick(&env.registry, &mut rng).await;

    let after = env.export.getattr(root).unwrap();
    assert_eq!(after.change, before.change + 1);
    assert!(after.ctime >= before.ctime);

    match env.upcalls.try_recv().unwrap() {
        Upcall::Update { key, changed } => {
            assert_eq!(key, env.export.handle_key(root).unwrap());
            assert_eq!(changed.change, after.change);
            assert_eq!(changed.ctime, after.ctime);
            assert_eq!(changed.chgtime, after.chgtime);
        }
        other => panic!("expected an update, got {}", other),
    }
}

#[tokio::test]
async fn test_failing_consumer_does_not_stop_the_pass() {
    let registry = Registry::new();

    let (gone, rx) = ChannelConsumer::unbounded();
    drop(rx);
    registry
        .create_export_with_client(
            config("broken"),
            Arc::new(ScriptedClient::new("broken")),
            Arc::new(gone),
        )
        .unwrap();

    let (healthy, upcalls) = ChannelConsumer::unbounded();
    registry
        .create_export_with_client(
            config("healthy"),
            Arc::new(ScriptedClient::new("healthy")),
            Arc::new(healthy),
        )
        .unwrap();

    let mut rng = StdRng::seed_from_u64(3);
    let report = InvalidationDaemon::tick(&registry, &mut rng).await;

    assert_eq!(report.exports, 2);
    assert_eq!(report.failures, 3);
    assert_eq!(report.upcalls(), 3);
    assert_eq!(upcalls.try_iter().count(), 3);
}

#[tokio::test]
async fn test_released_export_is_skipped() {
    let env = setup_test_env();
    env.export.release();

    let mut rng = StdRng::seed_from_u64(5);
    let report = InvalidationDaemon::tick(&env.registry, &mut rng).await;

    assert_eq!(report.exports, 1);
    assert_eq!(report.upcalls(), 0);
    assert!(env.upcalls.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_daemon_runs_each_period_and_stops() {
    let env = setup_test_env();
    let handle = InvalidationDaemon::new(env.registry.clone(), Duration::from_secs(10))
        .spawn()
        .unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(env.upcalls.is_empty());

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(env.upcalls.try_iter().count(), 3);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(env.upcalls.try_iter().count(), 3);

    assert_eq!(
        handle.shutdown(Duration::from_secs(1)).await,
        ShutdownOutcome::Stopped
    );
}

#[tokio::test(start_paused = true)]
async fn test_stuck_daemon_is_cancelled_after_grace() {
    let registry = Arc::new(Registry::new());
    registry
        .create_export_with_client(
            config("stuck"),
            Arc::new(ScriptedClient::new("stuck")),
            Arc::new(StuckConsumer),
        )
        .unwrap();

    let handle = InvalidationDaemon::new(registry.clone(), Duration::from_secs(1))
        .spawn()
        .unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!handle.is_finished());

    let outcome = handle.shutdown(Duration::from_secs(30)).await;

    assert_eq!(outcome, ShutdownOutcome::Cancelled);
}
