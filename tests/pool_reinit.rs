/// Credential Rotation Tests
///
/// `reinit` swaps target and credentials, rebuilds the idle store and leaves
/// in-flight borrows alone until they come back.

use sftpool::session::MemoryProvider;
use sftpool::telemetry::PoolEventKind;
use sftpool::{PoolConfig, PoolError, RemoteTarget, SessionPool};
use std::sync::Arc;
use std::time::Duration;

fn old_target() -> RemoteTarget {
    RemoteTarget::new("files.test", 22, "svc", "old-secret")
}

fn new_target() -> RemoteTarget {
    RemoteTarget::new("files.test", 22, "svc", "new-secret")
}

async fn pool_with(max_size: usize) -> (SessionPool, MemoryProvider) {
    let provider = MemoryProvider::new(old_target());
    let config = PoolConfig {
        max_size,
        idle_timeout: Duration::ZERO,
        borrow_timeout: Duration::from_millis(500),
        ..PoolConfig::new(old_target())
    };
    let pool = SessionPool::connect(config, Arc::new(provider.clone()))
        .await
        .unwrap();
    (pool, provider)
}

#[tokio::test]
async fn reinit_rebuilds_pool_under_new_credentials() {
    let (pool, provider) = pool_with(3).await;
    assert_eq!(pool.stats().generation, 1);

    provider.rotate_credentials(new_target()).await;
    pool.reinit(new_target()).await.unwrap();

    let stats = pool.stats();
    assert_eq!(stats.idle, 3);
    assert_eq!(stats.generation, 2);
    assert_eq!(stats.created_total, 6);
    assert_eq!(provider.closes(), 3, "all previously pooled sessions closed");
    assert_eq!(provider.live_sessions(), 3);
    assert_eq!(pool.config().target, new_target());

    // Every session handed out now works against the rotated endpoint.
    for _ in 0..3 {
        let mut lease = pool.borrow().await.unwrap();
        assert_eq!(lease.generation(), 2);
        lease.probe(".").await.unwrap();
        pool.release(lease).await;
    }
    assert_eq!(pool.stats().idle, 3);

    let reinits = pool.events().events_of(PoolEventKind::Reinit).await;
    assert_eq!(reinits.len(), 1);
}

#[tokio::test]
async fn borrowed_session_survives_reinit_until_returned() {
    let (pool, provider) = pool_with(2).await;
    let mut lease = pool.borrow().await.unwrap();

    pool.reinit(old_target()).await.unwrap();

    // Still usable by its holder: no forced cancellation.
    lease.probe(".").await.unwrap();
    assert_eq!(lease.generation(), 1);

    // Capacity is respected while the stale lease is out.
    let stats = pool.stats();
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.borrowed, 1);
    assert!(stats.occupied() <= stats.max_size);

    // Coming back it is recognised as stale and closed.
    let closes_before = provider.closes();
    pool.release(lease).await;
    assert_eq!(provider.closes(), closes_before + 1);

    let stats = pool.stats();
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.borrowed, 0);
}

#[tokio::test]
async fn stale_sessions_fail_validation_against_rotated_endpoint() {
    let (pool, provider) = pool_with(2).await;
    let lease = pool.borrow().await.unwrap();

    provider.rotate_credentials(new_target()).await;
    pool.release(lease).await;

    // The returned session is no longer accepted by the endpoint.
    assert_eq!(pool.stats().idle, 1);
}

#[tokio::test]
async fn reinit_with_rejected_credentials_reports_error() {
    let (pool, provider) = pool_with(2).await;

    let result = pool.reinit(new_target()).await;
    assert!(matches!(result, Err(PoolError::Auth(_))), "got {:?}", result);

    // Old sessions are gone, nothing new could be created.
    let stats = pool.stats();
    assert_eq!(stats.idle, 0);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.generation, 2);
    assert_eq!(provider.live_sessions(), 0);

    // Once the endpoint accepts the rotated credentials, borrows backfill.
    provider.rotate_credentials(new_target()).await;
    let lease = pool.borrow().await.unwrap();
    assert_eq!(lease.generation(), 2);
    pool.release(lease).await;
    assert_eq!(pool.stats().idle, 1);
}

#[tokio::test]
async fn concurrent_reinits_leave_a_consistent_pool() {
    let (pool, _provider) = pool_with(3).await;
    let pool = Arc::new(pool);

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let pool = Arc::clone(&pool);
        tasks.push(tokio::spawn(async move { pool.reinit(old_target()).await }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let stats = pool.stats();
    assert_eq!(stats.generation, 5);
    assert_eq!(stats.idle, 3);
    assert_eq!(stats.pending, 0);
}
