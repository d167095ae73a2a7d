/// Idle Reaper Tests
///
/// Idle sessions are evicted once they outlive the idle timeout; recently
/// used and borrowed sessions survive. Time is driven with a paused clock.

use sftpool::session::MemoryProvider;
use sftpool::telemetry::PoolEventKind;
use sftpool::{PoolConfig, RemoteTarget, SessionPool};
use std::sync::Arc;
use std::time::Duration;

const IDLE: Duration = Duration::from_secs(60);

fn target() -> RemoteTarget {
    RemoteTarget::new("files.test", 22, "svc", "secret")
}

async fn pool_with(max_size: usize, idle_timeout: Duration) -> (SessionPool, MemoryProvider) {
    let provider = MemoryProvider::new(target());
    let config = PoolConfig {
        max_size,
        idle_timeout,
        ..PoolConfig::new(target())
    };
    let pool = SessionPool::connect(config, Arc::new(provider.clone()))
        .await
        .unwrap();
    (pool, provider)
}

/// Let spawned tasks (the reaper) run at the current instant.
async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn sweep_evicts_untouched_and_keeps_recently_used() {
    let (pool, provider) = pool_with(2, IDLE).await;

    tokio::time::advance(Duration::from_secs(45)).await;
    let lease = pool.borrow().await.unwrap();
    pool.release(lease).await;

    // t = 75s: one session idle since t = 0, the other since t = 45s. The
    // reaper may already have swept at this instant; either way exactly the
    // stale one goes.
    tokio::time::advance(Duration::from_secs(30)).await;
    pool.sweep_idle().await;
    settle().await;

    let stats = pool.stats();
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.evicted_total, 1);
    assert_eq!(provider.live_sessions(), 1);
}

#[tokio::test(start_paused = true)]
async fn reaper_evicts_on_its_own_schedule() {
    let (pool, provider) = pool_with(3, IDLE).await;
    settle().await;

    tokio::time::advance(Duration::from_secs(121)).await;
    settle().await;

    let stats = pool.stats();
    assert_eq!(stats.idle, 0);
    assert_eq!(stats.evicted_total, 3);
    assert_eq!(provider.live_sessions(), 0);

    let evictions = pool.events().events_of(PoolEventKind::Eviction).await;
    assert!(!evictions.is_empty());
}

#[tokio::test(start_paused = true)]
async fn borrowed_sessions_are_never_reaped() {
    let (pool, provider) = pool_with(2, IDLE).await;
    let lease = pool.borrow().await.unwrap();
    settle().await;

    tokio::time::advance(Duration::from_secs(180)).await;
    settle().await;

    let stats = pool.stats();
    assert_eq!(stats.idle, 0);
    assert_eq!(stats.borrowed, 1);
    assert_eq!(provider.live_sessions(), 1);

    // Returned with a fresh timestamp, it survives the next sweep.
    pool.release(lease).await;
    assert_eq!(pool.sweep_idle().await, 0);
    assert_eq!(pool.stats().idle, 1);
}

#[tokio::test(start_paused = true)]
async fn pool_regrows_after_eviction() {
    let (pool, provider) = pool_with(2, IDLE).await;
    settle().await;

    tokio::time::advance(Duration::from_secs(121)).await;
    settle().await;
    assert_eq!(pool.stats().occupied(), 0);

    let lease = pool.borrow().await.unwrap();
    assert_eq!(provider.connects(), 3);
    pool.release(lease).await;
    assert_eq!(pool.stats().idle, 1);
}

#[tokio::test(start_paused = true)]
async fn zero_idle_timeout_disables_reaper() {
    let (pool, provider) = pool_with(2, Duration::ZERO).await;
    settle().await;

    tokio::time::advance(Duration::from_secs(24 * 3600)).await;
    settle().await;

    assert_eq!(pool.stats().idle, 2);
    assert_eq!(provider.live_sessions(), 2);
}

#[tokio::test(start_paused = true)]
async fn reaper_stops_on_shutdown() {
    let (pool, provider) = pool_with(1, IDLE).await;
    pool.shutdown().await;

    tokio::time::advance(Duration::from_secs(600)).await;
    settle().await;

    assert_eq!(pool.stats().evicted_total, 0);
    assert_eq!(provider.live_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn oversized_idle_timeout_keeps_sessions() {
    let (pool, provider) = pool_with(2, Duration::MAX).await;
    settle().await;

    tokio::time::advance(Duration::from_secs(365 * 24 * 3600)).await;
    settle().await;

    assert_eq!(pool.sweep_idle().await, 0);
    assert_eq!(pool.stats().idle, 2);
    assert_eq!(provider.live_sessions(), 2);
    pool.shutdown().await;
}
