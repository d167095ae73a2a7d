use super::resource::{deadline_after, PoolShared};
use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, info};

/// Background sweep that evicts sessions idle for longer than the idle timeout.
///
/// The sweep period equals the idle timeout. Borrowed sessions are never
/// seen by the reaper since they are not in the store; removal from the
/// store happens under the store lock, so a session goes either to the
/// reaper or to a borrower.
pub struct IdleReaper;

impl IdleReaper {
    pub(crate) fn spawn(pool: Weak<PoolShared>, idle_timeout: Duration) -> JoinHandle<()> {
        let Some(shutdown) = pool.upgrade().map(|shared| shared.shutdown_token().clone()) else {
            return tokio::spawn(async {});
        };

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(deadline_after(idle_timeout), idle_timeout);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(shared) = pool.upgrade() else {
                            break;
                        };
                        let evicted = shared.sweep_idle().await;
                        debug!(evicted, "Idle sweep finished");
                    }
                }
            }

            debug!("Idle reaper stopped");
        });

        info!(
            idle_timeout_secs = idle_timeout.as_secs(),
            "Idle reaper started"
        );

        handle
    }
}
