use super::pooled::{Lease, PooledSession};
use super::reaper::IdleReaper;
use super::stats::PoolStats;
#[cfg(feature = "metrics")]
use super::metrics::PoolMetrics;
use crate::config::Config;
use crate::session::{RemoteTarget, Session, SessionProvider};
use crate::telemetry::{EventLog, PoolEventKind};
use crate::utils::error::{PoolError, Result};
use futures::future::join_all;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Path probed to decide whether a session is still usable.
const PROBE_PATH: &str = ".";

/// Stand-in for deadlines that do not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + wait`, saturating to a far-future instant instead of overflowing.
pub(crate) fn deadline_after(wait: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(wait).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Runtime configuration for a session pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Endpoint and credentials for new sessions
    pub target: RemoteTarget,
    /// Capacity: pooled plus borrowed sessions never exceed this
    pub max_size: usize,
    /// Idle sessions older than this are evicted; zero disables the reaper
    pub idle_timeout: Duration,
    /// Default wait for a session in `borrow`
    pub borrow_timeout: Duration,
    /// Timeout for the provider's connect step
    pub connect_timeout: Duration,
    /// Timeout for the provider's authenticate step
    pub auth_timeout: Duration,
    /// Capacity of the lifecycle event log
    pub max_events: usize,
    /// Retention of the lifecycle event log (hours)
    pub event_retention_hours: u64,
}

impl PoolConfig {
    pub fn new(target: RemoteTarget) -> Self {
        Self {
            target,
            ..Default::default()
        }
    }

    pub fn from_settings(config: &Config) -> Self {
        let pool = &config.pool;
        Self {
            target: config.remote.target(),
            max_size: pool.pool_size,
            idle_timeout: Duration::from_secs(pool.idle_timeout_minutes.saturating_mul(60)),
            borrow_timeout: Duration::from_secs(pool.borrow_timeout_seconds),
            connect_timeout: Duration::from_secs(pool.connect_timeout_seconds),
            auth_timeout: Duration::from_secs(pool.auth_timeout_seconds),
            max_events: config.telemetry.max_events,
            event_retention_hours: config.telemetry.retention_hours,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            target: RemoteTarget::new("127.0.0.1", 22, "transfer", ""),
            max_size: 4,
            idle_timeout: Duration::from_secs(30 * 60),
            borrow_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            auth_timeout: Duration::from_secs(5),
            max_events: 256,
            event_retention_hours: 24,
        }
    }
}

/// Everything guarded by the store lock. Capacity accounting, the idle
/// entries and the current target/generation change together.
struct Store {
    idle: VecDeque<PooledSession>,
    borrowed: usize,
    pending: usize,
    target: Arc<RemoteTarget>,
    generation: u64,
    closed: bool,
}

impl Store {
    fn occupied(&self) -> usize {
        self.idle.len() + self.borrowed + self.pending
    }
}

enum Checkout {
    Idle(PooledSession),
    Reserved,
    Exhausted,
    Closed,
}

/// State shared by the pool handle, its leases and the idle reaper.
pub(crate) struct PoolShared {
    config: PoolConfig,
    provider: Arc<dyn SessionProvider>,
    store: Mutex<Store>,
    available: Notify,
    shutdown: CancellationToken,
    reinit_lock: tokio::sync::Mutex<()>,
    events: EventLog,
    created_total: AtomicU64,
    discarded_total: AtomicU64,
    evicted_total: AtomicU64,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    fn checkout(&self) -> Checkout {
        let mut store = self.lock();
        if store.closed {
            return Checkout::Closed;
        }

        if let Some(pooled) = store.idle.pop_front() {
            store.borrowed += 1;
            self.publish(&store);
            return Checkout::Idle(pooled);
        }

        if store.occupied() < self.config.max_size {
            store.pending += 1;
            self.publish(&store);
            return Checkout::Reserved;
        }

        Checkout::Exhausted
    }

    /// Slot of a lease that was dropped without being handed back.
    pub(crate) fn forget_borrowed(&self) {
        {
            let mut store = self.lock();
            store.borrowed = store.borrowed.saturating_sub(1);
            self.publish(&store);
        }
        self.discarded_total.fetch_add(1, Ordering::Relaxed);
        warn!("Lease dropped without release, session discarded");
        self.available.notify_one();
    }

    /// Turn a borrowed slot into a pending one, for an in-place replacement.
    fn borrowed_to_pending(&self) {
        let mut store = self.lock();
        store.borrowed = store.borrowed.saturating_sub(1);
        store.pending += 1;
        self.publish(&store);
    }

    fn release_pending(&self) {
        {
            let mut store = self.lock();
            store.pending = store.pending.saturating_sub(1);
            self.publish(&store);
        }
        self.available.notify_one();
    }

    fn current_generation(&self) -> u64 {
        self.lock().generation
    }

    /// Open and authenticate a session under the current target.
    async fn create_session(&self) -> Result<PooledSession> {
        let (target, generation) = {
            let store = self.lock();
            (Arc::clone(&store.target), store.generation)
        };
        let addr = target.addr();

        let mut session = match timeout(self.config.connect_timeout, self.provider.connect(&target))
            .await
        {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                return Err(self
                    .creation_failed(PoolError::Connect(format!("{}: {}", addr, e)))
                    .await)
            }
            Err(_) => {
                return Err(self
                    .creation_failed(PoolError::Connect(format!(
                        "connection to {} timed out after {:?}",
                        addr, self.config.connect_timeout
                    )))
                    .await)
            }
        };

        let auth = timeout(
            self.config.auth_timeout,
            self.provider.authenticate(session.as_mut(), &target),
        )
        .await;

        let failure = match auth {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(PoolError::Auth(format!(
                "{}@{}: {}",
                target.username, addr, e
            ))),
            Err(_) => Some(PoolError::Auth(format!(
                "authentication of {}@{} timed out after {:?}",
                target.username, addr, self.config.auth_timeout
            ))),
        };

        if let Some(err) = failure {
            session.close().await;
            return Err(self.creation_failed(err).await);
        }

        self.created_total.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        PoolMetrics::record_created();
        trace!(addr = %addr, generation, "Created new session");

        Ok(PooledSession::new(session, generation))
    }

    async fn creation_failed(&self, err: PoolError) -> PoolError {
        warn!(error = %err, "Failed to create session");
        #[cfg(feature = "metrics")]
        PoolMetrics::record_create_failure();
        self.events
            .record(PoolEventKind::CreateFailed, err.to_string(), None)
            .await;
        err
    }

    /// Health check: open, current generation and answering a probe.
    async fn is_valid(&self, session: &mut dyn Session, generation: u64) -> bool {
        if generation != self.current_generation() || !session.is_open() {
            return false;
        }

        match timeout(self.config.connect_timeout, session.probe(PROBE_PATH)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(error = %e, "Session failed probe");
                false
            }
            Err(_) => {
                debug!("Session probe timed out");
                false
            }
        }
    }

    async fn close_session(&self, mut session: Box<dyn Session>, reason: &'static str) {
        session.close().await;
        self.discarded_total.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        PoolMetrics::record_discarded(reason);
        debug!(reason, "Closed session");
    }

    /// Create sessions into slots already counted as pending.
    async fn fill_pending(self: &Arc<Self>, count: usize) -> Result<usize> {
        let attempts = (0..count).map(|_| {
            let shared = Arc::clone(self);
            async move {
                let reservation = Reservation::adopt(Arc::clone(&shared));
                let pooled = shared.create_session().await?;
                reservation.commit_idle(pooled).await;
                Ok::<(), PoolError>(())
            }
        });

        let mut created = 0;
        let mut first_error = None;
        for outcome in join_all(attempts).await {
            match outcome {
                Ok(()) => created += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(created),
        }
    }

    /// Evict idle sessions unused for longer than the idle timeout.
    pub(crate) async fn sweep_idle(&self) -> usize {
        let idle_timeout = self.config.idle_timeout;
        let now = Instant::now();

        let expired: Vec<PooledSession> = {
            let mut store = self.lock();
            let mut expired = Vec::new();
            let mut keep = VecDeque::with_capacity(store.idle.len());
            for pooled in store.idle.drain(..) {
                if pooled.is_expired(idle_timeout, now) {
                    expired.push(pooled);
                } else {
                    keep.push_back(pooled);
                }
            }
            store.idle = keep;
            self.publish(&store);
            expired
        };

        let evicted = expired.len();
        for pooled in expired {
            trace!(
                idle = ?now.saturating_duration_since(pooled.last_used),
                "Evicting idle session"
            );
            self.close_session(pooled.session, "idle").await;
        }

        if evicted > 0 {
            self.evicted_total
                .fetch_add(evicted as u64, Ordering::Relaxed);
            debug!(evicted, "Idle sweep evicted sessions");
            self.events
                .record(
                    PoolEventKind::Eviction,
                    format!("evicted {} idle sessions", evicted),
                    Some(serde_json::json!({ "evicted": evicted })),
                )
                .await;
            self.available.notify_one();
        }

        evicted
    }

    fn publish(&self, _store: &Store) {
        #[cfg(feature = "metrics")]
        PoolMetrics::record_occupancy(_store.idle.len(), _store.borrowed);
    }
}

/// A pending slot owned by an in-flight session creation. Dropping it
/// without committing gives the slot back.
struct Reservation {
    shared: Option<Arc<PoolShared>>,
}

impl Reservation {
    fn adopt(shared: Arc<PoolShared>) -> Self {
        Self {
            shared: Some(shared),
        }
    }

    /// Turn the pending slot into a borrowed one.
    fn commit_borrowed(mut self, pooled: PooledSession) -> std::result::Result<Lease, PooledSession> {
        let Some(shared) = self.shared.take() else {
            return Err(pooled);
        };

        {
            let mut store = shared.lock();
            store.pending = store.pending.saturating_sub(1);
            if store.closed {
                shared.publish(&store);
                drop(store);
                shared.available.notify_one();
                return Err(pooled);
            }
            store.borrowed += 1;
            shared.publish(&store);
        }

        Ok(Lease::new(pooled, shared))
    }

    /// Turn the pending slot into an idle entry.
    async fn commit_idle(mut self, pooled: PooledSession) {
        let Some(shared) = self.shared.take() else {
            return;
        };

        let rejected = {
            let mut store = shared.lock();
            store.pending = store.pending.saturating_sub(1);
            let rejected = if store.closed || store.generation != pooled.generation {
                Some(pooled)
            } else {
                store.idle.push_back(pooled);
                None
            };
            shared.publish(&store);
            rejected
        };
        shared.available.notify_one();

        if let Some(pooled) = rejected {
            shared.close_session(pooled.session, "stale").await;
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.release_pending();
        }
    }
}

/// Bounded pool of authenticated remote sessions
///
/// Sessions are created eagerly on construction, checked out with `borrow`,
/// validated and checked back in with `release`. Unused sessions are evicted
/// by a background [`IdleReaper`], and `reinit` rotates target and
/// credentials without touching sessions that are currently borrowed.
pub struct SessionPool {
    shared: Arc<PoolShared>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl SessionPool {
    /// Create a pool and warm it up with `max_size` sessions.
    pub async fn connect(config: PoolConfig, provider: Arc<dyn SessionProvider>) -> Result<Self> {
        if config.max_size == 0 {
            return Err(PoolError::Config("max_size must be at least 1".to_string()));
        }

        let max_size = config.max_size;
        let idle_timeout = config.idle_timeout;
        let addr = config.target.addr();

        let shared = Arc::new(PoolShared {
            events: EventLog::new(config.max_events, config.event_retention_hours),
            store: Mutex::new(Store {
                idle: VecDeque::with_capacity(max_size),
                borrowed: 0,
                pending: max_size,
                target: Arc::new(config.target.clone()),
                generation: 1,
                closed: false,
            }),
            available: Notify::new(),
            shutdown: CancellationToken::new(),
            reinit_lock: tokio::sync::Mutex::new(()),
            created_total: AtomicU64::new(0),
            discarded_total: AtomicU64::new(0),
            evicted_total: AtomicU64::new(0),
            provider,
            config,
        });

        let pool = Self {
            shared,
            reaper: Mutex::new(None),
        };

        if let Err(e) = pool.shared.fill_pending(max_size).await {
            pool.shutdown().await;
            return Err(e);
        }

        if !idle_timeout.is_zero() {
            let handle = IdleReaper::spawn(Arc::downgrade(&pool.shared), idle_timeout);
            *pool.reaper.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }

        info!(addr = %addr, max_size, "Session pool warmed up");
        pool.shared
            .events
            .record(
                PoolEventKind::Warmup,
                format!("created {} sessions for {}", max_size, addr),
                None,
            )
            .await;

        Ok(pool)
    }

    /// Borrow a session, waiting at most the configured borrow timeout.
    pub async fn borrow(&self) -> Result<Lease> {
        self.borrow_timeout(self.shared.config.borrow_timeout).await
    }

    /// Borrow a session, waiting at most `wait` for one to become available.
    ///
    /// A pooled session that fails validation is closed and replaced by a
    /// freshly created one. When the store is empty but capacity remains, a
    /// new session is created instead of waiting.
    ///
    /// `wait` only bounds the time spent waiting for a free slot. Creating a
    /// replacement afterwards is bounded separately by the connect and auth
    /// timeouts. `Duration::MAX` waits indefinitely.
    pub async fn borrow_timeout(&self, wait: Duration) -> Result<Lease> {
        let deadline = deadline_after(wait);
        #[cfg(feature = "metrics")]
        let started = Instant::now();

        loop {
            let notified = self.shared.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.shared.checkout() {
                Checkout::Closed => return Err(PoolError::Shutdown),
                Checkout::Idle(pooled) => {
                    #[cfg(feature = "metrics")]
                    PoolMetrics::record_borrow_wait(started.elapsed());
                    let lease = Lease::new(pooled, Arc::clone(&self.shared));
                    return self.validate_or_replace(lease).await;
                }
                Checkout::Reserved => {
                    #[cfg(feature = "metrics")]
                    PoolMetrics::record_borrow_wait(started.elapsed());
                    trace!("Store empty with spare capacity, creating session");
                    let reservation = Reservation::adopt(Arc::clone(&self.shared));
                    return self.create_into(reservation).await;
                }
                Checkout::Exhausted => {}
            }

            tokio::select! {
                _ = &mut notified => continue,
                _ = self.shared.shutdown.cancelled() => return Err(PoolError::Shutdown),
                _ = sleep_until(deadline) => {
                    #[cfg(feature = "metrics")]
                    PoolMetrics::record_borrow_timeout();
                    debug!(wait = ?wait, "Borrow timed out");
                    return Err(PoolError::BorrowTimeout(wait));
                }
            }
        }
    }

    async fn validate_or_replace(&self, mut lease: Lease) -> Result<Lease> {
        let generation = lease.generation();
        if self.shared.is_valid(&mut *lease, generation).await {
            return Ok(lease);
        }

        // Same slot: the discarded session gives it up before the replacement takes it.
        let (session, _, _) = lease.into_parts();
        self.shared.borrowed_to_pending();
        let reservation = Reservation::adopt(Arc::clone(&self.shared));
        warn!("Borrowed session failed validation, replacing it");
        self.shared.close_session(session, "invalid").await;

        self.create_into(reservation).await
    }

    async fn create_into(&self, reservation: Reservation) -> Result<Lease> {
        let pooled = self.shared.create_session().await?;
        match reservation.commit_borrowed(pooled) {
            Ok(lease) => Ok(lease),
            Err(pooled) => {
                self.shared.close_session(pooled.session, "shutdown").await;
                Err(PoolError::Shutdown)
            }
        }
    }

    /// Return a borrowed session. Valid sessions go back into the store with a
    /// refreshed timestamp; invalid or stale ones are closed and not replaced.
    pub async fn release(&self, mut lease: Lease) {
        let generation = lease.generation();
        let valid = !self.shared.is_shutdown()
            && self.shared.is_valid(&mut *lease, generation).await;

        let (session, generation, created_at) = lease.into_parts();
        let rejected = {
            let mut store = self.shared.lock();
            store.borrowed = store.borrowed.saturating_sub(1);
            let rejected = if valid && !store.closed && store.generation == generation {
                store
                    .idle
                    .push_back(PooledSession::returned(session, generation, created_at));
                None
            } else {
                Some(session)
            };
            self.shared.publish(&store);
            rejected
        };
        self.shared.available.notify_one();

        match rejected {
            None => trace!("Session returned to pool"),
            Some(session) => {
                warn!("Returned session failed validation, closing it");
                self.shared.close_session(session, "invalid").await;
            }
        }
    }

    /// Close a borrowed session instead of returning it.
    pub async fn discard(&self, lease: Lease) {
        let (session, _, _) = lease.into_parts();
        {
            let mut store = self.shared.lock();
            store.borrowed = store.borrowed.saturating_sub(1);
            self.shared.publish(&store);
        }
        self.shared.available.notify_one();
        self.shared.close_session(session, "discarded").await;
    }

    /// Borrow and immediately return a session, reporting whether it validated.
    pub async fn is_available(&self) -> bool {
        match self.borrow().await {
            Ok(mut lease) => {
                let generation = lease.generation();
                let ok = self.shared.is_valid(&mut *lease, generation).await;
                self.release(lease).await;
                ok
            }
            Err(e) => {
                debug!(error = %e, "Pool availability check failed");
                false
            }
        }
    }

    /// Rotate target and credentials.
    ///
    /// Every pooled session is closed and the store is refilled under the new
    /// target. Borrowed sessions keep working until they are released, at
    /// which point they are discarded as stale. Refill failures are returned;
    /// sessions that were created successfully stay in the pool.
    pub async fn reinit(&self, target: RemoteTarget) -> Result<()> {
        let _guard = self.shared.reinit_lock.lock().await;

        let addr = target.addr();
        let (drained, refill, generation) = {
            let mut store = self.shared.lock();
            if store.closed {
                return Err(PoolError::Shutdown);
            }
            store.target = Arc::new(target);
            store.generation += 1;
            let drained: Vec<PooledSession> = store.idle.drain(..).collect();
            let refill = self
                .shared
                .config
                .max_size
                .saturating_sub(store.borrowed + store.pending);
            store.pending += refill;
            self.shared.publish(&store);
            (drained, refill, store.generation)
        };

        info!(
            addr = %addr,
            generation,
            closed = drained.len(),
            refill,
            "Reinitializing session pool"
        );

        let closed = drained.len();
        join_all(
            drained
                .into_iter()
                .map(|pooled| self.shared.close_session(pooled.session, "reinit")),
        )
        .await;

        let result = self.shared.fill_pending(refill).await;

        self.shared
            .events
            .record(
                PoolEventKind::Reinit,
                format!("rotated to {} (generation {})", addr, generation),
                Some(serde_json::json!({
                    "generation": generation,
                    "closed": closed,
                    "refill": refill,
                    "ok": result.is_ok(),
                })),
            )
            .await;

        result.map(|_| ())
    }

    /// Run one idle sweep now. Returns the number of evicted sessions.
    pub async fn sweep_idle(&self) -> usize {
        self.shared.sweep_idle().await
    }

    /// Close every pooled session and stop the reaper. Pending and later
    /// borrows fail with [`PoolError::Shutdown`].
    pub async fn shutdown(&self) {
        if self.shared.shutdown.is_cancelled() {
            return;
        }
        self.shared.shutdown.cancel();

        let drained: Vec<PooledSession> = {
            let mut store = self.shared.lock();
            store.closed = true;
            let drained = store.idle.drain(..).collect();
            self.shared.publish(&store);
            drained
        };
        self.shared.available.notify_waiters();

        let reaper = self
            .reaper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = reaper {
            let _ = handle.await;
        }

        let closed = drained.len();
        join_all(
            drained
                .into_iter()
                .map(|pooled| self.shared.close_session(pooled.session, "shutdown")),
        )
        .await;

        self.shared.provider.shutdown().await;

        info!(closed, "Session pool shut down");
        self.shared
            .events
            .record(
                PoolEventKind::Shutdown,
                format!("closed {} pooled sessions", closed),
                None,
            )
            .await;
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    /// Current configuration, with the target as last set by `reinit`.
    pub fn config(&self) -> PoolConfig {
        let mut config = self.shared.config.clone();
        config.target = (*self.shared.lock().target).clone();
        config
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let store = self.shared.lock();
        PoolStats {
            idle: store.idle.len(),
            borrowed: store.borrowed,
            pending: store.pending,
            max_size: self.shared.config.max_size,
            generation: store.generation,
            created_total: self.shared.created_total.load(Ordering::Relaxed),
            discarded_total: self.shared.discarded_total.load(Ordering::Relaxed),
            evicted_total: self.shared.evicted_total.load(Ordering::Relaxed),
        }
    }

    /// Lifecycle event log (warm-up, reinit, eviction, failures, shutdown).
    pub fn events(&self) -> &EventLog {
        &self.shared.events
    }
}

impl Drop for SessionPool {
    fn drop(&mut self) {
        // Stops the reaper; pooled sessions are dropped with the shared state.
        self.shared.shutdown.cancel();
    }
}
