use super::resource::PoolShared;
use crate::session::Session;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// A session resting in the pool, with bookkeeping.
pub(crate) struct PooledSession {
    pub(crate) session: Box<dyn Session>,
    pub(crate) generation: u64,
    pub(crate) created_at: Instant,
    pub(crate) last_used: Instant,
}

impl PooledSession {
    pub(crate) fn new(session: Box<dyn Session>, generation: u64) -> Self {
        let now = Instant::now();
        Self {
            session,
            generation,
            created_at: now,
            last_used: now,
        }
    }

    /// Re-wrap a returned session, keeping its creation time.
    pub(crate) fn returned(session: Box<dyn Session>, generation: u64, created_at: Instant) -> Self {
        Self {
            session,
            generation,
            created_at,
            last_used: Instant::now(),
        }
    }

    pub(crate) fn is_expired(&self, idle_timeout: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_used) > idle_timeout
    }
}

/// Exclusive, temporary ownership of a pooled session.
///
/// Hand it back with [`SessionPool::release`](super::SessionPool::release) or
/// [`SessionPool::discard`](super::SessionPool::discard). A lease that is simply
/// dropped frees its pool slot, and the session is dropped without a graceful close.
pub struct Lease {
    session: Option<Box<dyn Session>>,
    generation: u64,
    created_at: Instant,
    borrowed_at: Instant,
    shared: Arc<PoolShared>,
}

impl Lease {
    pub(crate) fn new(pooled: PooledSession, shared: Arc<PoolShared>) -> Self {
        Self {
            session: Some(pooled.session),
            generation: pooled.generation,
            created_at: pooled.created_at,
            borrowed_at: Instant::now(),
            shared,
        }
    }

    /// Config generation the session was created under.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// How long this lease has been held.
    pub fn held_for(&self) -> Duration {
        self.borrowed_at.elapsed()
    }

    /// Give up the lease without returning the slot; the caller takes over
    /// the slot accounting.
    pub(crate) fn into_parts(mut self) -> (Box<dyn Session>, u64, Instant) {
        let session = self
            .session
            .take()
            .expect("lease holds its session until consumed");
        (session, self.generation, self.created_at)
    }
}

impl Deref for Lease {
    type Target = dyn Session;

    fn deref(&self) -> &Self::Target {
        self.session
            .as_deref()
            .expect("lease holds its session until consumed")
    }
}

impl DerefMut for Lease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session
            .as_deref_mut()
            .expect("lease holds its session until consumed")
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.session.take().is_some() {
            self.shared.forget_borrowed();
        }
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("generation", &self.generation)
            .field("held_for", &self.held_for())
            .finish()
    }
}
