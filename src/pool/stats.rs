use serde::Serialize;

/// Point-in-time view of a session pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Sessions resting in the store
    pub idle: usize,
    /// Sessions currently held by borrowers
    pub borrowed: usize,
    /// Sessions being created into reserved slots
    pub pending: usize,
    /// Capacity
    pub max_size: usize,
    /// Config generation, bumped by every reinit
    pub generation: u64,
    pub created_total: u64,
    pub discarded_total: u64,
    pub evicted_total: u64,
}

impl PoolStats {
    /// Slots in use: idle + borrowed + pending. Never exceeds `max_size`.
    pub fn occupied(&self) -> usize {
        self.idle + self.borrowed + self.pending
    }

    /// Slots a borrow could still fill by creating a session.
    pub fn spare(&self) -> usize {
        self.max_size.saturating_sub(self.occupied())
    }
}
