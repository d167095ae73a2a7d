use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("No session available within {0:?}")]
    BorrowTimeout(Duration),

    #[error("Session pool is shut down")]
    Shutdown,

    #[error("Task failed: {0}")]
    TaskFailed(String),
}

impl PoolError {
    /// True for failures to manufacture a session (unreachable endpoint or
    /// rejected credentials).
    pub fn is_connect_failure(&self) -> bool {
        matches!(self, PoolError::Connect(_) | PoolError::Auth(_))
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_failure_classification() {
        assert!(PoolError::Connect("refused".into()).is_connect_failure());
        assert!(PoolError::Auth("bad password".into()).is_connect_failure());
        assert!(!PoolError::Shutdown.is_connect_failure());
        assert!(!PoolError::BorrowTimeout(Duration::from_secs(1)).is_connect_failure());
    }
}
