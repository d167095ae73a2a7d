// sftpool - pool of authenticated remote file-transfer sessions

pub mod config;
pub mod executor;
pub mod pool;
pub mod session;
pub mod telemetry;
pub mod utils;

// Re-export commonly used types
pub use executor::{TaskExecutor, TaskHandle};
pub use pool::{Lease, PoolConfig, PoolStats, SessionPool};
pub use session::{LocalSink, RemoteTarget, Session, SessionProvider};
pub use utils::error::{PoolError, Result};
