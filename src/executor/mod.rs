pub mod handle;
pub mod tasks;

pub use handle::TaskHandle;
pub use tasks::TaskExecutor;
