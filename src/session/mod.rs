pub mod memory;
pub mod sink;
pub mod types;

pub use memory::MemoryProvider;
pub use sink::FsSink;
pub use types::{ByteSink, ByteSource, LocalSink, RemoteTarget, Session, SessionProvider};
