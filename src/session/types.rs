use async_trait::async_trait;
use std::fmt;
use std::io;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWrite};

/// Readable byte stream for a remote file.
pub type ByteSource = Box<dyn AsyncRead + Send + Unpin>;

/// Writable local destination for a transfer-in.
pub type ByteSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Remote endpoint plus the credentials used to authenticate against it.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl RemoteTarget {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
        }
    }

    /// `host:port`, used in log lines and error messages.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An authenticated connection to a remote file-transfer endpoint.
///
/// A session is owned by exactly one party at a time: either the pool or a
/// single borrower. Implementations therefore only need `&mut self` for I/O.
#[async_trait]
pub trait Session: Send + Sync {
    /// Whether the underlying channel is still open.
    fn is_open(&self) -> bool;

    /// Close the session. Errors while closing are not interesting to the pool.
    async fn close(&mut self);

    /// Cheap round-trip used as a liveness check (e.g. a stat on ".").
    async fn probe(&mut self, path: &str) -> io::Result<()>;

    /// Open a remote file for reading.
    async fn read_stream(&mut self, remote_path: &str) -> io::Result<ByteSource>;

    /// Delete a remote file.
    async fn remove(&mut self, remote_path: &str) -> io::Result<()>;
}

/// Opens and authenticates raw sessions.
///
/// The pool wraps both calls in its own connect/auth timeouts, so
/// implementations may simply await the network.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn connect(&self, target: &RemoteTarget) -> io::Result<Box<dyn Session>>;

    async fn authenticate(&self, session: &mut dyn Session, target: &RemoteTarget)
        -> io::Result<()>;

    /// Release provider-level resources (client runtimes, sockets).
    async fn shutdown(&self) {}
}

/// Opens local destinations for transfer-in operations.
#[async_trait]
pub trait LocalSink: Send + Sync {
    async fn open_local_sink(&self, local_path: &Path) -> io::Result<ByteSink>;
}
