//! In-process remote endpoint.
//!
//! `MemoryProvider` behaves like a tiny file-transfer server living inside the
//! process: it holds a set of files, accepts exactly one target/credential pair
//! and hands out sessions bound to it. Faults (refused connects, slow connects,
//! severed sessions, rotated credentials) can be injected at runtime, which is
//! what the binary's self-check and the test-suite rely on.

use super::types::{ByteSource, RemoteTarget, Session, SessionProvider};
use async_trait::async_trait;
use dashmap::DashMap;
use std::io::{self, Cursor};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::trace;
use uuid::Uuid;

#[derive(Debug)]
struct Endpoint {
    files: DashMap<String, Vec<u8>>,
    accepted: RwLock<RemoteTarget>,
    live: DashMap<Uuid, Arc<AtomicBool>>,
    refuse_connections: AtomicBool,
    connect_delay_ms: AtomicU64,
    stopped: AtomicBool,
    connects: AtomicUsize,
    closes: AtomicUsize,
}

/// Session provider backed by an in-memory endpoint.
#[derive(Debug, Clone)]
pub struct MemoryProvider {
    endpoint: Arc<Endpoint>,
}

impl MemoryProvider {
    /// Create an endpoint that accepts `accepted` and nothing else.
    pub fn new(accepted: RemoteTarget) -> Self {
        Self {
            endpoint: Arc::new(Endpoint {
                files: DashMap::new(),
                accepted: RwLock::new(accepted),
                live: DashMap::new(),
                refuse_connections: AtomicBool::new(false),
                connect_delay_ms: AtomicU64::new(0),
                stopped: AtomicBool::new(false),
                connects: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
            }),
        }
    }

    pub fn put_file(&self, path: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.endpoint.files.insert(path.into(), contents.into());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.endpoint.files.get(path).map(|entry| entry.value().clone())
    }

    pub fn has_file(&self, path: &str) -> bool {
        self.endpoint.files.contains_key(path)
    }

    /// Make every subsequent connect attempt fail with `ConnectionRefused`.
    pub fn set_refuse_connections(&self, refuse: bool) {
        self.endpoint
            .refuse_connections
            .store(refuse, Ordering::SeqCst);
    }

    /// Delay each connect by `delay` to emulate network latency.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.endpoint
            .connect_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Change the accepted target and credentials. Sessions authenticated
    /// under the previous pair stop passing probes.
    pub async fn rotate_credentials(&self, accepted: RemoteTarget) {
        *self.endpoint.accepted.write().await = accepted;
    }

    /// Break every currently open session, as if the server dropped them.
    pub fn sever_all(&self) -> usize {
        let mut severed = 0;
        for entry in self.endpoint.live.iter() {
            if entry.value().swap(false, Ordering::SeqCst) {
                severed += 1;
            }
        }
        severed
    }

    /// Number of sessions opened and not yet closed.
    pub fn live_sessions(&self) -> usize {
        self.endpoint.live.len()
    }

    /// Total successful connects.
    pub fn connects(&self) -> usize {
        self.endpoint.connects.load(Ordering::SeqCst)
    }

    /// Total sessions closed.
    pub fn closes(&self) -> usize {
        self.endpoint.closes.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.endpoint.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionProvider for MemoryProvider {
    async fn connect(&self, target: &RemoteTarget) -> io::Result<Box<dyn Session>> {
        let delay = self.endpoint.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.is_stopped() || self.endpoint.refuse_connections.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("{} refused the connection", target.addr()),
            ));
        }

        {
            let accepted = self.endpoint.accepted.read().await;
            if accepted.host != target.host || accepted.port != target.port {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("no endpoint listening on {}", target.addr()),
                ));
            }
        }

        let id = Uuid::new_v4();
        let healthy = Arc::new(AtomicBool::new(true));
        self.endpoint.live.insert(id, Arc::clone(&healthy));
        self.endpoint.connects.fetch_add(1, Ordering::SeqCst);
        trace!(session = %id, addr = %target.addr(), "Memory session opened");

        Ok(Box::new(MemorySession {
            id,
            endpoint: Arc::clone(&self.endpoint),
            bound_to: target.clone(),
            open: true,
            healthy,
        }))
    }

    async fn authenticate(
        &self,
        session: &mut dyn Session,
        target: &RemoteTarget,
    ) -> io::Result<()> {
        let accepted = self.endpoint.accepted.read().await.clone();
        if accepted.username != target.username || accepted.password != target.password {
            session.close().await;
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("credentials for {} rejected", target.username),
            ));
        }

        session.probe(".").await
    }

    async fn shutdown(&self) {
        self.endpoint.stopped.store(true, Ordering::SeqCst);
    }
}

struct MemorySession {
    id: Uuid,
    endpoint: Arc<Endpoint>,
    bound_to: RemoteTarget,
    open: bool,
    healthy: Arc<AtomicBool>,
}

impl MemorySession {
    async fn ensure_usable(&self) -> io::Result<()> {
        if !self.open || !self.healthy.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "session is no longer connected",
            ));
        }

        if self.bound_to != *self.endpoint.accepted.read().await {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "session credentials are no longer accepted",
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl Session for MemorySession {
    fn is_open(&self) -> bool {
        self.open && self.healthy.load(Ordering::SeqCst)
    }

    async fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        self.endpoint.live.remove(&self.id);
        self.endpoint.closes.fetch_add(1, Ordering::SeqCst);
        trace!(session = %self.id, "Memory session closed");
    }

    async fn probe(&mut self, path: &str) -> io::Result<()> {
        self.ensure_usable().await?;

        if path == "." || path.is_empty() || self.endpoint.files.contains_key(path) {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{}: no such file", path),
            ))
        }
    }

    async fn read_stream(&mut self, remote_path: &str) -> io::Result<ByteSource> {
        self.ensure_usable().await?;

        let contents = self
            .endpoint
            .files
            .get(remote_path)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{}: no such file", remote_path),
                )
            })?;

        Ok(Box::new(Cursor::new(contents)))
    }

    async fn remove(&mut self, remote_path: &str) -> io::Result<()> {
        self.ensure_usable().await?;

        self.endpoint
            .files
            .remove(remote_path)
            .map(|_| ())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{}: no such file", remote_path),
                )
            })
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if self.open {
            self.endpoint.live.remove(&self.id);
            trace!(session = %self.id, "Memory session dropped without close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn target() -> RemoteTarget {
        RemoteTarget::new("mem.local", 22, "svc", "pw")
    }

    async fn open(provider: &MemoryProvider, target: &RemoteTarget) -> Box<dyn Session> {
        let mut session = provider.connect(target).await.unwrap();
        provider
            .authenticate(session.as_mut(), target)
            .await
            .unwrap();
        session
    }

    #[tokio::test]
    async fn dropping_an_open_session_releases_it() {
        let provider = MemoryProvider::new(target());
        let session = open(&provider, &target()).await;
        assert_eq!(provider.live_sessions(), 1);

        drop(session);
        assert_eq!(provider.live_sessions(), 0);
        assert_eq!(provider.closes(), 0);
    }

    #[tokio::test]
    async fn authenticated_session_reads_and_removes() {
        let provider = MemoryProvider::new(target());
        provider.put_file("/data/a.txt", b"hello".to_vec());

        let mut session = open(&provider, &target()).await;
        assert!(session.is_open());
        session.probe(".").await.unwrap();

        let mut reader = session.read_stream("/data/a.txt").await.unwrap();
        let mut buf = String::new();
        reader.read_to_string(&mut buf).await.unwrap();
        assert_eq!(buf, "hello");

        session.remove("/data/a.txt").await.unwrap();
        assert!(!provider.has_file("/data/a.txt"));

        let err = session.remove("/data/a.txt").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let provider = MemoryProvider::new(target());
        let bad = RemoteTarget::new("mem.local", 22, "svc", "nope");

        let mut session = provider.connect(&bad).await.unwrap();
        let err = provider
            .authenticate(session.as_mut(), &bad)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert_eq!(provider.live_sessions(), 0);
    }

    #[tokio::test]
    async fn severed_and_rotated_sessions_fail_probe() {
        let provider = MemoryProvider::new(target());

        let mut severed = open(&provider, &target()).await;
        assert_eq!(provider.sever_all(), 1);
        assert!(!severed.is_open());
        assert!(severed.probe(".").await.is_err());

        let mut stale = open(&provider, &target()).await;
        provider
            .rotate_credentials(RemoteTarget::new("mem.local", 22, "svc", "pw2"))
            .await;
        let err = stale.probe(".").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn refused_and_stopped_endpoint() {
        let provider = MemoryProvider::new(target());
        provider.set_refuse_connections(true);
        let err = provider.connect(&target()).await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);

        provider.set_refuse_connections(false);
        provider.shutdown().await;
        assert!(provider.connect(&target()).await.is_err());
    }

    #[tokio::test]
    async fn close_is_counted_once() {
        let provider = MemoryProvider::new(target());
        let mut session = open(&provider, &target()).await;
        session.close().await;
        session.close().await;
        assert_eq!(provider.closes(), 1);
        assert_eq!(provider.live_sessions(), 0);
    }
}
