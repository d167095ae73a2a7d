use super::handle::TaskHandle;
use crate::pool::SessionPool;
use crate::session::{FsSink, LocalSink, Session};
use crate::utils::error::{PoolError, Result};
use futures::future::BoxFuture;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Runs operations against pooled sessions on a bounded set of workers.
///
/// The worker limit is independent of the pool size: surplus workers simply
/// wait in `borrow`. Submitting never blocks; every task is tracked and its
/// outcome is observable through the returned [`TaskHandle`].
pub struct TaskExecutor {
    pool: Arc<SessionPool>,
    sink: Arc<dyn LocalSink>,
    workers: Arc<Semaphore>,
    tracker: TaskTracker,
    thread_size: usize,
}

impl TaskExecutor {
    /// Executor writing downloads to the local filesystem.
    pub fn new(pool: Arc<SessionPool>, thread_size: usize) -> Self {
        Self::with_sink(pool, thread_size, Arc::new(FsSink))
    }

    pub fn with_sink(pool: Arc<SessionPool>, thread_size: usize, sink: Arc<dyn LocalSink>) -> Self {
        let thread_size = thread_size.max(1);
        Self {
            pool,
            sink,
            workers: Arc::new(Semaphore::new(thread_size)),
            tracker: TaskTracker::new(),
            thread_size,
        }
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    pub fn thread_size(&self) -> usize {
        self.thread_size
    }

    /// Tasks submitted and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Schedule an arbitrary future on a worker.
    pub fn submit_task<T, Fut>(&self, task: Fut) -> TaskHandle<T>
    where
        T: Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        self.spawn(async move { Ok(task.await) })
    }

    /// Borrow a session, run `op` on it and hand the session back.
    ///
    /// The session is released (and thus validated) whether `op` succeeds or
    /// fails, so a session broken by the operation does not go back into
    /// circulation. Borrow failures and I/O errors resolve the handle to an error.
    pub fn with_session<T, F>(&self, op: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: for<'a> FnOnce(&'a mut dyn Session) -> BoxFuture<'a, io::Result<T>> + Send + 'static,
    {
        let pool = Arc::clone(&self.pool);
        self.spawn(async move {
            let mut lease = pool.borrow().await?;
            let outcome = op(&mut *lease).await;
            pool.release(lease).await;
            outcome.map_err(PoolError::from)
        })
    }

    /// Copy a remote file into a local sink.
    ///
    /// Resolves to `Ok(false)` when the transfer fails with an I/O error and
    /// to an error only when no session could be obtained.
    pub fn download(
        &self,
        remote_path: impl Into<String>,
        local_path: impl Into<PathBuf>,
    ) -> TaskHandle<bool> {
        let remote_path = remote_path.into();
        let local_path = local_path.into();
        let pool = Arc::clone(&self.pool);
        let sink = Arc::clone(&self.sink);

        self.spawn(async move {
            let mut lease = pool.borrow().await?;
            let outcome = transfer_in(&mut *lease, sink.as_ref(), &remote_path, &local_path).await;
            pool.release(lease).await;

            Ok(match outcome {
                Ok(bytes) => {
                    debug!(remote = %remote_path, local = %local_path.display(), bytes, "Download finished");
                    true
                }
                Err(e) => {
                    warn!(remote = %remote_path, local = %local_path.display(), error = %e, "Download failed");
                    false
                }
            })
        })
    }

    /// Delete a remote file. I/O failures (including a missing path)
    /// resolve to `Ok(false)`.
    pub fn remove(&self, remote_path: impl Into<String>) -> TaskHandle<bool> {
        let remote_path = remote_path.into();
        let pool = Arc::clone(&self.pool);

        self.spawn(async move {
            let mut lease = pool.borrow().await?;
            let outcome = lease.remove(&remote_path).await;
            pool.release(lease).await;

            Ok(match outcome {
                Ok(()) => {
                    debug!(remote = %remote_path, "Remove finished");
                    true
                }
                Err(e) => {
                    warn!(remote = %remote_path, error = %e, "Remove failed");
                    false
                }
            })
        })
    }

    /// Stop accepting tasks and wait for the ones already submitted.
    pub async fn shutdown(&self) {
        self.tracker.close();
        let in_flight = self.tracker.len();
        if in_flight > 0 {
            info!(in_flight, "Waiting for submitted tasks to finish");
        }
        self.tracker.wait().await;
        info!("Task executor stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.tracker.is_closed()
    }

    fn spawn<T, Fut>(&self, task: Fut) -> TaskHandle<T>
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if self.tracker.is_closed() {
            return TaskHandle::rejected(PoolError::Shutdown);
        }

        let workers = Arc::clone(&self.workers);
        TaskHandle::spawned(self.tracker.spawn(async move {
            let _permit = workers
                .acquire_owned()
                .await
                .map_err(|_| PoolError::Shutdown)?;
            task.await
        }))
    }
}

async fn transfer_in(
    session: &mut dyn Session,
    sink: &dyn LocalSink,
    remote_path: &str,
    local_path: &Path,
) -> io::Result<u64> {
    let mut source = session.read_stream(remote_path).await?;
    let mut dest = sink.open_local_sink(local_path).await?;
    let bytes = tokio::io::copy(&mut source, &mut dest).await?;
    dest.shutdown().await?;
    Ok(bytes)
}
