use crate::utils::error::{PoolError, Result};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::{JoinError, JoinHandle};

/// Result of a submitted task. Resolves exactly once, to the task's value or
/// to the error that prevented it from producing one.
#[derive(Debug)]
pub struct TaskHandle<T> {
    state: HandleState<T>,
}

#[derive(Debug)]
enum HandleState<T> {
    Spawned(JoinHandle<Result<T>>),
    Rejected(Option<PoolError>),
}

impl<T> TaskHandle<T> {
    pub(crate) fn spawned(handle: JoinHandle<Result<T>>) -> Self {
        Self {
            state: HandleState::Spawned(handle),
        }
    }

    pub(crate) fn rejected(err: PoolError) -> Self {
        Self {
            state: HandleState::Rejected(Some(err)),
        }
    }

    /// Cancel the task. The handle then resolves to [`PoolError::TaskFailed`].
    pub fn abort(&self) {
        if let HandleState::Spawned(handle) = &self.state {
            handle.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        match &self.state {
            HandleState::Spawned(handle) => handle.is_finished(),
            HandleState::Rejected(_) => true,
        }
    }
}

fn join_failure(err: JoinError) -> PoolError {
    if err.is_cancelled() {
        PoolError::TaskFailed("task was cancelled".to_string())
    } else {
        PoolError::TaskFailed(format!("task panicked: {}", err))
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            HandleState::Spawned(handle) => Pin::new(handle)
                .poll(cx)
                .map(|joined| joined.unwrap_or_else(|e| Err(join_failure(e)))),
            HandleState::Rejected(err) => {
                Poll::Ready(Err(err.take().unwrap_or(PoolError::Shutdown)))
            }
        }
    }
}
