//! Named worker threads with a bounded join

use std::future::Future;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

/// Why a worker produced no result
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JoinError {
    #[error("worker {0} panicked")]
    Panicked(String),

    #[error("worker {name} did not finish within {timeout:?}")]
    TimedOut { name: String, timeout: Duration },
}

/// A plain OS thread whose result is reported through a oneshot channel.
///
/// Waiting can be bounded; a worker that overruns the bound is abandoned
/// and never keeps the process alive.
#[derive(Debug)]
pub struct Worker<T> {
    name: String,
    done: oneshot::Receiver<thread::Result<T>>,
}

impl<T: Send + 'static> Worker<T> {
    pub fn spawn<F>(name: impl Into<String>, f: F) -> std::io::Result<Self>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let name = name.into();
        let (done_tx, done_rx) = oneshot::channel();

        thread::Builder::new().name(name.clone()).spawn(move || {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));
            let _ = done_tx.send(result);
        })?;

        Ok(Self { name, done: done_rx })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn finish(&self, result: Result<thread::Result<T>, oneshot::error::RecvError>) -> Result<T, JoinError> {
        match result {
            Ok(Ok(value)) => Ok(value),
            _ => {
                log::error!("Worker {} panicked", self.name);
                Err(JoinError::Panicked(self.name.clone()))
            }
        }
    }

    /// Wait at most `timeout` for the worker to finish
    pub async fn join_timeout(mut self, timeout: Duration) -> Result<T, JoinError> {
        match tokio::time::timeout(timeout, &mut self.done).await {
            Ok(result) => self.finish(result),
            Err(_) => {
                log::warn!("Worker {} did not finish within {:?}, abandoning it", self.name, timeout);
                Err(JoinError::TimedOut { name: self.name, timeout })
            }
        }
    }

    /// Wait for the worker for as long as it runs on its own. Once `stop`
    /// resolves the remaining wait is bounded by `grace`.
    pub async fn join_after<S>(mut self, stop: S, grace: Duration) -> Result<T, JoinError>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(stop);
        tokio::select! {
            result = &mut self.done => return self.finish(result),
            _ = &mut stop => {}
        }
        self.join_timeout(grace).await
    }
}
