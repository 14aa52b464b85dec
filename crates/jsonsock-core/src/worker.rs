//! Background execution of a single fallible operation.
//!
//! A [`BackgroundWorker`] owns one operation, runs it on its own tokio task once
//! started, and hands the outcome back through a one-shot channel. Callers can
//! poll for it with [`failure`](BackgroundWorker::failure) or await it with
//! [`wait`](BackgroundWorker::wait) / [`join`](BackgroundWorker::join).
//!
//! Workers are single-use. Endpoints create a fresh one for every standalone
//! connect or listen attempt.

use crate::error::{Result, SocketError};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

/// Runs one fallible operation off the caller's task and captures its outcome.
pub struct BackgroundWorker {
    label: String,
    operation: Option<BoxFuture<'static, Result<()>>>,
    outcome_rx: Option<oneshot::Receiver<Result<()>>>,
    outcome: Option<Result<()>>,
    task: Option<JoinHandle<()>>,
}

impl BackgroundWorker {
    /// Wrap an operation without running it.
    pub fn new<F>(label: impl Into<String>, operation: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            label: label.into(),
            operation: Some(operation.boxed()),
            outcome_rx: None,
            outcome: None,
            task: None,
        }
    }

    /// Name used in logs and errors.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Spawn the operation and return immediately.
    ///
    /// Must be called from within a tokio runtime. A worker runs its operation
    /// at most once.
    pub fn start(&mut self) -> Result<()> {
        let operation = self
            .operation
            .take()
            .ok_or_else(|| SocketError::WorkerAlreadyStarted {
                label: self.label.clone(),
            })?;

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let label = self.label.clone();
        self.task = Some(tokio::spawn(async move {
            let outcome = operation.await;
            if let Err(e) = &outcome {
                debug!("Background worker '{}' finished with error: {}", label, e);
            }
            // The receiver may already be gone if the worker was dropped.
            let _ = outcome_tx.send(outcome);
        }));
        self.outcome_rx = Some(outcome_rx);
        Ok(())
    }

    /// Whether [`start`](Self::start) has been called.
    pub fn is_started(&self) -> bool {
        self.operation.is_none()
    }

    /// Whether the operation has completed (cleanly, with an error, or by panicking).
    pub fn is_finished(&mut self) -> bool {
        self.poll_outcome();
        self.outcome.is_some()
    }

    /// The captured failure, if the operation has finished with one.
    ///
    /// Returns `None` both while the operation is still running and after a
    /// clean completion. Use [`wait`](Self::wait) when the answer must be final.
    pub fn failure(&mut self) -> Option<&SocketError> {
        self.poll_outcome();
        self.outcome.as_ref().and_then(|outcome| outcome.as_ref().err())
    }

    /// Await completion and return the captured failure, if any.
    ///
    /// Returns `None` immediately for a worker that was never started.
    pub async fn wait(&mut self) -> Option<&SocketError> {
        if self.outcome.is_none() {
            if let Some(rx) = self.outcome_rx.take() {
                self.outcome = Some(self.resolve(rx.await));
            }
        }
        self.outcome.as_ref().and_then(|outcome| outcome.as_ref().err())
    }

    /// Consume the worker, await completion and return the operation's result.
    pub async fn join(mut self) -> Result<()> {
        self.wait().await;
        self.outcome.take().unwrap_or(Ok(()))
    }

    fn poll_outcome(&mut self) {
        if self.outcome.is_some() {
            return;
        }
        let Some(rx) = self.outcome_rx.as_mut() else {
            return;
        };
        match rx.try_recv() {
            Ok(outcome) => {
                self.outcome_rx = None;
                self.outcome = Some(outcome);
            }
            Err(oneshot::error::TryRecvError::Empty) => {}
            Err(oneshot::error::TryRecvError::Closed) => {
                self.outcome_rx = None;
                self.outcome = Some(Err(self.panicked()));
            }
        }
    }

    fn resolve(
        &self,
        received: std::result::Result<Result<()>, oneshot::error::RecvError>,
    ) -> Result<()> {
        received.unwrap_or_else(|_| Err(self.panicked()))
    }

    fn panicked(&self) -> SocketError {
        SocketError::WorkerPanicked {
            label: self.label.clone(),
        }
    }
}

impl std::fmt::Debug for BackgroundWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundWorker")
            .field("label", &self.label)
            .field("started", &self.is_started())
            .field("outcome", &self.outcome)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_clean_completion_has_no_failure() {
        let mut worker = BackgroundWorker::new("clean", async { Ok(()) });
        worker.start().unwrap();

        assert!(worker.wait().await.is_none());
        assert!(worker.is_finished());
        assert!(worker.failure().is_none());
    }

    #[tokio::test]
    async fn test_failure_is_captured() {
        let mut worker = BackgroundWorker::new("failing", async {
            Err(SocketError::Timeout(Duration::from_millis(5)))
        });
        worker.start().unwrap();

        let failure = worker.wait().await;
        assert!(matches!(failure, Some(SocketError::Timeout(_))));
        // Later polls keep returning the same failure.
        assert!(worker.failure().is_some_and(SocketError::is_timeout));
    }

    #[tokio::test]
    async fn test_start_returns_before_completion() {
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let mut worker = BackgroundWorker::new("gated", async move {
            let _ = release_rx.await;
            Ok(())
        });
        worker.start().unwrap();

        assert!(worker.is_started());
        assert!(!worker.is_finished());
        assert!(worker.failure().is_none());

        release_tx.send(()).unwrap();
        assert!(worker.join().await.is_ok());
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let mut worker = BackgroundWorker::new("once", async { Ok(()) });
        worker.start().unwrap();

        let err = worker.start().unwrap_err();
        assert!(matches!(err, SocketError::WorkerAlreadyStarted { label } if label == "once"));
    }

    #[tokio::test]
    async fn test_panic_is_captured_as_error() {
        let mut worker = BackgroundWorker::new("exploding", async {
            if true {
                panic!("boom");
            }
            Ok(())
        });
        worker.start().unwrap();

        let result = worker.join().await;
        assert!(matches!(result, Err(SocketError::WorkerPanicked { .. })));
    }

    #[tokio::test]
    async fn test_unstarted_worker_waits_trivially() {
        let mut worker = BackgroundWorker::new("idle", async { Ok(()) });
        assert!(!worker.is_started());
        assert!(worker.wait().await.is_none());
    }
}
