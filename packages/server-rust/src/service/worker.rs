//! Background worker draining a task queue on one tokio task.
//!
//! Provides a generic `BackgroundWorker<R>` that processes tasks from an
//! unbounded mpsc channel via a `BackgroundRunnable` implementation. Tasks are
//! processed strictly one at a time, in submission order; `submit` never
//! blocks, so it may be called while holding a synchronous lock.

use async_trait::async_trait;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Trait for task handlers executed by `BackgroundWorker`.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    /// The type of task this runnable processes.
    type Task: Send + 'static;

    /// Process a single task.
    async fn run(&mut self, task: Self::Task);

    /// Called once when the worker is shutting down. Default is a no-op.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Generic background worker that processes tasks via an unbounded channel.
///
/// The worker task exits when [`BackgroundWorker::stop`] is called or when
/// every sender has been dropped.
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<mpsc::UnboundedSender<R::Task>>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Start the background worker with the given runnable.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(mut runnable: R) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<R::Task>();
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    task = rx.recv() => {
                        match task {
                            Some(t) => runnable.run(t).await,
                            None => break,
                        }
                    }
                }
            }

            runnable.shutdown().await;
        });

        Self {
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Submit a task to the worker without waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has been stopped.
    pub fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(task)
                .map_err(|_| anyhow::anyhow!("worker channel closed")),
            None => Err(anyhow::anyhow!("worker not running")),
        }
    }

    /// Stop the worker, waiting for the worker task to complete.
    /// Tasks still queued are dropped.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    /// Whether the worker still accepts tasks.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
