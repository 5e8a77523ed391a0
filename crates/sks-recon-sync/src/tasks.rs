//! Background task tracking with a shared shutdown signal.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Every task a peer spawns, so shutdown can stop and await them together.
#[derive(Debug)]
pub(crate) struct TaskGroup {
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskGroup {
    pub fn new() -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        Self {
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    fn handles(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Resolves once shutdown has been signalled.
    pub fn shutdown_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        async move {
            // A dropped sender counts as shutdown.
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        }
    }

    /// Spawn a task that runs to completion even after shutdown.
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        let mut handles = self.handles();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Spawn a task that is dropped at its next await once shutdown is signalled.
    pub fn spawn_cancellable<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let shutdown = self.shutdown_signal();
        self.spawn(async move {
            tokio::select! {
                _ = shutdown => {}
                _ = fut => {}
            }
        });
    }

    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Wait for every spawned task, including ones spawned while waiting.
    pub async fn join(&self) {
        loop {
            let batch: Vec<_> = self.handles().drain(..).collect();
            if batch.is_empty() {
                return;
            }
            for handle in batch {
                let _ = handle.await;
            }
        }
    }
}
