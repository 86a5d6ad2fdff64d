//! Deferred listener dispatch.
//!
//! Listener calls are queued as jobs and run one at a time on a dedicated
//! task, never on the stack of the transport callback that produced them.

use log::*;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct Dispatcher {
    tx: mpsc::UnboundedSender<Job>,
    // Taken by the worker on first start.
    rx: Mutex<Option<mpsc::UnboundedReceiver<Job>>>,
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Spawns the worker task. Must be called from within a tokio runtime;
    /// later calls are no-ops.
    pub(crate) fn start(&self) {
        let rx = self
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(rx) = rx {
            tokio::spawn(run_jobs(rx));
        }
    }

    pub(crate) fn schedule<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.tx.send(Box::new(job)).is_err() {
            warn!("Listener dispatcher is gone, dropping event.");
        }
    }
}

async fn run_jobs(mut rx: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = rx.recv().await {
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!("Listener panicked while handling an event.");
        }
        // Give the transport and reentrant callers a turn between listeners.
        tokio::task::yield_now().await;
    }
    trace!("Listener dispatcher finished.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_jobs_run_in_order_after_caller_returns() {
        let dispatcher = Dispatcher::new();
        dispatcher.start();

        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let seen = Arc::clone(&seen);
            dispatcher.schedule(move || seen.lock().unwrap().push(i));
        }
        // Nothing runs synchronously inside schedule.
        assert!(seen.lock().unwrap().is_empty());

        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        dispatcher.schedule(move || {
            let _ = done_tx.send(());
        });
        done_rx.await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_stop_worker() {
        let dispatcher = Dispatcher::new();
        dispatcher.start();

        dispatcher.schedule(|| panic!("listener failure"));
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        dispatcher.schedule(move || {
            let _ = done_tx.send(());
        });
        assert!(done_rx.await.is_ok());
    }
}
