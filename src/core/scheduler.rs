// src/core/scheduler.rs

//! The Periodic Scheduler (spec §4.9): registers tasks that run at fixed
//! intervals, with one-shot variants.
//!
//! Per the "Global-state elimination" design note (spec §9), this is a field
//! of whatever constructs it rather than a process-global registry — callers
//! hold an `Arc<Scheduler>` and pass it around explicitly.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::error;

type BoxedJob = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Runs registered tasks. Periodic tasks each own an independent loop and may
/// run concurrently with one another; one-shot tasks are drained serially by
/// a single worker, per spec §4.9 ("tasks execute serially relative to one
/// another").
pub struct Scheduler {
    one_shot_tx: mpsc::UnboundedSender<BoxedJob>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Arc::new(Self {
            one_shot_tx: tx,
            handles: Mutex::new(Vec::new()),
        });
        let worker = tokio::spawn(run_one_shot_worker(rx));
        scheduler.handles.lock().push(worker);
        scheduler
    }

    /// Registers a recurring task. Never blocks: the task is handed to its
    /// own spawned loop immediately.
    pub fn add_periodic<F, Fut>(self: &Arc<Self>, task: F, interval: Duration, run_now: bool)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            if run_now {
                task().await;
            }
            loop {
                tokio::time::sleep(interval).await;
                task().await;
            }
        });
        self.handles.lock().push(handle);
    }

    /// Registers a one-shot task. Interval 0 / `run_once=true` in spec terms:
    /// the task runs exactly once, as soon as the serial worker is free.
    /// Never blocks: the task is enqueued and this returns immediately.
    pub fn add_one_shot<F, Fut>(&self, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let job: BoxedJob = Box::pin(async move { task().await });
        if self.one_shot_tx.send(job).is_err() {
            error!("one-shot scheduler worker is gone, dropping task");
        }
    }
}

async fn run_one_shot_worker(mut rx: mpsc::UnboundedReceiver<BoxedJob>) {
    while let Some(job) = rx.recv().await {
        job.await;
    }
}
