// src/scheduler/queue.rs

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, MutexGuard};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::types::SchedulerError;

/// Unit of work executed by a [`WorkQueue`] worker.
#[async_trait]
pub trait Task: Send + Sync + 'static {
    type Output: Send + 'static;

    fn name(&self) -> &str;

    async fn execute(&self) -> Self::Output;
}

/// Result of one task within a pass.
#[derive(Debug)]
pub struct Finished<O> {
    pub name: String,
    /// `Err` only when the task panicked.
    pub result: Result<O, SchedulerError>,
}

struct PassState<O> {
    pending: AtomicUsize,
    finished: std::sync::Mutex<Vec<Finished<O>>>,
    drained: std::sync::Mutex<Option<oneshot::Sender<()>>>,
}

fn lock<T>(mutex: &std::sync::Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<O> PassState<O> {
    fn finish(&self, finished: Finished<O>) {
        lock(&self.finished).push(finished);
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            // the slot is emptied on first use, so a pass drains once
            if let Some(drained) = lock(&self.drained).take() {
                let _ = drained.send(());
            }
        }
    }
}

/// Fixed pool of long-lived workers fed from one queue.
///
/// Tasks are submitted a pass at a time; [`run_pass`](Self::run_pass)
/// resolves once every task of the pass has finished.
pub struct WorkQueue<T: Task> {
    sender: mpsc::UnboundedSender<Arc<T>>,
    state: Arc<PassState<T::Output>>,
    workers: Vec<JoinHandle<()>>,
    stop: CancellationToken,
}

impl<T: Task> WorkQueue<T> {
    /// Spawns `worker_num` workers on the current runtime.
    pub fn start(worker_num: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver = Arc::new(Mutex::new(receiver));
        let state = Arc::new(PassState {
            pending: AtomicUsize::new(0),
            finished: std::sync::Mutex::new(Vec::new()),
            drained: std::sync::Mutex::new(None),
        });
        let stop = CancellationToken::new();

        let workers = (0..worker_num.max(1))
            .map(|worker_id| {
                let receiver = Arc::clone(&receiver);
                let state = Arc::clone(&state);
                let stop = stop.clone();
                tokio::spawn(async move { Self::worker(worker_id, receiver, state, stop).await })
            })
            .collect();

        WorkQueue {
            sender,
            state,
            workers,
            stop,
        }
    }

    pub fn worker_num(&self) -> usize {
        self.workers.len()
    }

    /// Runs every task in `tasks` and waits for all of them.
    ///
    /// Results arrive in completion order.
    pub async fn run_pass(
        &mut self,
        tasks: &[Arc<T>],
    ) -> Result<Vec<Finished<T::Output>>, SchedulerError> {
        if tasks.is_empty() {
            return Ok(Vec::new());
        }

        let (drained, on_drained) = oneshot::channel();
        *lock(&self.state.drained) = Some(drained);
        self.state.pending.store(tasks.len(), Ordering::Release);

        for task in tasks {
            self.sender
                .send(Arc::clone(task))
                .map_err(|_| SchedulerError::QueueClosed)?;
        }

        on_drained.await.map_err(|_| SchedulerError::QueueClosed)?;
        Ok(std::mem::take(&mut *lock(&self.state.finished)))
    }

    /// Stops the workers once they are idle and waits for them to exit.
    pub async fn shutdown(mut self) {
        self.stop.cancel();
        for worker in std::mem::take(&mut self.workers) {
            if let Err(err) = worker.await {
                warn!(error = %err, "worker exited abnormally");
            }
        }
    }

    async fn worker(
        worker_id: usize,
        receiver: Arc<Mutex<mpsc::UnboundedReceiver<Arc<T>>>>,
        state: Arc<PassState<T::Output>>,
        stop: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    debug!(worker_id, "worker shutting down");
                    return;
                }

                task = async {
                    let mut rx = receiver.lock().await;
                    rx.recv().await
                } => {
                    let Some(task) = task else {
                        debug!(worker_id, "queue closed");
                        return;
                    };
                    debug!(worker_id, job = task.name(), "job started");
                    let result = AssertUnwindSafe(task.execute())
                        .catch_unwind()
                        .await
                        .map_err(|_| SchedulerError::Panicked(task.name().to_string()));
                    state.finish(Finished {
                        name: task.name().to_string(),
                        result,
                    });
                }
            }
        }
    }
}

impl<T: Task> Drop for WorkQueue<T> {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
