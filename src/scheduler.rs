//! FIFO scheduler that keeps at most one forecast call in flight.
//!
//! Tasks are queued in arrival order and executed by a single drain loop. The
//! "draining" flag lives under the same lock as the queue, so an enqueue into
//! an idle queue starts exactly one loop and a loop never exits while work is
//! pending. A task that fails or panics only affects its own caller.

use futures::future::{BoxFuture, FutureExt};
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::errors::ForecastError;

type Job = BoxFuture<'static, ()>;

#[derive(Default)]
struct Queue {
    pending: VecDeque<Job>,
    draining: bool,
}

#[derive(Clone)]
pub struct RequestScheduler {
    queue: Arc<Mutex<Queue>>,
    capacity: usize,
}

impl RequestScheduler {
    /// Creates a scheduler that holds at most `capacity` pending tasks.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Arc::new(Mutex::new(Queue::default())),
            capacity: capacity.max(1),
        }
    }

    /// Number of tasks waiting to run (the running task excluded).
    pub fn pending(&self) -> usize {
        lock(&self.queue).pending.len()
    }

    /// Queues `task` behind every previously enqueued task and waits for its
    /// output.
    ///
    /// # Returns
    ///
    /// * `Ok(T)` - The task's own output, whatever it is.
    /// * `Err(ForecastError::QueueFull)` - The queue is at capacity; the task
    ///   was not queued.
    /// * `Err(ForecastError::TaskAborted)` - The task panicked.
    pub async fn enqueue<F, T>(&self, task: F) -> Result<T, ForecastError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            // Receiver may be gone if the caller stopped waiting
            let _ = tx.send(task.await);
        });

        self.push(job)?;
        rx.await.map_err(|_| ForecastError::TaskAborted)
    }

    fn push(&self, job: Job) -> Result<(), ForecastError> {
        let mut queue = lock(&self.queue);
        if queue.pending.len() >= self.capacity {
            warn!(
                "Forecast queue full ({} pending), rejecting request",
                queue.pending.len()
            );
            return Err(ForecastError::QueueFull {
                capacity: self.capacity,
            });
        }

        queue.pending.push_back(job);
        debug!("Task queued ({} pending)", queue.pending.len());

        if !queue.draining {
            queue.draining = true;
            tokio::spawn(drain(Arc::clone(&self.queue)));
        }
        Ok(())
    }
}

async fn drain(queue: Arc<Mutex<Queue>>) {
    loop {
        let job = {
            let mut queue = lock(&queue);
            match queue.pending.pop_front() {
                Some(job) => job,
                None => {
                    queue.draining = false;
                    return;
                }
            }
        };

        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
            warn!("Queued task panicked; continuing with the next task");
        }
    }
}

fn lock(queue: &Mutex<Queue>) -> MutexGuard<'_, Queue> {
    queue.lock().unwrap_or_else(|e| e.into_inner())
}
