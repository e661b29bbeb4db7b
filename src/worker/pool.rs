use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::worker::delay_queue::DelayQueue;

/// Fixed set of executor slots draining the delay queue.
///
/// Each slot loops: take a ready runner, execute its state machine to
/// completion, repeat. The pool is the only driver of `TaskRunner::run`;
/// a runner never executes on two slots.
pub struct WorkerPool {
    slots: usize,
    queue: Arc<DelayQueue>,
}

impl WorkerPool {
    pub fn new(slots: usize, queue: Arc<DelayQueue>) -> Self {
        Self { slots, queue }
    }

    /// Spawn the executor slots. They run until the shutdown token cancels.
    pub fn start(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        (0..self.slots)
            .map(|slot| {
                let queue = self.queue.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    tracing::info!(slot, "Executor slot started");
                    loop {
                        tokio::select! {
                            _ = shutdown.cancelled() => {
                                tracing::info!(slot, "Executor slot stopped");
                                break;
                            }
                            runner = queue.take() => {
                                runner.run().await;
                            }
                        }
                    }
                })
            })
            .collect()
    }
}
