//! Ordered wait structure for delayed task starts.
//!
//! Runners become ready when `first_submit_time + delay_minutes` has passed.
//! The queue is a min-heap over that deadline guarded by a mutex, with a
//! [`Notify`] waking blocked consumers when an earlier deadline is offered.
//! Safe for many producers and many consumers.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use crate::worker::runner::TaskRunner;

/// Heap element: the ordering concern lives here, not on the runner.
struct DelayedRunner {
    deadline: DateTime<Utc>,
    task_instance_id: i32,
    runner: Arc<TaskRunner>,
}

impl PartialEq for DelayedRunner {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.task_instance_id == other.task_instance_id
    }
}

impl Eq for DelayedRunner {}

impl PartialOrd for DelayedRunner {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedRunner {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // earlier deadline first, smaller task instance id breaks ties
        self.deadline
            .cmp(&other.deadline)
            .then_with(|| self.task_instance_id.cmp(&other.task_instance_id))
    }
}

#[derive(Default)]
pub struct DelayQueue {
    heap: Mutex<BinaryHeap<Reverse<DelayedRunner>>>,
    notify: Notify,
}

impl DelayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a runner, ordered by its context's run deadline. Wakes waiting
    /// consumers so a new head with a smaller deadline is picked up.
    pub fn offer(&self, runner: Arc<TaskRunner>) {
        let ctx = runner.context();
        let item = DelayedRunner {
            deadline: ctx.run_deadline(),
            task_instance_id: ctx.task_instance_id,
            runner,
        };
        tracing::debug!(
            task_instance_id = item.task_instance_id,
            deadline = %item.deadline,
            "Runner offered to delay queue"
        );
        self.heap
            .lock()
            .expect("delay queue lock poisoned")
            .push(Reverse(item));
        self.notify.notify_waiters();
    }

    /// Wait until the head runner's delay has elapsed and return it. Never
    /// returns a runner with positive remaining delay.
    pub async fn take(&self) -> Arc<TaskRunner> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wait = {
                let mut heap = self.heap.lock().expect("delay queue lock poisoned");
                match heap.peek() {
                    Some(Reverse(head)) => {
                        let now = Utc::now();
                        if head.deadline <= now {
                            let Reverse(item) = heap.pop().expect("peeked head vanished");
                            return item.runner;
                        }
                        Some((head.deadline - now).to_std().unwrap_or_default())
                    }
                    None => None,
                }
            };

            match wait {
                Some(delay) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Remove a pending runner by task instance id. Returns whether one was
    /// removed.
    pub fn remove(&self, task_instance_id: i32) -> bool {
        let mut heap = self.heap.lock().expect("delay queue lock poisoned");
        let before = heap.len();
        let retained: BinaryHeap<_> = heap
            .drain()
            .filter(|Reverse(item)| item.task_instance_id != task_instance_id)
            .collect();
        *heap = retained;
        before != heap.len()
    }

    pub fn size(&self) -> usize {
        self.heap.lock().expect("delay queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}
