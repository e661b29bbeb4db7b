//! Task execution engine.
//!
//! This module drives tasks accepted from a master through their lifecycle:
//! - **Delay queue**: holds runners until their delayed start deadline
//! - **Worker pool**: executor slots draining the queue
//! - **Task runner**: the per-task state machine
//! - **Resource staging**: downloads missing resource files from the object
//!   store into the task's work directory
//! - **Parameter binding**: merges global, derived-time and schedule-time
//!   parameters
//! - **Work directory**: best-effort cleanup after completion
//!
//! # Execution Flow
//!
//! 1. A context is registered in the cache and its runner offered to the
//!    [`DelayQueue`]
//! 2. A [`WorkerPool`] slot takes the runner once its delay has elapsed
//! 3. [`TaskRunner::run`] reports RUNNING, stages resources, binds
//!    parameters and hands the context to the task plugin
//! 4. The terminal RESULT callback is dispatched and the work directory
//!    cleared, whatever the outcome

pub mod delay_queue;
pub mod params;
pub mod pool;
pub mod resources;
pub mod runner;
pub mod workdir;

pub use delay_queue::DelayQueue;
pub use pool::WorkerPool;
pub use resources::ResourceStager;
pub use runner::{TaskRunner, WorkerServices};
