//! A typed work-stealing worker pool.
//!
//! Workers are plain OS threads, each owning one [`cellmesh_concurrent::Deque`]
//! and one [`cellmesh_concurrent::Inbox`] per [`TaskType`]. Submissions
//! either land in a target worker's inbox (for fire-and-forget work) or in
//! the calling worker's own deque (for work meant to be immediately
//! stealable by idle peers). See [`WorkerPool`] for the full contract.

mod backoff;
mod error;
mod pool;
mod task;

pub use backoff::Backoff;
pub use error::SchedulerError;
pub use pool::{PoolOptions, WorkerPool};
pub use task::{Task, TaskType};
