/// Errors surfaced by [`crate::WorkerPool`] construction and submission.
#[derive(thiserror::Error, Debug)]
pub enum SchedulerError {
    #[error("num_workers must be at least 1")]
    NoWorkers,
    #[error("deque_capacity must be a power of two, got {0}")]
    BadCapacity(usize),
    #[error("Cell tasks may only be submitted from a worker thread")]
    NotAWorkerThread,
}
