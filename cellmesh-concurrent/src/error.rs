use std::fmt;

/// Errors surfaced by the primitives in this crate.
#[derive(thiserror::Error)]
pub enum ConcurrentError<T> {
    /// A [`crate::Deque`] push was attempted while the ring buffer was at
    /// capacity. The task is handed back so the caller can decide what to
    /// do with it instead of it being silently dropped.
    #[error("deque is full at capacity {capacity}")]
    Full {
        /// The item that could not be pushed.
        item: T,
        /// The deque's fixed capacity.
        capacity: usize,
    },
}

impl<T> fmt::Debug for ConcurrentError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConcurrentError::Full { capacity, .. } => {
                f.debug_struct("Full").field("capacity", capacity).finish()
            }
        }
    }
}
