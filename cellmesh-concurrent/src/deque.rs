use std::sync::atomic::{AtomicIsize, AtomicPtr, Ordering};

use crate::error::ConcurrentError;

/// Outcome of a [`Deque::steal`] attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StealOutcome<T> {
    /// An item was stolen.
    Stolen(T),
    /// The deque was observed empty.
    Empty,
    /// Another thief (or the owner) won a race for the last element.
    /// The caller should retry.
    Retry,
}

/// A fixed-capacity Chase-Lev work-stealing deque.
///
/// The owning thread pushes and pops from the "bottom" end; any number of
/// other threads may concurrently "steal" from the "top" end. At most one
/// of a concurrent owner-pop and thief-steal wins the race for the final
/// element; the loser observes [`StealOutcome::Retry`] or an empty pop.
///
/// `push`/`pop` must only ever be called by the single owning thread —
/// this is a logical requirement enforced by convention (the scheduler
/// hands each worker its own deque and never shares the owning handle),
/// not by the type system, matching the reference implementation this is
/// ported from.
pub struct Deque<T> {
    buffer: Box<[AtomicPtr<T>]>,
    mask: usize,
    top: AtomicIsize,
    bottom: AtomicIsize,
}

unsafe impl<T: Send> Send for Deque<T> {}
unsafe impl<T: Send> Sync for Deque<T> {}

impl<T> Deque<T> {
    /// Default ring buffer capacity, matching the tuned value used by the
    /// reference implementation this crate is modeled on.
    pub const DEFAULT_CAPACITY: usize = 4096;

    /// Creates a deque with [`Deque::DEFAULT_CAPACITY`] slots.
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Creates a deque with `capacity` slots.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or not a power of two.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be nonzero");
        assert!(
            capacity.is_power_of_two(),
            "capacity must be a power of two, got {}",
            capacity
        );
        let mut buffer = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            buffer.push(AtomicPtr::new(std::ptr::null_mut()));
        }
        Deque {
            buffer: buffer.into_boxed_slice(),
            mask: capacity - 1,
            top: AtomicIsize::new(0),
            bottom: AtomicIsize::new(0),
        }
    }

    /// The fixed capacity of the underlying ring buffer.
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// An approximate size; only safe to treat as exact when no other
    /// thread is concurrently pushing, popping, or stealing.
    pub fn approx_len(&self) -> usize {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Relaxed);
        (b - t).max(0) as usize
    }

    /// Pushes `item` at the bottom. Owner-only.
    ///
    /// Returns the item back wrapped in [`ConcurrentError::Full`] if the
    /// ring buffer is at capacity; the caller decides whether to retry
    /// elsewhere, grow a side buffer, or treat it as fatal.
    pub fn push(&self, item: T) -> Result<(), ConcurrentError<T>> {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Acquire);
        if b - t >= self.mask as isize {
            return Err(ConcurrentError::Full {
                item,
                capacity: self.capacity(),
            });
        }
        let slot = &self.buffer[(b as usize) & self.mask];
        let boxed = Box::into_raw(Box::new(item));
        slot.store(boxed, Ordering::Relaxed);
        self.bottom.store(b + 1, Ordering::Release);
        Ok(())
    }

    /// Pops from the bottom. Owner-only.
    pub fn pop(&self) -> Option<T> {
        let b = self.bottom.load(Ordering::Relaxed) - 1;
        self.bottom.store(b, Ordering::Relaxed);
        std::sync::atomic::fence(Ordering::SeqCst);
        let t = self.top.load(Ordering::Relaxed);

        if t > b {
            // Already empty; restore bottom.
            self.bottom.store(t, Ordering::Relaxed);
            return None;
        }

        let slot = &self.buffer[(b as usize) & self.mask];
        let ptr = slot.load(Ordering::Acquire);

        if t == b {
            // Last element: race the thieves for it.
            let won = self
                .top
                .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok();
            self.bottom.store(t + 1, Ordering::Relaxed);
            if !won {
                return None;
            }
        }

        if ptr.is_null() {
            return None;
        }
        Some(*unsafe { Box::from_raw(ptr) })
    }

    /// Attempts to steal one item from the top. Any thread may call this.
    pub fn steal(&self) -> StealOutcome<T> {
        let t = self.top.load(Ordering::Acquire);
        std::sync::atomic::fence(Ordering::SeqCst);
        let b = self.bottom.load(Ordering::Acquire);

        if t >= b {
            return StealOutcome::Empty;
        }

        let slot = &self.buffer[(t as usize) & self.mask];
        let ptr = slot.load(Ordering::Acquire);
        if ptr.is_null() {
            return StealOutcome::Retry;
        }

        if self
            .top
            .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            StealOutcome::Stolen(*unsafe { Box::from_raw(ptr) })
        } else {
            StealOutcome::Retry
        }
    }
}

impl<T> Default for Deque<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Deque<T> {
    fn drop(&mut self) {
        // Drain whatever is left so we don't leak boxed slots.
        while self.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_then_pop_is_lifo() {
        let d = Deque::with_capacity(8);
        d.push(1).unwrap();
        d.push(2).unwrap();
        d.push(3).unwrap();
        assert_eq!(d.pop(), Some(3));
        assert_eq!(d.pop(), Some(2));
        assert_eq!(d.pop(), Some(1));
        assert_eq!(d.pop(), None);
    }

    #[test]
    fn steal_from_untouched_queue_is_fifo() {
        let d = Deque::with_capacity(8);
        d.push(1).unwrap();
        d.push(2).unwrap();
        d.push(3).unwrap();
        assert_eq!(d.steal(), StealOutcome::Stolen(1));
        assert_eq!(d.steal(), StealOutcome::Stolen(2));
        assert_eq!(d.steal(), StealOutcome::Stolen(3));
        assert_eq!(d.steal(), StealOutcome::Empty);
    }

    #[test]
    fn full_deque_returns_item_back() {
        let d = Deque::with_capacity(2);
        d.push(1).unwrap();
        match d.push(2) {
            Err(ConcurrentError::Full { item, .. }) => assert_eq!(item, 2),
            _ => panic!("expected Full"),
        }
    }

    #[test]
    fn concurrent_push_pop_steal_conserves_items() {
        let d = Arc::new(Deque::<u64>::with_capacity(1024));
        for i in 0..500u64 {
            d.push(i).unwrap();
        }
        let stolen = Arc::new(AtomicUsize::new(0));
        let mut thieves = Vec::new();
        for _ in 0..4 {
            let d = d.clone();
            let stolen = stolen.clone();
            thieves.push(thread::spawn(move || loop {
                match d.steal() {
                    StealOutcome::Stolen(_) => {
                        stolen.fetch_add(1, Ordering::Relaxed);
                    }
                    StealOutcome::Empty => break,
                    StealOutcome::Retry => continue,
                }
            }));
        }
        let mut popped = 0usize;
        while d.pop().is_some() {
            popped += 1;
        }
        for t in thieves {
            t.join().unwrap();
        }
        assert_eq!(popped + stolen.load(Ordering::Relaxed), 500);
    }
}
