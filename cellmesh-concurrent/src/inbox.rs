use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicPtr, Ordering};

struct Node<T> {
    next: AtomicPtr<Node<T>>,
    data: Option<T>,
}

/// An intrusive, multi-producer single-consumer queue.
///
/// Any number of threads may call [`Inbox::push`] concurrently. Popping is
/// only reachable through an [`InboxConsumer`], obtained via
/// [`Inbox::consumer`] and pinned to the thread that created it — the
/// scheduler hands one to a worker once, at the start of its loop, and
/// that worker holds it for the lifetime of the thread.
///
/// Delivery is FIFO per producer: if one thread pushes `a` then `b`, the
/// consumer observes `a` before `b`. No ordering is promised across
/// different producer threads.
pub struct Inbox<T> {
    head: AtomicPtr<Node<T>>,
    tail: UnsafeCell<*mut Node<T>>,
}

unsafe impl<T: Send> Send for Inbox<T> {}
unsafe impl<T: Send> Sync for Inbox<T> {}

impl<T> Inbox<T> {
    pub fn new() -> Self {
        let dummy = Box::into_raw(Box::new(Node {
            next: AtomicPtr::new(std::ptr::null_mut()),
            data: None,
        }));
        Inbox {
            head: AtomicPtr::new(dummy),
            tail: UnsafeCell::new(dummy),
        }
    }

    /// Pushes `item`. May be called from any thread.
    pub fn push(&self, item: T) {
        let node = Box::into_raw(Box::new(Node {
            next: AtomicPtr::new(std::ptr::null_mut()),
            data: Some(item),
        }));
        let prev = self.head.swap(node, Ordering::AcqRel);
        unsafe { (*prev).next.store(node, Ordering::Release) };
    }

    /// Hands out the single-consumer handle. Callers must not call this
    /// more than once per inbox while an earlier [`InboxConsumer`] is
    /// still in use — doing so would let two handles race the pop side,
    /// which is exactly the hazard the guard exists to rule out.
    pub fn consumer(&self) -> InboxConsumer<'_, T> {
        InboxConsumer {
            inbox: self,
            _not_send: PhantomData,
        }
    }

    /// An approximate length, for debug stats only. Walks the list and
    /// stops at a fixed cap so a runaway backlog can't make this call
    /// unbounded.
    pub const MAX_APPROX_WALK: usize = 10_000;

    fn pop_exclusive(&self) -> Option<T> {
        unsafe {
            let tail = *self.tail.get();
            let next = (*tail).next.load(Ordering::Acquire);
            if next.is_null() {
                return None;
            }
            let data = (*next).data.take();
            *self.tail.get() = next;
            drop(Box::from_raw(tail));
            data
        }
    }

    fn is_empty_exclusive(&self) -> bool {
        unsafe {
            let tail = *self.tail.get();
            (*tail).next.load(Ordering::Acquire).is_null()
        }
    }

    fn approx_len_exclusive(&self) -> usize {
        unsafe {
            let mut node = *self.tail.get();
            let mut count = 0;
            while count < Self::MAX_APPROX_WALK {
                let next = (*node).next.load(Ordering::Acquire);
                if next.is_null() {
                    break;
                }
                node = next;
                count += 1;
            }
            count
        }
    }
}

/// The sole handle allowed to drain an [`Inbox`]. Not `Send`: once a
/// worker obtains its consumer it stays on that thread for the rest of
/// the inbox's life, so the single-consumer invariant is enforced by the
/// type system rather than left as a calling convention.
pub struct InboxConsumer<'a, T> {
    inbox: &'a Inbox<T>,
    _not_send: PhantomData<*const ()>,
}

impl<'a, T> InboxConsumer<'a, T> {
    /// Pops the oldest item, if any.
    pub fn pop(&self) -> Option<T> {
        self.inbox.pop_exclusive()
    }

    pub fn is_empty(&self) -> bool {
        self.inbox.is_empty_exclusive()
    }

    pub fn approx_len(&self) -> usize {
        self.inbox.approx_len_exclusive()
    }
}

impl<T> Default for Inbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Inbox<T> {
    fn drop(&mut self) {
        while self.pop_exclusive().is_some() {}
        unsafe {
            drop(Box::from_raw(*self.tail.get()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_single_producer() {
        let inbox = Inbox::new();
        inbox.push(1);
        inbox.push(2);
        inbox.push(3);
        let consumer = inbox.consumer();
        assert_eq!(consumer.pop(), Some(1));
        assert_eq!(consumer.pop(), Some(2));
        assert_eq!(consumer.pop(), Some(3));
        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn many_producers_all_items_delivered() {
        let inbox = Arc::new(Inbox::<u64>::new());
        let mut handles = Vec::new();
        for p in 0..8u64 {
            let inbox = inbox.clone();
            handles.push(thread::spawn(move || {
                for i in 0..1000u64 {
                    inbox.push(p * 1000 + i);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let consumer = inbox.consumer();
        let mut count = 0;
        while consumer.pop().is_some() {
            count += 1;
        }
        assert_eq!(count, 8000);
    }

    #[test]
    fn per_producer_order_preserved() {
        let inbox = Arc::new(Inbox::<(u64, u64)>::new());
        let mut handles = Vec::new();
        for p in 0..4u64 {
            let inbox = inbox.clone();
            handles.push(thread::spawn(move || {
                for i in 0..200u64 {
                    inbox.push((p, i));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let consumer = inbox.consumer();
        let mut last_seen = [None; 4];
        while let Some((p, i)) = consumer.pop() {
            if let Some(last) = last_seen[p as usize] {
                assert!(i > last, "producer {} went backwards", p);
            }
            last_seen[p as usize] = Some(i);
        }
    }
}
