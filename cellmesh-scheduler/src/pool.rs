use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use cellmesh_concurrent::{ConcurrentError, Deque, Inbox, InboxConsumer, StealOutcome};

use crate::backoff::Backoff;
use crate::error::SchedulerError;
use crate::task::{Task, TaskType};

thread_local! {
    static WORKER_INDEX: Cell<Option<usize>> = Cell::new(None);
}

struct PendingGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> Drop for PendingGuard<'a> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

struct WorkerSlot {
    deques: [Deque<Task>; TaskType::COUNT],
    inboxes: [Inbox<Task>; TaskType::COUNT],
}

/// Tuning knobs for [`WorkerPool::with_options`]. Defaults mirror the
/// constants the reference pool uses.
#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    pub deque_capacity: usize,
    pub backoff_spin_count: u32,
    pub backoff_yield_count: u32,
    pub backoff_sleep_micros: u64,
}

impl Default for PoolOptions {
    fn default() -> Self {
        PoolOptions {
            deque_capacity: Deque::<()>::DEFAULT_CAPACITY,
            backoff_spin_count: 64,
            backoff_yield_count: 4,
            backoff_sleep_micros: 1000,
        }
    }
}

/// A fixed-size pool of worker threads draining two independent typed
/// queues with work stealing and cooperative helping.
///
/// See the crate-level docs for the submission/dispatch contract.
pub struct WorkerPool {
    workers: Vec<WorkerSlot>,
    pending: [AtomicUsize; TaskType::COUNT],
    next_worker: AtomicUsize,
    shutdown: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
    options: PoolOptions,
}

impl WorkerPool {
    /// Builds and starts a pool with `num_workers` threads and default
    /// tuning.
    pub fn new(num_workers: usize) -> Result<Arc<Self>, SchedulerError> {
        Self::with_options(num_workers, PoolOptions::default())
    }

    /// Builds a pool sized to the machine's available parallelism.
    pub fn with_hardware_parallelism() -> Result<Arc<Self>, SchedulerError> {
        let n = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(n)
    }

    /// Builds and starts a pool with explicit tuning.
    pub fn with_options(
        num_workers: usize,
        options: PoolOptions,
    ) -> Result<Arc<Self>, SchedulerError> {
        if num_workers == 0 {
            return Err(SchedulerError::NoWorkers);
        }
        if !options.deque_capacity.is_power_of_two() {
            return Err(SchedulerError::BadCapacity(options.deque_capacity));
        }

        let mut workers = Vec::with_capacity(num_workers);
        for _ in 0..num_workers {
            workers.push(WorkerSlot {
                deques: [
                    Deque::with_capacity(options.deque_capacity),
                    Deque::with_capacity(options.deque_capacity),
                ],
                inboxes: [Inbox::new(), Inbox::new()],
            });
        }

        let pool = Arc::new(WorkerPool {
            workers,
            pending: [AtomicUsize::new(0), AtomicUsize::new(0)],
            next_worker: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            handles: Mutex::new(Vec::with_capacity(num_workers)),
            options,
        });

        let mut handles = Vec::with_capacity(num_workers);
        for i in 0..num_workers {
            let pool = pool.clone();
            handles.push(
                std::thread::Builder::new()
                    .name(format!("cellmesh-worker-{}", i))
                    .spawn(move || pool.worker_loop(i))
                    .expect("failed to spawn worker thread"),
            );
        }
        *pool.handles.lock() = handles;

        Ok(pool)
    }

    /// Number of worker threads in this pool.
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Current value of the pending-task counter for `task_type`.
    pub fn pending(&self, task_type: TaskType) -> usize {
        self.pending[task_type.index()].load(Ordering::Acquire)
    }

    /// Submits `task`, letting the pool round-robin the target worker.
    ///
    /// For [`TaskType::Cell`], must be called from a worker thread.
    pub fn submit(&self, task_type: TaskType, task: Task) -> Result<(), SchedulerError> {
        let worker = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        self.submit_to_worker(task_type, worker, task)
    }

    /// Submits `task` targeting worker `worker_index`.
    ///
    /// `Map` tasks land in that worker's inbox. `Cell` tasks ignore
    /// `worker_index` and instead land on the *caller's* own deque, so
    /// they are immediately stealable — this matches the reference pool's
    /// rationale that cell follow-up work should never wait behind a
    /// single owner's inbox.
    pub fn submit_to_worker(
        &self,
        task_type: TaskType,
        worker_index: usize,
        task: Task,
    ) -> Result<(), SchedulerError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Ok(());
        }
        if task_type == TaskType::Cell && WORKER_INDEX.with(|w| w.get()).is_none() {
            return Err(SchedulerError::NotAWorkerThread);
        }
        self.pending[task_type.index()].fetch_add(1, Ordering::Release);

        match task_type {
            TaskType::Cell => {
                let caller = WORKER_INDEX.with(|w| w.get()).expect("checked above");
                match self.workers[caller].deques[task_type.index()].push(task) {
                    Ok(()) => {}
                    Err(ConcurrentError::Full { item, .. }) => {
                        tracing::error!(
                            target: "cellmesh_scheduler::deque_full",
                            worker = caller,
                            "cell task deque full, falling back to inbox"
                        );
                        self.workers[worker_index].inboxes[task_type.index()].push(item);
                    }
                }
            }
            TaskType::Map => {
                self.workers[worker_index].inboxes[task_type.index()].push(task);
            }
        }
        Ok(())
    }

    /// Blocks (with escalating backoff) until every submission of
    /// `task_type` issued before this call has run to completion.
    pub fn wait(&self, task_type: TaskType) {
        let mut backoff = self.default_backoff();
        while self.pending[task_type.index()].load(Ordering::Acquire) > 0 {
            backoff.snooze();
        }
    }

    /// Steals and executes a single task of `task_type` from any worker's
    /// deque (never an inbox, since inboxes are single-consumer). Returns
    /// whether a task was found and run. Intended for a caller in
    /// [`WorkerPool::wait`] to help drain work instead of idling.
    pub fn try_execute_one(&self, task_type: TaskType) -> bool {
        for i in 0..self.workers.len() {
            match self.workers[i].deques[task_type.index()].steal() {
                StealOutcome::Stolen(task) => {
                    self.run_task(task_type, task);
                    return true;
                }
                StealOutcome::Empty | StealOutcome::Retry => continue,
            }
        }
        false
    }

    /// Signals shutdown, waits for all in-flight work to drain, and joins
    /// every worker thread. Idempotent: a second call is a no-op.
    pub fn shutdown(&self) {
        if self.shutdown.compare_exchange(
            false,
            true,
            Ordering::AcqRel,
            Ordering::Acquire,
        ).is_err() {
            return;
        }
        for t in TaskType::ALL {
            self.wait(t);
        }
        let handles = std::mem::take(&mut *self.handles.lock());
        for h in handles {
            let _ = h.join();
        }
    }

    fn default_backoff(&self) -> Backoff {
        Backoff::new(
            self.options.backoff_spin_count,
            self.options.backoff_yield_count,
            self.options.backoff_sleep_micros,
        )
    }

    fn run_task(&self, task_type: TaskType, task: Task) {
        let counter = &self.pending[task_type.index()];
        let _guard = PendingGuard { counter };
        if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)) {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "<non-string panic payload>".to_string());
            tracing::error!(
                target: "cellmesh_scheduler::task_panic",
                task_type = ?task_type,
                "worker task panicked: {}",
                message
            );
        }
    }

    fn try_execute_from_own_queues(
        &self,
        worker_index: usize,
        task_type: TaskType,
        inboxes: &[InboxConsumer<'_, Task>; TaskType::COUNT],
    ) -> bool {
        if let Some(task) = inboxes[task_type.index()].pop() {
            self.run_task(task_type, task);
            return true;
        }
        if let Some(task) = self.workers[worker_index].deques[task_type.index()].pop() {
            self.run_task(task_type, task);
            return true;
        }
        false
    }

    fn try_steal_for(&self, thief_index: usize, task_type: TaskType) -> bool {
        let n = self.workers.len();
        if n <= 1 {
            return false;
        }
        for offset in 1..n {
            let victim = (thief_index + offset) % n;
            match self.workers[victim].deques[task_type.index()].steal() {
                StealOutcome::Stolen(task) => {
                    self.run_task(task_type, task);
                    return true;
                }
                StealOutcome::Empty | StealOutcome::Retry => continue,
            }
        }
        false
    }

    fn worker_loop(&self, index: usize) {
        WORKER_INDEX.with(|w| w.set(Some(index)));
        let mut backoff = self.default_backoff();
        // Obtained once, for this thread's whole life: `InboxConsumer` is
        // `!Send`, so this is the only place a pop handle for this
        // worker's inboxes can come into existence.
        let inboxes: [InboxConsumer<'_, Task>; TaskType::COUNT] =
            std::array::from_fn(|i| self.workers[index].inboxes[i].consumer());

        while !self.shutdown.load(Ordering::Acquire) {
            let mut found = false;
            for t in TaskType::ALL {
                if self.try_execute_from_own_queues(index, t, &inboxes) {
                    found = true;
                    break;
                }
            }
            if !found {
                for t in TaskType::ALL {
                    if self.try_steal_for(index, t) {
                        found = true;
                        break;
                    }
                }
            }
            if found {
                backoff.reset();
            } else {
                backoff.snooze();
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // If `shutdown()` was already called, `handles` is empty and the
        // flag is already set; this just catches callers who drop the
        // pool without shutting it down explicitly.
        self.shutdown.store(true, Ordering::Release);
        let handles = std::mem::take(&mut *self.handles.lock());
        for h in handles {
            let _ = h.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn many_increments_all_land() {
        let pool = WorkerPool::new(8).unwrap();
        let counter = Arc::new(AtomicU64::new(0));
        for _ in 0..100_000 {
            let counter = counter.clone();
            pool.submit(
                TaskType::Map,
                Box::new(move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                }),
            )
            .unwrap();
        }
        pool.wait(TaskType::Map);
        assert_eq!(counter.load(Ordering::Relaxed), 100_000);
        pool.shutdown();
    }

    #[test]
    fn shutdown_drains_in_flight_tasks_exactly_once() {
        let pool = WorkerPool::new(4).unwrap();
        let counter = Arc::new(AtomicU64::new(0));
        for _ in 0..100 {
            let counter = counter.clone();
            pool.submit(
                TaskType::Map,
                Box::new(move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                }),
            )
            .unwrap();
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::Relaxed), 100);
        // Submissions after shutdown are no-ops, not errors.
        pool.submit(TaskType::Map, Box::new(|| {})).unwrap();
        assert_eq!(pool.pending(TaskType::Map), 0);
    }

    #[test]
    fn panicking_task_does_not_corrupt_pending_counter() {
        let pool = WorkerPool::new(2).unwrap();
        pool.submit(TaskType::Map, Box::new(|| panic!("boom")))
            .unwrap();
        pool.wait(TaskType::Map);
        assert_eq!(pool.pending(TaskType::Map), 0);
        pool.shutdown();
    }

    #[test]
    fn cell_tasks_require_a_worker_thread() {
        let pool = WorkerPool::new(2).unwrap();
        let err = pool.submit(TaskType::Cell, Box::new(|| {})).unwrap_err();
        assert!(matches!(err, SchedulerError::NotAWorkerThread));
        pool.shutdown();
    }
}
