use std::sync::Arc;

use cellmesh_scheduler::WorkerPool;
use crossbeam_channel::{unbounded, Receiver, Sender};

/// A per-session unit of work, distinct from cell/map updates: the session
/// pool is a secondary worker pool so that slow per-session bookkeeping
/// (packet decoding, auth handshakes, idle-timeout checks) never steals
/// cycles from the cell-partitioned map workers.
pub trait SessionWorkload: Send + Sync + 'static {
    type Session: Send + 'static;

    /// Advances one session by `dt` seconds.
    ///
    /// Returning `false` requests removal from the pool after this tick.
    fn update_session(&self, session: &mut Self::Session, dt: f32) -> bool;
}

/// The outcome of updating a single session during one tick.
pub struct SessionUpdateResult<S> {
    pub session: S,
    pub keep_session: bool,
}

/// The `SessionWorkload` used when a [`crate::TickOrchestrator`] is built
/// without session management. Its `Session` type is uninhabited-in-
/// practice (`()`, never constructed) since nothing ever calls
/// [`TickOrchestrator::add_session`] for it, so `update_session` is
/// unreachable in practice.
pub struct NullSessionWorkload;

impl SessionWorkload for NullSessionWorkload {
    type Session = ();

    fn update_session(&self, _session: &mut (), _dt: f32) -> bool {
        false
    }
}

/// A fixed-size pool of sessions driven by a [`WorkerPool`], with results
/// drained back on the calling thread rather than mutating shared state
/// from worker threads.
pub struct SessionPool<W: SessionWorkload> {
    workload: Arc<W>,
    pool: Arc<WorkerPool>,
    sender: Sender<SessionUpdateResult<W::Session>>,
    receiver: Receiver<SessionUpdateResult<W::Session>>,
}

impl<W: SessionWorkload> SessionPool<W> {
    pub fn new(workload: W, pool: Arc<WorkerPool>) -> Self {
        let (sender, receiver) = unbounded();
        SessionPool {
            workload: Arc::new(workload),
            pool,
            sender,
            receiver,
        }
    }

    /// The worker pool sessions are scheduled onto, separate from the
    /// cell/map [`WorkerPool`] so session bookkeeping never competes with
    /// entity updates for workers.
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Submits every session in `sessions` for a `dt`-second update,
    /// draining previously-collected results first so callers never see a
    /// mix of two ticks' worth of results in one [`Self::collect_results`]
    /// call.
    pub fn schedule_update(&self, sessions: Vec<W::Session>, dt: f32) {
        for session in sessions {
            let workload = self.workload.clone();
            let sender = self.sender.clone();
            self.pool
                .submit(
                    cellmesh_scheduler::TaskType::Map,
                    Box::new(move || {
                        let mut session = session;
                        let keep_session = workload.update_session(&mut session, dt);
                        let _ = sender.send(SessionUpdateResult {
                            session,
                            keep_session,
                        });
                    }),
                )
                .expect("submitting a Map task never requires a worker thread");
        }
    }

    /// Blocks until every submitted session update for this tick has
    /// completed.
    pub fn wait(&self) {
        self.pool.wait(cellmesh_scheduler::TaskType::Map);
    }

    /// Drains all results produced since the last call. Call after
    /// [`Self::wait`] to retrieve updated sessions and the ones that asked
    /// to be dropped.
    pub fn collect_results(&self) -> Vec<SessionUpdateResult<W::Session>> {
        self.receiver.try_iter().collect()
    }

    /// Convenience wrapper: schedules, waits, and returns only the
    /// sessions that asked to be kept.
    pub fn run_tick(&self, sessions: Vec<W::Session>, dt: f32) -> Vec<W::Session> {
        self.schedule_update(sessions, dt);
        self.wait();
        self.collect_results()
            .into_iter()
            .filter(|r| r.keep_session)
            .map(|r| r.session)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingWorkload {
        updates: AtomicUsize,
    }

    impl SessionWorkload for CountingWorkload {
        type Session = u32;

        fn update_session(&self, session: &mut u32, _dt: f32) -> bool {
            self.updates.fetch_add(1, Ordering::Relaxed);
            *session += 1;
            *session < 3
        }
    }

    #[test]
    fn sessions_past_their_threshold_are_dropped() {
        let pool = WorkerPool::new(4).unwrap();
        let session_pool = SessionPool::new(
            CountingWorkload {
                updates: AtomicUsize::new(0),
            },
            pool.clone(),
        );

        let sessions: Vec<u32> = vec![0, 1, 2];
        let kept = session_pool.run_tick(sessions, 1.0 / 30.0);

        assert!(kept.iter().all(|s| *s < 3));
        assert!(kept.len() <= 3);
        pool.shutdown();
    }

    #[test]
    fn results_from_one_tick_do_not_leak_into_the_next() {
        let pool = WorkerPool::new(2).unwrap();
        let session_pool = SessionPool::new(
            CountingWorkload {
                updates: AtomicUsize::new(0),
            },
            pool.clone(),
        );

        let first = session_pool.run_tick(vec![0], 1.0 / 30.0);
        assert_eq!(first, vec![1]);
        let second_results = session_pool.collect_results();
        assert!(second_results.is_empty());
        pool.shutdown();
    }
}
