use std::sync::Arc;
use std::time::Duration;

use cellmesh_scheduler::WorkerPool;
use cellmesh_world::CellManager;
use parking_lot::Mutex;

use crate::session::{NullSessionWorkload, SessionPool, SessionWorkload};

/// Drives one tick of a [`CellManager`] against a [`WorkerPool`]: a
/// sequential preamble (session updates, migration timeouts), a parallel
/// entity-update phase, a barrier, and sequential finalization.
///
/// Generic over the session workload so a caller with no session state
/// (the common case for embedding tests and headless simulation) can use
/// [`TickOrchestrator::new`] without naming a [`SessionWorkload`] at all;
/// [`TickOrchestrator::with_session_pool`] switches in real session
/// handling.
///
/// This is the composition root for the per-tick update loop; callers own
/// the tick clock and decide when to call [`Self::run_tick`].
pub struct TickOrchestrator<SW: SessionWorkload = NullSessionWorkload> {
    manager: Arc<CellManager>,
    pool: Arc<WorkerPool>,
    session_pool: Option<SessionPool<SW>>,
    sessions: Mutex<Vec<SW::Session>>,
}

impl<SW: SessionWorkload> TickOrchestrator<SW> {
    pub fn new(manager: Arc<CellManager>, pool: Arc<WorkerPool>) -> Self {
        TickOrchestrator {
            manager,
            pool,
            session_pool: None,
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Attaches a [`SessionPool`]: from the next [`Self::run_tick`]
    /// onward, the sequential preamble drains the previous tick's
    /// sessions through it before touching the world.
    pub fn with_session_pool(mut self, session_pool: SessionPool<SW>) -> Self {
        self.session_pool = Some(session_pool);
        self
    }

    pub fn manager(&self) -> &Arc<CellManager> {
        &self.manager
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Adds a session to be driven by the attached [`SessionPool`] from
    /// the next tick onward. A no-op if no session pool is attached.
    pub fn add_session(&self, session: SW::Session) {
        self.sessions.lock().push(session);
    }

    /// The number of sessions awaiting their next update.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Runs one full tick:
    ///
    /// 1. sequential preamble — drain the session pool's prior-tick
    ///    sessions, then abort timed-out migrations
    /// 2. parallel phase — one `Map` task per cell batch, entities updated
    ///    concurrently across cells
    /// 3. barrier — wait for every batch and any `Cell` tasks it spawned
    /// 4. sequential finalization — workload-defined end-of-tick hook
    pub fn run_tick(&self, dt: Duration) {
        let _span = tracing::trace_span!("tick", dt_ms = dt.as_millis() as u64).entered();

        if let Some(session_pool) = &self.session_pool {
            tracing::trace!(target: "cellmesh_sim::tick", "session preamble");
            let pending = std::mem::take(&mut *self.sessions.lock());
            let survivors = session_pool.run_tick(pending, dt.as_secs_f32());
            *self.sessions.lock() = survivors;
        }

        tracing::trace!(target: "cellmesh_sim::tick", "preamble");
        self.manager.update_migrations(dt);

        tracing::trace!(target: "cellmesh_sim::tick", "parallel phase");
        self.manager.run_parallel_phase(&self.pool, dt);

        tracing::trace!(target: "cellmesh_sim::tick", "finalize");
        self.manager.run_tick_finalize(dt);
    }

    /// Runs `tick_count` ticks back to back with a fixed `dt`, useful for
    /// warmup or deterministic batch simulation outside of a wall-clock
    /// loop.
    pub fn run_ticks(&self, tick_count: usize, dt: Duration) {
        for _ in 0..tick_count {
            self.run_tick(dt);
        }
    }

    /// Shuts down the underlying worker pool(s). The orchestrator is
    /// unusable after this call.
    pub fn shutdown(&self) {
        if let Some(session_pool) = &self.session_pool {
            session_pool.pool().shutdown();
        }
        self.pool.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellmesh_world::{CellContext, FinalizeContext, Message, Position, Workload};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingWorkload {
        updates: AtomicUsize,
        finalizes: AtomicUsize,
    }

    impl Workload for CountingWorkload {
        fn on_entity_update(&self, _ctx: &CellContext<'_>, _guid: u64, _dt: Duration) {
            self.updates.fetch_add(1, Ordering::Relaxed);
        }

        fn on_message(&self, _ctx: &CellContext<'_>, _msg: &Message) {}

        fn on_tick_finalize(&self, _ctx: &FinalizeContext<'_>) {
            self.finalizes.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn a_tick_updates_every_registered_entity_and_finalizes_once() {
        let workload = Arc::new(CountingWorkload {
            updates: AtomicUsize::new(0),
            finalizes: AtomicUsize::new(0),
        });
        let manager = CellManager::new(workload.clone());
        let pool = WorkerPool::new(4).unwrap();

        for guid in 0..50u64 {
            manager.register_entity(
                guid,
                Position {
                    x: guid as f32,
                    y: 0.0,
                    z: 0.0,
                    orientation: 0.0,
                    phase_mask: 1,
                },
            );
        }

        let orchestrator = TickOrchestrator::<NullSessionWorkload>::new(manager, pool.clone());
        orchestrator.run_tick(Duration::from_millis(33));

        assert_eq!(workload.updates.load(Ordering::Relaxed), 50);
        assert_eq!(workload.finalizes.load(Ordering::Relaxed), 1);

        orchestrator.shutdown();
    }

    #[test]
    fn run_ticks_finalizes_once_per_tick() {
        let workload = Arc::new(CountingWorkload {
            updates: AtomicUsize::new(0),
            finalizes: AtomicUsize::new(0),
        });
        let manager = CellManager::new(workload.clone());
        let pool = WorkerPool::new(2).unwrap();
        let orchestrator = TickOrchestrator::<NullSessionWorkload>::new(manager, pool.clone());

        orchestrator.run_ticks(5, Duration::from_millis(16));

        assert_eq!(workload.finalizes.load(Ordering::Relaxed), 5);
        orchestrator.shutdown();
    }

    struct IncrementingSessionWorkload;

    impl SessionWorkload for IncrementingSessionWorkload {
        type Session = u32;

        fn update_session(&self, session: &mut u32, _dt: f32) -> bool {
            *session += 1;
            true
        }
    }

    #[test]
    fn session_preamble_runs_before_the_parallel_phase_each_tick() {
        let workload = Arc::new(CountingWorkload {
            updates: AtomicUsize::new(0),
            finalizes: AtomicUsize::new(0),
        });
        let manager = CellManager::new(workload);
        let world_pool = WorkerPool::new(2).unwrap();
        let session_worker_pool = WorkerPool::new(1).unwrap();
        let session_pool = SessionPool::new(IncrementingSessionWorkload, session_worker_pool);

        let orchestrator =
            TickOrchestrator::new(manager, world_pool).with_session_pool(session_pool);
        orchestrator.add_session(0);
        assert_eq!(orchestrator.session_count(), 1);

        orchestrator.run_tick(Duration::from_millis(16));
        orchestrator.run_tick(Duration::from_millis(16));

        assert_eq!(orchestrator.session_count(), 1);
        orchestrator.shutdown();
    }
}
