//! `cellmesh` assembles the four subsystem crates — [`cellmesh_concurrent`],
//! [`cellmesh_scheduler`], [`cellmesh_world`], and [`cellmesh_sim`] — into a
//! single [`Runtime`] facade: one call to build a tick-driven, cell-
//! partitioned world update loop with sane defaults, and re-exports of
//! every public type beneath it for callers who want finer control.

use std::sync::Arc;
use std::time::Duration;

pub use cellmesh_concurrent::{ConcurrentError, Deque, Inbox, InboxConsumer, StealOutcome, StripedMap};
pub use cellmesh_scheduler::{Backoff, PoolOptions, SchedulerError, Task, TaskType, WorkerPool};
pub use cellmesh_sim::{
    AdmissionFilter, AdmissionOptions, NullSessionWorkload, RuntimeConfig, SessionPool,
    SessionUpdateResult, SessionWorkload, TickOrchestrator,
};
pub use cellmesh_world::{
    Cell, CellContext, CellId, CellManager, CellManagerOptions, FinalizeContext, Ghost,
    GhostSnapshot, Guid, Message, MessageKind, MessagePayload, MigrationSnapshot, MigrationState,
    PerformanceStats, Position, Workload, WorldError,
};

/// Errors that can surface while assembling or driving a [`Runtime`].
#[derive(thiserror::Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    World(#[from] WorldError),
}

/// A fully wired parallel world update runtime: a [`WorkerPool`], a
/// [`CellManager`] bound to a caller-supplied [`Workload`], and a
/// [`TickOrchestrator`] to drive them together.
///
/// Generic over the session workload for the same reason
/// [`TickOrchestrator`] is: a runtime with no session bookkeeping (the
/// common embedding case) never has to name a [`SessionWorkload`].
/// [`Runtime::with_session_workload`] opts into a second, session-only
/// worker pool driven each tick's preamble.
///
/// This is the entry point most embedders want; for anything more bespoke
/// build the pieces directly from the re-exported subsystem crates
/// instead.
pub struct Runtime<SW: SessionWorkload = NullSessionWorkload> {
    orchestrator: TickOrchestrator<SW>,
    admission: AdmissionFilter,
    config: RuntimeConfig,
}

impl Runtime<NullSessionWorkload> {
    /// Builds a runtime with default configuration: one worker per
    /// available hardware thread, 64 map-shards, a 5 second migration
    /// timeout, and admission filtering enabled at conservative defaults.
    pub fn new(workload: Arc<dyn Workload>) -> Result<Self, RuntimeError> {
        Self::with_config(workload, RuntimeConfig::default())
    }

    /// Builds a runtime from an explicit [`RuntimeConfig`], with no
    /// session pool attached.
    pub fn with_config(
        workload: Arc<dyn Workload>,
        config: RuntimeConfig,
    ) -> Result<Self, RuntimeError> {
        let pool = WorkerPool::with_options(config.num_workers, config.scheduler_options())?;
        let manager = CellManager::with_options(workload, config.cell_manager_options())?;
        let orchestrator = TickOrchestrator::new(manager, pool);
        let admission = AdmissionFilter::new(config.admission_options());
        Ok(Runtime {
            orchestrator,
            admission,
            config,
        })
    }
}

impl<SW: SessionWorkload> Runtime<SW> {
    /// Builds a runtime with a session pool attached: a second
    /// [`WorkerPool`], sized by [`RuntimeConfig::session_workers`], drives
    /// `session_workload` each tick's preamble ahead of the parallel
    /// entity-update phase.
    pub fn with_session_workload(
        workload: Arc<dyn Workload>,
        config: RuntimeConfig,
        session_workload: SW,
    ) -> Result<Self, RuntimeError> {
        let pool = WorkerPool::with_options(config.num_workers, config.scheduler_options())?;
        let session_worker_pool =
            WorkerPool::with_options(config.session_workers, config.scheduler_options())?;
        let manager = CellManager::with_options(workload, config.cell_manager_options())?;
        let session_pool = SessionPool::new(session_workload, session_worker_pool);
        let orchestrator = TickOrchestrator::new(manager, pool).with_session_pool(session_pool);
        let admission = AdmissionFilter::new(config.admission_options());
        Ok(Runtime {
            orchestrator,
            admission,
            config,
        })
    }

    /// The cell manager backing this runtime.
    pub fn world(&self) -> &Arc<CellManager> {
        self.orchestrator.manager()
    }

    /// The worker pool backing this runtime.
    pub fn pool(&self) -> &Arc<WorkerPool> {
        self.orchestrator.pool()
    }

    /// The admission filter gating new session/connection registration.
    pub fn admission(&self) -> &AdmissionFilter {
        &self.admission
    }

    /// The configuration this runtime was built with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Registers a session to be driven by the attached session pool from
    /// the next tick onward. A no-op if no session pool is attached.
    pub fn add_session(&self, session: SW::Session) {
        self.orchestrator.add_session(session);
    }

    /// The number of sessions awaiting their next update.
    pub fn session_count(&self) -> usize {
        self.orchestrator.session_count()
    }

    /// Runs one tick: session preamble (if a session pool is attached),
    /// migration-timeout preamble, parallel cell updates, sequential
    /// finalization.
    pub fn tick(&self, dt: Duration) {
        self.orchestrator.run_tick(dt);
    }

    /// Shuts down the worker pool(s). The runtime is unusable after this
    /// call.
    pub fn shutdown(&self) {
        self.orchestrator.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoopWorkload {
        ticks: AtomicUsize,
    }

    impl Workload for NoopWorkload {
        fn on_entity_update(&self, _ctx: &CellContext<'_>, _entity: Guid, _dt: Duration) {}
        fn on_message(&self, _ctx: &CellContext<'_>, _msg: &Message) {}
        fn on_tick_finalize(&self, _ctx: &FinalizeContext<'_>) {
            self.ticks.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn a_runtime_ticks_and_shuts_down_cleanly() {
        let workload = Arc::new(NoopWorkload {
            ticks: AtomicUsize::new(0),
        });
        let mut config = RuntimeConfig::default();
        config.num_workers = 2;
        let runtime = Runtime::with_config(workload.clone(), config).unwrap();

        runtime.world().register_entity(
            1,
            Position {
                x: 0.0,
                y: 0.0,
                z: 0.0,
                orientation: 0.0,
                phase_mask: 1,
            },
        );
        runtime.tick(Duration::from_millis(16));

        assert_eq!(workload.ticks.load(Ordering::Relaxed), 1);
        runtime.shutdown();
    }

    #[test]
    fn admission_filter_rejects_over_the_configured_cap() {
        let workload = Arc::new(NoopWorkload {
            ticks: AtomicUsize::new(0),
        });
        let mut config = RuntimeConfig::default();
        config.num_workers = 1;
        config.admission_max_per_source = 1;
        let runtime = Runtime::with_config(workload, config).unwrap();

        let source = std::net::IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, 1));
        assert!(!runtime.admission().should_reject(source));
        assert!(runtime.admission().should_reject(source));

        runtime.shutdown();
    }

    #[test]
    fn an_invalid_shard_count_is_rejected_synchronously() {
        let workload = Arc::new(NoopWorkload {
            ticks: AtomicUsize::new(0),
        });
        let mut config = RuntimeConfig::default();
        config.num_shards = 3;
        let result = Runtime::with_config(workload, config);
        assert!(matches!(result, Err(RuntimeError::World(WorldError::InvalidShardCount(3)))));
    }

    struct EchoSessionWorkload;

    impl SessionWorkload for EchoSessionWorkload {
        type Session = u32;

        fn update_session(&self, session: &mut u32, _dt: f32) -> bool {
            *session += 1;
            *session < 2
        }
    }

    #[test]
    fn a_runtime_with_a_session_workload_drains_sessions_across_ticks() {
        let workload = Arc::new(NoopWorkload {
            ticks: AtomicUsize::new(0),
        });
        let mut config = RuntimeConfig::default();
        config.num_workers = 1;
        config.session_workers = 1;
        let runtime =
            Runtime::with_session_workload(workload, config, EchoSessionWorkload).unwrap();

        runtime.add_session(0);
        assert_eq!(runtime.session_count(), 1);

        runtime.tick(Duration::from_millis(16));
        assert_eq!(runtime.session_count(), 1);

        runtime.tick(Duration::from_millis(16));
        assert_eq!(runtime.session_count(), 0);

        runtime.shutdown();
    }
}
