/// Errors surfaced by [`crate::CellManager`] construction and operation.
#[derive(thiserror::Error, Debug)]
pub enum WorldError {
    #[error("entity {0} is not registered with any cell")]
    UnknownEntity(crate::Guid),
    #[error("a migration is already in flight for entity {0}")]
    MigrationInFlight(crate::Guid),
    #[error("num_shards must be a nonzero power of two, got {0}")]
    InvalidShardCount(usize),
    #[error(transparent)]
    Scheduler(#[from] cellmesh_scheduler::SchedulerError),
}
