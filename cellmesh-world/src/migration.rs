use std::time::Instant;

use crate::cell::CellId;
use crate::message::Message;
use crate::{Guid, Position};

/// Default time an in-flight migration may remain `Pending`/`Transferring`
/// before it is aborted and the entity stays with its original owner.
pub const MIGRATION_TIMEOUT_MS: u64 = 5000;

/// Where a migrating entity is in the handoff protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    Idle,
    Pending,
    Transferring,
    Completing,
}

/// Enough state to reconstruct an entity on its new owning cell.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct MigrationSnapshot {
    pub guid: Guid,
    pub position: Position,
    pub health: u32,
    pub max_health: u32,
    pub power: u32,
    pub max_power: u32,
    pub display_id: u32,
    pub in_combat: bool,
    pub is_dead: bool,
    pub target_guid: Option<Guid>,
}

/// Bookkeeping the cell manager keeps for one in-flight migration.
pub(crate) struct EntityMigrationInfo {
    pub old_cell: CellId,
    pub new_cell: CellId,
    pub state: MigrationState,
    pub started_at: Instant,
    pub buffered_messages: Vec<Message>,
    pub snapshot: MigrationSnapshot,
    pub migration_id: u64,
}

impl EntityMigrationInfo {
    pub fn new(
        old_cell: CellId,
        new_cell: CellId,
        snapshot: MigrationSnapshot,
        migration_id: u64,
    ) -> Self {
        EntityMigrationInfo {
            old_cell,
            new_cell,
            state: MigrationState::Pending,
            started_at: Instant::now(),
            buffered_messages: Vec::new(),
            snapshot,
            migration_id,
        }
    }

    pub fn is_timed_out(&self, timeout: std::time::Duration) -> bool {
        self.started_at.elapsed() >= timeout
    }
}
