use std::time::Duration;

use crate::cell::CellId;
use crate::manager::CellManager;
use crate::message::Message;
use crate::Guid;

/// Handed to [`Workload`] callbacks while a cell's tick is running.
/// Scoped to the single cell currently being processed: the only
/// cross-cell effect a callback may have is sending a message through
/// [`CellContext::send`].
pub struct CellContext<'a> {
    manager: &'a CellManager,
    cell_id: CellId,
}

impl<'a> CellContext<'a> {
    pub(crate) fn new(manager: &'a CellManager, cell_id: CellId) -> Self {
        CellContext { manager, cell_id }
    }

    pub fn cell_id(&self) -> CellId {
        self.cell_id
    }

    /// Sends `msg` to whatever cell it is addressed to (may be a
    /// different cell than the one currently being processed).
    pub fn send(&self, msg: Message) {
        self.manager.route_message(msg);
    }

    /// Read-only access to the owning manager, for lookups that don't
    /// mutate state (e.g. resolving another entity's home cell).
    pub fn manager(&self) -> &CellManager {
        self.manager
    }
}

/// Handed to [`Workload::on_tick_finalize`] after the parallel phase has
/// fully drained.
pub struct FinalizeContext<'a> {
    manager: &'a CellManager,
    dt: Duration,
}

impl<'a> FinalizeContext<'a> {
    pub(crate) fn new(manager: &'a CellManager, dt: Duration) -> Self {
        FinalizeContext { manager, dt }
    }

    pub fn manager(&self) -> &CellManager {
        self.manager
    }

    pub fn dt(&self) -> Duration {
        self.dt
    }
}

/// The content-defined behavior the runtime drives each tick. Entity and
/// message semantics (combat math, AI, scripts) live entirely behind this
/// trait; the runtime only knows how to schedule calls to it safely.
pub trait Workload: Send + Sync {
    /// Called once per resident entity, per tick, on the worker currently
    /// owning that entity's cell.
    fn on_entity_update(&self, ctx: &CellContext<'_>, entity: Guid, dt: Duration);

    /// Called once per inbox message drained from a cell.
    fn on_message(&self, ctx: &CellContext<'_>, msg: &Message);

    /// Called once per tick, sequentially, after the parallel phase has
    /// fully drained. Default no-op.
    fn on_tick_finalize(&self, _ctx: &FinalizeContext<'_>) {}
}
