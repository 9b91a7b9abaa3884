use crate::cell::CellId;
use crate::{Guid, Position};

/// Visibility radius, in world units, within which a neighbor cell is
/// considered a candidate to host a ghost of an entity.
pub const GHOST_VISIBILITY_DISTANCE: f32 = 250.0;

/// A read-only point-in-time copy of an entity's observable state,
/// published by its owning cell into a neighbor's ghost table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GhostSnapshot {
    pub position: Position,
    pub health: u32,
    pub max_health: u32,
    pub display_id: u32,
    pub in_combat: bool,
    pub is_dead: bool,
    pub target_guid: Option<Guid>,
}

/// A non-authoritative mirror of an entity, hosted in a cell that is not
/// its owner. Only the cell manager may construct or mutate one — the
/// only public surface besides construction is read access, matching the
/// "expose getters but no setters external to sync" rule the owning cell
/// actor relies on.
#[derive(Debug, Clone)]
pub struct Ghost {
    guid: Guid,
    owner_cell: CellId,
    snapshot: GhostSnapshot,
}

impl Ghost {
    pub(crate) fn new(guid: Guid, owner_cell: CellId, snapshot: GhostSnapshot) -> Self {
        Ghost {
            guid,
            owner_cell,
            snapshot,
        }
    }

    pub fn guid(&self) -> Guid {
        self.guid
    }

    pub fn owner_cell(&self) -> CellId {
        self.owner_cell
    }

    pub fn snapshot(&self) -> &GhostSnapshot {
        &self.snapshot
    }

    pub(crate) fn sync_from_snapshot(&mut self, snapshot: GhostSnapshot) {
        self.snapshot = snapshot;
    }
}

/// Whether an entity at `pos` should be visible (and thus ghosted) from a
/// cell whose entities may be at `other`, given their phase masks.
pub fn is_visible(pos: &Position, other: &Position) -> bool {
    pos.distance(other) <= GHOST_VISIBILITY_DISTANCE && pos.shares_phase(other)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_requires_distance_and_shared_phase() {
        let a = Position { x: 0.0, y: 0.0, z: 0.0, orientation: 0.0, phase_mask: 1 };
        let near_same_phase = Position { x: 10.0, y: 0.0, z: 0.0, orientation: 0.0, phase_mask: 1 };
        let near_diff_phase = Position { x: 10.0, y: 0.0, z: 0.0, orientation: 0.0, phase_mask: 2 };
        let far_same_phase = Position { x: 1000.0, y: 0.0, z: 0.0, orientation: 0.0, phase_mask: 1 };

        assert!(is_visible(&a, &near_same_phase));
        assert!(!is_visible(&a, &near_diff_phase));
        assert!(!is_visible(&a, &far_same_phase));
    }
}
