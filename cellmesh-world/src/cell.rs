use cellmesh_concurrent::{Inbox, InboxConsumer};
use fxhash::FxHashMap;

use crate::ghost::Ghost;
use crate::message::Message;
use crate::Guid;

/// Side length, in world units, of a single grid cell.
pub const CELL_SIZE: f32 = 66.666_6;
/// World-coordinate offset that centers cell (0, 0) on the map origin.
pub const CENTER_CELL_OFFSET: f32 = 256.0;

/// A packed `(cx, cy)` grid coordinate, stored as `cy << 16 | cx`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CellId(pub u32);

impl CellId {
    pub fn from_coords(cx: u16, cy: u16) -> Self {
        CellId(((cy as u32) << 16) | cx as u32)
    }

    pub fn coords(self) -> (u16, u16) {
        ((self.0 & 0xFFFF) as u16, (self.0 >> 16) as u16)
    }

    /// Maps a world-space `(x, y)` to the cell that owns it.
    pub fn for_position(x: f32, y: f32) -> Self {
        let cx = ((CENTER_CELL_OFFSET - (x / CELL_SIZE)).floor()) as i64;
        let cy = ((CENTER_CELL_OFFSET - (y / CELL_SIZE)).floor()) as i64;
        CellId::from_coords(cx.max(0) as u16, cy.max(0) as u16)
    }
}

/// The eight directions a cell may have a neighbor in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    North,
    South,
    East,
    West,
    NorthEast,
    NorthWest,
    SouthEast,
    SouthWest,
}

impl Direction {
    pub const ALL: [Direction; 8] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
        Direction::NorthEast,
        Direction::NorthWest,
        Direction::SouthEast,
        Direction::SouthWest,
    ];
}

/// Returns the neighbor of `id` in `direction`, or `None` if that would
/// underflow the grid.
pub fn neighbor_cell_id(id: CellId, direction: Direction) -> Option<CellId> {
    let (cx, cy) = id.coords();
    let (dx, dy): (i32, i32) = match direction {
        Direction::North => (0, -1),
        Direction::South => (0, 1),
        Direction::East => (1, 0),
        Direction::West => (-1, 0),
        Direction::NorthEast => (1, -1),
        Direction::NorthWest => (-1, -1),
        Direction::SouthEast => (1, 1),
        Direction::SouthWest => (-1, 1),
    };
    let nx = cx as i32 + dx;
    let ny = cy as i32 + dy;
    if nx < 0 || ny < 0 || nx > u16::MAX as i32 || ny > u16::MAX as i32 {
        None
    } else {
        Some(CellId::from_coords(nx as u16, ny as u16))
    }
}

/// An exclusive-writer partition of the world. Exactly one worker at a
/// time may iterate `entities` or mutate `ghosts` for a given cell within
/// a tick — the scheduler upholds this by never submitting two `Map` tasks
/// for the same cell concurrently.
pub struct Cell {
    id: CellId,
    entities: Vec<Guid>,
    ghosts: FxHashMap<Guid, Ghost>,
    inbox: Inbox<Message>,
}

impl Cell {
    pub fn new(id: CellId) -> Self {
        Cell {
            id,
            entities: Vec::new(),
            ghosts: FxHashMap::default(),
            inbox: Inbox::new(),
        }
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    pub fn entities(&self) -> &[Guid] {
        &self.entities
    }

    pub fn add_entity(&mut self, guid: Guid) {
        if !self.entities.contains(&guid) {
            self.entities.push(guid);
        }
    }

    pub fn remove_entity(&mut self, guid: Guid) -> bool {
        if let Some(pos) = self.entities.iter().position(|g| *g == guid) {
            self.entities.swap_remove(pos);
            true
        } else {
            false
        }
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn ghost_count(&self) -> usize {
        self.ghosts.len()
    }

    pub fn ghost(&self, guid: Guid) -> Option<&Ghost> {
        self.ghosts.get(&guid)
    }

    pub fn ghost_mut(&mut self, guid: Guid) -> Option<&mut Ghost> {
        self.ghosts.get_mut(&guid)
    }

    pub fn ghosts(&self) -> impl Iterator<Item = &Ghost> {
        self.ghosts.values()
    }

    pub fn put_ghost(&mut self, ghost: Ghost) {
        self.ghosts.insert(ghost.guid(), ghost);
    }

    pub fn remove_ghost(&mut self, guid: Guid) -> Option<Ghost> {
        self.ghosts.remove(&guid)
    }

    pub fn send(&self, msg: Message) {
        self.inbox.push(msg);
    }

    /// Drains one message. Only ever called by the single worker currently
    /// holding this cell's lock, so a fresh [`InboxConsumer`] per call is
    /// as exclusive as a cached one would be.
    pub fn pop_message(&self) -> Option<Message> {
        self.consumer().pop()
    }

    pub fn has_work(&self) -> bool {
        !self.entities.is_empty() || !self.consumer().is_empty()
    }

    fn consumer(&self) -> InboxConsumer<'_, Message> {
        self.inbox.consumer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_id_packs_and_unpacks() {
        let id = CellId::from_coords(12, 34);
        assert_eq!(id.coords(), (12, 34));
    }

    #[test]
    fn neighbor_directions_are_symmetric() {
        let center = CellId::from_coords(10, 10);
        let north = neighbor_cell_id(center, Direction::North).unwrap();
        let back = neighbor_cell_id(north, Direction::South).unwrap();
        assert_eq!(back, center);
    }

    #[test]
    fn add_entity_is_idempotent() {
        let mut cell = Cell::new(CellId::from_coords(0, 0));
        cell.add_entity(1);
        cell.add_entity(1);
        assert_eq!(cell.entity_count(), 1);
        assert!(cell.remove_entity(1));
        assert_eq!(cell.entity_count(), 0);
    }
}
