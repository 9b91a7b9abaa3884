use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cellmesh_concurrent::StripedMap;
use cellmesh_scheduler::{TaskType, WorkerPool};
use fxhash::FxHashMap;
use parking_lot::Mutex;

use crate::cell::{neighbor_cell_id, Cell, CellId, Direction, CELL_SIZE};
use crate::error::WorldError;
use crate::ghost::{is_visible, Ghost, GhostSnapshot};
use crate::message::{
    Message, MessageKind, MessagePayload, MigrationCompletePayload, MigrationForwardPayload,
};
use crate::migration::{EntityMigrationInfo, MigrationSnapshot, MigrationState, MIGRATION_TIMEOUT_MS};
use crate::stats::PerformanceStats;
use crate::workload::{CellContext, FinalizeContext, Workload};
use crate::{Guid, Position};

/// Default shard count for a [`CellManager`]'s cell and entity-location
/// tables, matching [`StripedMap`]'s own default.
pub const DEFAULT_SHARDS: usize = 64;

/// Tuning knobs for a [`CellManager`].
#[derive(Debug, Clone, Copy)]
pub struct CellManagerOptions {
    pub migration_timeout: Duration,
    pub batches_per_worker: usize,
    pub min_batch_entities: usize,
    pub max_batch_entities: usize,
    /// Number of independent shards backing the cell and entity-location
    /// tables. Must be a nonzero power of two.
    pub num_shards: usize,
}

impl Default for CellManagerOptions {
    fn default() -> Self {
        CellManagerOptions {
            migration_timeout: Duration::from_millis(MIGRATION_TIMEOUT_MS),
            batches_per_worker: 12,
            min_batch_entities: 100,
            max_batch_entities: 1000,
            num_shards: DEFAULT_SHARDS,
        }
    }
}

#[derive(Clone, Copy)]
struct EntityRecord {
    cell_id: CellId,
    position: Position,
}

/// Owns the set of [`Cell`]s for one map, routes messages between them,
/// drives the ghost protocol, and runs the entity migration state machine.
///
/// Created once per map and shared behind an `Arc` with the tick
/// orchestrator and every `Map`/`Cell` task it submits.
pub struct CellManager {
    cells: StripedMap<CellId, Arc<Mutex<Cell>>>,
    entity_locations: StripedMap<Guid, EntityRecord>,
    migrations: Mutex<FxHashMap<Guid, EntityMigrationInfo>>,
    next_migration_id: AtomicU64,
    pending_cell_updates: AtomicUsize,
    stats: PerformanceStats,
    options: CellManagerOptions,
    workload: Arc<dyn Workload>,
}

impl CellManager {
    /// Builds a manager with default options (`num_shards` defaults to
    /// [`DEFAULT_SHARDS`], always valid), so this never fails.
    pub fn new(workload: Arc<dyn Workload>) -> Arc<Self> {
        Self::with_options(workload, CellManagerOptions::default())
            .expect("default CellManagerOptions are always valid")
    }

    pub fn with_options(
        workload: Arc<dyn Workload>,
        options: CellManagerOptions,
    ) -> Result<Arc<Self>, WorldError> {
        if options.num_shards == 0 || !options.num_shards.is_power_of_two() {
            return Err(WorldError::InvalidShardCount(options.num_shards));
        }
        Ok(Arc::new(CellManager {
            cells: StripedMap::with_shards(options.num_shards),
            entity_locations: StripedMap::with_shards(options.num_shards),
            migrations: Mutex::new(FxHashMap::default()),
            next_migration_id: AtomicU64::new(1),
            pending_cell_updates: AtomicUsize::new(0),
            stats: PerformanceStats::default(),
            options,
            workload,
        }))
    }

    pub fn stats(&self) -> &PerformanceStats {
        &self.stats
    }

    fn get_or_create_cell(&self, id: CellId) -> Arc<Mutex<Cell>> {
        if let Some(cell) = self.cells.find(&id) {
            return cell;
        }
        self.cells
            .get_or_insert(id, Arc::new(Mutex::new(Cell::new(id))))
    }

    fn existing_cell(&self, id: CellId) -> Option<Arc<Mutex<Cell>>> {
        self.cells.find(&id)
    }

    /// Registers a brand new entity at `position`, creating its home cell
    /// if this is the first resident it has ever had.
    pub fn register_entity(&self, guid: Guid, position: Position) -> CellId {
        let cell_id = CellId::for_position(position.x, position.y);
        let cell = self.get_or_create_cell(cell_id);
        cell.lock().add_entity(guid);
        self.entity_locations
            .insert_or_assign(guid, EntityRecord { cell_id, position });
        cell_id
    }

    /// Removes an entity from the world entirely (not a migration).
    pub fn unregister_entity(&self, guid: Guid) {
        if let Some(record) = self.entity_locations.find(&guid) {
            self.entity_locations.remove(&guid);
            if let Some(cell) = self.existing_cell(record.cell_id) {
                cell.lock().remove_entity(guid);
            }
        }
        self.migrations.lock().remove(&guid);
    }

    pub fn cell_id_for_entity(&self, guid: Guid) -> Option<CellId> {
        self.entity_locations.find(&guid).map(|r| r.cell_id)
    }

    pub fn are_in_same_cell(&self, a: Guid, b: Guid) -> bool {
        match (self.entity_locations.find(&a), self.entity_locations.find(&b)) {
            (Some(ra), Some(rb)) => ra.cell_id == rb.cell_id,
            _ => false,
        }
    }

    pub fn active_cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn total_entity_count(&self) -> usize {
        self.entity_locations.len()
    }

    pub fn migrating_count(&self) -> usize {
        self.migrations.lock().len()
    }

    pub fn is_entity_migrating(&self, guid: Guid) -> bool {
        self.migrations.lock().contains_key(&guid)
    }

    /// Routes `msg` to its `dst_cell`. Cells with no prior activity
    /// (never created by a `register_entity`/migration) silently drop the
    /// message rather than being created on demand by a send.
    pub fn route_message(&self, msg: Message) {
        if let Some(cell) = self.existing_cell(msg.dst_cell) {
            cell.lock().send(msg);
        } else {
            tracing::debug!(
                target: "cellmesh_world::route_message",
                dst_cell = msg.dst_cell.0,
                kind = ?msg.kind,
                "dropped message addressed to an inactive cell"
            );
        }
    }

    /// Returns the up-to-8 neighbor cell ids of `id`. Backed by a
    /// `SmallVec` since the count is bounded at 8 and this is called once
    /// per moved/updated entity per tick.
    pub fn neighbor_cell_ids(&self, id: CellId) -> smallvec::SmallVec<[CellId; 8]> {
        Direction::ALL
            .iter()
            .filter_map(|d| neighbor_cell_id(id, *d))
            .collect()
    }

    /// Call after an entity's position changes (from within
    /// `Workload::on_entity_update`). If the new position falls in a
    /// different cell, begins a migration; otherwise just records the new
    /// position and refreshes ghosts in neighboring cells.
    pub fn on_entity_moved(&self, guid: Guid, new_position: Position) {
        let old_cell = match self.entity_locations.find(&guid) {
            Some(r) => r.cell_id,
            None => return,
        };
        let new_cell = CellId::for_position(new_position.x, new_position.y);

        self.entity_locations
            .update(&guid, |record| record.position = new_position);

        if new_cell != old_cell && !self.is_entity_migrating(guid) {
            self.begin_migration(guid, old_cell, new_cell, new_position);
        }

        self.update_entity_ghosts(guid, new_position);
    }

    fn snapshot_for(&self, guid: Guid, position: Position) -> MigrationSnapshot {
        MigrationSnapshot {
            guid,
            position,
            health: 0,
            max_health: 0,
            power: 0,
            max_power: 0,
            display_id: 0,
            in_combat: false,
            is_dead: false,
            target_guid: None,
        }
    }

    fn begin_migration(&self, guid: Guid, old_cell: CellId, new_cell: CellId, position: Position) {
        let snapshot = self.snapshot_for(guid, position);
        let migration_id = self.next_migration_id.fetch_add(1, Ordering::Relaxed);
        self.migrations.lock().insert(
            guid,
            EntityMigrationInfo::new(old_cell, new_cell, snapshot, migration_id),
        );

        self.get_or_create_cell(new_cell);
        self.route_message(
            Message::new(MessageKind::MigrationRequest, guid, guid, old_cell, new_cell)
                .with_payload(crate::message::MessagePayload::MigrationRequest(
                    crate::message::MigrationRequestPayload { snapshot, migration_id },
                )),
        );
        tracing::trace!(
            target: "cellmesh_world::migration",
            guid,
            from = old_cell.0,
            to = new_cell.0,
            "migration initiated"
        );
    }

    /// Called when the destination cell decides to accept or reject an
    /// inbound `MigrationRequest`.
    pub fn process_migration_ack(&self, guid: Guid, accepted: bool) {
        let info = {
            let mut migrations = self.migrations.lock();
            match migrations.get_mut(&guid) {
                Some(info) => {
                    if accepted {
                        info.state = MigrationState::Transferring;
                    }
                    Some((info.old_cell, info.new_cell))
                }
                None => None,
            }
        };
        let Some((old_cell, new_cell)) = info else { return };

        if accepted {
            if let Some(cell) = self.existing_cell(old_cell) {
                cell.lock().remove_entity(guid);
            }
            if let Some(cell) = self.existing_cell(new_cell) {
                cell.lock().add_entity(guid);
            }
            self.entity_locations
                .update(&guid, |record| record.cell_id = new_cell);
            self.flush_migration(guid, new_cell);
        } else {
            self.abort_migration(guid);
        }
    }

    fn flush_migration(&self, guid: Guid, new_cell: CellId) {
        let (old_cell, migration_id, buffered) = {
            let mut migrations = self.migrations.lock();
            match migrations.remove(&guid) {
                Some(mut info) => {
                    info.state = MigrationState::Completing;
                    (
                        info.old_cell,
                        info.migration_id,
                        std::mem::take(&mut info.buffered_messages),
                    )
                }
                None => return,
            }
        };

        self.route_message(
            Message::new(MessageKind::MigrationComplete, guid, guid, old_cell, new_cell)
                .with_payload(MessagePayload::MigrationComplete(MigrationCompletePayload {
                    migration_id,
                })),
        );

        for msg in buffered {
            let mut forward = Message::new(
                MessageKind::MigrationForward,
                msg.src_guid,
                msg.dst_guid,
                msg.dst_cell,
                new_cell,
            );
            forward = forward.with_payload(MessagePayload::MigrationForward(MigrationForwardPayload {
                migration_id,
                original: Box::new(msg),
            }));
            self.route_message(forward);
        }
    }

    /// Aborts a migration: the entity stays with its original owner and
    /// any buffered messages are released back to local dispatch instead
    /// of being dropped.
    pub fn abort_migration(&self, guid: Guid) {
        let info = self.migrations.lock().remove(&guid);
        if let Some(info) = info {
            if let Some(cell) = self.existing_cell(info.old_cell) {
                let cell = cell.lock();
                for msg in info.buffered_messages {
                    cell.send(msg);
                }
            }
            tracing::debug!(
                target: "cellmesh_world::migration",
                guid,
                "migration aborted, entity retained by original owner"
            );
        }
    }

    /// If an entity is mid-migration, buffers `msg` instead of delivering
    /// it immediately, preserving arrival order for replay on
    /// completion/abort.
    pub fn buffer_if_migrating(&self, guid: Guid, msg: Message) -> bool {
        let mut migrations = self.migrations.lock();
        if let Some(info) = migrations.get_mut(&guid) {
            info.buffered_messages.push(msg);
            true
        } else {
            false
        }
    }

    /// Checked once per tick from the sequential preamble: aborts any
    /// migration that has exceeded the configured timeout.
    pub fn update_migrations(&self, _dt: Duration) {
        let timed_out: Vec<Guid> = self
            .migrations
            .lock()
            .iter()
            .filter(|(_, info)| info.is_timed_out(self.options.migration_timeout))
            .map(|(guid, _)| *guid)
            .collect();
        for guid in timed_out {
            tracing::warn!(
                target: "cellmesh_world::migration",
                guid,
                "migration timed out, aborting"
            );
            self.abort_migration(guid);
        }
    }

    fn update_entity_ghosts(&self, guid: Guid, position: Position) {
        let owner_cell = match self.cell_id_for_entity(guid) {
            Some(c) => c,
            None => return,
        };
        let snapshot = GhostSnapshot {
            position,
            health: 0,
            max_health: 0,
            display_id: 0,
            in_combat: false,
            is_dead: false,
            target_guid: None,
        };
        for neighbor_id in self.neighbor_cell_ids(owner_cell) {
            let neighbor = match self.existing_cell(neighbor_id) {
                Some(c) => c,
                None => continue,
            };
            let mut neighbor = neighbor.lock();
            let should_have_ghost = neighbor.entities().iter().any(|other_guid| {
                self.entity_locations
                    .find(other_guid)
                    .map_or(false, |r| is_visible(&position, &r.position))
            });
            let already_has = neighbor.ghost(guid).is_some();
            if should_have_ghost {
                if already_has {
                    if let Some(g) = neighbor.ghost_mut(guid) {
                        g.sync_from_snapshot(snapshot);
                    }
                } else {
                    neighbor.put_ghost(Ghost::new(guid, owner_cell, snapshot));
                }
            } else if already_has {
                neighbor.remove_ghost(guid);
            }
        }
    }

    /// Destroys every ghost of `guid` across all currently-active cells,
    /// e.g. on death or logout.
    pub fn destroy_all_ghosts_for_entity(&self, guid: Guid) {
        self.cells.for_each(|_, cell| {
            cell.lock().remove_ghost(guid);
        });
    }

    pub fn ghost_count(&self) -> usize {
        let mut total = 0usize;
        self.cells.for_each(|_, cell| total += cell.lock().ghost_count());
        total
    }

    /// Returns up to `count` cells with the most messages processed last
    /// tick, descending.
    pub fn hotspot_cells(&self, count: usize) -> Vec<(CellId, u32)> {
        let mut all: Vec<(CellId, u32)> = Vec::new();
        // Per-cell message counts are not tracked individually in this
        // implementation (stats are manager-wide); this reports active
        // cells by resident entity count as the next-best proxy, matching
        // the "hotspot" intent when not tracing per-cell.
        self.cells.for_each(|id, cell| {
            all.push((*id, cell.lock().entity_count() as u32));
        });
        all.sort_by(|a, b| b.1.cmp(&a.1));
        all.truncate(count);
        all
    }

    fn process_one_cell(self: &Arc<Self>, cell_id: CellId, dt: Duration) {
        let cell = match self.existing_cell(cell_id) {
            Some(c) => c,
            None => return,
        };
        let started = Instant::now();
        let ctx = CellContext::new(self, cell_id);

        let mut processed_messages = 0u32;
        loop {
            let msg = { cell.lock().pop_message() };
            let Some(msg) = msg else { break };
            processed_messages += 1;
            self.stats.record_message(msg.kind);
            match msg.kind {
                MessageKind::MigrationAck => {
                    let accepted = msg.ints[0] != 0;
                    self.process_migration_ack(msg.src_guid, accepted);
                }
                MessageKind::MigrationRequest => {
                    // Default policy: accept unless already migrating in.
                    let accept = !self.is_entity_migrating(msg.src_guid)
                        || self.cell_id_for_entity(msg.src_guid) != Some(cell_id);
                    let mut ack = Message::new(
                        MessageKind::MigrationAck,
                        msg.src_guid,
                        msg.src_guid,
                        cell_id,
                        msg.src_cell,
                    );
                    ack.ints[0] = accept as i32;
                    self.route_message(ack);
                }
                MessageKind::MigrationComplete => {
                    // Internal protocol notification only; the entity was
                    // already added to this cell when the ack was sent.
                    // Nothing further to apply.
                    tracing::trace!(
                        target: "cellmesh_world::migration",
                        guid = msg.src_guid,
                        "migration complete notification received"
                    );
                }
                MessageKind::MigrationForward => {
                    if let Some(payload) = &msg.payload {
                        if let MessagePayload::MigrationForward(forward) = payload.as_ref() {
                            self.workload.on_message(&ctx, &forward.original);
                        }
                    }
                }
                _ => {
                    if self.buffer_if_migrating(msg.dst_guid, msg.clone()) {
                        // held back until the migration resolves
                    } else {
                        self.workload.on_message(&ctx, &msg);
                    }
                }
            }
        }

        let entity_ids: Vec<Guid> = cell.lock().entities().to_vec();
        for guid in entity_ids {
            self.workload.on_entity_update(&ctx, guid, dt);
        }

        self.stats.record_update_time(started.elapsed().as_micros() as u64);
        let _ = processed_messages;
    }

    /// Runs the parallel entity phase: submits one `Map` task per batch of
    /// cells, then blocks (helping drain) until they all complete.
    ///
    /// Cells are grouped greedily by resident entity count, targeting
    /// `batches_per_worker * num_workers` batches and clamping each
    /// batch's entity total to `[min_batch_entities, max_batch_entities]`,
    /// so a few crowded cells don't end up sharing a task with a hundred
    /// empty ones.
    pub fn run_parallel_phase(self: &Arc<Self>, pool: &Arc<WorkerPool>, dt: Duration) {
        let mut cells: Vec<(CellId, usize)> = Vec::new();
        self.cells.for_each(|id, cell| {
            cells.push((*id, cell.lock().entity_count()));
        });
        if cells.is_empty() {
            return;
        }

        let total_entities: usize = cells.iter().map(|(_, n)| n).sum();
        let target_batches = (self.options.batches_per_worker * pool.num_workers()).max(1);
        let target_batch_entities = (total_entities / target_batches).max(1).clamp(
            self.options.min_batch_entities,
            self.options.max_batch_entities,
        );

        let mut batches: Vec<Vec<CellId>> = Vec::new();
        let mut current: Vec<CellId> = Vec::new();
        let mut current_entities = 0usize;
        for (id, count) in cells {
            if !current.is_empty() && current_entities + count > target_batch_entities {
                batches.push(std::mem::take(&mut current));
                current_entities = 0;
            }
            current.push(id);
            current_entities += count;
        }
        if !current.is_empty() {
            batches.push(current);
        }

        for batch in batches {
            let manager = self.clone();
            self.pending_cell_updates.fetch_add(1, Ordering::Relaxed);
            let task: cellmesh_scheduler::Task = Box::new(move || {
                for cell_id in batch {
                    manager.process_one_cell(cell_id, dt);
                }
            });
            pool.submit(TaskType::Map, task).expect("submit map task");
        }

        while pool.pending(TaskType::Map) > 0 {
            if !pool.try_execute_one(TaskType::Map) {
                pool.wait(TaskType::Map);
            }
        }
        pool.wait(TaskType::Cell);
        self.pending_cell_updates.store(0, Ordering::Relaxed);
        self.stats.reset_tick_counters();
    }

    pub fn run_tick_finalize(&self, dt: Duration) {
        let ctx = FinalizeContext::new(self, dt);
        self.workload.on_tick_finalize(&ctx);
    }
}
