use std::time::Duration;

use cellmesh_scheduler::PoolOptions as SchedulerPoolOptions;
use cellmesh_world::CellManagerOptions;

use crate::admission::AdmissionOptions;

/// All tunable knobs for a [`crate::TickOrchestrator`] and the runtime it
/// drives. Constructible programmatically; with the `config` feature
/// enabled, also deserializable from TOML/JSON via `serde`.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
pub struct RuntimeConfig {
    pub num_workers: usize,
    pub session_workers: usize,
    pub num_shards: usize,
    pub deque_capacity: usize,
    pub backoff_spin_count: u32,
    pub backoff_yield_count: u32,
    pub sleep_micros: u64,
    pub batches_per_worker: usize,
    pub min_batch_entities: usize,
    pub max_batch_entities: usize,
    pub migration_timeout_ms: u64,
    pub admission_enabled: bool,
    pub admission_max_per_source: u32,
    pub admission_rate_limit: u32,
    pub admission_window_seconds: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let num_workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        RuntimeConfig {
            num_workers,
            session_workers: 2,
            num_shards: 64,
            deque_capacity: 4096,
            backoff_spin_count: 64,
            backoff_yield_count: 4,
            sleep_micros: 1000,
            batches_per_worker: 12,
            min_batch_entities: 100,
            max_batch_entities: 1000,
            migration_timeout_ms: 5000,
            admission_enabled: true,
            admission_max_per_source: 5,
            admission_rate_limit: 20,
            admission_window_seconds: 60,
        }
    }
}

impl RuntimeConfig {
    pub fn scheduler_options(&self) -> SchedulerPoolOptions {
        SchedulerPoolOptions {
            deque_capacity: self.deque_capacity,
            backoff_spin_count: self.backoff_spin_count,
            backoff_yield_count: self.backoff_yield_count,
            backoff_sleep_micros: self.sleep_micros,
        }
    }

    pub fn cell_manager_options(&self) -> CellManagerOptions {
        CellManagerOptions {
            migration_timeout: Duration::from_millis(self.migration_timeout_ms),
            batches_per_worker: self.batches_per_worker,
            min_batch_entities: self.min_batch_entities,
            max_batch_entities: self.max_batch_entities,
            num_shards: self.num_shards,
        }
    }

    pub fn admission_options(&self) -> AdmissionOptions {
        AdmissionOptions {
            enabled: self.admission_enabled,
            max_per_source: self.admission_max_per_source,
            rate_limit: self.admission_rate_limit,
            window: Duration::from_secs(self.admission_window_seconds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_num_workers_matches_hardware_parallelism() {
        let cfg = RuntimeConfig::default();
        assert!(cfg.num_workers >= 1);
    }
}
