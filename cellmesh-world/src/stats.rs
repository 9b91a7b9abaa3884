use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::message::MessageKind;

const ROLLING_WINDOW: u64 = 100;

/// Per-cell performance counters, supplementing the distilled spec with
/// the hotspot/tracing visibility the original system's `CellActorManager`
/// exposes for operators.
pub struct PerformanceStats {
    last_update_us: AtomicU64,
    avg_update_us: AtomicU64,
    max_update_us: AtomicU64,
    message_counts_by_kind: Vec<AtomicU32>,
    total_messages_this_tick: AtomicU32,
    messages_processed_last_tick: AtomicU32,
    samples: AtomicU64,
}

impl Default for PerformanceStats {
    fn default() -> Self {
        let mut counts = Vec::with_capacity(MessageKind::COUNT);
        for _ in 0..MessageKind::COUNT {
            counts.push(AtomicU32::new(0));
        }
        PerformanceStats {
            last_update_us: AtomicU64::new(0),
            avg_update_us: AtomicU64::new(0),
            max_update_us: AtomicU64::new(0),
            message_counts_by_kind: counts,
            total_messages_this_tick: AtomicU32::new(0),
            messages_processed_last_tick: AtomicU32::new(0),
            samples: AtomicU64::new(0),
        }
    }
}

impl PerformanceStats {
    pub fn record_update_time(&self, micros: u64) {
        self.last_update_us.store(micros, Ordering::Relaxed);
        self.max_update_us.fetch_max(micros, Ordering::Relaxed);

        let n = self.samples.fetch_add(1, Ordering::Relaxed).min(ROLLING_WINDOW);
        let prev_avg = self.avg_update_us.load(Ordering::Relaxed);
        let new_avg = (prev_avg * n + micros) / (n + 1);
        self.avg_update_us.store(new_avg, Ordering::Relaxed);
    }

    pub fn record_message(&self, kind: MessageKind) {
        self.message_counts_by_kind[kind as usize].fetch_add(1, Ordering::Relaxed);
        self.total_messages_this_tick.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset_tick_counters(&self) {
        let total = self.total_messages_this_tick.swap(0, Ordering::Relaxed);
        self.messages_processed_last_tick.store(total, Ordering::Relaxed);
    }

    pub fn messages_processed_last_tick(&self) -> u32 {
        self.messages_processed_last_tick.load(Ordering::Relaxed)
    }

    pub fn last_update_us(&self) -> u64 {
        self.last_update_us.load(Ordering::Relaxed)
    }

    pub fn avg_update_us(&self) -> u64 {
        self.avg_update_us.load(Ordering::Relaxed)
    }

    pub fn max_update_us(&self) -> u64 {
        self.max_update_us.load(Ordering::Relaxed)
    }

    pub fn message_count(&self, kind: MessageKind) -> u32 {
        self.message_counts_by_kind[kind as usize].load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_counts_tick_over() {
        let stats = PerformanceStats::default();
        stats.record_message(MessageKind::SpellHit);
        stats.record_message(MessageKind::SpellHit);
        stats.record_message(MessageKind::Heal);
        stats.reset_tick_counters();
        assert_eq!(stats.messages_processed_last_tick(), 3);
        assert_eq!(stats.message_count(MessageKind::SpellHit), 2);
    }

    #[test]
    fn update_time_tracks_max() {
        let stats = PerformanceStats::default();
        stats.record_update_time(10);
        stats.record_update_time(500);
        stats.record_update_time(50);
        assert_eq!(stats.max_update_us(), 500);
    }
}
