use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use cellmesh_concurrent::StripedMap;
use parking_lot::Mutex;

/// Tuning for an [`AdmissionFilter`].
#[derive(Debug, Clone, Copy)]
pub struct AdmissionOptions {
    pub enabled: bool,
    pub max_per_source: u32,
    pub rate_limit: u32,
    pub window: Duration,
}

impl Default for AdmissionOptions {
    fn default() -> Self {
        AdmissionOptions {
            enabled: true,
            max_per_source: 5,
            rate_limit: 20,
            window: Duration::from_secs(60),
        }
    }
}

struct SourceRecord {
    active_count: AtomicU32,
    window: Mutex<RateWindow>,
}

struct RateWindow {
    started_at: Instant,
    count: u32,
}

impl SourceRecord {
    fn new() -> Self {
        SourceRecord {
            active_count: AtomicU32::new(0),
            window: Mutex::new(RateWindow {
                started_at: Instant::now(),
                count: 0,
            }),
        }
    }
}

/// Per-source-address concurrency cap and sliding-window rate limiter,
/// used to gate new session admission.
pub struct AdmissionFilter {
    sources: StripedMap<IpAddr, std::sync::Arc<SourceRecord>>,
    enabled: AtomicBool,
    max_per_source: AtomicU32,
    rate_limit: AtomicU32,
    window_secs: AtomicU32,
}

impl AdmissionFilter {
    pub fn new(options: AdmissionOptions) -> Self {
        let filter = AdmissionFilter {
            sources: StripedMap::new(),
            enabled: AtomicBool::new(options.enabled),
            max_per_source: AtomicU32::new(options.max_per_source),
            rate_limit: AtomicU32::new(options.rate_limit),
            window_secs: AtomicU32::new(options.window.as_secs() as u32),
        };
        filter
    }

    /// Updates the limits in effect; safe to call while connections are
    /// being admitted/closed concurrently.
    pub fn configure(&self, options: AdmissionOptions) {
        self.enabled.store(options.enabled, Ordering::Relaxed);
        self.max_per_source.store(options.max_per_source, Ordering::Relaxed);
        self.rate_limit.store(options.rate_limit, Ordering::Relaxed);
        self.window_secs
            .store(options.window.as_secs() as u32, Ordering::Relaxed);
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs.load(Ordering::Relaxed) as u64)
    }

    /// Returns `true` if a new connection from `source` should be
    /// rejected.
    pub fn should_reject(&self, source: IpAddr) -> bool {
        if !self.enabled.load(Ordering::Relaxed) {
            return false;
        }
        let max_per_source = self.max_per_source.load(Ordering::Relaxed);
        let rate_limit = self.rate_limit.load(Ordering::Relaxed);
        if max_per_source == 0 && rate_limit == 0 {
            return false;
        }

        let record = self.get_or_create(source);

        if max_per_source > 0 && record.active_count.load(Ordering::Relaxed) >= max_per_source {
            tracing::debug!(target: "cellmesh_sim::admission", %source, "rejected: over concurrency cap");
            return true;
        }

        if rate_limit > 0 {
            let mut window = record.window.lock();
            if window.started_at.elapsed() >= self.window() {
                window.started_at = Instant::now();
                window.count = 1;
            } else {
                window.count += 1;
                if window.count > rate_limit {
                    drop(window);
                    tracing::debug!(target: "cellmesh_sim::admission", %source, "rejected: over rate limit");
                    return true;
                }
            }
        }

        record.active_count.fetch_add(1, Ordering::Relaxed);
        false
    }

    /// Call when a session/connection from `source` closes. Saturates at
    /// zero instead of underflowing.
    pub fn on_close(&self, source: IpAddr) {
        if let Some(record) = self.sources.find(&source) {
            let _ = record.active_count.fetch_update(
                Ordering::Relaxed,
                Ordering::Relaxed,
                |v| Some(v.saturating_sub(1)),
            );
        }
    }

    fn get_or_create(&self, source: IpAddr) -> std::sync::Arc<SourceRecord> {
        if let Some(record) = self.sources.find(&source) {
            return record;
        }
        self.sources
            .get_or_insert(source, std::sync::Arc::new(SourceRecord::new()))
    }

    /// Drops tracking entries for sources with no active connections and
    /// an expired rate window; call periodically to bound memory.
    pub fn cleanup_stale_entries(&self) {
        let window = self.window();
        let stale: Vec<IpAddr> = {
            let mut found = Vec::new();
            self.sources.for_each(|addr, record| {
                let no_active = record.active_count.load(Ordering::Relaxed) == 0;
                let expired = record.window.lock().started_at.elapsed() >= window;
                if no_active && expired {
                    found.push(*addr);
                }
            });
            found
        };
        for addr in stale {
            self.sources.remove(&addr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(n: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, n))
    }

    #[test]
    fn concurrency_cap_rejects_past_the_limit() {
        let filter = AdmissionFilter::new(AdmissionOptions {
            enabled: true,
            max_per_source: 5,
            rate_limit: 0,
            window: Duration::from_secs(60),
        });
        let ip = addr(1);
        for _ in 0..5 {
            assert!(!filter.should_reject(ip));
        }
        assert!(filter.should_reject(ip));
        filter.on_close(ip);
        assert!(!filter.should_reject(ip));
    }

    #[test]
    fn rate_limit_rejects_within_window() {
        let filter = AdmissionFilter::new(AdmissionOptions {
            enabled: true,
            max_per_source: 0,
            rate_limit: 3,
            window: Duration::from_secs(60),
        });
        let ip = addr(2);
        assert!(!filter.should_reject(ip));
        assert!(!filter.should_reject(ip));
        assert!(!filter.should_reject(ip));
        assert!(filter.should_reject(ip));
    }

    #[test]
    fn disabled_filter_always_accepts() {
        let filter = AdmissionFilter::new(AdmissionOptions {
            enabled: false,
            max_per_source: 1,
            rate_limit: 1,
            window: Duration::from_secs(60),
        });
        let ip = addr(3);
        for _ in 0..10 {
            assert!(!filter.should_reject(ip));
        }
    }

    #[test]
    fn on_close_never_underflows() {
        let filter = AdmissionFilter::new(AdmissionOptions::default());
        let ip = addr(4);
        filter.on_close(ip);
        filter.on_close(ip);
        assert!(!filter.should_reject(ip));
    }
}
