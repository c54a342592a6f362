//! Lock-free server counters and the plain text `/stats` report.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Count, total and worst case of one timed operation.
#[derive(Debug, Default)]
pub struct Timing {
    count: AtomicU64,
    total_us: AtomicU64,
    max_us: AtomicU64,
}

impl Timing {
    pub fn record(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_us.fetch_add(us, Ordering::Relaxed);
        self.max_us.fetch_max(us, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn max_ms(&self) -> f64 {
        self.max_us.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn avg_ms(&self) -> f64 {
        per(self.total_us.load(Ordering::Relaxed) as f64 / 1000.0, self.count())
    }
}

fn per(total: f64, n: u64) -> f64 {
    if n == 0 { 0.0 } else { total / n as f64 }
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

fn read(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

#[derive(Debug)]
pub struct ServerMetrics {
    started: Instant,
    summary: String,

    pub generation: Timing,
    pub store_load: Timing,
    pub store_save: Timing,

    storage_failures: AtomicU64,
    chunks_saved: AtomicU64,
    fresh_served: AtomicU64,
    restored_served: AtomicU64,
    bytes_served: AtomicU64,
    rejected: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl ServerMetrics {
    pub fn new(summary: String) -> Self {
        Self {
            started: Instant::now(),
            summary,
            generation: Timing::default(),
            store_load: Timing::default(),
            store_save: Timing::default(),
            storage_failures: AtomicU64::new(0),
            chunks_saved: AtomicU64::new(0),
            fresh_served: AtomicU64::new(0),
            restored_served: AtomicU64::new(0),
            bytes_served: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    pub fn record_generation(&self, duration: Duration) {
        self.generation.record(duration);
    }

    pub fn record_load(&self, duration: Duration) {
        self.store_load.record(duration);
    }

    /// A fetch fell back to Fresh because the store was unreachable.
    pub fn record_storage_failure(&self) {
        bump(&self.storage_failures, 1);
    }

    pub fn record_save(&self, chunks: usize, duration: Duration) {
        self.store_save.record(duration);
        bump(&self.chunks_saved, chunks as u64);
    }

    pub fn record_served(&self, restored: bool, bytes: usize) {
        let kind = if restored { &self.restored_served } else { &self.fresh_served };
        bump(kind, 1);
        bump(&self.bytes_served, bytes as u64);
    }

    pub fn record_rejected(&self) {
        bump(&self.rejected, 1);
    }

    pub fn record_cache_hit(&self) {
        bump(&self.cache_hits, 1);
    }

    pub fn record_cache_miss(&self) {
        bump(&self.cache_misses, 1);
    }

    pub fn cache_hits(&self) -> u64 {
        read(&self.cache_hits)
    }

    pub fn chunks_generated(&self) -> u64 {
        self.generation.count()
    }

    pub fn chunks_saved(&self) -> u64 {
        read(&self.chunks_saved)
    }

    pub fn generate_report(&self) -> String {
        let uptime = self.started.elapsed();
        let hits = read(&self.cache_hits);
        let lookups = hits + read(&self.cache_misses);
        let hit_rate = per(hits as f64 * 100.0, lookups);
        let mib_served = read(&self.bytes_served) as f64 / (1024.0 * 1024.0);
        let secs = uptime.as_secs_f64();
        let throughput = if secs > 0.0 { mib_served / secs } else { 0.0 };

        let mut out = String::new();
        out.push_str("Crumble Server Report\n=====================\n");
        out.push_str(&format!("Configuration: {}\nUptime: {:.2?}\n\n", self.summary, uptime));
        out.push_str(&format!(
            "[Generation]\nChunks generated: {}\nAvg: {:.2} ms  Max: {:.2} ms\n\n",
            self.generation.count(),
            self.generation.avg_ms(),
            self.generation.max_ms()
        ));
        out.push_str(&format!(
            "[Store]\nLoads: {} (avg {:.2} ms)\nUnavailable, served fresh: {}\nSave batches: {} (avg {:.2} ms)\nChunks saved: {}\n\n",
            self.store_load.count(),
            self.store_load.avg_ms(),
            read(&self.storage_failures),
            self.store_save.count(),
            self.store_save.avg_ms(),
            read(&self.chunks_saved)
        ));
        out.push_str(&format!(
            "[Requests]\nFresh: {}\nRestored: {}\nRejected: {}\nServed: {:.2} MiB ({:.2} MiB/s)\n\n",
            read(&self.fresh_served),
            read(&self.restored_served),
            read(&self.rejected),
            mib_served,
            throughput
        ));
        out.push_str(&format!(
            "[Generation cache]\nHits: {}  Misses: {}  Hit rate: {:.1}%\n",
            hits,
            lookups - hits,
            hit_rate
        ));
        out
    }
}
