use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::updater::PollReport;

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub cycles_completed: u64,
    pub last_cycle: Option<PollReport>,
    pub handshakes_accepted: u64,
    pub handshakes_rejected: u64,
    pub deliveries_accepted: u64,
    pub deliveries_rejected: u64,
    pub memory_usage_mb: f32,
}

#[derive(Default)]
struct Counters {
    cycles_completed: AtomicU64,
    handshakes_accepted: AtomicU64,
    handshakes_rejected: AtomicU64,
    deliveries_accepted: AtomicU64,
    deliveries_rejected: AtomicU64,
}

/// Compteurs de fonctionnement partagés entre updater, subscriber et API
#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    counters: Arc<Counters>,
    last_cycle: Arc<parking_lot::Mutex<Option<PollReport>>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            counters: Arc::new(Counters::default()),
            last_cycle: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    pub fn record_cycle(&self, report: PollReport) {
        self.counters.cycles_completed.fetch_add(1, Ordering::Relaxed);
        *self.last_cycle.lock() = Some(report);
    }

    pub fn record_handshake(&self, accepted: bool) {
        let counter = if accepted {
            &self.counters.handshakes_accepted
        } else {
            &self.counters.handshakes_rejected
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery(&self, accepted: bool) {
        let counter = if accepted {
            &self.counters.deliveries_accepted
        } else {
            &self.counters.deliveries_rejected
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_health(&self) -> KernelHealth {
        let c = &self.counters;
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            cycles_completed: c.cycles_completed.load(Ordering::Relaxed),
            last_cycle: *self.last_cycle.lock(),
            handshakes_accepted: c.handshakes_accepted.load(Ordering::Relaxed),
            handshakes_rejected: c.handshakes_rejected.load(Ordering::Relaxed),
            deliveries_accepted: c.deliveries_accepted.load(Ordering::Relaxed),
            deliveries_rejected: c.deliveries_rejected.load(Ordering::Relaxed),
            memory_usage_mb: get_memory_usage_mb(),
        }
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let rss_kb = status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok());
            if let Some(kb) = rss_kb {
                return kb as f32 / 1024.0;
            }
        }
    }

    0.0
}
