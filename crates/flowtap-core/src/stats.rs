use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use time::OffsetDateTime;

/// Shared pipeline counters.
///
/// Every field is updated with relaxed atomics from whichever thread owns
/// the corresponding stage; readers never block writers.
#[derive(Debug, Default)]
pub struct CaptureStatistics {
    captured: AtomicU64,
    processed: AtomicU64,
    dropped: AtomicU64,
    bytes_captured: AtomicU64,
    decode_errors: AtomicU64,
    sink_errors: AtomicU64,
    active_flows: AtomicUsize,
    window: Mutex<RunWindow>,
}

#[derive(Debug, Default, Clone, Copy)]
struct RunWindow {
    started_at: Option<OffsetDateTime>,
    stopped_at: Option<OffsetDateTime>,
}

/// Point-in-time copy of the counters plus derived rates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsSnapshot {
    pub captured: u64,
    pub processed: u64,
    pub dropped: u64,
    pub bytes_captured: u64,
    pub decode_errors: u64,
    pub sink_errors: u64,
    pub active_flows: usize,
    pub queue_depth: usize,
    pub elapsed_seconds: f64,
    pub packets_per_second: f64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    pub running: bool,
}

impl CaptureStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero every counter and open a new run window at `now`.
    pub fn reset(&self, now: OffsetDateTime) {
        for counter in [
            &self.captured,
            &self.processed,
            &self.dropped,
            &self.bytes_captured,
            &self.decode_errors,
            &self.sink_errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.active_flows.store(0, Ordering::Relaxed);
        *self.window.lock() = RunWindow {
            started_at: Some(now),
            stopped_at: None,
        };
    }

    /// Freeze elapsed time at `now`.
    pub fn mark_stopped(&self, now: OffsetDateTime) {
        let mut window = self.window.lock();
        if window.started_at.is_some() && window.stopped_at.is_none() {
            window.stopped_at = Some(now);
        }
    }

    pub fn record_captured(&self, bytes: usize) {
        self.captured.fetch_add(1, Ordering::Relaxed);
        self.bytes_captured
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_error(&self) {
        self.sink_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_active_flows(&self, count: usize) {
        self.active_flows.store(count, Ordering::Relaxed);
    }

    pub fn captured(&self) -> u64 {
        self.captured.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Copy the counters. `queue_depth` is sampled by the caller, which owns
    /// the queue handle.
    pub fn snapshot(&self, now: OffsetDateTime, queue_depth: usize) -> StatisticsSnapshot {
        let window = *self.window.lock();
        let elapsed_seconds = match window.started_at {
            Some(start) => {
                let end = window.stopped_at.unwrap_or(now);
                (end - start).as_seconds_f64().max(0.0)
            }
            None => 0.0,
        };
        let captured = self.captured();
        let packets_per_second = if elapsed_seconds > 0.0 {
            captured as f64 / elapsed_seconds
        } else {
            0.0
        };

        StatisticsSnapshot {
            captured,
            processed: self.processed(),
            dropped: self.dropped(),
            bytes_captured: self.bytes_captured.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            sink_errors: self.sink_errors.load(Ordering::Relaxed),
            active_flows: self.active_flows.load(Ordering::Relaxed),
            queue_depth,
            elapsed_seconds,
            packets_per_second,
            started_at: window.started_at,
            running: window.started_at.is_some() && window.stopped_at.is_none(),
        }
    }
}
