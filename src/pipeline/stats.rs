//! Pipeline counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters shared between the pipeline thread and observers.
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_captured: AtomicU64,
    frames_sent: AtomicU64,
    encode_failures: AtomicU64,
    capture_retries: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_captured: u64,
    pub frames_sent: u64,
    pub encode_failures: u64,
    pub capture_retries: u64,
}

impl PipelineStats {
    pub fn record_capture(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("campush_frames_captured_total").increment(1);
    }

    /// `latency` runs from capture until the frame was handed to the sink.
    pub fn record_sent(&self, latency: Duration) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("campush_frames_sent_total").increment(1);
        metrics::histogram!("campush_frame_latency_us").record(latency.as_micros() as f64);
    }

    pub fn record_encode_failure(&self) {
        self.encode_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("campush_encode_failures_total").increment(1);
    }

    pub fn record_capture_retry(&self) {
        self.capture_retries.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("campush_capture_retries_total").increment(1);
    }

    pub fn encode_failures(&self) -> u64 {
        self.encode_failures.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
            capture_retries: self.capture_retries.load(Ordering::Relaxed),
        }
    }
}
