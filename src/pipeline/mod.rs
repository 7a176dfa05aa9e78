//! Capture → transform → encode → send loop

pub mod stats;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::capture::{CameraHandle, RawFrame};
use crate::config::CaptureConfig;
use crate::encode::FrameEncoder;
use crate::error::{CaptureError, SenderError, TransportError};
use crate::transform::FrameTransformer;
use crate::transport::{Identity, MessageSink};

pub use stats::{PipelineStats, StatsSnapshot};

/// Cross-thread interrupt request, checked once per cycle.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Bounded retry for transient capture failures. Linear backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&CaptureConfig::default())
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            retries: 0,
            backoff: Duration::ZERO,
        }
    }

    pub fn from_config(capture: &CaptureConfig) -> Self {
        Self {
            retries: capture.read_retries,
            backoff: capture.retry_backoff(),
        }
    }
}

/// Drives one camera into one sink, strictly sequentially.
pub struct Pipeline<E, K> {
    identity: Identity,
    transformer: FrameTransformer,
    encoder: E,
    sink: K,
    retry: RetryPolicy,
    stats: Arc<PipelineStats>,
    stop: StopFlag,
}

impl<E: FrameEncoder, K: MessageSink> Pipeline<E, K> {
    pub fn new(identity: Identity, transformer: FrameTransformer, encoder: E, sink: K) -> Self {
        Self {
            identity,
            transformer,
            encoder,
            sink,
            retry: RetryPolicy::default(),
            stats: Arc::default(),
            stop: StopFlag::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_stop_flag(mut self, stop: StopFlag) -> Self {
        self.stop = stop;
        self
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    /// Stream frames until interrupted or a stage fails fatally.
    ///
    /// Returns `Ok(())` only for an interrupt. The camera is released before
    /// returning on every path.
    pub fn run(&mut self, mut camera: CameraHandle) -> Result<(), SenderError> {
        info!(camera = camera.index(), identity = %self.identity, "Pipeline running");

        let result = self.run_loop(&mut camera);
        camera.release();

        let s = self.stats.snapshot();
        match &result {
            Ok(()) => info!(
                "Pipeline interrupted after {} frames ({} sent, {} encode failures)",
                s.frames_captured, s.frames_sent, s.encode_failures
            ),
            Err(e) => error!(
                "Pipeline failed after {} frames ({} sent): {}",
                s.frames_captured, s.frames_sent, e
            ),
        }
        result
    }

    fn run_loop(&mut self, camera: &mut CameraHandle) -> Result<(), SenderError> {
        loop {
            if self.stop.is_raised() {
                return Ok(());
            }

            let Some(raw) = self.capture(camera)? else {
                continue;
            };
            self.stats.record_capture();
            let sequence = raw.sequence;
            let captured_at = raw.timestamp;

            let frame = self.transformer.apply(raw);

            let payload = match self.encoder.encode(&frame) {
                Ok(payload) => payload,
                Err(e) => {
                    self.stats.record_encode_failure();
                    warn!(sequence, "Dropping frame, encode failed: {}", e);
                    continue;
                }
            };

            match self.sink.send(&self.identity, &payload) {
                Ok(()) => {
                    self.stats.record_sent(captured_at.elapsed());
                    debug!(sequence, bytes = payload.len(), "Frame sent");
                }
                Err(TransportError::Closed) if self.stop.is_raised() => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// `Ok(None)` when the device had no frame within its read timeout.
    fn capture(&self, camera: &mut CameraHandle) -> Result<Option<RawFrame>, CaptureError> {
        let mut attempt = 0;
        loop {
            match camera.read() {
                Ok(frame) => return Ok(Some(frame)),
                Err(CaptureError::Timeout(waited)) => {
                    debug!("No frame within {:?}", waited);
                    return Ok(None);
                }
                Err(e) if e.is_retryable() && attempt < self.retry.retries && !self.stop.is_raised() => {
                    attempt += 1;
                    self.stats.record_capture_retry();
                    warn!(attempt, "Capture failed, retrying: {}", e);
                    thread::sleep(self.retry.backoff * attempt);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
