use std::time::Duration;

use thiserror::Error;

/// Failures while reading a frame from the camera.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera device disconnected")]
    Disconnected,

    /// No frame arrived within the read timeout. Not a failure; the
    /// pipeline simply asks again.
    #[error("no frame within {0:?}")]
    Timeout(Duration),

    #[error("frame read failed: {0}")]
    Read(#[from] std::io::Error),

    #[error("frame decode failed: {0}")]
    Decode(String),

    #[error("invalid frame: {len} bytes for {width}x{height} RGB24")]
    InvalidFrame { len: usize, width: u32, height: u32 },
}

impl CaptureError {
    /// Whether a bounded retry may recover from this failure.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, CaptureError::Disconnected)
    }
}

/// Per-frame compression failure. Recovered locally by dropping the frame.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("codec error: {0}")]
    Codec(#[from] image::ImageError),

    #[error("codec produced an empty payload")]
    Empty,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid server address {0:?}, expected host:port")]
    InvalidAddress(String),

    #[error("transport channel closed")]
    Closed,

    #[error("send queue stayed full for {0:?}")]
    Timeout(Duration),
}

/// Failure of a single collector connection. The I/O task recovers from
/// every variant by reconnecting.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("collector closed the connection")]
    PeerClosed,

    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("handshake rejected: {0}")]
    Handshake(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("server address is required")]
    MissingServerAddress,

    #[error("invalid server address {0:?}, expected host:port")]
    InvalidServerAddress(String),

    #[error("identity must not be empty")]
    EmptyIdentity,

    #[error("identity {0:?} is not ASCII")]
    NonAsciiIdentity(String),

    #[error("resolution {width}x{height} out of range (1..=65535)")]
    InvalidResolution { width: u32, height: u32 },

    #[error("jpeg quality {0} out of range (1..=100)")]
    InvalidQuality(u8),

    #[error("max probe attempts must be at least 1")]
    ZeroProbeAttempts,

    #[error("transport queue depth must be at least 1")]
    ZeroQueueDepth,
}

/// Fatal errors, tagged with the stage that raised them.
#[derive(Debug, Error)]
pub enum SenderError {
    #[error("device acquisition: no camera opened after probing {attempts} indices")]
    DeviceNotFound { attempts: u32 },

    #[error("capture stage: {0}")]
    Capture(#[from] CaptureError),

    #[error("transport stage: {0}")]
    Connection(#[from] TransportError),

    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
}
