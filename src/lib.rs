//! Camera frame sender: captures frames from a local camera, resizes and
//! optionally mirrors them, compresses them to JPEG, and pushes
//! `[identity, jpeg]` messages to a remote collector.

pub mod capture;
pub mod config;
pub mod encode;
pub mod error;
pub mod pipeline;
pub mod transform;
pub mod transport;

pub use capture::{CameraDevice, CameraHandle, DeviceAcquirer, DeviceProbe, RawFrame};
pub use config::Config;
pub use encode::{EncodedPayload, FrameEncoder, JpegEncoder};
pub use error::{CaptureError, ConfigError, EncodeError, SenderError, TransportError};
pub use pipeline::{Pipeline, PipelineStats, RetryPolicy, StopFlag};
pub use transform::{FrameTransformer, TransformedFrame};
pub use transport::{ChannelCloser, Identity, MessageSink, PushChannel};
