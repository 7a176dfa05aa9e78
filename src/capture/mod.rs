pub mod acquire;
pub mod decode;
pub mod frame;
pub mod v4l2;

pub use acquire::{CameraDevice, CameraHandle, DeviceAcquirer, DeviceProbe};
pub use frame::{PixelFormat, RawFrame};
pub use v4l2::{V4l2Camera, V4l2Probe};
