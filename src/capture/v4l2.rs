//! V4L2 camera backend

use std::io;
use std::time::Duration;

use tracing::{debug, info, instrument};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::acquire::{CameraDevice, DeviceProbe};
use super::decode::decode_frame;
use super::frame::{PixelFormat, RawFrame};
use crate::error::CaptureError;

/// The driver poll takes the timeout as `i32` milliseconds.
const MAX_READ_TIMEOUT: Duration = Duration::from_millis(i32::MAX as u64);

/// Opens `/dev/video{index}` devices with memory-mapped streaming.
#[derive(Debug, Clone, Copy)]
pub struct V4l2Probe {
    pub buffer_count: u32,
    /// `None` lets a read block until the driver delivers a frame.
    pub read_timeout: Option<Duration>,
}

impl DeviceProbe for V4l2Probe {
    fn open(&mut self, index: u32) -> io::Result<Box<dyn CameraDevice>> {
        Ok(Box::new(V4l2Camera::open(
            index,
            self.buffer_count,
            self.read_timeout,
        )?))
    }
}

/// A V4L2 capture device. Streams at the device's native resolution.
pub struct V4l2Camera {
    index: u32,
    device: Option<Device>,
    stream: Option<MmapStream<'static>>,
    format: PixelFormat,
    width: u32,
    height: u32,
    sequence: u64,
    read_timeout: Option<Duration>,
}

impl V4l2Camera {
    /// Open the device node. A node that exists but cannot stream video is
    /// returned with `is_open() == false`.
    #[instrument]
    pub fn open(
        index: u32,
        buffer_count: u32,
        read_timeout: Option<Duration>,
    ) -> io::Result<Self> {
        let device = Device::new(index as usize)?;

        let mut camera = Self {
            index,
            device: None,
            stream: None,
            format: PixelFormat::Mjpeg,
            width: 0,
            height: 0,
            sequence: 0,
            read_timeout: read_timeout.map(|t| t.min(MAX_READ_TIMEOUT)),
        };

        match camera.start(&device, buffer_count) {
            Ok(()) => info!(
                "Streaming {:?} at {}x{}",
                camera.format, camera.width, camera.height
            ),
            Err(e) => debug!("Device cannot stream: {}", e),
        }
        camera.device = Some(device);

        Ok(camera)
    }

    fn start(&mut self, device: &Device, buffer_count: u32) -> io::Result<()> {
        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "device doesn't support video capture",
            ));
        }

        let offered: Vec<PixelFormat> = device
            .enum_formats()?
            .iter()
            .filter_map(|desc| PixelFormat::from_fourcc(&desc.fourcc.repr))
            .collect();
        let format = PixelFormat::PREFERENCE
            .into_iter()
            .find(|f| offered.contains(f))
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::Unsupported, "no supported pixel format")
            })?;

        let mut fmt = device.format()?;
        fmt.fourcc = FourCC::new(format.fourcc());
        let fmt = device.set_format(&fmt)?;

        self.format = PixelFormat::from_fourcc(&fmt.fourcc.repr).ok_or_else(|| {
            io::Error::new(io::ErrorKind::Unsupported, "driver rejected pixel format")
        })?;
        self.width = fmt.width;
        self.height = fmt.height;
        let mut stream = MmapStream::with_buffers(device, Type::VideoCapture, buffer_count)?;
        if let Some(timeout) = self.read_timeout {
            stream.set_timeout(timeout);
        }
        self.stream = Some(stream);

        Ok(())
    }
}

impl CameraDevice for V4l2Camera {
    fn is_open(&self) -> bool {
        self.device.is_some() && self.stream.is_some()
    }

    fn read(&mut self) -> Result<RawFrame, CaptureError> {
        let stream = self.stream.as_mut().ok_or(CaptureError::Disconnected)?;

        let read_timeout = self.read_timeout;
        let (buf, meta) = stream.next().map_err(|e| match read_timeout {
            _ if e.raw_os_error() == Some(libc::ENODEV) => CaptureError::Disconnected,
            Some(timeout) if e.kind() == io::ErrorKind::TimedOut => CaptureError::Timeout(timeout),
            _ => CaptureError::Read(e),
        })?;

        let used = (meta.bytesused as usize).min(buf.len());
        let image = decode_frame(&buf[..used], self.format, self.width, self.height)?;

        self.sequence += 1;
        Ok(RawFrame::from_image(image, self.sequence))
    }

    fn release(&mut self) {
        // Dropping the stream turns streaming off before the fd closes.
        self.stream = None;
        if self.device.take().is_some() {
            debug!(index = self.index, "V4L2 device closed");
        }
    }
}

impl std::fmt::Debug for V4l2Camera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("V4l2Camera")
            .field("index", &self.index)
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}
