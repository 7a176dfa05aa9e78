use std::time::Instant;

use image::RgbImage;

use crate::error::CaptureError;

/// A captured frame, already converted to RGB24 at the device's native size.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Pixel data, row-major RGB24
    pub image: RgbImage,

    /// Monotonic capture counter, starting at 1
    pub sequence: u64,

    /// When the frame left the device; the pipeline reports latency from here
    pub timestamp: Instant,
}

impl RawFrame {
    /// Wrap an RGB24 buffer, checking it holds exactly `width * height` pixels.
    pub fn from_rgb(
        data: Vec<u8>,
        width: u32,
        height: u32,
        sequence: u64,
    ) -> Result<Self, CaptureError> {
        let len = data.len();
        let expected = width as usize * height as usize * 3;
        let image = Some(data)
            .filter(|_| len == expected && expected > 0)
            .and_then(|data| RgbImage::from_raw(width, height, data))
            .ok_or(CaptureError::InvalidFrame { len, width, height })?;

        Ok(Self::from_image(image, sequence))
    }

    pub fn from_image(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            sequence,
            timestamp: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Pixel formats a camera may deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Mjpeg,
    Yuyv,
    Rgb24,
    Bgr24,
}

impl PixelFormat {
    /// Negotiation order, most preferred first.
    pub const PREFERENCE: [PixelFormat; 4] = [
        PixelFormat::Mjpeg,
        PixelFormat::Yuyv,
        PixelFormat::Rgb24,
        PixelFormat::Bgr24,
    ];

    pub fn fourcc(self) -> &'static [u8; 4] {
        match self {
            PixelFormat::Mjpeg => b"MJPG",
            PixelFormat::Yuyv => b"YUYV",
            PixelFormat::Rgb24 => b"RGB3",
            PixelFormat::Bgr24 => b"BGR3",
        }
    }

    pub fn from_fourcc(code: &[u8; 4]) -> Option<Self> {
        Self::PREFERENCE.into_iter().find(|f| f.fourcc() == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_buffer() {
        let err = RawFrame::from_rgb(vec![0; 10], 2, 2, 1).unwrap_err();
        assert!(matches!(
            err,
            CaptureError::InvalidFrame {
                len: 10,
                width: 2,
                height: 2
            }
        ));
    }

    #[test]
    fn rejects_oversized_buffer() {
        assert!(RawFrame::from_rgb(vec![0; 13], 2, 2, 1).is_err());
    }

    #[test]
    fn keeps_native_size() {
        let frame = RawFrame::from_rgb(vec![7; 4 * 3 * 3], 4, 3, 9).unwrap();
        assert_eq!((frame.width(), frame.height()), (4, 3));
        assert_eq!(frame.sequence, 9);
    }

    #[test]
    fn fourcc_lookup() {
        assert_eq!(PixelFormat::from_fourcc(b"YUYV"), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(b"H264"), None);
    }
}
