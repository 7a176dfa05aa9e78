//! JPEG compression stage

use std::time::Instant;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;

use crate::error::EncodeError;
use crate::transform::TransformedFrame;

/// Compressed frame bytes. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload(Bytes);

impl EncodedPayload {
    pub fn new(bytes: impl Into<Bytes>) -> Result<Self, EncodeError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(EncodeError::Empty);
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_bytes(&self) -> Bytes {
        self.0.clone()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub trait FrameEncoder {
    fn encode(&mut self, frame: &TransformedFrame) -> Result<EncodedPayload, EncodeError>;
}

/// Baseline JPEG at a fixed quality.
#[derive(Debug, Clone, Copy)]
pub struct JpegEncoder {
    quality: u8,
}

impl Default for JpegEncoder {
    fn default() -> Self {
        Self { quality: 95 }
    }
}

impl JpegEncoder {
    /// Quality is clamped to 1..=100.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }
}

impl FrameEncoder for JpegEncoder {
    fn encode(&mut self, frame: &TransformedFrame) -> Result<EncodedPayload, EncodeError> {
        let start = Instant::now();

        let mut buf = Vec::new();
        frame
            .image
            .write_with_encoder(ImageJpegEncoder::new_with_quality(&mut buf, self.quality))?;

        metrics::histogram!("campush_encode_time_us").record(start.elapsed().as_micros() as f64);
        EncodedPayload::new(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn frame(width: u32, height: u32) -> TransformedFrame {
        TransformedFrame {
            image: RgbImage::from_fn(width, height, |x, y| {
                Rgb([(x % 256) as u8, (y % 256) as u8, 128])
            }),
            sequence: 1,
        }
    }

    #[test]
    fn produces_jpeg_of_frame_size() {
        let payload = JpegEncoder::default().encode(&frame(320, 240)).unwrap();
        assert_eq!(&payload.as_bytes()[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(payload.as_bytes()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (320, 240));
    }

    #[test]
    fn lower_quality_is_smaller() {
        let f = frame(640, 480);
        let high = JpegEncoder::new(95).encode(&f).unwrap();
        let low = JpegEncoder::new(30).encode(&f).unwrap();
        assert!(low.len() < high.len());
    }

    #[test]
    fn quality_is_clamped() {
        assert_eq!(JpegEncoder::new(0).quality(), 1);
        assert_eq!(JpegEncoder::new(250).quality(), 100);
    }

    #[test]
    fn empty_payload_is_rejected() {
        assert!(matches!(
            EncodedPayload::new(Vec::new()),
            Err(EncodeError::Empty)
        ));
    }
}
