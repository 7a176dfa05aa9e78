//! Resize and mirror stage

use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::capture::RawFrame;
use crate::config::OutputConfig;

/// A frame at the configured output resolution.
#[derive(Debug, Clone)]
pub struct TransformedFrame {
    pub image: RgbImage,
    pub sequence: u64,
}

impl TransformedFrame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTransformer {
    width: u32,
    height: u32,
    flip: bool,
}

impl FrameTransformer {
    /// `width` and `height` must be non-zero; `Config::validate` enforces this.
    pub fn new(width: u32, height: u32, flip: bool) -> Self {
        Self {
            width,
            height,
            flip,
        }
    }

    pub fn from_config(output: &OutputConfig) -> Self {
        Self::new(output.width, output.height, output.flip)
    }

    /// Resize to the output resolution, then mirror left-right if enabled.
    pub fn apply(&self, frame: RawFrame) -> TransformedFrame {
        let mut image = if frame.image.dimensions() == (self.width, self.height) {
            frame.image
        } else {
            imageops::resize(&frame.image, self.width, self.height, FilterType::Triangle)
        };

        if self.flip {
            imageops::flip_horizontal_in_place(&mut image);
        }

        TransformedFrame {
            image,
            sequence: frame.sequence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gradient(width: u32, height: u32) -> RawFrame {
        let image = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        });
        RawFrame::from_image(image, 1)
    }

    #[test]
    fn output_always_has_configured_size() {
        let sizes = [(1, 1), (2, 3), (320, 240), (641, 481), (1280, 720)];
        for &(native_w, native_h) in &[(640, 480), (3, 2), (800, 600)] {
            for &(w, h) in &sizes {
                for flip in [false, true] {
                    let out = FrameTransformer::new(w, h, flip).apply(gradient(native_w, native_h));
                    assert_eq!((out.width(), out.height()), (w, h));
                }
            }
        }
    }

    #[test]
    fn flip_reverses_columns_exactly() {
        let raw = gradient(7, 3);
        let original = raw.image.clone();
        let out = FrameTransformer::new(7, 3, true).apply(raw);

        for y in 0..3 {
            for x in 0..7 {
                assert_eq!(out.image.get_pixel(x, y), original.get_pixel(6 - x, y));
            }
        }
    }

    #[test]
    fn double_flip_restores_original() {
        let raw = gradient(9, 4);
        let original = raw.image.clone();
        let t = FrameTransformer::new(9, 4, true);

        let once = t.apply(raw);
        let twice = t.apply(RawFrame::from_image(once.image, 2));
        assert_eq!(twice.image, original);
    }

    #[test]
    fn same_size_without_flip_is_untouched() {
        let raw = gradient(16, 16);
        let original = raw.image.clone();
        let out = FrameTransformer::new(16, 16, false).apply(raw);
        assert_eq!(out.image, original);
        assert_eq!(out.sequence, 1);
    }
}
