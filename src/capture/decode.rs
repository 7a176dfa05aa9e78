use image::{Rgb, RgbImage};
use jpeg_decoder::{Decoder, PixelFormat as JpegPixels};

use super::frame::PixelFormat;
use crate::error::CaptureError;

/// Convert one device buffer to RGB24.
///
/// `width` and `height` are the negotiated stream dimensions; MJPEG frames
/// carry their own and ignore them.
pub fn decode_frame(
    data: &[u8],
    format: PixelFormat,
    width: u32,
    height: u32,
) -> Result<RgbImage, CaptureError> {
    match format {
        PixelFormat::Mjpeg => decode_mjpeg(data),
        PixelFormat::Yuyv => yuyv_to_rgb(data, width, height),
        PixelFormat::Rgb24 => packed(data, width, height, |p| p),
        PixelFormat::Bgr24 => packed(data, width, height, |[b, g, r]| [r, g, b]),
    }
}

fn decode_mjpeg(data: &[u8]) -> Result<RgbImage, CaptureError> {
    let mut decoder = Decoder::new(data);
    let pixels = decoder
        .decode()
        .map_err(|e| CaptureError::Decode(e.to_string()))?;
    let info = decoder
        .info()
        .ok_or_else(|| CaptureError::Decode("missing jpeg header".into()))?;
    let (width, height) = (info.width as u32, info.height as u32);

    match info.pixel_format {
        JpegPixels::RGB24 => packed(&pixels, width, height, |p| p),
        JpegPixels::L8 => {
            let rgb = pixels.iter().flat_map(|&l| [l, l, l]).collect();
            from_vec(rgb, width, height)
        }
        other => Err(CaptureError::Decode(format!(
            "unsupported jpeg pixel format {other:?}"
        ))),
    }
}

fn packed(
    data: &[u8],
    width: u32,
    height: u32,
    map: impl Fn([u8; 3]) -> [u8; 3],
) -> Result<RgbImage, CaptureError> {
    let needed = width as usize * height as usize * 3;
    let data = data.get(..needed).ok_or(CaptureError::InvalidFrame {
        len: data.len(),
        width,
        height,
    })?;

    let rgb = data
        .chunks_exact(3)
        .flat_map(|c| map([c[0], c[1], c[2]]))
        .collect();
    from_vec(rgb, width, height)
}

/// YUYV 4:2:2, BT.601 limited range.
fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Result<RgbImage, CaptureError> {
    let needed = width as usize * height as usize * 2;
    if width % 2 != 0 || data.len() < needed {
        return Err(CaptureError::InvalidFrame {
            len: data.len(),
            width,
            height,
        });
    }

    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for quad in data[..needed].chunks_exact(4) {
        let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v).0);
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v).0);
    }
    from_vec(rgb, width, height)
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> Rgb<u8> {
    let c = (y as i32 - 16).max(0);
    let d = u as i32 - 128;
    let e = v as i32 - 128;

    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    Rgb([
        clamp(298 * c + 409 * e),
        clamp(298 * c - 100 * d - 208 * e),
        clamp(298 * c + 516 * d),
    ])
}

fn from_vec(rgb: Vec<u8>, width: u32, height: u32) -> Result<RgbImage, CaptureError> {
    let len = rgb.len();
    RgbImage::from_raw(width, height, rgb).ok_or(CaptureError::InvalidFrame { len, width, height })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;

    #[test]
    fn bgr_is_swapped() {
        let img = decode_frame(&[1, 2, 3, 4, 5, 6], PixelFormat::Bgr24, 2, 1).unwrap();
        assert_eq!(img.as_raw(), &vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn rgb_passes_through() {
        let img = decode_frame(&[9, 8, 7], PixelFormat::Rgb24, 1, 1).unwrap();
        assert_eq!(img.get_pixel(0, 0), &Rgb([9, 8, 7]));
    }

    #[test]
    fn yuyv_black_and_white() {
        // Two pixels: black (Y=16) and white (Y=235), neutral chroma.
        let img = decode_frame(&[16, 128, 235, 128], PixelFormat::Yuyv, 2, 1).unwrap();
        assert_eq!(img.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(img.get_pixel(1, 0), &Rgb([255, 255, 255]));
    }

    #[test]
    fn yuyv_short_buffer_is_rejected() {
        let err = decode_frame(&[16, 128], PixelFormat::Yuyv, 2, 1).unwrap_err();
        assert!(matches!(err, CaptureError::InvalidFrame { .. }));
    }

    #[test]
    fn mjpeg_decodes_to_rgb() {
        let src = RgbImage::from_pixel(16, 8, Rgb([200, 40, 40]));
        let mut jpeg = Vec::new();
        src.write_with_encoder(JpegEncoder::new_with_quality(&mut jpeg, 95))
            .unwrap();

        let img = decode_frame(&jpeg, PixelFormat::Mjpeg, 0, 0).unwrap();
        assert_eq!(img.dimensions(), (16, 8));
        let Rgb([r, g, b]) = *img.get_pixel(8, 4);
        assert!(r > 180 && g < 70 && b < 70, "got {r},{g},{b}");
    }

    #[test]
    fn garbage_mjpeg_is_a_decode_error() {
        let err = decode_frame(&[0, 1, 2, 3], PixelFormat::Mjpeg, 0, 0).unwrap_err();
        assert!(matches!(err, CaptureError::Decode(_)));
    }
}
