//! Conversion from a device's native format to the profile's packed layout.

use bytes::Bytes;
use jpeg_decoder::Decoder;

use super::frame::{PixelFormat, RawFrame};
use crate::error::SourceError;

/// Convert one device buffer into a [`RawFrame`] laid out as `target`.
///
/// Short buffers yield short frames; the validator rejects them later.
pub fn decode_frame(
    data: &[u8],
    native: PixelFormat,
    width: u32,
    height: u32,
    target: PixelFormat,
) -> Result<RawFrame, SourceError> {
    if data.is_empty() {
        return Err(SourceError::Empty);
    }

    let (pixels, width, height) = match native {
        PixelFormat::Mjpeg => {
            let mut decoder = Decoder::new(data);
            let rgb = decoder
                .decode()
                .map_err(|e| SourceError::Device(format!("jpeg decode failed: {e}")))?;
            let info = decoder
                .info()
                .ok_or_else(|| SourceError::Device("jpeg has no header".into()))?;
            let rgb = match info.pixel_format {
                jpeg_decoder::PixelFormat::RGB24 => rgb,
                jpeg_decoder::PixelFormat::L8 => rgb.iter().flat_map(|&l| [l, l, l]).collect(),
                other => {
                    return Err(SourceError::Device(format!(
                        "unsupported jpeg pixel format {other:?}"
                    )))
                }
            };
            (
                from_rgb(rgb, target)?,
                u32::from(info.width),
                u32::from(info.height),
            )
        }
        PixelFormat::Yuyv4 if target == PixelFormat::Yuyv4 => (data.to_vec(), width, height),
        PixelFormat::Yuyv4 => (from_rgb(yuyv_to_rgb(data), target)?, width, height),
        PixelFormat::Rgb24 => (from_rgb(data.to_vec(), target)?, width, height),
        PixelFormat::Bgr24 => {
            // BGR -> RGB is the same swap as RGB -> BGR
            (from_rgb(swap_red_blue(data.to_vec()), target)?, width, height)
        }
        PixelFormat::Nv12 => {
            return Err(SourceError::Device(
                "NV12 capture is not supported, pick MJPEG or YUYV".into(),
            ))
        }
    };

    Ok(RawFrame::new(Bytes::from(pixels), width, height))
}

fn from_rgb(rgb: Vec<u8>, target: PixelFormat) -> Result<Vec<u8>, SourceError> {
    match target {
        PixelFormat::Rgb24 => Ok(rgb),
        PixelFormat::Bgr24 => Ok(swap_red_blue(rgb)),
        other => Err(SourceError::Device(format!(
            "cannot convert to {other:?} output"
        ))),
    }
}

fn swap_red_blue(mut pixels: Vec<u8>) -> Vec<u8> {
    for px in pixels.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
    pixels
}

/// BT.601 limited-range YUYV (Y0 U Y1 V) to packed RGB.
fn yuyv_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 2 * 3);
    for chunk in data.chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
    rgb
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = i32::from(y) - 16;
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;
    let clamp = |x: i32| x.clamp(0, 255) as u8;
    [
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
    ]
}
