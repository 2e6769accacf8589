//! Pixel format conversion to 8-bit monochrome.
//!
//! Every saved image is Mono8 regardless of what the camera streams. YUYV
//! keeps its luma plane, RGB3 goes through BT.601 luma weights, GREY is
//! repacked to drop stride padding and MJPG is decoded first.

use image::{GrayImage, ImageFormat};

use crate::traits::{CameraError, Format, FourCC, Frame, Result};

/// Convert a captured frame to an 8-bit grayscale image.
pub fn to_mono8(frame: &Frame, format: &Format) -> Result<GrayImage> {
    if format.width == 0 || format.height == 0 {
        return Err(CameraError::StreamError(format!(
            "Invalid frame dimensions {}x{}",
            format.width, format.height
        )));
    }

    match format.fourcc {
        FourCC::MJPG => decode_mjpg(&frame.data, format),
        FourCC::GREY => repack(frame, format, 1, |px| px.first().copied()),
        FourCC::YUYV => repack(frame, format, 2, |px| px.first().copied()),
        FourCC::RGB3 => repack(frame, format, 3, |px| match px {
            [r, g, b] => Some(luma(*r, *g, *b)),
            _ => None,
        }),
        other => Err(CameraError::StreamError(format!(
            "No Mono8 conversion for pixel format {other}"
        ))),
    }
}

/// Rec. 601 luma.
fn luma(r: u8, g: u8, b: u8) -> u8 {
    let y = 0.114f32.mul_add(
        f32::from(b),
        0.587f32.mul_add(f32::from(g), 0.299 * f32::from(r)),
    );
    crate::traits::clamp_u8(y.round())
}

/// Walk each row of a packed format, extracting one byte per pixel.
fn repack<F>(frame: &Frame, format: &Format, bytes_per_pixel: usize, pick: F) -> Result<GrayImage>
where
    F: Fn(&[u8]) -> Option<u8>,
{
    let width = format.width as usize;
    let height = format.height as usize;
    let row_bytes = width * bytes_per_pixel;
    let stride = (format.stride as usize).max(row_bytes);

    let needed = stride * (height - 1) + row_bytes;
    if frame.data.len() < needed {
        return Err(CameraError::StreamError(format!(
            "Frame too short for {}x{} {}: expected {needed} bytes, got {}",
            format.width,
            format.height,
            format.fourcc,
            frame.data.len()
        )));
    }

    let mut pixels = Vec::with_capacity(width * height);
    for row in frame.data.chunks(stride).take(height) {
        let row = row.get(..row_bytes).unwrap_or(row);
        for px in row.chunks_exact(bytes_per_pixel) {
            pixels.push(pick(px).unwrap_or(0));
        }
    }

    GrayImage::from_raw(format.width, format.height, pixels).ok_or_else(|| {
        CameraError::StreamError("Converted buffer does not match frame size".to_owned())
    })
}

fn decode_mjpg(data: &[u8], format: &Format) -> Result<GrayImage> {
    let image = image::load_from_memory_with_format(data, ImageFormat::Jpeg)?.to_luma8();
    if image.dimensions() != (format.width, format.height) {
        tracing::debug!(
            decoded_width = image.width(),
            decoded_height = image.height(),
            format_width = format.width,
            format_height = format.height,
            "MJPG frame size differs from negotiated format"
        );
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::FrameMetadata;
    use std::time::Duration;

    fn frame(data: Vec<u8>) -> Frame {
        let bytes_used = u32::try_from(data.len()).expect("small test frame");
        Frame {
            data,
            metadata: FrameMetadata {
                sequence: 0,
                timestamp: Duration::ZERO,
                bytes_used,
            },
        }
    }

    #[test]
    fn test_yuyv_keeps_luma_plane() {
        let format = Format::new(4, 1, FourCC::YUYV);
        let image = to_mono8(&frame(vec![10, 128, 20, 128, 30, 90, 40, 200]), &format)
            .expect("conversion should succeed");
        assert_eq!(image.as_raw(), &[10, 20, 30, 40]);
    }

    #[test]
    fn test_grey_drops_stride_padding() {
        let mut format = Format::new(2, 2, FourCC::GREY);
        format.stride = 4;
        // last row may omit trailing padding
        let image = to_mono8(&frame(vec![1, 2, 0, 0, 3, 4]), &format)
            .expect("conversion should succeed");
        assert_eq!(image.as_raw(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_rgb_uses_bt601_weights() {
        let format = Format::new(3, 1, FourCC::RGB3);
        let image = to_mono8(
            &frame(vec![255, 0, 0, 0, 255, 0, 200, 200, 200]),
            &format,
        )
        .expect("conversion should succeed");
        assert_eq!(image.as_raw(), &[76, 150, 200]);
    }

    #[test]
    fn test_short_frame_is_rejected() {
        let format = Format::new(4, 4, FourCC::YUYV);
        let result = to_mono8(&frame(vec![0; 10]), &format);
        assert!(matches!(result, Err(CameraError::StreamError(_))));
    }

    #[test]
    fn test_mjpg_is_decoded() {
        let mut jpeg = Vec::new();
        GrayImage::from_pixel(8, 8, image::Luma([120]))
            .write_to(&mut std::io::Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .expect("encode test jpeg");

        let format = Format::new(8, 8, FourCC::MJPG);
        let image = to_mono8(&frame(jpeg), &format).expect("decode should succeed");
        assert_eq!(image.dimensions(), (8, 8));
        let center = image.get_pixel(4, 4).0[0];
        assert!(center.abs_diff(120) <= 2, "unexpected luma {center}");
    }

    #[test]
    fn test_unknown_fourcc_is_rejected() {
        let format = Format::new(2, 2, FourCC::new(b"NV12"));
        assert!(to_mono8(&frame(vec![0; 8]), &format).is_err());
    }
}
