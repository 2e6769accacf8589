//! Sanity checks for captured frames and saved images.
//!
//! Used by tests and by the integration suite to confirm that a sweep
//! produced plausible output: frames arrive in order, exposure changes show
//! up as brightness changes, and a known ramp survives Mono8 conversion.

use image::GrayImage;

use crate::traits::{CameraError, Exposure, Frame, Result};

/// Allowed luminance drop between consecutive exposures (sensor noise).
const LADDER_TOLERANCE: f32 = 1.0;

/// Minimum left-to-right luminance rise for a gradient.
const MIN_GRADIENT_RISE: f32 = 50.0;

/// Validates that a sequence of frames has incrementing sequence numbers.
///
/// # Errors
///
/// Returns `StreamError` if the slice is empty or any sequence number does
/// not increase by exactly 1 from the previous frame.
pub fn validate_frame_sequence(frames: &[Frame]) -> Result<()> {
    if frames.is_empty() {
        return Err(CameraError::StreamError(
            "Cannot validate empty frame sequence".to_owned(),
        ));
    }

    for (i, pair) in frames.windows(2).enumerate() {
        if let [prev, curr] = pair {
            let expected = prev.metadata.sequence.wrapping_add(1);
            if curr.metadata.sequence != expected {
                return Err(CameraError::StreamError(format!(
                    "Frame sequence gap at index {}: expected {expected}, got {}",
                    i + 1,
                    curr.metadata.sequence
                )));
            }
        }
    }

    Ok(())
}

/// Mean pixel value of a Mono8 image.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean_luminance(image: &GrayImage) -> f32 {
    let pixels = image.as_raw();
    if pixels.is_empty() {
        return 0.0;
    }
    let sum: u64 = pixels.iter().map(|&p| u64::from(p)).sum();
    sum as f32 / pixels.len() as f32
}

/// Validates that brightness does not fall as exposure rises.
///
/// `images` pairs each image with the exposure it was taken at; order does
/// not matter.
///
/// # Errors
///
/// Returns `StreamError` if fewer than two images are given or a longer
/// exposure is darker than a shorter one beyond the noise tolerance.
pub fn validate_exposure_ladder(images: &[(Exposure, GrayImage)]) -> Result<()> {
    if images.len() < 2 {
        return Err(CameraError::StreamError(
            "Exposure ladder needs at least two images".to_owned(),
        ));
    }

    let mut rungs: Vec<(Exposure, f32)> = images
        .iter()
        .map(|(exposure, image)| (*exposure, mean_luminance(image)))
        .collect();
    rungs.sort_by_key(|(exposure, _)| *exposure);

    for pair in rungs.windows(2) {
        if let [(short, dim), (long, bright)] = pair {
            if *bright < *dim - LADDER_TOLERANCE {
                return Err(CameraError::StreamError(format!(
                    "Exposure {long}us is darker ({bright:.1}) than {short}us ({dim:.1})"
                )));
            }
        }
    }

    Ok(())
}

/// Validates that a Mono8 image holds a horizontal dark-to-light ramp.
///
/// Samples every 10th pixel of the middle row.
///
/// # Errors
///
/// Returns `StreamError` if luminance decreases along the row or the total
/// rise is too small (solid image).
pub fn validate_gradient(image: &GrayImage) -> Result<()> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(CameraError::StreamError("Empty image".to_owned()));
    }
    let center_y = height / 2;

    let mut first: Option<f32> = None;
    let mut prev: Option<f32> = None;

    for x in (0..width).step_by(10) {
        let luminance = f32::from(image.get_pixel(x, center_y).0[0]);

        if let Some(prev) = prev {
            // small decreases are rounding
            if luminance < prev - 1.0 {
                return Err(CameraError::StreamError(format!(
                    "Gradient not monotonically increasing at x={x}: \
                     luminance {luminance} < previous {prev}"
                )));
            }
        }

        first.get_or_insert(luminance);
        prev = Some(luminance);
    }

    if let (Some(first), Some(last)) = (first, prev) {
        let rise = last - first;
        if rise < MIN_GRADIENT_RISE {
            return Err(CameraError::StreamError(format!(
                "Insufficient luminance change for gradient: {rise} \
                 (expected at least {MIN_GRADIENT_RISE})"
            )));
        }
    }

    Ok(())
}
