//! Timestamped PNG output.

use chrono::{DateTime, Local, TimeZone};
use image::{GrayImage, ImageFormat};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::traits::Result;

/// Timestamp layout used in filenames, microsecond precision.
const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S-%6f";

/// Build `<timestamp>_cam_<id>.png` for a capture taken at `timestamp`.
pub fn image_filename<Tz>(timestamp: &DateTime<Tz>, camera_id: &str) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!("{}_cam_{camera_id}.png", timestamp.format(TIMESTAMP_FORMAT))
}

/// Create the output directory and any missing parents.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    Ok(())
}

/// Write `image` as PNG into `dir`, named after the current local time.
pub fn save_png(image: &GrayImage, dir: &Path, camera_id: &str) -> Result<PathBuf> {
    let path = dir.join(image_filename(&Local::now(), camera_id));
    image.save_with_format(&path, ImageFormat::Png)?;
    info!("Image saved at {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    #[test]
    fn test_filename_layout() {
        let timestamp = NaiveDate::from_ymd_opt(2024, 3, 7)
            .and_then(|date| date.and_hms_micro_opt(9, 5, 1, 42))
            .expect("valid timestamp")
            .and_utc();
        assert_eq!(
            image_filename(&timestamp, "DEV_1AB22C00E2A4"),
            "20240307-090501-000042_cam_DEV_1AB22C00E2A4.png"
        );
        assert_eq!(
            image_filename(&Utc.timestamp_opt(0, 0).single().expect("epoch"), "x"),
            "19700101-000000-000000_cam_x.png"
        );
    }

    #[test]
    fn test_ensure_dir_is_idempotent() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let nested = tmp.path().join("a").join("b");
        ensure_dir(&nested).expect("first create");
        ensure_dir(&nested).expect("second create");
        assert!(nested.is_dir());
    }

    #[test]
    fn test_save_png_round_trips_pixels() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let image = GrayImage::from_fn(16, 4, |x, _| {
            image::Luma([u8::try_from(x * 16).unwrap_or(u8::MAX)])
        });

        let path = save_png(&image, tmp.path(), "MOCK-3").expect("save should succeed");

        let name = path.file_name().and_then(|n| n.to_str()).expect("utf-8 name");
        assert!(name.ends_with("_cam_MOCK-3.png"), "unexpected name {name}");
        let loaded = image::open(&path).expect("open saved png").to_luma8();
        assert_eq!(loaded, image);
    }

    #[test]
    fn test_save_png_into_missing_dir_fails() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let image = GrayImage::new(2, 2);
        assert!(save_png(&image, &tmp.path().join("missing"), "x").is_err());
    }
}
