//! Multi-cam-capture binary: one software-triggered PNG per camera per exposure.
//!
//! ## Usage
//!
//! ```bash
//! # Sweep the default exposures (800, 1300, 1500 us) across five cameras
//! multi-cam-capture
//!
//! # Custom exposures into a capture directory, any number of cameras
//! multi-cam-capture --output captures --exposures 500,1000,2000 --no-expect
//!
//! # Run against simulated cameras
//! multi-cam-capture --mock --list
//! ```

use anyhow::{bail, Context, Result};
use tracing::info;

use multi_cam_capture::{CameraBackend, Config, MockBackend, Session, V4l2Backend};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("multi_cam_capture=info".parse()?),
        )
        .init();

    let config = Config::from_env().context("Invalid configuration")?;

    match config.mock_cameras {
        Some(count) => {
            info!("Using {count} simulated cameras");
            run(MockBackend::new(count), config)
        }
        None => run(V4l2Backend, config),
    }
}

fn run<B: CameraBackend>(backend: B, config: Config) -> Result<()> {
    if config.list_only {
        let cameras = backend.enumerate().context("Failed to enumerate cameras")?;
        info!("{} cameras connected.", cameras.len());
        for camera in &cameras {
            info!("- {} ({}, {})", camera.id, camera.card, camera.bus_info);
        }
        return Ok(());
    }

    let session = Session::new(backend, config.capture);
    let report = session.run().context("Capture sweep failed")?;

    let failures = report.failure_count();
    info!(
        "Saved {} images from {} cameras over {} exposures",
        report.saved_paths().count(),
        report.cameras.len(),
        report.rounds.len()
    );
    if failures > 0 {
        bail!("{failures} captures failed");
    }
    Ok(())
}
