//! Exposure sweeps across every connected camera.
//!
//! A sweep enumerates the cameras, checks the count against the expected
//! rig size and then, for each exposure in order, captures one
//! software-triggered frame per camera. Each camera in a round gets its own
//! worker thread which opens the enumerated device, configures it, captures, and
//! saves a Mono8 PNG. A round ends when every worker has been joined, so
//! rounds never overlap.

use std::path::{Path, PathBuf};
use std::thread;

use tracing::{debug, info, warn};

use crate::convert::to_mono8;
use crate::output::{ensure_dir, save_png};
use crate::traits::{
    CameraBackend, CameraDevice, CameraError, CameraInfo, CaptureStream, Exposure, Format,
    TriggerConfig,
};

/// Exposure times, in microseconds, used when none are configured.
pub const DEFAULT_EXPOSURES_US: [u32; 3] = [800, 1300, 1500];

/// Number of cameras in the standard rig.
pub const DEFAULT_EXPECTED_CAMERAS: usize = 5;

/// Errors that stop a sweep or fail a single capture.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The number of connected cameras differs from the configured rig size.
    #[error("Expected {expected} cameras but found {found}")]
    CameraCountMismatch {
        /// Configured count.
        expected: usize,
        /// Enumerated count.
        found: usize,
    },
    /// No cameras are connected.
    #[error("No cameras found")]
    NoCameras,
    /// The exposure list is empty.
    #[error("No exposure times configured")]
    NoExposures,
    /// A camera operation failed.
    #[error(transparent)]
    Camera(#[from] CameraError),
    /// A capture worker could not be started.
    #[error("Failed to start worker for {camera}: {source}")]
    Spawn {
        /// Camera id.
        camera: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// A capture worker panicked.
    #[error("Worker for {camera} panicked: {message}")]
    WorkerPanicked {
        /// Camera id.
        camera: String,
        /// Panic payload, when it was a string.
        message: String,
    },
}

/// Sweep configuration.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Directory receiving the PNG files.
    pub output_dir: PathBuf,
    /// Exposure times, captured in this order.
    pub exposures: Vec<Exposure>,
    /// Required camera count; `None` accepts any non-zero count.
    pub expected_cameras: Option<usize>,
    /// Driver buffers per stream.
    pub buffer_count: u32,
    /// Format to request; `None` keeps the camera's current format.
    pub format: Option<Format>,
    /// Trigger setup applied before streaming.
    pub trigger: TriggerConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./"),
            exposures: DEFAULT_EXPOSURES_US
                .iter()
                .copied()
                .filter_map(Exposure::from_micros)
                .collect(),
            expected_cameras: Some(DEFAULT_EXPECTED_CAMERAS),
            buffer_count: 4,
            format: None,
            trigger: TriggerConfig::software(),
        }
    }
}

/// Result of one camera's capture in one round.
#[derive(Debug)]
pub struct CaptureOutcome {
    /// Camera id.
    pub camera: String,
    /// Exposure used.
    pub exposure: Exposure,
    /// Saved image path, or why the capture failed.
    pub result: Result<PathBuf, SessionError>,
}

/// All outcomes for one exposure, in camera enumeration order.
#[derive(Debug)]
pub struct RoundReport {
    /// Exposure used for the round.
    pub exposure: Exposure,
    /// One entry per camera.
    pub outcomes: Vec<CaptureOutcome>,
}

impl RoundReport {
    /// Paths written during the round.
    pub fn saved(&self) -> impl Iterator<Item = &Path> {
        self.outcomes
            .iter()
            .filter_map(|outcome| outcome.result.as_ref().ok().map(PathBuf::as_path))
    }

    /// Outcomes that failed.
    pub fn failures(&self) -> impl Iterator<Item = &CaptureOutcome> {
        self.outcomes.iter().filter(|outcome| outcome.result.is_err())
    }

    /// Whether every camera saved an image.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Report for a whole sweep.
#[derive(Debug)]
pub struct SweepReport {
    /// Cameras found during discovery.
    pub cameras: Vec<CameraInfo>,
    /// One report per exposure, in configured order.
    pub rounds: Vec<RoundReport>,
}

impl SweepReport {
    /// Number of failed captures across all rounds.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.rounds.iter().map(|round| round.failures().count()).sum()
    }

    /// Every path written during the sweep.
    pub fn saved_paths(&self) -> impl Iterator<Item = &Path> {
        self.rounds.iter().flat_map(RoundReport::saved)
    }
}

/// Capture one frame from one camera and save it.
///
/// Opens the camera, applies format, exposure and trigger, starts a stream,
/// fires the software trigger, converts the frame to Mono8 and writes the
/// PNG.
pub fn capture_one<B: CameraBackend>(
    backend: &B,
    camera: &CameraInfo,
    exposure: Exposure,
    config: &CaptureConfig,
) -> Result<PathBuf, SessionError> {
    let camera_id = camera.id.as_str();
    let mut device = backend.open(camera)?;

    if let Some(format) = &config.format {
        let actual = device.set_format(format)?;
        debug!(
            camera = camera_id,
            width = actual.width,
            height = actual.height,
            fourcc = %actual.fourcc,
            "format set"
        );
    }
    device.set_exposure(exposure)?;
    device.set_trigger(config.trigger)?;
    debug!(camera = camera_id, trigger = %config.trigger.source, "trigger configured");

    let format = device.format()?;
    let mut stream = device.create_stream(config.buffer_count)?;
    if config.trigger.requires_software_trigger() {
        stream.trigger_software()?;
    }
    let frame = stream.next_frame()?;
    // stop streaming before the encode
    drop(stream);
    debug!(
        camera = camera_id,
        sequence = frame.metadata.sequence,
        bytes = frame.metadata.bytes_used,
        "frame received"
    );

    let image = to_mono8(&frame, &format)?;
    Ok(save_png(&image, &config.output_dir, camera_id)?)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}

/// Runs exposure sweeps over the cameras of one backend.
pub struct Session<B> {
    backend: B,
    config: CaptureConfig,
}

impl<B: CameraBackend> Session<B> {
    /// Create a session.
    pub const fn new(backend: B, config: CaptureConfig) -> Self {
        Self { backend, config }
    }

    /// Session configuration.
    pub const fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Enumerate cameras and check the count against the configuration.
    pub fn discover(&self) -> Result<Vec<CameraInfo>, SessionError> {
        let cameras = self.backend.enumerate()?;

        if cameras.is_empty() {
            return Err(SessionError::NoCameras);
        }
        if let Some(expected) = self.config.expected_cameras {
            if cameras.len() != expected {
                return Err(SessionError::CameraCountMismatch {
                    expected,
                    found: cameras.len(),
                });
            }
        }

        info!("{} cameras connected.", cameras.len());
        for camera in &cameras {
            info!("- {}", camera.id);
        }
        Ok(cameras)
    }

    /// Capture one frame per camera at `exposure`, concurrently.
    ///
    /// Returns once every worker has finished. A failing or panicking worker
    /// is recorded in the report and does not affect the others.
    pub fn capture_exposure(&self, cameras: &[CameraInfo], exposure: Exposure) -> RoundReport {
        let outcomes = thread::scope(|scope| {
            let workers: Vec<_> = cameras
                .iter()
                .map(|camera| {
                    let spawned = thread::Builder::new()
                        .name(format!("cam-{}", camera.id))
                        .spawn_scoped(scope, move || {
                            capture_one(&self.backend, camera, exposure, &self.config)
                        });
                    (camera, spawned)
                })
                .collect();

            workers
                .into_iter()
                .map(|(camera, spawned)| {
                    let result = match spawned {
                        Ok(handle) => handle.join().unwrap_or_else(|payload| {
                            Err(SessionError::WorkerPanicked {
                                camera: camera.id.clone(),
                                message: panic_message(payload.as_ref()),
                            })
                        }),
                        Err(source) => Err(SessionError::Spawn {
                            camera: camera.id.clone(),
                            source,
                        }),
                    };
                    CaptureOutcome {
                        camera: camera.id.clone(),
                        exposure,
                        result,
                    }
                })
                .collect()
        });

        let report = RoundReport { exposure, outcomes };
        for failure in report.failures() {
            if let Err(err) = &failure.result {
                warn!(camera = %failure.camera, %exposure, "capture failed: {err}");
            }
        }
        report
    }

    /// Discover cameras, prepare the output directory and capture every exposure.
    pub fn run(&self) -> Result<SweepReport, SessionError> {
        if self.config.exposures.is_empty() {
            return Err(SessionError::NoExposures);
        }

        let cameras = self.discover()?;
        ensure_dir(&self.config.output_dir)?;

        let mut rounds = Vec::with_capacity(self.config.exposures.len());
        for &exposure in &self.config.exposures {
            info!("Capturing images with exposure time: {exposure}");
            rounds.push(self.capture_exposure(&cameras, exposure));
        }

        Ok(SweepReport { cameras, rounds })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBackend, MockDevice};
    use crate::traits::{CaptureStream, Frame, Result as CameraResult};
    use crate::traits::{CameraDevice, DeviceCapabilities, TriggerSource};
    use crate::validation::{mean_luminance, validate_exposure_ladder};

    fn exposures(values: &[u32]) -> Vec<Exposure> {
        values
            .iter()
            .map(|&us| Exposure::from_micros(us).expect("non-zero exposure"))
            .collect()
    }

    fn config(dir: &Path, expected: Option<usize>) -> CaptureConfig {
        CaptureConfig {
            output_dir: dir.to_path_buf(),
            expected_cameras: expected,
            format: Some(Format::new(64, 48, crate::traits::FourCC::YUYV)),
            ..CaptureConfig::default()
        }
    }

    #[test]
    fn test_default_config_matches_standard_rig() {
        let config = CaptureConfig::default();
        assert_eq!(config.exposures, exposures(&[800, 1300, 1500]));
        assert_eq!(config.expected_cameras, Some(5));
        assert_eq!(config.output_dir, PathBuf::from("./"));
        assert!(config.trigger.requires_software_trigger());
    }

    #[test]
    fn test_full_sweep_saves_one_image_per_camera_per_exposure() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let session = Session::new(MockBackend::new(5), config(tmp.path(), Some(5)));

        let report = session.run().expect("sweep should succeed");

        assert_eq!(report.cameras.len(), 5);
        assert_eq!(report.rounds.len(), 3);
        assert_eq!(report.failure_count(), 0);
        for (round, expected) in report.rounds.iter().zip(exposures(&[800, 1300, 1500])) {
            assert_eq!(round.exposure, expected);
            assert_eq!(round.outcomes.len(), 5);
            assert!(round.is_success());
        }

        let written = std::fs::read_dir(tmp.path()).expect("read output dir").count();
        assert_eq!(written, report.saved_paths().count());
        assert!(written >= 5, "expected images on disk, found {written}");
        for path in report.saved_paths() {
            let image = image::open(path).expect("saved png").to_luma8();
            assert_eq!(image.dimensions(), (64, 48));
        }
    }

    #[test]
    fn test_camera_count_mismatch_captures_nothing() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let out = tmp.path().join("out");
        let session = Session::new(MockBackend::new(3), config(&out, Some(5)));

        let err = session.run().expect_err("count mismatch");
        assert!(matches!(
            err,
            SessionError::CameraCountMismatch {
                expected: 5,
                found: 3
            }
        ));
        assert!(!out.exists(), "output dir must not be created");
    }

    #[test]
    fn test_no_cameras_without_expected_count() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let session = Session::new(MockBackend::new(0), config(tmp.path(), None));
        assert!(matches!(session.run(), Err(SessionError::NoCameras)));
    }

    #[test]
    fn test_no_cameras_even_when_zero_expected() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let out = tmp.path().join("out");
        let session = Session::new(MockBackend::new(0), config(&out, Some(0)));

        assert!(matches!(session.run(), Err(SessionError::NoCameras)));
        assert!(!out.exists(), "output dir must not be created");
    }

    #[test]
    fn test_sweep_applies_exposure_and_software_trigger() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let backend = MockBackend::new(2);
        let session = Session::new(backend.clone(), config(tmp.path(), Some(2)));

        let report = session.run().expect("sweep should succeed");

        let applied = backend.applied();
        assert_eq!(applied.len(), 6);
        for settings in &applied {
            assert_eq!(settings.trigger, TriggerConfig::software());
            assert_eq!(settings.format, Format::new(64, 48, crate::traits::FourCC::YUYV));
        }
        let mut seen: Vec<u32> = applied
            .iter()
            .filter_map(|settings| settings.exposure.map(Exposure::as_micros))
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, [800, 800, 1300, 1300, 1500, 1500]);

        // brightness on disk follows the exposure of each round
        let ladder: Vec<(Exposure, image::GrayImage)> = report
            .rounds
            .iter()
            .map(|round| {
                let path = round
                    .outcomes
                    .iter()
                    .find(|outcome| outcome.camera == "MOCK-0")
                    .and_then(|outcome| outcome.result.as_ref().ok())
                    .expect("MOCK-0 saved an image");
                let image = image::open(path).expect("saved png").to_luma8();
                (round.exposure, image)
            })
            .collect();
        validate_exposure_ladder(&ladder).expect("ladder should rise");

        let means: Vec<f32> = ladder.iter().map(|(_, image)| mean_luminance(image)).collect();
        assert!(means[2] > means[0], "1500us not brighter than 800us: {means:?}");
    }

    #[test]
    fn test_empty_exposure_list_is_rejected() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut config = config(tmp.path(), None);
        config.exposures.clear();
        let session = Session::new(MockBackend::new(1), config);
        assert!(matches!(session.run(), Err(SessionError::NoExposures)));
    }

    #[test]
    fn test_failing_camera_does_not_abort_round() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let backend = MockBackend::new(3).with_failing("MOCK-1");
        let session = Session::new(backend, config(tmp.path(), Some(3)));

        let report = session.run().expect("sweep runs despite failures");

        assert_eq!(report.failure_count(), 3);
        for round in &report.rounds {
            let failed: Vec<&str> = round.failures().map(|o| o.camera.as_str()).collect();
            assert_eq!(failed, ["MOCK-1"]);
            assert_eq!(round.saved().count(), 2);
        }
    }

    #[test]
    fn test_outcomes_follow_enumeration_order() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let session = Session::new(MockBackend::new(4), config(tmp.path(), None));
        let cameras = session.discover().expect("discover");

        let round = session.capture_exposure(&cameras, exposures(&[1000])[0]);

        let ids: Vec<&str> = round.outcomes.iter().map(|o| o.camera.as_str()).collect();
        assert_eq!(ids, ["MOCK-0", "MOCK-1", "MOCK-2", "MOCK-3"]);
    }

    #[test]
    fn test_capture_one_names_file_after_camera() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let config = config(tmp.path(), None);
        let camera = MockDevice::with_index(1).info().clone();
        let path = capture_one(&MockBackend::new(2), &camera, exposures(&[800])[0], &config)
            .expect("capture should succeed");
        let name = path.file_name().and_then(|n| n.to_str()).expect("utf-8 name");
        assert!(name.ends_with("_cam_MOCK-1.png"), "unexpected name {name}");
    }

    #[test]
    fn test_capture_one_unknown_camera() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let config = config(tmp.path(), None);
        let camera = MockDevice::with_index(7).info().clone();
        let result = capture_one(&MockBackend::new(1), &camera, exposures(&[800])[0], &config);
        assert!(matches!(
            result,
            Err(SessionError::Camera(CameraError::DeviceNotFound(_)))
        ));
    }

    /// Backend whose devices panic while streaming.
    struct PanickingBackend;

    struct PanickingDevice(MockDevice);

    struct PanickingStream;

    impl CaptureStream for PanickingStream {
        fn trigger_software(&mut self) -> CameraResult<()> {
            Ok(())
        }

        #[allow(clippy::panic)]
        fn next_frame(&mut self) -> CameraResult<Frame> {
            panic!("sensor fell off the bus");
        }
    }

    impl CameraDevice for PanickingDevice {
        type Stream<'a> = PanickingStream;

        fn info(&self) -> &CameraInfo {
            self.0.info()
        }

        fn capabilities(&self) -> &DeviceCapabilities {
            self.0.capabilities()
        }

        fn format(&self) -> CameraResult<Format> {
            self.0.format()
        }

        fn set_format(&mut self, format: &Format) -> CameraResult<Format> {
            self.0.set_format(format)
        }

        fn exposure(&self) -> CameraResult<Option<Exposure>> {
            self.0.exposure()
        }

        fn set_exposure(&mut self, exposure: Exposure) -> CameraResult<()> {
            self.0.set_exposure(exposure)
        }

        fn set_trigger(&mut self, trigger: TriggerConfig) -> CameraResult<()> {
            self.0.set_trigger(trigger)
        }

        fn create_stream(&mut self, _buffer_count: u32) -> CameraResult<Self::Stream<'_>> {
            Ok(PanickingStream)
        }
    }

    impl CameraBackend for PanickingBackend {
        type Device = PanickingDevice;

        fn enumerate(&self) -> CameraResult<Vec<CameraInfo>> {
            MockBackend::new(2).enumerate()
        }

        fn open(&self, camera: &CameraInfo) -> CameraResult<Self::Device> {
            MockBackend::new(2).open(camera).map(PanickingDevice)
        }
    }

    #[test]
    fn test_panicking_worker_is_reported() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let session = Session::new(PanickingBackend, config(tmp.path(), Some(2)));
        let cameras = session.discover().expect("discover");

        let round = session.capture_exposure(&cameras, exposures(&[800])[0]);

        assert_eq!(round.failures().count(), 2);
        assert!(round.outcomes.iter().all(|o| matches!(
            &o.result,
            Err(SessionError::WorkerPanicked { message, .. }) if message.contains("fell off")
        )));
    }

    #[test]
    fn test_line_trigger_fails_every_camera() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut config = config(tmp.path(), None);
        config.trigger = TriggerConfig {
            source: TriggerSource::Line(2),
            ..TriggerConfig::software()
        };
        let session = Session::new(MockBackend::new(2), config);

        let report = session.run().expect("sweep runs");
        assert_eq!(report.failure_count(), 6);
        assert_eq!(report.saved_paths().count(), 0);
    }
}
