//! Simulated cameras for running without hardware.

use crate::traits::{
    CameraBackend, CameraDevice, CameraError, CameraInfo, CaptureStream, DeviceCapabilities,
    Exposure, Format, FourCC, Frame, FrameMetadata, Result, TriggerConfig, TriggerSource,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Exposure at which generated patterns have their nominal brightness.
pub const REFERENCE_EXPOSURE_US: u32 = 1000;

/// Settings a mock camera had when its stream started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedSettings {
    /// Camera id.
    pub camera: String,
    /// Format in effect.
    pub format: Format,
    /// Exposure in effect; `None` if never set.
    pub exposure: Option<Exposure>,
    /// Trigger configuration in effect.
    pub trigger: TriggerConfig,
}

type SettingsLog = Arc<Mutex<Vec<AppliedSettings>>>;

/// Mock device for testing without hardware.
pub struct MockDevice {
    info: CameraInfo,
    capabilities: DeviceCapabilities,
    format: Format,
    exposure: Option<Exposure>,
    trigger: TriggerConfig,
    pattern: TestPattern,
    frame_count: u32,
    log: Option<SettingsLog>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Create a new mock device with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_index(0)
    }

    /// Create the mock device named `MOCK-<index>`.
    #[must_use]
    pub fn with_index(index: u32) -> Self {
        Self {
            info: CameraInfo {
                id: format!("MOCK-{index}"),
                index,
                card: "Mock Camera".to_owned(),
                driver: "mock".to_owned(),
                bus_info: format!("mock:{index}"),
            },
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: format!("mock:{index}"),
                can_capture: true,
                can_stream: true,
            },
            format: Format::new(640, 480, FourCC::YUYV),
            exposure: None,
            trigger: TriggerConfig::default(),
            pattern: TestPattern::Gradient,
            frame_count: 0,
            log: None,
        }
    }

    /// Set the format for this mock device.
    #[must_use]
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Set the test pattern for generated frames.
    #[must_use]
    pub const fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Trigger configuration most recently applied.
    #[must_use]
    pub const fn trigger(&self) -> TriggerConfig {
        self.trigger
    }
}

impl CameraDevice for MockDevice {
    type Stream<'a> = MockStream<'a>;

    fn info(&self) -> &CameraInfo {
        &self.info
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn format(&self) -> Result<Format> {
        Ok(self.format.clone())
    }

    fn set_format(&mut self, format: &Format) -> Result<Format> {
        if format.fourcc != FourCC::YUYV {
            return Err(CameraError::FormatNotSupported(format.clone()));
        }
        self.format = Format::new(format.width, format.height, format.fourcc);
        Ok(self.format.clone())
    }

    fn exposure(&self) -> Result<Option<Exposure>> {
        Ok(self.exposure)
    }

    fn set_exposure(&mut self, exposure: Exposure) -> Result<()> {
        self.exposure = Some(exposure);
        Ok(())
    }

    fn set_trigger(&mut self, trigger: TriggerConfig) -> Result<()> {
        if trigger.enabled && matches!(trigger.source, TriggerSource::Line(_)) {
            return Err(CameraError::TriggerNotSupported(trigger.source));
        }
        self.trigger = trigger;
        Ok(())
    }

    fn create_stream(&mut self, _buffer_count: u32) -> Result<Self::Stream<'_>> {
        if let Some(log) = &self.log {
            log.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(AppliedSettings {
                    camera: self.info.id.clone(),
                    format: self.format.clone(),
                    exposure: self.exposure,
                    trigger: self.trigger,
                });
        }
        Ok(MockStream {
            device: self,
            armed: false,
        })
    }
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
    /// Solid color with specified Y, U, V values.
    Solid(u8, u8, u8),
}

/// Mock capture stream for testing.
pub struct MockStream<'a> {
    device: &'a mut MockDevice,
    armed: bool,
}

impl CaptureStream for MockStream<'_> {
    fn trigger_software(&mut self) -> Result<()> {
        self.armed = true;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if self.device.trigger.requires_software_trigger() && !self.armed {
            return Err(CameraError::NotTriggered);
        }
        self.armed = false;

        let format = &self.device.format;
        #[allow(clippy::cast_precision_loss)]
        let gain = self.device.exposure.map_or(1.0, |exposure| {
            exposure.as_micros() as f32 / REFERENCE_EXPOSURE_US as f32
        });
        let data = generate_test_frame(format, self.device.pattern, gain);

        let seq = self.device.frame_count;
        self.device.frame_count += 1;

        Ok(Frame {
            data,
            metadata: FrameMetadata {
                sequence: seq,
                timestamp: Duration::from_millis(u64::from(seq) * 33),
                bytes_used: format.size,
            },
        })
    }
}

/// A set of simulated cameras named `MOCK-0` .. `MOCK-<n-1>`.
///
/// Clones share the log of applied settings.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    count: u32,
    failing: HashSet<String>,
    log: SettingsLog,
}

impl MockBackend {
    /// Simulate `count` connected cameras.
    #[must_use]
    pub fn new(count: u32) -> Self {
        Self {
            count,
            failing: HashSet::new(),
            log: SettingsLog::default(),
        }
    }

    /// Make opening the camera with this id fail.
    #[must_use]
    pub fn with_failing(mut self, id: &str) -> Self {
        self.failing.insert(id.to_owned());
        self
    }

    /// Settings of every stream started on devices from this backend, in
    /// start order.
    #[must_use]
    pub fn applied(&self) -> Vec<AppliedSettings> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CameraBackend for MockBackend {
    type Device = MockDevice;

    fn enumerate(&self) -> Result<Vec<CameraInfo>> {
        Ok((0..self.count)
            .map(|index| MockDevice::with_index(index).info)
            .collect())
    }

    fn open(&self, camera: &CameraInfo) -> Result<Self::Device> {
        if self.failing.contains(&camera.id) {
            return Err(CameraError::DeviceOpenFailed(format!("{} is busy", camera.id)));
        }
        if camera.index >= self.count {
            return Err(CameraError::DeviceNotFound(camera.id.clone()));
        }
        let mut device = MockDevice::with_index(camera.index);
        if device.info != *camera {
            return Err(CameraError::DeviceNotFound(camera.id.clone()));
        }
        device.log = Some(Arc::clone(&self.log));
        Ok(device)
    }
}

/// Generate test frame data based on pattern, scaling luma by `gain`.
fn generate_test_frame(format: &Format, pattern: TestPattern, gain: f32) -> Vec<u8> {
    let size = (format.width * format.height * 2) as usize; // YUYV = 2 bytes/pixel
    let mut data = vec![0u8; size];

    match pattern {
        TestPattern::ColorBars => {
            generate_color_bars(&mut data, format.width, format.height);
        }
        TestPattern::Gradient => {
            generate_gradient(&mut data, format.width, format.height);
        }
        TestPattern::Solid(y, u, v) => {
            generate_solid(&mut data, y, u, v);
        }
    }

    if (gain - 1.0).abs() > f32::EPSILON {
        // Y samples sit at even offsets
        for luma in data.iter_mut().step_by(2) {
            *luma = crate::traits::clamp_u8(f32::from(*luma) * gain);
        }
    }

    data
}

/// Write one YUYV pixel pair at `offset`.
fn put_pair(data: &mut [u8], offset: usize, y: u8, u: u8, v: u8) {
    if let Some(pair) = data.get_mut(offset..offset + 4) {
        pair.copy_from_slice(&[y, u, y, v]);
    }
}

/// Generate YUYV color bars pattern.
fn generate_color_bars(data: &mut [u8], width: u32, height: u32) {
    // White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
    let bars: [(u8, u8, u8); 8] = [
        (235, 128, 128),
        (210, 16, 146),
        (170, 166, 16),
        (145, 54, 34),
        (106, 202, 222),
        (81, 90, 240),
        (41, 240, 110),
        (16, 128, 128),
    ];

    let bar_width = (width / 8).max(1);

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let bar_idx = (x / bar_width).min(7) as usize;
            let (y_val, u_val, v_val) = bars.get(bar_idx).copied().unwrap_or((16, 128, 128));
            let offset = ((y * width + x) * 2) as usize;
            put_pair(data, offset, y_val, u_val, v_val);
        }
    }
}

/// Generate YUYV horizontal gradient pattern.
fn generate_gradient(data: &mut [u8], width: u32, height: u32) {
    for y in 0..height {
        for x in (0..width).step_by(2) {
            #[allow(clippy::cast_possible_truncation)]
            let y_val = ((x * 255) / width) as u8;
            let offset = ((y * width + x) * 2) as usize;
            put_pair(data, offset, y_val, 128, 128);
        }
    }
}

/// Generate solid color YUYV frame.
fn generate_solid(data: &mut [u8], y: u8, u: u8, v: u8) {
    for offset in (0..data.len()).step_by(4) {
        put_pair(data, offset, y, u, v);
    }
}
