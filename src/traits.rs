//! Core traits and types for multi-camera capture.

use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

/// Pixel format representation (e.g., YUYV, MJPG, RGB3, GREY).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
    /// RGB3 pixel format (24-bit RGB).
    pub const RGB3: Self = Self::new(b"RGB3");
    /// GREY pixel format (8-bit monochrome).
    pub const GREY: Self = Self::new(b"GREY");

    /// Bytes per pixel for uncompressed formats.
    ///
    /// MJPG is compressed; the YUYV size is used as the buffer upper bound.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> u32 {
        match &self.0 {
            b"GREY" => 1,
            b"RGB3" => 3,
            _ => 2,
        }
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Video format specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Bytes per line (stride).
    pub stride: u32,
    /// Total frame size in bytes.
    pub size: u32,
}

impl Format {
    /// Create a new format specification with a tightly packed stride.
    #[must_use]
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        let stride = width * fourcc.bytes_per_pixel();
        let size = stride * height;
        Self {
            width,
            height,
            fourcc,
            stride,
            size,
        }
    }
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// One enumerated camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraInfo {
    /// Stable identifier, safe to embed in filenames.
    pub id: String,
    /// Backend-specific device index (e.g. 0 for /dev/video0).
    pub index: u32,
    /// Card/device name.
    pub card: String,
    /// Driver name.
    pub driver: String,
    /// Bus information.
    pub bus_info: String,
}

/// Where a frame capture request originates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    /// Capture is started by a command from the host.
    Software,
    /// Capture is started by an electrical signal on the given input line.
    Line(u8),
    /// No trigger; the sensor streams continuously.
    FreeRun,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Software => write!(f, "Software"),
            Self::Line(line) => write!(f, "Line{line}"),
            Self::FreeRun => write!(f, "FreeRun"),
        }
    }
}

/// Which acquisition event the trigger controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerSelector {
    /// Each trigger starts one frame.
    #[default]
    FrameStart,
    /// A trigger starts an acquisition of frames.
    AcquisitionStart,
}

/// Trigger configuration applied before streaming starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerConfig {
    /// Trigger source.
    pub source: TriggerSource,
    /// Trigger selector.
    pub selector: TriggerSelector,
    /// Trigger mode on/off.
    pub enabled: bool,
}

impl TriggerConfig {
    /// Software trigger, one frame per trigger.
    #[must_use]
    pub const fn software() -> Self {
        Self {
            source: TriggerSource::Software,
            selector: TriggerSelector::FrameStart,
            enabled: true,
        }
    }

    /// Trigger mode off: frames are delivered as the sensor produces them.
    #[must_use]
    pub const fn free_run() -> Self {
        Self {
            source: TriggerSource::FreeRun,
            selector: TriggerSelector::FrameStart,
            enabled: false,
        }
    }

    /// Whether a software trigger must precede each delivered frame.
    #[must_use]
    pub fn requires_software_trigger(&self) -> bool {
        self.enabled && self.source == TriggerSource::Software
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self::free_run()
    }
}

/// Sensor exposure time in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Exposure(NonZeroU32);

impl Exposure {
    /// Create an exposure of `micros` microseconds. Returns `None` for zero.
    #[must_use]
    pub const fn from_micros(micros: u32) -> Option<Self> {
        match NonZeroU32::new(micros) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    /// Exposure in microseconds.
    #[must_use]
    pub const fn as_micros(self) -> u32 {
        self.0.get()
    }

    /// Exposure as a `Duration`.
    #[must_use]
    pub fn as_duration(self) -> Duration {
        Duration::from_micros(u64::from(self.as_micros()))
    }
}

impl fmt::Display for Exposure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_micros())
    }
}

/// Metadata for a captured frame.
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
    /// Actual bytes used in the frame buffer.
    pub bytes_used: u32,
}

/// A captured video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw frame data.
    pub data: Vec<u8>,
    /// Frame metadata.
    pub metadata: FrameMetadata,
}

impl Frame {
    /// Get RGB values for a pixel at the specified coordinates of a YUYV frame.
    ///
    /// Returns `None` if the coordinates fall outside the buffer. For odd x
    /// coordinates the Y value of the second pixel in the pair is used with the
    /// shared U/V values.
    #[must_use]
    pub fn pixel_at(&self, x: u32, y: u32, width: u32) -> Option<(u8, u8, u8)> {
        // [Y0 U Y1 V] per pixel pair
        let pair_x = x & !1;
        let offset = ((y * width + pair_x) * 2) as usize;

        if offset + 3 >= self.data.len() {
            return None;
        }

        let y_val = if x % 2 == 0 {
            *self.data.get(offset)?
        } else {
            *self.data.get(offset + 2)?
        };
        let u = *self.data.get(offset + 1)?;
        let v = *self.data.get(offset + 3)?;

        Some(yuv_to_rgb(y_val, u, v))
    }
}

/// Convert YUV values to RGB using ITU-R BT.601.
#[must_use]
#[allow(clippy::many_single_char_names)]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y_f = f32::from(y);
    let u_f = f32::from(u) - 128.0;
    let v_f = f32::from(v) - 128.0;

    let r = 1.402f32.mul_add(v_f, y_f);
    let g = 0.714_14f32.mul_add(-v_f, 0.344_14f32.mul_add(-u_f, y_f));
    let b = 1.772f32.mul_add(u_f, y_f);

    (clamp_u8(r), clamp_u8(g), clamp_u8(b))
}

/// Clamp a float to the 0-255 range and truncate.
pub(crate) fn clamp_u8(val: f32) -> u8 {
    if val < 0.0 {
        0
    } else if val > 255.0 {
        255
    } else {
        #[allow(clippy::cast_possible_truncation)]
        #[allow(clippy::cast_sign_loss)]
        {
            val as u8
        }
    }
}

/// Error type for camera operations.
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    /// No camera with the given id or index.
    #[error("Device {0} not found")]
    DeviceNotFound(String),
    /// Failed to open device.
    #[error("Failed to open device: {0}")]
    DeviceOpenFailed(String),
    /// Requested format is not supported.
    #[error("Format not supported: {0:?}")]
    FormatNotSupported(Format),
    /// A device control could not be read or written.
    #[error("Failed to set {control}: {reason}")]
    ControlFailed {
        /// Control name.
        control: &'static str,
        /// Driver message.
        reason: String,
    },
    /// The backend cannot honour the requested trigger source.
    #[error("Trigger source {0} not supported")]
    TriggerNotSupported(TriggerSource),
    /// A frame was requested in software trigger mode without a trigger.
    #[error("Frame requested before a software trigger was issued")]
    NotTriggered,
    /// Error during streaming operation.
    #[error("Stream error: {0}")]
    StreamError(String),
    /// Operation timed out.
    #[error("Operation timed out")]
    Timeout,
    /// Image encoding or decoding failed.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// Abstraction over camera device operations.
pub trait CameraDevice {
    /// The stream type returned by `create_stream`.
    type Stream<'a>: CaptureStream
    where
        Self: 'a;

    /// Identity of the opened camera.
    fn info(&self) -> &CameraInfo;

    /// Get device capabilities.
    fn capabilities(&self) -> &DeviceCapabilities;

    /// Get current format.
    fn format(&self) -> Result<Format>;

    /// Set capture format. Returns the actual format set by the driver.
    fn set_format(&mut self, format: &Format) -> Result<Format>;

    /// Current exposure time, if the device reports one.
    fn exposure(&self) -> Result<Option<Exposure>>;

    /// Switch to manual exposure and set the exposure time.
    fn set_exposure(&mut self, exposure: Exposure) -> Result<()>;

    /// Configure triggering. Applies to streams created afterwards.
    fn set_trigger(&mut self, trigger: TriggerConfig) -> Result<()>;

    /// Create a capture stream with the specified number of buffers.
    fn create_stream(&mut self, buffer_count: u32) -> Result<Self::Stream<'_>>;
}

/// Abstraction over capture stream operations.
pub trait CaptureStream {
    /// Issue a software trigger. The next frame is exposed after this call.
    fn trigger_software(&mut self) -> Result<()>;

    /// Capture the next frame from the stream.
    ///
    /// In software trigger mode, fails with [`CameraError::NotTriggered`]
    /// unless a trigger was issued since the previous frame.
    fn next_frame(&mut self) -> Result<Frame>;
}

/// A source of cameras: enumerates them and opens what it enumerated.
///
/// Shared by reference across capture workers.
pub trait CameraBackend: Sync {
    /// The device type produced by `open`.
    type Device: CameraDevice;

    /// List every connected camera.
    fn enumerate(&self) -> Result<Vec<CameraInfo>>;

    /// Open a camera returned by `enumerate`.
    ///
    /// Fails with `DeviceNotFound` if the camera is gone or another camera
    /// now sits at its index.
    fn open(&self, camera: &CameraInfo) -> Result<Self::Device>;
}
