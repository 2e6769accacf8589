//! V4L2 device implementation using the v4l crate.

use v4l::buffer::Type;
use v4l::control::{Control, Value};
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream as V4lCaptureStream;
use v4l::video::Capture;
use v4l::Device;

use crate::traits::{
    CameraBackend, CameraDevice, CameraError, CameraInfo, CaptureStream, DeviceCapabilities,
    Exposure, Format, FourCC, Frame, FrameMetadata, Result, TriggerConfig, TriggerSource,
};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::time::Duration;
use tracing::debug;

/// `V4L2_CID_EXPOSURE_AUTO`
const CID_EXPOSURE_AUTO: u32 = 0x009a_0901;
/// `V4L2_CID_EXPOSURE_ABSOLUTE`, in 100 µs units.
const CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;
/// `V4L2_EXPOSURE_MANUAL`
const EXPOSURE_MANUAL: i64 = 1;

/// How long a dequeue may block before reporting a timeout.
const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Convert microseconds to V4L2 absolute exposure units (100 µs), minimum 1.
pub(crate) fn exposure_to_v4l2_units(exposure: Exposure) -> i64 {
    let micros = i64::from(exposure.as_micros());
    ((micros + 50) / 100).max(1)
}

/// Build a filename-safe camera id from card name and bus info.
pub(crate) fn camera_id(index: u32, card: &str, bus_info: &str) -> String {
    let raw = format!("{card}@{bus_info}");
    let id: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if id.trim_matches('_').is_empty() {
        format!("video{index}")
    } else {
        id
    }
}

/// Suffix ids shared by several nodes with `-video<index>`.
///
/// Nodes of one card on one bus (e.g. two vivid instances, or a webcam's
/// capture and metadata nodes) otherwise get the same id.
pub(crate) fn disambiguate_ids(cameras: &mut [CameraInfo]) {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for camera in cameras.iter() {
        *counts.entry(camera.id.clone()).or_default() += 1;
    }
    for camera in cameras.iter_mut() {
        if counts.get(&camera.id).is_some_and(|&count| count > 1) {
            camera.id = format!("{}-video{}", camera.id, camera.index);
        }
    }
}

/// V4L2 device implementation wrapping the v4l crate.
pub struct V4L2Device {
    device: Device,
    info: CameraInfo,
    capabilities: DeviceCapabilities,
    trigger: TriggerConfig,
}

impl V4L2Device {
    /// Open a V4L2 device by index (e.g., 0 for /dev/video0).
    pub fn open(index: u32) -> Result<Self> {
        let device = Device::new(index as usize)
            .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;

        let caps = device
            .query_caps()
            .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;

        let capabilities = DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(v4l::capability::Flags::STREAMING),
        };

        let info = CameraInfo {
            id: camera_id(index, &capabilities.card, &capabilities.bus_info),
            index,
            card: capabilities.card.clone(),
            driver: capabilities.driver.clone(),
            bus_info: capabilities.bus_info.clone(),
        };

        Ok(Self {
            device,
            info,
            capabilities,
            trigger: TriggerConfig::default(),
        })
    }

    /// Open the V4L2 device whose id matches `id`.
    pub fn open_id(id: &str) -> Result<Self> {
        let camera = V4l2Backend
            .enumerate()?
            .into_iter()
            .find(|camera| camera.id == id)
            .ok_or_else(|| CameraError::DeviceNotFound(id.to_owned()))?;

        Self::open_camera(&camera)
    }

    /// Open an enumerated camera by its node index, checking the node still
    /// belongs to the same card and bus.
    pub fn open_camera(camera: &CameraInfo) -> Result<Self> {
        let mut device = Self::open(camera.index)?;
        if device.info.card != camera.card || device.info.bus_info != camera.bus_info {
            return Err(CameraError::DeviceNotFound(camera.id.clone()));
        }
        device.info.id.clone_from(&camera.id);
        Ok(device)
    }

    fn set_control(&self, control: &'static str, id: u32, value: i64) -> Result<()> {
        self.device
            .set_control(Control {
                id,
                value: Value::Integer(value),
            })
            .map_err(|err| CameraError::ControlFailed {
                control,
                reason: err.to_string(),
            })
    }
}

fn to_format(fmt: &v4l::Format) -> Format {
    Format {
        width: fmt.width,
        height: fmt.height,
        fourcc: FourCC::from(fmt.fourcc),
        stride: fmt.stride,
        size: fmt.size,
    }
}

impl CameraDevice for V4L2Device {
    type Stream<'a> = V4L2Stream<'a>;

    fn info(&self) -> &CameraInfo {
        &self.info
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn format(&self) -> Result<Format> {
        let fmt = self
            .device
            .format()
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        Ok(to_format(&fmt))
    }

    fn set_format(&mut self, format: &Format) -> Result<Format> {
        let mut fmt = self
            .device
            .format()
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = format.fourcc.into();

        let fmt = self
            .device
            .set_format(&fmt)
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        let actual = to_format(&fmt);
        if actual.fourcc != format.fourcc {
            return Err(CameraError::FormatNotSupported(format.clone()));
        }
        Ok(actual)
    }

    fn exposure(&self) -> Result<Option<Exposure>> {
        let control = self
            .device
            .control(CID_EXPOSURE_ABSOLUTE)
            .map_err(|err| CameraError::ControlFailed {
                control: "exposure_time_absolute",
                reason: err.to_string(),
            })?;

        Ok(match control.value {
            Value::Integer(units) => u32::try_from(units.saturating_mul(100))
                .ok()
                .and_then(Exposure::from_micros),
            _ => None,
        })
    }

    fn set_exposure(&mut self, exposure: Exposure) -> Result<()> {
        self.set_control("auto_exposure", CID_EXPOSURE_AUTO, EXPOSURE_MANUAL)?;
        let units = exposure_to_v4l2_units(exposure);
        self.set_control("exposure_time_absolute", CID_EXPOSURE_ABSOLUTE, units)?;
        debug!(camera = %self.info.id, %exposure, units, "exposure set");
        Ok(())
    }

    fn set_trigger(&mut self, trigger: TriggerConfig) -> Result<()> {
        // V4L2 has no trigger controls; host-initiated capture is emulated.
        if trigger.enabled && matches!(trigger.source, TriggerSource::Line(_)) {
            return Err(CameraError::TriggerNotSupported(trigger.source));
        }
        self.trigger = trigger;
        Ok(())
    }

    fn create_stream(&mut self, buffer_count: u32) -> Result<Self::Stream<'_>> {
        let mut stream = Stream::with_buffers(&self.device, Type::VideoCapture, buffer_count)
            .map_err(|err| CameraError::StreamError(err.to_string()))?;
        stream.set_timeout(FRAME_TIMEOUT);

        Ok(V4L2Stream {
            stream,
            buffer_count,
            trigger_required: self.trigger.requires_software_trigger(),
            armed: false,
            started: false,
        })
    }
}

/// V4L2 capture stream wrapping mmap-based streaming.
pub struct V4L2Stream<'a> {
    stream: Stream<'a>,
    buffer_count: u32,
    trigger_required: bool,
    armed: bool,
    started: bool,
}

impl V4L2Stream<'_> {
    fn dequeue(&mut self) -> Result<Frame> {
        let (buf, meta) = self.stream.next().map_err(|err| {
            if err.kind() == ErrorKind::TimedOut {
                CameraError::Timeout
            } else {
                CameraError::StreamError(err.to_string())
            }
        })?;
        self.started = true;

        // V4L2 timestamps are non-negative in practice
        #[allow(clippy::cast_sign_loss)]
        let secs = meta.timestamp.sec.max(0) as u64;
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let nanos = (meta.timestamp.usec.max(0) as u32).saturating_mul(1000);

        let used = (meta.bytesused as usize).min(buf.len());
        let data = buf.get(..used).unwrap_or(buf).to_vec();

        Ok(Frame {
            data,
            metadata: FrameMetadata {
                sequence: meta.sequence,
                timestamp: Duration::new(secs, nanos),
                bytes_used: meta.bytesused,
            },
        })
    }
}

impl CaptureStream for V4L2Stream<'_> {
    fn trigger_software(&mut self) -> Result<()> {
        // Buffers filled before the trigger hold frames exposed too early.
        if self.started {
            for _ in 0..self.buffer_count {
                self.dequeue()?;
            }
        }
        self.armed = true;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if self.trigger_required && !self.armed {
            return Err(CameraError::NotTriggered);
        }
        let frame = self.dequeue()?;
        self.armed = false;
        Ok(frame)
    }
}

/// Enumerates and opens V4L2 capture nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct V4l2Backend;

impl CameraBackend for V4l2Backend {
    type Device = V4L2Device;

    fn enumerate(&self) -> Result<Vec<CameraInfo>> {
        let mut nodes = v4l::context::enum_devices();
        nodes.sort_by_key(v4l::context::Node::index);

        let mut cameras = Vec::new();
        for node in nodes {
            let Ok(index) = u32::try_from(node.index()) else {
                continue;
            };
            // Nodes that vanish or refuse to open are not usable cameras.
            let Ok(device) = V4L2Device::open(index) else {
                debug!(path = %node.path().display(), "skipping unopenable node");
                continue;
            };
            if !device.capabilities.can_capture {
                debug!(path = %node.path().display(), "skipping non-capture node");
                continue;
            }
            cameras.push(device.info);
        }
        disambiguate_ids(&mut cameras);
        Ok(cameras)
    }

    fn open(&self, camera: &CameraInfo) -> Result<Self::Device> {
        V4L2Device::open_camera(camera)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_id_is_filename_safe() {
        let id = camera_id(2, "Alvium 1800 U-240m", "usb-0000:00:14.0-3");
        assert_eq!(id, "Alvium_1800_U-240m_usb-0000_00_14.0-3");
    }

    #[test]
    fn test_camera_id_falls_back_to_index() {
        assert_eq!(camera_id(3, "", ""), "video3");
    }

    fn node(index: u32, card: &str, bus_info: &str) -> CameraInfo {
        CameraInfo {
            id: camera_id(index, card, bus_info),
            index,
            card: card.to_owned(),
            driver: "vivid".to_owned(),
            bus_info: bus_info.to_owned(),
        }
    }

    #[test]
    fn test_shared_ids_get_node_suffix() {
        let mut cameras = vec![
            node(0, "vivid", "platform:vivid-000"),
            node(1, "vivid", "platform:vivid-000"),
            node(4, "Alvium 1800 U-240m", "usb-1"),
        ];
        disambiguate_ids(&mut cameras);

        let ids: Vec<&str> = cameras.iter().map(|camera| camera.id.as_str()).collect();
        assert_eq!(
            ids,
            [
                "vivid_platform_vivid-000-video0",
                "vivid_platform_vivid-000-video1",
                "Alvium_1800_U-240m_usb-1",
            ]
        );
    }

    #[test]
    fn test_exposure_units_round_to_nearest() {
        let units = |us| exposure_to_v4l2_units(Exposure::from_micros(us).expect("non-zero"));
        assert_eq!(units(800), 8);
        assert_eq!(units(1300), 13);
        assert_eq!(units(1549), 15);
        assert_eq!(units(1550), 16);
        assert_eq!(units(10), 1);
    }
}
