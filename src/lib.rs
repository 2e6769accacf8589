//! Multi-Cam-Capture: exposure sweeps across a rig of V4L2 cameras
//!
//! Every connected camera captures one software-triggered frame per exposure
//! time. Frames are converted to 8-bit monochrome and written as PNG files
//! named after the capture time and camera id. Camera access goes through
//! trait-based abstractions so sweeps run the same against real hardware and
//! simulated devices.

pub mod config;
pub mod convert;
pub mod device;
pub mod mock;
pub mod output;
pub mod session;
pub mod traits;
pub mod validation;

pub use config::Config;
pub use device::{V4L2Device, V4l2Backend};
pub use mock::MockBackend;
pub use session::{CaptureConfig, Session, SessionError, SweepReport};
pub use traits::{
    CameraBackend, CameraDevice, CameraError, CameraInfo, CaptureStream, DeviceCapabilities,
    Exposure, Format, FourCC, Frame, FrameMetadata, TriggerConfig, TriggerSelector, TriggerSource,
};
