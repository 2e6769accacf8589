//! Command-line and environment configuration.
//!
//! Values come from flags first, then `MULTICAM_*` environment variables,
//! then defaults.
//!
//! | flag                  | variable                | default          |
//! |-----------------------|-------------------------|------------------|
//! | `--output <dir>`      | `MULTICAM_OUTPUT_DIR`   | `./`             |
//! | `--exposures <a,b,c>` | `MULTICAM_EXPOSURES`    | `800,1300,1500`  |
//! | `--expect <n>`        | `MULTICAM_EXPECTED`     | `5`              |
//! | `--format <WxH:CODE>` | `MULTICAM_FORMAT`       | camera default   |
//! | `--mock`              | `MULTICAM_MOCK_CAMERAS` | off / 5 cameras  |
//!
//! `--no-expect` accepts any non-zero camera count and `--list` only prints
//! the connected cameras.

use std::path::PathBuf;

use crate::session::{CaptureConfig, DEFAULT_EXPECTED_CAMERAS};
use crate::traits::{Exposure, Format, FourCC};

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A flag that needs a value was last on the command line.
    #[error("{0} requires a value")]
    MissingValue(String),
    /// An unrecognised flag.
    #[error("Unknown argument: {0}")]
    UnknownArgument(String),
    /// A value that could not be parsed.
    #[error("Invalid {name} '{value}': {reason}")]
    InvalidValue {
        /// Flag or variable name.
        name: &'static str,
        /// Offending value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Result type for configuration parsing.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Everything the binary needs to run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Sweep settings.
    pub capture: CaptureConfig,
    /// Simulated camera count; `None` uses V4L2 hardware.
    pub mock_cameras: Option<u32>,
    /// Print the camera list and exit.
    pub list_only: bool,
}

impl Config {
    /// Read configuration from the process arguments and environment.
    pub fn from_env() -> Result<Self> {
        Self::parse(std::env::args().skip(1), |key| std::env::var(key).ok())
    }

    /// Parse `args` (without the program name), consulting `env` for
    /// variables not overridden by a flag.
    pub fn parse<I, E>(args: I, env: E) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
        E: Fn(&str) -> Option<String>,
    {
        let mut output = None;
        let mut exposures = None;
        let mut expected = None;
        let mut format = None;
        let mut mock = false;
        let mut no_expect = false;
        let mut list_only = false;

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let mut value = |flag: &str| {
                args.next()
                    .ok_or_else(|| ConfigError::MissingValue(flag.to_owned()))
            };
            match arg.as_str() {
                "--output" | "-o" => output = Some(value(&arg)?),
                "--exposures" | "-e" => exposures = Some(value(&arg)?),
                "--expect" => expected = Some(value(&arg)?),
                "--format" => format = Some(value(&arg)?),
                "--mock" => mock = true,
                "--no-expect" => no_expect = true,
                "--list" => list_only = true,
                other => return Err(ConfigError::UnknownArgument(other.to_owned())),
            }
        }

        let mut capture = CaptureConfig::default();

        if let Some(dir) = output.or_else(|| env("MULTICAM_OUTPUT_DIR")) {
            capture.output_dir = PathBuf::from(dir);
        }
        if let Some(list) = exposures.or_else(|| env("MULTICAM_EXPOSURES")) {
            capture.exposures = parse_exposures(&list)?;
        }
        capture.expected_cameras = if no_expect {
            None
        } else {
            match expected.or_else(|| env("MULTICAM_EXPECTED")) {
                Some(count) => Some(parse_camera_count("camera count", &count)?),
                None => Some(DEFAULT_EXPECTED_CAMERAS),
            }
        };
        if let Some(value) = format.or_else(|| env("MULTICAM_FORMAT")) {
            capture.format = Some(parse_format(&value)?);
        }

        let mock_cameras = match env("MULTICAM_MOCK_CAMERAS") {
            Some(count) => Some(parse_camera_count("mock camera count", &count)?),
            None if mock => {
                let count = capture.expected_cameras.unwrap_or(DEFAULT_EXPECTED_CAMERAS);
                u32::try_from(count).ok()
            }
            None => None,
        };

        Ok(Self {
            capture,
            mock_cameras,
            list_only,
        })
    }
}

fn invalid<R: ToString>(name: &'static str, value: &str, reason: R) -> ConfigError {
    ConfigError::InvalidValue {
        name,
        value: value.to_owned(),
        reason: reason.to_string(),
    }
}

fn parse_count<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T>
where
    T::Err: ToString,
{
    value.trim().parse().map_err(|err| invalid(name, value, err))
}

/// A camera count of zero would pass discovery with nothing to capture.
fn parse_camera_count<T>(name: &'static str, value: &str) -> Result<T>
where
    T: std::str::FromStr + Default + PartialEq,
    T::Err: ToString,
{
    let count: T = parse_count(name, value)?;
    if count == T::default() {
        return Err(invalid(name, value, "must be non-zero"));
    }
    Ok(count)
}

/// Parse a comma-separated list of exposure times in microseconds.
pub fn parse_exposures(list: &str) -> Result<Vec<Exposure>> {
    let exposures = list
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            let micros: u32 = parse_count("exposure", item)?;
            Exposure::from_micros(micros)
                .ok_or_else(|| invalid("exposure", item, "must be non-zero"))
        })
        .collect::<Result<Vec<_>>>()?;

    if exposures.is_empty() {
        return Err(invalid("exposure list", list, "no exposure times given"));
    }
    Ok(exposures)
}

/// Parse `WIDTHxHEIGHT:FOURCC`, e.g. `1280x720:YUYV`.
pub fn parse_format(text: &str) -> Result<Format> {
    let (size, code) = text
        .split_once(':')
        .ok_or_else(|| invalid("format", text, "expected WIDTHxHEIGHT:FOURCC"))?;
    let (width, height) = size
        .split_once(['x', 'X'])
        .ok_or_else(|| invalid("format", text, "expected WIDTHxHEIGHT"))?;

    let width: u32 = parse_count("format width", width)?;
    let height: u32 = parse_count("format height", height)?;
    if width == 0 || height == 0 {
        return Err(invalid("format", text, "dimensions must be non-zero"));
    }

    let code: [u8; 4] = code
        .trim()
        .to_ascii_uppercase()
        .as_bytes()
        .try_into()
        .map_err(|_| invalid("format", text, "pixel format must be 4 characters"))?;

    Ok(Format::new(width, height, FourCC(code)))
}
