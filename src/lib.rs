pub mod capture;
pub mod pipeline;
pub mod utils;
pub mod vision;

use std::path::{Path, PathBuf};

use capture::{ColorProcessing, PixelFormat};
use serde::{Deserialize, Serialize};
use vision::{Calibration, MarkerDictionary};

/// Environment prefix for configuration overrides, e.g.
/// `MARKCAP__ACQUISITION__ITERATIONS=5`
pub const ENV_PREFIX: &str = "MARKCAP";

// Metric names
pub const METRIC_FRAMES_ACQUIRED: &str = "frames_acquired";
pub const METRIC_FRAMES_INCOMPLETE: &str = "frames_incomplete";
pub const METRIC_FRAMES_PERSISTED: &str = "frames_persisted";
pub const METRIC_FRAME_PROCESSING_MS: &str = "frame_processing_ms";

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    pub acquisition: AcquisitionConfig,
    pub detection: DetectionConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Only use this device node; every capture device when unset
    #[serde(default)]
    pub device: Option<String>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Frames requested per camera
    pub iterations: u32,
    /// Index of the first frame, used for output file names
    pub first_index: u32,
    pub color_processing: ColorProcessing,
    /// Wait for the operator after every saved frame
    pub pause: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub dictionary: MarkerDictionary,
    pub marker_length_m: f64,
    /// Pose estimation only runs when this is set
    #[serde(default)]
    pub calibration: Option<Calibration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub directory: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                device: None,
                width: 640,
                height: 480,
                format: PixelFormat::Yuyv4,
                buffer_count: 4,
            },
            acquisition: AcquisitionConfig {
                iterations: 39,
                first_index: 1,
                color_processing: ColorProcessing::Bilinear,
                pause: true,
            },
            detection: DetectionConfig {
                dictionary: MarkerDictionary::Dict6x6_250,
                marker_length_m: 0.05,
                calibration: None,
            },
            output: OutputConfig {
                directory: PathBuf::from("."),
            },
        }
    }
}

impl Config {
    /// Layers defaults, an optional TOML file and `MARKCAP__*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        Self::load_with_env(path, None)
    }

    /// Like [`Config::load`], reading variables from `env` instead of the
    /// process environment when given.
    fn load_with_env(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self, config::ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        let acquisition = &self.acquisition;
        if acquisition.last_index().is_none() {
            return Err(config::ConfigError::Message(format!(
                "acquisition.first_index {} with {} iterations overflows the frame index",
                acquisition.first_index, acquisition.iterations
            )));
        }
        Ok(())
    }
}

impl AcquisitionConfig {
    /// Index of the last frame, `None` when it does not fit in a `u32`.
    pub fn last_index(&self) -> Option<u32> {
        last_frame_index(self.first_index, self.iterations)
    }
}

pub(crate) fn last_frame_index(first_index: u32, iterations: u32) -> Option<u32> {
    first_index.checked_add(iterations.saturating_sub(1))
}
