use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::common::error::{LensCheckError, Result};
use crate::common::paths::system_config_file;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub primary: CameraConfig,
    pub auxiliary: CameraConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub spoof: SpoofConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Where a sensor's frames come from.
#[derive(Debug, Clone, PartialEq)]
pub enum CameraSource {
    /// `/dev/video<N>`
    Device(u32),
    /// A still image served as every frame (bench testing without hardware).
    Still(PathBuf),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CameraConfig {
    #[serde(default)]
    pub device_index: Option<u32>,
    #[serde(default)]
    pub image_path: Option<PathBuf>,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_warmup_frames")]
    pub warmup_frames: u32,
    #[serde(default = "default_warmup_delay")]
    pub warmup_delay_ms: u64,
}

fn default_width() -> u32 { 1280 }
fn default_height() -> u32 { 720 }
fn default_warmup_frames() -> u32 { 3 }
fn default_warmup_delay() -> u64 { 50 }

impl CameraConfig {
    pub fn from_device(index: u32) -> Self {
        Self {
            device_index: Some(index),
            image_path: None,
            width: default_width(),
            height: default_height(),
            warmup_frames: default_warmup_frames(),
            warmup_delay_ms: default_warmup_delay(),
        }
    }

    pub fn source(&self) -> Result<CameraSource> {
        match (&self.device_index, &self.image_path) {
            (Some(index), None) => Ok(CameraSource::Device(*index)),
            (None, Some(path)) => Ok(CameraSource::Still(path.clone())),
            (Some(_), Some(_)) => Err(LensCheckError::Config(
                "camera must set either device_index or image_path, not both".into(),
            )),
            (None, None) => Err(LensCheckError::Config(
                "camera must set device_index or image_path".into(),
            )),
        }
    }
}

/// Hand-off timing between the two sensors.
///
/// Sensor readiness is confirmed by the session state, so `settle_delay_ms`
/// is only a floor measured from the primary capture request. The other
/// values bound how long the orchestrator waits before giving up.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TimingConfig {
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_switch_timeout")]
    pub switch_timeout_ms: u64,
    #[serde(default = "default_classification_grace")]
    pub classification_grace_ms: u64,
    #[serde(default = "default_cycle_timeout")]
    pub cycle_timeout_ms: u64,
}

fn default_settle_delay() -> u64 { 200 }
fn default_switch_timeout() -> u64 { 3000 }
fn default_classification_grace() -> u64 { 500 }
fn default_cycle_timeout() -> u64 { 15000 }

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay(),
            switch_timeout_ms: default_switch_timeout(),
            classification_grace_ms: default_classification_grace(),
            cycle_timeout_ms: default_cycle_timeout(),
        }
    }
}

impl TimingConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn switch_timeout(&self) -> Duration {
        Duration::from_millis(self.switch_timeout_ms)
    }

    pub fn classification_grace(&self) -> Duration {
        Duration::from_millis(self.classification_grace_ms)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_millis(self.cycle_timeout_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClassifierConfig {
    pub model_path: PathBuf,
    pub labels_path: PathBuf,
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    #[serde(default = "default_mean")]
    pub mean: [f32; 3],
    #[serde(default = "default_std")]
    pub std: [f32; 3],
    #[serde(default = "default_true")]
    pub apply_softmax: bool,
    #[serde(default = "default_optimization_level")]
    pub optimization_level: u32,
}

fn default_input_size() -> u32 { 224 }
fn default_mean() -> [f32; 3] { [0.485, 0.456, 0.406] }
fn default_std() -> [f32; 3] { [0.229, 0.224, 0.225] }
fn default_true() -> bool { true }
fn default_optimization_level() -> u32 { 3 }

/// Canny + Hough parameters for the line detector.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SpoofConfig {
    #[serde(default = "default_blur_sigma")]
    pub blur_sigma: f32,
    #[serde(default = "default_canny_low")]
    pub canny_low: f32,
    #[serde(default = "default_canny_high")]
    pub canny_high: f32,
    /// Minimum number of edge pixels on a line, i.e. the shortest line that counts.
    #[serde(default = "default_vote_threshold")]
    pub vote_threshold: u32,
    #[serde(default = "default_suppression_radius")]
    pub suppression_radius: u32,
}

fn default_blur_sigma() -> f32 { 1.1 }
fn default_canny_low() -> f32 { 216.0 }
fn default_canny_high() -> f32 { 218.0 }
fn default_vote_threshold() -> u32 { 357 }
fn default_suppression_radius() -> u32 { 8 }

impl Default for SpoofConfig {
    fn default() -> Self {
        Self {
            blur_sigma: default_blur_sigma(),
            canny_low: default_canny_low(),
            canny_high: default_canny_high(),
            vote_threshold: default_vote_threshold(),
            suppression_radius: default_suppression_radius(),
        }
    }
}

impl SpoofConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.blur_sigma > 0.0 && self.blur_sigma <= 20.0) {
            return Err(LensCheckError::Config(format!(
                "Blur sigma must be in (0, 20], got {}", self.blur_sigma
            )));
        }
        if self.canny_low < 0.0 || self.canny_high < self.canny_low {
            return Err(LensCheckError::Config(format!(
                "Canny thresholds must satisfy 0 <= low <= high, got {} / {}",
                self.canny_low, self.canny_high
            )));
        }
        if self.vote_threshold == 0 {
            return Err(LensCheckError::Config("Vote threshold must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    /// Defaults to `<Pictures>/lenscheck`.
    #[serde(default)]
    pub album_dir: Option<PathBuf>,
    /// Save the primary photo when the verdict is an accept.
    #[serde(default = "default_true")]
    pub persist_accepted: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { album_dir: None, persist_accepted: true }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let dev_path = PathBuf::from("configs/lenscheck.toml");
        if dev_path.exists() {
            return Self::load_from_path(&dev_path);
        }
        Self::load_from_path(&system_config_file())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LensCheckError::Config(format!(
                "Config file not found: {}. Create it from configs/lenscheck.example.toml", path.display()
            )));
        }

        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| LensCheckError::Config(format!("Config parse error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, camera) in [("primary", &self.primary), ("auxiliary", &self.auxiliary)] {
            camera.source()?;
            if camera.width == 0 || camera.width > 8192 {
                return Err(LensCheckError::Config(format!(
                    "{} camera width must be between 1 and 8192, got {}", name, camera.width
                )));
            }
            if camera.height == 0 || camera.height > 8192 {
                return Err(LensCheckError::Config(format!(
                    "{} camera height must be between 1 and 8192, got {}", name, camera.height
                )));
            }
        }

        if let (Some(a), Some(b)) = (self.primary.device_index, self.auxiliary.device_index) {
            if a == b {
                return Err(LensCheckError::Config(format!(
                    "primary and auxiliary cameras must be different devices, both are {}", a
                )));
            }
        }

        let timing = &self.timing;
        if timing.switch_timeout_ms == 0 || timing.switch_timeout_ms > 30_000 {
            return Err(LensCheckError::Config(format!(
                "Switch timeout must be between 1 and 30000 ms, got {}", timing.switch_timeout_ms
            )));
        }
        if timing.cycle_timeout_ms < timing.settle_delay_ms + timing.switch_timeout_ms {
            return Err(LensCheckError::Config(format!(
                "Cycle timeout ({} ms) must cover the settle delay plus one switch timeout",
                timing.cycle_timeout_ms
            )));
        }
        if timing.cycle_timeout_ms > 120_000 {
            return Err(LensCheckError::Config(format!(
                "Cycle timeout must be at most 120000 ms, got {}", timing.cycle_timeout_ms
            )));
        }

        if self.classifier.input_size == 0 || self.classifier.input_size > 1024 {
            return Err(LensCheckError::Config(format!(
                "Classifier input size must be between 1 and 1024, got {}",
                self.classifier.input_size
            )));
        }
        if self.classifier.std.iter().any(|s| *s <= 0.0) {
            return Err(LensCheckError::Config(
                "Classifier std values must be positive".into(),
            ));
        }

        self.spoof.validate()
    }
}
