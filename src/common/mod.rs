pub mod config;
pub mod dev_mode;
pub mod error;
pub mod paths;

pub use config::{CameraConfig, CameraSource, ClassifierConfig, Config, SpoofConfig, StorageConfig, TimingConfig};
pub use dev_mode::DevMode;
pub use error::{LensCheckError, Result};
pub use paths::{default_album_dir, system_config_file, system_models_dir};
