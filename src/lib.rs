// Core modules
pub mod core;
pub mod camera;
pub mod storage;
pub mod cli;
pub mod common;

// Re-export commonly used types
pub use common::{Config, DevMode, LensCheckError, Result};
pub use core::{
    fuse, CaptureOrchestrator, ImageClassifier, LineSpoofDetector, OrchestratorHandle, OrchestratorOptions,
    ResultPresenter, SpoofDetector, Verdict,
};
pub use camera::{CameraDevice, SensorHandle};
pub use storage::PhotoAlbum;
