use crate::core::types::{AnalysisStage, CameraRole};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LensCheckError {
    #[error("{role} sensor unavailable: {reason}")]
    SensorUnavailable { role: CameraRole, reason: String },

    #[error("{role} capture failed: {reason}")]
    CaptureFailed { role: CameraRole, reason: String },

    #[error("{stage} failed: {reason}")]
    AnalysisFailed { stage: AnalysisStage, reason: String },

    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Capture cycle timed out after {0} ms")]
    CycleTimedOut(u64),

    #[error("Capture cycle cancelled")]
    Cancelled,

    #[error("Capture already in progress (cycle {0})")]
    TriggerRejected(u64),

    #[error("Orchestrator is not running")]
    OrchestratorStopped,

    #[error("Config error: {0}")]
    Config(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("ORT error: {0}")]
    Ort(#[from] ort::OrtError),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl LensCheckError {
    pub fn sensor_unavailable(role: CameraRole, reason: impl Into<String>) -> Self {
        Self::SensorUnavailable { role, reason: reason.into() }
    }

    pub fn capture_failed(role: CameraRole, reason: impl Into<String>) -> Self {
        Self::CaptureFailed { role, reason: reason.into() }
    }

    pub fn analysis_failed(stage: AnalysisStage, reason: impl Into<String>) -> Self {
        Self::AnalysisFailed { stage, reason: reason.into() }
    }
}

pub type Result<T> = std::result::Result<T, LensCheckError>;
