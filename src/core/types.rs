use chrono::{DateTime, Local};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which physical sensor a frame or session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraRole {
    Primary,
    Auxiliary,
}

impl fmt::Display for CameraRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraRole::Primary => write!(f, "primary"),
            CameraRole::Auxiliary => write!(f, "auxiliary"),
        }
    }
}

/// Per-sensor session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Running,
    Stopping,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Running => write!(f, "running"),
            SessionState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Per-capture settings forwarded to the device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureSettings {
    /// Frames to drop before the one that is kept (exposure settle).
    pub skip_frames: u32,
}

#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub role: CameraRole,
    pub image: DynamicImage,
    pub timestamp: DateTime<Local>,
}

impl CapturedFrame {
    pub fn new(role: CameraRole, image: DynamicImage) -> Self {
        Self { role, image, timestamp: Local::now() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub label: String,
    /// In [0, 1].
    pub confidence: f32,
}

impl ClassificationResult {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self { label: label.into(), confidence: confidence.clamp(0.0, 1.0) }
    }
}

impl fmt::Display for ClassificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Class: {}, Confidence: {:.2}%", self.label, self.confidence * 100.0)
    }
}

#[derive(Debug, Clone)]
pub struct SpoofVerdict {
    pub lines_detected: bool,
    pub annotated_image: Option<DynamicImage>,
}

impl SpoofVerdict {
    pub fn clean() -> Self {
        Self { lines_detected: false, annotated_image: None }
    }

    pub fn lines(annotated_image: Option<DynamicImage>) -> Self {
        Self { lines_detected: true, annotated_image }
    }
}

/// Which analysis step produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStage {
    Classification,
    SpoofDetection,
}

impl fmt::Display for AnalysisStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisStage::Classification => write!(f, "classification"),
            AnalysisStage::SpoofDetection => write!(f, "spoof detection"),
        }
    }
}

/// Final user-facing outcome of one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    RejectSpoof,
    Accept { label: String, confidence: f32 },
    NoClassification,
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept { .. })
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::RejectSpoof => write!(f, "REJECT_SPOOF"),
            Verdict::Accept { label, confidence } => {
                write!(f, "ACCEPT({}, {:.2})", label, confidence)
            }
            Verdict::NoClassification => write!(f, "NO_CLASSIFICATION"),
        }
    }
}

/// Orchestrator state, published to subscribers on every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OrchestratorState {
    Idle,
    PrimaryCapturing { cycle: u64 },
    PrimaryAnalyzing { cycle: u64 },
    SwitchingSensor { cycle: u64 },
    AuxCapturing { cycle: u64 },
    AuxAnalyzing { cycle: u64 },
    RestoringPrimary { cycle: u64 },
    Fusing { cycle: u64 },
    Presenting { cycle: u64 },
    Failed { cycle: u64, stage: String, reason: String },
}

impl OrchestratorState {
    pub fn is_idle(&self) -> bool {
        matches!(self, OrchestratorState::Idle)
    }

    pub fn cycle(&self) -> Option<u64> {
        match self {
            OrchestratorState::Idle => None,
            OrchestratorState::PrimaryCapturing { cycle }
            | OrchestratorState::PrimaryAnalyzing { cycle }
            | OrchestratorState::SwitchingSensor { cycle }
            | OrchestratorState::AuxCapturing { cycle }
            | OrchestratorState::AuxAnalyzing { cycle }
            | OrchestratorState::RestoringPrimary { cycle }
            | OrchestratorState::Fusing { cycle }
            | OrchestratorState::Presenting { cycle }
            | OrchestratorState::Failed { cycle, .. } => Some(*cycle),
        }
    }

    /// Short name used in logs and the status line.
    pub fn name(&self) -> &'static str {
        match self {
            OrchestratorState::Idle => "idle",
            OrchestratorState::PrimaryCapturing { .. } => "primary_capturing",
            OrchestratorState::PrimaryAnalyzing { .. } => "primary_analyzing",
            OrchestratorState::SwitchingSensor { .. } => "switching_sensor",
            OrchestratorState::AuxCapturing { .. } => "aux_capturing",
            OrchestratorState::AuxAnalyzing { .. } => "aux_analyzing",
            OrchestratorState::RestoringPrimary { .. } => "restoring_primary",
            OrchestratorState::Fusing { .. } => "fusing",
            OrchestratorState::Presenting { .. } => "presenting",
            OrchestratorState::Failed { .. } => "failed",
        }
    }
}
