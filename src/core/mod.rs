pub mod classifier;
pub mod evaluation;
pub mod fusion;
pub mod orchestrator;
pub mod presenter;
pub mod spoof;
pub mod types;

pub use classifier::{ImageClassifier, OnnxClassifier};
pub use fusion::fuse;
pub use orchestrator::{CaptureOrchestrator, CycleOutcome, CycleReport, OrchestratorHandle, OrchestratorOptions};
pub use presenter::{PersistKind, ResultPresenter};
pub use spoof::{LineSpoofDetector, SpoofDetector};
pub use types::*;
