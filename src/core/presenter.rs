use image::DynamicImage;
use std::fmt;

/// What a persisted image is evidence of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistKind {
    /// Primary photo of an accepted capture.
    Accepted,
    /// Annotated auxiliary photo that triggered a spoof rejection.
    SpoofEvidence,
}

impl fmt::Display for PersistKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistKind::Accepted => write!(f, "accepted"),
            PersistKind::SpoofEvidence => write!(f, "spoof"),
        }
    }
}

/// Receives the outcome of every cycle. One-way: nothing returned here feeds
/// back into the orchestrator, so implementations log their own failures.
pub trait ResultPresenter: Send + Sync + 'static {
    fn show_spoof_rejected(&mut self);

    fn show_classification(&mut self, label: &str, confidence: f32);

    fn show_no_classification(&mut self);

    fn show_error(&mut self, reason: &str);

    fn persist(&mut self, image: &DynamicImage, kind: PersistKind);
}
