use crate::core::presenter::{PersistKind, ResultPresenter};
use crate::storage::PhotoAlbum;
use image::DynamicImage;
use std::io::{self, Write};

/// Title and body of one user-facing notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub title: &'static str,
    pub message: String,
}

impl Alert {
    pub fn spoof_rejected() -> Self {
        Self {
            title: "Lines Detected",
            message: "Lines were detected in the image, indicating a potential attempt to capture a \
                      display or printed material. Please take a new photo in a natural environment."
                .into(),
        }
    }

    pub fn classification(label: &str, confidence: f32) -> Self {
        Self {
            title: "Result",
            message: format!("Class: {}, Confidence: {:.2}%", label, confidence * 100.0),
        }
    }

    pub fn no_classification() -> Self {
        Self { title: "Result", message: "No classification result available.".into() }
    }

    pub fn error(reason: &str) -> Self {
        Self { title: "Capture Failed", message: reason.to_string() }
    }
}

/// Prints alerts to stdout and saves persisted images to the album.
pub struct ConsolePresenter {
    album: Option<PhotoAlbum>,
    raw_mode: bool,
}

impl ConsolePresenter {
    pub fn new(album: Option<PhotoAlbum>) -> Self {
        Self { album, raw_mode: false }
    }

    /// Use `\r\n` line endings while the terminal is in raw mode.
    pub fn with_raw_mode(mut self, raw_mode: bool) -> Self {
        self.raw_mode = raw_mode;
        self
    }

    fn show(&self, alert: Alert) {
        let nl = if self.raw_mode { "\r\n" } else { "\n" };
        let rule = "─".repeat(alert.title.chars().count() + 4);
        let mut out = io::stdout().lock();
        let written = write!(out, "{nl}┌{rule}┐{nl}│  {}  │{nl}└{rule}┘{nl}{}{nl}", alert.title, alert.message)
            .and_then(|_| out.flush());
        if let Err(e) = written {
            tracing::warn!("Failed to write alert: {}", e);
        }
    }
}

impl ResultPresenter for ConsolePresenter {
    fn show_spoof_rejected(&mut self) {
        self.show(Alert::spoof_rejected());
    }

    fn show_classification(&mut self, label: &str, confidence: f32) {
        self.show(Alert::classification(label, confidence));
    }

    fn show_no_classification(&mut self) {
        self.show(Alert::no_classification());
    }

    fn show_error(&mut self, reason: &str) {
        self.show(Alert::error(reason));
    }

    fn persist(&mut self, image: &DynamicImage, kind: PersistKind) {
        let Some(album) = &self.album else {
            tracing::debug!(%kind, "No album configured, image not saved");
            return;
        };
        if let Err(e) = album.save(image, &kind.to_string()) {
            tracing::warn!(%kind, "Failed to save image: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn classification_alert_text() {
        let alert = Alert::classification("bottle", 0.87);
        assert_eq!(alert.title, "Result");
        assert_eq!(alert.message, "Class: bottle, Confidence: 87.00%");
    }

    #[test]
    fn persist_writes_into_album() {
        let tmp = tempfile::tempdir().unwrap();
        let album = PhotoAlbum::new(tmp.path().to_path_buf()).unwrap();
        let mut presenter = ConsolePresenter::new(Some(album));

        presenter.persist(&DynamicImage::ImageRgb8(RgbImage::new(8, 8)), PersistKind::SpoofEvidence);

        let saved: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(saved.len(), 1);
        let name = saved[0].as_ref().unwrap().file_name();
        assert!(name.to_string_lossy().starts_with("spoof_"));
    }

    #[test]
    fn persist_without_album_is_silent() {
        let mut presenter = ConsolePresenter::new(None);
        presenter.persist(&DynamicImage::ImageRgb8(RgbImage::new(2, 2)), PersistKind::Accepted);
    }
}
