use crate::camera::CameraDevice;
use crate::common::{LensCheckError, Result};
use crate::core::types::CaptureSettings;
use image::DynamicImage;
use std::path::PathBuf;

/// Serves one image file as every frame. Lets the full cycle run on a bench
/// machine with no cameras attached.
pub struct StillImageCamera {
    path: PathBuf,
    image: Option<DynamicImage>,
}

impl StillImageCamera {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), image: None }
    }
}

impl CameraDevice for StillImageCamera {
    fn name(&self) -> String {
        format!("still:{}", self.path.display())
    }

    fn open(&mut self) -> Result<()> {
        if self.image.is_none() {
            let image = image::open(&self.path).map_err(|e| {
                LensCheckError::Camera(format!("Failed to open {}: {}", self.path.display(), e))
            })?;
            self.image = Some(image);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.image = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.image.is_some()
    }

    fn grab(&mut self, _settings: &CaptureSettings) -> Result<DynamicImage> {
        self.image
            .clone()
            .ok_or_else(|| LensCheckError::Camera("Still camera is not open".into()))
    }
}
