pub mod sensor;
pub mod still;
pub mod v4l2;

pub use sensor::SensorHandle;
pub use still::StillImageCamera;
pub use v4l2::{CameraInfo, V4l2Camera};

use crate::common::{CameraConfig, CameraSource, Result};
use crate::core::types::CaptureSettings;
use image::DynamicImage;

/// Blocking access to one camera.
pub trait CameraDevice: Send + 'static {
    fn name(&self) -> String;

    /// No-op when already open.
    fn open(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Deliver exactly one frame.
    fn grab(&mut self, settings: &CaptureSettings) -> Result<DynamicImage>;
}

pub fn camera_from_config(config: &CameraConfig) -> Result<Box<dyn CameraDevice>> {
    Ok(match config.source()? {
        CameraSource::Device(index) => Box::new(V4l2Camera::new(index, config.clone())),
        CameraSource::Still(path) => Box::new(StillImageCamera::new(path)),
    })
}
