use crate::camera::CameraDevice;
use crate::common::{CameraConfig, LensCheckError, Result};
use crate::core::types::CaptureSettings;
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};
use image::{DynamicImage, ImageBuffer, Luma, Rgb};
use std::fs;

/// One `/dev/video*` entry as reported by [`V4l2Camera::list_all_cameras`].
#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub index: u32,
    pub name: String,
    pub features: Vec<String>,
    pub likely_wide_angle: bool,
}

pub struct V4l2Camera {
    index: u32,
    config: CameraConfig,
    device: Option<Device>,
    format: Option<v4l::Format>,
}

impl V4l2Camera {
    pub fn new(index: u32, config: CameraConfig) -> Self {
        Self { index, config, device: None, format: None }
    }

    /// List all available cameras with their capabilities
    pub fn list_all_cameras() -> Result<Vec<CameraInfo>> {
        let mut cameras = Vec::new();

        for entry in fs::read_dir("/dev")? {
            let entry = entry?;
            let path = entry.path();
            let filename = path.file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("");

            let Some(index) = filename.strip_prefix("video").and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            let Ok(device) = Device::new(index as usize) else {
                continue;
            };
            let Ok(caps) = device.query_caps() else {
                continue;
            };

            // Metadata-only nodes show up next to every UVC camera
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }

            let mut features = Vec::new();
            for fmt in device.enum_formats().unwrap_or_default() {
                match fmt.fourcc.str() {
                    Ok("MJPG") => features.push("Color (MJPG)".to_string()),
                    Ok("YUYV") => features.push("Color (YUYV)".to_string()),
                    Ok("GREY") => features.push("Grayscale (GREY)".to_string()),
                    Ok(other) => features.push(format!("Unsupported ({})", other)),
                    Err(_) => {}
                }
            }

            let card = caps.card.to_lowercase();
            let likely_wide_angle = card.contains("wide") || card.contains("fisheye");

            cameras.push(CameraInfo {
                index,
                name: caps.card.clone(),
                features,
                likely_wide_angle,
            });
        }

        cameras.sort_by_key(|c| c.index);
        Ok(cameras)
    }

    fn configure(&self, device: &Device) -> Result<v4l::Format> {
        let mut fmt = device.format()
            .map_err(|e| LensCheckError::Camera(format!("Failed to get format: {}", e)))?;

        tracing::debug!(device = self.index, "Current format: {}x{} {}", fmt.width, fmt.height, fmt.fourcc);

        fmt.width = self.config.width;
        fmt.height = self.config.height;

        // Keep GREY/YUYV if that is what the device runs, otherwise ask for MJPG
        if !matches!(fmt.fourcc.str(), Ok("GREY") | Ok("YUYV")) {
            fmt.fourcc = FourCC::new(b"MJPG");
        }

        // Don't fail if the exact resolution isn't supported
        if let Err(e) = device.set_format(&fmt) {
            tracing::warn!(device = self.index, "Could not set exact format: {}. Using device defaults.", e);
        }

        let final_fmt = device.format()
            .map_err(|e| LensCheckError::Camera(format!("Failed to get final format: {}", e)))?;

        if final_fmt.width != self.config.width || final_fmt.height != self.config.height {
            tracing::warn!(
                device = self.index,
                "Camera resolution {}x{} differs from requested {}x{}",
                final_fmt.width, final_fmt.height, self.config.width, self.config.height
            );
        }

        Ok(final_fmt)
    }

    fn decode(&self, data: &[u8], fmt: &v4l::Format) -> Result<DynamicImage> {
        match fmt.fourcc.str() {
            Ok("MJPG") => Ok(image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)?),
            Ok("GREY") => grey_to_image(data, fmt.width, fmt.height),
            Ok("YUYV") => yuyv_to_image(data, fmt.width, fmt.height),
            _ => Err(LensCheckError::Camera(format!("Unsupported format {}", fmt.fourcc))),
        }
    }
}

impl CameraDevice for V4l2Camera {
    fn name(&self) -> String {
        format!("/dev/video{}", self.index)
    }

    fn open(&mut self) -> Result<()> {
        if self.device.is_some() {
            return Ok(());
        }

        tracing::info!("Opening camera device {}...", self.index);
        let device = Device::new(self.index as usize)
            .map_err(|e| LensCheckError::Camera(format!("Failed to open camera {}: {}", self.index, e)))?;

        let caps = device.query_caps()
            .map_err(|e| LensCheckError::Camera(format!("Failed to query capabilities: {}", e)))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(LensCheckError::Camera(format!(
                "Device {} ({}) does not support video capture", self.index, caps.card
            )));
        }

        let fmt = self.configure(&device)?;

        // Warm up once per session so auto exposure has converged before the first grab
        {
            let mut stream = v4l::io::mmap::Stream::with_buffers(&device, Type::VideoCapture, 4)
                .map_err(|e| LensCheckError::Camera(format!("Failed to create stream: {}", e)))?;
            for i in 0..self.config.warmup_frames {
                stream.next()
                    .map_err(|e| LensCheckError::Camera(format!("Failed to capture warmup frame {}: {}", i, e)))?;
                std::thread::sleep(std::time::Duration::from_millis(self.config.warmup_delay_ms));
            }
        }

        tracing::info!("Camera {} ready: {}x{} {}", self.index, fmt.width, fmt.height, fmt.fourcc);
        self.device = Some(device);
        self.format = Some(fmt);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.device.take().is_some() {
            tracing::debug!("Closed camera device {}", self.index);
        }
        self.format = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.device.is_some()
    }

    fn grab(&mut self, settings: &CaptureSettings) -> Result<DynamicImage> {
        let (Some(device), Some(fmt)) = (self.device.as_ref(), self.format.as_ref()) else {
            return Err(LensCheckError::Camera(format!("Camera {} is not open", self.index)));
        };

        let mut stream = v4l::io::mmap::Stream::with_buffers(device, Type::VideoCapture, 4)
            .map_err(|e| LensCheckError::Camera(format!("Failed to create stream: {}", e)))?;

        for _ in 0..settings.skip_frames {
            stream.next()
                .map_err(|e| LensCheckError::Camera(format!("Failed to capture settle frame: {}", e)))?;
        }

        let (buf, meta) = stream.next()
            .map_err(|e| LensCheckError::Camera(format!("Failed to capture: {}", e)))?;
        let used = (meta.bytesused as usize).min(buf.len());
        let data = if used == 0 { buf } else { &buf[..used] };

        self.decode(data, fmt)
    }
}

fn grey_to_image(data: &[u8], width: u32, height: u32) -> Result<DynamicImage> {
    let len = (width * height) as usize;
    if data.len() < len {
        return Err(LensCheckError::Camera("Short grayscale frame".into()));
    }
    let img_buffer = ImageBuffer::<Luma<u8>, _>::from_raw(width, height, data[..len].to_vec())
        .ok_or_else(|| LensCheckError::Camera("Failed to create grayscale image buffer".into()))?;

    Ok(DynamicImage::ImageLuma8(img_buffer))
}

fn yuyv_to_image(data: &[u8], width: u32, height: u32) -> Result<DynamicImage> {
    let len = (width * height * 2) as usize;
    if data.len() < len {
        return Err(LensCheckError::Camera("Short YUYV frame".into()));
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in data[..len].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0] as f32, chunk[1] as f32 - 128.0, chunk[2] as f32, chunk[3] as f32 - 128.0);
        for y in [y0, y1] {
            rgb.push((y + 1.402 * v).clamp(0.0, 255.0) as u8);
            rgb.push((y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8);
            rgb.push((y + 1.772 * u).clamp(0.0, 255.0) as u8);
        }
    }

    let img_buffer = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, rgb)
        .ok_or_else(|| LensCheckError::Camera("Failed to create RGB image buffer".into()))?;
    Ok(DynamicImage::ImageRgb8(img_buffer))
}
