use crate::common::{default_album_dir, DevMode, LensCheckError, Result, StorageConfig};
use image::DynamicImage;
use std::fs;
use std::path::{Path, PathBuf};

/// Flat directory of saved photos, one JPEG per persisted image.
pub struct PhotoAlbum {
    dir: PathBuf,
}

impl PhotoAlbum {
    pub fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).map_err(|e| {
            LensCheckError::Storage(format!("Failed to create album {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir })
    }

    /// Dev mode wins over the configured dir, which wins over `<Pictures>/lenscheck`.
    pub fn from_config(storage: &StorageConfig, dev_mode: &DevMode) -> Result<Self> {
        let dir = dev_mode
            .album_dir()
            .or_else(|| storage.album_dir.clone())
            .unwrap_or_else(default_album_dir);

        if dev_mode.is_enabled() {
            tracing::debug!("PhotoAlbum using dev directory: {:?}", dir);
        }
        Self::new(dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn save(&self, image: &DynamicImage, prefix: &str) -> Result<PathBuf> {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%3f");
        let mut path = self.dir.join(format!("{}_{}.jpg", prefix, stamp));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{}_{}_{}.jpg", prefix, stamp, n));
            n += 1;
        }

        // JPEG has no alpha channel
        DynamicImage::ImageRgb8(image.to_rgb8()).save(&path)?;
        tracing::info!("Saved {}", path.display());
        Ok(path)
    }

    pub fn list(&self) -> Result<Vec<PathBuf>> {
        let mut entries: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().map_or(false, |ext| ext == "jpg"))
            .collect();
        entries.sort();
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{RgbaImage, Rgba};

    #[test]
    fn saves_rgba_as_jpeg_without_collisions() {
        let tmp = tempfile::tempdir().unwrap();
        let album = PhotoAlbum::new(tmp.path().join("album")).unwrap();
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([10, 20, 30, 128])));

        let first = album.save(&image, "spoof").unwrap();
        let second = album.save(&image, "spoof").unwrap();

        assert_ne!(first, second);
        assert_eq!(album.list().unwrap().len(), 2);
        assert!(image::open(&first).is_ok());
    }

    #[test]
    fn configured_dir_is_used_outside_dev_mode() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = StorageConfig { album_dir: Some(tmp.path().join("photos")), persist_accepted: true };
        let dev = DevMode::with_base_dir(false, tmp.path().join("dev")).unwrap();

        let album = PhotoAlbum::from_config(&storage, &dev).unwrap();
        assert_eq!(album.dir(), tmp.path().join("photos"));
    }
}
