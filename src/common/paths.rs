use std::path::PathBuf;

// Fixed system locations. Dev mode overrides these through DevMode.

pub fn system_config_file() -> PathBuf {
    PathBuf::from("/etc/lenscheck/lenscheck.toml")
}

pub fn system_models_dir() -> PathBuf {
    PathBuf::from("/usr/share/lenscheck/models")
}

/// Default photo album: `<Pictures>/lenscheck`, falling back to the
/// per-user data dir when the platform has no pictures dir.
pub fn default_album_dir() -> PathBuf {
    if let Some(pictures) = dirs::picture_dir() {
        return pictures.join("lenscheck");
    }
    directories::ProjectDirs::from("com", "lenscheck", "LensCheck")
        .map(|dirs| dirs.data_dir().join("album"))
        .unwrap_or_else(|| PathBuf::from("lenscheck_album"))
}
