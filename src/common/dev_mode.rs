use std::path::PathBuf;
use std::fs;
use crate::common::error::Result;

#[derive(Debug, Clone)]
pub struct DevMode {
    enabled: bool,
    base_dir: PathBuf,
}

impl DevMode {
    pub fn new(enabled: bool) -> Result<Self> {
        Self::with_base_dir(enabled, PathBuf::from("./dev_data"))
    }

    pub fn with_base_dir(enabled: bool, base_dir: PathBuf) -> Result<Self> {
        // Create dev directories if in dev mode
        if enabled {
            fs::create_dir_all(base_dir.join("enrollment"))?;
            fs::create_dir_all(base_dir.join("captures"))?;
            fs::create_dir_all(base_dir.join("config"))?;

            tracing::info!("Development mode enabled - data will be saved to: {}",
                           base_dir.display());
        }

        Ok(Self { enabled, base_dir })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn enrollment_dir(&self) -> Option<PathBuf> {
        self.enabled.then(|| self.base_dir.join("enrollment"))
    }

    pub fn config_file(&self) -> Option<PathBuf> {
        self.enabled.then(|| self.base_dir.join("config").join("secure-auth.toml"))
    }

    pub fn get_capture_path(&self, prefix: &str) -> PathBuf {
        if self.enabled {
            let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
            self.base_dir.join("captures").join(format!("{}_{}.jpg", prefix, timestamp))
        } else {
            // In production mode, use current directory
            PathBuf::from(format!("{}.jpg", prefix))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_mode_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let dev = DevMode::with_base_dir(true, dir.path().to_path_buf()).unwrap();
        assert!(dev.is_enabled());
        assert!(dir.path().join("enrollment").is_dir());
        assert_eq!(dev.enrollment_dir(), Some(dir.path().join("enrollment")));
        assert!(dev.get_capture_path("frame").starts_with(dir.path().join("captures")));
    }

    #[test]
    fn test_disabled_has_no_dirs() {
        let dev = DevMode::new(false).unwrap();
        assert!(dev.enrollment_dir().is_none());
        assert!(dev.config_file().is_none());
        assert_eq!(dev.get_capture_path("frame"), PathBuf::from("frame.jpg"));
    }
}
