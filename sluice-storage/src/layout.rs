use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File names used inside a capture directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureLayout {
    pub config_filename: String,
    pub database_filename: String,
    pub certs_dirname: String,
}

impl Default for CaptureLayout {
    fn default() -> Self {
        Self {
            config_filename: "sluice.toml".to_string(),
            database_filename: "capture.db".to_string(),
            certs_dirname: "certs".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturePaths {
    pub root: PathBuf,
    pub config: PathBuf,
    pub database: PathBuf,
    pub certs_dir: PathBuf,
}

impl CapturePaths {
    pub fn new(root: impl AsRef<Path>, layout: &CaptureLayout) -> Self {
        let root = root.as_ref().to_path_buf();
        let config = root.join(&layout.config_filename);
        let database = root.join(&layout.database_filename);
        let certs_dir = root.join(&layout.certs_dirname);

        Self {
            root,
            config,
            database,
            certs_dir,
        }
    }

    pub fn ensure_dirs(&self) -> Result<(), String> {
        for dir in [&self.root, &self.certs_dir] {
            std::fs::create_dir_all(dir)
                .map_err(|err| format!("failed to create {}: {err}", dir.display()))?;
        }
        Ok(())
    }

    /// Resolves a configured path: relative paths live inside the capture
    /// directory.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CaptureLayout, CapturePaths};
    use std::path::Path;

    #[test]
    fn default_layout_uses_expected_names() {
        let layout = CaptureLayout::default();
        assert_eq!(layout.config_filename, "sluice.toml");
        assert_eq!(layout.database_filename, "capture.db");
        assert_eq!(layout.certs_dirname, "certs");
    }

    #[test]
    fn capture_paths_join_layout_entries() {
        let paths = CapturePaths::new("/tmp/sluice", &CaptureLayout::default());

        assert_eq!(paths.config, Path::new("/tmp/sluice/sluice.toml"));
        assert_eq!(paths.database, Path::new("/tmp/sluice/capture.db"));
        assert_eq!(paths.certs_dir, Path::new("/tmp/sluice/certs"));
        assert_eq!(paths.resolve("ca"), Path::new("/tmp/sluice/ca"));
        assert_eq!(paths.resolve("/etc/ca"), Path::new("/etc/ca"));
    }

    #[test]
    fn ensure_dirs_creates_certs_dir() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CapturePaths::new(dir.path().join("capture"), &CaptureLayout::default());
        paths.ensure_dirs().unwrap();
        assert!(paths.certs_dir.is_dir());
    }
}
