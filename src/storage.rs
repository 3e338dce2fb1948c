//! On-disk locations for uploads, extracted images and finished cards.
//!
//! Several submissions may share these directories at the same time, so every
//! file we create gets a random UUID in its name.

use std::{
    fs,
    time::{Duration, SystemTime},
};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::prelude::*;

/// Our working directories.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct StorageDirs {
    /// Raw uploaded PDFs and photos.
    pub uploads_dir: PathBuf,
    /// Images pulled out of PDFs, and normalized user photos.
    pub images_dir: PathBuf,
    /// Finished cards.
    pub cards_dir: PathBuf,
}

impl Default for StorageDirs {
    fn default() -> Self {
        Self {
            uploads_dir: PathBuf::from("uploads"),
            images_dir: PathBuf::from("extracted_images"),
            cards_dir: PathBuf::from("cards"),
        }
    }
}

impl StorageDirs {
    /// Put all our directories under `root`.
    #[cfg(test)]
    pub fn under(root: &Path) -> Self {
        let defaults = Self::default();
        Self {
            uploads_dir: root.join(defaults.uploads_dir),
            images_dir: root.join(defaults.images_dir),
            cards_dir: root.join(defaults.cards_dir),
        }
    }

    fn all(&self) -> [&Path; 3] {
        [
            self.uploads_dir.as_path(),
            self.images_dir.as_path(),
            self.cards_dir.as_path(),
        ]
    }

    /// Create any missing directories.
    pub async fn ensure(&self) -> Result<()> {
        for dir in self.all() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("cannot create directory {:?}", dir.display()))?;
        }
        Ok(())
    }

    /// Write caller-supplied bytes into the uploads directory.
    pub async fn stage_upload(&self, stem: &str, ext: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = unique_path(&self.uploads_dir, stem, ext);
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("cannot write upload {:?}", path.display()))?;
        Ok(path)
    }

    /// Delete regular files older than `max_age` from all our directories.
    /// Returns how many files were removed. Problems with individual files are
    /// logged and skipped.
    #[instrument(level = "debug", skip(self))]
    pub fn remove_older_than(&self, max_age: Duration) -> Result<usize> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .ok_or_else(|| anyhow!("retention window {max_age:?} is too large"))?;
        let mut removed = 0;
        for dir in self.all() {
            if !dir.is_dir() {
                continue;
            }
            let entries = fs::read_dir(dir)
                .with_context(|| format!("cannot read directory {:?}", dir.display()))?;
            for entry in entries {
                let path = match entry {
                    Ok(entry) => entry.path(),
                    Err(err) => {
                        warn!(dir = %dir.display(), "cannot read directory entry: {err}");
                        continue;
                    }
                };
                match remove_if_older(&path, cutoff) {
                    Ok(true) => removed += 1,
                    Ok(false) => {}
                    Err(err) => warn!(path = %path.display(), "cannot clean up file: {err:#}"),
                }
            }
        }
        Ok(removed)
    }
}

fn remove_if_older(path: &Path, cutoff: SystemTime) -> Result<bool> {
    let metadata = fs::metadata(path)?;
    if !metadata.is_file() || metadata.modified()? > cutoff {
        return Ok(false);
    }
    fs::remove_file(path)?;
    debug!(path = %path.display(), "Removed old file");
    Ok(true)
}

/// Build `<dir>/<stem>_<uuid>.<ext>`.
pub fn unique_path(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    dir.join(format!("{stem}_{}.{ext}", Uuid::new_v4().simple()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_paths_do_not_collide() {
        let dir = Path::new("cards");
        let a = unique_path(dir, "id", "png");
        let b = unique_path(dir, "id", "png");
        assert_ne!(a, b);
        assert!(a.starts_with("cards"));
        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("id_"));
        assert!(name.ends_with(".png"));
    }

    #[tokio::test]
    async fn ensure_and_stage_upload() -> Result<()> {
        let root = tempfile::TempDir::with_prefix("storage")?;
        let dirs = StorageDirs::under(root.path());
        dirs.ensure().await?;
        let path = dirs.stage_upload("temp", "pdf", b"%PDF-1.4").await?;
        assert!(path.starts_with(&dirs.uploads_dir));
        assert_eq!(fs::read(&path)?, b"%PDF-1.4");
        Ok(())
    }

    #[tokio::test]
    async fn remove_older_than_keeps_fresh_files() -> Result<()> {
        let root = tempfile::TempDir::with_prefix("storage")?;
        let dirs = StorageDirs::under(root.path());
        dirs.ensure().await?;
        let path = dirs.stage_upload("temp", "pdf", b"data").await?;
        assert_eq!(dirs.remove_older_than(Duration::from_secs(3600))?, 0);
        assert!(path.exists());
        assert_eq!(dirs.remove_older_than(Duration::ZERO)?, 1);
        assert!(!path.exists());
        Ok(())
    }
}
