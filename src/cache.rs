use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

/// Local download cache for fetched chain members. One file per image,
/// named by the variant's cache key; files persist across invocations so
/// a re-run after a failure skips completed transfers.
///
/// Whole-file transfers land in `transfer/` first and are renamed into
/// place only once complete; a crash mid-copy leaves a partial file under
/// `transfer/`, never at a final cache path.
pub struct ImageCache {
    root: PathBuf,
    staging: PathBuf,
}

impl ImageCache {
    pub fn open(root: &Path) -> Result<Self> {
        let staging = root.join("transfer");
        fs::create_dir_all(&staging)
            .with_context(|| format!("create download dir {}", staging.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
            staging,
        })
    }

    #[inline]
    pub fn entry(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    #[inline]
    pub fn staging_entry(&self, key: &str) -> PathBuf {
        self.staging.join(key)
    }

    #[inline]
    pub fn contains(&self, key: &str) -> bool {
        self.entry(key).is_file()
    }

    /// Move a completed staged transfer to its final cache path.
    pub fn promote(&self, key: &str) -> Result<PathBuf> {
        let staged = self.staging_entry(key);
        let dst = self.entry(key);
        fs::rename(&staged, &dst)
            .with_context(|| format!("promote {} -> {}", staged.display(), dst.display()))?;
        Ok(dst)
    }

    /// Drop a partial staged transfer after a failed copy.
    pub fn discard_staged(&self, key: &str) {
        let _ = fs::remove_file(self.staging_entry(key));
    }
}
