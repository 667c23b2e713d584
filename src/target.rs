use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use tracing as log;

use crate::tooling::SparsePort;

const MIB: u64 = 1024 * 1024;

/// Round a virtual disk size up to whole megabytes so the raw file is
/// never shorter than the disk it will hold.
pub fn size_to_whole_mib(bytes: u64) -> Result<u64> {
    if bytes == 0 {
        bail!("image reports zero virtual size");
    }
    Ok((bytes - 1) / MIB + 1)
}

/// The single destination raw image, file or block device. Every apply in
/// a run goes through one handle; the file is allocated at most once and
/// its size never changes afterwards.
pub struct RawTarget {
    path: PathBuf,
}

impl RawTarget {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn allocate(&self, sparse: &dyn SparsePort, virtual_size: u64) -> Result<()> {
        let size_mib = size_to_whole_mib(virtual_size)?;
        log::info!(
            "creating sparse raw output image {} ({size_mib}M)",
            self.path.display()
        );
        sparse.allocate(&self.path, size_mib)
    }
}
