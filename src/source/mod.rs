use std::{
    fmt,
    path::{Path, PathBuf},
};

use anyhow::Result;

use crate::chain::DiskImage;

pub mod hyperv;
pub mod xenserver;

pub use hyperv::HyperVSource;
pub use xenserver::XenServerSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    HyperV,
    XenServer,
}

impl SourceKind {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::HyperV => "hyperv",
            SourceKind::XenServer => "xenserver",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized converter metadata for one local image file.
#[derive(Debug, Clone)]
pub struct ImageInfo {
    pub virtual_size: u64,
    pub parent: Option<String>,
}

/// `user@host` half of a remote copy spec.
#[derive(Debug, Clone)]
pub struct RemoteHost {
    pub user: String,
    pub host: String,
}

impl RemoteHost {
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
        }
    }

    #[inline]
    pub fn login(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Everything that differs between the two hypervisor variants: path
/// convention, parent lookup mechanism, cache key scheme and transfer
/// tool. The resolver, engine and driver only speak this trait.
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Reject a leaf path in the wrong separator convention before any
    /// remote call is made.
    fn validate_leaf(&self, leaf: &str) -> Result<()>;

    /// Remote path of the image's parent, or None at the root.
    fn parent_of(&self, image: &DiskImage) -> Result<Option<String>>;

    /// Idempotent: a chain member already in the local cache is not
    /// transferred again.
    fn fetch(&self, image: &DiskImage) -> Result<PathBuf>;

    /// Converter metadata for an already-fetched image.
    fn inspect(&self, local: &Path) -> Result<ImageInfo>;
}
