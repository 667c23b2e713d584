use anyhow::Result;
use tracing as log;

use crate::{source::SourceAdapter, utils::path::image_leaf};

/// One node in a differencing-disk chain. `remote_path` is in the source
/// host's native convention; `local_path` is recorded once fetched.
#[derive(Debug, Clone)]
pub struct DiskImage {
    pub remote_path: String,
    pub parent_remote_path: Option<String>,
    pub local_path: Option<std::path::PathBuf>,
}

impl DiskImage {
    pub fn new(remote_path: impl Into<String>) -> Self {
        Self {
            remote_path: remote_path.into(),
            parent_remote_path: None,
            local_path: None,
        }
    }

    #[inline]
    pub fn basename(&self) -> &str {
        image_leaf(&self.remote_path)
    }
}

/// The operator-supplied anchor is whatever a previous run suggested,
/// which is a basename; accept a full parent path as well.
pub fn anchor_matches(anchor: &str, parent: &str) -> bool {
    anchor == parent || anchor == image_leaf(parent)
}

/// Walk parent links backward from `leaf`, prepending each discovered
/// image, so the result is ordered root first, requested leaf last.
///
/// Resolution stops at the root (no parent) or as soon as the parent
/// matches `start_at`: the anchor and everything above it were converted
/// by an earlier run and are not part of this chain.
pub fn resolve_chain(
    adapter: &dyn SourceAdapter,
    leaf: &str,
    start_at: Option<&str>,
) -> Result<Vec<DiskImage>> {
    adapter.validate_leaf(leaf)?;

    let mut chain: Vec<DiskImage> = Vec::new();
    let mut current = leaf.to_string();
    loop {
        let mut image = DiskImage::new(current);
        let parent = adapter.parent_of(&image)?;
        image.parent_remote_path = parent.clone();
        chain.insert(0, image);

        let Some(parent) = parent else {
            break; // reached the root
        };
        log::info!("parent = {parent}");
        if let Some(anchor) = start_at
            && anchor_matches(anchor, &parent)
        {
            log::info!("reached already converted image {anchor}, skipping the rest");
            break;
        }
        current = parent;
    }
    Ok(chain)
}
