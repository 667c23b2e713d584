use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result, bail};
use tracing as log;

use crate::{
    cache::ImageCache,
    chain::DiskImage,
    source::{ImageInfo, RemoteHost, SourceAdapter, SourceKind},
    tooling::{ConverterPort, RsyncPort},
    utils::path::{image_dir, image_leaf},
};

const SIZE_KEY: &str = "size";
const PARENT_KEY: &str = "parentPath";

/// XenServer variant: parent links live inside the VHD footers, so each
/// image is fetched before its parent can be read. Transfers go through
/// rsync straight onto the final cache path; rsync resumes a partial file
/// and skips an up-to-date one, so no staging rename is needed. Within
/// one run a fetched image is memoized and not synced again.
pub struct XenServerSource {
    rsync: Arc<dyn RsyncPort>,
    converter: Arc<dyn ConverterPort>,
    cache: ImageCache,
    remote: RemoteHost,
    synced: Mutex<HashSet<String>>,
}

impl XenServerSource {
    pub fn new(
        rsync: Arc<dyn RsyncPort>,
        converter: Arc<dyn ConverterPort>,
        cache: ImageCache,
        remote: RemoteHost,
    ) -> Self {
        Self {
            rsync,
            converter,
            cache,
            remote,
            synced: Mutex::new(HashSet::new()),
        }
    }
}

impl SourceAdapter for XenServerSource {
    fn kind(&self) -> SourceKind {
        SourceKind::XenServer
    }

    fn validate_leaf(&self, leaf: &str) -> Result<()> {
        if leaf.contains('\\') {
            bail!("XenServer image path contains '\\': {leaf:?}");
        }
        if !leaf.starts_with('/') {
            bail!("XenServer image path must be absolute: {leaf:?}");
        }
        Ok(())
    }

    fn parent_of(&self, image: &DiskImage) -> Result<Option<String>> {
        let local = self.fetch(image)?;
        let info = self.inspect(&local)?;
        let Some(parent) = info.parent else {
            return Ok(None);
        };
        // The footer records a bare file name for a sibling in the same
        // storage repository directory.
        if parent.starts_with('/') {
            Ok(Some(parent))
        } else {
            Ok(Some(format!("{}/{parent}", image_dir(&image.remote_path))))
        }
    }

    fn fetch(&self, image: &DiskImage) -> Result<PathBuf> {
        let key = image_leaf(&image.remote_path).to_string();
        let dst = self.cache.entry(&key);
        {
            let synced = self
                .synced
                .lock()
                .map_err(|_| anyhow::anyhow!("fetch memo poisoned"))?;
            if synced.contains(&key) {
                return Ok(dst);
            }
        }

        log::info!("downloading {key} ({})", image.remote_path);
        let spec = format!("{}:{}", self.remote.login(), image.remote_path);
        self.rsync.sync(&spec, &dst)?;

        self.synced
            .lock()
            .map_err(|_| anyhow::anyhow!("fetch memo poisoned"))?
            .insert(key);
        Ok(dst)
    }

    fn inspect(&self, local: &Path) -> Result<ImageInfo> {
        let info = self.converter.inspect(local)?;
        let virtual_size = info
            .get(SIZE_KEY)
            .with_context(|| format!("no {SIZE_KEY} in metadata of {}", local.display()))?
            .trim()
            .parse::<u64>()
            .with_context(|| format!("bad {SIZE_KEY} in metadata of {}", local.display()))?;
        let parent = info
            .get(PARENT_KEY)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Ok(ImageInfo {
            virtual_size,
            parent,
        })
    }
}
