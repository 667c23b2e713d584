use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use sha2::{Digest, Sha256};
use tracing as log;

use crate::{
    cache::ImageCache,
    chain::DiskImage,
    source::{ImageInfo, RemoteHost, SourceAdapter, SourceKind},
    tooling::{ConverterPort, ScpPort, SshPort},
};

const SIZE_KEY: &str = "virtualSize";
const PARENT_KEY: &str = "parentPath";

/// Hyper-V variant: parent links come from the hypervisor management
/// layer over ssh (`Get-VHD`), transfers are whole-file scp through the
/// staging directory, and cache keys are digests of the Windows path so
/// local names never hit path-length or character restrictions.
pub struct HyperVSource {
    ssh: Arc<dyn SshPort>,
    scp: Arc<dyn ScpPort>,
    converter: Arc<dyn ConverterPort>,
    cache: ImageCache,
    remote: RemoteHost,
}

impl HyperVSource {
    pub fn new(
        ssh: Arc<dyn SshPort>,
        scp: Arc<dyn ScpPort>,
        converter: Arc<dyn ConverterPort>,
        cache: ImageCache,
        remote: RemoteHost,
    ) -> Self {
        Self {
            ssh,
            scp,
            converter,
            cache,
            remote,
        }
    }

    fn scp_spec(&self, windows_path: &str) -> Result<String> {
        let upath = windows_to_unix(windows_path)?;
        // The quotes survive into the remote shell, protecting spaces in
        // the Windows path.
        Ok(format!("{}:/'{}'", self.remote.login(), upath))
    }
}

impl SourceAdapter for HyperVSource {
    fn kind(&self) -> SourceKind {
        SourceKind::HyperV
    }

    fn validate_leaf(&self, leaf: &str) -> Result<()> {
        if leaf.contains('/') {
            bail!("Hyper-V image path contains '/': {leaf:?}");
        }
        let b = leaf.as_bytes();
        if b.len() < 3 || !b[0].is_ascii_alphabetic() || b[1] != b':' || b[2] != b'\\' {
            bail!("Hyper-V image path must be absolute, e.g. 'C:\\dir\\file.vhdx': {leaf:?}");
        }
        Ok(())
    }

    fn parent_of(&self, image: &DiskImage) -> Result<Option<String>> {
        let cmd = format!("Get-VHD '{}' | select -exp ParentPath", image.remote_path);
        let out = self
            .ssh
            .exec(&self.remote.login(), &cmd)
            .with_context(|| format!("query parent of {}", image.remote_path))?;
        let parent = out.trim();
        if parent.is_empty() {
            Ok(None)
        } else {
            Ok(Some(parent.to_string()))
        }
    }

    fn fetch(&self, image: &DiskImage) -> Result<PathBuf> {
        let key = cache_key(&image.remote_path);
        if self.cache.contains(&key) {
            log::info!("file {key} already cached, skipping");
            return Ok(self.cache.entry(&key));
        }

        log::info!("downloading {key} ({})", image.remote_path);
        let spec = self.scp_spec(&image.remote_path)?;
        let staged = self.cache.staging_entry(&key);
        if let Err(e) = self.scp.copy(&spec, &staged) {
            self.cache.discard_staged(&key);
            return Err(e);
        }
        self.cache.promote(&key)
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

fn windows_to_unix(path: &str) -> Result<String> {
    if path.contains('/') {
        bail!("path contains '/': {path:?}");
    }
    Ok(path.replace('\\', "/"))
}

/// Fixed-length key over the case-folded Windows path. NTFS paths are
/// case-insensitive, so two spellings of one file share a cache entry.
fn cache_key(path: &str) -> String {
    let digest = Sha256::digest(path.to_uppercase().as_bytes());
    let mut hex = String::with_capacity(32);
    for b in &digest[..16] {
        hex.push_str(&format!("{b:02x}"));
    }
    hex
}
