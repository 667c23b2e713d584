use std::{
    fs::{File, OpenOptions},
    io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use fs2::FileExt;

/// Exclusive advisory lock held for the lifetime of one migration run.
/// The cache directory and the raw target have no locking of their own,
/// so a second concurrent run would interleave writes into both.
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl std::fmt::Debug for RunLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLock").field("path", &self.path).finish()
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

impl RunLock {
    pub fn try_acquire(name: &str) -> Result<Self> {
        let path = lock_path_for(name);
        let file = open_lockfile(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { file, path }),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                bail!("another migration holds lock: {}", path.display())
            }
            Err(e) => Err(e).with_context(|| format!("flock {}", path.display())),
        }
    }
}

fn open_lockfile(path: &Path) -> Result<File> {
    let mut opts = OpenOptions::new();
    opts.read(true).write(true).create(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o644);
    }
    opts.open(path)
        .with_context(|| format!("open lockfile {}", path.display()))
}

fn lock_path_for(name: &str) -> PathBuf {
    let safe = sanitize_name(name);
    let candidate = PathBuf::from("/var/lock");
    if dir_writable(&candidate) {
        candidate.join(format!("{safe}.lock"))
    } else {
        std::env::temp_dir().join(format!("{safe}.lock"))
    }
}

fn dir_writable(dir: &Path) -> bool {
    if !dir.is_dir() {
        return false;
    }
    let probe = dir.join(".chain2raw_lock_probe");
    match OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&probe)
    {
        Ok(_) => {
            let _ = std::fs::remove_file(probe);
            true
        }
        Err(_) => false,
    }
}

fn sanitize_name(s: &str) -> String {
    let filtered: String = s
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();

    if filtered.is_empty() {
        "chain2raw".to_string()
    } else {
        format!("chain2raw_{filtered}")
    }
}
