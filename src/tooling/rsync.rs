use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};

use crate::utils::process::{CmdSpec, Runner};

pub const REQ_BINS: &[&str] = &["rsync"];

pub trait RsyncPort: Send + Sync {
    /// Resumable transfer of `remote` (user@host:path spec) onto `local`.
    /// `-u` skips an already up-to-date destination; an interrupted
    /// transfer resumes on the partially-written file.
    fn sync(&self, remote: &str, local: &Path) -> Result<()>;
}

type DynRunner = dyn Runner + Send + Sync;

pub struct RsyncCli {
    runner: Arc<DynRunner>,
}

impl RsyncCli {
    pub fn new(runner: Arc<DynRunner>) -> Self {
        Self { runner }
    }
}

impl RsyncPort for RsyncCli {
    fn sync(&self, remote: &str, local: &Path) -> Result<()> {
        let cmd = CmdSpec::new("rsync")
            .arg("-u")
            .arg("--progress")
            .arg(remote)
            .arg(local.display().to_string());
        self.runner
            .run(&cmd)
            .with_context(|| format!("rsync {remote}"))
    }
}
