use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};

use crate::utils::process::{CmdSpec, Runner};

pub const REQ_BINS: &[&str] = &["scp"];

pub trait ScpPort: Send + Sync {
    /// Whole-file compressed copy of `remote` (user@host:path spec) to `local`.
    fn copy(&self, remote: &str, local: &Path) -> Result<()>;
}

type DynRunner = dyn Runner + Send + Sync;

pub struct ScpCli {
    runner: Arc<DynRunner>,
}

impl ScpCli {
    pub fn new(runner: Arc<DynRunner>) -> Self {
        Self { runner }
    }
}

impl ScpPort for ScpCli {
    fn copy(&self, remote: &str, local: &Path) -> Result<()> {
        let cmd = CmdSpec::new("scp")
            .arg("-C")
            .arg(remote)
            .arg(local.display().to_string());
        self.runner
            .run(&cmd)
            .with_context(|| format!("scp {remote}"))
    }
}
