use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};

use crate::utils::process::{CmdSpec, Runner, StdioSpec};

pub const REQ_BINS: &[&str] = &["dd"];

pub trait SparsePort: Send + Sync {
    /// Extend `path` to `size_mib` whole megabytes without writing data.
    fn allocate(&self, path: &Path, size_mib: u64) -> Result<()>;
}

type DynRunner = dyn Runner + Send + Sync;

pub struct SparseCli {
    runner: Arc<DynRunner>,
}

impl SparseCli {
    pub fn new(runner: Arc<DynRunner>) -> Self {
        Self { runner }
    }

    #[inline]
    fn seek_cmd(&self, path: &Path, size_mib: u64) -> CmdSpec {
        // count=0 with a seek writes nothing; the file ends up logically
        // size_mib MiB long with no blocks allocated.
        CmdSpec::new("dd")
            .arg("if=/dev/zero")
            .arg(format!("of={}", path.display()))
            .args(["bs=1", "count=0"])
            .arg(format!("seek={size_mib}M"))
            .stdout(StdioSpec::Null)
            .stderr(StdioSpec::Inherit)
    }
}

impl SparsePort for SparseCli {
    fn allocate(&self, path: &Path, size_mib: u64) -> Result<()> {
        let cmd = self.seek_cmd(path, size_mib);
        self.runner
            .run(&cmd)
            .with_context(|| format!("allocate {size_mib}M sparse at {}", path.display()))
    }
}
