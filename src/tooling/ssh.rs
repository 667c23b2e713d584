use std::sync::Arc;

use anyhow::{Context, Result};

use crate::utils::process::{CmdSpec, Runner, StdioSpec};

pub const REQ_BINS: &[&str] = &["ssh"];

pub trait SshPort: Send + Sync {
    /// Run one command on the remote host, capturing stdout.
    fn exec(&self, target: &str, command: &str) -> Result<String>;
}

type DynRunner = dyn Runner + Send + Sync;

pub struct SshCli {
    runner: Arc<DynRunner>,
}

impl SshCli {
    pub fn new(runner: Arc<DynRunner>) -> Self {
        Self { runner }
    }
}

impl SshPort for SshCli {
    fn exec(&self, target: &str, command: &str) -> Result<String> {
        let cmd = CmdSpec::new("ssh")
            .arg(target)
            .arg(command)
            .stdin(StdioSpec::Null)
            .stderr(StdioSpec::Inherit);
        self.runner
            .run_capture(&cmd)
            .with_context(|| format!("ssh {target}"))
    }
}
