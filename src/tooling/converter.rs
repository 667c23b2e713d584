use std::{collections::HashMap, path::Path, sync::Arc};

use anyhow::{Context, Result, bail};

use crate::utils::process::{CmdSpec, Runner, StdioSpec};

/// The external VHD/VHDX converter. Invoked with one argument it prints
/// line-oriented `key=value` image metadata; with two it applies the
/// differencing disk's blocks onto the raw destination.
pub trait ConverterPort: Send + Sync {
    fn inspect(&self, image: &Path) -> Result<HashMap<String, String>>;
    fn apply(&self, src: &Path, dst: &Path) -> Result<String>;
}

type DynRunner = dyn Runner + Send + Sync;

pub struct ConverterCli {
    runner: Arc<DynRunner>,
    bin: String,
}

impl ConverterCli {
    pub fn new(runner: Arc<DynRunner>, bin: impl Into<String>) -> Self {
        Self {
            runner,
            bin: bin.into(),
        }
    }
}

impl ConverterPort for ConverterCli {
    fn inspect(&self, image: &Path) -> Result<HashMap<String, String>> {
        let cmd = CmdSpec::new(self.bin.as_str())
            .arg(image.display().to_string())
            .stdin(StdioSpec::Null)
            .stderr(StdioSpec::Inherit);
        let out = self
            .runner
            .run_capture(&cmd)
            .with_context(|| format!("{} inspect {}", self.bin, image.display()))?;
        parse_info(&out).with_context(|| format!("parse {} output for {}", self.bin, image.display()))
    }

    fn apply(&self, src: &Path, dst: &Path) -> Result<String> {
        let cmd = CmdSpec::new(self.bin.as_str())
            .arg(src.display().to_string())
            .arg(dst.display().to_string())
            .stdin(StdioSpec::Null)
            .stderr(StdioSpec::Inherit);
        self.runner
            .run_capture(&cmd)
            .with_context(|| format!("{} apply {} -> {}", self.bin, src.display(), dst.display()))
    }
}

/// Split each line on the first `=` only; parent paths may contain `=`.
fn parse_info(out: &str) -> Result<HashMap<String, String>> {
    let mut info = HashMap::new();
    for line in out.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            bail!("unrecognized metadata line: {line:?}");
        };
        info.insert(key.to_string(), value.to_string());
    }
    Ok(info)
}
