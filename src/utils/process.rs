use std::process::{Command, Stdio};

use anyhow::{Context, Result, bail};

#[derive(Clone, Debug)]
pub enum StdioSpec {
    Inherit,
    Null,
    Pipe,
}

impl StdioSpec {
    #[inline]
    fn to_stdio(&self) -> Stdio {
        match self {
            StdioSpec::Inherit => Stdio::inherit(),
            StdioSpec::Null => Stdio::null(),
            StdioSpec::Pipe => Stdio::piped(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CmdSpec {
    program: String,
    args: Vec<String>,
    stdin: StdioSpec,
    stdout: StdioSpec,
    stderr: StdioSpec,
}

impl CmdSpec {
    #[must_use]
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: StdioSpec::Inherit,
            stdout: StdioSpec::Inherit,
            stderr: StdioSpec::Inherit,
        }
    }

    #[must_use]
    pub fn arg(mut self, a: impl Into<String>) -> Self {
        self.args.push(a.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, it: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(it.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn stdin(mut self, s: StdioSpec) -> Self {
        self.stdin = s;
        self
    }

    #[must_use]
    pub fn stdout(mut self, s: StdioSpec) -> Self {
        self.stdout = s;
        self
    }

    #[must_use]
    pub fn stderr(mut self, s: StdioSpec) -> Self {
        self.stderr = s;
        self
    }

    pub fn render(&self) -> String {
        let prog = sh_quote(&self.program);
        let args: Vec<String> = self.args.iter().map(|a| sh_quote(a)).collect();
        if args.is_empty() {
            prog
        } else {
            format!("{} {}", prog, args.join(" "))
        }
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

pub trait Runner: Send + Sync {
    fn run(&self, cmd: &CmdSpec) -> Result<()>;
    fn run_capture(&self, cmd: &CmdSpec) -> Result<String>;
}

#[derive(Default, Clone)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

impl Runner for ProcessRunner {
    fn run(&self, spec: &CmdSpec) -> Result<()> {
        tracing::debug!("exec: {}", spec.render());

        let mut cmd = spec.to_command();
        cmd.stdin(spec.stdin.to_stdio());
        cmd.stdout(spec.stdout.to_stdio());
        cmd.stderr(spec.stderr.to_stdio());

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawn {}", spec.render()))?;
        let status = child
            .wait()
            .with_context(|| format!("wait for {}", spec.render()))?;
        if !status.success() {
            bail!("command failed: {} with {status}", spec.render());
        }
        Ok(())
    }

    fn run_capture(&self, spec: &CmdSpec) -> Result<String> {
        tracing::debug!("exec(capture): {}", spec.render());

        let mut cmd = spec.to_command();
        cmd.stdin(spec.stdin.to_stdio());
        cmd.stdout(StdioSpec::Pipe.to_stdio());
        cmd.stderr(spec.stderr.to_stdio());

        let out = cmd
            .output()
            .with_context(|| format!("run {}", spec.render()))?;
        if out.status.success() {
            Ok(String::from_utf8_lossy(&out.stdout).to_string())
        } else {
            bail!("command failed: {} (status {})", spec.render(), out.status);
        }
    }
}

fn sh_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".into();
    }
    if !s
        .bytes()
        .any(|b| b == b' ' || b == b'\'' || b == b'"' || b == b'\\')
    {
        return s.to_string();
    }
    let mut out = String::from("'");
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}
