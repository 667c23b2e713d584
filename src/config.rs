use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use config as cfg;
use serde::{Deserialize, Serialize};

use crate::source::SourceKind;

#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub hyperv: SourceSettings,
    pub xenserver: SourceSettings,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceSettings {
    pub user: String,
    pub download_dir: PathBuf,
    pub converter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hyperv: SourceSettings {
                user: "Administrator".into(),
                download_dir: "/var/tmp/hv-convert".into(),
                converter: "vhdx".into(),
            },
            xenserver: SourceSettings {
                user: "root".into(),
                download_dir: "/var/tmp/xen-convert".into(),
                converter: "vhd".into(),
            },
        }
    }
}

impl Config {
    /// Merge a TOML file over the built-in defaults. Every key is
    /// optional; a key that is present but blank is a configuration
    /// fault, not a fallback to the default.
    pub fn load(path: &Path) -> Result<Self> {
        let raw: RawConfig = cfg::Config::builder()
            .add_source(cfg::File::from(path))
            .build()
            .with_context(|| format!("load {}", path.display()))?
            .try_deserialize()
            .with_context(|| format!("deserialize {}", path.display()))?;

        let mut out = Self::default();
        merge(&mut out.hyperv, raw.hyperv, "hyperv")?;
        merge(&mut out.xenserver, raw.xenserver, "xenserver")?;
        Ok(out)
    }

    #[inline]
    pub fn source(&self, kind: SourceKind) -> &SourceSettings {
        match kind {
            SourceKind::HyperV => &self.hyperv,
            SourceKind::XenServer => &self.xenserver,
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn merge(dst: &mut SourceSettings, raw: Option<RawSource>, section: &str) -> Result<()> {
    let Some(raw) = raw else {
        return Ok(());
    };
    set_str(&mut dst.user, raw.user, section, "user")?;
    set_str(&mut dst.converter, raw.converter, section, "converter")?;
    if let Some(dir) = raw.download_dir {
        let dir = dir.trim();
        if dir.is_empty() {
            bail!("[{section}] download_dir must not be empty");
        }
        dst.download_dir = PathBuf::from(dir);
    }
    Ok(())
}

fn set_str(field: &mut String, value: Option<String>, section: &str, key: &str) -> Result<()> {
    if let Some(v) = value {
        let v = v.trim().to_string();
        if v.is_empty() {
            bail!("[{section}] {key} must not be empty");
        }
        *field = v;
    }
    Ok(())
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    hyperv: Option<RawSource>,
    #[serde(default)]
    xenserver: Option<RawSource>,
}

#[derive(Debug, Deserialize)]
struct RawSource {
    user: Option<String>,
    download_dir: Option<String>,
    converter: Option<String>,
}
