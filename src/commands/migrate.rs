use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Args;
use tracing as log;

use crate::{
    AppCtx,
    cache::ImageCache,
    chain::{self, DiskImage},
    convert::ConversionEngine,
    source::{HyperVSource, RemoteHost, SourceAdapter, SourceKind, XenServerSource},
    target::RawTarget,
    tooling::Toolbox,
    ui,
    utils::{
        lock::RunLock,
        process::{ProcessRunner, Runner},
    },
};

#[derive(Debug, Args)]
pub struct MigrateArgs {
    /// Source hypervisor hostname, reachable over ssh
    pub host: String,

    /// Leaf image path on the source host, in its native convention
    /// (e.g. 'C:\disks\vm.avhdx' or /run/sr-mount/<sr>/<uuid>.vhd)
    pub path: String,

    /// Output raw image, plain file or block device
    pub out: PathBuf,

    /// Remote username; defaults to the variant's configured user
    #[arg(short, long)]
    pub user: Option<String>,

    /// Local cache directory for downloaded images
    #[arg(short = 'd', long)]
    pub download_dir: Option<PathBuf>,

    /// Last image a previous run already applied; it and everything
    /// above it are skipped
    #[arg(short = 's', long = "start-at", visible_alias = "stop-at")]
    pub start_at: Option<String>,

    /// Apply the top image too. Only pass this on the final run, once
    /// the source VM is stopped.
    #[arg(short = 'f', long)]
    pub finish: bool,
}

impl MigrateArgs {
    pub fn run(&self, ctx: &AppCtx, kind: SourceKind) -> Result<()> {
        let settings = ctx.cfg.source(kind);
        let user = self.user.as_deref().unwrap_or(&settings.user);
        let download_dir = self
            .download_dir
            .clone()
            .unwrap_or_else(|| settings.download_dir.clone());

        let runner: Arc<dyn Runner + Send + Sync> = Arc::new(ProcessRunner::new());
        let tools = Toolbox::new(kind, &settings.converter, runner)?;
        let _lock = RunLock::try_acquire(kind.as_str())?;

        let cache = ImageCache::open(&download_dir)?;
        let remote = RemoteHost::new(user, self.host.as_str());
        let adapter: Box<dyn SourceAdapter> = match kind {
            SourceKind::HyperV => Box::new(HyperVSource::new(
                tools.ssh()?,
                tools.scp()?,
                tools.converter(),
                cache,
                remote,
            )),
            SourceKind::XenServer => Box::new(XenServerSource::new(
                tools.rsync()?,
                tools.converter(),
                cache,
                remote,
            )),
        };
        let engine = ConversionEngine::new(tools.converter(), tools.sparse());
        let target = RawTarget::new(self.out.clone());

        let outcome = migrate(
            adapter.as_ref(),
            &engine,
            &target,
            &self.path,
            self.start_at.as_deref(),
            self.finish,
        )?;

        if outcome.converted.is_empty() {
            log::info!("nothing to do");
            return Ok(());
        }
        for image in &outcome.converted {
            if let Some(local) = &image.local_path {
                log::debug!("{} applied from {}", image.remote_path, local.display());
            }
        }
        if let Some(anchor) = &outcome.next_anchor {
            log::info!(
                "to continue from the current state, run again with `--start-at {anchor}`"
            );
        }
        log::info!("done");
        Ok(())
    }
}

pub struct MigrateOutcome {
    pub converted: Vec<DiskImage>,
    /// Suggested `--start-at` for the next invocation; None when the top
    /// image was applied or nothing was converted.
    pub next_anchor: Option<String>,
}

/// The whole migration, over fakeable ports: resolve the chain, drop the
/// still-mutable top image unless this is the final pass, then fetch and
/// apply strictly in root-to-leaf order. Applies share one target and
/// each depends on the state left by its ancestors, so nothing here may
/// ever run concurrently or out of order.
pub fn migrate(
    adapter: &dyn SourceAdapter,
    engine: &ConversionEngine,
    target: &RawTarget,
    leaf: &str,
    start_at: Option<&str>,
    finish: bool,
) -> Result<MigrateOutcome> {
    log::info!("resolving {} snapshot chain for {leaf}", adapter.kind());
    let mut chain = chain::resolve_chain(adapter, leaf, start_at)?;

    if !finish
        && let Some(top) = chain.pop()
    {
        log::info!(
            "skipping the top image {} (the source VM may still write to it)",
            top.remote_path
        );
    }
    if chain.is_empty() {
        return Ok(MigrateOutcome {
            converted: chain,
            next_anchor: None,
        });
    }

    log::info!("chain to convert, root first:");
    ui::log_chain(&chain);

    for image in chain.iter_mut() {
        let local = adapter
            .fetch(image)
            .with_context(|| format!("fetch {}", image.remote_path))?;
        engine
            .apply(adapter, &local, target)
            .with_context(|| format!("apply {}", image.remote_path))?;
        image.local_path = Some(local);
    }

    let next_anchor = if finish {
        None
    } else {
        chain.last().map(|i| i.basename().to_string())
    };
    Ok(MigrateOutcome {
        converted: chain,
        next_anchor,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    use anyhow::bail;
    use tempfile::TempDir;

    use super::*;
    use crate::source::ImageInfo;
    use crate::tooling::{ConverterPort, SparsePort};

    struct FakeAdapter {
        parents: HashMap<String, Option<String>>,
        dir: PathBuf,
        fetches: Mutex<Vec<String>>,
    }

    impl FakeAdapter {
        fn new(dir: &Path, links: &[(&str, Option<&str>)]) -> Self {
            Self {
                parents: links
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
                    .collect(),
                dir: dir.to_path_buf(),
                fetches: Mutex::new(Vec::new()),
            }
        }
    }

    impl SourceAdapter for FakeAdapter {
        fn kind(&self) -> SourceKind {
            SourceKind::XenServer
        }

        fn validate_leaf(&self, _leaf: &str) -> Result<()> {
            Ok(())
        }

        fn parent_of(&self, image: &DiskImage) -> Result<Option<String>> {
            match self.parents.get(&image.remote_path) {
                Some(p) => Ok(p.clone()),
                None => bail!("unknown image {}", image.remote_path),
            }
        }

        fn fetch(&self, image: &DiskImage) -> Result<PathBuf> {
            self.fetches.lock().unwrap().push(image.remote_path.clone());
            let local = self.dir.join(image.basename());
            std::fs::write(&local, b"blocks")?;
            Ok(local)
        }

        fn inspect(&self, _local: &Path) -> Result<ImageInfo> {
            Ok(ImageInfo {
                virtual_size: 4 * 1024 * 1024,
                parent: None,
            })
        }
    }

    struct RecordingConverter {
        applies: Mutex<Vec<String>>,
    }

    impl ConverterPort for RecordingConverter {
        fn inspect(&self, _image: &Path) -> Result<HashMap<String, String>> {
            bail!("engine inspects through the adapter")
        }

        fn apply(&self, src: &Path, dst: &Path) -> Result<String> {
            assert!(dst.to_string_lossy().ends_with("out.raw"));
            self.applies
                .lock()
                .unwrap()
                .push(src.file_name().unwrap().to_string_lossy().into_owned());
            Ok(String::new())
        }
    }

    struct TouchSparse;

    impl SparsePort for TouchSparse {
        fn allocate(&self, path: &Path, _size_mib: u64) -> Result<()> {
            std::fs::write(path, b"")?;
            Ok(())
        }
    }

    struct Rig {
        tmp: TempDir,
        converter: Arc<RecordingConverter>,
        engine: ConversionEngine,
    }

    impl Rig {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let converter = Arc::new(RecordingConverter {
                applies: Mutex::new(Vec::new()),
            });
            let engine = ConversionEngine::new(converter.clone(), Arc::new(TouchSparse));
            Self {
                tmp,
                converter,
                engine,
            }
        }

        fn adapter(&self, links: &[(&str, Option<&str>)]) -> FakeAdapter {
            FakeAdapter::new(self.tmp.path(), links)
        }

        fn target(&self) -> RawTarget {
            RawTarget::new(self.tmp.path().join("out.raw"))
        }

        fn applies(&self) -> Vec<String> {
            self.converter.applies.lock().unwrap().clone()
        }
    }

    const LINKS: &[(&str, Option<&str>)] = &[
        ("/sr/snap3", Some("/sr/snap2")),
        ("/sr/snap2", Some("/sr/snap1")),
        ("/sr/snap1", None),
    ];

    fn converted(outcome: &MigrateOutcome) -> Vec<&str> {
        outcome
            .converted
            .iter()
            .map(|i| i.remote_path.as_str())
            .collect()
    }

    #[test]
    fn default_run_holds_back_top_image() {
        let rig = Rig::new();
        let adapter = rig.adapter(LINKS);
        let outcome =
            migrate(&adapter, &rig.engine, &rig.target(), "/sr/snap3", None, false).unwrap();

        assert_eq!(converted(&outcome), ["/sr/snap1", "/sr/snap2"]);
        assert_eq!(outcome.next_anchor.as_deref(), Some("snap2"));
        assert_eq!(rig.applies(), ["snap1", "snap2"]);
        assert_eq!(
            *adapter.fetches.lock().unwrap(),
            ["/sr/snap1", "/sr/snap2"]
        );
    }

    #[test]
    fn anchored_run_skips_converted_prefix() {
        let rig = Rig::new();
        let adapter = rig.adapter(LINKS);
        let outcome = migrate(
            &adapter,
            &rig.engine,
            &rig.target(),
            "/sr/snap3",
            Some("snap1"),
            false,
        )
        .unwrap();

        assert_eq!(converted(&outcome), ["/sr/snap2"]);
        assert_eq!(outcome.next_anchor.as_deref(), Some("snap2"));
        assert_eq!(rig.applies(), ["snap2"]);
    }

    #[test]
    fn finish_applies_whole_chain_in_order() {
        let rig = Rig::new();
        let adapter = rig.adapter(LINKS);
        let outcome =
            migrate(&adapter, &rig.engine, &rig.target(), "/sr/snap3", None, true).unwrap();

        assert_eq!(converted(&outcome), ["/sr/snap1", "/sr/snap2", "/sr/snap3"]);
        assert!(outcome.next_anchor.is_none());
        assert_eq!(rig.applies(), ["snap1", "snap2", "snap3"]);
    }

    #[test]
    fn single_image_chain_without_finish_is_a_noop() {
        let rig = Rig::new();
        let adapter = rig.adapter(&[("/sr/base", None)]);
        let outcome =
            migrate(&adapter, &rig.engine, &rig.target(), "/sr/base", None, false).unwrap();

        assert!(outcome.converted.is_empty());
        assert!(outcome.next_anchor.is_none());
        assert!(rig.applies().is_empty());
        assert!(adapter.fetches.lock().unwrap().is_empty());
    }

    #[test]
    fn converted_images_record_local_paths() {
        let rig = Rig::new();
        let adapter = rig.adapter(LINKS);
        let outcome =
            migrate(&adapter, &rig.engine, &rig.target(), "/sr/snap3", None, true).unwrap();

        for image in &outcome.converted {
            let local = image.local_path.as_ref().unwrap();
            assert!(local.is_file());
        }
    }
}
