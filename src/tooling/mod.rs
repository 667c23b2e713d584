use std::{collections::BTreeSet, sync::Arc};

use anyhow::{Result, anyhow};

use crate::{
    source::SourceKind,
    utils::{bins::ensure_bins, process::Runner},
};

pub mod converter;
pub mod rsync;
pub mod scp;
pub mod sparse;
pub mod ssh;

pub use converter::{ConverterCli, ConverterPort};
pub use rsync::{RsyncCli, RsyncPort};
pub use scp::{ScpCli, ScpPort};
pub use sparse::{SparseCli, SparsePort};
pub use ssh::{SshCli, SshPort};

type DynRunner = dyn Runner + Send + Sync;

pub struct Toolbox {
    kind: SourceKind,
    ssh: Option<Arc<dyn SshPort>>,
    scp: Option<Arc<dyn ScpPort>>,
    rsync: Option<Arc<dyn RsyncPort>>,
    converter: Arc<dyn ConverterPort>,
    sparse: Arc<dyn SparsePort>,
}

impl Toolbox {
    pub fn new(kind: SourceKind, converter_bin: &str, runner: Arc<DynRunner>) -> Result<Self> {
        ensure_bins_for_kind(kind, converter_bin)?;

        let (ssh, scp, rsync): (
            Option<Arc<dyn SshPort>>,
            Option<Arc<dyn ScpPort>>,
            Option<Arc<dyn RsyncPort>>,
        ) = match kind {
            SourceKind::HyperV => (
                Some(Arc::new(SshCli::new(runner.clone()))),
                Some(Arc::new(ScpCli::new(runner.clone()))),
                None,
            ),
            SourceKind::XenServer => (None, None, Some(Arc::new(RsyncCli::new(runner.clone())))),
        };

        let converter: Arc<dyn ConverterPort> =
            Arc::new(ConverterCli::new(runner.clone(), converter_bin));
        let sparse: Arc<dyn SparsePort> = Arc::new(SparseCli::new(runner));

        Ok(Self {
            kind,
            ssh,
            scp,
            rsync,
            converter,
            sparse,
        })
    }

    pub fn ssh(&self) -> Result<Arc<dyn SshPort>> {
        self.ssh
            .clone()
            .ok_or_else(|| anyhow!("no remote shell transport for {}", self.kind))
    }

    pub fn scp(&self) -> Result<Arc<dyn ScpPort>> {
        self.scp
            .clone()
            .ok_or_else(|| anyhow!("no whole-file copy transport for {}", self.kind))
    }

    pub fn rsync(&self) -> Result<Arc<dyn RsyncPort>> {
        self.rsync
            .clone()
            .ok_or_else(|| anyhow!("no sync transport for {}", self.kind))
    }

    #[inline]
    pub fn converter(&self) -> Arc<dyn ConverterPort> {
        self.converter.clone()
    }

    #[inline]
    pub fn sparse(&self) -> Arc<dyn SparsePort> {
        self.sparse.clone()
    }
}

fn ensure_bins_for_kind(kind: SourceKind, converter_bin: &str) -> Result<()> {
    let mut all: BTreeSet<&str> = BTreeSet::new();

    match kind {
        SourceKind::HyperV => {
            for b in ssh::REQ_BINS {
                all.insert(b);
            }
            for b in scp::REQ_BINS {
                all.insert(b);
            }
        }
        SourceKind::XenServer => {
            for b in rsync::REQ_BINS {
                all.insert(b);
            }
        }
    }
    for b in sparse::REQ_BINS {
        all.insert(b);
    }
    all.insert(converter_bin);

    let list: Vec<&str> = all.into_iter().collect();
    ensure_bins(list)
}
