use std::{path::Path, sync::Arc};

use anyhow::Result;
use tracing as log;

use crate::{
    source::SourceAdapter,
    target::RawTarget,
    tooling::{ConverterPort, SparsePort},
};

/// Applies fetched chain members onto the raw target, allocating the
/// target lazily from the first image's metadata. Applies must arrive in
/// chain order; each differencing disk overrides blocks left by its
/// ancestors.
pub struct ConversionEngine {
    converter: Arc<dyn ConverterPort>,
    sparse: Arc<dyn SparsePort>,
}

impl ConversionEngine {
    pub fn new(converter: Arc<dyn ConverterPort>, sparse: Arc<dyn SparsePort>) -> Self {
        Self { converter, sparse }
    }

    pub fn apply(
        &self,
        adapter: &dyn SourceAdapter,
        local: &Path,
        target: &RawTarget,
    ) -> Result<()> {
        if !target.exists() {
            let info = adapter.inspect(local)?;
            target.allocate(&*self.sparse, info.virtual_size)?;
        }

        log::info!("converting {}", local.display());
        let status = self.converter.apply(local, target.path())?;
        let status = status.trim();
        if !status.is_empty() {
            log::info!("{status}");
        }
        log::info!("conversion done");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    use anyhow::bail;
    use tempfile::TempDir;

    use super::*;
    use crate::chain::DiskImage;
    use crate::source::{ImageInfo, SourceKind};

    struct StubAdapter {
        size: u64,
        inspects: Mutex<u32>,
    }

    impl SourceAdapter for StubAdapter {
        fn kind(&self) -> SourceKind {
            SourceKind::HyperV
        }

        fn validate_leaf(&self, _leaf: &str) -> Result<()> {
            Ok(())
        }

        fn parent_of(&self, _image: &DiskImage) -> Result<Option<String>> {
            bail!("not used")
        }

        fn fetch(&self, _image: &DiskImage) -> Result<PathBuf> {
            bail!("not used")
        }

        fn inspect(&self, _local: &Path) -> Result<ImageInfo> {
            *self.inspects.lock().unwrap() += 1;
            Ok(ImageInfo {
                virtual_size: self.size,
                parent: None,
            })
        }
    }

    struct RecordingConverter {
        applies: Mutex<Vec<(PathBuf, PathBuf)>>,
    }

    impl ConverterPort for RecordingConverter {
        fn inspect(&self, _image: &Path) -> Result<HashMap<String, String>> {
            bail!("engine inspects through the adapter")
        }

        fn apply(&self, src: &Path, dst: &Path) -> Result<String> {
            self.applies
                .lock()
                .unwrap()
                .push((src.to_path_buf(), dst.to_path_buf()));
            Ok("Conversion Done!".to_string())
        }
    }

    struct TouchSparse {
        allocs: Mutex<Vec<u64>>,
    }

    impl SparsePort for TouchSparse {
        fn allocate(&self, path: &Path, size_mib: u64) -> Result<()> {
            self.allocs.lock().unwrap().push(size_mib);
            std::fs::write(path, b"").unwrap();
            Ok(())
        }
    }

    #[test]
    fn allocates_once_then_applies_in_order() {
        let tmp = TempDir::new().unwrap();
        let converter = Arc::new(RecordingConverter {
            applies: Mutex::new(Vec::new()),
        });
        let sparse = Arc::new(TouchSparse {
            allocs: Mutex::new(Vec::new()),
        });
        let engine = ConversionEngine::new(converter.clone(), sparse.clone());
        let adapter = StubAdapter {
            size: 3 * 1024 * 1024 + 1,
            inspects: Mutex::new(0),
        };
        let target = RawTarget::new(tmp.path().join("out.raw"));

        let a = tmp.path().join("a.vhd");
        let b = tmp.path().join("b.vhd");
        engine.apply(&adapter, &a, &target).unwrap();
        engine.apply(&adapter, &b, &target).unwrap();

        assert_eq!(*sparse.allocs.lock().unwrap(), vec![4]);
        assert_eq!(*adapter.inspects.lock().unwrap(), 1);
        let applies = sparse_free_applies(&converter);
        assert_eq!(applies, vec![a, b]);
    }

    fn sparse_free_applies(converter: &RecordingConverter) -> Vec<PathBuf> {
        converter
            .applies
            .lock()
            .unwrap()
            .iter()
            .map(|(src, _)| src.clone())
            .collect()
    }

    #[test]
    fn existing_target_is_never_reallocated() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out.raw");
        std::fs::write(&out, b"existing").unwrap();

        let converter = Arc::new(RecordingConverter {
            applies: Mutex::new(Vec::new()),
        });
        let sparse = Arc::new(TouchSparse {
            allocs: Mutex::new(Vec::new()),
        });
        let engine = ConversionEngine::new(converter, sparse.clone());
        let adapter = StubAdapter {
            size: 1,
            inspects: Mutex::new(0),
        };
        let target = RawTarget::new(out);

        engine.apply(&adapter, &tmp.path().join("a.vhd"), &target).unwrap();
        assert!(sparse.allocs.lock().unwrap().is_empty());
        assert_eq!(*adapter.inspects.lock().unwrap(), 0);
    }
}
