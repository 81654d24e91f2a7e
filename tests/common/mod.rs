#![allow(dead_code)]

use anyhow::Result;
use bundlestore::{
    constants, BundleContext, BundleStore, IngestStep, ManifestStep, Pipeline, StoreOptionsBuilder,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub fn setup_temp_dir() -> Result<TempDir> {
    tempfile::tempdir().map_err(anyhow::Error::from)
}

/// `n` mount roots under `tmp`; none of them exist yet
pub fn mount_paths(tmp: &TempDir, n: usize) -> Vec<PathBuf> {
    (0..n).map(|i| tmp.path().join(format!("mount{}", i))).collect()
}

/// A mount whose parent directory is missing, so it probes as unreachable
/// until [`bring_online`] is called
pub fn offline_mount(tmp: &TempDir, name: &str) -> PathBuf {
    tmp.path().join("detached").join(name)
}

pub fn bring_online(mount: &Path) -> Result<()> {
    if let Some(parent) = mount.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub fn open_store(mounts: &[PathBuf], pipeline: Pipeline) -> Result<BundleStore> {
    let options = StoreOptionsBuilder::new().storage_dirs(mounts.iter().cloned()).build()?;
    BundleStore::new(options, pipeline)
}

pub fn open_store_with_timeout(mounts: &[PathBuf], pipeline: Pipeline, timeout: Duration) -> Result<BundleStore> {
    let options = StoreOptionsBuilder::new()
        .storage_dirs(mounts.iter().cloned())
        .lease_timeout(timeout)
        .build()?;
    BundleStore::new(options, pipeline)
}

/// Writes every component the validator expects, the way a real crawler and
/// indexer would, then counts how often it ran
#[derive(Clone, Default)]
pub struct FakeIngest {
    pub delay: Duration,
    pub runs: Arc<AtomicUsize>,
    pub fail_on_update: bool,
}

impl FakeIngest {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl IngestStep for FakeIngest {
    fn name(&self) -> &str {
        "fake-ingest"
    }

    fn run(&self, ctx: &BundleContext) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.fail_on_update && ctx.is_update() {
            anyhow::bail!("upstream repository vanished");
        }

        for label in ctx.input.repo_labels() {
            let dir = ctx.root.join(constants::REPOS_DIR).join(label.replace([':', '/', '@'], "_"));
            std::fs::create_dir_all(&dir)?;
            std::fs::write(dir.join("README.md"), format!("# {}\n", label))?;
        }
        std::fs::create_dir_all(ctx.root.join("indexes"))?;
        std::fs::write(ctx.root.join(constants::SEARCH_INDEX_FILE), b"SQLite format 3\0")?;
        for doc in constants::REQUIRED_DOCS {
            std::fs::write(
                ctx.root.join(doc),
                format!("# {}\n\nBuilt {} for {}\n", doc, ctx.updated_at, ctx.bundle_id),
            )?;
        }
        Ok(())
    }
}

pub fn complete_pipeline(ingest: FakeIngest) -> Pipeline {
    Pipeline::new().step(ingest).step(ManifestStep)
}

pub fn read_manifest_bytes(mount: &Path, bundle_id: &str) -> Result<Vec<u8>> {
    Ok(std::fs::read(constants::manifest_path(constants::bundle_dir(mount, bundle_id)))?)
}

/// Entries left in a mount's staging area
pub fn staging_entries(mount: &Path) -> usize {
    std::fs::read_dir(constants::staging_root(mount))
        .map(|d| d.count())
        .unwrap_or(0)
}
