//! Mirror replication and staleness repair across mount points
//!
//! Both operations are best-effort: a mount that cannot be reached or written
//! ends up in the report's failure list and never fails the caller.
//! Copies land in the target's staging area first and are then renamed into
//! place, so a reader of the target mount sees either the old tree or the new
//! one.

use crate::constants;
use crate::dedup::{self, DedupEntry};
use crate::manifest::{self, BundleManifest};
use crate::storage;
use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A per-mount failure that was absorbed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountFailure {
    pub mount: PathBuf,
    pub reason: String,
}

impl MountFailure {
    pub fn new(mount: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            mount: mount.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for MountFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.mount.display(), self.reason)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MirrorReport {
    pub mirrored: Vec<PathBuf>,
    pub failures: Vec<MountFailure>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub source: PathBuf,
    pub synced: Vec<PathBuf>,
    pub up_to_date: Vec<PathBuf>,
    pub failures: Vec<MountFailure>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.synced.is_empty() && self.failures.is_empty()
    }
}

/// Copy a committed bundle from `source_mount` to every other mount
pub fn mirror_bundle(source_mount: &Path, all_mounts: &[PathBuf], bundle_id: &str) -> MirrorReport {
    let source = constants::bundle_dir(source_mount, bundle_id);

    let results: Vec<(PathBuf, Result<()>)> = all_mounts
        .par_iter()
        .filter(|mount| mount.as_path() != source_mount)
        .map(|mount| {
            let result = if storage::probe_for_write(mount) {
                place_copy(&source, mount, bundle_id)
            } else {
                Err(anyhow::anyhow!("storage path unreachable"))
            };
            (mount.clone(), result)
        })
        .collect();

    let mut report = MirrorReport::default();
    for (mount, result) in results {
        match result {
            Ok(()) => {
                log::debug!("[Mirror] {} -> {}", bundle_id, mount.display());
                report.mirrored.push(mount);
            }
            Err(e) => {
                log::warn!("[Mirror] Failed to mirror {} to {}: {:#}", bundle_id, mount.display(), e);
                report.failures.push(MountFailure::new(mount, format!("{:#}", e)));
            }
        }
    }
    report
}

/// Overwrite every mount whose copy of `bundle_id` is older than (or missing
/// compared to) the copy on `source_mount`
pub fn sync_stale(source_mount: &Path, all_mounts: &[PathBuf], bundle_id: &str) -> SyncReport {
    let mut report = SyncReport {
        source: source_mount.to_path_buf(),
        ..Default::default()
    };

    let Some(source_manifest) = BundleManifest::load_from_mount(source_mount, bundle_id) else {
        report
            .failures
            .push(MountFailure::new(source_mount, "source manifest unreadable"));
        return report;
    };
    let source = constants::bundle_dir(source_mount, bundle_id);
    let fingerprint = source_manifest.computed_fingerprint();

    enum Outcome {
        Synced,
        UpToDate,
        Failed(String),
    }

    let results: Vec<(PathBuf, Outcome)> = all_mounts
        .par_iter()
        .filter(|mount| mount.as_path() != source_mount)
        .map(|mount| {
            if !storage::probe_for_write(mount) {
                return (mount.clone(), Outcome::Failed("storage path unreachable".to_string()));
            }

            let stale = match BundleManifest::load_from_mount(mount, bundle_id) {
                Some(target) => manifest::is_newer(&source_manifest.updated_at, &target.updated_at),
                None => true,
            };
            if !stale {
                return (mount.clone(), Outcome::UpToDate);
            }

            let outcome = match place_copy(&source, mount, bundle_id) {
                Ok(()) => {
                    // A lease on the fingerprint belongs to its owner
                    for (m, reason) in dedup::record_complete_unless(
                        &[mount.as_path()],
                        &fingerprint,
                        bundle_id,
                        &source_manifest.updated_at,
                        DedupEntry::is_in_progress,
                    ) {
                        log::debug!("[Sync] Index not re-seeded on {}: {}", m.display(), reason);
                    }
                    Outcome::Synced
                }
                Err(e) => Outcome::Failed(format!("{:#}", e)),
            };
            (mount.clone(), outcome)
        })
        .collect();

    for (mount, outcome) in results {
        match outcome {
            Outcome::Synced => {
                log::info!(
                    "[Sync] Repaired stale copy of {} on {} (from {})",
                    bundle_id,
                    mount.display(),
                    source_mount.display()
                );
                report.synced.push(mount);
            }
            Outcome::UpToDate => report.up_to_date.push(mount),
            Outcome::Failed(reason) => {
                log::warn!("[Sync] Cannot sync {} to {}: {}", bundle_id, mount.display(), reason);
                report.failures.push(MountFailure::new(mount, reason));
            }
        }
    }
    report
}

/// Copy `source` into `mount`'s staging area, then swap it into place
fn place_copy(source: &Path, mount: &Path, bundle_id: &str) -> Result<()> {
    std::fs::create_dir_all(mount)
        .with_context(|| format!("Failed to create storage path: {}", mount.display()))?;

    let temp = staging_path(mount, bundle_id, "copy");
    if let Err(e) = copy_dir_recursive(source, &temp) {
        remove_tree_quietly(&temp);
        return Err(e);
    }

    replace_tree(&temp, &constants::bundle_dir(mount, bundle_id))
}

/// Unique path in `mount`'s staging area
pub fn staging_path(mount: &Path, bundle_id: &str, tag: &str) -> PathBuf {
    constants::staging_root(mount).join(format!(
        "{}.{}-{}",
        bundle_id,
        tag,
        uuid::Uuid::new_v4().simple()
    ))
}

/// Move `new_tree` to `target`, replacing whatever is there.
///
/// Both paths must be on the same filesystem. The previous tree is moved
/// aside first and restored if the second rename fails.
pub fn replace_tree(new_tree: &Path, target: &Path) -> Result<()> {
    if !target.exists() {
        return std::fs::rename(new_tree, target).with_context(|| {
            format!("Failed to move {} into place at {}", new_tree.display(), target.display())
        });
    }

    let parent = target
        .parent()
        .ok_or_else(|| anyhow::anyhow!("target has no parent: {}", target.display()))?;
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let aside = staging_path(parent, &name, "old");
    if let Some(staging) = aside.parent() {
        std::fs::create_dir_all(staging)
            .with_context(|| format!("Failed to create staging area: {}", staging.display()))?;
    }

    std::fs::rename(target, &aside)
        .with_context(|| format!("Failed to move aside {}", target.display()))?;

    if let Err(e) = std::fs::rename(new_tree, target) {
        if let Err(restore) = std::fs::rename(&aside, target) {
            log::error!(
                "[Mirror] Failed to restore {} from {}: {}",
                target.display(),
                aside.display(),
                restore
            );
        }
        return Err(e).with_context(|| format!("Failed to move new tree into {}", target.display()));
    }

    remove_tree_quietly(&aside);
    Ok(())
}

/// Recursively copy `src` into `dst` (created if needed); returns files copied
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<u64> {
    std::fs::create_dir_all(dst).with_context(|| format!("Failed to create {}", dst.display()))?;

    let mut files = 0u64;
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.with_context(|| format!("Failed to walk {}", src.display()))?;
        let rel = entry.path().strip_prefix(src)?;
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target).with_context(|| {
                format!("Failed to copy {} to {}", entry.path().display(), target.display())
            })?;
            files += 1;
        }
    }
    Ok(files)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let link = std::fs::read_link(src).with_context(|| format!("Failed to read link {}", src.display()))?;
    std::os::unix::fs::symlink(&link, dst)
        .with_context(|| format!("Failed to create link {}", dst.display()))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, _dst: &Path) -> Result<()> {
    log::debug!("[Mirror] Skipping symlink {}", src.display());
    Ok(())
}

/// Remove a directory tree, logging instead of failing
pub fn remove_tree_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_dir_all(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("[Mirror] Failed to remove {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{CreationInput, RepoSpec};
    use tempfile::TempDir;

    fn write_bundle(mount: &Path, bundle_id: &str, updated_at: &str, body: &str) {
        let root = constants::bundle_dir(mount, bundle_id);
        std::fs::create_dir_all(root.join("repos/a")).unwrap();
        std::fs::write(root.join("repos/a/file.txt"), body).unwrap();
        let input = CreationInput::new(vec![RepoSpec::github("a/b")]);
        BundleManifest::new(bundle_id, input, "2024-01-01T00:00:00.000Z", updated_at)
            .save(&root)
            .unwrap();
    }

    fn mounts(tmp: &TempDir, names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|n| tmp.path().join(n)).collect()
    }

    #[test]
    fn test_copy_dir_recursive() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir_all(src.join("a/b")).unwrap();
        std::fs::write(src.join("a/b/c.txt"), "c").unwrap();
        std::fs::write(src.join("top.txt"), "t").unwrap();

        let copied = copy_dir_recursive(&src, &tmp.path().join("dst")).unwrap();
        assert_eq!(copied, 2);
        assert_eq!(std::fs::read_to_string(tmp.path().join("dst/a/b/c.txt")).unwrap(), "c");
    }

    #[test]
    fn test_mirror_to_all_reachable() {
        let tmp = TempDir::new().unwrap();
        let all = mounts(&tmp, &["m0", "m1", "m2"]);
        write_bundle(&all[0], "b1", "2024-01-01T00:00:00.000Z", "x");

        let report = mirror_bundle(&all[0], &all, "b1");
        assert!(report.failures.is_empty(), "{:?}", report.failures);
        assert_eq!(report.mirrored, vec![all[1].clone(), all[2].clone()]);

        let original = std::fs::read(constants::manifest_path(constants::bundle_dir(&all[0], "b1"))).unwrap();
        for m in &all[1..] {
            let copy = std::fs::read(constants::manifest_path(constants::bundle_dir(m, "b1"))).unwrap();
            assert_eq!(copy, original);
        }
    }

    #[test]
    fn test_mirror_reports_unreachable_without_failing() {
        let tmp = TempDir::new().unwrap();
        let mut all = mounts(&tmp, &["m0"]);
        all.push(tmp.path().join("offline/m1"));
        write_bundle(&all[0], "b1", "2024-01-01T00:00:00.000Z", "x");

        let report = mirror_bundle(&all[0], &all, "b1");
        assert!(report.mirrored.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].mount, all[1]);
    }

    #[test]
    fn test_mirror_replaces_existing_copy() {
        let tmp = TempDir::new().unwrap();
        let all = mounts(&tmp, &["m0", "m1"]);
        write_bundle(&all[1], "b1", "2024-01-01T00:00:00.000Z", "old");
        std::fs::write(constants::bundle_dir(&all[1], "b1").join("leftover.txt"), "x").unwrap();
        write_bundle(&all[0], "b1", "2024-02-01T00:00:00.000Z", "new");

        mirror_bundle(&all[0], &all, "b1");
        let target = constants::bundle_dir(&all[1], "b1");
        assert_eq!(std::fs::read_to_string(target.join("repos/a/file.txt")).unwrap(), "new");
        assert!(!target.join("leftover.txt").exists());

        // Staging area is left empty
        let staged: Vec<_> = std::fs::read_dir(constants::staging_root(&all[1]))
            .unwrap()
            .collect();
        assert!(staged.is_empty());
    }

    #[test]
    fn test_sync_stale_repairs_older_and_missing() {
        let tmp = TempDir::new().unwrap();
        let all = mounts(&tmp, &["m0", "m1", "m2", "m3"]);
        write_bundle(&all[0], "b1", "2024-03-01T00:00:00.000Z", "newest");
        write_bundle(&all[1], "b1", "2024-01-01T00:00:00.000Z", "old");
        std::fs::create_dir_all(&all[2]).unwrap();
        write_bundle(&all[3], "b1", "2024-03-01T00:00:00.000Z", "same");

        let report = sync_stale(&all[0], &all, "b1");
        assert_eq!(report.synced, vec![all[1].clone(), all[2].clone()]);
        assert_eq!(report.up_to_date, vec![all[3].clone()]);
        assert!(report.failures.is_empty());

        for m in &all[1..3] {
            let manifest = BundleManifest::load_from_mount(m, "b1").unwrap();
            assert_eq!(manifest.updated_at, "2024-03-01T00:00:00.000Z");
            let index = dedup::DedupIndex::read(m);
            assert_eq!(index.get(&manifest.computed_fingerprint()).unwrap().bundle_id, "b1");
        }
    }

    #[test]
    fn test_sync_never_downgrades_newer_copy() {
        let tmp = TempDir::new().unwrap();
        let all = mounts(&tmp, &["m0", "m1"]);
        write_bundle(&all[0], "b1", "2024-01-01T00:00:00.000Z", "old");
        write_bundle(&all[1], "b1", "2024-05-01T00:00:00.000Z", "new");

        let report = sync_stale(&all[0], &all, "b1");
        assert!(report.is_clean());
        let body = std::fs::read_to_string(constants::bundle_dir(&all[1], "b1").join("repos/a/file.txt")).unwrap();
        assert_eq!(body, "new");
    }

    #[test]
    fn test_sync_without_source_manifest() {
        let tmp = TempDir::new().unwrap();
        let all = mounts(&tmp, &["m0", "m1"]);
        std::fs::create_dir_all(&all[0]).unwrap();

        let report = sync_stale(&all[0], &all, "missing");
        assert_eq!(report.failures.len(), 1);
        assert!(report.synced.is_empty());
    }
}
