//! Per-mount dedup index: fingerprint -> bundle / lease state
//!
//! The index is an accelerator. Reads never fail (missing, corrupt or
//! foreign-schema files come back as an empty index) and writes go through a
//! temp file in the same directory followed by a rename, so a reader never
//! sees a half-written file.

use crate::constants;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupStatus {
    Complete,
    InProgress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupEntry {
    pub bundle_id: String,
    #[serde(default)]
    pub bundle_updated_at: String,
    /// Absent in older files; treated as complete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DedupStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repos: Option<Vec<String>>,
}

impl DedupEntry {
    pub fn complete(bundle_id: impl Into<String>, bundle_updated_at: impl Into<String>) -> Self {
        Self {
            bundle_id: bundle_id.into(),
            bundle_updated_at: bundle_updated_at.into(),
            status: Some(DedupStatus::Complete),
            started_at: None,
            task_id: None,
            repos: None,
        }
    }

    pub fn in_progress(
        bundle_id: impl Into<String>,
        task_id: impl Into<String>,
        started_at: impl Into<String>,
        repos: Vec<String>,
    ) -> Self {
        Self {
            bundle_id: bundle_id.into(),
            bundle_updated_at: String::new(),
            status: Some(DedupStatus::InProgress),
            started_at: Some(started_at.into()),
            task_id: Some(task_id.into()),
            repos: Some(repos),
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.status == Some(DedupStatus::InProgress)
    }

    pub fn is_complete(&self) -> bool {
        !self.is_in_progress()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupIndex {
    pub schema_version: u32,
    pub updated_at: String,
    #[serde(default)]
    pub by_fingerprint: BTreeMap<String, DedupEntry>,
}

impl Default for DedupIndex {
    fn default() -> Self {
        Self {
            schema_version: constants::DEDUP_SCHEMA_VERSION,
            updated_at: crate::manifest::now_iso(),
            by_fingerprint: BTreeMap::new(),
        }
    }
}

impl DedupIndex {
    /// Read a mount's index; any problem yields an empty index
    pub fn read<P: AsRef<Path>>(mount: P) -> Self {
        let path = constants::dedup_index_path(mount);

        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("[Dedup] Cannot read {}: {}", path.display(), e);
                }
                return Self::default();
            }
        };

        match serde_json::from_slice::<DedupIndex>(&data) {
            Ok(index) if index.schema_version == constants::DEDUP_SCHEMA_VERSION => index,
            Ok(index) => {
                log::warn!(
                    "[Dedup] Discarding {} with schema version {}",
                    path.display(),
                    index.schema_version
                );
                Self::default()
            }
            Err(e) => {
                log::warn!("[Dedup] Discarding corrupt {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save index to disk atomically (temp file in the same directory, then rename)
    pub fn write<P: AsRef<Path>>(&self, mount: P) -> Result<()> {
        let mount = mount.as_ref();
        let index_path = constants::dedup_index_path(mount);

        let json = serde_json::to_vec_pretty(self).context("Failed to serialize dedup index")?;

        // Dropping the temp file on any error below removes it
        let mut temp = tempfile::Builder::new()
            .prefix(constants::DEDUP_INDEX_FILE)
            .suffix(".tmp")
            .tempfile_in(mount)
            .with_context(|| format!("Failed to create temp index in {}", mount.display()))?;

        temp.write_all(&json)
            .with_context(|| format!("Failed to write temp index in {}", mount.display()))?;
        temp.as_file()
            .sync_all()
            .with_context(|| format!("Failed to sync temp index in {}", mount.display()))?;

        temp.persist(&index_path)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to rename index: {}", index_path.display()))?;

        Ok(())
    }

    pub fn get(&self, fingerprint: &str) -> Option<&DedupEntry> {
        self.by_fingerprint.get(fingerprint)
    }

    pub fn insert(&mut self, fingerprint: impl Into<String>, entry: DedupEntry) {
        self.by_fingerprint.insert(fingerprint.into(), entry);
        self.touch();
    }

    pub fn remove(&mut self, fingerprint: &str) -> Option<DedupEntry> {
        let removed = self.by_fingerprint.remove(fingerprint);
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    /// Drop every entry that points at `bundle_id`; returns how many were removed
    pub fn remove_bundle(&mut self, bundle_id: &str) -> usize {
        let before = self.by_fingerprint.len();
        self.by_fingerprint.retain(|_, e| e.bundle_id != bundle_id);
        let removed = before - self.by_fingerprint.len();
        if removed > 0 {
            self.touch();
        }
        removed
    }

    fn touch(&mut self) {
        self.updated_at = crate::manifest::now_iso();
    }
}

/// Read-modify-write one mount's index
pub fn update_index<P, F>(mount: P, f: F) -> Result<()>
where
    P: AsRef<Path>,
    F: FnOnce(&mut DedupIndex),
{
    let mount = mount.as_ref();
    let mut index = DedupIndex::read(mount);
    f(&mut index);
    index.write(mount)
}

/// Record a committed bundle in the index of every writable mount (best-effort)
pub fn record_complete(
    mounts: &[&Path],
    fingerprint: &str,
    bundle_id: &str,
    bundle_updated_at: &str,
) -> Vec<(std::path::PathBuf, String)> {
    record_complete_unless(mounts, fingerprint, bundle_id, bundle_updated_at, |_| false)
}

/// Like [`record_complete`], but leaves a mount alone when its current entry
/// for `fingerprint` satisfies `keep`
pub fn record_complete_unless<F>(
    mounts: &[&Path],
    fingerprint: &str,
    bundle_id: &str,
    bundle_updated_at: &str,
    keep: F,
) -> Vec<(std::path::PathBuf, String)>
where
    F: Fn(&DedupEntry) -> bool,
{
    let mut failures = Vec::new();
    for mount in mounts {
        let mut index = DedupIndex::read(mount);
        if index.get(fingerprint).is_some_and(&keep) {
            log::debug!("[Dedup] Keeping live entry for {} on {}", bundle_id, mount.display());
            continue;
        }
        // Older entries for this bundle under another fingerprint are now
        // stale; leases (including update leases) are left to their owners
        index
            .by_fingerprint
            .retain(|fp, e| fp == fingerprint || e.bundle_id != bundle_id || e.is_in_progress());
        index.insert(fingerprint, DedupEntry::complete(bundle_id, bundle_updated_at));
        if let Err(e) = index.write(mount) {
            log::warn!("[Dedup] Failed to record {} in {}: {:#}", bundle_id, mount.display(), e);
            failures.push((mount.to_path_buf(), format!("{:#}", e)));
        }
    }
    failures
}
