//! Storage path resolution across mirrored mount points
//!
//! Availability is probed on every call and never cached: a mount that was
//! down a second ago may be back now.

use crate::constants;
use crate::error::StoreError;
use anyhow::Result;
use std::path::{Path, PathBuf};

/// Ordered list of mount roots; index 0 is the primary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSet {
    paths: Vec<PathBuf>,
}

impl StorageSet {
    pub fn new<I, P>(paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let paths: Vec<PathBuf> = paths.into_iter().map(Into::into).collect();
        if paths.is_empty() {
            return Err(StoreError::InvalidInput("storage set must contain at least one path".to_string()).into());
        }
        Ok(Self { paths })
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn primary(&self) -> &Path {
        &self.paths[0]
    }

    pub fn is_primary(&self, path: &Path) -> bool {
        self.primary() == path
    }

    /// Mounts whose root is readable right now, in list order
    pub fn available_for_read(&self) -> Vec<&Path> {
        self.paths.iter().map(PathBuf::as_path).filter(|p| probe(p)).collect()
    }

    /// Mounts that could accept a write right now, in list order
    pub fn available_for_write(&self) -> Vec<&Path> {
        self.paths.iter().map(PathBuf::as_path).filter(|p| probe_for_write(p)).collect()
    }

    /// Primary if readable, else the first readable mount.
    ///
    /// Falls back to the primary when nothing is reachable; callers then see a
    /// not-found error from whatever they read next.
    pub fn resolve_for_read(&self) -> PathBuf {
        match self.paths.iter().find(|p| probe(p)) {
            Some(path) => {
                if !self.is_primary(path) {
                    log::debug!("[Storage] Primary unavailable, reading from {}", path.display());
                }
                path.clone()
            }
            None => {
                log::warn!("[Storage] No storage path readable, defaulting to primary");
                self.primary().to_path_buf()
            }
        }
    }

    /// Primary if its parent is reachable, else the first writable mount.
    /// Creates the chosen root. Fails fast when nothing is writable.
    pub fn resolve_for_write(&self) -> Result<PathBuf> {
        for path in &self.paths {
            if !probe_for_write(path) {
                log::debug!("[Storage] Skipping unwritable storage path {}", path.display());
                continue;
            }
            match std::fs::create_dir_all(path) {
                Ok(()) => {
                    if !self.is_primary(path) {
                        log::warn!("[Storage] Primary unavailable, writing to {}", path.display());
                    }
                    return Ok(path.clone());
                }
                Err(e) => {
                    log::warn!("[Storage] Failed to create {}: {}", path.display(), e);
                }
            }
        }

        Err(StoreError::NoStorageAvailable {
            paths: self.paths.clone(),
        }
        .into())
    }

    /// First mount (in order) whose manifest for `bundle_id` is readable
    pub fn find_bundle_mount(&self, bundle_id: &str) -> Option<PathBuf> {
        self.paths
            .iter()
            .find(|mount| manifest_readable(mount, bundle_id))
            .cloned()
    }

    /// Every mount whose manifest for `bundle_id` is readable
    pub fn find_bundle_mounts(&self, bundle_id: &str) -> Vec<PathBuf> {
        self.paths
            .iter()
            .filter(|mount| manifest_readable(mount, bundle_id))
            .cloned()
            .collect()
    }
}

/// True if `path` is an accessible directory
pub fn probe(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
}

/// True if `path` is a writable directory, or can be created under a writable parent
pub fn probe_for_write(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_dir() && !meta.permissions().readonly(),
        Err(_) => match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => std::fs::metadata(parent)
                .map(|m| m.is_dir() && !m.permissions().readonly())
                .unwrap_or(false),
            _ => false,
        },
    }
}

fn manifest_readable(mount: &Path, bundle_id: &str) -> bool {
    let manifest = constants::manifest_path(constants::bundle_dir(mount, bundle_id));
    std::fs::File::open(manifest).is_ok()
}
