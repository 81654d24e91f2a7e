//! Global constants and helpers for bundle filenames, mount layout, validation thresholds, and timing defaults
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Binary name used in logs and manifests
pub const BINARY_NAME: &str = "bundlestore";

/// Package version from Cargo.toml (set at compile time)
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the created_by string written into manifests
pub fn created_by() -> String {
    format!("{}/{}", BINARY_NAME, VERSION)
}

// ============================================================================
// Mount Layout
// ============================================================================

/// Dedup index file name (hidden file at each mount root)
pub const DEDUP_INDEX_FILE: &str = ".bundle-dedup.json";

/// Staging directory (hidden, at each mount root) used for build-then-rename
pub const STAGING_DIR: &str = ".staging";

/// Current dedup index schema version
pub const DEDUP_SCHEMA_VERSION: u32 = 1;

/// Current manifest schema version
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// Resolves the bundle directory for an id under a mount root
pub fn bundle_dir(mount: impl AsRef<Path>, bundle_id: &str) -> PathBuf {
    mount.as_ref().join(bundle_id)
}

/// Resolves the dedup index path for a mount root
pub fn dedup_index_path(mount: impl AsRef<Path>) -> PathBuf {
    mount.as_ref().join(DEDUP_INDEX_FILE)
}

/// Resolves the staging area for a mount root
pub fn staging_root(mount: impl AsRef<Path>) -> PathBuf {
    mount.as_ref().join(STAGING_DIR)
}

/// Resolves the manifest path inside a bundle directory
pub fn manifest_path(bundle_root: impl AsRef<Path>) -> PathBuf {
    bundle_root.as_ref().join(MANIFEST_FILE)
}

/// Dedup index key an update lease is held under. Kept apart from the
/// fingerprint keys so the bundle's `complete` entry stays visible.
pub fn update_lease_key(bundle_id: &str) -> String {
    format!("update:{}", bundle_id)
}

/// Entries at a mount root that are never bundles
pub fn is_reserved_entry(name: &str) -> bool {
    name.starts_with('.')
}

// ============================================================================
// Bundle Contents
// ============================================================================

pub const MANIFEST_FILE: &str = "manifest.json";
pub const START_HERE_FILE: &str = "START_HERE.md";
pub const AGENTS_FILE: &str = "AGENTS.md";
pub const OVERVIEW_FILE: &str = "OVERVIEW.md";

/// Full-text search index produced by the indexing step
pub const SEARCH_INDEX_FILE: &str = "indexes/search.sqlite3";

/// Subtree holding ingested repository content
pub const REPOS_DIR: &str = "repos";

/// Markdown files every complete bundle carries
pub const REQUIRED_DOCS: [&str; 3] = [START_HERE_FILE, AGENTS_FILE, OVERVIEW_FILE];

/// A manifest at or below this size is treated as truncated
pub const MIN_MANIFEST_BYTES: u64 = 50;

// ============================================================================
// Timing Defaults
// ============================================================================

/// Default in-progress lease timeout (30 minutes)
pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default interval for the optional reconciliation loop (10 minutes)
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(10 * 60);

// ============================================================================
// Environment
// ============================================================================

/// Platform path list of mount roots, primary first
pub const ENV_STORAGE_DIRS: &str = "BUNDLESTORE_STORAGE_DIRS";

/// Lease timeout override in milliseconds
pub const ENV_LEASE_TIMEOUT_MS: &str = "BUNDLESTORE_LEASE_TIMEOUT_MS";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_helpers() {
        let mount = Path::new("/mnt/a");
        assert_eq!(bundle_dir(mount, "abc"), PathBuf::from("/mnt/a/abc"));
        assert_eq!(
            dedup_index_path(mount),
            PathBuf::from("/mnt/a/.bundle-dedup.json")
        );
        assert_eq!(staging_root(mount), PathBuf::from("/mnt/a/.staging"));
        assert_eq!(
            manifest_path(bundle_dir(mount, "abc")),
            PathBuf::from("/mnt/a/abc/manifest.json")
        );
    }

    #[test]
    fn test_reserved_entries() {
        assert!(is_reserved_entry(DEDUP_INDEX_FILE));
        assert!(is_reserved_entry(STAGING_DIR));
        assert!(!is_reserved_entry("0b9c6f1e-3f0c-4b7e-9d0a-1a2b3c4d5e6f"));
    }
}
