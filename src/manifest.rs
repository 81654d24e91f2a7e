//! Bundle manifest (`manifest.json`) and timestamp helpers
use crate::constants;
use crate::fingerprint::{self, CreationInput};
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// The parts of a manifest this crate reads and writes.
///
/// Fields written by other producers are kept in `extra` and survive a
/// read-modify-write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleManifest {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub bundle_id: String,
    #[serde(default)]
    pub created_at: String,
    pub updated_at: String,
    pub inputs: CreationInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_schema_version() -> u32 {
    constants::MANIFEST_SCHEMA_VERSION
}

impl BundleManifest {
    pub fn new(bundle_id: impl Into<String>, inputs: CreationInput, created_at: &str, updated_at: &str) -> Self {
        let fingerprint = fingerprint::fingerprint(&inputs);
        Self {
            schema_version: constants::MANIFEST_SCHEMA_VERSION,
            bundle_id: bundle_id.into(),
            created_at: created_at.to_string(),
            updated_at: updated_at.to_string(),
            inputs,
            fingerprint: Some(fingerprint),
            created_by: Some(constants::created_by()),
            extra: serde_json::Map::new(),
        }
    }

    /// Load `manifest.json` from a bundle directory
    pub fn load<P: AsRef<Path>>(bundle_root: P) -> Result<Self> {
        let path = constants::manifest_path(bundle_root);
        let data = std::fs::read(&path).with_context(|| format!("Failed to read manifest: {}", path.display()))?;
        serde_json::from_slice(&data).with_context(|| format!("Failed to parse manifest: {}", path.display()))
    }

    /// Load the manifest of `bundle_id` on `mount`, if readable
    pub fn load_from_mount(mount: &Path, bundle_id: &str) -> Option<Self> {
        Self::load(constants::bundle_dir(mount, bundle_id)).ok()
    }

    /// Save manifest atomically
    pub fn save<P: AsRef<Path>>(&self, bundle_root: P) -> Result<()> {
        let bundle_root = bundle_root.as_ref();
        let path = constants::manifest_path(bundle_root);
        let json = serde_json::to_vec_pretty(self).context("Failed to serialize manifest")?;

        let mut temp = tempfile::Builder::new()
            .prefix(constants::MANIFEST_FILE)
            .suffix(".tmp")
            .tempfile_in(bundle_root)
            .with_context(|| format!("Failed to create temp manifest in {}", bundle_root.display()))?;
        temp.write_all(&json)
            .with_context(|| format!("Failed to write temp manifest in {}", bundle_root.display()))?;
        temp.persist(&path)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to rename manifest: {}", path.display()))?;
        Ok(())
    }

    /// Fingerprint recomputed from the recorded inputs
    pub fn computed_fingerprint(&self) -> String {
        fingerprint::fingerprint(&self.inputs)
    }
}

/// Current time as ISO-8601 with millisecond precision
pub fn now_iso() -> String {
    to_iso(Utc::now())
}

pub fn to_iso(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// True if `candidate` is strictly newer than `current`.
///
/// Unparseable timestamps lose to parseable ones; two unparseable values fall
/// back to string order.
pub fn is_newer(candidate: &str, current: &str) -> bool {
    match (parse_time(candidate), parse_time(current)) {
        (Some(a), Some(b)) => a > b,
        (Some(_), None) => true,
        (None, Some(_)) => false,
        (None, None) => candidate > current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::RepoSpec;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() {
        let tmp = TempDir::new().unwrap();
        let input = CreationInput::new(vec![RepoSpec::github("Owner/Repo")]);
        let manifest = BundleManifest::new("b1", input.clone(), "2024-01-01T00:00:00.000Z", "2024-01-02T00:00:00.000Z");
        manifest.save(tmp.path()).unwrap();

        let loaded = BundleManifest::load(tmp.path()).unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.computed_fingerprint(), fingerprint::fingerprint(&input));
        assert_eq!(loaded.fingerprint.as_deref(), Some(loaded.computed_fingerprint().as_str()));
    }

    #[test]
    fn test_minimal_foreign_manifest() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            constants::manifest_path(tmp.path()),
            r#"{"bundleId":"b2","updatedAt":"2024-03-01T10:00:00Z","inputs":{"repos":[{"kind":"github","repo":"a/b"}]},"displayName":"A B"}"#,
        )
        .unwrap();

        let loaded = BundleManifest::load(tmp.path()).unwrap();
        assert_eq!(loaded.bundle_id, "b2");
        assert!(loaded.fingerprint.is_none());
        assert_eq!(loaded.extra["displayName"], "A B");

        loaded.save(tmp.path()).unwrap();
        let raw = std::fs::read_to_string(constants::manifest_path(tmp.path())).unwrap();
        assert!(raw.contains("displayName"));
    }

    #[test]
    fn test_is_newer() {
        assert!(is_newer("2024-01-02T00:00:00.000Z", "2024-01-01T23:59:59.999Z"));
        assert!(!is_newer("2024-01-01T00:00:00Z", "2024-01-01T00:00:00.000Z"));
        assert!(is_newer("2024-01-01T00:00:00Z", "garbage"));
        assert!(!is_newer("garbage", "2024-01-01T00:00:00Z"));
        // Offsets are compared as instants
        assert!(is_newer("2024-01-01T02:00:01+02:00", "2024-01-01T00:00:00Z"));
    }
}
