//! Bundle completeness checks: required documents, manifest sanity, search index, and non-empty repo content
use crate::constants;
use crate::manifest::BundleManifest;
use std::path::Path;
use walkdir::WalkDir;

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub valid: bool,
    /// One entry per missing or broken component
    pub missing: Vec<String>,
}

/// Check that a built bundle tree is complete.
///
/// `expected_id`, when given, must match the manifest's `bundleId`.
pub fn validate_bundle(root: &Path, expected_id: Option<&str>) -> ValidationReport {
    let mut missing = Vec::new();

    if !root.is_dir() {
        missing.push(format!("bundle directory {}", root.display()));
        return ValidationReport { valid: false, missing };
    }

    check_manifest(root, expected_id, &mut missing);

    for doc in constants::REQUIRED_DOCS {
        if file_len(&root.join(doc)).unwrap_or(0) == 0 {
            missing.push(doc.to_string());
        }
    }

    if file_len(&root.join(constants::SEARCH_INDEX_FILE)).unwrap_or(0) == 0 {
        missing.push(format!("search index ({})", constants::SEARCH_INDEX_FILE));
    }

    check_repos(&root.join(constants::REPOS_DIR), &mut missing);

    ValidationReport {
        valid: missing.is_empty(),
        missing,
    }
}

fn check_manifest(root: &Path, expected_id: Option<&str>, missing: &mut Vec<String>) {
    let path = constants::manifest_path(root);
    match file_len(&path) {
        None | Some(0) => {
            missing.push(constants::MANIFEST_FILE.to_string());
            return;
        }
        Some(len) if len <= constants::MIN_MANIFEST_BYTES => {
            missing.push(format!(
                "{} (truncated: {} bytes)",
                constants::MANIFEST_FILE,
                len
            ));
            return;
        }
        Some(_) => {}
    }

    match BundleManifest::load(root) {
        Ok(manifest) => {
            if let Some(expected) = expected_id {
                if manifest.bundle_id != expected {
                    missing.push(format!(
                        "{} (bundleId mismatch: expected {}, got {})",
                        constants::MANIFEST_FILE,
                        expected,
                        manifest.bundle_id
                    ));
                }
            }
        }
        Err(e) => missing.push(format!("{} (unreadable: {:#})", constants::MANIFEST_FILE, e)),
    }
}

/// `repos/` must exist, be non-empty, and hold at least one non-empty file
fn check_repos(repos: &Path, missing: &mut Vec<String>) {
    let has_entries = std::fs::read_dir(repos)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false);
    if !has_entries {
        missing.push(format!("{}/ (empty or missing)", constants::REPOS_DIR));
        return;
    }

    let has_content = WalkDir::new(repos)
        .into_iter()
        .filter_map(|e| e.ok())
        .any(|e| e.file_type().is_file() && e.metadata().map(|m| m.len() > 0).unwrap_or(false));
    if !has_content {
        missing.push(format!("{}/ (no ingested file content)", constants::REPOS_DIR));
    }
}

fn file_len(path: &Path) -> Option<u64> {
    std::fs::metadata(path)
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len())
}
