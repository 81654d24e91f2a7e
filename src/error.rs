//! Typed failure conditions callers branch on
//!
//! These travel inside `anyhow::Error`; use [`StoreError::from_anyhow`] or
//! `err.downcast_ref::<StoreError>()` to recover them.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Every configured mount is unreachable for writing
    #[error("no storage available: none of {} configured storage path(s) is writable", .paths.len())]
    NoStorageAvailable { paths: Vec<PathBuf> },

    /// The completeness validator rejected a freshly built tree
    #[error("bundle {bundle_id} is incomplete: missing {}", .missing.join(", "))]
    IncompleteBundle {
        bundle_id: String,
        missing: Vec<String>,
    },

    /// Creation aborted; nothing is left behind on any mount
    #[error("failed to create bundle {bundle_id}: {reason}")]
    CreationFailed { bundle_id: String, reason: String },

    /// Update aborted; the previous bundle is left as it was
    #[error("failed to update bundle {bundle_id}: {reason}")]
    UpdateFailed { bundle_id: String, reason: String },

    #[error("bundle {0} not found on any storage path")]
    BundleNotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl StoreError {
    /// Finds a `StoreError` anywhere in an anyhow chain
    pub fn from_anyhow(err: &anyhow::Error) -> Option<&StoreError> {
        err.chain().find_map(|e| e.downcast_ref::<StoreError>())
    }
}

/// Check if an error indicates the bundle does not exist
pub fn is_not_found_error(err: &anyhow::Error) -> bool {
    matches!(StoreError::from_anyhow(err), Some(StoreError::BundleNotFound(_)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_message_names_components() {
        let err = StoreError::IncompleteBundle {
            bundle_id: "b1".to_string(),
            missing: vec!["AGENTS.md".to_string(), "repos/".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "bundle b1 is incomplete: missing AGENTS.md, repos/"
        );
    }

    #[test]
    fn test_downcast_through_context() {
        let err = anyhow::Error::new(StoreError::BundleNotFound("b2".to_string()))
            .context("opening bundle");
        assert!(is_not_found_error(&err));

        let other = anyhow::anyhow!("disk on fire");
        assert!(!is_not_found_error(&other));
    }
}
