use crate::constants;
use crate::error::StoreError;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for a [`crate::BundleStore`]
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Mount point roots, primary first
    pub storage_dirs: Vec<PathBuf>,
    /// How long an in-progress lease is honoured before it counts as abandoned
    pub lease_timeout: Duration,
    /// Repair lagging mounts whenever a bundle is opened
    pub sync_on_read: bool,
    /// Minimum age of a staging leftover before `clean_staging` removes it
    pub staging_grace: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            storage_dirs: Vec::new(),
            lease_timeout: constants::DEFAULT_LEASE_TIMEOUT,
            sync_on_read: true,
            staging_grace: constants::DEFAULT_LEASE_TIMEOUT,
        }
    }
}

/// On-disk JSON form of [`StoreOptions`]
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptionsFile {
    #[serde(default)]
    storage_dirs: Vec<PathBuf>,
    lease_timeout_ms: Option<u64>,
    sync_on_read: Option<bool>,
    staging_grace_ms: Option<u64>,
}

impl StoreOptions {
    /// Read options from `BUNDLESTORE_STORAGE_DIRS` / `BUNDLESTORE_LEASE_TIMEOUT_MS`
    pub fn from_env() -> Result<Self> {
        let mut builder = StoreOptionsBuilder::new();

        if let Some(dirs) = std::env::var_os(constants::ENV_STORAGE_DIRS) {
            builder = builder.storage_dirs(std::env::split_paths(&dirs).filter(|p| !p.as_os_str().is_empty()));
        }

        if let Ok(ms) = std::env::var(constants::ENV_LEASE_TIMEOUT_MS) {
            let ms: u64 = ms
                .trim()
                .parse()
                .with_context(|| format!("{} must be an integer, got '{}'", constants::ENV_LEASE_TIMEOUT_MS, ms))?;
            builder = builder.lease_timeout(Duration::from_millis(ms));
        }

        Ok(builder.build_unchecked())
    }

    /// Load options from a JSON config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let file: OptionsFile = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;

        let mut options = StoreOptions {
            storage_dirs: file.storage_dirs,
            ..Default::default()
        };
        if let Some(ms) = file.lease_timeout_ms {
            options.lease_timeout = Duration::from_millis(ms);
            options.staging_grace = options.lease_timeout;
        }
        if let Some(sync) = file.sync_on_read {
            options.sync_on_read = sync;
        }
        if let Some(ms) = file.staging_grace_ms {
            options.staging_grace = Duration::from_millis(ms);
        }
        Ok(options)
    }

    /// Reject configurations no store can run with
    pub fn validate(&self) -> Result<()> {
        if self.storage_dirs.is_empty() {
            return Err(StoreError::InvalidInput("at least one storage path is required".to_string()).into());
        }
        if self.lease_timeout.is_zero() {
            return Err(StoreError::InvalidInput("lease timeout must be greater than zero".to_string()).into());
        }
        Ok(())
    }
}

/// Builder for StoreOptions
pub struct StoreOptionsBuilder {
    options: StoreOptions,
    grace_set: bool,
}

impl StoreOptionsBuilder {
    pub fn new() -> Self {
        Self {
            options: StoreOptions::default(),
            grace_set: false,
        }
    }

    pub fn storage_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.options.storage_dirs.push(dir.into());
        self
    }

    pub fn storage_dirs<I, P>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.options.storage_dirs = dirs.into_iter().map(Into::into).collect();
        self
    }

    pub fn lease_timeout(mut self, timeout: Duration) -> Self {
        self.options.lease_timeout = timeout;
        self
    }

    pub fn sync_on_read(mut self, enabled: bool) -> Self {
        self.options.sync_on_read = enabled;
        self
    }

    pub fn staging_grace(mut self, grace: Duration) -> Self {
        self.options.staging_grace = grace;
        self.grace_set = true;
        self
    }

    /// Build and validate
    pub fn build(self) -> Result<StoreOptions> {
        let options = self.build_unchecked();
        options.validate()?;
        Ok(options)
    }

    fn build_unchecked(mut self) -> StoreOptions {
        if !self.grace_set {
            self.options.staging_grace = self.options.lease_timeout;
        }
        self.options
    }
}

impl Default for StoreOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builder_defaults_grace_to_lease() {
        let options = StoreOptionsBuilder::new()
            .storage_dir("/a")
            .storage_dir("/b")
            .lease_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        assert_eq!(options.storage_dirs, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        assert_eq!(options.staging_grace, Duration::from_secs(5));
        assert!(options.sync_on_read);
    }

    #[test]
    fn test_empty_storage_rejected() {
        let err = StoreOptionsBuilder::new().build().unwrap_err();
        assert!(matches!(
            StoreError::from_anyhow(&err),
            Some(StoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_load_config_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("store.json");
        std::fs::write(
            &path,
            r#"{"storageDirs": ["/mnt/primary", "/mnt/backup"], "leaseTimeoutMs": 1500, "syncOnRead": false}"#,
        )
        .unwrap();

        let options = StoreOptions::load(&path).unwrap();
        assert_eq!(options.storage_dirs.len(), 2);
        assert_eq!(options.storage_dirs[0], PathBuf::from("/mnt/primary"));
        assert_eq!(options.lease_timeout, Duration::from_millis(1500));
        assert_eq!(options.staging_grace, Duration::from_millis(1500));
        assert!(!options.sync_on_read);
    }
}
