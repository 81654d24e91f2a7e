//! Interface to the content-producing pipeline
//!
//! Steps run in order against a bundle root and either succeed or return an
//! error. The store never looks inside a step; it only validates what the
//! whole pipeline left behind.

use crate::fingerprint::CreationInput;
use crate::manifest::BundleManifest;
use crate::mirror;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

/// Everything a step needs to know about the bundle it is building
#[derive(Debug, Clone)]
pub struct BundleContext {
    pub bundle_id: String,
    /// Directory the step writes into (a staging directory, not the final location)
    pub root: PathBuf,
    /// Canonical creation input
    pub input: CreationInput,
    pub fingerprint: String,
    pub created_at: String,
    pub updated_at: String,
    /// Committed tree being replaced, on update
    pub previous_root: Option<PathBuf>,
}

impl BundleContext {
    pub fn is_update(&self) -> bool {
        self.previous_root.is_some()
    }
}

pub trait IngestStep: Send + Sync {
    fn name(&self) -> &str;
    fn run(&self, ctx: &BundleContext) -> Result<()>;
}

/// Ordered list of steps
#[derive(Clone, Default)]
pub struct Pipeline {
    steps: Vec<Arc<dyn IngestStep>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step<S: IngestStep + 'static>(mut self, step: S) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step; the first failure aborts the rest
    pub fn run(&self, ctx: &BundleContext) -> Result<()> {
        for (i, step) in self.steps.iter().enumerate() {
            log::debug!(
                "[Ingest] {} step {}/{}: {}",
                ctx.bundle_id,
                i + 1,
                self.steps.len(),
                step.name()
            );
            step.run(ctx)
                .with_context(|| format!("step '{}' failed", step.name()))?;
        }
        Ok(())
    }
}

/// Wrap a closure as a step
pub struct FnStep<F> {
    name: String,
    f: F,
}

impl<F> FnStep<F>
where
    F: Fn(&BundleContext) -> Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> IngestStep for FnStep<F>
where
    F: Fn(&BundleContext) -> Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, ctx: &BundleContext) -> Result<()> {
        (self.f)(ctx)
    }
}

/// Writes `manifest.json` from the context; keeps fields another producer
/// already wrote into the staging manifest
pub struct ManifestStep;

impl IngestStep for ManifestStep {
    fn name(&self) -> &str {
        "manifest"
    }

    fn run(&self, ctx: &BundleContext) -> Result<()> {
        let mut manifest = BundleManifest::new(
            ctx.bundle_id.clone(),
            ctx.input.clone(),
            &ctx.created_at,
            &ctx.updated_at,
        );
        if let Ok(existing) = BundleManifest::load(&ctx.root) {
            manifest.extra = existing.extra;
        }
        manifest.save(&ctx.root)
    }
}

/// Copies a prebuilt tree into the bundle root
pub struct ImportDirStep {
    source: PathBuf,
}

impl ImportDirStep {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self { source: source.into() }
    }
}

impl IngestStep for ImportDirStep {
    fn name(&self) -> &str {
        "import"
    }

    fn run(&self, ctx: &BundleContext) -> Result<()> {
        if !self.source.is_dir() {
            anyhow::bail!("import source is not a directory: {}", self.source.display());
        }
        mirror::copy_dir_recursive(&self.source, &ctx.root)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{self, RepoSpec};
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn context(root: &Path) -> BundleContext {
        let input = CreationInput::new(vec![RepoSpec::github("owner/repo")]).canonicalize();
        BundleContext {
            bundle_id: "b1".to_string(),
            root: root.to_path_buf(),
            fingerprint: fingerprint::fingerprint(&input),
            input,
            created_at: "2024-01-01T00:00:00.000Z".to_string(),
            updated_at: "2024-01-01T00:00:00.000Z".to_string(),
            previous_root: None,
        }
    }

    #[test]
    fn test_pipeline_runs_in_order_and_stops_on_error() {
        let tmp = TempDir::new().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let (s1, s2, s3) = (seen.clone(), seen.clone(), seen.clone());
        let pipeline = Pipeline::new()
            .step(FnStep::new("one", move |_| {
                s1.lock().unwrap().push("one");
                Ok(())
            }))
            .step(FnStep::new("two", move |_| {
                s2.lock().unwrap().push("two");
                anyhow::bail!("clone failed")
            }))
            .step(FnStep::new("three", move |_| {
                s3.lock().unwrap().push("three");
                Ok(())
            }));

        let err = pipeline.run(&context(tmp.path())).unwrap_err();
        assert_eq!(*seen.lock().unwrap(), vec!["one", "two"]);
        assert!(format!("{:#}", err).contains("step 'two' failed: clone failed"));
    }

    #[test]
    fn test_manifest_step_preserves_extra_fields() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("manifest.json"),
            r#"{"bundleId":"x","updatedAt":"t","inputs":{"repos":[]},"displayName":"Repo docs"}"#,
        )
        .unwrap();

        let ctx = context(tmp.path());
        ManifestStep.run(&ctx).unwrap();

        let manifest = BundleManifest::load(tmp.path()).unwrap();
        assert_eq!(manifest.bundle_id, "b1");
        assert_eq!(manifest.fingerprint.as_deref(), Some(ctx.fingerprint.as_str()));
        assert_eq!(manifest.extra["displayName"], "Repo docs");
    }

    #[test]
    fn test_import_dir_step() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        std::fs::create_dir_all(src.path().join("repos/a")).unwrap();
        std::fs::write(src.path().join("repos/a/README.md"), "hello").unwrap();

        ImportDirStep::new(src.path()).run(&context(dst.path())).unwrap();
        assert_eq!(
            std::fs::read_to_string(dst.path().join("repos/a/README.md")).unwrap(),
            "hello"
        );

        let missing = ImportDirStep::new(src.path().join("nope"));
        assert!(missing.run(&context(dst.path())).is_err());
    }
}
