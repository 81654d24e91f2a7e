// src/lib.rs
//! Content-addressed storage for knowledge bundles.
//!
//! A bundle is a directory tree (manifest, docs, search index, ingested repo
//! files) built by a pluggable [`Pipeline`], committed atomically into one
//! mount point and mirrored best-effort to the rest. Identical creation inputs
//! map to the same bundle through a per-mount dedup index, and an in-progress
//! lease keeps two callers from building the same bundle at once.

pub mod constants;
pub mod dedup;
pub mod error;
pub mod fingerprint;
pub mod ingest;
pub mod lease;
pub mod manager;
pub mod manifest;
pub mod mirror;
pub mod options;
pub mod reconcile;
pub mod runtime;
pub mod storage;
pub mod validation;

pub use error::StoreError;
pub use fingerprint::{fingerprint, CrawlConfig, CreationInput, RepoSpec};
pub use ingest::{BundleContext, FnStep, ImportDirStep, IngestStep, ManifestStep, Pipeline};
pub use manager::{
    BundleListing, BundleStore, BundleSummary, ClearReport, CleanResult, CreateOutcome, ExistingBundle,
    InProgressInfo, LookupPath, OpenedBundle, StoreStatus,
};
pub use manifest::BundleManifest;
pub use mirror::{MirrorReport, MountFailure, SyncReport};
pub use options::{StoreOptions, StoreOptionsBuilder};
pub use reconcile::{reconcile_all, ReconcileReport, ReconcileTotals};
pub use runtime::{run_reconcile_loop, StoreRuntime};
pub use storage::StorageSet;
pub use validation::{validate_bundle, ValidationReport};
