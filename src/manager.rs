// src/manager.rs
//! `BundleStore`: creation, update, lookup, read, and deletion of bundles
//! across every configured mount point
use crate::constants;
use crate::dedup::{DedupEntry, DedupIndex};
use crate::error::StoreError;
use crate::fingerprint::{self, CreationInput};
use crate::ingest::{BundleContext, Pipeline};
use crate::lease::{LeaseManager, LeaseOutcome, LeaseRequest};
use crate::manifest::{self, BundleManifest};
use crate::mirror::{self, MirrorReport, MountFailure, SyncReport};
use crate::options::StoreOptions;
use crate::storage::{self, StorageSet};
use crate::validation::{self, ValidationReport};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

pub struct BundleStore {
    storage: StorageSet,
    options: StoreOptions,
    leases: LeaseManager,
    pipeline: Pipeline,
}

/// A committed bundle as seen from one mount
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleSummary {
    pub bundle_id: String,
    pub fingerprint: String,
    pub mount: PathBuf,
    pub path: PathBuf,
    pub created_at: String,
    pub updated_at: String,
    pub repos: Vec<String>,
    pub libraries: Vec<String>,
    pub topics: Vec<String>,
    /// Mounts that could not be brought up to date; never fatal
    pub replication_failures: Vec<MountFailure>,
}

/// A live lease held by someone else
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InProgressInfo {
    pub fingerprint: String,
    pub bundle_id: String,
    pub task_id: Option<String>,
    pub started_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum CreateOutcome {
    Created(BundleSummary),
    Existing(BundleSummary),
    InProgress(InProgressInfo),
}

impl CreateOutcome {
    pub fn bundle_id(&self) -> &str {
        match self {
            CreateOutcome::Created(s) | CreateOutcome::Existing(s) => &s.bundle_id,
            CreateOutcome::InProgress(info) => &info.bundle_id,
        }
    }

    pub fn summary(&self) -> Option<&BundleSummary> {
        match self {
            CreateOutcome::Created(s) | CreateOutcome::Existing(s) => Some(s),
            CreateOutcome::InProgress(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LookupPath {
    /// Dedup index hit, confirmed against the manifest
    Index,
    /// Manifest scan across every mount
    Scan,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingBundle {
    pub bundle_id: String,
    pub fingerprint: String,
    pub mount: PathBuf,
    pub updated_at: String,
    pub via: LookupPath,
}

#[derive(Debug, Clone)]
pub struct OpenedBundle {
    pub bundle_id: String,
    /// Mount the bundle is served from (the one with the newest copy)
    pub mount: PathBuf,
    pub root: PathBuf,
    pub manifest: BundleManifest,
    pub sync: Option<SyncReport>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearReport {
    pub bundle_id: String,
    pub removed_from: Vec<PathBuf>,
    pub failures: Vec<MountFailure>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleListing {
    pub bundle_id: String,
    pub created_at: String,
    pub updated_at: String,
    pub repos: Vec<String>,
    /// Mounts holding a readable copy, in storage order
    pub mounts: Vec<PathBuf>,
    /// Mounts whose copy is older than the newest one
    pub stale_mounts: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanResult {
    pub entries_removed: usize,
    pub bytes_freed: u64,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MountStatus {
    pub path: PathBuf,
    pub primary: bool,
    pub readable: bool,
    pub writable: bool,
    pub bundles: usize,
    pub index_entries: usize,
    pub live_leases: usize,
    pub staging_entries: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStatus {
    pub mounts: Vec<MountStatus>,
    pub lease_timeout_ms: u128,
}

impl BundleStore {
    pub fn new(options: StoreOptions, pipeline: Pipeline) -> Result<Self> {
        options.validate()?;
        let storage = StorageSet::new(options.storage_dirs.clone())?;
        Ok(Self {
            storage,
            leases: LeaseManager::new(options.lease_timeout),
            options,
            pipeline,
        })
    }

    pub fn storage(&self) -> &StorageSet {
        &self.storage
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn leases(&self) -> &LeaseManager {
        &self.leases
    }

    // === Creation ===

    /// Build a new bundle from `input`.
    ///
    /// Returns `InProgress` when another caller holds a live lease on the same
    /// fingerprint. On any failure the bundle is removed from every mount and a
    /// single error is returned.
    pub fn create_bundle(&self, input: &CreationInput) -> Result<CreateOutcome> {
        self.create(input, false)
    }

    /// Like [`create_bundle`](Self::create_bundle), but returns `Existing` when
    /// a committed bundle for the fingerprint turns up while taking the lease.
    /// Covers a creation that committed after the caller's own lookup missed.
    pub fn create_unless_committed(&self, input: &CreationInput) -> Result<CreateOutcome> {
        self.create(input, true)
    }

    fn create(&self, input: &CreationInput, reuse_committed: bool) -> Result<CreateOutcome> {
        input.validate()?;
        let canonical = input.canonicalize();
        let fingerprint = fingerprint::fingerprint(&canonical);
        let bundle_id = uuid::Uuid::new_v4().to_string();
        let task_id = uuid::Uuid::new_v4().to_string();

        let request = LeaseRequest {
            fingerprint: &fingerprint,
            bundle_id: &bundle_id,
            task_id: &task_id,
            repos: canonical.repo_labels(),
        };
        let lease = if reuse_committed {
            self.leases.acquire_unless(&self.storage, request, |entry| {
                self.newest_copy(&entry.bundle_id)
                    .is_some_and(|(_, m)| m.computed_fingerprint() == fingerprint)
            })
        } else {
            self.leases.acquire(&self.storage, request)
        };

        if let LeaseOutcome::Committed(entry) = &lease {
            log::info!("[Lookup] {} was committed as {} meanwhile", short(&fingerprint), entry.bundle_id);
            return self.existing_outcome(&entry.bundle_id, &fingerprint);
        }
        if let LeaseOutcome::Conflict(entry) = lease {
            log::info!(
                "[Create] {} is already being created as {} (task {}, started {})",
                short(&fingerprint),
                entry.bundle_id,
                entry.task_id.as_deref().unwrap_or("?"),
                entry.started_at.as_deref().unwrap_or("?")
            );
            return Ok(CreateOutcome::InProgress(InProgressInfo {
                fingerprint,
                bundle_id: entry.bundle_id,
                task_id: entry.task_id,
                started_at: entry.started_at,
            }));
        }

        log::info!("[Create] Creating bundle {} ({})", bundle_id, canonical.repo_labels().join(", "));
        let result = self.build_new(&bundle_id, &canonical, &fingerprint, &task_id);

        match result {
            Ok(summary) => {
                self.leases.release_owned(&self.storage, &fingerprint, &task_id);
                log::info!("[Create] Committed bundle {} on {}", bundle_id, summary.mount.display());
                Ok(CreateOutcome::Created(summary))
            }
            Err(e) => {
                log::error!("[Create] Rolling back bundle {}: {:#}", bundle_id, e);
                self.remove_everywhere(&bundle_id);
                self.leases.release_owned(&self.storage, &fingerprint, &task_id);

                let passthrough = matches!(
                    StoreError::from_anyhow(&e),
                    Some(StoreError::NoStorageAvailable { .. }) | Some(StoreError::IncompleteBundle { .. })
                );
                if passthrough {
                    return Err(e);
                }
                Err(StoreError::CreationFailed {
                    bundle_id,
                    reason: format!("{:#}", e),
                }
                .into())
            }
        }
    }

    fn build_new(
        &self,
        bundle_id: &str,
        canonical: &CreationInput,
        fingerprint: &str,
        task_id: &str,
    ) -> Result<BundleSummary> {
        let mount = self.storage.resolve_for_write()?;
        let staging = constants::staging_root(&mount).join(bundle_id);
        std::fs::create_dir_all(&staging)
            .with_context(|| format!("Failed to create staging directory: {}", staging.display()))?;

        let now = manifest::now_iso();
        let ctx = BundleContext {
            bundle_id: bundle_id.to_string(),
            root: staging.clone(),
            input: canonical.clone(),
            fingerprint: fingerprint.to_string(),
            created_at: now.clone(),
            updated_at: now,
            previous_root: None,
        };
        self.pipeline.run(&ctx)?;
        ensure_complete(&staging, bundle_id)?;

        let final_dir = constants::bundle_dir(&mount, bundle_id);
        std::fs::rename(&staging, &final_dir)
            .with_context(|| format!("Failed to commit bundle into {}", final_dir.display()))?;

        let committed = BundleManifest::load(&final_dir)?;
        let mirror = mirror::mirror_bundle(&mount, self.storage.paths(), bundle_id);
        self.record_committed(&mount, &mirror, fingerprint, bundle_id, &committed.updated_at, task_id);

        Ok(summarize(&mount, &committed, fingerprint, mirror.failures))
    }

    // === Update ===

    /// Re-run the pipeline for an existing bundle and swap the result in.
    ///
    /// Keeps the bundle id and `createdAt`. A failed update leaves the
    /// previous bundle exactly as it was.
    pub fn update_bundle(&self, bundle_id: &str, input: Option<&CreationInput>) -> Result<BundleSummary> {
        let (source_mount, previous) = self
            .newest_copy(bundle_id)
            .ok_or_else(|| StoreError::BundleNotFound(bundle_id.to_string()))?;

        let input = input.cloned().unwrap_or_else(|| previous.inputs.clone());
        input.validate()?;
        let canonical = input.canonicalize();
        let fingerprint = fingerprint::fingerprint(&canonical);
        let task_id = uuid::Uuid::new_v4().to_string();
        let lease_key = constants::update_lease_key(bundle_id);

        let lease = self.leases.acquire(
            &self.storage,
            LeaseRequest {
                fingerprint: &lease_key,
                bundle_id,
                task_id: &task_id,
                repos: canonical.repo_labels(),
            },
        );
        if let LeaseOutcome::Conflict(entry) = lease {
            log::warn!(
                "[Update] Bundle {} is already being updated by task {}",
                bundle_id,
                entry.task_id.as_deref().unwrap_or("?")
            );
            return Err(StoreError::UpdateFailed {
                bundle_id: bundle_id.to_string(),
                reason: format!(
                    "task {} has held the lease since {}",
                    entry.task_id.as_deref().unwrap_or("?"),
                    entry.started_at.as_deref().unwrap_or("?")
                ),
            }
            .into());
        }

        log::info!("[Update] Updating bundle {} (from {})", bundle_id, source_mount.display());
        let result = self.build_update(bundle_id, &source_mount, &previous, &canonical, &fingerprint, &task_id);
        self.leases.release_owned(&self.storage, &lease_key, &task_id);

        match result {
            Ok(summary) => {
                log::info!("[Update] Committed bundle {} at {}", bundle_id, summary.updated_at);
                Ok(summary)
            }
            Err(e) => {
                log::error!("[Update] Update of {} failed, previous bundle kept: {:#}", bundle_id, e);
                Err(StoreError::UpdateFailed {
                    bundle_id: bundle_id.to_string(),
                    reason: format!("{:#}", e),
                }
                .into())
            }
        }
    }

    fn build_update(
        &self,
        bundle_id: &str,
        source_mount: &Path,
        previous: &BundleManifest,
        canonical: &CreationInput,
        fingerprint: &str,
        task_id: &str,
    ) -> Result<BundleSummary> {
        let mount = if storage::probe_for_write(source_mount) {
            source_mount.to_path_buf()
        } else {
            self.storage.resolve_for_write()?
        };

        let staging = mirror::staging_path(&mount, bundle_id, "update");
        std::fs::create_dir_all(&staging)
            .with_context(|| format!("Failed to create staging directory: {}", staging.display()))?;

        let created_at = if previous.created_at.is_empty() {
            previous.updated_at.clone()
        } else {
            previous.created_at.clone()
        };
        let ctx = BundleContext {
            bundle_id: bundle_id.to_string(),
            root: staging.clone(),
            input: canonical.clone(),
            fingerprint: fingerprint.to_string(),
            created_at,
            updated_at: next_timestamp(&previous.updated_at),
            previous_root: Some(constants::bundle_dir(source_mount, bundle_id)),
        };

        let built = self
            .pipeline
            .run(&ctx)
            .and_then(|_| ensure_complete(&staging, bundle_id));
        if let Err(e) = built {
            mirror::remove_tree_quietly(&staging);
            return Err(e);
        }

        let final_dir = constants::bundle_dir(&mount, bundle_id);
        if let Err(e) = mirror::replace_tree(&staging, &final_dir) {
            mirror::remove_tree_quietly(&staging);
            return Err(e);
        }

        let committed = BundleManifest::load(&final_dir)?;
        let mirror = mirror::mirror_bundle(&mount, self.storage.paths(), bundle_id);
        self.record_committed(&mount, &mirror, fingerprint, bundle_id, &committed.updated_at, task_id);

        Ok(summarize(&mount, &committed, fingerprint, mirror.failures))
    }

    fn record_committed(
        &self,
        mount: &Path,
        mirror: &MirrorReport,
        fingerprint: &str,
        bundle_id: &str,
        updated_at: &str,
        task_id: &str,
    ) {
        let mut holders: Vec<&Path> = vec![mount];
        holders.extend(mirror.mirrored.iter().map(PathBuf::as_path));
        for (m, reason) in self.leases.commit(&holders, fingerprint, bundle_id, updated_at, task_id) {
            log::warn!("[Dedup] Index on {} not updated: {}", m.display(), reason);
        }
    }

    // === Lookup ===

    /// Find a committed bundle for `fingerprint`.
    ///
    /// Tries the dedup index of each mount first and confirms the hit against
    /// the bundle's manifest. Falls back to scanning every manifest on every
    /// mount, and re-seeds the index from what it finds.
    pub fn find_existing_bundle_by_fingerprint(&self, fingerprint: &str) -> Option<ExistingBundle> {
        if let Some(found) = self.lookup_index(fingerprint) {
            return Some(found);
        }
        log::debug!("[Lookup] Index miss for {}, scanning manifests", short(fingerprint));
        self.scan_for_fingerprint(fingerprint)
    }

    fn lookup_index(&self, fingerprint: &str) -> Option<ExistingBundle> {
        let mut tried: Vec<String> = Vec::new();

        for mount in self.storage.available_for_read() {
            let index = DedupIndex::read(mount);
            let Some(entry) = index.get(fingerprint).filter(|e| e.is_complete()) else {
                continue;
            };
            if tried.contains(&entry.bundle_id) {
                continue;
            }
            tried.push(entry.bundle_id.clone());

            let Some((holder, manifest)) = self.newest_copy(&entry.bundle_id) else {
                log::debug!("[Lookup] Index on {} points at missing bundle {}", mount.display(), entry.bundle_id);
                continue;
            };
            if manifest.computed_fingerprint() != fingerprint {
                log::debug!("[Lookup] Bundle {} no longer matches {}", entry.bundle_id, short(fingerprint));
                continue;
            }

            if manifest.updated_at != entry.bundle_updated_at {
                self.reseed(fingerprint, &entry.bundle_id, &manifest.updated_at);
            }
            return Some(ExistingBundle {
                bundle_id: entry.bundle_id.clone(),
                fingerprint: fingerprint.to_string(),
                mount: holder,
                updated_at: manifest.updated_at,
                via: LookupPath::Index,
            });
        }
        None
    }

    fn scan_for_fingerprint(&self, fingerprint: &str) -> Option<ExistingBundle> {
        let mut best: Option<(PathBuf, BundleManifest)> = None;

        for mount in self.storage.available_for_read() {
            for (bundle_id, manifest) in read_mount_manifests(mount) {
                if manifest.computed_fingerprint() != fingerprint {
                    continue;
                }
                let newer = best
                    .as_ref()
                    .map_or(true, |(_, b)| manifest::is_newer(&manifest.updated_at, &b.updated_at));
                if newer {
                    log::debug!("[Lookup] Scan candidate {} on {}", bundle_id, mount.display());
                    best = Some((mount.to_path_buf(), manifest));
                }
            }
        }

        let (mount, manifest) = best?;
        log::info!(
            "[Lookup] Recovered {} -> {} by manifest scan, re-seeding index",
            short(fingerprint),
            manifest.bundle_id
        );
        self.reseed(fingerprint, &manifest.bundle_id, &manifest.updated_at);

        Some(ExistingBundle {
            bundle_id: manifest.bundle_id,
            fingerprint: fingerprint.to_string(),
            mount,
            updated_at: manifest.updated_at,
            via: LookupPath::Scan,
        })
    }

    fn reseed(&self, fingerprint: &str, bundle_id: &str, updated_at: &str) {
        let holders = self.storage.find_bundle_mounts(bundle_id);
        let holders: Vec<&Path> = holders
            .iter()
            .map(PathBuf::as_path)
            .filter(|m| storage::probe_for_write(m))
            .collect();
        for (m, reason) in self.leases.seed_complete(&holders, fingerprint, bundle_id, updated_at) {
            log::debug!("[Lookup] Could not re-seed index on {}: {}", m.display(), reason);
        }
    }

    /// Return the existing bundle for `input`, or create it
    pub fn find_or_create(&self, input: &CreationInput) -> Result<CreateOutcome> {
        input.validate()?;
        let fingerprint = fingerprint::fingerprint(input);

        if let Some(existing) = self.find_existing_bundle_by_fingerprint(&fingerprint) {
            log::info!("[Lookup] Reusing bundle {} for {}", existing.bundle_id, short(&fingerprint));
            return self.existing_outcome(&existing.bundle_id, &fingerprint);
        }

        self.create_unless_committed(input)
    }

    fn existing_outcome(&self, bundle_id: &str, fingerprint: &str) -> Result<CreateOutcome> {
        let opened = self.open_bundle(bundle_id)?;
        let failures = opened.sync.map(|s| s.failures).unwrap_or_default();
        Ok(CreateOutcome::Existing(summarize(
            &opened.mount,
            &opened.manifest,
            fingerprint,
            failures,
        )))
    }

    // === Read ===

    /// Locate a bundle, serving the newest copy, and repair lagging mounts
    /// when `sync_on_read` is enabled
    pub fn open_bundle(&self, bundle_id: &str) -> Result<OpenedBundle> {
        let holders = self.copies(bundle_id);
        let (mount, manifest) = newest(&holders)
            .cloned()
            .ok_or_else(|| StoreError::BundleNotFound(bundle_id.to_string()))?;

        if !self.storage.is_primary(&mount) {
            log::debug!("[Sync] Bundle {} served from non-primary {}", bundle_id, mount.display());
        }

        let lagging = self.storage.paths().iter().any(|m| {
            m != &mount
                && storage::probe_for_write(m)
                && holders
                    .iter()
                    .find(|(h, _)| h == m)
                    .map_or(true, |(_, other)| manifest::is_newer(&manifest.updated_at, &other.updated_at))
        });

        let sync = if self.options.sync_on_read && lagging {
            Some(mirror::sync_stale(&mount, self.storage.paths(), bundle_id))
        } else {
            None
        };

        Ok(OpenedBundle {
            bundle_id: bundle_id.to_string(),
            root: constants::bundle_dir(&mount, bundle_id),
            mount,
            manifest,
            sync,
        })
    }

    /// Run the completeness validator against the newest copy of a bundle
    pub fn validate_bundle(&self, bundle_id: &str) -> Result<ValidationReport> {
        let mount = self
            .newest_copy(bundle_id)
            .map(|(m, _)| m)
            .or_else(|| {
                self.storage
                    .paths()
                    .iter()
                    .find(|m| constants::bundle_dir(m, bundle_id).is_dir())
                    .cloned()
            })
            .ok_or_else(|| StoreError::BundleNotFound(bundle_id.to_string()))?;
        Ok(validation::validate_bundle(
            &constants::bundle_dir(&mount, bundle_id),
            Some(bundle_id),
        ))
    }

    /// Every bundle on every readable mount
    pub fn list_bundles(&self) -> Vec<BundleListing> {
        let mut by_id: BTreeMap<String, Vec<(PathBuf, BundleManifest)>> = BTreeMap::new();
        for mount in self.storage.available_for_read() {
            for (bundle_id, manifest) in read_mount_manifests(mount) {
                by_id.entry(bundle_id).or_default().push((mount.to_path_buf(), manifest));
            }
        }

        let mut listings: Vec<BundleListing> = by_id
            .into_iter()
            .filter_map(|(bundle_id, copies)| {
                let (_, newest_manifest) = newest(&copies)?;
                let stale_mounts = copies
                    .iter()
                    .filter(|(_, m)| manifest::is_newer(&newest_manifest.updated_at, &m.updated_at))
                    .map(|(p, _)| p.clone())
                    .collect();
                Some(BundleListing {
                    bundle_id,
                    created_at: newest_manifest.created_at.clone(),
                    updated_at: newest_manifest.updated_at.clone(),
                    repos: newest_manifest.inputs.repo_labels(),
                    mounts: copies.iter().map(|(p, _)| p.clone()).collect(),
                    stale_mounts,
                })
            })
            .collect();

        listings.sort_by(|a, b| {
            manifest::parse_time(&b.updated_at)
                .cmp(&manifest::parse_time(&a.updated_at))
                .then_with(|| a.bundle_id.cmp(&b.bundle_id))
        });
        listings
    }

    // === Delete ===

    /// Remove a bundle and its index entries from every mount
    pub fn clear_bundle_everywhere(&self, bundle_id: &str) -> Result<ClearReport> {
        if bundle_id.is_empty() || constants::is_reserved_entry(bundle_id) || bundle_id.contains(['/', '\\']) {
            return Err(StoreError::InvalidInput(format!("invalid bundle id '{}'", bundle_id)).into());
        }

        let report = self.remove_everywhere(bundle_id);
        if report.removed_from.is_empty() && report.failures.is_empty() {
            return Err(StoreError::BundleNotFound(bundle_id.to_string()).into());
        }
        log::info!(
            "[Delete] Removed bundle {} from {} mount(s)",
            bundle_id,
            report.removed_from.len()
        );
        Ok(report)
    }

    fn remove_everywhere(&self, bundle_id: &str) -> ClearReport {
        let mut report = ClearReport {
            bundle_id: bundle_id.to_string(),
            ..Default::default()
        };

        for mount in self.storage.paths() {
            if !storage::probe(mount) {
                log::debug!("[Delete] Skipping unreachable {}", mount.display());
                if mount.parent().map_or(false, storage::probe) {
                    // Parent is there, so the mount was simply never created
                    continue;
                }
                report
                    .failures
                    .push(MountFailure::new(mount, "storage path unreachable"));
                continue;
            }

            let mut removed = false;
            let dir = constants::bundle_dir(mount, bundle_id);
            if dir.exists() {
                match std::fs::remove_dir_all(&dir) {
                    Ok(()) => removed = true,
                    Err(e) => {
                        log::warn!("[Delete] Failed to remove {}: {}", dir.display(), e);
                        report.failures.push(MountFailure::new(mount, e.to_string()));
                        continue;
                    }
                }
            }
            removed |= remove_staged(mount, bundle_id);

            let mut index = DedupIndex::read(mount);
            if index.remove_bundle(bundle_id) > 0 {
                if let Err(e) = index.write(mount) {
                    log::warn!("[Delete] Failed to update index on {}: {:#}", mount.display(), e);
                }
            }

            if removed {
                report.removed_from.push(mount.clone());
            }
        }
        report
    }

    // === Maintenance ===

    /// Remove staging leftovers older than the grace period
    pub fn clean_staging(&self) -> CleanResult {
        let mut result = CleanResult::default();
        let now = SystemTime::now();

        for mount in self.storage.available_for_read() {
            let staging = constants::staging_root(mount);
            let Ok(entries) = std::fs::read_dir(&staging) else {
                continue;
            };
            for entry in entries.filter_map(|e| e.ok()) {
                let path = entry.path();
                let age = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|t| now.duration_since(t).ok());
                if age.map_or(false, |a| a < self.options.staging_grace) {
                    continue;
                }

                let bytes = tree_size(&path);
                let removed = if path.is_dir() {
                    std::fs::remove_dir_all(&path)
                } else {
                    std::fs::remove_file(&path)
                };
                match removed {
                    Ok(()) => {
                        log::debug!("[Clean] Removed {}", path.display());
                        result.entries_removed += 1;
                        result.bytes_freed += bytes;
                    }
                    Err(e) => result.errors.push(format!("{}: {}", path.display(), e)),
                }
            }
        }
        result
    }

    /// Per-mount health and contents
    pub fn status(&self) -> StoreStatus {
        let now = chrono::Utc::now();
        let mounts = self
            .storage
            .paths()
            .iter()
            .map(|mount| {
                let readable = storage::probe(mount);
                let index = if readable {
                    DedupIndex::read(mount)
                } else {
                    DedupIndex::default()
                };
                MountStatus {
                    path: mount.clone(),
                    primary: self.storage.is_primary(mount),
                    readable,
                    writable: storage::probe_for_write(mount),
                    bundles: if readable { read_mount_manifests(mount).len() } else { 0 },
                    index_entries: index.by_fingerprint.len(),
                    live_leases: index
                        .by_fingerprint
                        .values()
                        .filter(|e| self.leases.is_live(e, now))
                        .count(),
                    staging_entries: std::fs::read_dir(constants::staging_root(mount))
                        .map(|d| d.count())
                        .unwrap_or(0),
                }
            })
            .collect();

        StoreStatus {
            mounts,
            lease_timeout_ms: self.options.lease_timeout.as_millis(),
        }
    }

    // === Helpers ===

    /// Every readable copy of a bundle, in storage order
    pub fn copies(&self, bundle_id: &str) -> Vec<(PathBuf, BundleManifest)> {
        self.storage
            .find_bundle_mounts(bundle_id)
            .into_iter()
            .filter_map(|mount| BundleManifest::load_from_mount(&mount, bundle_id).map(|m| (mount, m)))
            .collect()
    }

    fn newest_copy(&self, bundle_id: &str) -> Option<(PathBuf, BundleManifest)> {
        newest(&self.copies(bundle_id)).cloned()
    }
}

/// Newest copy by `updatedAt`; earlier mounts win ties
fn newest(copies: &[(PathBuf, BundleManifest)]) -> Option<&(PathBuf, BundleManifest)> {
    copies.iter().fold(None, |best, candidate| match best {
        Some(b) if !manifest::is_newer(&candidate.1.updated_at, &b.1.updated_at) => Some(b),
        _ => Some(candidate),
    })
}

fn ensure_complete(root: &Path, bundle_id: &str) -> Result<()> {
    let report = validation::validate_bundle(root, Some(bundle_id));
    if report.valid {
        return Ok(());
    }
    Err(StoreError::IncompleteBundle {
        bundle_id: bundle_id.to_string(),
        missing: report.missing,
    }
    .into())
}

/// Readable bundle manifests directly under a mount root
fn read_mount_manifests(mount: &Path) -> Vec<(String, BundleManifest)> {
    let Ok(entries) = std::fs::read_dir(mount) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name().to_string_lossy().into_owned();
        if constants::is_reserved_entry(&name) || !entry.path().is_dir() {
            continue;
        }
        match BundleManifest::load(entry.path()) {
            Ok(manifest) => out.push((name, manifest)),
            Err(e) => log::debug!("[Lookup] Skipping {}: {:#}", entry.path().display(), e),
        }
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

/// Remove staging entries belonging to `bundle_id`
fn remove_staged(mount: &Path, bundle_id: &str) -> bool {
    let Ok(entries) = std::fs::read_dir(constants::staging_root(mount)) else {
        return false;
    };
    let prefix = format!("{}.", bundle_id);
    let mut removed = false;
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == bundle_id || name.starts_with(&prefix) {
            mirror::remove_tree_quietly(&entry.path());
            removed = true;
        }
    }
    removed
}

fn tree_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// A timestamp strictly after `previous`, normally "now"
fn next_timestamp(previous: &str) -> String {
    let now = chrono::Utc::now();
    match manifest::parse_time(previous) {
        Some(prev) if prev >= now => manifest::to_iso(prev + chrono::Duration::milliseconds(1)),
        _ => manifest::to_iso(now),
    }
}

fn summarize(mount: &Path, manifest: &BundleManifest, fingerprint: &str, failures: Vec<MountFailure>) -> BundleSummary {
    BundleSummary {
        bundle_id: manifest.bundle_id.clone(),
        fingerprint: fingerprint.to_string(),
        mount: mount.to_path_buf(),
        path: constants::bundle_dir(mount, &manifest.bundle_id),
        created_at: manifest.created_at.clone(),
        updated_at: manifest.updated_at.clone(),
        repos: manifest.inputs.repo_labels(),
        libraries: manifest.inputs.libraries.clone(),
        topics: manifest.inputs.topics.clone(),
        replication_failures: failures,
    }
}

fn short(fingerprint: &str) -> &str {
    &fingerprint[..fingerprint.len().min(12)]
}

/// The dedup entry currently recorded for `fingerprint` on the first readable mount that has one
pub fn dedup_entry(storage: &StorageSet, fingerprint: &str) -> Option<(PathBuf, DedupEntry)> {
    storage.available_for_read().into_iter().find_map(|mount| {
        DedupIndex::read(mount)
            .get(fingerprint)
            .cloned()
            .map(|e| (mount.to_path_buf(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_timestamp_is_strictly_newer() {
        let future = manifest::to_iso(chrono::Utc::now() + chrono::Duration::hours(1));
        let next = next_timestamp(&future);
        assert!(manifest::is_newer(&next, &future));

        let past = "2020-01-01T00:00:00.000Z";
        assert!(manifest::is_newer(&next_timestamp(past), past));
        assert!(manifest::is_newer(&next_timestamp("garbage"), "2020-01-01T00:00:00Z"));
    }

    #[test]
    fn test_newest_prefers_earlier_mount_on_tie() {
        let input = CreationInput::new(vec![crate::fingerprint::RepoSpec::github("a/b")]);
        let m = |t: &str| BundleManifest::new("b", input.clone(), t, t);
        let copies = vec![
            (PathBuf::from("/m0"), m("2024-01-01T00:00:00.000Z")),
            (PathBuf::from("/m1"), m("2024-02-01T00:00:00.000Z")),
            (PathBuf::from("/m2"), m("2024-02-01T00:00:00.000Z")),
        ];
        assert_eq!(newest(&copies).unwrap().0, PathBuf::from("/m1"));
        assert!(newest(&[]).is_none());
    }
}
