//! In-progress leases on top of the dedup index
//!
//! A lease is a best-effort, time-bounded claim on a fingerprint so that two
//! callers do not ingest the same bundle at once. It is not a distributed
//! lock: mounts are visited in list order, the first live lease wins, and an
//! abandoned lease is reclaimed once `timeout` has passed since `startedAt`.
//! An ingestion that outlives the timeout can therefore run twice.
//!
//! Within one process the read-check-write of `acquire` is serialized. Across
//! processes concurrent writers race at the rename and the last one wins.

use crate::dedup::{self, DedupEntry, DedupIndex};
use crate::manifest;
use crate::storage::{self, StorageSet};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseOutcome {
    /// Lease written. `degraded` means no mount was writable and the lease
    /// exists only in the caller's head.
    Acquired { degraded: bool },
    /// Someone else holds a live lease
    Conflict(DedupEntry),
    /// A committed bundle already answers the request; nothing was written
    Committed(DedupEntry),
}

/// Request for a lease
#[derive(Debug, Clone)]
pub struct LeaseRequest<'a> {
    pub fingerprint: &'a str,
    pub bundle_id: &'a str,
    pub task_id: &'a str,
    pub repos: Vec<String>,
}

pub struct LeaseManager {
    timeout: Duration,
    guard: Mutex<()>,
}

impl LeaseManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            guard: Mutex::new(()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// True while `entry` is an in-progress lease younger than the timeout
    pub fn is_live(&self, entry: &DedupEntry, now: DateTime<Utc>) -> bool {
        if !entry.is_in_progress() {
            return false;
        }
        let Some(started) = entry.started_at.as_deref().and_then(manifest::parse_time) else {
            return false;
        };
        let timeout = chrono::Duration::from_std(self.timeout).unwrap_or_else(|_| chrono::Duration::days(36_500));
        now.signed_duration_since(started) < timeout
    }

    /// Try to take the lease for `req.fingerprint`
    pub fn acquire(&self, set: &StorageSet, req: LeaseRequest<'_>) -> LeaseOutcome {
        self.acquire_unless(set, req, |_| false)
    }

    /// Like [`acquire`](Self::acquire), but first asks `committed` about every
    /// complete entry for the fingerprint. A confirmed entry is returned as
    /// [`LeaseOutcome::Committed`] and left in place.
    pub fn acquire_unless<F>(&self, set: &StorageSet, req: LeaseRequest<'_>, committed: F) -> LeaseOutcome
    where
        F: Fn(&DedupEntry) -> bool,
    {
        let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();

        for mount in set.available_for_read() {
            let index = DedupIndex::read(mount);
            if let Some(entry) = index.get(req.fingerprint) {
                if entry.is_complete() && committed(entry) {
                    log::debug!(
                        "[Lease] {} already committed as {} (on {})",
                        short(req.fingerprint),
                        entry.bundle_id,
                        mount.display()
                    );
                    return LeaseOutcome::Committed(entry.clone());
                }
                if self.is_live(entry, now) {
                    log::debug!(
                        "[Lease] {} held by task {} since {} (on {})",
                        short(req.fingerprint),
                        entry.task_id.as_deref().unwrap_or("?"),
                        entry.started_at.as_deref().unwrap_or("?"),
                        mount.display()
                    );
                    return LeaseOutcome::Conflict(entry.clone());
                }
                if entry.is_in_progress() {
                    log::info!(
                        "[Lease] Reclaiming abandoned lease on {} (task {}, started {})",
                        short(req.fingerprint),
                        entry.task_id.as_deref().unwrap_or("?"),
                        entry.started_at.as_deref().unwrap_or("?")
                    );
                }
            }
        }

        let entry = DedupEntry::in_progress(req.bundle_id, req.task_id, manifest::to_iso(now), req.repos);

        let mut written = 0usize;
        for mount in set.available_for_write() {
            if let Err(e) = std::fs::create_dir_all(mount) {
                log::warn!("[Lease] Cannot create {}: {}", mount.display(), e);
                continue;
            }
            match dedup::update_index(mount, |index| index.insert(req.fingerprint, entry.clone())) {
                Ok(()) => written += 1,
                Err(e) => log::warn!("[Lease] Failed to write lease to {}: {:#}", mount.display(), e),
            }
        }

        if written == 0 {
            log::warn!(
                "[Lease] No storage reachable, assuming lease on {} is granted",
                short(req.fingerprint)
            );
            return LeaseOutcome::Acquired { degraded: true };
        }

        log::debug!("[Lease] Acquired {} on {} mount(s)", short(req.fingerprint), written);
        LeaseOutcome::Acquired { degraded: false }
    }

    /// Clear the lease on `fingerprint` wherever it is still in progress.
    ///
    /// A complete entry is never touched, so a late release cannot erase a
    /// bundle that has since been committed.
    pub fn release(&self, set: &StorageSet, fingerprint: &str) {
        self.release_matching(set, fingerprint, None);
    }

    /// Like [`release`](Self::release), but only clears leases held by `task_id`
    pub fn release_owned(&self, set: &StorageSet, fingerprint: &str, task_id: &str) {
        self.release_matching(set, fingerprint, Some(task_id));
    }

    /// Write a `complete` entry on `mounts`, skipping any mount where someone
    /// holds a live lease on the fingerprint
    pub fn seed_complete(
        &self,
        mounts: &[&Path],
        fingerprint: &str,
        bundle_id: &str,
        bundle_updated_at: &str,
    ) -> Vec<(PathBuf, String)> {
        self.write_complete(mounts, fingerprint, bundle_id, bundle_updated_at, None)
    }

    /// Record a bundle committed by `task_id`. Its own lease is replaced; a
    /// live lease held by any other task is left alone.
    pub fn commit(
        &self,
        mounts: &[&Path],
        fingerprint: &str,
        bundle_id: &str,
        bundle_updated_at: &str,
        task_id: &str,
    ) -> Vec<(PathBuf, String)> {
        self.write_complete(mounts, fingerprint, bundle_id, bundle_updated_at, Some(task_id))
    }

    fn write_complete(
        &self,
        mounts: &[&Path],
        fingerprint: &str,
        bundle_id: &str,
        bundle_updated_at: &str,
        owner: Option<&str>,
    ) -> Vec<(PathBuf, String)> {
        let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        dedup::record_complete_unless(mounts, fingerprint, bundle_id, bundle_updated_at, |e| {
            self.is_live(e, now) && (owner.is_none() || e.task_id.as_deref() != owner)
        })
    }

    /// Drop in-progress entries whose lease has run out; returns how many were removed
    pub fn expire_abandoned(&self, set: &StorageSet) -> usize {
        let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        let mut expired = 0usize;

        for mount in set.available_for_write() {
            let mut index = DedupIndex::read(mount);
            let stale: Vec<String> = index
                .by_fingerprint
                .iter()
                .filter(|(_, e)| e.is_in_progress() && !self.is_live(e, now))
                .map(|(fp, _)| fp.clone())
                .collect();
            if stale.is_empty() {
                continue;
            }
            for fp in &stale {
                index.remove(fp);
            }
            match index.write(mount) {
                Ok(()) => {
                    log::info!("[Lease] Expired {} abandoned lease(s) on {}", stale.len(), mount.display());
                    expired += stale.len();
                }
                Err(e) => log::warn!("[Lease] Failed to expire leases on {}: {:#}", mount.display(), e),
            }
        }
        expired
    }

    fn release_matching(&self, set: &StorageSet, fingerprint: &str, task_id: Option<&str>) {
        let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());

        for mount in set.paths() {
            if !storage::probe(mount) {
                continue;
            }
            let mut index = DedupIndex::read(mount);
            let matches = index.get(fingerprint).is_some_and(|e| {
                e.is_in_progress() && task_id.map_or(true, |t| e.task_id.as_deref() == Some(t))
            });
            if !matches {
                continue;
            }
            index.remove(fingerprint);
            match index.write(mount) {
                Ok(()) => log::debug!("[Lease] Released {} on {}", short(fingerprint), mount.display()),
                Err(e) => log::warn!("[Lease] Failed to release lease on {}: {:#}", mount.display(), e),
            }
        }
    }
}

fn short(fingerprint: &str) -> &str {
    &fingerprint[..fingerprint.len().min(12)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::DedupEntry;
    use tempfile::TempDir;

    fn mounts(tmp: &TempDir, n: usize) -> (StorageSet, Vec<PathBuf>) {
        let paths: Vec<PathBuf> = (0..n).map(|i| tmp.path().join(format!("m{}", i))).collect();
        for p in &paths {
            std::fs::create_dir_all(p).unwrap();
        }
        (StorageSet::new(paths.clone()).unwrap(), paths)
    }

    fn request<'a>(fp: &'a str, task: &'a str) -> LeaseRequest<'a> {
        LeaseRequest {
            fingerprint: fp,
            bundle_id: "bundle-1",
            task_id: task,
            repos: vec!["github:owner/repo".to_string()],
        }
    }

    #[test]
    fn test_acquire_writes_every_mount_then_conflicts() {
        let tmp = TempDir::new().unwrap();
        let (set, paths) = mounts(&tmp, 3);
        let leases = LeaseManager::new(Duration::from_secs(60));

        assert_eq!(
            leases.acquire(&set, request("fp", "task-a")),
            LeaseOutcome::Acquired { degraded: false }
        );
        for p in &paths {
            assert!(DedupIndex::read(p).get("fp").unwrap().is_in_progress());
        }

        match leases.acquire(&set, request("fp", "task-b")) {
            LeaseOutcome::Conflict(entry) => {
                assert_eq!(entry.task_id.as_deref(), Some("task-a"));
                assert!(entry.started_at.is_some());
            }
            other => panic!("expected conflict, got {:?}", other),
        }

        // Different fingerprints are independent
        assert!(matches!(
            leases.acquire(&set, request("other", "task-c")),
            LeaseOutcome::Acquired { .. }
        ));
    }

    #[test]
    fn test_expired_lease_is_reclaimed() {
        let tmp = TempDir::new().unwrap();
        let (set, paths) = mounts(&tmp, 1);
        let timeout = Duration::from_secs(60);
        let leases = LeaseManager::new(timeout);

        let started = Utc::now() - chrono::Duration::from_std(timeout).unwrap() - chrono::Duration::milliseconds(1);
        dedup::update_index(&paths[0], |index| {
            index.insert(
                "fp",
                DedupEntry::in_progress("old-bundle", "crashed", manifest::to_iso(started), vec![]),
            )
        })
        .unwrap();

        assert_eq!(
            leases.acquire(&set, request("fp", "fresh")),
            LeaseOutcome::Acquired { degraded: false }
        );
        let entry = DedupIndex::read(&paths[0]).get("fp").cloned().unwrap();
        assert_eq!(entry.task_id.as_deref(), Some("fresh"));
        assert_eq!(entry.bundle_id, "bundle-1");
    }

    #[test]
    fn test_lease_on_backup_mount_conflicts() {
        let tmp = TempDir::new().unwrap();
        let (set, paths) = mounts(&tmp, 2);
        let leases = LeaseManager::new(Duration::from_secs(60));

        dedup::update_index(&paths[1], |index| {
            index.insert("fp", DedupEntry::in_progress("b", "elsewhere", manifest::now_iso(), vec![]))
        })
        .unwrap();

        assert!(matches!(
            leases.acquire(&set, request("fp", "me")),
            LeaseOutcome::Conflict(_)
        ));
    }

    #[test]
    fn test_complete_entry_does_not_block() {
        let tmp = TempDir::new().unwrap();
        let (set, paths) = mounts(&tmp, 1);
        let leases = LeaseManager::new(Duration::from_secs(60));
        dedup::update_index(&paths[0], |index| {
            index.insert("fp", DedupEntry::complete("done", manifest::now_iso()))
        })
        .unwrap();

        assert!(matches!(
            leases.acquire(&set, request("fp", "me")),
            LeaseOutcome::Acquired { degraded: false }
        ));
    }

    #[test]
    fn test_confirmed_complete_entry_is_reported() {
        let tmp = TempDir::new().unwrap();
        let (set, paths) = mounts(&tmp, 2);
        let leases = LeaseManager::new(Duration::from_secs(60));
        dedup::update_index(&paths[1], |index| {
            index.insert("fp", DedupEntry::complete("done", manifest::now_iso()))
        })
        .unwrap();

        match leases.acquire_unless(&set, request("fp", "me"), |e| e.bundle_id == "done") {
            LeaseOutcome::Committed(entry) => assert_eq!(entry.bundle_id, "done"),
            other => panic!("expected committed, got {:?}", other),
        }
        // Nothing was written over the committed entry
        assert!(DedupIndex::read(&paths[0]).get("fp").is_none());
        assert!(DedupIndex::read(&paths[1]).get("fp").unwrap().is_complete());

        // An entry that fails confirmation is treated as stale
        assert!(matches!(
            leases.acquire_unless(&set, request("fp", "me"), |_| false),
            LeaseOutcome::Acquired { degraded: false }
        ));
    }

    #[test]
    fn test_seed_complete_respects_live_lease() {
        let tmp = TempDir::new().unwrap();
        let (set, paths) = mounts(&tmp, 2);
        let leases = LeaseManager::new(Duration::from_secs(60));
        leases.acquire(&set, request("fp", "task-a"));

        let old = manifest::to_iso(Utc::now() - chrono::Duration::hours(1));
        dedup::update_index(&paths[1], |index| {
            index.insert("fp", DedupEntry::in_progress("b", "gone", old.clone(), vec![]))
        })
        .unwrap();

        let refs: Vec<&Path> = paths.iter().map(PathBuf::as_path).collect();
        assert!(leases.seed_complete(&refs, "fp", "bundle-0", "t1").is_empty());
        assert_eq!(
            DedupIndex::read(&paths[0]).get("fp").unwrap().task_id.as_deref(),
            Some("task-a")
        );
        // Expired lease gets overwritten
        assert!(DedupIndex::read(&paths[1]).get("fp").unwrap().is_complete());
    }

    #[test]
    fn test_commit_replaces_own_lease_only() {
        let tmp = TempDir::new().unwrap();
        let (set, paths) = mounts(&tmp, 1);
        let leases = LeaseManager::new(Duration::from_secs(60));
        leases.acquire(&set, request("fp", "task-a"));
        let refs = [paths[0].as_path()];

        leases.commit(&refs, "fp", "bundle-1", "t1", "task-b");
        assert!(DedupIndex::read(&paths[0]).get("fp").unwrap().is_in_progress());

        leases.commit(&refs, "fp", "bundle-1", "t1", "task-a");
        let entry = DedupIndex::read(&paths[0]).get("fp").cloned().unwrap();
        assert!(entry.is_complete());
        assert_eq!(entry.bundle_updated_at, "t1");
    }

    #[test]
    fn test_release_never_clears_complete_entries() {
        let tmp = TempDir::new().unwrap();
        let (set, paths) = mounts(&tmp, 2);
        let leases = LeaseManager::new(Duration::from_secs(60));

        leases.acquire(&set, request("fp", "task-a"));
        // Completion overwrites the lease on the primary only
        dedup::update_index(&paths[0], |index| {
            index.insert("fp", DedupEntry::complete("bundle-1", manifest::now_iso()))
        })
        .unwrap();

        leases.release(&set, "fp");
        assert!(DedupIndex::read(&paths[0]).get("fp").unwrap().is_complete());
        assert!(DedupIndex::read(&paths[1]).get("fp").is_none());
    }

    #[test]
    fn test_release_owned_ignores_other_tasks() {
        let tmp = TempDir::new().unwrap();
        let (set, paths) = mounts(&tmp, 1);
        let leases = LeaseManager::new(Duration::from_secs(60));

        leases.acquire(&set, request("fp", "task-a"));
        leases.release_owned(&set, "fp", "task-b");
        assert!(DedupIndex::read(&paths[0]).get("fp").is_some());

        leases.release_owned(&set, "fp", "task-a");
        assert!(DedupIndex::read(&paths[0]).get("fp").is_none());
    }

    #[test]
    fn test_expire_abandoned_keeps_live_and_complete() {
        let tmp = TempDir::new().unwrap();
        let (set, paths) = mounts(&tmp, 1);
        let leases = LeaseManager::new(Duration::from_secs(60));
        let old = manifest::to_iso(Utc::now() - chrono::Duration::hours(1));

        dedup::update_index(&paths[0], |index| {
            index.insert("dead", DedupEntry::in_progress("b1", "t1", old.clone(), vec![]));
            index.insert("live", DedupEntry::in_progress("b2", "t2", manifest::now_iso(), vec![]));
            index.insert("done", DedupEntry::complete("b3", old.clone()));
        })
        .unwrap();

        assert_eq!(leases.expire_abandoned(&set), 1);
        let index = DedupIndex::read(&paths[0]);
        assert!(index.get("dead").is_none());
        assert!(index.get("live").is_some());
        assert!(index.get("done").is_some());
        assert_eq!(leases.expire_abandoned(&set), 0);
    }

    #[test]
    fn test_total_outage_degrades_to_granted() {
        let tmp = TempDir::new().unwrap();
        let set = StorageSet::new([tmp.path().join("gone/a"), tmp.path().join("gone/b")]).unwrap();
        let leases = LeaseManager::new(Duration::from_secs(60));

        assert_eq!(
            leases.acquire(&set, request("fp", "task")),
            LeaseOutcome::Acquired { degraded: true }
        );
    }
}
