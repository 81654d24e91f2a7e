//! Whole-store repair pass: bring every lagging mount up to the newest copy of
//! each bundle, drop abandoned leases, and clear old staging leftovers
use crate::manager::{BundleStore, CleanResult};
use crate::mirror::{self, MountFailure};
use crate::storage;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub bundles_checked: usize,
    /// (bundle id, mount) pairs that received a fresh copy
    pub synced: Vec<(String, PathBuf)>,
    pub failures: Vec<MountFailure>,
    pub expired_leases: usize,
    pub staging: CleanResult,
    pub duration_ms: u128,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.synced.is_empty() && self.failures.is_empty() && self.expired_leases == 0
    }
}

/// Running totals across reconcile passes; constant size however long the
/// loop runs
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileTotals {
    pub passes: u64,
    pub copies_synced: u64,
    pub failures: u64,
    pub expired_leases: u64,
    pub staging_entries_removed: u64,
    pub staging_bytes_freed: u64,
    /// Most recent pass
    pub last: Option<ReconcileReport>,
}

impl ReconcileTotals {
    pub fn record(&mut self, report: ReconcileReport) {
        self.passes += 1;
        self.copies_synced += report.synced.len() as u64;
        self.failures += report.failures.len() as u64;
        self.expired_leases += report.expired_leases as u64;
        self.staging_entries_removed += report.staging.entries_removed as u64;
        self.staging_bytes_freed += report.staging.bytes_freed;
        self.last = Some(report);
    }
}

pub fn reconcile_all(store: &BundleStore) -> ReconcileReport {
    let start = Instant::now();
    let mut report = ReconcileReport {
        expired_leases: store.leases().expire_abandoned(store.storage()),
        ..Default::default()
    };

    let writable = store
        .storage()
        .paths()
        .iter()
        .filter(|m| storage::probe_for_write(m))
        .count();

    for listing in store.list_bundles() {
        report.bundles_checked += 1;
        if listing.stale_mounts.is_empty() && listing.mounts.len() >= writable {
            continue;
        }

        let Some((source, _)) = newest_holder(store, &listing.bundle_id) else {
            continue;
        };
        let sync = mirror::sync_stale(&source, store.storage().paths(), &listing.bundle_id);
        report
            .synced
            .extend(sync.synced.into_iter().map(|m| (listing.bundle_id.clone(), m)));
        report.failures.extend(sync.failures);
    }

    report.staging = store.clean_staging();
    report.duration_ms = start.elapsed().as_millis();

    if report.is_clean() {
        log::debug!("[Reconcile] {} bundle(s) consistent", report.bundles_checked);
    } else {
        log::info!(
            "[Reconcile] checked {} bundle(s): {} copy(ies) synced, {} failure(s), {} lease(s) expired",
            report.bundles_checked,
            report.synced.len(),
            report.failures.len(),
            report.expired_leases
        );
    }
    report
}

fn newest_holder(store: &BundleStore, bundle_id: &str) -> Option<(PathBuf, String)> {
    let mut best: Option<(PathBuf, String)> = None;
    for (mount, manifest) in store.copies(bundle_id) {
        let newer = best
            .as_ref()
            .map_or(true, |(_, t)| crate::manifest::is_newer(&manifest.updated_at, t));
        if newer {
            best = Some((mount, manifest.updated_at));
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals_keep_only_last_report() {
        let mut totals = ReconcileTotals::default();
        for i in 0..3 {
            totals.record(ReconcileReport {
                bundles_checked: i,
                synced: vec![("b".to_string(), PathBuf::from("/m1"))],
                expired_leases: 1,
                ..Default::default()
            });
        }
        assert_eq!(totals.passes, 3);
        assert_eq!(totals.copies_synced, 3);
        assert_eq!(totals.expired_leases, 3);
        assert_eq!(totals.last.map(|r| r.bundles_checked), Some(2));
    }
}
