use super::utils::{self, StoreArgs};
use anyhow::Result;
use bundlestore::{reconcile_all, run_reconcile_loop, constants, Pipeline, ReconcileReport, StoreRuntime};
use clap::Args;
use std::sync::Arc;
use std::time::Duration;

#[derive(Args)]
#[command(
    about = "Reconcile mounts (once or continuously)",
    long_about = "Copies the newest version of every bundle to mounts that are missing\n\
                  it or hold an older copy, expires abandoned leases, and removes\n\
                  stale staging leftovers.\n\n\
                  With --continuous the pass repeats every --interval until Ctrl+C.",
    help_template = crate::clap_help!(
        examples: "  # One pass\n  \
                   {bin} sync\n\n  \
                   # Keep running\n  \
                   {bin} sync --continuous --interval 5m"
    )
)]
pub struct SyncCommand {
    /// Keep reconciling until interrupted
    #[arg(long)]
    pub continuous: bool,

    /// Pause between passes in continuous mode
    #[arg(long, default_value = "10m", value_parser = utils::parse_duration)]
    pub interval: Duration,

    /// Output as JSON (single pass only)
    #[arg(long, conflicts_with = "continuous")]
    pub json: bool,
}

pub fn run(cmd: SyncCommand, store_args: &StoreArgs, quiet: bool) -> Result<()> {
    let store = store_args.open(Pipeline::new())?;

    if !cmd.continuous {
        let report = reconcile_all(&store);
        if cmd.json {
            return utils::print_json(&report);
        }
        if !quiet {
            print_report(&report);
        }
        return Ok(());
    }

    let interval = if cmd.interval.is_zero() {
        constants::DEFAULT_RECONCILE_INTERVAL
    } else {
        cmd.interval
    };
    let store = Arc::new(store);

    tokio::runtime::Runtime::new()?.block_on(async move {
        let runtime = StoreRuntime::new();
        let shutdown = runtime.create_shutdown_future();
        let trigger = runtime.clone();
        tokio::spawn(async move {
            shutdown.await;
            trigger.trigger_shutdown();
        });

        if !quiet {
            println!("Reconciling every {:?} (Ctrl+C to stop)", interval);
        }
        let totals = run_reconcile_loop(store, interval, runtime.clone()).await;

        if !quiet {
            println!(
                "Sync stopped after {} pass(es), {} copy(ies) refreshed",
                totals.passes, totals.copies_synced
            );
        }
        if runtime.is_fatal_shutdown() {
            anyhow::bail!("reconciler stopped on a fatal error");
        }
        Ok(())
    })
}

fn print_report(report: &ReconcileReport) {
    println!("✓ Checked {} bundle(s) in {} ms", report.bundles_checked, report.duration_ms);
    for (bundle_id, mount) in &report.synced {
        println!("  ↻ {} → {}", bundle_id, mount.display());
    }
    if report.expired_leases > 0 {
        println!("  Expired {} abandoned lease(s)", report.expired_leases);
    }
    if report.staging.entries_removed > 0 {
        println!(
            "  Removed {} staging leftover(s), {}",
            report.staging.entries_removed,
            utils::format_bytes(report.staging.bytes_freed)
        );
    }
    for failure in &report.failures {
        eprintln!("⚠ {}", failure);
    }
}
