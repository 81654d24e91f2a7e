use super::utils::{self, StoreArgs};
use anyhow::Result;
use bundlestore::Pipeline;
use clap::Args;

#[derive(Args)]
#[command(
    about = "Show per-mount health",
    alias = "info",
    help_template = crate::clap_help!(
        examples: "  # Show status\n  \
                   {bin} status\n\n  \
                   # JSON output for monitoring\n  \
                   {bin} status --json"
    )
)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(cmd: StatusCommand, store_args: &StoreArgs) -> Result<()> {
    let store = store_args.open(Pipeline::new())?;
    let status = store.status();

    if cmd.json {
        return utils::print_json(&status);
    }

    println!("Bundle Store Status");
    println!("═══════════════════════════════════════════════════════════════");
    println!("  Lease timeout:   {:?}", store.options().lease_timeout);
    println!("  Sync on read:    {}", store.options().sync_on_read);
    println!();

    for mount in &status.mounts {
        let health = match (mount.readable, mount.writable) {
            (true, true) => "✓ online",
            (true, false) => "⚠ read-only",
            (false, true) => "○ not created yet",
            (false, false) => "✗ unreachable",
        };
        let role = if mount.primary { " (primary)" } else { "" };
        println!("📁 {}{}", utils::display_path(&mount.path).display(), role);
        println!("───────────────────────────────────────────────────────────────");
        println!("  State:           {}", health);
        println!("  Bundles:         {}", mount.bundles);
        println!("  Index entries:   {}", mount.index_entries);
        println!("  Live leases:     {}", mount.live_leases);
        if mount.staging_entries > 0 {
            println!("  Staging:         {} entr(ies), run 'clean' to remove stale ones", mount.staging_entries);
        }
        println!();
    }
    Ok(())
}
