use super::utils::{self, StoreArgs};
use anyhow::Result;
use bundlestore::Pipeline;
use clap::Args;

#[derive(Args)]
#[command(
    about = "List bundles across all mounts",
    help_template = crate::clap_help!(
        examples: "  # Table view\n  \
                   {bin} ls\n\n  \
                   # Only ids, newest first\n  \
                   {bin} ls --ids\n\n  \
                   # Machine-readable\n  \
                   {bin} ls --json"
    )
)]
pub struct LsCommand {
    /// Print only bundle ids
    #[arg(long, conflicts_with = "json")]
    pub ids: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(cmd: LsCommand, store_args: &StoreArgs) -> Result<()> {
    let store = store_args.open(Pipeline::new())?;
    let listings = store.list_bundles();

    if cmd.json {
        return utils::print_json(&listings);
    }
    if cmd.ids {
        for listing in &listings {
            println!("{}", listing.bundle_id);
        }
        return Ok(());
    }

    if listings.is_empty() {
        println!("No bundles");
        return Ok(());
    }

    let total_mounts = store.storage().paths().len();
    println!("{:<36}  {:<24}  {:>6}  REPOS", "BUNDLE", "UPDATED", "COPIES");
    for listing in &listings {
        let copies = format!("{}/{}", listing.mounts.len(), total_mounts);
        let stale = if listing.stale_mounts.is_empty() { "" } else { " *" };
        println!(
            "{:<36}  {:<24}  {:>6}  {}{}",
            listing.bundle_id,
            listing.updated_at,
            copies,
            listing.repos.join(", "),
            stale
        );
    }
    if listings.iter().any(|l| !l.stale_mounts.is_empty()) {
        println!("\n* some copies are out of date; run 'sync' to repair");
    }
    Ok(())
}
