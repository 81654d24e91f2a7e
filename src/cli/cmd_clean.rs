use super::utils::{self, StoreArgs};
use anyhow::Result;
use bundlestore::Pipeline;
use clap::Args;
use std::time::Duration;

#[derive(Args)]
#[command(
    about = "Remove stale staging leftovers",
    alias = "cleanup",
    long_about = "Deletes entries under each mount's .staging/ directory that are\n\
                  older than the grace period (the lease timeout unless --grace is\n\
                  given). These are left behind by builds or copies that were\n\
                  interrupted before they could be renamed into place.",
    help_template = crate::clap_help!(
        examples: "  # Clean with the default grace period\n  \
                   {bin} clean\n\n  \
                   # Remove everything older than five minutes\n  \
                   {bin} clean --grace 5m"
    )
)]
pub struct CleanCommand {
    /// Minimum age of an entry before it is removed
    #[arg(long, value_parser = utils::parse_duration)]
    pub grace: Option<Duration>,
}

pub fn run(cmd: CleanCommand, store_args: &StoreArgs, verbose: bool) -> Result<()> {
    let mut options = store_args.options()?;
    if let Some(grace) = cmd.grace {
        options.staging_grace = grace;
    }
    let store = bundlestore::BundleStore::new(options, Pipeline::new())?;

    if verbose {
        for mount in store.storage().paths() {
            println!("Cleaning {}", utils::display_path(mount).display());
        }
    }

    let result = store.clean_staging();
    if result.entries_removed == 0 {
        println!("✓ No stale staging entries");
    } else {
        println!("✓ Removed {} staging entr(ies)", result.entries_removed);
        if result.bytes_freed > 0 {
            println!("  Freed: {}", utils::format_bytes(result.bytes_freed));
        }
    }

    if !result.errors.is_empty() {
        eprintln!("\n⚠ Warning: Some errors occurred during cleanup:");
        for error in &result.errors {
            eprintln!("  • {}", error);
        }
    }
    Ok(())
}
