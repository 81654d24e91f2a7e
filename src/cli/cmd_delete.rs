use super::utils::{self, StoreArgs};
use anyhow::Result;
use bundlestore::Pipeline;
use clap::Args;

#[derive(Args)]
#[command(
    about = "Remove a bundle from every mount",
    alias = "rm",
    long_about = "Deletes the bundle directory, any staging leftovers, and its dedup\n\
                  index entries on every reachable mount.\n\n\
                  A copy on a mount that is offline right now is not removed and\n\
                  can come back once that mount returns.",
    help_template = crate::clap_help!(
        examples: "  # Delete with confirmation\n  \
                   {bin} delete 3f2c...\n\n  \
                   # No prompt\n  \
                   {bin} delete 3f2c... --force"
    )
)]
pub struct DeleteCommand {
    /// Bundle id
    pub bundle_id: String,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub force: bool,
}

pub fn run(cmd: DeleteCommand, store_args: &StoreArgs) -> Result<()> {
    let store = store_args.open(Pipeline::new())?;

    if !cmd.force && !utils::confirm(&format!("Delete bundle {} from every mount?", cmd.bundle_id))? {
        println!("Cancelled");
        return Ok(());
    }

    let report = store.clear_bundle_everywhere(&cmd.bundle_id)?;
    println!("✓ Removed {} from {} mount(s)", report.bundle_id, report.removed_from.len());
    for failure in &report.failures {
        eprintln!("⚠ {}", failure);
    }
    Ok(())
}
