use super::utils::StoreArgs;
use anyhow::Result;
use bundlestore::Pipeline;
use clap::Args;

#[derive(Args)]
#[command(
    about = "Locate a bundle and repair lagging mounts",
    long_about = "Prints the directory of the newest copy of a bundle. Mounts holding\n\
                  an older copy, or none at all, are brought up to date unless the\n\
                  store runs with syncOnRead disabled.",
    help_template = crate::clap_help!(
        examples: "  # Print the bundle path\n  \
                   {bin} open 3f2c...\n\n  \
                   # Use it from a shell\n  \
                   cd \"$({bin} open 3f2c...)\""
    )
)]
pub struct OpenCommand {
    /// Bundle id
    pub bundle_id: String,
}

pub fn run(cmd: OpenCommand, store_args: &StoreArgs) -> Result<()> {
    let store = store_args.open(Pipeline::new())?;
    let opened = store.open_bundle(&cmd.bundle_id)?;

    println!("{}", opened.root.display());

    if let Some(sync) = &opened.sync {
        for mount in &sync.synced {
            log::info!("[Sync] Refreshed copy on {}", mount.display());
        }
        for failure in &sync.failures {
            eprintln!("⚠ Could not sync {}", failure);
        }
    }
    Ok(())
}
