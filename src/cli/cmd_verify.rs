use super::utils::StoreArgs;
use anyhow::Result;
use bundlestore::{validate_bundle, constants, Pipeline};
use clap::Args;

#[derive(Args)]
#[command(
    about = "Check bundle completeness",
    long_about = "Runs the completeness validator (manifest, required docs, search\n\
                  index, ingested repo content). With --all, every copy on every\n\
                  mount is checked, not just the newest one.",
    help_template = crate::clap_help!(
        examples: "  # Verify one bundle\n  \
                   {bin} verify 3f2c...\n\n  \
                   # Verify every copy of every bundle\n  \
                   {bin} verify --all"
    )
)]
pub struct VerifyCommand {
    /// Bundle id
    #[arg(required_unless_present = "all")]
    pub bundle_id: Option<String>,

    /// Verify every copy on every mount
    #[arg(long, conflicts_with = "bundle_id")]
    pub all: bool,
}

pub fn run(cmd: VerifyCommand, store_args: &StoreArgs, verbose: bool) -> Result<()> {
    let store = store_args.open(Pipeline::new())?;

    if let Some(bundle_id) = &cmd.bundle_id {
        let report = store.validate_bundle(bundle_id)?;
        if report.valid {
            println!("✓ Bundle {} is complete", bundle_id);
            return Ok(());
        }
        eprintln!("✗ Bundle {} is incomplete:", bundle_id);
        for item in &report.missing {
            eprintln!("  • {}", item);
        }
        anyhow::bail!("verification failed");
    }

    let mut checked = 0usize;
    let mut broken = 0usize;
    for listing in store.list_bundles() {
        for mount in &listing.mounts {
            checked += 1;
            let root = constants::bundle_dir(mount, &listing.bundle_id);
            let report = validate_bundle(&root, Some(&listing.bundle_id));
            if report.valid {
                if verbose {
                    println!("✓ {} on {}", listing.bundle_id, mount.display());
                }
                continue;
            }
            broken += 1;
            eprintln!("✗ {} on {}", listing.bundle_id, mount.display());
            for item in &report.missing {
                eprintln!("  • {}", item);
            }
        }
    }

    if broken > 0 {
        anyhow::bail!("{} of {} copies failed verification", broken, checked);
    }
    println!("✓ All {} copies verified", checked);
    Ok(())
}
