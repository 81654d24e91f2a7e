use super::utils::{self, InputArgs, StoreArgs};
use anyhow::Result;
use bundlestore::{ImportDirStep, ManifestStep, Pipeline};
use clap::{Args, ValueHint};
use std::path::PathBuf;

#[derive(Args)]
#[command(
    about = "Rebuild an existing bundle in place",
    long_about = "Replaces the contents of an existing bundle with a freshly prepared\n\
                  tree. The bundle id and createdAt are kept; updatedAt moves forward.\n\n\
                  The old contents stay untouched until the new tree has passed\n\
                  validation, so a failed update leaves the bundle as it was.",
    help_template = crate::clap_help!(
        examples: "  # Refresh a bundle with the same inputs\n  \
                   {bin} update 3f2c... --from ./out\n\n  \
                   # Change the inputs as well\n  \
                   {bin} update 3f2c... --from ./out --repo tokio-rs/tokio --repo tokio-rs/axum"
    )
)]
pub struct UpdateCommand {
    /// Bundle id
    pub bundle_id: String,

    #[command(flatten)]
    pub input: InputArgs,

    /// Directory holding the prepared bundle contents
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub from: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(cmd: UpdateCommand, store_args: &StoreArgs) -> Result<()> {
    let input = if cmd.input.is_empty() {
        None
    } else {
        Some(cmd.input.to_input()?)
    };
    let pipeline = Pipeline::new().step(ImportDirStep::new(&cmd.from)).step(ManifestStep);
    let store = store_args.open(pipeline)?;

    let summary = store.update_bundle(&cmd.bundle_id, input.as_ref())?;
    if cmd.json {
        return utils::print_json(&summary);
    }

    println!("✓ Updated bundle {}", summary.bundle_id);
    println!("  Created: {}", summary.created_at);
    println!("  Updated: {}", summary.updated_at);
    for failure in &summary.replication_failures {
        eprintln!("⚠ Not replicated to {}", failure);
    }
    Ok(())
}
