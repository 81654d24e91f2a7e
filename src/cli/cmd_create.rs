use super::utils::{self, InputArgs, StoreArgs};
use anyhow::Result;
use bundlestore::{CreateOutcome, ImportDirStep, ManifestStep, Pipeline};
use clap::{Args, ValueHint};
use std::path::PathBuf;

#[derive(Args)]
#[command(
    about = "Build a bundle from a prepared directory",
    long_about = "Imports a prepared bundle tree (docs, search index, repos/) and\n\
                  commits it under a new bundle id, writing manifest.json from the\n\
                  creation input.\n\n\
                  If a bundle with the same fingerprint already exists it is reused\n\
                  unless --force-new is given. If another process is building the\n\
                  same input right now, nothing is built and its lease is shown.",
    help_template = crate::clap_help!(
        examples: "  # Build from a prepared tree\n  \
                   {bin} -s /mnt/a -s /mnt/b create --repo tokio-rs/tokio --from ./out\n\n  \
                   # Always build a fresh bundle\n  \
                   {bin} create --input request.json --from ./out --force-new --json"
    )
)]
pub struct CreateCommand {
    #[command(flatten)]
    pub input: InputArgs,

    /// Directory holding the prepared bundle contents
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub from: PathBuf,

    /// Skip the lookup for an existing bundle
    #[arg(long)]
    pub force_new: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(cmd: CreateCommand, store_args: &StoreArgs) -> Result<()> {
    let input = cmd.input.to_input()?;
    let pipeline = Pipeline::new().step(ImportDirStep::new(&cmd.from)).step(ManifestStep);
    let store = store_args.open(pipeline)?;

    let outcome = if cmd.force_new {
        store.create_bundle(&input)?
    } else {
        store.find_or_create(&input)?
    };

    if cmd.json {
        return utils::print_json(&outcome);
    }

    match &outcome {
        CreateOutcome::Created(summary) => {
            println!("✓ Created bundle {}", summary.bundle_id);
            println!("  Path: {}", summary.path.display());
        }
        CreateOutcome::Existing(summary) => {
            println!("✓ Reusing bundle {}", summary.bundle_id);
            println!("  Path:    {}", summary.path.display());
            println!("  Updated: {}", summary.updated_at);
        }
        CreateOutcome::InProgress(info) => {
            println!("⏳ Bundle {} is being created by another task", info.bundle_id);
            if let Some(task) = &info.task_id {
                println!("  Task:    {}", task);
            }
            if let Some(started) = &info.started_at {
                println!("  Started: {}", started);
            }
        }
    }

    if let Some(summary) = outcome.summary() {
        for failure in &summary.replication_failures {
            eprintln!("⚠ Not replicated to {}", failure);
        }
    }
    Ok(())
}
