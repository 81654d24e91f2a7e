use super::utils::{self, InputArgs, StoreArgs};
use anyhow::Result;
use bundlestore::{fingerprint, manager, LookupPath, Pipeline};
use clap::Args;

#[derive(Args)]
#[command(
    about = "Look up a bundle by creation input or fingerprint",
    help_template = crate::clap_help!(
        examples: "  # By repo\n  \
                   {bin} find --repo tokio-rs/tokio\n\n  \
                   # By raw fingerprint\n  \
                   {bin} find --fingerprint 9c1e...\n\n  \
                   # Exit status only\n  \
                   {bin} find --input request.json --quiet"
    )
)]
pub struct FindCommand {
    #[command(flatten)]
    pub input: InputArgs,

    /// Fingerprint to look up directly
    #[arg(long, conflicts_with_all = ["input", "repos", "urls"])]
    pub fingerprint: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(cmd: FindCommand, store_args: &StoreArgs) -> Result<()> {
    let fp = match &cmd.fingerprint {
        Some(fp) => fp.trim().to_lowercase(),
        None => {
            if cmd.input.is_empty() {
                anyhow::bail!("Nothing to look up: pass --fingerprint, --input, --repo or --url");
            }
            fingerprint::fingerprint(&cmd.input.to_input()?)
        }
    };
    let store = store_args.open(Pipeline::new())?;

    match store.find_existing_bundle_by_fingerprint(&fp) {
        Some(found) => {
            if cmd.json {
                return utils::print_json(&found);
            }
            let via = match found.via {
                LookupPath::Index => "index",
                LookupPath::Scan => "manifest scan",
            };
            println!("{}", found.bundle_id);
            log::info!("[Lookup] found on {} via {} (updated {})", found.mount.display(), via, found.updated_at);
            Ok(())
        }
        None => {
            let now = chrono::Utc::now();
            if let Some((mount, entry)) = manager::dedup_entry(store.storage(), &fp)
                .filter(|(_, e)| store.leases().is_live(e, now))
            {
                eprintln!(
                    "Bundle {} is being created (task {}, since {}, on {})",
                    entry.bundle_id,
                    entry.task_id.as_deref().unwrap_or("?"),
                    entry.started_at.as_deref().unwrap_or("?"),
                    mount.display()
                );
            }
            anyhow::bail!("No bundle found for fingerprint {}", fp)
        }
    }
}
