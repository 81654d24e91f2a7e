use anyhow::Result;
use clap::{Parser, Subcommand, ValueHint};
use std::path::PathBuf;

// CLI Commands (cmd_ prefix)
mod cmd_clean;
mod cmd_create;
mod cmd_delete;
mod cmd_find;
mod cmd_fingerprint;
mod cmd_ls;
mod cmd_open;
mod cmd_status;
mod cmd_sync;
mod cmd_update;
mod cmd_verify;

// Helper modules (no cmd_ prefix)
mod logger;
mod utils;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn format_help_template() -> &'static str {
    concat!(
        "{about-with-newline}\n\n",
        "{usage-heading}\n  {usage}\n\n",
        "Options:\n{options}\n\n",
        "Bundles:\n",
        "  create       Build a bundle (or reuse an identical one)\n",
        "  update       Rebuild an existing bundle in place\n",
        "  find         Look up a bundle by creation input\n",
        "  open         Locate a bundle and repair lagging mounts\n",
        "  delete       Remove a bundle from every mount\n",
        "  fingerprint  Print the fingerprint of a creation input\n",
        "\n",
        "Storage:\n",
        "  ls           List bundles across mounts\n",
        "  status       Show per-mount health\n",
        "  verify       Check bundle completeness\n",
        "  sync         Reconcile mounts (once or continuously)\n",
        "  clean        Remove stale staging leftovers\n",
        "\n",
        "See 'bundlestore <COMMAND> --help' for more information on a specific command.\n"
    )
}

#[derive(Parser)]
#[command(bin_name = "bundlestore")]
#[command(version = VERSION)]
#[command(about = concat!("bundlestore v", env!("CARGO_PKG_VERSION"), " - knowledge bundle storage"))]
#[command(long_about = concat!(
    "bundlestore v", env!("CARGO_PKG_VERSION"), " - knowledge bundle storage\n\n",
    "Stores content-addressed documentation bundles across one or more\n",
    "mount points. Identical creation inputs resolve to the same bundle,\n",
    "builds are committed atomically, and copies are mirrored to every\n",
    "reachable mount."
))]
#[command(propagate_version = true)]
#[command(help_template = format_help_template())]
pub struct Cli {
    /// Storage mount point; repeat for mirrors (first is primary)
    #[arg(short = 's', long = "storage-dir", global = true, value_hint = ValueHint::DirPath)]
    storage_dirs: Vec<PathBuf>,

    /// JSON config file
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// In-progress lease timeout in milliseconds
    #[arg(long, global = true)]
    lease_timeout_ms: Option<u64>,

    /// Only print errors
    #[arg(long, global = true)]
    quiet: bool,

    /// Enable verbose output
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Fingerprint(cmd_fingerprint::FingerprintCommand),
    Create(cmd_create::CreateCommand),
    Update(cmd_update::UpdateCommand),
    Find(cmd_find::FindCommand),
    Open(cmd_open::OpenCommand),
    Ls(cmd_ls::LsCommand),
    Status(cmd_status::StatusCommand),
    Verify(cmd_verify::VerifyCommand),
    Delete(cmd_delete::DeleteCommand),
    Sync(cmd_sync::SyncCommand),
    Clean(cmd_clean::CleanCommand),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    logger::init_logger(cli.verbose, cli.quiet);

    let store = utils::StoreArgs {
        storage_dirs: cli.storage_dirs,
        config: cli.config,
        lease_timeout_ms: cli.lease_timeout_ms,
    };

    match cli.command {
        Commands::Fingerprint(cmd) => cmd_fingerprint::run(cmd, cli.verbose)?,
        Commands::Create(cmd) => cmd_create::run(cmd, &store)?,
        Commands::Update(cmd) => cmd_update::run(cmd, &store)?,
        Commands::Find(cmd) => cmd_find::run(cmd, &store)?,
        Commands::Open(cmd) => cmd_open::run(cmd, &store)?,
        Commands::Ls(cmd) => cmd_ls::run(cmd, &store)?,
        Commands::Status(cmd) => cmd_status::run(cmd, &store)?,
        Commands::Verify(cmd) => cmd_verify::run(cmd, &store, cli.verbose)?,
        Commands::Delete(cmd) => cmd_delete::run(cmd, &store)?,
        Commands::Sync(cmd) => cmd_sync::run(cmd, &store, cli.quiet)?,
        Commands::Clean(cmd) => cmd_clean::run(cmd, &store, cli.verbose)?,
    }

    Ok(())
}

/// Help template with an examples section; `{bin}` expands to the binary name
#[macro_export]
macro_rules! clap_help {
    (examples: $examples:literal) => {{
        const BIN: &str = env!("CARGO_PKG_NAME");
        concat!(
            "{about-with-newline}\n",
            "{usage-heading} {usage}\n\n",
            "{all-args}\n\n",
            "Examples:\n",
            $examples
        ).replace("{bin}", BIN)
    }};
}
