use super::utils::InputArgs;
use anyhow::Result;
use bundlestore::fingerprint;
use clap::Args;

#[derive(Args)]
#[command(
    about = "Print the fingerprint of a creation input",
    long_about = "Canonicalizes a creation input and prints its SHA-256 fingerprint.\n\n\
                  Inputs that differ only in casing, ordering, default ports,\n\
                  trailing slashes or fragments print the same value.",
    help_template = crate::clap_help!(
        examples: "  # Fingerprint of a single repo\n  \
                   {bin} fingerprint --repo tokio-rs/tokio\n\n  \
                   # From a JSON input, showing the canonical form\n  \
                   {bin} fingerprint --input request.json --canonical"
    )
)]
pub struct FingerprintCommand {
    #[command(flatten)]
    pub input: InputArgs,

    /// Also print the canonical input
    #[arg(long)]
    pub canonical: bool,
}

pub fn run(cmd: FingerprintCommand, verbose: bool) -> Result<()> {
    if cmd.input.is_empty() {
        anyhow::bail!("Nothing to fingerprint: pass --input, --repo or --url");
    }
    let input = cmd.input.to_input()?;
    println!("{}", fingerprint::fingerprint(&input));

    if cmd.canonical || verbose {
        println!("{}", serde_json::to_string_pretty(&input.canonicalize())?);
    }
    Ok(())
}
