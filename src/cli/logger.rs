// Logging setup for the CLI
use std::io::Write;

pub fn init_logger(verbose: bool, quiet: bool) {
    // RUST_LOG wins outright when set
    if std::env::var("RUST_LOG").is_ok() {
        env_logger::init();
        return;
    }

    let default_level = if quiet {
        log::LevelFilter::Error
    } else if verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(default_level).format(|buf, record| {
        if record.level() <= log::Level::Warn {
            writeln!(buf, "[{}] {}", record.level(), record.args())
        } else {
            writeln!(buf, "{}", record.args())
        }
    });

    // Debug output only from our own crate
    if verbose {
        builder.filter_module("bundlestore", log::LevelFilter::Debug);
    }

    builder.init();
}
