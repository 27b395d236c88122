use anyhow::Result;
use camino::Utf8PathBuf;
use clap::Parser;

use rigging_graph::{get_runnable, init_builtin_library};

/// Builds the object graph described by a configuration file and runs the
/// root runnable, exiting with its status
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Configuration file to load
    config: Utf8PathBuf,

    /// Name of the root runnable to build and run
    #[arg(default_value = "Main")]
    root: String,

    /// Increase verbosity (-v: info, -vv: debug, -vvv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) {
    let default = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_env("RIGGING_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let Args {
        config,
        root,
        verbose,
    } = Args::parse();

    init_tracing(verbose);
    init_builtin_library()?;

    let runnable = get_runnable(&config, &root)?;
    let status = runnable.run();
    if status != 0 {
        tracing::warn!("{root} finished with status {status}");
        std::process::exit(status);
    }
    Ok(())
}
