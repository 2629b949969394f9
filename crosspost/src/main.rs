//! crosspost - Mirror direct Mastodon posts to Twitter and BlueSky
//!
//! Runs one pipeline per configured account until it receives a shutdown
//! signal.

use clap::Parser;
use libcrosspost::logging::LoggingConfig;
use libcrosspost::{shutdown_channel, Config, CrossPost, Result, ShutdownTrigger};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "crosspost")]
#[command(version)]
#[command(about = "Mirror direct Mastodon posts to Twitter and BlueSky")]
#[command(long_about = "\
crosspost - Mirror direct Mastodon posts to Twitter and BlueSky

DESCRIPTION:
    crosspost is a long-running daemon that follows the user stream of each
    configured Mastodon account. Every original post the account makes with
    direct visibility is converted to plain text and published, together
    with its images and videos, to the account's Twitter and BlueSky
    profiles.

USAGE:
    # Run in foreground (logs to stderr)
    crosspost

    # Use a specific configuration file
    crosspost --config ./crosspost.toml

    # Print an example configuration
    crosspost --dump-config > ~/.config/crosspost/config.toml

SIGNALS:
    SIGTERM, SIGINT, SIGQUIT - Graceful shutdown (finishes current post)

CONFIGURATION:
    Configuration file: ~/.config/crosspost/config.toml
    Override with --config or the CROSSPOST_CONFIG environment variable.

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime or setup error
    2 - Configuration error
")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print an example configuration and exit
    #[arg(long)]
    dump_config: bool,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Log output format: text, json or pretty (overrides config)
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    if cli.dump_config {
        print!("{}", Config::template());
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    LoggingConfig::from_config(&config.log, cli.log_format.as_deref(), cli.verbose)?.init()?;
    info!("crosspost starting with {} accounts", config.accounts.len());

    let service = CrossPost::connect(&config).await?;

    let (trigger, shutdown) = shutdown_channel();
    setup_signal_handlers(trigger)?;

    service.run(shutdown).await;
    info!("crosspost stopped");
    Ok(())
}

/// Set up signal handlers for graceful shutdown
#[cfg(unix)]
fn setup_signal_handlers(trigger: ShutdownTrigger) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGQUIT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGQUIT]).map_err(|e| {
        libcrosspost::CrosspostError::Signal(format!("setup failed: {}", e))
    })?;

    std::thread::spawn(move || {
        if let Some(signal) = signals.forever().next() {
            info!("Received signal {}, stopping gracefully...", signal);
            trigger.trigger();
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(trigger: ShutdownTrigger) -> Result<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C, stopping gracefully...");
                trigger.trigger();
            }
            // Keep the trigger alive; dropping it would stop the service
            Err(_) => std::future::pending::<()>().await,
        }
    });
    Ok(())
}
