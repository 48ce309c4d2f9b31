use std::path::PathBuf;
use anyhow::Context;
use clap::Parser;

use skreen_lib::config::RuntimeSettings;
use skreen_lib::{logging, run, RunOptions};

#[derive(Parser)]
#[command(name = "skreen")]
#[command(about = "Skreen device link: talks to the controller's arduino over serial", long_about = None)]
struct Cli {
    /// Settings file (`{"settings": {...}}`)
    #[arg(long, default_value = "data/settings.json")]
    settings: PathBuf,

    /// Serial port, overriding settings and discovery
    #[arg(long)]
    port: Option<String>,

    /// Do not read operator commands from stdin
    #[arg(long)]
    no_console: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = if cli.settings.exists() {
        RuntimeSettings::load(&cli.settings)
            .with_context(|| format!("loading {}", cli.settings.display()))?
    } else {
        RuntimeSettings::default()
    };
    logging::init(settings.log_level_filter());
    if !cli.settings.exists() {
        log::warn!("{} not found, using default settings", cli.settings.display());
    }

    run(RunOptions { settings, port: cli.port, console: !cli.no_console }).await
}
