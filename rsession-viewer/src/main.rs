//! Remote session viewer — entry point.
//!
//! ```text
//! rsession-viewer                    Connect using rsession-viewer.toml
//! rsession-viewer --host <addr>      Override the host address
//! rsession-viewer --snapshot <png>   Save the last frame on exit
//! rsession-viewer --gen-config       Write default config to stdout
//! ```
//!
//! Input commands are read from stdin, one per line (see
//! [`rsession_viewer::controller`]).

use std::path::PathBuf;

use clap::Parser;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rsession_viewer::client::ViewerClient;
use rsession_viewer::config::ViewerConfig;
use rsession_viewer::controller::Controller;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "rsession-viewer", about = "Remote session viewer with stdin input controller")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "rsession-viewer.toml")]
    config: PathBuf,

    /// Host address (`host[:port]`), overriding the config file.
    #[arg(long)]
    host: Option<String>,

    /// Write the last frame here as PNG on exit.
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ViewerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ViewerConfig::load(&cli.config);
    if let Some(host) = cli.host {
        config.network.host_address = host;
    }
    if let Some(path) = cli.snapshot {
        config.display.snapshot_path = path.display().to_string();
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("rsession-viewer v{}", env!("CARGO_PKG_VERSION"));
    info!("host address: {}", config.network.host_address);

    let cancel = tokio_util::sync::CancellationToken::new();
    let stop = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.cancel();
    });

    let (commands_tx, commands_rx) = mpsc::channel(64);
    let controller = Controller::new(config.surface());
    tokio::spawn(controller.run(BufReader::new(tokio::io::stdin()), commands_tx, cancel.clone()));

    let client = ViewerClient::new(config);
    let summary = client.run(commands_rx, cancel).await?;
    info!(?summary, "done");
    Ok(())
}
