//! Remote session host — entry point.
//!
//! ```text
//! rsession-host                  Run in the foreground
//! rsession-host --config <path>  Load a custom config TOML
//! rsession-host --gen-config     Write default config to stdout
//! rsession-host --port <port>    Override the listen port
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rsession_host::config::HostConfig;
use rsession_host::service::HostService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "rsession-host",
    about = "Remote session host: framebuffer streaming and input injection"
)]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "rsession-host.toml")]
    config: PathBuf,

    /// Listen port, overriding the config file.
    #[arg(short, long)]
    port: Option<u16>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&HostConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = HostConfig::load(&cli.config);
    if let Some(port) = cli.port {
        config.network.port = port;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("rsession-host v{}", env!("CARGO_PKG_VERSION"));
    info!("listen address: {}", config.bind_address());
    info!("framerate: {} fps, quality: {}", config.stream.framerate, config.stream.quality);
    info!("consume input: {}", config.input.consume_input);

    let service = HostService::new(config);
    let stop = service.stop_handle();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.cancel();
    });

    service.run().await?;
    Ok(())
}
