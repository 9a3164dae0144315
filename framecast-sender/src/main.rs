//! framecast sender: entry point.
//!
//! ```text
//! framecast-sender                  Run in the foreground
//! framecast-sender --config <path>  Load a custom config TOML
//! framecast-sender --gen-config     Write default config to stdout
//! framecast-sender --write-config <path>  Write default config to a file
//! framecast-sender --discrete       Settle every tick before the next (discrete mode)
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use framecast_core::ExecutionMode;
use framecast_sender::config::SenderConfig;
use framecast_sender::service::SenderService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "framecast-sender", about = "Streams a test pattern through the framecast pipeline")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "framecast-sender.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Write the default configuration to the given file and exit.
    #[arg(long, value_name = "PATH")]
    write_config: Option<PathBuf>,

    /// Run in discrete mode regardless of the config file.
    #[arg(long)]
    discrete: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&SenderConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // --write-config: bootstrap a config file and exit.
    if let Some(path) = &cli.write_config {
        SenderConfig::write_default(path)?;
        println!("wrote default config to {}", path.display());
        return Ok(());
    }

    // Load config.
    let mut config = SenderConfig::load(&cli.config);
    if cli.discrete {
        config.pipeline.mode = ExecutionMode::Discrete;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("framecast-sender v{}", env!("CARGO_PKG_VERSION"));
    info!("sender name: {}", config.pipeline.name);
    info!("format: {}, mode: {}", config.pipeline.format, config.pipeline.mode);
    info!("remote: {}", config.network.remote);

    let service = SenderService::new(config);
    let stop = service.stop_handle();

    // Ctrl-C handler.
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.store(false, std::sync::atomic::Ordering::SeqCst);
    });

    service.run().await?;

    Ok(())
}
