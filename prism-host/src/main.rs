//! PRISM host — entry point.
//!
//! ```text
//! prism-host                   Run in the foreground
//! prism-host --config <path>   Load a custom config TOML
//! prism-host --gen-config      Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use prism_host::config::HostConfig;
use prism_host::service::HostService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "prism-host", about = "PRISM shared-memory display host")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "prism-host.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&HostConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config.
    let config = HostConfig::load(&cli.config);

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("prism-host v{}", env!("CARGO_PKG_VERSION"));
    info!("session: {}", config.session.name);
    info!(
        "display: {}x{} @ {} fps",
        config.display.width, config.display.height, config.display.fps
    );

    let service = HostService::establish(config)?;
    service.run()?;

    Ok(())
}
