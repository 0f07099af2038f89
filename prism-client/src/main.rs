//! PRISM client — entry point.
//!
//! ```text
//! prism-client                   Attach to the default session
//! prism-client --config <path>   Load a custom config TOML
//! prism-client --gen-config      Write default config to stdout
//! ```

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use prism_client::config::ClientConfig;
use prism_client::sinks::{ClipboardLogger, CursorTracker, StatsSink};
use prism_core::{Dispatcher, PrismError, SessionLayout, SharedRegion};

/// Delay between attach attempts while the host is not up yet.
const ATTACH_RETRY: Duration = Duration::from_millis(50);

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "prism-client", about = "PRISM shared-memory display client")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "prism-client.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Attach ───────────────────────────────────────────────────────

/// Open the shared region and validate the session header, retrying
/// until the host shows up or the attach window closes. A region that
/// exists but is not yet established (or already torn down) counts as
/// not up.
fn attach(config: &ClientConfig) -> Result<(SharedRegion, SessionLayout), PrismError> {
    let deadline = Instant::now() + Duration::from_millis(config.session.attach_timeout_ms);
    loop {
        let attempt = SharedRegion::open(&config.session.name).and_then(|region| {
            let layout = SessionLayout::open(&region)?;
            if !layout.alive(&region)?.is_alive() {
                return Err(PrismError::InvalidHeader("session is not alive"));
            }
            Ok((region, layout))
        });
        match attempt {
            Ok(pair) => return Ok(pair),
            Err(e) if Instant::now() < deadline => {
                debug!("attach not ready ({e}), retrying");
                std::thread::sleep(ATTACH_RETRY);
            }
            Err(e) => return Err(e),
        }
    }
}

// ── Main ─────────────────────────────────────────────────────────

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&ClientConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config.
    let config = ClientConfig::load(&cli.config);

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("prism-client v{}", env!("CARGO_PKG_VERSION"));
    info!("attaching to {}", config.session.name);

    let (region, layout) = attach(&config)?;
    info!("session attached ({} bytes)", region.capacity());

    let alive = layout.alive(&region)?;
    let channels = layout.client_channels(&region, config.wait_mode())?;

    let mut frames = StatsSink::new(config.runtime.stats_every);
    let mut cursor = CursorTracker::default();
    let mut clipboard = ClipboardLogger::default();

    let mut dispatcher = Dispatcher::new(
        channels.frames,
        channels.cursor,
        channels.clipboard_rx,
        &mut frames,
        &mut cursor,
        &mut clipboard,
        alive,
        config.wait_mode(),
    );

    match dispatcher.run() {
        Ok(()) => info!("host closed the session"),
        // The host died mid-frame; everything up to the truncation
        // point was delivered.
        Err(PrismError::LivenessLost { consumed }) => {
            warn!("session ended mid-frame after {consumed} bytes");
        }
        Err(e) => return Err(e.into()),
    }
    drop(dispatcher);

    info!(
        "received {} frames ({:.1} fps), {} cursor updates, {} clipboard transfers",
        frames.frames,
        frames.fps(),
        cursor.updates,
        clipboard.transfers
    );
    if let Some(text) = &clipboard.last_text {
        info!("last clipboard text: {text:?}");
    }

    Ok(())
}
