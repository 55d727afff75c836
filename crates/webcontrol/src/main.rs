//! Sandbox host for the web control server.
//!
//! Runs a stand-in game loop that owns a [`Server`], drains client commands
//! once per tick, and answers them from a small built-in script evaluator.
//! Point a browser at the bind address to get the console page.

mod cli;
mod config;
mod logging;
mod sandbox;
mod signals;

use anyhow::anyhow;
use cli::CliArgs;
use config::AppConfig;
use sandbox::SandboxHost;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::info;
use webcontrol_server::Server;

/// How often the host loop reports activity.
const STATS_INTERVAL: Duration = Duration::from_secs(60);

// ============================================================================
// Configuration
// ============================================================================

/// Applies command-line overrides on top of the loaded configuration.
fn apply_overrides(config: &mut AppConfig, args: &CliArgs) {
    if let Some(bind_address) = &args.bind_address {
        config.server.bind_address = bind_address.clone();
    }

    if let Some(doc_root) = &args.doc_root {
        config.server.doc_root = Some(doc_root.clone());
    }

    if let Some(log_level) = &args.log_level {
        config.logging.level = log_level.clone();
    }

    if args.json_logs {
        config.logging.json_format = true;
    }
}

fn display_banner() {
    let version = option_env!("CARGO_PKG_VERSION").unwrap_or("UNK");
    info!("╔══════════════════════════════════════════╗");
    info!("║         🎮 WEB CONTROL SANDBOX 🎮        ║");
    info!("║                  v{:<8}               ║", version);
    info!("║                                          ║");
    info!("║  🌐 HTTP console + WebSocket commands    ║");
    info!("║  🧵 Commands run on the host tick only   ║");
    info!("╚══════════════════════════════════════════╝");
}

// ============================================================================
// Host Loop
// ============================================================================

/// Ticks the server at `interval` until `stop` is set.
///
/// # Returns
///
/// The total number of tasks dispatched.
fn run_host_loop(server: &Server, interval: Duration, stop: &AtomicBool) -> u64 {
    let mut total = 0u64;
    let mut period = 0u64;
    let mut last_report = Instant::now();

    while !stop.load(Ordering::SeqCst) {
        let frame_start = Instant::now();

        let dispatched = server.tick() as u64;
        total += dispatched;
        period += dispatched;

        if last_report.elapsed() >= STATS_INTERVAL {
            info!(
                "📊 Host health - {} tasks/min | {} WebSocket session(s)",
                period,
                server.session_count()
            );
            period = 0;
            last_report = Instant::now();
        }

        if let Some(remaining) = interval.checked_sub(frame_start.elapsed()) {
            std::thread::sleep(remaining);
        }
    }

    total
}

// ============================================================================
// Entry Point
// ============================================================================

fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // Load configuration first (before logging setup)
    let mut config = AppConfig::load_from_file(&args.config_path)?;
    apply_overrides(&mut config, &args);
    config
        .validate()
        .map_err(|e| anyhow!("Configuration validation failed: {}", e))?;

    logging::setup_logging(&config.logging, args.json_logs)?;
    display_banner();

    let stop = signals::install()?;

    let host = SandboxHost::new(config.host.players.clone());
    let server = Server::start(config.to_server_config()?, Box::new(host))?;

    info!("📋 Configuration Summary:");
    info!("  🌐 Bind address: {}", config.server.bind_address);
    info!("  ⏱️ Tick interval: {}ms", config.host.tick_interval_ms);
    info!("  👥 Players: {}", config.host.players.join(", "));
    match server.local_addr() {
        Some(addr) => info!("🎮 Console available at http://{}/", addr),
        None => info!("⚠️ Running without remote control"),
    }
    info!("🛑 Press Ctrl+C to gracefully shutdown");

    let total = run_host_loop(&server, config.tick_interval(), &stop);

    info!("🛑 Shutdown signal received, initiating graceful shutdown...");
    server.shutdown();
    info!("✅ Sandbox host stopped after dispatching {} task(s)", total);

    Ok(())
}
