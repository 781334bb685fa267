//! `rosmcp-cli` – rosbridge robot tools from the command line
//!
//! This binary is the interactive front end for `rosmcp-middleware`.  It:
//!
//! 1. Checks for `~/.rosmcp/config.toml`; runs a **First-Run Wizard** when the
//!    file is absent.
//! 2. Drops the user into an **interactive REPL** with slash-commands
//!    (`/topics`, `/twist`, `/sequence`, `/capture`, `/snapshot`, `/help`, …).
//! 3. Intercepts **Ctrl-C** to interrupt any twist sequence in flight (which
//!    still ends with a stop command) and exit safely.

mod config;
mod repl;
mod telemetry;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::{error, warn};

fn main() {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG sets the filter (default "info"), ROSMCP_LOG_FORMAT=json
    // switches to JSON lines and OTEL_EXPORTER_OTLP_ENDPOINT enables export.
    let _telemetry = telemetry::init_tracing("rosmcp");

    print_banner();

    // ── Shared shutdown flag and sequence stop signal ─────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    let (stop_tx, stop_rx) = watch::channel(false);

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the robot and shutting down …".yellow().bold());

        // Any playback in flight sees this, sends the stop command and returns.
        stop_tx.send_replace(true);

        println!("{}", "  ✓ Stop signal raised.".green());
        println!("{}", "  ✓ Exiting rosmcp.".green());

        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; Ctrl-C will not interrupt sequences");
    }

    // ── First-Run Wizard ──────────────────────────────────────────────────
    match config::load() {
        Ok(None) => run_first_run_wizard(),
        Ok(Some(_)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
        }
    }

    let cfg = repl::load_config_or_default();
    println!("  Bridge: {}", cfg.bridge_url().bold());
    println!("  cmd_vel: {}", cfg.cmd_vel_topic.dimmed());
    println!(
        "  Cameras: {} / {}",
        cfg.front_camera_topic.dimmed(),
        cfg.back_camera_topic.dimmed()
    );

    println!();
    println!(
        "  Type {} for a list of commands.\n",
        "/help".bold().cyan()
    );

    // ── Runtime ───────────────────────────────────────────────────────────
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start the async runtime");
            println!("{}: {}", "Runtime error".red(), e);
            return;
        }
    };

    // ── Interactive REPL ──────────────────────────────────────────────────
    repl::run(&runtime, shutdown, stop_rx);
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║       rosmcp First-Run Wizard        ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's point rosmcp at your rosbridge.\n");

    let mut cfg = config::Config::default();

    cfg.bridge_host = repl::prompt_str(
        &format!("  rosbridge host [{}]: ", cfg.bridge_host),
        &cfg.bridge_host,
    );

    let port_str = repl::prompt_str(
        &format!("  rosbridge WebSocket port [{}]: ", cfg.bridge_port),
        &cfg.bridge_port.to_string(),
    );
    if let Ok(p) = port_str.trim().parse::<u16>() {
        cfg.bridge_port = p;
    }

    cfg.output_dir = repl::prompt_str(
        &format!("  Capture output directory [{}]: ", cfg.output_dir),
        &cfg.output_dir,
    );

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   _________  _______ ___  _______ "#.bold().cyan());
    println!("{}", r#"  / __/ __ \/ __/ _ `__ \/ __/ _ \"#.bold().cyan());
    println!("{}", r#" / / / /_/ /\ \/ / / / / / /_/ ___/"#.bold().cyan());
    println!("{}", r#"/_/  \____/___/_/ /_/ /_/\__/_/    "#.bold().cyan());
    println!();
    println!("  {} {}",
        "rosmcp".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  rosbridge robot tools");
    println!();
}
