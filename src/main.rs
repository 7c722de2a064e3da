//! # cgb-overseer: The Main Entry Point
//!
//! Loads configuration, initializes logging, and settles the single-instance question:
//!
//! - **First instance**: serves transfers from later launches and runs the Shell until it is
//!   explicitly shut down (`--shutdown` invocation or Ctrl-C).
//! - **Later instance**: forwards its raw command line to the running one and exits.
//!
//! The command line is never interpreted here; it is forwarded as-is and parsed by the
//! coordinator right before delivery to the Shell.

use std::fs::File;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use anyhow::{Context, Result};
use log::{error, info, warn};
use simplelog::{ColorChoice, CombinedLogger, Config, SharedLogger, TermLogger, TerminalMode, WriteLogger};

use cgb_overseer::config::OverseerConfig;
use cgb_overseer::coordinator::InstanceCoordinator;
use cgb_overseer::instance::{Acquired, SingleInstanceGuard};
use cgb_overseer::shell::ShellSlot;

#[tokio::main]
async fn main() -> ExitCode {
    let raw_args: Vec<String> = std::env::args().skip(1).collect();

    let (config, config_error) = match OverseerConfig::load() {
        Ok(config) => (config, None),
        Err(e) => (OverseerConfig::default(), Some(e)),
    };

    init_logging(&config);
    if let Some(e) = config_error {
        warn!("Ignoring unreadable configuration, using defaults: {:#}", e);
    }

    match run(config, raw_args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Terminal logging plus an optional log file.
///
/// Logging failures must not keep the overseer from starting, so errors are ignored.
fn init_logging(config: &OverseerConfig) {
    let level = config.level_filter();
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];

    if let Some(path) = &config.log_file {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match File::create(path) {
            Ok(file) => loggers.push(WriteLogger::new(level, Config::default(), file)),
            Err(e) => eprintln!("cannot open log file {}: {}", path.display(), e),
        }
    }

    let _ = CombinedLogger::init(loggers);
}

async fn run(config: OverseerConfig, raw_args: Vec<String>) -> Result<()> {
    let guard = SingleInstanceGuard::new(config.scope());

    match guard.try_acquire().await.context("single-instance check failed")? {
        Acquired::First(primary) => {
            let slot = Arc::new(ShellSlot::new());
            let coordinator = Arc::new(InstanceCoordinator::new(slot.clone()));

            let transfers = tokio::spawn(coordinator.clone().serve_transfers(primary));
            tokio::spawn(shutdown_on_ctrl_c(slot));

            // The Shell owns the rest of the process lifetime.
            let _continue_startup = coordinator.on_first_launch(raw_args).await;
            transfers.abort();
            info!("Overseer exiting");
            Ok(())
        }
        Acquired::Subsequent(channel) => {
            let timeout = Duration::from_secs(config.transfer_timeout_secs);
            tokio::time::timeout(timeout, channel.transfer(&raw_args))
                .await
                .context("running instance did not take the invocation in time")?
                .context("cannot hand the invocation to the running instance")?;
            info!("Invocation handed to the running instance");
            Ok(())
        }
    }
}

async fn shutdown_on_ctrl_c(slot: Arc<ShellSlot>) {
    let Some(handle) = slot.wait_ready().await else {
        return;
    };
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Ctrl-C received, shutting down");
        handle.shutdown();
    }
}
