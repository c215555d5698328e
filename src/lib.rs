pub mod alarm;
pub mod app;
pub mod capture;
pub mod chunking;
pub mod db;
pub mod disturbance;
pub mod error;
pub mod scoring;
pub mod settings;
pub mod staging;
pub mod tracking;
mod utils;

use anyhow::{Context, Result};
use log::{info, warn};

use app::{debug_flag, AppConfig, AppState, DEBUG_VAR};

pub use error::ValidationError;

/// Headless entry point: recover sessions a crash left open, then run the
/// alarm monitor until Ctrl-C.
pub fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    let level = if debug_flag(std::env::var(DEBUG_VAR).ok().as_deref()) {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    info!("sleeptrack starting up...");

    let config = AppConfig::from_env()?;
    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;

    runtime.block_on(async move {
        let mut state = AppState::open(&config, Vec::new())?;
        info!(
            "Data in {}, alarms in {}",
            config.data_dir.display(),
            config.time_zone
        );

        for session in state.tracking.recover_incomplete_sessions().await? {
            warn!(
                "Session {} for {} was interrupted (score {:?})",
                session.id, session.user_id, session.sleep_score
            );
        }

        state.monitor.start();
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for shutdown signal")?;

        info!("Shutting down");
        state.tracking.stop_tracking().await?;
        state.monitor.stop().await
    })
}
