//! Unlocker - toggle lock flags in game option XML files
//!
//! Main entry point for the interactive console application.
//!
//! # Execution Flow
//!
//! 1. Load settings from `Unlocker Data/Unlocker Settings.yaml` (+ `UNLOCKER_*` env overrides)
//! 2. Initialize logging → `<log_dir>/unlocker.<date>`
//! 3. Create the tokio runtime
//! 4. Load and validate the rule table from `Unlocker Data/Unlocker Rules.yaml`
//! 5. Wire stdin → input parser → [`SessionController`] → console front end
//! 6. Run the session until the user quits or stdin closes
//! 7. Remember the accepted root, log metrics, shut the runtime down
//!
//! An unusable root directory ends the session with a non-zero exit code.

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use unlocker::services::ProcessingPipeline;
use unlocker::ui::console::{self, ConsoleFrontend};
use unlocker::ui::SessionController;
use unlocker::{APP_NAME, ConfigManager, Metrics, StateManager, VERSION};

const DATA_DIR: &str = "Unlocker Data";

fn main() -> Result<()> {
    let config_manager = ConfigManager::new(DATA_DIR)?;
    let mut user_config = config_manager.load_user_config()?;

    // Held until exit so buffered log lines are flushed
    let _log_guard = unlocker::logging::setup_logging_from_settings(&user_config.settings)?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("unlocker-worker")
        .build()
        .context("Failed to build tokio runtime")?;

    let rules = Arc::new(config_manager.load_rule_table()?);
    let state_manager = Arc::new(StateManager::new());
    let metrics = Arc::new(Metrics::new());
    let pipeline = ProcessingPipeline::new(rules, Arc::clone(&metrics))
        .with_capacity(user_config.settings.effective_channel_capacity());

    let last_root = user_config.settings.last_root().map(Utf8PathBuf::from);
    let controller =
        SessionController::new(Arc::clone(&state_manager), pipeline, ConsoleFrontend::stdout())
            .with_last_root(last_root);

    let result = runtime.block_on(async {
        let (line_tx, line_rx) = mpsc::channel(8);
        let (input_tx, input_rx) = mpsc::channel(8);

        console::spawn_stdin_reader(line_tx).context("Failed to start stdin reader")?;
        tokio::spawn(console::forward_input(
            line_rx,
            Arc::clone(&state_manager),
            input_tx,
        ));

        controller.run(input_rx).await
    });

    metrics.log_summary();

    if let Some(root) = state_manager.read(|s| s.root_dir.clone()) {
        user_config.settings.last_root = root.into_string();
        if let Err(e) = config_manager.save_user_config(&user_config) {
            tracing::warn!("Could not remember root directory: {:#}", e);
        }
    }

    // The stdin reader may still be blocked on a read; don't wait for it
    runtime.shutdown_timeout(Duration::from_secs(2));

    if let Err(e) = &result {
        tracing::error!("Session failed: {:#}", e);
    }
    tracing::info!("Shutdown complete");

    result
}
