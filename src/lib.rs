// Unlocker - toggle lock flags in game option XML files
//
// This is the library crate containing the scan/transform/stream pipeline and
// the session state machine. The binary crate (main.rs) provides the console entry point.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;
pub mod ui;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use metrics::Metrics;
pub use models::{Direction, OutcomeRecord, RuleTable, SessionState, UserConfig};
pub use services::{ProcessingPipeline, TransformEngine};
pub use state::{StateChange, StateManager};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
