//! Data models for the unlocker.
//!
//! - [`RuleTable`]: which literal tag pair each target file uses, with a default rule
//! - [`OutcomeRecord`]: the immutable per-file result streamed from the pipeline worker
//! - [`SessionState`]: everything the interactive session owns, including the active [`PipelineRun`]
//! - [`RulesConfig`] / [`UserConfig`]: serde shapes of the YAML files read by
//!   [`ConfigManager`](crate::config::ConfigManager)

pub mod config;
pub mod outcome;
pub mod rules;
pub mod session;

pub use config::{RulesConfig, Settings, TagPair, UserConfig};
pub use outcome::{Outcome, OutcomeRecord, SkipReason};
pub use rules::{Direction, FileCount, FileNameSet, RuleError, RuleTable, Tag, TransformRule};
pub use session::{
    MenuOption, PipelineRun, RunSummary, SessionEvent, SessionState, SessionView, TransitionError,
};
