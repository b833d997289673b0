//! Services module - the scan → transform → stream pipeline.
//!
//! Everything here is independent of the front end and can be driven from tests
//! or any other consumer.
//!
//! # Components
//!
//! - [`scanner`]: recursive directory walk filtered by a [`FileNameSet`](crate::models::FileNameSet),
//!   plus per-name counting. Fails with [`ScanError`] for a missing, non-directory or unreadable root.
//! - [`TransformEngine`]: literal tag substitution keyed by filename through a shared
//!   [`RuleTable`](crate::models::RuleTable). Idempotent per direction.
//! - [`ProcessingPipeline`]: spawns one blocking worker per run that walks the tree, rewrites
//!   matched files and streams one [`OutcomeRecord`](crate::models::OutcomeRecord) per file over a
//!   bounded channel. Per-file I/O failures become `Error` records and never stop the walk.
//!
//! # Usage Example
//!
//! ```ignore
//! let pipeline = ProcessingPipeline::new(rules, metrics);
//! let mut run = pipeline.start(RunRequest { root, targets, direction: Direction::Unlock });
//!
//! while let Some(event) = run.recv().await {
//!     // one PipelineEvent per matched file
//! }
//! // channel closed: the run is complete
//! ```

pub mod pipeline;
pub mod scanner;
pub mod transform;

pub use pipeline::{
    DEFAULT_CHANNEL_CAPACITY, DiskStore, FileError, FileStore, PipelineEvent, PipelineRunHandle,
    ProcessingPipeline, RunRequest, WorkerReport, process_file, process_file_with,
};
pub use scanner::{ScanError, count_files, matching_files, scan, validate_root};
pub use transform::{TransformEngine, TransformOutcome, Transformed};
