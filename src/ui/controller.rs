// SessionController - drives the session state machine
//
// Two independent sources feed the loop: user input from the front end and
// messages from the active pipeline worker. The loop handles one message at a
// time, so run state is only ever mutated from here.

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{Frontend, SessionInput};
use crate::models::{FileCount, FileNameSet, MenuOption, PipelineRun, SessionView};
use crate::services::scanner::{self, ScanError};
use crate::services::{PipelineEvent, PipelineRunHandle, ProcessingPipeline, RunRequest};
use crate::state::StateManager;

enum Step {
    Input(Option<SessionInput>),
    Pipeline(Option<PipelineEvent>),
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Sequences `AwaitingRoot → Selecting → Processing → Report`.
///
/// Owns no business logic: it reacts to inputs and pipeline messages, applies
/// the matching [`StateManager`] transition and asks the front end to render.
///
/// # Lifecycle
///
/// - An unusable root at `AwaitingRoot` ends [`run`](Self::run) with the scan error.
/// - `Confirm` or `Choose` in `Selecting` re-counts the selected targets, then starts the pipeline.
///   A row past the end of the menu is ignored.
/// - Each record moves `Processing → Processing`; the closed channel moves to `Report`.
/// - `Quit` from any view stops the loop, cancelling an active run first.
pub struct SessionController<F: Frontend> {
    state: Arc<StateManager>,
    pipeline: ProcessingPipeline,
    frontend: F,
    active: Option<PipelineRunHandle>,
    last_root: Option<Utf8PathBuf>,
}

impl<F: Frontend> SessionController<F> {
    pub fn new(state: Arc<StateManager>, pipeline: ProcessingPipeline, frontend: F) -> Self {
        Self {
            state,
            pipeline,
            frontend,
            active: None,
            last_root: None,
        }
    }

    /// Root used when the user submits an empty path
    pub fn with_last_root(mut self, root: Option<Utf8PathBuf>) -> Self {
        self.last_root = root;
        self
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    /// Run until `Quit` or until the input channel closes.
    pub async fn run(mut self, mut inputs: mpsc::Receiver<SessionInput>) -> Result<()> {
        tracing::info!("Session started");
        self.render();

        loop {
            let step = match self.active.as_mut() {
                Some(run) => tokio::select! {
                    event = run.recv() => Step::Pipeline(event),
                    input = inputs.recv() => Step::Input(input),
                },
                None => Step::Input(inputs.recv().await),
            };

            let flow = match step {
                Step::Pipeline(event) => {
                    self.handle_pipeline_event(event).await;
                    Flow::Continue
                }
                Step::Input(Some(input)) => self.handle_input(input).await?,
                Step::Input(None) => {
                    tracing::info!("Input source closed");
                    Flow::Quit
                }
            };

            self.render();

            if flow == Flow::Quit {
                break;
            }
        }

        self.shutdown().await;
        tracing::info!("Session ended");
        Ok(())
    }

    fn render(&mut self) {
        let frontend = &mut self.frontend;
        self.state.read(|state| frontend.render(state));
    }

    async fn handle_input(&mut self, input: SessionInput) -> Result<Flow> {
        let (view, cursor, rows) = self.state.read(|s| (s.view, s.cursor, s.menu.len()));

        match (view, input) {
            (_, SessionInput::Quit) => return Ok(Flow::Quit),
            (SessionView::AwaitingRoot, SessionInput::SubmitRoot(raw)) => {
                self.submit_root(&raw).await?;
            }
            (SessionView::Selecting, SessionInput::Select(index) | SessionInput::Choose(index))
                if index >= rows =>
            {
                tracing::warn!("No menu row {} ({} rows); ignoring", index + 1, rows);
            }
            (SessionView::Selecting, SessionInput::Select(index)) => {
                self.state.set_cursor(index);
            }
            (SessionView::Selecting, SessionInput::Choose(index)) => {
                self.state.set_cursor(index);
                self.start_run().await?;
            }
            (SessionView::Selecting, SessionInput::CursorUp) => {
                self.state.set_cursor(cursor.saturating_sub(1));
            }
            (SessionView::Selecting, SessionInput::CursorDown) => {
                self.state.set_cursor(cursor + 1);
            }
            (SessionView::Selecting, SessionInput::Confirm) => {
                self.start_run().await?;
            }
            (SessionView::Processing, SessionInput::Cancel) => {
                if let Some(run) = &self.active {
                    tracing::info!("Cancellation requested");
                    run.cancel();
                }
            }
            (SessionView::Report, SessionInput::Back) => {
                self.state.back_to_selection()?;
            }
            (view, input) => {
                tracing::debug!("Ignoring {:?} in {} view", input, view);
            }
        }

        Ok(Flow::Continue)
    }

    async fn submit_root(&mut self, raw: &str) -> Result<()> {
        let trimmed = raw.trim();
        let root = if trimmed.is_empty() {
            match &self.last_root {
                Some(root) => root.clone(),
                None => {
                    tracing::debug!("Empty root ignored");
                    return Ok(());
                }
            }
        } else {
            Utf8PathBuf::from(trimmed)
        };

        let targets = self.pipeline.rules().target_files().clone();

        match count_targets(root.clone(), targets.clone()).await? {
            Ok(counts) => {
                tracing::info!(
                    "Scanned {}: {} matching file(s)",
                    root,
                    counts.values().sum::<usize>()
                );
                self.state
                    .accept_root(root, counts, MenuOption::menu_for(&targets))?;
                Ok(())
            }
            Err(e) => {
                tracing::error!("Error scanning directory: {}", e);
                self.state.raise_error(e.to_string());
                Err(e).with_context(|| format!("Cannot scan root directory {}", root))
            }
        }
    }

    async fn start_run(&mut self) -> Result<()> {
        let (root, option) = self
            .state
            .read(|s| (s.root_dir.clone(), s.selected_option().cloned()));

        let (Some(root), Some(option)) = (root, option) else {
            tracing::warn!("Confirm without a root or selection");
            return Ok(());
        };

        let targets = option.targets(self.pipeline.rules().target_files());
        let direction = option.direction();

        let counts = match count_targets(root.clone(), targets.clone()).await? {
            Ok(counts) => counts,
            Err(e) => {
                tracing::error!("Count before {} run failed: {}", direction, e);
                self.state.raise_error(e.to_string());
                return Ok(());
            }
        };
        let total_expected = counts.values().sum();

        self.state.update(|s| {
            for (name, count) in counts {
                s.file_counts.insert(name, count);
            }
        });

        tracing::info!(
            "{} selected: {} run over {} file(s)",
            option.label(),
            direction,
            total_expected
        );

        self.state.begin_run(PipelineRun::new(
            root.clone(),
            targets.clone(),
            direction,
            total_expected,
        ))?;

        self.active = Some(self.pipeline.start(RunRequest {
            root,
            targets,
            direction,
        }));

        Ok(())
    }

    async fn handle_pipeline_event(&mut self, event: Option<PipelineEvent>) {
        match event {
            Some(PipelineEvent::Record(record)) => {
                if let Err(e) = self.state.record_outcome(record) {
                    tracing::warn!("Dropping record: {}", e);
                }
            }
            Some(PipelineEvent::WalkFailed(message)) => {
                tracing::error!("Run aborted by walk failure: {}", message);
                if let Err(e) = self.state.record_walk_failure(message) {
                    tracing::warn!("Dropping walk failure: {}", e);
                }
            }
            None => {
                let Some(run) = self.active.take() else {
                    return;
                };
                let requested = run.is_cancelled();

                let cancelled = match run.join().await {
                    Ok(report) => {
                        tracing::debug!("Worker report: {:?}", report);
                        report.cancelled
                    }
                    Err(e) => {
                        tracing::error!("{:#}", e);
                        requested
                    }
                };

                match self.state.finish_run(cancelled) {
                    Ok(_) => {
                        if let Some(run) = self.state.read(|s| s.run.as_ref().map(|r| r.summary())) {
                            tracing::info!(
                                "Run finished: {} updated, {} skipped, {} failed, cancelled={}",
                                run.updated,
                                run.skipped,
                                run.failed,
                                cancelled
                            );
                        }
                    }
                    Err(e) => tracing::warn!("Cannot finish run: {}", e),
                }
            }
        }
    }

    async fn shutdown(&mut self) {
        if let Some(run) = self.active.take() {
            tracing::warn!("Quitting during a run - cancelling worker");
            run.cancel();
            if let Err(e) = run.join().await {
                tracing::error!("{:#}", e);
            }
        }
    }
}

async fn count_targets(
    root: Utf8PathBuf,
    targets: FileNameSet,
) -> Result<Result<FileCount, ScanError>> {
    tokio::task::spawn_blocking(move || scanner::count_files(&root, Some(&targets)))
        .await
        .context("Counting task panicked")
}
