use camino::Utf8PathBuf;
use std::fmt;
use thiserror::Error;

use super::outcome::{Outcome, OutcomeRecord};
use super::rules::{Direction, FileCount, FileNameSet};

/// Views of the interactive session.
///
/// `AwaitingRoot` is the initial view. There is no terminal view: quitting
/// ends the control loop from any view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionView {
    AwaitingRoot,
    Selecting,
    Processing,
    Report,
}

/// Events that move the session between views
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    RootAccepted,
    RunStarted,
    RecordReceived,
    ChannelClosed,
    Back,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Cannot apply {event:?} while in {from}")]
pub struct TransitionError {
    pub from: SessionView,
    pub event: SessionEvent,
}

impl SessionView {
    /// The transition table.
    pub fn next(self, event: SessionEvent) -> Result<SessionView, TransitionError> {
        use SessionEvent::*;
        use SessionView::*;

        match (self, event) {
            (AwaitingRoot, RootAccepted) => Ok(Selecting),
            (Selecting, RunStarted) => Ok(Processing),
            (Processing, RecordReceived) => Ok(Processing),
            (Processing, ChannelClosed) => Ok(Report),
            (Report, Back) => Ok(Selecting),
            (from, event) => Err(TransitionError { from, event }),
        }
    }
}

impl fmt::Display for SessionView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionView::AwaitingRoot => "awaiting root",
            SessionView::Selecting => "selecting",
            SessionView::Processing => "processing",
            SessionView::Report => "report",
        };
        f.write_str(name)
    }
}

/// One row of the selection menu
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuOption {
    /// Unlock every copy of a single target file
    File(String),
    UnlockAll,
    RelockAll,
}

impl MenuOption {
    /// Build the menu: one row per target file followed by the two bulk actions.
    pub fn menu_for(targets: &FileNameSet) -> Vec<MenuOption> {
        targets
            .iter()
            .cloned()
            .map(MenuOption::File)
            .chain([MenuOption::UnlockAll, MenuOption::RelockAll])
            .collect()
    }

    pub fn targets(&self, all: &FileNameSet) -> FileNameSet {
        match self {
            MenuOption::File(name) => FileNameSet::from([name.clone()]),
            MenuOption::UnlockAll | MenuOption::RelockAll => all.clone(),
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            MenuOption::File(_) | MenuOption::UnlockAll => Direction::Unlock,
            MenuOption::RelockAll => Direction::Lock,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            MenuOption::File(name) => name,
            MenuOption::UnlockAll => "Unlock all",
            MenuOption::RelockAll => "Relock all",
        }
    }
}

/// Counts of each outcome kind in a finished or running run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// State of one processing run, owned by the session.
///
/// Only the session mutates it, one pipeline message at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRun {
    pub root_dir: Utf8PathBuf,
    pub target_files: FileNameSet,
    pub direction: Direction,
    /// Match count from the counting scan; sizes the progress indicator only
    pub total_expected: usize,
    pub processed_count: usize,
    pub records: Vec<OutcomeRecord>,
    pub finished: bool,
    pub cancelled: bool,
    /// Set when the walk itself failed mid-run
    pub failure: Option<String>,
}

impl PipelineRun {
    pub fn new(
        root_dir: Utf8PathBuf,
        target_files: FileNameSet,
        direction: Direction,
        total_expected: usize,
    ) -> Self {
        Self {
            root_dir,
            target_files,
            direction,
            total_expected,
            processed_count: 0,
            records: Vec::new(),
            finished: false,
            cancelled: false,
            failure: None,
        }
    }

    pub fn push_record(&mut self, record: OutcomeRecord) {
        self.records.push(record);
        self.processed_count += 1;
    }

    pub fn summary(&self) -> RunSummary {
        self.records
            .iter()
            .fold(RunSummary::default(), |mut acc, record| {
                match record.outcome() {
                    Outcome::Updated => acc.updated += 1,
                    Outcome::Skipped(_) => acc.skipped += 1,
                    Outcome::Error => acc.failed += 1,
                }
                acc
            })
    }

    /// Progress in `0.0..=1.0`.
    ///
    /// The tree may change between the count and the walk, so the ratio is clamped.
    pub fn progress_fraction(&self) -> f64 {
        if self.total_expected == 0 {
            return if self.finished { 1.0 } else { 0.0 };
        }
        (self.processed_count as f64 / self.total_expected as f64).min(1.0)
    }
}

/// Everything a front end needs to draw the session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub view: SessionView,
    pub root_dir: Option<Utf8PathBuf>,
    pub file_counts: FileCount,
    pub menu: Vec<MenuOption>,
    pub cursor: usize,
    pub run: Option<PipelineRun>,
    pub last_error: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            view: SessionView::AwaitingRoot,
            root_dir: None,
            file_counts: FileCount::new(),
            menu: Vec::new(),
            cursor: 0,
            run: None,
            last_error: None,
        }
    }
}

impl SessionState {
    pub fn selected_option(&self) -> Option<&MenuOption> {
        self.menu.get(self.cursor)
    }

    /// On-disk count shown next to a menu row; bulk rows have none.
    pub fn count_for(&self, option: &MenuOption) -> Option<usize> {
        match option {
            MenuOption::File(name) => Some(self.file_counts.get(name).copied().unwrap_or(0)),
            _ => None,
        }
    }

    pub fn total_files(&self) -> usize {
        self.file_counts.values().sum()
    }

    pub fn is_processing(&self) -> bool {
        self.view == SessionView::Processing
    }
}
