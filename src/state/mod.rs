// State management module
//
// This module provides the StateManager which wraps SessionState with thread-safe access
// using Arc<RwLock<T>> and emits change events for front ends and observers.

use crate::models::{
    Direction, FileCount, MenuOption, OutcomeRecord, PipelineRun, RunSummary, SessionEvent,
    SessionState, SessionView, TransitionError,
};
use camino::Utf8PathBuf;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

/// Change events emitted when session state is modified
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    /// The session moved to another view
    ViewChanged { from: SessionView, to: SessionView },

    /// File counts were (re)computed for the current root
    CountsUpdated { total_files: usize },

    /// The menu cursor moved
    CursorMoved { index: usize },

    /// A processing run has started
    RunStarted {
        direction: Direction,
        total_expected: usize,
    },

    /// A record arrived from the pipeline
    ProgressUpdated { processed: usize, total: usize },

    /// A record was appended to the active run
    RecordAppended { record: OutcomeRecord },

    /// The active run's channel closed
    RunFinished {
        summary: RunSummary,
        cancelled: bool,
        failure: Option<String>,
    },

    /// A recoverable error should be shown to the user
    ErrorRaised { message: String },

    /// State has been reset
    StateReset,
}

/// The few fields change detection looks at.
///
/// Comparing these instead of cloning the whole state keeps per-record
/// updates independent of the number of records already collected.
#[derive(Clone, Debug, PartialEq)]
struct Fingerprint {
    view: SessionView,
    total_files: usize,
    root_dir: Option<Utf8PathBuf>,
    cursor: usize,
    processed: usize,
    total_expected: usize,
    finished: bool,
    last_error: Option<String>,
}

impl Fingerprint {
    fn of(state: &SessionState) -> Self {
        Self {
            view: state.view,
            total_files: state.total_files(),
            root_dir: state.root_dir.clone(),
            cursor: state.cursor,
            processed: state.run.as_ref().map_or(0, |r| r.processed_count),
            total_expected: state.run.as_ref().map_or(0, |r| r.total_expected),
            finished: state.run.as_ref().is_some_and(|r| r.finished),
            last_error: state.last_error.clone(),
        }
    }
}

/// Thread-safe session state with event emission
///
/// The session controller is the only writer; front ends and tests read
/// snapshots or subscribe to [`StateChange`] events.
///
/// View changes go through [`SessionView::next`], so every mutating method
/// that changes views returns a [`TransitionError`] for an illegal move and
/// leaves the state untouched in that case.
pub struct StateManager {
    state: Arc<RwLock<SessionState>>,

    /// Broadcast channel for emitting state change events
    state_tx: broadcast::Sender<StateChange>,
}

impl StateManager {
    /// Create a new StateManager in the `AwaitingRoot` view
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(256);
        Self {
            state: Arc::new(RwLock::new(SessionState::default())),
            state_tx,
        }
    }

    /// Clone of the current state
    pub fn snapshot(&self) -> SessionState {
        self.state.read().expect("session state lock poisoned").clone()
    }

    /// Execute a function with read access to the state
    ///
    /// # Example
    /// ```ignore
    /// let view = state_manager.read(|state| state.view);
    /// ```
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&SessionState) -> R,
    {
        let state = self.state.read().expect("session state lock poisoned");
        f(&state)
    }

    /// Mutate the state and emit the resulting change events
    pub fn update<F>(&self, update_fn: F) -> Vec<StateChange>
    where
        F: FnOnce(&mut SessionState),
    {
        self.try_update(|state| {
            update_fn(state);
            Ok::<(), std::convert::Infallible>(())
        })
        .unwrap_or_else(|never| match never {})
    }

    /// Mutate the state if `update_fn` succeeds.
    ///
    /// `update_fn` must validate before it mutates: on `Err` nothing is emitted
    /// and the state is expected to be unchanged.
    pub fn try_update<F, E>(&self, update_fn: F) -> Result<Vec<StateChange>, E>
    where
        F: FnOnce(&mut SessionState) -> Result<(), E>,
    {
        let mut state = self.state.write().expect("session state lock poisoned");
        let old = Fingerprint::of(&state);

        update_fn(&mut state)?;

        let changes = Self::detect_changes(&old, &state);
        for change in &changes {
            // Ignore send errors - it's OK if no one is listening
            let _ = self.state_tx.send(change.clone());
        }

        Ok(changes)
    }

    /// Subscribe to state change events
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    fn detect_changes(old: &Fingerprint, state: &SessionState) -> Vec<StateChange> {
        let new = Fingerprint::of(state);
        let mut changes = Vec::new();

        if old.view != new.view {
            changes.push(StateChange::ViewChanged {
                from: old.view,
                to: new.view,
            });
        }

        if old.total_files != new.total_files || old.root_dir != new.root_dir {
            changes.push(StateChange::CountsUpdated {
                total_files: new.total_files,
            });
        }

        if old.cursor != new.cursor {
            changes.push(StateChange::CursorMoved { index: new.cursor });
        }

        if old.processed != new.processed || old.total_expected != new.total_expected {
            changes.push(StateChange::ProgressUpdated {
                processed: new.processed,
                total: new.total_expected,
            });
        }

        if !old.finished && new.finished {
            if let Some(run) = &state.run {
                changes.push(StateChange::RunFinished {
                    summary: run.summary(),
                    cancelled: run.cancelled,
                    failure: run.failure.clone(),
                });
            }
        }

        if old.last_error != new.last_error {
            if let Some(message) = &new.last_error {
                changes.push(StateChange::ErrorRaised {
                    message: message.clone(),
                });
            }
        }

        changes
    }

    fn emit(&self, mut changes: Vec<StateChange>, extra: StateChange) -> Vec<StateChange> {
        let _ = self.state_tx.send(extra.clone());
        changes.push(extra);
        changes
    }

    // Transitions

    /// `AwaitingRoot → Selecting` with the counts of the accepted root
    pub fn accept_root(
        &self,
        root: Utf8PathBuf,
        counts: FileCount,
        menu: Vec<MenuOption>,
    ) -> Result<Vec<StateChange>, TransitionError> {
        self.try_update(move |state| {
            state.view = state.view.next(SessionEvent::RootAccepted)?;
            state.root_dir = Some(root);
            state.file_counts = counts;
            state.menu = menu;
            state.cursor = 0;
            state.last_error = None;
            Ok(())
        })
    }

    /// Move the menu cursor, clamped to the menu. No-op outside `Selecting`.
    pub fn set_cursor(&self, index: usize) -> Vec<StateChange> {
        self.update(|state| {
            if state.view == SessionView::Selecting && !state.menu.is_empty() {
                state.cursor = index.min(state.menu.len() - 1);
            }
        })
    }

    /// `Selecting → Processing`, installing the new run
    pub fn begin_run(&self, run: PipelineRun) -> Result<Vec<StateChange>, TransitionError> {
        let started = StateChange::RunStarted {
            direction: run.direction,
            total_expected: run.total_expected,
        };

        let changes = self.try_update(move |state| {
            state.view = state.view.next(SessionEvent::RunStarted)?;
            state.run = Some(run);
            state.last_error = None;
            Ok(())
        })?;

        Ok(self.emit(changes, started))
    }

    /// Append one record to the active run
    pub fn record_outcome(
        &self,
        record: OutcomeRecord,
    ) -> Result<Vec<StateChange>, TransitionError> {
        let appended = StateChange::RecordAppended {
            record: record.clone(),
        };

        let changes = self.try_update(move |state| {
            state.view = state.view.next(SessionEvent::RecordReceived)?;
            if let Some(run) = state.run.as_mut() {
                run.push_record(record);
            }
            Ok(())
        })?;

        Ok(self.emit(changes, appended))
    }

    /// Note a walk failure on the active run; the run still ends on channel close
    pub fn record_walk_failure(&self, message: String) -> Result<Vec<StateChange>, TransitionError> {
        self.try_update(move |state| {
            state.view.next(SessionEvent::RecordReceived)?;
            if let Some(run) = state.run.as_mut() {
                run.failure = Some(message);
            }
            Ok(())
        })
    }

    /// `Processing → Report` once the worker's channel has closed
    pub fn finish_run(&self, cancelled: bool) -> Result<Vec<StateChange>, TransitionError> {
        self.try_update(move |state| {
            state.view = state.view.next(SessionEvent::ChannelClosed)?;
            if let Some(run) = state.run.as_mut() {
                run.finished = true;
                run.cancelled = cancelled;
            }
            Ok(())
        })
    }

    /// `Report → Selecting`, discarding the finished run
    pub fn back_to_selection(&self) -> Result<Vec<StateChange>, TransitionError> {
        self.try_update(|state| {
            state.view = state.view.next(SessionEvent::Back)?;
            state.run = None;
            Ok(())
        })
    }

    /// Record a recoverable error for display
    pub fn raise_error(&self, message: impl Into<String>) -> Vec<StateChange> {
        let message = message.into();
        self.update(|state| {
            state.last_error = Some(message);
        })
    }

    /// Return to a fresh `AwaitingRoot` session
    pub fn reset(&self) -> Vec<StateChange> {
        let changes = self.update(|state| {
            *state = SessionState::default();
        });
        self.emit(changes, StateChange::StateReset)
    }

    /// Get an Arc reference to the state for use in other threads
    pub fn state_arc(&self) -> Arc<RwLock<SessionState>> {
        Arc::clone(&self.state)
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for StateManager {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            state_tx: self.state_tx.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileNameSet, RuleTable};

    fn selecting_manager() -> StateManager {
        let manager = StateManager::new();
        let targets = RuleTable::default().target_files().clone();
        let mut counts = FileCount::new();
        counts.insert("Music.xml".to_string(), 2);

        manager
            .accept_root("/data".into(), counts, MenuOption::menu_for(&targets))
            .unwrap();
        manager
    }

    fn run(total: usize) -> PipelineRun {
        let targets: FileNameSet = ["Music.xml".to_string()].into_iter().collect();
        PipelineRun::new("/data".into(), targets, Direction::Unlock, total)
    }

    #[test]
    fn test_new_state_manager() {
        let manager = StateManager::new();
        let state = manager.snapshot();

        assert_eq!(state.view, SessionView::AwaitingRoot);
        assert!(state.run.is_none());
        assert!(state.menu.is_empty());
    }

    #[test]
    fn test_accept_root_emits_view_and_counts() {
        let manager = StateManager::new();
        let changes = manager
            .accept_root("/data".into(), FileCount::new(), vec![MenuOption::UnlockAll])
            .unwrap();

        assert_eq!(
            changes[0],
            StateChange::ViewChanged {
                from: SessionView::AwaitingRoot,
                to: SessionView::Selecting
            }
        );
        assert!(matches!(changes[1], StateChange::CountsUpdated { total_files: 0 }));
    }

    #[test]
    fn test_illegal_transition_leaves_state_untouched() {
        let manager = StateManager::new();
        let mut rx = manager.subscribe();

        let err = manager.begin_run(run(1)).unwrap_err();

        assert_eq!(err.from, SessionView::AwaitingRoot);
        assert!(manager.snapshot().run.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_cursor_clamped() {
        let manager = selecting_manager();
        let menu_len = manager.read(|s| s.menu.len());

        let changes = manager.set_cursor(100);
        assert_eq!(changes, vec![StateChange::CursorMoved { index: menu_len - 1 }]);

        assert!(manager.set_cursor(menu_len - 1).is_empty());
    }

    #[test]
    fn test_cursor_ignored_outside_selecting() {
        let manager = StateManager::new();
        assert!(manager.set_cursor(3).is_empty());
        assert_eq!(manager.read(|s| s.cursor), 0);
    }

    #[test]
    fn test_full_run_lifecycle() {
        let manager = selecting_manager();

        let changes = manager.begin_run(run(2)).unwrap();
        assert!(changes.iter().any(|c| matches!(c, StateChange::RunStarted { total_expected: 2, .. })));

        let changes = manager
            .record_outcome(OutcomeRecord::updated("/data/Music.xml", "<a>1</a>", "<a>0</a>"))
            .unwrap();
        assert!(changes.contains(&StateChange::ProgressUpdated { processed: 1, total: 2 }));
        assert!(changes.iter().any(|c| matches!(c, StateChange::RecordAppended { .. })));

        let changes = manager.finish_run(false).unwrap();
        assert!(changes.iter().any(|c| matches!(
            c,
            StateChange::RunFinished { summary: RunSummary { updated: 1, .. }, cancelled: false, .. }
        )));

        let state = manager.snapshot();
        assert_eq!(state.view, SessionView::Report);
        let run = state.run.unwrap();
        assert_eq!(run.processed_count, run.records.len());
        assert!(run.finished);

        manager.back_to_selection().unwrap();
        let state = manager.snapshot();
        assert_eq!(state.view, SessionView::Selecting);
        assert!(state.run.is_none());
    }

    #[test]
    fn test_records_rejected_outside_processing() {
        let manager = selecting_manager();
        let record = OutcomeRecord::failed("/data/Music.xml", "boom");

        assert!(manager.record_outcome(record).is_err());
        assert!(manager.finish_run(false).is_err());
    }

    #[test]
    fn test_walk_failure_reported_on_finish() {
        let manager = selecting_manager();
        manager.begin_run(run(1)).unwrap();
        manager.record_walk_failure("walk broke".to_string()).unwrap();

        let changes = manager.finish_run(false).unwrap();
        assert!(changes.iter().any(|c| matches!(
            c,
            StateChange::RunFinished { failure: Some(msg), .. } if msg == "walk broke"
        )));
    }

    #[test]
    fn test_raise_error_and_reset() {
        let manager = selecting_manager();

        let changes = manager.raise_error("count failed");
        assert_eq!(
            changes,
            vec![StateChange::ErrorRaised {
                message: "count failed".to_string()
            }]
        );

        let changes = manager.reset();
        assert!(changes.contains(&StateChange::StateReset));
        assert_eq!(manager.snapshot(), SessionState::default());
    }

    #[test]
    fn test_subscribe_to_changes() {
        let manager = StateManager::new();
        let mut rx = manager.subscribe();

        manager
            .accept_root("/data".into(), FileCount::new(), Vec::new())
            .unwrap();

        assert!(matches!(rx.try_recv(), Ok(StateChange::ViewChanged { .. })));
    }

    #[test]
    fn test_clone_shares_state() {
        let manager1 = StateManager::new();
        let manager2 = manager1.clone();

        manager1
            .accept_root("/data".into(), FileCount::new(), Vec::new())
            .unwrap();

        assert_eq!(manager2.read(|s| s.view), SessionView::Selecting);
    }
}
