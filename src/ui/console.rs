// Console front end - line-oriented plain-text rendering and input parsing

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;

use super::{Frontend, SessionInput};
use crate::models::{SessionState, SessionView};
use crate::state::StateManager;

/// What was last drawn, so repeated renders of the same state print nothing new.
#[derive(Debug, Clone, PartialEq, Default)]
struct Drawn {
    view: Option<SessionView>,
    cursor: usize,
    error: Option<String>,
    records: usize,
}

/// Plain-text renderer writing to any [`Write`] sink.
///
/// Processing output is incremental: each render prints only the records
/// that arrived since the previous one.
pub struct ConsoleFrontend<W: Write> {
    out: W,
    drawn: Drawn,
}

impl ConsoleFrontend<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> ConsoleFrontend<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            drawn: Drawn::default(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn draw(&mut self, state: &SessionState) -> io::Result<()> {
        let view_changed = self.drawn.view != Some(state.view);

        match state.view {
            SessionView::AwaitingRoot => {
                if view_changed || self.drawn.error != state.last_error {
                    self.draw_error(state)?;
                    writeln!(self.out, "Enter the root directory (empty reuses the last one, q quits):")?;
                }
            }
            SessionView::Selecting => {
                if view_changed
                    || self.drawn.cursor != state.cursor
                    || self.drawn.error != state.last_error
                {
                    self.draw_menu(state)?;
                }
            }
            SessionView::Processing => {
                if view_changed {
                    self.drawn.records = 0;
                    if let Some(run) = &state.run {
                        writeln!(
                            self.out,
                            "Running {} over {} file(s) in {} (c cancels, q quits)",
                            run.direction, run.total_expected, run.root_dir
                        )?;
                    }
                }
                self.draw_new_records(state)?;
            }
            SessionView::Report => {
                if view_changed {
                    self.draw_new_records(state)?;
                    self.draw_report(state)?;
                }
            }
        }

        self.drawn.view = Some(state.view);
        self.drawn.cursor = state.cursor;
        self.drawn.error = state.last_error.clone();
        self.out.flush()
    }

    fn draw_error(&mut self, state: &SessionState) -> io::Result<()> {
        if let Some(error) = &state.last_error {
            writeln!(self.out, "! {}", error)?;
        }
        Ok(())
    }

    fn draw_menu(&mut self, state: &SessionState) -> io::Result<()> {
        writeln!(self.out)?;
        if let Some(root) = &state.root_dir {
            writeln!(self.out, "Root: {} ({} matching file(s))", root, state.total_files())?;
        }
        for (index, option) in state.menu.iter().enumerate() {
            let pointer = if index == state.cursor { '>' } else { ' ' };
            match state.count_for(option) {
                Some(count) => writeln!(
                    self.out,
                    "{} {:>2}. {:<24} {:>5}",
                    pointer,
                    index + 1,
                    option.label(),
                    count
                )?,
                None => writeln!(self.out, "{} {:>2}. {}", pointer, index + 1, option.label())?,
            }
        }
        self.draw_error(state)?;
        writeln!(self.out, "Number runs an option, Enter runs the highlighted one, k/j move, q quits:")
    }

    fn draw_new_records(&mut self, state: &SessionState) -> io::Result<()> {
        let Some(run) = &state.run else {
            return Ok(());
        };
        for (index, record) in run.records.iter().enumerate().skip(self.drawn.records) {
            writeln!(
                self.out,
                "[{:>3.0}%] {}",
                progress_at(index + 1, run.total_expected) * 100.0,
                record
            )?;
        }
        self.drawn.records = run.records.len();
        Ok(())
    }

    fn draw_report(&mut self, state: &SessionState) -> io::Result<()> {
        let Some(run) = &state.run else {
            return Ok(());
        };
        let summary = run.summary();

        writeln!(self.out)?;
        if run.cancelled {
            writeln!(self.out, "Run cancelled after {} file(s)", run.processed_count)?;
        }
        if let Some(failure) = &run.failure {
            writeln!(self.out, "! Walk failed: {}", failure)?;
        }
        writeln!(
            self.out,
            "Done: {} updated, {} skipped, {} failed",
            summary.updated, summary.skipped, summary.failed
        )?;
        writeln!(self.out, "b returns to the menu, q quits:")
    }
}

/// Share of the expected files done once `count` records are in.
///
/// Capped at 1.0 for trees that grew after counting.
fn progress_at(count: usize, total_expected: usize) -> f64 {
    if total_expected == 0 {
        return 1.0;
    }
    (count as f64 / total_expected as f64).min(1.0)
}

impl<W: Write> Frontend for ConsoleFrontend<W> {
    fn render(&mut self, state: &SessionState) {
        if let Err(e) = self.draw(state) {
            tracing::warn!("Console output failed: {}", e);
        }
    }
}

/// Map one input line to session inputs for the given view.
///
/// Menu numbers are one-based; `N` chooses row N, which runs it.
pub fn parse_line(view: SessionView, line: &str) -> Vec<SessionInput> {
    let line = line.trim();

    if line.eq_ignore_ascii_case("q") {
        return vec![SessionInput::Quit];
    }

    match view {
        SessionView::AwaitingRoot => vec![SessionInput::SubmitRoot(line.to_string())],
        SessionView::Selecting => match line {
            "" => vec![SessionInput::Confirm],
            "k" => vec![SessionInput::CursorUp],
            "j" => vec![SessionInput::CursorDown],
            other => match other.parse::<usize>() {
                Ok(number) if number > 0 => vec![SessionInput::Choose(number - 1)],
                _ => Vec::new(),
            },
        },
        SessionView::Processing => match line {
            "c" => vec![SessionInput::Cancel],
            _ => Vec::new(),
        },
        SessionView::Report => match line {
            "b" => vec![SessionInput::Back],
            _ => Vec::new(),
        },
    }
}

/// Read stdin lines on a dedicated thread.
///
/// The thread ends at EOF or once the receiving side is gone.
pub fn spawn_stdin_reader(tx: mpsc::Sender<String>) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to read input: {}", e);
                        break;
                    }
                }
            }
            tracing::debug!("Stdin reader finished");
        })
}

/// Translate raw lines into session inputs using the view current at arrival.
///
/// Returns when either channel closes; dropping `inputs` tells the controller to quit.
pub async fn forward_input(
    mut lines: mpsc::Receiver<String>,
    state: Arc<StateManager>,
    inputs: mpsc::Sender<SessionInput>,
) {
    while let Some(line) = lines.recv().await {
        let view = state.read(|s| s.view);
        for input in parse_line(view, &line) {
            if inputs.send(input).await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Direction, FileCount, FileNameSet, MenuOption, OutcomeRecord, PipelineRun,
    };
    use camino::Utf8PathBuf;

    fn selecting_state() -> SessionState {
        let targets: FileNameSet = ["Music.xml", "Event.xml"].into_iter().map(String::from).collect();
        let mut counts = FileCount::new();
        counts.insert("Music.xml".to_string(), 3);
        counts.insert("Event.xml".to_string(), 2);

        SessionState {
            view: SessionView::Selecting,
            root_dir: Some(Utf8PathBuf::from("/data")),
            file_counts: counts,
            menu: MenuOption::menu_for(&targets),
            ..SessionState::default()
        }
    }

    fn rendered(frontend: ConsoleFrontend<Vec<u8>>) -> String {
        String::from_utf8(frontend.into_inner()).unwrap()
    }

    #[test]
    fn test_parse_root_line() {
        assert_eq!(
            parse_line(SessionView::AwaitingRoot, "  /srv/game  \n"),
            vec![SessionInput::SubmitRoot("/srv/game".to_string())]
        );
        assert_eq!(
            parse_line(SessionView::AwaitingRoot, ""),
            vec![SessionInput::SubmitRoot(String::new())]
        );
        assert_eq!(parse_line(SessionView::AwaitingRoot, "q"), vec![SessionInput::Quit]);
    }

    #[test]
    fn test_parse_selection_lines() {
        assert_eq!(
            parse_line(SessionView::Selecting, "2"),
            vec![SessionInput::Choose(1)]
        );
        assert_eq!(
            parse_line(SessionView::Selecting, "42"),
            vec![SessionInput::Choose(41)]
        );
        assert_eq!(parse_line(SessionView::Selecting, ""), vec![SessionInput::Confirm]);
        assert_eq!(parse_line(SessionView::Selecting, "k"), vec![SessionInput::CursorUp]);
        assert_eq!(parse_line(SessionView::Selecting, "j"), vec![SessionInput::CursorDown]);
        assert!(parse_line(SessionView::Selecting, "0").is_empty());
        assert!(parse_line(SessionView::Selecting, "abc").is_empty());
    }

    #[test]
    fn test_parse_processing_and_report_lines() {
        assert_eq!(parse_line(SessionView::Processing, "c"), vec![SessionInput::Cancel]);
        assert_eq!(parse_line(SessionView::Processing, "Q"), vec![SessionInput::Quit]);
        assert!(parse_line(SessionView::Processing, "b").is_empty());
        assert_eq!(parse_line(SessionView::Report, "b"), vec![SessionInput::Back]);
        assert!(parse_line(SessionView::Report, "c").is_empty());
    }

    #[test]
    fn test_render_menu_with_counts() {
        let mut frontend = ConsoleFrontend::new(Vec::new());
        frontend.render(&selecting_state());

        let output = rendered(frontend);
        assert!(output.contains("Root: /data (5 matching file(s))"));
        assert!(output.contains(">  1. Music.xml"));
        assert!(output.contains("   2. Event.xml"));
        assert!(output.contains("   3. Unlock all"));
        assert!(output.contains("   4. Relock all"));
    }

    #[test]
    fn test_render_same_state_twice_prints_once() {
        let state = selecting_state();
        let mut frontend = ConsoleFrontend::new(Vec::new());
        frontend.render(&state);
        frontend.render(&state);

        let output = rendered(frontend);
        assert_eq!(output.matches("Unlock all").count(), 1);
    }

    #[test]
    fn test_render_records_incrementally_then_report() {
        let mut state = selecting_state();
        let mut run = PipelineRun::new(
            Utf8PathBuf::from("/data"),
            FileNameSet::from(["Music.xml".to_string()]),
            Direction::Unlock,
            2,
        );
        run.push_record(OutcomeRecord::updated(
            Utf8PathBuf::from("/data/a/Music.xml"),
            "<firstLock>true</firstLock>",
            "<firstLock>false</firstLock>",
        ));
        state.view = SessionView::Processing;
        state.run = Some(run);

        let mut frontend = ConsoleFrontend::new(Vec::new());
        frontend.render(&state);
        frontend.render(&state);

        if let Some(run) = state.run.as_mut() {
            run.push_record(OutcomeRecord::failed(
                Utf8PathBuf::from("/data/b/Music.xml"),
                "failed to read file: denied",
            ));
            run.finished = true;
        }
        state.view = SessionView::Report;
        frontend.render(&state);

        let output = rendered(frontend);
        assert_eq!(output.matches("/data/a/Music.xml").count(), 1);
        assert!(output.contains(
            "Updated /data/a/Music.xml: <firstLock>true</firstLock> -> <firstLock>false</firstLock>"
        ));
        assert!(output.contains("Error /data/b/Music.xml: failed to read file: denied"));
        assert!(output.contains("Done: 1 updated, 0 skipped, 1 failed"));
    }

    #[test]
    fn test_records_in_one_batch_get_their_own_percentage() {
        let mut state = selecting_state();
        let mut run = PipelineRun::new(
            Utf8PathBuf::from("/data"),
            FileNameSet::from(["Music.xml".to_string()]),
            Direction::Unlock,
            4,
        );
        for dir in ["a", "b", "c"] {
            run.push_record(OutcomeRecord::already_correct(
                Utf8PathBuf::from(format!("/data/{}/Music.xml", dir)),
                "<firstLock>false</firstLock>",
            ));
        }
        state.view = SessionView::Processing;
        state.run = Some(run);

        let mut frontend = ConsoleFrontend::new(Vec::new());
        frontend.render(&state);

        let output = rendered(frontend);
        let percents: Vec<&str> = output
            .lines()
            .filter(|line| line.starts_with('['))
            .map(|line| &line[..6])
            .collect();
        assert_eq!(percents, vec!["[ 25%]", "[ 50%]", "[ 75%]"]);
    }

    #[test]
    fn test_progress_capped_for_grown_tree() {
        assert_eq!(progress_at(3, 2), 1.0);
        assert_eq!(progress_at(1, 0), 1.0);
        assert_eq!(progress_at(1, 4), 0.25);
    }

    #[test]
    fn test_render_error_in_selection() {
        let mut state = selecting_state();
        let mut frontend = ConsoleFrontend::new(Vec::new());
        frontend.render(&state);

        state.last_error = Some("Root directory not found: /data".to_string());
        frontend.render(&state);

        let output = rendered(frontend);
        assert!(output.contains("! Root directory not found: /data"));
    }

    #[tokio::test]
    async fn test_forward_input_uses_current_view() {
        let state = Arc::new(StateManager::new());
        let (line_tx, line_rx) = mpsc::channel(4);
        let (input_tx, mut input_rx) = mpsc::channel(4);

        let forward = tokio::spawn(forward_input(line_rx, Arc::clone(&state), input_tx));

        line_tx.send("/srv/game".to_string()).await.unwrap();
        assert_eq!(
            input_rx.recv().await,
            Some(SessionInput::SubmitRoot("/srv/game".to_string()))
        );

        drop(line_tx);
        forward.await.unwrap();
        assert_eq!(input_rx.recv().await, None);
    }
}
