// UI module - session control loop and front-end seam
//
// This module contains:
// - Frontend: the narrow interface a renderer implements
// - SessionInput: user actions fed into the session
// - SessionController: drives the session from user input and pipeline messages
// - console: a line-oriented plain-text front end used by the binary

pub mod console;
pub mod controller;

use crate::models::SessionState;

pub use console::ConsoleFrontend;
pub use controller::SessionController;

/// User actions accepted by the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInput {
    /// A root directory typed by the user; empty reuses the remembered root
    SubmitRoot(String),
    /// Move the cursor to a menu row (zero-based); rows past the end are ignored
    Select(usize),
    /// Select a menu row and run it, or do nothing when the row does not exist
    Choose(usize),
    CursorUp,
    CursorDown,
    /// Run the option under the cursor
    Confirm,
    /// Stop the active run
    Cancel,
    /// Leave the report
    Back,
    Quit,
}

/// Rendering collaborator.
///
/// Called with the current state after every handled input and pipeline message.
/// Implementations format what they are given and never mutate it.
pub trait Frontend {
    fn render(&mut self, state: &SessionState);
}
