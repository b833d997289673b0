use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;

/// Why a matched file was left untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// The target-state tag is already present
    AlreadyCorrect,
    /// Neither tag of the rule appears in the file
    NoMatchingTag,
}

/// Per-file classification of a transform attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Updated,
    Skipped(SkipReason),
    Error,
}

impl Outcome {
    /// Stable status marker shown by front ends
    pub fn marker(&self) -> &'static str {
        match self {
            Outcome::Updated => "Updated",
            Outcome::Skipped(_) => "Skipped",
            Outcome::Error => "Error",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

/// Result of processing one matched file.
///
/// Records are immutable once built and cross from the pipeline worker to the
/// session by value. Front ends format the three parts but never alter them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeRecord {
    path: Utf8PathBuf,
    outcome: Outcome,
    detail: String,
}

impl OutcomeRecord {
    pub fn updated(path: impl Into<Utf8PathBuf>, from: &str, to: &str) -> Self {
        Self {
            path: path.into(),
            outcome: Outcome::Updated,
            detail: format!("{} -> {}", from, to),
        }
    }

    pub fn already_correct(path: impl Into<Utf8PathBuf>, tag: &str) -> Self {
        Self {
            path: path.into(),
            outcome: Outcome::Skipped(SkipReason::AlreadyCorrect),
            detail: format!("already has {}", tag),
        }
    }

    pub fn no_matching_tag(path: impl Into<Utf8PathBuf>, from: &str, to: &str) -> Self {
        Self {
            path: path.into(),
            outcome: Outcome::Skipped(SkipReason::NoMatchingTag),
            detail: format!("no matching tag (expected {} or {})", from, to),
        }
    }

    pub fn failed(path: impl Into<Utf8PathBuf>, detail: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            outcome: Outcome::Error,
            detail: detail.into(),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub fn is_error(&self) -> bool {
        self.outcome == Outcome::Error
    }
}

impl fmt::Display for OutcomeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.outcome.marker(), self.path, self.detail)
    }
}
