use std::sync::Arc;

use crate::models::{Direction, RuleTable, SkipReason};

/// What the engine decided for one file's content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformOutcome {
    Updated {
        from: String,
        to: String,
        replacements: usize,
    },
    Skipped {
        reason: SkipReason,
        from: String,
        to: String,
    },
}

/// Engine output: new content only when something changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformed {
    pub new_content: Option<Vec<u8>>,
    pub outcome: TransformOutcome,
}

/// Literal tag rewriting keyed by filename.
///
/// The engine works on exact byte sequences, not on parsed XML, so the
/// content may be in any ASCII-compatible encoding. Applying the same
/// direction twice is a no-op the second time: when the target tag is already
/// present the file is reported as skipped and no content is produced.
///
/// Writing the result back is the caller's job.
#[derive(Debug, Clone)]
pub struct TransformEngine {
    rules: Arc<RuleTable>,
}

impl TransformEngine {
    pub fn new(rules: Arc<RuleTable>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    /// Decide and, when needed, perform the substitution for `content`.
    pub fn apply(&self, filename: &str, content: &[u8], direction: Direction) -> Transformed {
        let rule = self.rules.resolve(filename);
        let (from, to) = rule.tags_for(direction);

        if to.is_in(content) {
            return Transformed {
                new_content: None,
                outcome: TransformOutcome::Skipped {
                    reason: SkipReason::AlreadyCorrect,
                    from: from.as_str().to_string(),
                    to: to.as_str().to_string(),
                },
            };
        }

        let replacements = from.count_in(content);
        if replacements == 0 {
            return Transformed {
                new_content: None,
                outcome: TransformOutcome::Skipped {
                    reason: SkipReason::NoMatchingTag,
                    from: from.as_str().to_string(),
                    to: to.as_str().to_string(),
                },
            };
        }

        Transformed {
            new_content: Some(from.replace_all(content, to)),
            outcome: TransformOutcome::Updated {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
                replacements,
            },
        }
    }
}
