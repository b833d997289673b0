use indexmap::{IndexMap, IndexSet};
use regex::{Regex, bytes};
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

use super::config::{RulesConfig, TagPair};

/// Recognized target filenames, kept in menu order.
pub type FileNameSet = IndexSet<String>;

/// Number of on-disk matches per filename, produced by a counting scan.
pub type FileCount = IndexMap<String, usize>;

/// Matches a single literal element such as `<firstLock>true</firstLock>`.
static TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^<([A-Za-z_][A-Za-z0-9_.\-]*)>[^<>]*</([A-Za-z_][A-Za-z0-9_.\-]*)>$")
        .expect("Invalid tag regex")
});

/// Which state a run moves files towards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Lock,
    Unlock,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Lock => write!(f, "lock"),
            Direction::Unlock => write!(f, "unlock"),
        }
    }
}

/// Errors raised while building a rule table
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RuleError {
    #[error("Tag for {0} is empty")]
    EmptyTag(String),

    #[error("Locked and unlocked tags for {0} are identical")]
    IdenticalTags(String),

    #[error("Tag {tag:?} for {name} is not a single <name>value</name> element")]
    MalformedTag { name: String, tag: String },

    #[error("No target files configured")]
    NoTargets,

    #[error("Target file {0} is listed more than once")]
    DuplicateTarget(String),
}

/// A literal tag with a precompiled byte matcher.
///
/// Matching works on raw bytes, so files in any ASCII-compatible encoding
/// are handled without decoding.
#[derive(Debug, Clone)]
pub struct Tag {
    text: String,
    matcher: bytes::Regex,
}

impl Tag {
    fn compile(text: String) -> Result<Self, regex::Error> {
        let matcher = bytes::Regex::new(&regex::escape(&text))?;
        Ok(Self { text, matcher })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_in(&self, content: &[u8]) -> bool {
        self.matcher.is_match(content)
    }

    /// Non-overlapping occurrences, counted left to right.
    pub fn count_in(&self, content: &[u8]) -> usize {
        self.matcher.find_iter(content).count()
    }

    /// Replace every occurrence of this tag with `with`, leaving all other bytes as they are.
    pub fn replace_all(&self, content: &[u8], with: &Tag) -> Vec<u8> {
        self.matcher
            .replace_all(content, bytes::NoExpand(with.text.as_bytes()))
            .into_owned()
    }
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for Tag {}

/// The literal tag pair used for one filename category.
///
/// Invariant: both tags are non-empty and differ from each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformRule {
    locked: Tag,
    unlocked: Tag,
}

impl TransformRule {
    /// Build a rule, rejecting empty, identical or malformed tags.
    ///
    /// `name` is only used to label errors.
    pub fn new(
        name: &str,
        locked_tag: impl Into<String>,
        unlocked_tag: impl Into<String>,
    ) -> Result<Self, RuleError> {
        let locked_tag = locked_tag.into();
        let unlocked_tag = unlocked_tag.into();

        for tag in [&locked_tag, &unlocked_tag] {
            if tag.trim().is_empty() {
                return Err(RuleError::EmptyTag(name.to_string()));
            }
            if !is_well_formed(tag) {
                return Err(RuleError::MalformedTag {
                    name: name.to_string(),
                    tag: tag.clone(),
                });
            }
        }

        if locked_tag == unlocked_tag {
            return Err(RuleError::IdenticalTags(name.to_string()));
        }

        let compile = |tag: String| {
            Tag::compile(tag.clone()).map_err(|_| RuleError::MalformedTag {
                name: name.to_string(),
                tag,
            })
        };

        Ok(Self {
            locked: compile(locked_tag)?,
            unlocked: compile(unlocked_tag)?,
        })
    }

    pub fn locked_tag(&self) -> &str {
        self.locked.as_str()
    }

    pub fn unlocked_tag(&self) -> &str {
        self.unlocked.as_str()
    }

    /// Returns `(from, to)` for a run in the given direction.
    pub fn tags_for(&self, direction: Direction) -> (&Tag, &Tag) {
        match direction {
            Direction::Lock => (&self.unlocked, &self.locked),
            Direction::Unlock => (&self.locked, &self.unlocked),
        }
    }

    fn from_pair(name: &str, pair: &TagPair) -> Result<Self, RuleError> {
        Self::new(name, pair.locked.clone(), pair.unlocked.clone())
    }

    fn builtin(locked_tag: &str, unlocked_tag: &str) -> Self {
        Self::new("built-in rule", locked_tag, unlocked_tag).expect("Invalid built-in rule")
    }
}

fn is_well_formed(tag: &str) -> bool {
    TAG_PATTERN
        .captures(tag)
        .is_some_and(|caps| caps.get(1).map(|m| m.as_str()) == caps.get(2).map(|m| m.as_str()))
}

/// Maps target filenames to their tag pairs, with a default for names
/// that have no explicit entry.
///
/// Constructed once at startup and shared immutably (usually behind an `Arc`).
/// Every name in [`target_files`](Self::target_files) resolves to exactly one rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleTable {
    targets: FileNameSet,
    rules: IndexMap<String, TransformRule>,
    default_rule: TransformRule,
}

impl RuleTable {
    /// Create a table with no explicit rules.
    pub fn new<I, S>(targets: I, default_rule: TransformRule) -> Result<Self, RuleError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = FileNameSet::new();
        for name in targets {
            let name = name.into();
            if !set.insert(name.clone()) {
                return Err(RuleError::DuplicateTarget(name));
            }
        }

        if set.is_empty() {
            return Err(RuleError::NoTargets);
        }

        Ok(Self {
            targets: set,
            rules: IndexMap::new(),
            default_rule,
        })
    }

    /// Add or replace the explicit rule for `filename`.
    pub fn with_rule(mut self, filename: impl Into<String>, rule: TransformRule) -> Self {
        self.rules.insert(filename.into(), rule);
        self
    }

    /// Build a validated table from the YAML rules file.
    pub fn from_config(config: &RulesConfig) -> Result<Self, RuleError> {
        let data = &config.rules;
        let default_rule = TransformRule::from_pair("default rule", &data.default_rule)?;
        let mut table = Self::new(data.target_files.iter().cloned(), default_rule)?;

        for (name, pair) in &data.rules {
            if !table.targets.contains(name) {
                tracing::warn!("Rule for {} has no matching target file", name);
            }
            let rule = TransformRule::from_pair(name, pair)?;
            table = table.with_rule(name.clone(), rule);
        }

        Ok(table)
    }

    /// Resolve the rule for a filename, falling back to the default rule.
    pub fn resolve(&self, filename: &str) -> &TransformRule {
        self.rules.get(filename).unwrap_or(&self.default_rule)
    }

    pub fn has_explicit_rule(&self, filename: &str) -> bool {
        self.rules.contains_key(filename)
    }

    pub fn target_files(&self) -> &FileNameSet {
        &self.targets
    }

    pub fn default_rule(&self) -> &TransformRule {
        &self.default_rule
    }

    /// Explicit rules in declaration order.
    pub fn explicit_rules(&self) -> impl Iterator<Item = (&str, &TransformRule)> {
        self.rules.iter().map(|(name, rule)| (name.as_str(), rule))
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        let targets = [
            "Music.xml",
            "Event.xml",
            "Chara.xml",
            "NamePlate.xml",
            "AvatarAccessory.xml",
            "Trophy.xml",
            "MapIcon.xml",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        let mut rules = IndexMap::new();
        rules.insert(
            "Music.xml".to_string(),
            TransformRule::builtin("<firstLock>true</firstLock>", "<firstLock>false</firstLock>"),
        );
        rules.insert(
            "Event.xml".to_string(),
            TransformRule::builtin("<alwaysOpen>false</alwaysOpen>", "<alwaysOpen>true</alwaysOpen>"),
        );

        Self {
            targets,
            rules,
            default_rule: TransformRule::builtin(
                "<defaultHave>false</defaultHave>",
                "<defaultHave>true</defaultHave>",
            ),
        }
    }
}
