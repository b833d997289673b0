use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::rules::RuleTable;

/// Rule configuration from Unlocker Rules.yaml
///
/// Lists the target files in menu order and the tag pair used for each.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(rename = "Unlocker_Rules")]
    pub rules: RulesData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesData {
    pub version: String,

    #[serde(rename = "Target_Files")]
    pub target_files: Vec<String>,

    #[serde(rename = "Rules", default)]
    pub rules: IndexMap<String, TagPair>,

    #[serde(rename = "Default_Rule")]
    pub default_rule: TagPair,
}

/// A locked/unlocked tag literal pair as written in YAML
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagPair {
    pub locked: String,
    pub unlocked: String,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self::from(&RuleTable::default())
    }
}

impl From<&RuleTable> for RulesConfig {
    fn from(table: &RuleTable) -> Self {
        let pair = |rule: &super::rules::TransformRule| TagPair {
            locked: rule.locked_tag().to_string(),
            unlocked: rule.unlocked_tag().to_string(),
        };

        Self {
            rules: RulesData {
                version: "1.0.0".to_string(),
                target_files: table.target_files().iter().cloned().collect(),
                rules: table
                    .explicit_rules()
                    .map(|(name, rule)| (name.to_string(), pair(rule)))
                    .collect(),
                default_rule: pair(table.default_rule()),
            },
        }
    }
}

/// User settings from Unlocker Settings.yaml
///
/// Every key can be overridden through `UNLOCKER_SETTINGS__<KEY>` environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub settings: Settings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub debug_mode: bool,
    pub console_logging: bool,
    pub log_dir: String,
    /// Capacity of the worker → session channel
    pub channel_capacity: usize,
    /// Root directory accepted in the previous session
    pub last_root: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug_mode: false,
            console_logging: false,
            log_dir: "logs".to_string(),
            channel_capacity: default_channel_capacity(),
            last_root: String::new(),
        }
    }
}

fn default_channel_capacity() -> usize {
    16
}

impl Settings {
    /// Channel capacity clamped to at least one slot
    pub fn effective_channel_capacity(&self) -> usize {
        self.channel_capacity.max(1)
    }

    pub fn last_root(&self) -> Option<&str> {
        let trimmed = self.last_root.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }
}
