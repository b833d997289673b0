use crate::models::{RuleTable, RulesConfig, UserConfig};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Environment, File, FileFormat};
use std::fs;

/// Prefix of environment variables that override settings keys
pub const ENV_PREFIX: &str = "UNLOCKER";

/// Configuration manager for loading and saving YAML configuration files.
///
/// Manages two files inside the data directory:
/// - Rules (`Unlocker Rules.yaml`): target files and their tag pairs
/// - Settings (`Unlocker Settings.yaml`): logging, channel capacity, remembered root
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    rules_config_path: Utf8PathBuf,
    user_config_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified configuration directory.
    ///
    /// # Arguments
    /// * `config_dir` - Directory containing configuration files (e.g., "Unlocker Data")
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            rules_config_path: config_dir.join("Unlocker Rules.yaml"),
            user_config_path: config_dir.join("Unlocker Settings.yaml"),
            config_dir,
        })
    }

    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    /// Load the rules file.
    ///
    /// # Returns
    /// The loaded RulesConfig, or the built-in rules if the file doesn't exist
    pub fn load_rules_config(&self) -> Result<RulesConfig> {
        if !self.rules_config_path.exists() {
            tracing::warn!(
                "Rules file not found at {}, using built-in rules",
                self.rules_config_path
            );
            return Ok(RulesConfig::default());
        }

        let file_contents = fs::read_to_string(&self.rules_config_path)
            .with_context(|| format!("Failed to read rules file: {}", self.rules_config_path))?;

        let config: RulesConfig = serde_yaml_ng::from_str(&file_contents)
            .with_context(|| format!("Failed to parse rules file: {}", self.rules_config_path))?;

        tracing::info!("Loaded rules from {}", self.rules_config_path);
        Ok(config)
    }

    pub fn save_rules_config(&self, config: &RulesConfig) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize rules to YAML")?;

        fs::write(&self.rules_config_path, yaml_string)
            .with_context(|| format!("Failed to write rules file: {}", self.rules_config_path))?;

        tracing::info!("Saved rules to {}", self.rules_config_path);
        Ok(())
    }

    /// Load and validate the rule table the transform engine runs with.
    pub fn load_rule_table(&self) -> Result<RuleTable> {
        let config = self.load_rules_config()?;
        let table = RuleTable::from_config(&config)
            .with_context(|| format!("Invalid rules in {}", self.rules_config_path))?;

        tracing::info!(
            "Rule table ready: version {}, {} target file(s)",
            config.rules.version,
            table.target_files().len()
        );
        Ok(table)
    }

    /// Load the settings file layered with `UNLOCKER_` environment overrides.
    ///
    /// A missing file yields defaults. `UNLOCKER_SETTINGS__DEBUG_MODE=true` overrides
    /// `settings.debug_mode`.
    pub fn load_user_config(&self) -> Result<UserConfig> {
        self.load_user_config_with(Environment::with_prefix(ENV_PREFIX))
    }

    fn load_user_config_with(&self, environment: Environment) -> Result<UserConfig> {
        if !self.user_config_path.exists() {
            tracing::warn!(
                "Settings file not found at {}, using defaults",
                self.user_config_path
            );
        }

        let settings = config::Config::builder()
            .add_source(
                File::from(self.user_config_path.as_std_path())
                    .format(FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                environment
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read settings: {}", self.user_config_path))?;

        let config: UserConfig = settings
            .try_deserialize()
            .with_context(|| format!("Failed to parse settings: {}", self.user_config_path))?;

        tracing::info!("Loaded settings from {}", self.user_config_path);
        Ok(config)
    }

    pub fn save_user_config(&self, config: &UserConfig) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize settings to YAML")?;

        fs::write(&self.user_config_path, yaml_string)
            .with_context(|| format!("Failed to write settings: {}", self.user_config_path))?;

        tracing::info!("Saved settings to {}", self.user_config_path);
        Ok(())
    }
}
