use crate::config::rule::{Rule, RuleId};
use crate::config::session::{EngineSettings, LaunchSpec, SessionConfig};
use crate::config::upload::UploadConfig;
use crate::ruler::RuleSet;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

// YAML structure for loading complete configuration
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub session: SessionConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default, alias = "detect")]
    pub rules: Vec<Rule>,
}

/// Fully validated configuration, ready to start a session.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub launch: LaunchSpec,
    pub settings: EngineSettings,
    pub upload: UploadConfig,
    pub rules: RuleSet,
}

/// Load configuration from a YAML file and compile the rule set
pub fn load_config(path: &Path) -> Result<LoadedConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and compile configuration from YAML text.
///
/// Any malformed rule fails the whole load; a partial rule set is never returned.
pub fn parse_config(content: &str) -> Result<LoadedConfig> {
    let config_file: ConfigFile =
        serde_yaml::from_str(content).with_context(|| "Failed to parse YAML config file")?;

    let upload_timeout = config_file
        .upload
        .timeout()
        .context("Invalid upload.timeout")?;
    let (launch, settings) = config_file
        .session
        .compile(upload_timeout)
        .context("Invalid session section")?;

    let mut compiled_rules = Vec::with_capacity(config_file.rules.len());
    for (index, rule) in config_file.rules.iter().enumerate() {
        let id = RuleId(index);
        let compiled = rule
            .compile(id)
            .with_context(|| format!("Failed to compile rule {}: {}", id, rule.describe()))?;
        compiled_rules.push(compiled);
    }

    // Rules are processed in order (no sorting needed - line order = priority)

    Ok(LoadedConfig {
        launch,
        settings,
        upload: config_file.upload,
        rules: RuleSet::new(compiled_rules),
    })
}
