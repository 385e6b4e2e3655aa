use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::posts::Platform;
use crate::ConfigError;

fn default_weight() -> f64 {
    1.0
}

fn default_max_posts() -> usize {
    80
}

fn default_max_age_days() -> u32 {
    30
}

fn default_max_duration_secs() -> Option<u64> {
    Some(120)
}

fn default_enabled() -> bool {
    true
}

/// One platform to collect from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub platform: Platform,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Hashtag (without `#`) for Instagram, search query for YouTube.
    pub query: String,
    #[serde(default = "default_max_posts")]
    pub max_posts: usize,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,
    /// Short-form cutoff for video platforms.
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourcesFile {
    pub sources: Vec<SourceConfig>,
}

impl SourcesFile {
    pub fn enabled(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }
}

/// Load and validate the source definitions from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_sources(path: &Path) -> Result<SourcesFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::SourcesFileIo {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_sources(&content)
}

/// Parse and validate source definitions from YAML text.
///
/// # Errors
///
/// Returns `ConfigError` if the text cannot be parsed or fails validation.
pub fn parse_sources(content: &str) -> Result<SourcesFile, ConfigError> {
    let sources_file: SourcesFile =
        serde_yaml::from_str(content).map_err(ConfigError::SourcesFileParse)?;
    validate_sources(&sources_file)?;
    Ok(sources_file)
}

fn validate_sources(sources_file: &SourcesFile) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for source in &sources_file.sources {
        if source.query.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "source '{}' must have a non-empty query",
                source.platform
            )));
        }

        if !source.weight.is_finite() || source.weight < 0.0 {
            return Err(ConfigError::Validation(format!(
                "source '{}' has invalid weight {}; must be a finite non-negative number",
                source.platform, source.weight
            )));
        }

        if source.max_posts == 0 {
            return Err(ConfigError::Validation(format!(
                "source '{}' must allow at least one post",
                source.platform
            )));
        }

        if !seen.insert(source.platform) {
            return Err(ConfigError::Validation(format!(
                "duplicate source for platform '{}'",
                source.platform
            )));
        }
    }

    Ok(())
}
