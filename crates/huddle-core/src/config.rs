use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ErrorCode;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub view: ViewConfig,
    #[serde(default)]
    pub ids: IdConfig,
    #[serde(default)]
    pub events: EventConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewConfig {
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdConfig {
    #[serde(default = "default_provisional_prefix")]
    pub provisional_prefix: String,
}

impl Default for IdConfig {
    fn default() -> Self {
        Self {
            provisional_prefix: default_provisional_prefix(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventConfig {
    #[serde(default = "default_completion_capacity")]
    pub completion_capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            completion_capacity: default_completion_capacity(),
        }
    }
}

impl EngineConfig {
    /// Reject settings the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first offending setting.
    pub fn validate(&self) -> Result<()> {
        if self.view.default_page_size == 0 {
            bail!("view.default_page_size must be > 0");
        }
        if self.view.max_page_size < self.view.default_page_size {
            bail!("view.max_page_size must be >= view.default_page_size");
        }
        if self.reconnect.initial_delay_ms == 0 {
            bail!("reconnect.initial_delay_ms must be > 0");
        }
        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            bail!("reconnect.max_delay_ms must be >= reconnect.initial_delay_ms");
        }
        if self.ids.provisional_prefix.trim().is_empty() {
            bail!("ids.provisional_prefix must not be empty");
        }
        if self.events.completion_capacity == 0 {
            bail!("events.completion_capacity must be > 0");
        }
        Ok(())
    }
}

/// Load engine settings from `path`, falling back to defaults when the file
/// does not exist.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed, or fails validation.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let config = toml::from_str::<EngineConfig>(&content)
        .with_context(|| {
            format!(
                "{} ({}): failed to parse {}",
                ErrorCode::ConfigParseError.message(),
                ErrorCode::ConfigParseError,
                path.display()
            )
        })?;
    config
        .validate()
        .with_context(|| format!("Invalid settings in {}", path.display()))?;
    Ok(config)
}

/// Per-user config location (`~/.config/huddle/huddle.toml` on Linux).
#[must_use]
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("huddle/huddle.toml"))
}

const fn default_initial_delay_ms() -> u64 {
    250
}

const fn default_max_delay_ms() -> u64 {
    10_000
}

const fn default_page_size() -> usize {
    25
}

const fn default_max_page_size() -> usize {
    200
}

fn default_provisional_prefix() -> String {
    "local-".to_string()
}

const fn default_completion_capacity() -> usize {
    64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_uses_defaults() {
        let dir = tempfile::tempdir().expect("temp dir must be created");
        let cfg = load_config(&dir.path().join("huddle.toml")).expect("load should succeed");
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.reconnect.initial_delay_ms, 250);
        assert_eq!(cfg.view.default_page_size, 25);
        assert_eq!(cfg.ids.provisional_prefix, "local-");
    }

    #[test]
    fn partial_config_fills_remaining_defaults() {
        let dir = tempfile::tempdir().expect("temp dir must be created");
        let path = dir.path().join("huddle.toml");
        std::fs::write(
            &path,
            "[view]\ndefault_page_size = 10\n\n[reconnect]\nmax_delay_ms = 2000\n",
        )
        .expect("write config");

        let cfg = load_config(&path).expect("load should succeed");
        assert_eq!(cfg.view.default_page_size, 10);
        assert_eq!(cfg.view.max_page_size, 200);
        assert_eq!(cfg.reconnect.initial_delay_ms, 250);
        assert_eq!(cfg.reconnect.max_delay_ms, 2000);
    }

    #[test]
    fn malformed_config_reports_path() {
        let dir = tempfile::tempdir().expect("temp dir must be created");
        let path = dir.path().join("huddle.toml");
        std::fs::write(&path, "[view\ndefault_page_size = ").expect("write config");

        let err = load_config(&path).expect_err("parse must fail");
        let rendered = format!("{err:#}");
        assert!(rendered.contains("huddle.toml"));
        assert!(rendered.contains("E1002"), "{rendered}");
    }

    #[test]
    fn user_config_lives_under_a_huddle_directory() {
        if let Some(path) = user_config_path() {
            assert!(path.ends_with("huddle/huddle.toml"));
        }
    }

    #[test]
    fn validation_rejects_inverted_limits() {
        let mut cfg = EngineConfig::default();
        cfg.view.max_page_size = 5;
        assert!(cfg.validate().is_err());

        let mut cfg = EngineConfig::default();
        cfg.reconnect.max_delay_ms = 10;
        assert!(cfg.validate().is_err());

        let mut cfg = EngineConfig::default();
        cfg.events.completion_capacity = 0;
        assert!(cfg.validate().is_err());

        assert!(EngineConfig::default().validate().is_ok());
    }
}
