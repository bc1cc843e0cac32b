//! Configuration management for modflow.
//!
//! Handles loading configuration from TOML files.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Process spawning defaults
    pub spawn: SpawnConfig,

    /// Git synchronization settings
    #[cfg(feature = "git")]
    pub git: GitConfig,

    /// AI patching settings
    #[cfg(feature = "ai")]
    pub ai: AiConfig,
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory under the OS temp dir holding clones and scratch files
    pub tmp_dir_name: String,

    /// Directories skipped when walking globs
    pub ignore_dirs: Vec<String>,
}

/// Defaults applied to spawned commands.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnConfig {
    /// Mirror child output to our own stdout/stderr
    pub mirror_output: bool,

    /// Answer "Proceed" prompts with `y`
    pub auto_confirm: bool,
}

/// Git settings.
#[cfg(feature = "git")]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// Clone with depth 1
    pub shallow: bool,
}

/// AI completion settings.
#[cfg(feature = "ai")]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// Chat model name
    pub model: String,

    /// API base URL (OpenAI-compatible)
    pub base_url: String,

    /// Environment variable holding the API key
    pub api_key_env: String,

    pub temperature: f32,

    pub seed: u64,

    /// Formatter run on patched files, e.g. `["npx", "prettier", "--write"]`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatter: Option<Vec<String>>,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Looks for config in:
    /// 1. `.modflow.toml` in current directory
    /// 2. `~/.config/modflow/config.toml`
    /// 3. Falls back to defaults
    pub fn load() -> anyhow::Result<Self> {
        let local_config = PathBuf::from(".modflow.toml");
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Some(config_dir) = Self::config_dir() {
            let global_config = config_dir.join("config.toml");
            if global_config.exists() {
                return Self::load_from_file(&global_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("modflow"))
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            tmp_dir_name: "cm".to_string(),
            ignore_dirs: vec![
                "node_modules".to_string(),
                ".git".to_string(),
                "dist".to_string(),
                "build".to_string(),
            ],
        }
    }
}

#[cfg(feature = "ai")]
impl Default for AiConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4-turbo".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.001,
            seed: 7,
            formatter: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.tmp_dir_name, "cm");
        assert!(config.general.ignore_dirs.contains(&"node_modules".to_string()));
        assert!(!config.spawn.mirror_output);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[spawn]"));
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [general]
            tmp_dir_name = "scratch"

            [spawn]
            auto_confirm = true
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.tmp_dir_name, "scratch");
        assert_eq!(config.general.ignore_dirs.len(), 4);
        assert!(config.spawn.auto_confirm);
        assert!(!config.spawn.mirror_output);
    }

    #[cfg(feature = "ai")]
    #[test]
    fn test_ai_defaults_and_formatter() {
        let config: Config = toml::from_str(
            r#"
            [ai]
            model = "gpt-4o"
            formatter = ["npx", "prettier", "--write"]
            "#,
        )
        .unwrap();
        assert_eq!(config.ai.model, "gpt-4o");
        assert_eq!(config.ai.seed, 7);
        assert_eq!(config.ai.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.ai.formatter.as_deref().map(<[String]>::len), Some(3));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[general]\nignore_dirs = [\"vendor\"]\n").unwrap();
        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.general.ignore_dirs, vec!["vendor".to_string()]);

        std::fs::write(&path, "general = 3").unwrap();
        assert!(Config::load_from_file(&path).is_err());
    }
}
