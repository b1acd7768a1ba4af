use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant that will help with questions.";

/// Read-only settings consumed by the adapter, the orchestrator, and the
/// console front-end. Lives at `~/.palaver/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to config.toml - computed from home, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default = "default_model")]
    pub default_model: String,

    /// Upper bound on turns included in a backend request. Bounds request
    /// construction only; stored history is never trimmed.
    #[serde(default = "default_max_history")]
    pub max_history_messages: usize,

    #[serde(default = "default_true")]
    pub enable_streaming_response: bool,

    /// Front-end deadline for one exchange, enforced by cancelling the
    /// exchange token. The core carries the token and owns no timer.
    #[serde(default = "default_timeout")]
    pub command_timeout_secs: u64,

    #[serde(default = "default_ollama_url")]
    pub ollama_base_url: String,

    /// Sqlite file for the history store. Empty string selects the
    /// in-memory store (nothing survives exit).
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_model() -> String {
    "gemma2:2b".into()
}

fn default_max_history() -> usize {
    100
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

fn default_ollama_url() -> String {
    "http://localhost:11434".into()
}

fn default_db_path() -> String {
    "~/.palaver/history.db".into()
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: PathBuf::new(),
            default_model: default_model(),
            max_history_messages: default_max_history(),
            enable_streaming_response: true,
            command_timeout_secs: default_timeout(),
            ollama_base_url: default_ollama_url(),
            db_path: default_db_path(),
            system_prompt: default_system_prompt(),
        }
    }
}

impl Config {
    pub fn load_or_init() -> Result<Self> {
        let home = UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .context("Could not find home directory")?;
        let palaver_dir = home.join(".palaver");
        let config_path = palaver_dir.join("config.toml");

        if !palaver_dir.exists() {
            fs::create_dir_all(&palaver_dir).context("Failed to create .palaver directory")?;
        }

        if config_path.exists() {
            let contents =
                fs::read_to_string(&config_path).context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            config.config_path = config_path;
            config.validate()?;
            Ok(config)
        } else {
            let config = Self {
                config_path: config_path.clone(),
                ..Self::default()
            };
            config.save()?;
            Ok(config)
        }
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        if let Ok(model) = std::env::var("PALAVER_MODEL") {
            if !model.is_empty() {
                self.default_model = model;
            }
        }
        if let Ok(url) = std::env::var("PALAVER_OLLAMA_URL") {
            if !url.is_empty() {
                self.ollama_base_url = url;
            }
        }
        if let Ok(db) = std::env::var("PALAVER_DB") {
            self.db_path = db;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_model.trim().is_empty() {
            anyhow::bail!("default_model must not be empty");
        }
        if self.max_history_messages == 0 {
            anyhow::bail!("max_history_messages must be >= 1");
        }
        if self.command_timeout_secs == 0 {
            anyhow::bail!("command_timeout_secs must be >= 1");
        }
        Ok(())
    }

    /// `db_path` with `~` expanded, or `None` when the in-memory store is
    /// selected.
    pub fn resolved_db_path(&self) -> Option<PathBuf> {
        if self.db_path.trim().is_empty() {
            return None;
        }
        Some(PathBuf::from(
            shellexpand::tilde(&self.db_path).into_owned(),
        ))
    }

    pub fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&self.config_path, toml_str).context("Failed to write config file")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.default_model, "gemma2:2b");
        assert_eq!(config.max_history_messages, 100);
        assert!(config.enable_streaming_response);
    }

    #[test]
    fn empty_toml_fills_every_default() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.max_history_messages, 100);
        assert_eq!(config.command_timeout_secs, 30);
        assert_eq!(config.ollama_base_url, "http://localhost:11434");
        assert_eq!(config.system_prompt, DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn partial_toml_overrides_selected_fields() {
        let config: Config = toml::from_str(
            "default_model = \"llama3\"\nmax_history_messages = 4\nenable_streaming_response = false\n",
        )
        .unwrap();
        assert_eq!(config.default_model, "llama3");
        assert_eq!(config.max_history_messages, 4);
        assert!(!config.enable_streaming_response);
    }

    #[test]
    fn zero_history_window_fails_validation() {
        let config = Config {
            max_history_messages: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_model_fails_validation() {
        let config = Config {
            default_model: "  ".into(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_db_path_selects_memory_store() {
        let config = Config {
            db_path: String::new(),
            ..Config::default()
        };
        assert!(config.resolved_db_path().is_none());
    }

    #[test]
    fn db_path_tilde_is_expanded() {
        let config = Config::default();
        let path = config.resolved_db_path().unwrap();
        assert!(!path.to_string_lossy().starts_with('~'));
        assert!(path.to_string_lossy().ends_with("history.db"));
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = Config::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.default_model, config.default_model);
        assert_eq!(parsed.db_path, config.db_path);
    }
}
