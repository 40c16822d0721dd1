use crate::cache::DEFAULT_CACHE_TTL;
use crate::errors::{AppError, AppResult};
use crate::history::DEFAULT_HISTORY_SIZE;
use crate::llm::{DEFAULT_API_URL, DEFAULT_MODEL};
use crate::pipeline::PipelineOptions;
use crate::prompt::Preferences;
use crate::safety::{SafetyPolicy, DEFAULT_DANGEROUS_PATTERNS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "config.yaml";
pub const APP_DIR_NAME: &str = "ai-shell";
pub const API_KEY_ENV: &str = "OPENROUTER_API_KEY";
pub const MODEL_ENV: &str = "AI_SHELL_MODEL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub default_timeout: u64,
    pub long_running_timeout: u64,
    pub expert_mode: bool,
    pub simulation_mode: bool,
    pub verbose: bool,
    pub aliases: BTreeMap<String, String>,
    pub dangerous_commands: Vec<String>,
    pub cache_ttl: u64,
    pub history_max_size: usize,
    pub retry_budget: u32,
    pub context_entries: usize,
    pub shell: String,
    pub prompt: String,
    pub data_dir: Option<PathBuf>,
    pub api_key: Option<String>,
    pub api_url: String,
    pub model: String,
    pub request_timeout: u64,
    pub max_tokens: u32,
    pub confirm_execution: bool,
    pub syntax_check: bool,
    pub dependency_check: bool,
    pub stream_output: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_timeout: 120,
            long_running_timeout: 600,
            expert_mode: false,
            simulation_mode: false,
            verbose: false,
            aliases: BTreeMap::new(),
            dangerous_commands: DEFAULT_DANGEROUS_PATTERNS
                .iter()
                .map(|pattern| pattern.to_string())
                .collect(),
            cache_ttl: DEFAULT_CACHE_TTL.as_secs(),
            history_max_size: DEFAULT_HISTORY_SIZE,
            retry_budget: 3,
            context_entries: 10,
            shell: "sh".to_string(),
            prompt: "AI Shell> ".to_string(),
            data_dir: None,
            api_key: None,
            api_url: DEFAULT_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            request_timeout: 60,
            max_tokens: 512,
            confirm_execution: false,
            syntax_check: true,
            dependency_check: true,
            stream_output: true,
        }
    }
}

impl AppConfig {
    /// Loads the configuration.
    ///
    /// An explicit path must exist. Without one, `./config.yaml` and then
    /// `<config dir>/ai-shell/config.yaml` are tried; if neither exists the
    /// defaults are used. Environment overrides are applied last.
    pub fn load(explicit: Option<&Path>) -> AppResult<Self> {
        let mut config = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(AppError::Config(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                Self::from_file(path)?
            }
            None => match default_locations().into_iter().find(|path| path.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> AppResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
            .map_err(|error| AppError::Config(format!("{}: {}", path.display(), error)))
    }

    pub fn from_yaml(raw: &str) -> AppResult<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(API_KEY_ENV).filter(|value| !value.trim().is_empty()) {
            self.api_key = Some(key);
        }
        if let Some(model) = lookup(MODEL_ENV).filter(|value| !value.trim().is_empty()) {
            self.model = model;
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.default_timeout == 0 || self.long_running_timeout == 0 {
            return Err(AppError::Config("timeouts must be greater than zero".to_string()));
        }
        if self.max_tokens == 0 {
            return Err(AppError::Config("max_tokens must be greater than zero".to_string()));
        }
        if self.shell.trim().is_empty() {
            return Err(AppError::Config("shell must not be empty".to_string()));
        }
        if let Some(alias) = self.aliases.keys().find(|alias| alias.split_whitespace().count() != 1) {
            return Err(AppError::Config(format!(
                "alias '{}' must be a single word",
                alias
            )));
        }
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR_NAME)
        })
    }

    pub fn cache_path(&self) -> PathBuf {
        self.data_dir().join("cache.sqlite")
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir().join("history.json")
    }

    /// Line-editor history of the interactive shell, separate from the
    /// instruction history.
    pub fn repl_history_path(&self) -> PathBuf {
        self.data_dir().join("repl_history")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir().join("logs")
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl)
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            default_timeout: Duration::from_secs(self.default_timeout),
            long_running_timeout: Duration::from_secs(self.long_running_timeout),
            expert_mode: self.expert_mode,
            simulation_mode: self.simulation_mode,
            aliases: self
                .aliases
                .iter()
                .map(|(name, value)| (name.to_lowercase(), value.clone()))
                .collect(),
            retry_budget: self.retry_budget.max(1),
            context_entries: self.context_entries,
            safety: SafetyPolicy::new(&self.dangerous_commands),
            preferences: Preferences {
                preferred_shell: self.shell.clone(),
                verbose_output: self.verbose,
                expert_mode: self.expert_mode,
            },
            confirm_execution: self.confirm_execution,
            syntax_check: self.syntax_check,
            dependency_check: self.dependency_check,
            stream_output: self.stream_output,
        }
    }
}

fn default_locations() -> Vec<PathBuf> {
    let mut locations = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(dir) = dirs::config_dir() {
        locations.push(dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME));
    }
    locations
}

#[cfg(test)]
mod tests {
    use super::{AppConfig, API_KEY_ENV, MODEL_ENV};
    use crate::errors::AppError;
    use std::time::Duration;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = AppConfig::from_yaml("default_timeout: 30\naliases:\n  ll: ls -la\n").expect("parse");
        assert_eq!(config.default_timeout, 30);
        assert_eq!(config.long_running_timeout, 600);
        assert_eq!(config.max_tokens, 512);
        assert_eq!(config.aliases.get("ll").map(String::as_str), Some("ls -la"));
        assert!(config.dangerous_commands.iter().any(|pattern| pattern == "rm -rf"));
    }

    #[test]
    fn empty_file_is_default() {
        assert_eq!(AppConfig::from_yaml("  \n").expect("parse"), AppConfig::default());
    }

    #[test]
    fn malformed_yaml_is_a_config_error() {
        let error = AppConfig::from_yaml("default_timeout: [").expect_err("should fail");
        assert!(matches!(error, AppError::Config(_)));
    }

    #[test]
    fn environment_overrides_key_and_model() {
        let mut config = AppConfig::default();
        config.apply_env_overrides(|key| match key {
            API_KEY_ENV => Some("secret".to_string()),
            MODEL_ENV => Some("vendor/model".to_string()),
            _ => None,
        });
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.model, "vendor/model");
    }

    #[test]
    fn explicit_missing_file_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let error = AppConfig::load(Some(&dir.path().join("nope.yaml"))).expect_err("missing");
        assert!(matches!(error, AppError::Config(_)));
    }

    #[test]
    fn validation_rejects_zero_timeouts_and_multiword_aliases() {
        let mut config = AppConfig {
            default_timeout: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
        config.default_timeout = 5;
        config.max_tokens = 0;
        assert!(config.validate().is_err());
        config.max_tokens = 256;
        config.aliases.insert("two words".to_string(), "x".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn data_files_live_under_the_data_dir() {
        let config = AppConfig::from_yaml("data_dir: /var/lib/ai-shell").expect("parse");
        assert_eq!(config.cache_path(), std::path::Path::new("/var/lib/ai-shell/cache.sqlite"));
        assert_eq!(config.repl_history_path(), std::path::Path::new("/var/lib/ai-shell/repl_history"));
        assert_ne!(config.repl_history_path(), config.history_path());
    }

    #[test]
    fn pipeline_options_resolve_durations_and_aliases() {
        let mut config = AppConfig::from_yaml("expert_mode: true\nretry_budget: 0").expect("parse");
        config.aliases.insert("LL".to_string(), "ls -la".to_string());
        let options = config.pipeline_options();
        assert_eq!(options.default_timeout, Duration::from_secs(120));
        assert_eq!(options.execution_timeout(), Duration::from_secs(600));
        assert_eq!(options.retry_budget, 1);
        assert_eq!(options.aliases.get("ll").map(String::as_str), Some("ls -la"));
    }
}
