use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{SageError, SecretValue, require_env};

const DEFAULT_CONFIG_PATH: &str = "sage.toml";
const CONFIG_PATH_ENV: &str = "SAGE_CONFIG";
const OFFLINE_ENV: &str = "SAGE_OFFLINE";

/// Provider name that selects the deterministic in-process services.
pub const STUB_PROVIDER: &str = "stub";

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub encyclopedia: EncyclopediaConfig,
    pub interview: InterviewConfig,
    pub workflow: WorkflowConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Resolve the configured LLM secret value (from environment only).
    pub fn llm_api_key(&self) -> Result<SecretValue, SageError> {
        require_env(&self.llm.api_key_env)
    }

    /// Resolve the configured web search secret value (from environment only).
    pub fn search_api_key(&self) -> Result<SecretValue, SageError> {
        require_env(&self.search.api_key_env)
    }

    /// Switch every external collaborator to its stub implementation.
    pub fn into_offline(mut self) -> Self {
        self.llm.provider = STUB_PROVIDER.to_string();
        self.search.provider = STUB_PROVIDER.to_string();
        self.encyclopedia.provider = STUB_PROVIDER.to_string();
        self
    }

    pub fn is_offline(&self) -> bool {
        self.llm.provider == STUB_PROVIDER
            && self.search.provider == STUB_PROVIDER
            && self.encyclopedia.provider == STUB_PROVIDER
    }
}

/// Helper to load configuration with guard rails.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `SAGE_CONFIG` environment variable.
    /// 3. `sage.toml` in the current working directory.
    ///
    /// A missing file is only an error when it was named explicitly; otherwise the
    /// built-in defaults apply. `SAGE_OFFLINE=1` forces the stub services.
    pub fn load(path: Option<PathBuf>) -> Result<Config, SageError> {
        Self::load_with(path, false)
    }

    /// Like [`ConfigLoader::load`], with `force_offline` switching to the stub
    /// services before validation, so provider keys are not required.
    pub fn load_with(path: Option<PathBuf>, force_offline: bool) -> Result<Config, SageError> {
        let (candidate, explicit) = resolve_path(path);
        let config = if candidate.exists() || explicit {
            let raw = fs::read_to_string(&candidate)
                .map_err(|err| SageError::config_io(candidate.clone(), err))?;
            Self::parse(&raw)?
        } else {
            Config::default()
        };

        let config = if force_offline || offline_requested() {
            config.into_offline()
        } else {
            config
        };

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Config, SageError> {
        toml::from_str(raw).map_err(|err| SageError::InvalidConfiguration(err.to_string()))
    }

    pub fn validate(config: &Config) -> Result<(), SageError> {
        if config.interview.max_turns == 0 {
            return Err(SageError::InvalidConfiguration(
                "interview.max_turns must be at least 1".into(),
            ));
        }
        if config.search.max_results == 0 {
            return Err(SageError::InvalidConfiguration(
                "search.max_results must be at least 1".into(),
            ));
        }
        if config.llm.provider != STUB_PROVIDER && config.llm.api_key_env.trim().is_empty() {
            return Err(SageError::InvalidConfiguration(
                "llm.api_key_env must reference an environment variable".into(),
            ));
        }
        if config.search.provider != STUB_PROVIDER && config.search.api_key_env.trim().is_empty()
        {
            return Err(SageError::InvalidConfiguration(
                "search.api_key_env must reference an environment variable".into(),
            ));
        }
        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> (PathBuf, bool) {
    if let Some(path) = path {
        return (path, true);
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV) {
        if !from_env.trim().is_empty() {
            return (PathBuf::from(from_env), true);
        }
    }

    (Path::new(DEFAULT_CONFIG_PATH).to_path_buf(), false)
}

fn offline_requested() -> bool {
    env::var(OFFLINE_ENV)
        .map(|value| matches!(value.trim(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub base_url: String,
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "groq".to_string(),
            model: "llama-3.1-70b-versatile".to_string(),
            base_url: "https://api.groq.com/openai/v1".to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            temperature: 0.1,
            max_tokens: 4096,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub provider: String,
    pub base_url: String,
    pub api_key_env: String,
    pub max_results: usize,
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: "tavily".to_string(),
            base_url: "https://api.tavily.com/search".to_string(),
            api_key_env: "TAVILY_API_KEY".to_string(),
            max_results: 3,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EncyclopediaConfig {
    pub provider: String,
    pub base_url: String,
    pub max_docs: usize,
    pub max_chars: usize,
    pub timeout_secs: u64,
}

impl Default for EncyclopediaConfig {
    fn default() -> Self {
        Self {
            provider: "wikipedia".to_string(),
            base_url: "https://en.wikipedia.org/w/api.php".to_string(),
            max_docs: 1,
            max_chars: 4_000,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InterviewConfig {
    pub max_turns: usize,
}

impl Default for InterviewConfig {
    fn default() -> Self {
        Self { max_turns: 2 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub parallel_interviews: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = ConfigLoader::parse("").expect("empty config parses");
        assert_eq!(config.llm.model, "llama-3.1-70b-versatile");
        assert_eq!(config.search.max_results, 3);
        assert_eq!(config.encyclopedia.max_docs, 1);
        assert_eq!(config.interview.max_turns, 2);
        assert!(!config.workflow.parallel_interviews);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let raw = r#"
            [llm]
            model = "llama-3.3-70b"

            [interview]
            max_turns = 4

            [workflow]
            parallel_interviews = true
        "#;
        let config = ConfigLoader::parse(raw).expect("config parses");
        assert_eq!(config.llm.model, "llama-3.3-70b");
        assert_eq!(config.llm.api_key_env, "GROQ_API_KEY");
        assert_eq!(config.interview.max_turns, 4);
        assert!(config.workflow.parallel_interviews);
    }

    #[test]
    fn zero_turns_are_rejected() {
        let config = ConfigLoader::parse("[interview]\nmax_turns = 0").unwrap();
        let err = ConfigLoader::validate(&config).unwrap_err();
        assert!(matches!(err, SageError::InvalidConfiguration(_)));
    }

    #[test]
    fn offline_switches_every_provider() {
        let config = Config::default().into_offline();
        assert!(config.is_offline());
        ConfigLoader::validate(&config).expect("offline config is valid");
    }

    #[test]
    fn forced_offline_applies_before_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[llm]\napi_key_env = \"\"\n").unwrap();
        let path = file.path().to_path_buf();

        let err = ConfigLoader::load_with(Some(path.clone()), false).unwrap_err();
        assert!(matches!(err, SageError::InvalidConfiguration(_)));

        let config = ConfigLoader::load_with(Some(path), true).expect("offline config loads");
        assert!(config.is_offline());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = ConfigLoader::load(Some(PathBuf::from("/definitely/not/here/sage.toml")))
            .unwrap_err();
        assert!(matches!(err, SageError::ConfigIo { .. }));
    }
}
