use config::{Config, ConfigError, File, FileFormat, Map, Source, Value, ValueKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::models::circuit_breaker::CircuitBreakerConfig;
use crate::models::retry::RetryPolicy;

pub const CONFIG_FILE_VAR: &str = "LLM_CONFIG_FILE";
pub const DEFAULT_CONFIG_FILE: &str = "config/llm_config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub provider: String,
    pub fallback_provider: String,
    pub sensitive_data_handling: bool,
    pub cache_responses: bool,
    pub cache_dir: String,
    pub timeout_seconds: u64,
    pub logging_enabled: bool,
    pub openai: OpenAiSettings,
    pub ollama: OllamaSettings,
    pub retry: RetrySettings,
    pub circuit_breaker: CircuitBreakerSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model_name: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaSettings {
    pub base_url: String,
    pub model_name: String,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub num_ctx: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    pub half_open_timeout_ms: u64,
    pub success_threshold: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            fallback_provider: "ollama".to_string(),
            sensitive_data_handling: true,
            cache_responses: true,
            cache_dir: ".cache/llm".to_string(),
            timeout_seconds: 30,
            logging_enabled: true,
            openai: OpenAiSettings::default(),
            ollama: OllamaSettings::default(),
            retry: RetrySettings::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
        }
    }
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: crate::models::openai::DEFAULT_BASE_URL.to_string(),
            model_name: "gpt-3.5-turbo".to_string(),
            temperature: 0.7,
            max_tokens: None,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
        }
    }
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            base_url: crate::models::ollama::DEFAULT_BASE_URL.to_string(),
            model_name: "llama3".to_string(),
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            num_ctx: 4096,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
            backoff_factor: 2.0,
        }
    }
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout_ms: 60_000,
            half_open_timeout_ms: 5_000,
            success_threshold: 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum EnvKind {
    Text,
    Lowercase,
    Flag,
    Integer,
    Float,
    // 0 or absent means "unset"
    OptionalCount,
}

const ENV_BINDINGS: &[(&str, &str, EnvKind)] = &[
    ("LLM_PROVIDER", "provider", EnvKind::Lowercase),
    ("LLM_FALLBACK_PROVIDER", "fallback_provider", EnvKind::Lowercase),
    ("LLM_SENSITIVE_DATA_HANDLING", "sensitive_data_handling", EnvKind::Flag),
    ("LLM_CACHE_RESPONSES", "cache_responses", EnvKind::Flag),
    ("LLM_CACHE_DIR", "cache_dir", EnvKind::Text),
    ("LLM_TIMEOUT_SECONDS", "timeout_seconds", EnvKind::Integer),
    ("LLM_LOGGING_ENABLED", "logging_enabled", EnvKind::Flag),
    ("OPENAI_API_KEY", "openai.api_key", EnvKind::Text),
    ("OPENAI_BASE_URL", "openai.base_url", EnvKind::Text),
    ("OPENAI_MODEL_NAME", "openai.model_name", EnvKind::Text),
    ("OPENAI_TEMPERATURE", "openai.temperature", EnvKind::Float),
    ("OPENAI_MAX_TOKENS", "openai.max_tokens", EnvKind::OptionalCount),
    ("OPENAI_TOP_P", "openai.top_p", EnvKind::Float),
    ("OPENAI_FREQUENCY_PENALTY", "openai.frequency_penalty", EnvKind::Float),
    ("OPENAI_PRESENCE_PENALTY", "openai.presence_penalty", EnvKind::Float),
    ("OLLAMA_BASE_URL", "ollama.base_url", EnvKind::Text),
    ("OLLAMA_MODEL_NAME", "ollama.model_name", EnvKind::Text),
    ("OLLAMA_TEMPERATURE", "ollama.temperature", EnvKind::Float),
    ("OLLAMA_TOP_P", "ollama.top_p", EnvKind::Float),
    ("OLLAMA_TOP_K", "ollama.top_k", EnvKind::Integer),
    ("OLLAMA_NUM_CTX", "ollama.num_ctx", EnvKind::Integer),
];

/// Maps the well-known environment variables onto settings keys.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentSource {
    vars: HashMap<String, String>,
}

impl EnvironmentSource {
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn from_map(vars: HashMap<String, String>) -> Self {
        Self { vars }
    }
}

impl Source for EnvironmentSource {
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new(self.clone())
    }

    fn collect(&self) -> std::result::Result<Map<String, Value>, ConfigError> {
        let origin = "environment".to_string();
        let mut map = Map::new();

        for (var, key, kind) in ENV_BINDINGS {
            let Some(raw) = self.vars.get(*var) else {
                continue;
            };
            let trimmed = raw.trim();

            let value = match kind {
                EnvKind::Text => ValueKind::String(raw.clone()),
                EnvKind::Lowercase => ValueKind::String(trimmed.to_lowercase()),
                EnvKind::Flag => ValueKind::Boolean(trimmed.eq_ignore_ascii_case("true")),
                EnvKind::Integer => ValueKind::I64(parse_env(var, trimmed)?),
                EnvKind::Float => ValueKind::Float(parse_env(var, trimmed)?),
                EnvKind::OptionalCount => match parse_env::<i64>(var, trimmed)? {
                    n if n > 0 => ValueKind::I64(n),
                    _ => ValueKind::Nil,
                },
            };

            map.insert((*key).to_string(), Value::new(Some(&origin), value));
        }

        Ok(map)
    }
}

fn parse_env<T: std::str::FromStr>(var: &str, raw: &str) -> std::result::Result<T, ConfigError> {
    raw.parse()
        .map_err(|_| ConfigError::Message(format!("{} has an invalid value: '{}'", var, raw)))
}

impl LlmSettings {
    /// Defaults, then the process environment, then the JSON file named by
    /// `LLM_CONFIG_FILE`.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path(), EnvironmentSource::from_process())
    }

    pub fn config_file_path() -> PathBuf {
        std::env::var(CONFIG_FILE_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    pub fn load_from(path: &Path, env: EnvironmentSource) -> Result<Self> {
        let settings = if path.exists() {
            match Self::layered(env.clone(), Some(path)) {
                Ok(settings) => {
                    info!("Loaded LLM configuration from {:?}", path);
                    settings
                }
                Err(e) => {
                    warn!("Failed to load LLM configuration from {:?}: {}", path, e);
                    Self::layered(env, None)?
                }
            }
        } else {
            Self::layered(env, None)?
        };

        settings.validate()?;
        Ok(settings)
    }

    fn layered(env: EnvironmentSource, file: Option<&Path>) -> Result<Self> {
        let defaults = Config::try_from(&LlmSettings::default())?;
        let mut builder = Config::builder().add_source(defaults).add_source(env);

        if let Some(path) = file {
            builder = builder.add_source(File::from(path).format(FileFormat::Json));
        }

        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, model, url) in [
            ("openai", &self.openai.model_name, &self.openai.base_url),
            ("ollama", &self.ollama.model_name, &self.ollama.base_url),
        ] {
            if model.trim().is_empty() {
                return Err(Error::validation(format!("{} model_name must not be empty", name)));
            }
            if url.trim().is_empty() {
                return Err(Error::validation(format!("{} base_url must not be empty", name)));
            }
        }

        for (name, temperature) in [
            ("openai", self.openai.temperature),
            ("ollama", self.ollama.temperature),
        ] {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(Error::validation(format!(
                    "{} temperature must be between 0 and 2, got {}",
                    name, temperature
                )));
            }
        }

        if self.timeout_seconds == 0 {
            return Err(Error::validation("timeout_seconds must be at least 1"));
        }

        if self.retry.backoff_factor <= 1.0 {
            return Err(Error::validation("retry backoff_factor must be greater than 1"));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(Error::validation("retry initial_delay_ms must not exceed max_delay_ms"));
        }
        if self.circuit_breaker.failure_threshold == 0 || self.circuit_breaker.success_threshold == 0 {
            return Err(Error::validation("circuit breaker thresholds must be at least 1"));
        }

        Ok(())
    }

    /// Applies the keys present in `patch`; unknown keys are ignored.
    pub fn update_from_value(&mut self, patch: serde_json::Value) -> Result<()> {
        let mut current = serde_json::to_value(&*self)?;
        merge_known_keys(&mut current, patch);

        let updated: LlmSettings = serde_json::from_value(current)?;
        updated.validate()?;
        *self = updated;

        info!("Updated LLM configuration");
        Ok(())
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).await?;

        info!("Saved LLM configuration to {:?}", path);
        Ok(())
    }

    /// Copy safe to print: the API key is masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.openai.api_key.is_some() {
            copy.openai.api_key = Some("***".to_string());
        }
        copy
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_retries,
            Duration::from_millis(self.retry.initial_delay_ms),
            Duration::from_millis(self.retry.max_delay_ms),
            self.retry.backoff_factor,
        )
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker.failure_threshold,
            reset_timeout: Duration::from_millis(self.circuit_breaker.reset_timeout_ms),
            half_open_timeout: Duration::from_millis(self.circuit_breaker.half_open_timeout_ms),
            success_threshold: self.circuit_breaker.success_threshold,
        }
    }
}

fn merge_known_keys(target: &mut serde_json::Value, patch: serde_json::Value) {
    match (target, patch) {
        (serde_json::Value::Object(target), serde_json::Value::Object(patch)) => {
            for (key, value) in patch {
                if let Some(slot) = target.get_mut(&key) {
                    if slot.is_object() && value.is_object() {
                        merge_known_keys(slot, value);
                    } else {
                        *slot = value;
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> EnvironmentSource {
        EnvironmentSource::from_map(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_default_settings() {
        let settings = LlmSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.provider, "openai");
        assert_eq!(settings.fallback_provider, "ollama");
        assert_eq!(settings.openai.model_name, "gpt-3.5-turbo");
        assert_eq!(settings.ollama.base_url, "http://localhost:11434");
        assert_eq!(settings.ollama.top_k, 40);
        assert_eq!(settings.timeout_seconds, 30);
    }

    #[test]
    fn test_load_without_file_or_env_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let settings =
            LlmSettings::load_from(&dir.path().join("missing.json"), env(&[])).unwrap();
        assert_eq!(settings, LlmSettings::default());
    }

    #[test]
    fn test_environment_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = LlmSettings::load_from(
            &dir.path().join("missing.json"),
            env(&[
                ("LLM_PROVIDER", "OLLAMA"),
                ("LLM_CACHE_RESPONSES", "false"),
                ("OPENAI_API_KEY", "sk-env"),
                ("OPENAI_TEMPERATURE", "0.2"),
                ("OPENAI_MAX_TOKENS", "0"),
                ("OLLAMA_NUM_CTX", "8192"),
                ("LLM_TIMEOUT_SECONDS", "45"),
            ]),
        )
        .unwrap();

        assert_eq!(settings.provider, "ollama");
        assert!(!settings.cache_responses);
        assert_eq!(settings.openai.api_key.as_deref(), Some("sk-env"));
        assert_eq!(settings.openai.temperature, 0.2);
        assert_eq!(settings.openai.max_tokens, None);
        assert_eq!(settings.ollama.num_ctx, 8192);
        assert_eq!(settings.timeout_seconds, 45);
    }

    #[test]
    fn test_invalid_environment_number_is_config_error() {
        let dir = TempDir::new().unwrap();
        let result = LlmSettings::load_from(
            &dir.path().join("missing.json"),
            env(&[("OPENAI_TEMPERATURE", "warm")]),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_file_overrides_environment() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("llm_config.json");
        std::fs::write(
            &path,
            json!({
                "fallback_provider": "openai",
                "openai": { "model_name": "gpt-4", "temperature": 0.3 },
                "retry": { "max_retries": 1 }
            })
            .to_string(),
        )
        .unwrap();

        let settings = LlmSettings::load_from(
            &path,
            env(&[("OPENAI_MODEL_NAME", "gpt-4o-mini"), ("OPENAI_API_KEY", "sk-env")]),
        )
        .unwrap();

        assert_eq!(settings.fallback_provider, "openai");
        assert_eq!(settings.openai.model_name, "gpt-4");
        assert_eq!(settings.openai.temperature, 0.3);
        assert_eq!(settings.openai.api_key.as_deref(), Some("sk-env"));
        assert_eq!(settings.retry.max_retries, 1);
        assert_eq!(settings.retry.max_delay_ms, 10_000);
    }

    #[test]
    fn test_malformed_file_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("llm_config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let settings = LlmSettings::load_from(&path, env(&[("LLM_PROVIDER", "ollama")])).unwrap();
        assert_eq!(settings.provider, "ollama");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut settings = LlmSettings::default();
        settings.openai.temperature = 3.5;
        assert!(settings.validate().is_err());

        let mut settings = LlmSettings::default();
        settings.retry.backoff_factor = 1.0;
        assert!(settings.validate().is_err());

        let mut settings = LlmSettings::default();
        settings.ollama.model_name = String::new();
        assert!(settings.validate().is_err());

        let mut settings = LlmSettings::default();
        settings.timeout_seconds = 0;
        assert!(matches!(settings.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_update_from_value_applies_partial_patch() {
        let mut settings = LlmSettings::default();
        settings
            .update_from_value(json!({
                "provider": "ollama",
                "ollama": { "model_name": "llama3:70b" },
                "not_a_setting": 42
            }))
            .unwrap();

        assert_eq!(settings.provider, "ollama");
        assert_eq!(settings.ollama.model_name, "llama3:70b");
        assert_eq!(settings.ollama.top_k, 40);
    }

    #[test]
    fn test_update_from_value_rejects_invalid_result() {
        let mut settings = LlmSettings::default();
        let result = settings.update_from_value(json!({ "openai": { "temperature": 9.0 } }));
        assert!(result.is_err());
        assert_eq!(settings.openai.temperature, 0.7);
    }

    #[tokio::test]
    async fn test_saved_file_is_read_back_by_loader() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("llm_config.json");

        let mut settings = LlmSettings::default();
        settings.openai.model_name = "gpt-4".to_string();
        settings.circuit_breaker.failure_threshold = 5;
        settings.save(&path).await.unwrap();

        let loaded = LlmSettings::load_from(&path, env(&[])).unwrap();
        assert_eq!(loaded.openai.model_name, "gpt-4");
        assert_eq!(loaded.circuit_breaker.failure_threshold, 5);
    }

    #[test]
    fn test_runtime_conversions() {
        let settings = LlmSettings::default();

        let policy = settings.retry_policy();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(10));

        let breaker = settings.breaker_config();
        assert_eq!(breaker.failure_threshold, 3);
        assert_eq!(breaker.reset_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_redacted_masks_api_key() {
        let mut settings = LlmSettings::default();
        settings.openai.api_key = Some("sk-secret".to_string());
        assert_eq!(settings.redacted().openai.api_key.as_deref(), Some("***"));
    }
}
