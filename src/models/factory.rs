use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::app::config::LlmSettings;
use crate::error::{Error, Result};
use crate::models::circuit_breaker::{availability_check, BreakerRegistry, CircuitBreaker};
use crate::models::fallback::FallbackLlm;
use crate::models::ollama::{self, OllamaModel, OllamaOptions};
use crate::models::openai::{self, OpenAiModel, OpenAiOptions};
use crate::models::provider::LanguageModel;

/// Last-resort configuration tried when every tier failed to build.
const MINIMAL_CLOUD_MODEL: &str = "gpt-3.5-turbo";
const MINIMAL_CLOUD_TEMPERATURE: f32 = 0.7;

/// Speed/accuracy crossed with local/cloud deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderTier {
    LocalFast,
    LocalAccurate,
    CloudFast,
    CloudAccurate,
}

impl ProviderTier {
    pub const ALL: [ProviderTier; 4] = [
        ProviderTier::LocalFast,
        ProviderTier::LocalAccurate,
        ProviderTier::CloudFast,
        ProviderTier::CloudAccurate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderTier::LocalFast => "local_fast",
            ProviderTier::LocalAccurate => "local_accurate",
            ProviderTier::CloudFast => "cloud_fast",
            ProviderTier::CloudAccurate => "cloud_accurate",
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, ProviderTier::LocalFast | ProviderTier::LocalAccurate)
    }

    /// The same speed class on the other deployment side.
    pub fn fallback_tier(&self) -> ProviderTier {
        match self {
            ProviderTier::CloudFast => ProviderTier::LocalFast,
            ProviderTier::CloudAccurate => ProviderTier::LocalAccurate,
            ProviderTier::LocalFast => ProviderTier::CloudFast,
            ProviderTier::LocalAccurate => ProviderTier::CloudAccurate,
        }
    }

    /// Task policy: diagnosis-grade work and sensitive data get the accurate
    /// cloud model, everything else the fast one.
    pub fn for_task(task_kind: &str, sensitive: bool) -> ProviderTier {
        match task_kind {
            _ if sensitive => ProviderTier::CloudAccurate,
            "diagnosis" | "treatment_planning" | "sensitive_data" => ProviderTier::CloudAccurate,
            "summarization" | "extraction" => ProviderTier::CloudFast,
            _ => ProviderTier::CloudFast,
        }
    }
}

impl fmt::Display for ProviderTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderTier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ProviderTier::ALL
            .into_iter()
            .find(|tier| tier.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::UnsupportedTier(s.to_string()))
    }
}

/// Backends this crate can construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    Ollama,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => openai::PROVIDER_NAME,
            ProviderKind::Ollama => ollama::PROVIDER_NAME,
        }
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            openai::PROVIDER_NAME => Ok(ProviderKind::OpenAi),
            ollama::PROVIDER_NAME => Ok(ProviderKind::Ollama),
            _ => Err(Error::UnsupportedProvider(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderProfile {
    pub provider_name: String,
    pub model_id: String,
    pub default_temperature: f32,
}

impl ProviderProfile {
    fn new(provider_name: &str, model_id: &str, default_temperature: f32) -> Self {
        Self {
            provider_name: provider_name.to_string(),
            model_id: model_id.to_string(),
            default_temperature,
        }
    }
}

pub fn default_profiles() -> HashMap<ProviderTier, ProviderProfile> {
    HashMap::from([
        (ProviderTier::LocalFast, ProviderProfile::new(ollama::PROVIDER_NAME, "llama3", 0.7)),
        (ProviderTier::LocalAccurate, ProviderProfile::new(ollama::PROVIDER_NAME, "llama3:70b", 0.5)),
        (ProviderTier::CloudFast, ProviderProfile::new(openai::PROVIDER_NAME, "gpt-3.5-turbo", 0.7)),
        (ProviderTier::CloudAccurate, ProviderProfile::new(openai::PROVIDER_NAME, "gpt-4", 0.5)),
    ])
}

/// Provider that should take over when `provider` is down.
pub fn fallback_provider(provider: &str, settings: &LlmSettings) -> String {
    if provider.eq_ignore_ascii_case(openai::PROVIDER_NAME) {
        settings.fallback_provider.clone()
    } else {
        openai::PROVIDER_NAME.to_string()
    }
}

/// Turns a tier, a task, or an explicit provider/model pair into a ready
/// adapter.
pub struct ProviderFactory {
    settings: LlmSettings,
    profiles: HashMap<ProviderTier, ProviderProfile>,
}

impl ProviderFactory {
    pub fn new(settings: LlmSettings) -> Self {
        Self::with_profiles(settings, default_profiles())
    }

    pub fn with_profiles(settings: LlmSettings, profiles: HashMap<ProviderTier, ProviderProfile>) -> Self {
        Self { settings, profiles }
    }

    pub fn settings(&self) -> &LlmSettings {
        &self.settings
    }

    pub fn profile(&self, tier: ProviderTier) -> Result<&ProviderProfile> {
        self.profiles
            .get(&tier)
            .ok_or_else(|| Error::UnsupportedTier(tier.to_string()))
    }

    /// Profiles in tier declaration order.
    pub fn profiles(&self) -> Vec<(ProviderTier, &ProviderProfile)> {
        ProviderTier::ALL
            .into_iter()
            .filter_map(|tier| self.profiles.get(&tier).map(|p| (tier, p)))
            .collect()
    }

    pub fn create(&self, tier: ProviderTier, temperature: Option<f32>) -> Result<Box<dyn LanguageModel>> {
        let profile = self.profile(tier)?;
        let temperature = temperature.unwrap_or(profile.default_temperature);

        debug!(
            "Resolved tier {} to {}:{} at temperature {}",
            tier, profile.provider_name, profile.model_id, temperature
        );

        self.create_by_provider(&profile.provider_name, &profile.model_id, temperature)
            .map_err(|e| match e {
                Error::UnsupportedProvider(_) => e,
                other => Error::initialization(tier.as_str(), other),
            })
    }

    pub fn create_by_name(&self, tier_name: &str, temperature: Option<f32>) -> Result<Box<dyn LanguageModel>> {
        let tier: ProviderTier = tier_name.parse()?;
        self.create(tier, temperature)
    }

    /// Builds an adapter without going through the tier table.
    pub fn create_by_provider(
        &self,
        provider_name: &str,
        model_id: &str,
        temperature: f32,
    ) -> Result<Box<dyn LanguageModel>> {
        let timeout = self.settings.timeout_seconds;

        match provider_name.parse::<ProviderKind>()? {
            ProviderKind::OpenAi => {
                let api_key = openai::resolve_api_key(self.settings.openai.api_key.clone(), None)?;
                let options = OpenAiOptions::from_settings(&self.settings.openai, timeout);
                Ok(Box::new(OpenAiModel::with_options(model_id, temperature, Some(api_key), options)?))
            }
            ProviderKind::Ollama => {
                let options = OllamaOptions::from_settings(&self.settings.ollama, timeout);
                let base_url = ollama::resolve_base_url(Some(self.settings.ollama.base_url.clone()), None)?;
                Ok(Box::new(OllamaModel::with_options(model_id, temperature, Some(base_url), options)?))
            }
        }
    }

    /// Picks a tier from the task policy; when that tier cannot be built,
    /// tries its local counterpart, then a minimal cloud configuration.
    pub fn select_for_task(
        &self,
        task_kind: &str,
        sensitive: bool,
        temperature: Option<f32>,
    ) -> Result<Box<dyn LanguageModel>> {
        let preferred = ProviderTier::for_task(task_kind, sensitive);
        info!("Selecting {} for task '{}' (sensitive: {})", preferred, task_kind, sensitive);

        let preferred_error = match self.create(preferred, temperature) {
            Ok(model) => return Ok(model),
            Err(e) => e,
        };

        let local = preferred.fallback_tier();
        warn!("Could not create {} model: {}. Trying {}", preferred, preferred_error, local);

        let local_error = match self.create(local, temperature) {
            Ok(model) => return Ok(model),
            Err(e) => e,
        };

        warn!("Could not create {} model: {}. Trying minimal cloud configuration", local, local_error);

        self.create_by_provider(
            openai::PROVIDER_NAME,
            MINIMAL_CLOUD_MODEL,
            temperature.unwrap_or(MINIMAL_CLOUD_TEMPERATURE),
        )
        .map_err(|e| Error::initialization(format!("minimal {}", ProviderTier::CloudFast), e))
    }

    /// Primary from `tier`, secondary from its paired tier when that can be
    /// built, under the configured retry policy.
    pub fn create_with_fallback(&self, tier: ProviderTier, temperature: Option<f32>) -> Result<FallbackLlm> {
        let primary = self.create(tier, temperature)?;

        let secondary_tier = tier.fallback_tier();
        let secondary = match self.create(secondary_tier, temperature) {
            Ok(model) => Some(model),
            Err(e) => {
                warn!("No fallback for {}: {}", tier, e);
                None
            }
        };

        Ok(FallbackLlm::new(primary, secondary, Some(self.settings.retry_policy())))
    }

    /// Like [`Self::create_with_fallback`], but leads with the paired tier
    /// when the primary's dependency is reported unavailable. If the paired
    /// tier cannot be built, `tier` stays the primary.
    pub async fn create_resilient(
        &self,
        tier: ProviderTier,
        registry: &BreakerRegistry,
        temperature: Option<f32>,
    ) -> Result<FallbackLlm> {
        let kind: ProviderKind = self.profile(tier)?.provider_name.parse()?;
        let breaker = self.breaker(registry, kind);

        if breaker.is_available().await {
            return self.create_with_fallback(tier, temperature);
        }

        let swapped = tier.fallback_tier();
        warn!("{} is unavailable, leading with {}", kind.as_str(), swapped);

        match self.create_with_fallback(swapped, temperature) {
            Ok(llm) => Ok(llm),
            Err(e) if e.is_construction_error() => {
                warn!("Could not create {} model: {}. Keeping {} as primary", swapped, e, tier);
                self.create_with_fallback(tier, temperature)
            }
            Err(e) => Err(e),
        }
    }

    /// The registry's breaker for `kind`, wired to that provider's probe.
    pub fn breaker(&self, registry: &BreakerRegistry, kind: ProviderKind) -> Arc<CircuitBreaker> {
        match kind {
            ProviderKind::OpenAi => {
                let base_url = self.settings.openai.base_url.clone();
                let api_key = self.settings.openai.api_key.clone();
                registry.get_or_create(openai::PROVIDER_NAME, move || {
                    availability_check(move || {
                        let base_url = base_url.clone();
                        let api_key = api_key.clone();
                        async move { openai::check_availability(&base_url, api_key.as_deref()).await }
                    })
                })
            }
            ProviderKind::Ollama => {
                let base_url = self.settings.ollama.base_url.clone();
                registry.get_or_create(ollama::PROVIDER_NAME, move || {
                    availability_check(move || {
                        let base_url = base_url.clone();
                        async move { ollama::check_availability(&base_url).await }
                    })
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::circuit_breaker::CircuitBreakerConfig;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings_with_key() -> LlmSettings {
        let mut settings = LlmSettings::default();
        settings.openai.api_key = Some("sk-test".to_string());
        settings
    }

    fn settings_without_key() -> LlmSettings {
        let mut settings = LlmSettings::default();
        settings.openai.api_key = None;
        settings
    }

    fn expect_err(result: Result<Box<dyn LanguageModel>>) -> Error {
        match result {
            Ok(model) => panic!("unexpected model {}:{}", model.provider(), model.model_name()),
            Err(e) => e,
        }
    }

    #[test]
    fn test_create_uses_profile_defaults() {
        let factory = ProviderFactory::new(settings_with_key());

        let local = factory.create(ProviderTier::LocalAccurate, None).unwrap();
        assert_eq!(local.provider(), "ollama");
        assert_eq!(local.model_name(), "llama3:70b");
        assert_eq!(local.temperature(), 0.5);

        let cloud = factory.create(ProviderTier::CloudFast, None).unwrap();
        assert_eq!(cloud.provider(), "openai");
        assert_eq!(cloud.model_name(), "gpt-3.5-turbo");
        assert_eq!(cloud.temperature(), 0.7);
    }

    #[test]
    fn test_temperature_override() {
        let factory = ProviderFactory::new(settings_with_key());
        let model = factory.create(ProviderTier::CloudAccurate, Some(0.1)).unwrap();
        assert_eq!(model.temperature(), 0.1);
    }

    #[test]
    fn test_diagnosis_resolves_to_cloud_accurate() {
        let factory = ProviderFactory::new(settings_with_key());
        let model = factory.select_for_task("diagnosis", true, None).unwrap();

        assert_eq!(model.provider(), "openai");
        assert_eq!(model.model_name(), "gpt-4");
        assert_eq!(model.temperature(), 0.5);
    }

    #[test]
    fn test_task_policy() {
        assert_eq!(ProviderTier::for_task("treatment_planning", false), ProviderTier::CloudAccurate);
        assert_eq!(ProviderTier::for_task("summarization", true), ProviderTier::CloudAccurate);
        assert_eq!(ProviderTier::for_task("summarization", false), ProviderTier::CloudFast);
        assert_eq!(ProviderTier::for_task("extraction", false), ProviderTier::CloudFast);
        assert_eq!(ProviderTier::for_task("triage", false), ProviderTier::CloudFast);
    }

    #[test]
    fn test_unsupported_tier_names_value() {
        let err = "invalid_type".parse::<ProviderTier>().unwrap_err();
        assert!(matches!(err, Error::UnsupportedTier(ref v) if v == "invalid_type"));
        assert!(err.to_string().contains("invalid_type"));

        let factory = ProviderFactory::new(settings_with_key());
        assert!(matches!(
            factory.create_by_name("invalid_type", None),
            Err(Error::UnsupportedTier(_))
        ));
        assert_eq!(factory.create_by_name("CLOUD_FAST", None).unwrap().model_name(), "gpt-3.5-turbo");
    }

    #[test]
    fn test_tier_missing_from_table_is_unsupported() {
        let mut profiles = default_profiles();
        profiles.remove(&ProviderTier::CloudAccurate);
        let factory = ProviderFactory::with_profiles(settings_with_key(), profiles);

        let err = expect_err(factory.create(ProviderTier::CloudAccurate, None));
        assert!(matches!(err, Error::UnsupportedTier(ref v) if v == "cloud_accurate"));
    }

    #[test]
    fn test_unsupported_provider() {
        let factory = ProviderFactory::new(settings_with_key());
        let err = expect_err(factory.create_by_provider("anthropic", "claude", 0.5));
        assert!(matches!(err, Error::UnsupportedProvider(ref v) if v == "anthropic"));
    }

    #[test]
    fn test_missing_key_surfaces_as_initialization_error() {
        let factory = ProviderFactory::new(settings_without_key());
        let err = expect_err(factory.create(ProviderTier::CloudFast, None));

        match err {
            Error::ProviderInitialization { target, source } => {
                assert_eq!(target, "cloud_fast");
                assert!(matches!(*source, Error::MissingCredential { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_select_for_task_falls_back_to_local_pair() {
        let factory = ProviderFactory::new(settings_without_key());

        let model = factory.select_for_task("diagnosis", false, None).unwrap();
        assert_eq!(model.provider(), "ollama");
        assert_eq!(model.model_name(), "llama3:70b");

        let model = factory.select_for_task("extraction", false, None).unwrap();
        assert_eq!(model.model_name(), "llama3");
    }

    #[test]
    fn test_select_for_task_propagates_final_error() {
        let mut settings = settings_without_key();
        settings.ollama.base_url = String::new();
        let factory = ProviderFactory::new(settings);

        let err = expect_err(factory.select_for_task("diagnosis", true, None));
        match err {
            Error::ProviderInitialization { target, source } => {
                assert_eq!(target, "minimal cloud_fast");
                assert!(matches!(*source, Error::MissingCredential { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_fallback_tier_pairing() {
        assert_eq!(ProviderTier::CloudFast.fallback_tier(), ProviderTier::LocalFast);
        assert_eq!(ProviderTier::CloudAccurate.fallback_tier(), ProviderTier::LocalAccurate);
        assert_eq!(ProviderTier::LocalFast.fallback_tier(), ProviderTier::CloudFast);
        assert_eq!(ProviderTier::LocalAccurate.fallback_tier(), ProviderTier::CloudAccurate);
    }

    #[test]
    fn test_fallback_provider_mapping() {
        let settings = LlmSettings::default();
        assert_eq!(fallback_provider("openai", &settings), "ollama");
        assert_eq!(fallback_provider("ollama", &settings), "openai");
        assert_eq!(fallback_provider("other", &settings), "openai");
    }

    #[test]
    fn test_create_with_fallback_pairs_tiers() {
        let factory = ProviderFactory::new(settings_with_key());
        let llm = factory.create_with_fallback(ProviderTier::CloudFast, None).unwrap();

        assert_eq!(llm.provider(), "openai");
        assert_eq!(llm.secondary().unwrap().provider(), "ollama");
        assert_eq!(llm.secondary().unwrap().model_name(), "llama3");
        assert_eq!(llm.retry_policy(), &factory.settings().retry_policy());
    }

    #[test]
    fn test_create_with_fallback_without_buildable_secondary() {
        let factory = ProviderFactory::new(settings_without_key());
        let llm = factory.create_with_fallback(ProviderTier::LocalFast, None).unwrap();

        assert_eq!(llm.provider(), "ollama");
        assert!(!llm.has_fallback());
    }

    #[tokio::test]
    async fn test_create_resilient_keeps_tier_when_swap_cannot_be_built() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let mut settings = settings_without_key();
        settings.ollama.base_url = server.uri();
        let factory = ProviderFactory::new(settings);
        let registry = BreakerRegistry::new(CircuitBreakerConfig::default());

        let llm = factory
            .create_resilient(ProviderTier::LocalFast, &registry, None)
            .await
            .unwrap();

        assert_eq!(llm.provider(), "ollama");
        assert_eq!(llm.model_name(), "llama3");
        assert!(!llm.has_fallback());
        assert_eq!(registry.stats()[0].failure_count, 1);
    }

    #[tokio::test]
    async fn test_create_resilient_leads_with_healthy_side() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "models": [] })))
            .mount(&server)
            .await;

        let mut settings = settings_with_key();
        settings.openai.base_url = server.uri();
        settings.ollama.base_url = server.uri();
        let factory = ProviderFactory::new(settings);
        let registry = BreakerRegistry::new(CircuitBreakerConfig::default());

        let llm = factory
            .create_resilient(ProviderTier::CloudFast, &registry, None)
            .await
            .unwrap();
        assert_eq!(llm.provider(), "ollama");
        assert_eq!(llm.secondary().unwrap().provider(), "openai");

        let llm = factory
            .create_resilient(ProviderTier::LocalAccurate, &registry, None)
            .await
            .unwrap();
        assert_eq!(llm.provider(), "ollama");
        assert_eq!(llm.model_name(), "llama3:70b");
        assert_eq!(registry.len(), 2);
    }
}
