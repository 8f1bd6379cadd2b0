use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::models::provider::LanguageModel;
use crate::models::retry::RetryPolicy;

/// Which side of a [`FallbackLlm`] answered most recently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveModel {
    Primary,
    Secondary,
}

/// Primary model with an optional secondary, each tried under the same
/// retry policy.
///
/// `provider`, `model_name` and `temperature` always describe the primary,
/// even after a call was served by the secondary. Use
/// [`FallbackLlm::last_successful`] to see who actually answered.
pub struct FallbackLlm {
    primary: Box<dyn LanguageModel>,
    secondary: Option<Box<dyn LanguageModel>>,
    retry_policy: RetryPolicy,
    last_successful: Mutex<ActiveModel>,
}

impl FallbackLlm {
    pub fn new(
        primary: Box<dyn LanguageModel>,
        secondary: Option<Box<dyn LanguageModel>>,
        retry_policy: Option<RetryPolicy>,
    ) -> Self {
        let retry_policy = retry_policy.unwrap_or_default();
        info!(
            "Creating fallback model: primary={}:{}, secondary={}",
            primary.provider(),
            primary.model_name(),
            secondary
                .as_ref()
                .map(|s| format!("{}:{}", s.provider(), s.model_name()))
                .unwrap_or_else(|| "none".to_string())
        );

        Self {
            primary,
            secondary,
            retry_policy,
            last_successful: Mutex::new(ActiveModel::Primary),
        }
    }

    pub fn primary(&self) -> &dyn LanguageModel {
        self.primary.as_ref()
    }

    pub fn secondary(&self) -> Option<&dyn LanguageModel> {
        self.secondary.as_deref()
    }

    pub fn has_fallback(&self) -> bool {
        self.secondary.is_some()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn last_successful(&self) -> ActiveModel {
        *self.last_successful.lock()
    }

    pub fn last_successful_llm(&self) -> &dyn LanguageModel {
        match (self.last_successful(), self.secondary.as_deref()) {
            (ActiveModel::Secondary, Some(secondary)) => secondary,
            _ => self.primary.as_ref(),
        }
    }

    pub fn reset_last_successful(&self) {
        *self.last_successful.lock() = ActiveModel::Primary;
    }
}

#[async_trait]
impl LanguageModel for FallbackLlm {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let primary_error = match self
            .retry_policy
            .execute_with_retry(|| self.primary.complete(prompt))
            .await
        {
            Ok(text) => {
                *self.last_successful.lock() = ActiveModel::Primary;
                return Ok(text);
            }
            Err(e) => e,
        };

        let Some(secondary) = self.secondary.as_ref() else {
            error!("Primary model failed and no fallback is configured: {}", primary_error);
            return Err(Error::NoFallbackAvailable {
                source: Box::new(primary_error),
            });
        };

        warn!(
            "Primary model {} failed: {}. Trying fallback {}...",
            self.primary.model_name(),
            primary_error,
            secondary.model_name()
        );

        match self
            .retry_policy
            .execute_with_retry(|| secondary.complete(prompt))
            .await
        {
            Ok(text) => {
                debug!("Fallback model {} answered", secondary.model_name());
                *self.last_successful.lock() = ActiveModel::Secondary;
                Ok(text)
            }
            Err(e) => {
                error!("Fallback model also failed: {}", e);
                Err(Error::FallbackExhausted {
                    primary: primary_error.to_string(),
                    source: Box::new(e),
                })
            }
        }
    }

    fn model_type(&self) -> String {
        format!("fallback({})", self.primary.model_type())
    }

    fn temperature(&self) -> f32 {
        self.primary.temperature()
    }

    fn set_temperature(&mut self, temperature: f32) {
        self.primary.set_temperature(temperature);
        if let Some(secondary) = self.secondary.as_mut() {
            secondary.set_temperature(temperature);
        }
    }

    fn model_name(&self) -> &str {
        self.primary.model_name()
    }

    fn provider(&self) -> &str {
        self.primary.provider()
    }
}
