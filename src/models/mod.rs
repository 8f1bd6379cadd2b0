pub mod provider;
pub mod openai;
pub mod ollama;
pub mod circuit_breaker;
pub mod retry;
pub mod fallback;
pub mod factory;

#[cfg(test)]
pub(crate) mod testing;

pub use provider::{invoke, LanguageModel, Message, MessageRole, Prompt};
pub use circuit_breaker::{
    availability_check, AvailabilityCheck, BreakerRegistry, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerStats, CircuitState,
};
pub use retry::RetryPolicy;
pub use fallback::{ActiveModel, FallbackLlm};
pub use factory::{ProviderFactory, ProviderKind, ProviderProfile, ProviderTier};
pub use openai::OpenAiModel;
pub use ollama::OllamaModel;
