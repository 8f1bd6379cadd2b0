pub mod config;
pub mod state;

pub use config::{
    CircuitBreakerSettings, EnvironmentSource, LlmSettings, OllamaSettings, OpenAiSettings, RetrySettings,
};
pub use state::{AppState, ProviderHealth};
