use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported provider tier: {0}")]
    UnsupportedTier(String),

    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("Missing credential for {provider}: set {variable} or pass it explicitly")]
    MissingCredential { provider: String, variable: String },

    #[error("Failed to initialize provider for {target}: {source}")]
    ProviderInitialization {
        target: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Model call failed: {0}")]
    TransientCall(String),

    #[error("Primary model failed and no fallback is available: {source}")]
    NoFallbackAvailable {
        #[source]
        source: Box<Error>,
    },

    #[error("Primary and fallback models both failed (primary: {primary}): {source}")]
    FallbackExhausted {
        primary: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Response format error: {0}")]
    ResponseFormat(String),

    #[error("Circuit breaker '{0}' is open")]
    CircuitOpen(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl Error {
    pub fn transient(msg: impl Into<String>) -> Self {
        Error::TransientCall(msg.into())
    }

    pub fn response_format(msg: impl Into<String>) -> Self {
        Error::ResponseFormat(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn missing_credential(provider: impl Into<String>, variable: impl Into<String>) -> Self {
        Error::MissingCredential {
            provider: provider.into(),
            variable: variable.into(),
        }
    }

    pub fn initialization(target: impl Into<String>, source: Error) -> Self {
        Error::ProviderInitialization {
            target: target.into(),
            source: Box::new(source),
        }
    }

    /// Call-time failures are worth another attempt; configuration and
    /// construction failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::TransientCall(_) | Error::Http(_) | Error::Io(_))
    }

    /// Construction-time failure: bad tier, unknown provider or missing secret.
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedTier(_)
                | Error::UnsupportedProvider(_)
                | Error::MissingCredential { .. }
                | Error::ProviderInitialization { .. }
                | Error::Config(_)
                | Error::Validation(_)
        )
    }
}
