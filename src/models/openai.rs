use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, error};
use url::Url;

use crate::app::config::OpenAiSettings;
use crate::error::{Error, Result};
use crate::models::provider::LanguageModel;

pub const PROVIDER_NAME: &str = "openai";
pub const API_KEY_VAR: &str = "OPENAI_API_KEY";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Sampling and transport options for the cloud adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenAiOptions {
    pub base_url: String,
    pub max_tokens: Option<u32>,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub timeout: Duration,
}

impl Default for OpenAiOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            max_tokens: None,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            timeout: Duration::from_secs(60),
        }
    }
}

impl OpenAiOptions {
    pub fn from_settings(settings: &OpenAiSettings, timeout_seconds: u64) -> Self {
        Self {
            base_url: settings.base_url.clone(),
            max_tokens: settings.max_tokens.filter(|&t| t > 0),
            top_p: settings.top_p,
            frequency_penalty: settings.frequency_penalty,
            presence_penalty: settings.presence_penalty,
            timeout: Duration::from_secs(timeout_seconds),
        }
    }
}

/// Picks the explicit key, then the environment value; blank counts as absent.
pub fn resolve_api_key(explicit: Option<String>, from_env: Option<String>) -> Result<String> {
    explicit
        .filter(|k| !k.trim().is_empty())
        .or_else(|| from_env.filter(|k| !k.trim().is_empty()))
        .ok_or_else(|| Error::missing_credential(PROVIDER_NAME, API_KEY_VAR))
}

struct OpenAiClient {
    http: Client,
    api_key: String,
    base_url: String,
    temperature: f32,
    options: OpenAiOptions,
}

impl OpenAiClient {
    fn create_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        let auth_value = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| Error::validation(format!("Invalid API key format: {}", e)))?;
        headers.insert(AUTHORIZATION, auth_value);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Ok(headers)
    }

    async fn chat(&self, model: &str, prompt: &str) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let headers = self.create_headers()?;

        let request = OpenAIRequest {
            model,
            messages: vec![OpenAIMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: self.temperature,
            max_tokens: self.options.max_tokens,
            top_p: self.options.top_p,
            frequency_penalty: self.options.frequency_penalty,
            presence_penalty: self.options.presence_penalty,
            stream: false,
        };

        debug!("Sending request to OpenAI: model={}, prompt_chars={}", model, prompt.len());
        let start_time = Instant::now();

        let response = self
            .http
            .post(&url)
            .headers(headers)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::transient(format!("HTTP request failed: {}", e)))?;

        debug!("OpenAI request completed in {:?}", start_time.elapsed());

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("OpenAI API error: {} - {}", status, error_text);
            return Err(Error::transient(format!("API error {}: {}", status, error_text)));
        }

        let body: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| Error::transient(format!("Failed to parse response: {}", e)))?;

        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| Error::transient("No choices in response"))
    }
}

/// Cloud-hosted adapter over the OpenAI chat completions API.
pub struct OpenAiModel {
    model_name: String,
    temperature: f32,
    client: OpenAiClient,
}

impl OpenAiModel {
    /// Builds the adapter; the key falls back to `OPENAI_API_KEY`.
    pub fn new(
        model_name: impl Into<String>,
        temperature: f32,
        api_key: Option<String>,
    ) -> Result<Self> {
        Self::with_options(model_name, temperature, api_key, OpenAiOptions::default())
    }

    pub fn with_options(
        model_name: impl Into<String>,
        temperature: f32,
        api_key: Option<String>,
        options: OpenAiOptions,
    ) -> Result<Self> {
        let api_key = resolve_api_key(api_key, std::env::var(API_KEY_VAR).ok())?;
        let model_name = model_name.into();

        let base_url = Url::parse(&options.base_url)
            .map_err(|e| Error::validation(format!("Invalid OpenAI base URL '{}': {}", options.base_url, e)))?
            .as_str()
            .trim_end_matches('/')
            .to_string();

        let http = Client::builder().timeout(options.timeout).build()?;

        debug!("Created OpenAI adapter for model {}", model_name);

        Ok(Self {
            model_name,
            temperature,
            client: OpenAiClient {
                http,
                api_key,
                base_url,
                temperature,
                options,
            },
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.client.chat(&self.model_name, prompt).await
    }

    fn model_type(&self) -> String {
        PROVIDER_NAME.to_string()
    }

    fn temperature(&self) -> f32 {
        self.temperature
    }

    fn set_temperature(&mut self, temperature: f32) {
        self.temperature = temperature;
        self.client.temperature = temperature;
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn provider(&self) -> &str {
        PROVIDER_NAME
    }
}

/// Probes the models endpoint; anything but 200 counts as unavailable.
pub async fn check_availability(base_url: &str, api_key: Option<&str>) -> Result<bool> {
    let Some(api_key) = api_key.filter(|k| !k.trim().is_empty()) else {
        debug!("No OpenAI API key configured, reporting unavailable");
        return Ok(false);
    };

    let http = Client::builder().timeout(PROBE_TIMEOUT).build()?;
    let url = format!("{}/v1/models", base_url.trim_end_matches('/'));

    match http.get(&url).bearer_auth(api_key).send().await {
        Ok(response) => Ok(response.status() == StatusCode::OK),
        Err(e) => {
            debug!("OpenAI availability probe failed: {}", e);
            Ok(false)
        }
    }
}

#[derive(Debug, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}
