use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, error};
use url::Url;

use crate::app::config::OllamaSettings;
use crate::error::{Error, Result};
use crate::models::provider::LanguageModel;

pub const PROVIDER_NAME: &str = "ollama";
pub const BASE_URL_VAR: &str = "OLLAMA_BASE_URL";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
pub struct OllamaOptions {
    pub top_p: f32,
    pub top_k: u32,
    pub num_ctx: u32,
    pub timeout: Duration,
}

impl Default for OllamaOptions {
    fn default() -> Self {
        Self {
            top_p: 0.9,
            top_k: 40,
            num_ctx: 4096,
            timeout: Duration::from_secs(120),
        }
    }
}

impl OllamaOptions {
    pub fn from_settings(settings: &OllamaSettings, timeout_seconds: u64) -> Self {
        Self {
            top_p: settings.top_p,
            top_k: settings.top_k,
            num_ctx: settings.num_ctx,
            timeout: Duration::from_secs(timeout_seconds),
        }
    }
}

/// Explicit URL, then `OLLAMA_BASE_URL`, then the local default.
pub fn resolve_base_url(explicit: Option<String>, from_env: Option<String>) -> Result<String> {
    let raw = explicit
        .or(from_env)
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

    if raw.trim().is_empty() {
        return Err(Error::missing_credential(PROVIDER_NAME, BASE_URL_VAR));
    }

    let parsed = Url::parse(raw.trim())
        .map_err(|e| Error::validation(format!("Invalid Ollama base URL '{}': {}", raw, e)))?;
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

struct OllamaClient {
    http: Client,
    base_url: String,
    temperature: f32,
    options: OllamaOptions,
}

impl OllamaClient {
    async fn chat(&self, model: &str, prompt: &str) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url);

        let request = OllamaRequest {
            model,
            messages: vec![OllamaMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            stream: false,
            options: OllamaRequestOptions {
                temperature: self.temperature,
                top_p: self.options.top_p,
                top_k: self.options.top_k,
                num_ctx: self.options.num_ctx,
            },
        };

        debug!("Sending request to Ollama: model={}, prompt_chars={}", model, prompt.len());
        let start_time = Instant::now();

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::transient(format!("HTTP request failed: {}", e)))?;

        debug!("Ollama request completed in {:?}", start_time.elapsed());

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Ollama API error: {} - {}", status, error_text);
            return Err(Error::transient(format!("API error {}: {}", status, error_text)));
        }

        let body: OllamaResponse = response
            .json()
            .await
            .map_err(|e| Error::transient(format!("Failed to parse response: {}", e)))?;

        Ok(body.message.content)
    }
}

/// Local adapter over an Ollama server's chat endpoint.
pub struct OllamaModel {
    model_name: String,
    temperature: f32,
    client: OllamaClient,
}

impl OllamaModel {
    pub fn new(
        model_name: impl Into<String>,
        temperature: f32,
        base_url: Option<String>,
    ) -> Result<Self> {
        Self::with_options(model_name, temperature, base_url, OllamaOptions::default())
    }

    pub fn with_options(
        model_name: impl Into<String>,
        temperature: f32,
        base_url: Option<String>,
        options: OllamaOptions,
    ) -> Result<Self> {
        let base_url = resolve_base_url(base_url, std::env::var(BASE_URL_VAR).ok())?;
        let model_name = model_name.into();
        let http = Client::builder().timeout(options.timeout).build()?;

        debug!("Created Ollama adapter for model {} at {}", model_name, base_url);

        Ok(Self {
            model_name,
            temperature,
            client: OllamaClient {
                http,
                base_url,
                temperature,
                options,
            },
        })
    }

    pub fn base_url(&self) -> &str {
        &self.client.base_url
    }
}

#[async_trait]
impl LanguageModel for OllamaModel {
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

/// Probes `/api/tags`; unreachable servers report `false` rather than an error.
pub async fn check_availability(base_url: &str) -> Result<bool> {
    let http = Client::builder().timeout(PROBE_TIMEOUT).build()?;
    let url = format!("{}/api/tags", base_url.trim_end_matches('/'));

    match http.get(&url).send().await {
        Ok(response) => Ok(response.status() == StatusCode::OK),
        Err(e) => {
            debug!("Ollama availability probe failed: {}", e);
            Ok(false)
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaRequestOptions,
}

#[derive(Debug, Serialize)]
struct OllamaRequestOptions {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    num_ctx: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
}
