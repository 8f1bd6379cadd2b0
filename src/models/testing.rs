//! Scripted model used by unit tests across the crate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::models::provider::LanguageModel;

#[derive(Debug, Clone, Copy)]
enum Behavior {
    Echo,
    Fixed(&'static str),
    AlwaysFail,
    FailTimes(usize),
}

pub(crate) struct ScriptedModel {
    provider: String,
    model: String,
    temperature: f32,
    behavior: Behavior,
    calls: Arc<AtomicUsize>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedModel {
    fn with_behavior(provider: &str, model: &str, behavior: Behavior) -> Self {
        Self {
            provider: provider.to_string(),
            model: model.to_string(),
            temperature: 0.7,
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Replies with `"<provider> <model>: <prompt>"`.
    pub(crate) fn echo(provider: &str, model: &str) -> Self {
        Self::with_behavior(provider, model, Behavior::Echo)
    }

    pub(crate) fn fixed(provider: &str, model: &str, reply: &'static str) -> Self {
        Self::with_behavior(provider, model, Behavior::Fixed(reply))
    }

    pub(crate) fn failing(provider: &str, model: &str) -> Self {
        Self::with_behavior(provider, model, Behavior::AlwaysFail)
    }

    /// Fails the first `times` calls, then echoes.
    pub(crate) fn flaky(provider: &str, model: &str, times: usize) -> Self {
        Self::with_behavior(provider, model, Behavior::FailTimes(times))
    }

    pub(crate) fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(prompt.to_string());

        match self.behavior {
            Behavior::Echo => Ok(format!("{} {}: {}", self.provider, self.model, prompt)),
            Behavior::Fixed(reply) => Ok(reply.to_string()),
            Behavior::AlwaysFail => Err(Error::transient(format!("{} failed", self.provider))),
            Behavior::FailTimes(times) if call < times => {
                Err(Error::transient(format!("{} failed", self.provider)))
            }
            Behavior::FailTimes(_) => Ok(format!("{} {}: {}", self.provider, self.model, prompt)),
        }
    }

    fn model_type(&self) -> String {
        "scripted".to_string()
    }

    fn temperature(&self) -> f32 {
        self.temperature
    }

    fn set_temperature(&mut self, temperature: f32) {
        self.temperature = temperature;
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> &str {
        &self.provider
    }
}
