use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Uniform surface over one language-model backend.
///
/// Implementations own their client connection. `complete` is a single-turn
/// call that returns only the text content of the backend's reply.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Runs each prompt in order and collects the texts.
    async fn generate(&self, prompts: &[String]) -> Result<Vec<String>> {
        let mut generations = Vec::with_capacity(prompts.len());
        for prompt in prompts {
            generations.push(self.complete(prompt).await?);
        }
        Ok(generations)
    }

    fn model_type(&self) -> String;
    fn temperature(&self) -> f32;
    fn set_temperature(&mut self, temperature: f32);
    fn model_name(&self) -> &str;
    fn provider(&self) -> &str;
}

#[async_trait]
impl<M: LanguageModel + ?Sized> LanguageModel for Box<M> {
    async fn complete(&self, prompt: &str) -> Result<String> {
        (**self).complete(prompt).await
    }

    fn model_type(&self) -> String {
        (**self).model_type()
    }

    fn temperature(&self) -> f32 {
        (**self).temperature()
    }

    fn set_temperature(&mut self, temperature: f32) {
        (**self).set_temperature(temperature)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn provider(&self) -> &str {
        (**self).provider()
    }
}

/// Input accepted by [`invoke`]: raw text or an ordered conversation.
#[derive(Debug, Clone)]
pub enum Prompt {
    Text(String),
    Messages(Vec<Message>),
}

impl Prompt {
    /// Messages are joined with newlines; roles are not forwarded.
    pub fn into_text(self) -> String {
        match self {
            Prompt::Text(text) => text,
            Prompt::Messages(messages) => messages
                .into_iter()
                .map(|m| m.content)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<&str> for Prompt {
    fn from(text: &str) -> Self {
        Prompt::Text(text.to_string())
    }
}

impl From<String> for Prompt {
    fn from(text: String) -> Self {
        Prompt::Text(text)
    }
}

impl From<Vec<Message>> for Prompt {
    fn from(messages: Vec<Message>) -> Self {
        Prompt::Messages(messages)
    }
}

/// Invokes any model with either a string or a list of messages.
pub async fn invoke<M>(model: &M, prompt: impl Into<Prompt>) -> Result<String>
where
    M: LanguageModel + ?Sized,
{
    let text = prompt.into().into_text();
    model.complete(&text).await
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageRole {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
    #[serde(rename = "system")]
    System,
}
