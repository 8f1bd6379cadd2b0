use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::provider::{invoke, LanguageModel, Prompt};

/// Parses a model reply as a JSON object carrying every key in
/// `required_keys`. A surrounding Markdown code fence is tolerated.
pub fn parse_json_response(text: &str, required_keys: &[&str]) -> Result<Map<String, Value>> {
    let body = strip_code_fence(text.trim());
    if body.is_empty() {
        return Err(Error::response_format("model returned an empty response"));
    }

    let value: Value = serde_json::from_str(body)
        .map_err(|e| Error::response_format(format!("response is not valid JSON: {}", e)))?;

    let Value::Object(object) = value else {
        return Err(Error::response_format("response is not a JSON object"));
    };

    let missing: Vec<&str> = required_keys
        .iter()
        .copied()
        .filter(|key| !object.contains_key(*key))
        .collect();
    if !missing.is_empty() {
        return Err(Error::response_format(format!(
            "response is missing required keys: {}",
            missing.join(", ")
        )));
    }

    Ok(object)
}

/// [`invoke`] followed by [`parse_json_response`].
pub async fn invoke_structured<M>(
    model: &M,
    prompt: impl Into<Prompt>,
    required_keys: &[&str],
) -> Result<Map<String, Value>>
where
    M: LanguageModel + ?Sized,
{
    let text = invoke(model, prompt).await?;
    debug!("Parsing structured response from {}:{}", model.provider(), model.model_name());
    parse_json_response(&text, required_keys)
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string, e.g. ```json
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}
