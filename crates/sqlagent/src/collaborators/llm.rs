use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{CollaboratorError, Interpretation, Interpreter, RewriteRequest, Rewriter, prompts};
use crate::config::LlmSettings;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// OpenAI-compatible chat-completions client used for interpretation and
/// rewriting.
#[derive(Debug, Clone)]
pub struct LlmClient {
    http: reqwest::blocking::Client,
    api_key: String,
    settings: LlmSettings,
}

impl LlmClient {
    pub fn new(api_key: impl Into<String>, settings: LlmSettings) -> Result<Self, reqwest::Error> {
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            settings,
        })
    }

    #[must_use]
    pub fn settings(&self) -> &LlmSettings {
        &self.settings
    }

    fn complete(&self, system: &str, user: &str) -> Result<String, String> {
        let body = json!({
            "model": self.settings.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_tokens,
        });
        let url = format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        );
        debug!(model = %self.settings.model, %url, "calling chat completions");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|error| format!("LLM API call failed: {error}"))?;
        let status = response.status();
        let payload: Value = response
            .json()
            .map_err(|error| format!("failed to decode LLM response: {error}"))?;
        if !status.is_success() {
            let message = payload
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("no error message");
            return Err(format!("LLM API returned {status}: {message}"));
        }

        payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| "no content in LLM response".to_string())
    }
}

impl Interpreter for LlmClient {
    fn interpret(
        &self,
        query: &str,
        schema_description: &str,
    ) -> Result<Interpretation, CollaboratorError> {
        let response = self
            .complete(
                &prompts::identification_prompt(schema_description),
                &prompts::identification_message(query),
            )
            .map_err(CollaboratorError::Interpretation)?;
        parse_interpretation(&response).map_err(CollaboratorError::Interpretation)
    }
}

impl Rewriter for LlmClient {
    fn rewrite(&self, request: &RewriteRequest<'_>) -> Result<String, CollaboratorError> {
        let rewritten = self
            .complete(prompts::rewrite_prompt(), &prompts::rewrite_message(request))
            .map_err(CollaboratorError::Rewrite)?;
        let rewritten = rewritten.trim().trim_matches('"').trim().to_string();
        if rewritten.is_empty() {
            return Err(CollaboratorError::Rewrite(
                "LLM returned an empty rewrite".to_string(),
            ));
        }
        Ok(rewritten)
    }
}

#[derive(Debug, Deserialize)]
struct InterpretationPayload {
    #[serde(default)]
    measures: Vec<String>,

    #[serde(default, alias = "dimensions")]
    group_by: Vec<String>,

    #[serde(default)]
    filters: Vec<String>,
}

/// Parses the interpretation JSON, tolerating a surrounding markdown fence.
pub fn parse_interpretation(response: &str) -> Result<Interpretation, String> {
    let payload: InterpretationPayload = serde_json::from_str(strip_code_fence(response))
        .map_err(|error| format!("failed to parse measure identification: {error}"))?;

    let clean = |values: Vec<String>| {
        values
            .into_iter()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .collect::<Vec<_>>()
    };
    Ok(Interpretation {
        measures: clean(payload.measures),
        dimensions: clean(payload.group_by),
        filters: clean(payload.filters),
    })
}

fn strip_code_fence(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let after_fence = &trimmed[start + 3..];
    let body = after_fence
        .find('\n')
        .map_or(after_fence, |newline| &after_fence[newline + 1..]);
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}
