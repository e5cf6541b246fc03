//! The text-generation service.
//!
//! Stages talk to [`GenerationClient`] only. [`AnthropicClient`] is the
//! production implementation over the Messages API; [`ScriptedClient`]
//! replays canned replies for tests and dry runs.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use lorekeep_core::LoreError;
use lorekeep_core::config::AiConfig;

use crate::cancel::RunBudget;
use crate::error::ExternalError;

pub const API_KEY_VAR: &str = "ANTHROPIC_API_KEY";
pub const MODEL_VAR: &str = "LOREKEEP_MODEL";

const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_RETRIES: u32 = 2;
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// One prompt for the service.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl CompletionRequest {
    #[must_use]
    pub fn new(prompt: impl Into<String>, ai: &AiConfig) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens: ai.max_tokens,
            temperature: ai.temperature,
        }
    }
}

/// Prompt in, text out.
pub trait GenerationClient: Send + Sync {
    /// Model name for logs and changelog descriptions.
    fn model(&self) -> &str;

    /// Run one completion. Implementations wait only through `budget`.
    fn complete(&self, request: &CompletionRequest, budget: &RunBudget)
    -> Result<String, ExternalError>;
}

// ---------------------------------------------------------------------------
// Messages API client
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    messages: [Message<'a>; 1],
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Blocking client for the Messages API with retry and backoff.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    api_key: String,
    model: String,
    endpoint: String,
    agent: ureq::Agent,
}

impl AnthropicClient {
    #[must_use]
    pub fn new(api_key: String, model: String) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Self {
            api_key,
            model,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            agent,
        }
    }

    /// Build from the environment. A missing or empty key fails here, before
    /// any run starts. `LOREKEEP_MODEL` overrides the configured model.
    pub fn from_env(ai: &AiConfig) -> Result<Self, LoreError> {
        let api_key = std::env::var(API_KEY_VAR)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(LoreError::MissingCredential(API_KEY_VAR))?;
        let model = std::env::var(MODEL_VAR)
            .ok()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| ai.model.clone());
        Ok(Self::new(api_key, model))
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn send(&self, body: &str, budget: &RunBudget) -> Result<String, ExternalError> {
        let timeout = budget
            .remaining()
            .map_or(REQUEST_TIMEOUT, |left| left.min(REQUEST_TIMEOUT));
        let response = self
            .agent
            .post(&self.endpoint)
            .timeout(timeout)
            .set("x-api-key", &self.api_key)
            .set("anthropic-version", API_VERSION)
            .set("content-type", "application/json")
            .send_string(body)
            .map_err(|err| match err {
                ureq::Error::Status(status, response) => ExternalError::Status {
                    status,
                    body: response.into_string().unwrap_or_default(),
                },
                ureq::Error::Transport(transport) => ExternalError::Transport(transport.to_string()),
            })?;

        let reply: MessagesResponse = response
            .into_json()
            .map_err(|err| ExternalError::Malformed(format!("undecodable reply: {err}")))?;
        first_text(reply)
    }
}

fn first_text(reply: MessagesResponse) -> Result<String, ExternalError> {
    reply
        .content
        .into_iter()
        .find(|b| b.kind == "text")
        .and_then(|b| b.text)
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ExternalError::Malformed("reply has no text block".to_string()))
}

impl GenerationClient for AnthropicClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn complete(
        &self,
        request: &CompletionRequest,
        budget: &RunBudget,
    ) -> Result<String, ExternalError> {
        let body = serde_json::to_string(&MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            messages: [Message {
                role: "user",
                content: &request.prompt,
            }],
        })
        .map_err(|err| ExternalError::Malformed(format!("request encoding: {err}")))?;

        let mut attempt = 0;
        loop {
            budget.check()?;
            match self.send(&body, budget) {
                Ok(text) => {
                    debug!(model = %self.model, attempt, chars = text.len(), "completion received");
                    return Ok(text);
                }
                Err(err) if err.is_retryable() && attempt < MAX_RETRIES => {
                    warn!(attempt, error = %err, "generation request failed, retrying");
                    budget.sleep(BACKOFF_BASE * 2u32.pow(attempt))?;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(attempt, error = %err, "generation request failed");
                    return Err(err);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Scripted client
// ---------------------------------------------------------------------------

/// Replays queued replies in order and records every prompt it was sent.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    replies: Mutex<VecDeque<Result<String, ExternalError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful reply.
    #[must_use]
    pub fn reply(self, text: impl Into<String>) -> Self {
        self.push(Ok(text.into()));
        self
    }

    /// Queue a failure.
    #[must_use]
    pub fn fail(self, err: ExternalError) -> Self {
        self.push(Err(err));
        self
    }

    pub fn push(&self, reply: Result<String, ExternalError>) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
    }

    /// Prompts received so far, oldest first.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Replies not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|r| r.len()).unwrap_or_default()
    }
}

impl GenerationClient for ScriptedClient {
    fn model(&self) -> &'static str {
        "scripted"
    }

    fn complete(
        &self,
        request: &CompletionRequest,
        budget: &RunBudget,
    ) -> Result<String, ExternalError> {
        budget.check()?;
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(request.prompt.clone());
        }
        self.replies
            .lock()
            .ok()
            .and_then(|mut r| r.pop_front())
            .unwrap_or_else(|| Err(ExternalError::Transport("no scripted reply left".to_string())))
    }
}

// ---------------------------------------------------------------------------
// Reply parsing
// ---------------------------------------------------------------------------

/// Strip a surrounding markdown code fence, if any.
#[must_use]
pub fn strip_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Decode the outermost JSON object in a reply, tolerating prose or a code
/// fence around it.
pub fn parse_object<T: DeserializeOwned>(reply: &str) -> Result<T, ExternalError> {
    parse_between(reply, '{', '}')
}

/// Decode the outermost JSON array in a reply.
pub fn parse_array<T: DeserializeOwned>(reply: &str) -> Result<Vec<T>, ExternalError> {
    parse_between(reply, '[', ']')
}

fn parse_between<T: DeserializeOwned>(reply: &str, open: char, close: char) -> Result<T, ExternalError> {
    let text = strip_fence(reply);
    let start = text.find(open);
    let end = text.rfind(close);
    let (Some(start), Some(end)) = (start, end) else {
        return Err(ExternalError::Malformed(format!(
            "no JSON {} in reply",
            if open == '{' { "object" } else { "array" }
        )));
    };
    if end < start {
        return Err(ExternalError::Malformed("unbalanced JSON in reply".to_string()));
    }
    serde_json::from_str(&text[start..=end])
        .map_err(|err| ExternalError::Malformed(format!("invalid JSON: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use serde_json::Value;

    fn budget() -> RunBudget {
        RunBudget::unlimited(CancelToken::new())
    }

    fn request(prompt: &str) -> CompletionRequest {
        CompletionRequest::new(prompt, &AiConfig::default())
    }

    #[test]
    fn scripted_replays_in_order() {
        let client = ScriptedClient::new()
            .reply("one")
            .fail(ExternalError::Malformed("bad".into()));
        assert_eq!(client.complete(&request("a"), &budget()).unwrap(), "one");
        assert!(matches!(
            client.complete(&request("b"), &budget()),
            Err(ExternalError::Malformed(_))
        ));
        assert!(matches!(
            client.complete(&request("c"), &budget()),
            Err(ExternalError::Transport(_))
        ));
        assert_eq!(client.prompts(), vec!["a", "b", "c"]);
    }

    #[test]
    fn scripted_respects_cancellation() {
        let token = CancelToken::new();
        token.cancel();
        let client = ScriptedClient::new().reply("unused");
        let result = client.complete(&request("a"), &RunBudget::unlimited(token));
        assert!(matches!(result, Err(ExternalError::Cancelled)));
        assert_eq!(client.remaining(), 1);
        assert!(client.prompts().is_empty());
    }

    #[test]
    fn object_extracted_from_prose_and_fences() {
        let reply = "Here you go:\n```json\n{\"title\": \"Gorm\", \"n\": 2}\n```\n";
        let value: Value = parse_object(reply).unwrap();
        assert_eq!(value["title"], "Gorm");

        let bare: Value = parse_object("{\"a\": 1}").unwrap();
        assert_eq!(bare["a"], 1);
    }

    #[test]
    fn array_extracted() {
        let names: Vec<Value> = parse_array("Found: [{\"name\": \"Gorm\"}] done").unwrap();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn non_json_is_malformed() {
        let err = parse_object::<Value>("I could not find anything.").unwrap_err();
        assert!(matches!(err, ExternalError::Malformed(_)));
        let err = parse_object::<Value>("{ title: nope }").unwrap_err();
        assert!(err.to_string().starts_with("malformed reply: invalid JSON"));
    }

    #[test]
    fn fence_without_language() {
        assert_eq!(strip_fence("```\n# Gorm\n```"), "# Gorm");
        assert_eq!(strip_fence("  # Gorm  "), "# Gorm");
    }

    #[test]
    fn text_block_required() {
        let reply: MessagesResponse =
            serde_json::from_str(r#"{"content":[{"type":"thinking"},{"type":"text","text":"hi"}]}"#)
                .unwrap();
        assert_eq!(first_text(reply).unwrap(), "hi");
        let empty: MessagesResponse = serde_json::from_str(r#"{"content":[]}"#).unwrap();
        assert!(matches!(first_text(empty), Err(ExternalError::Malformed(_))));
    }

    #[test]
    fn request_body_shape() {
        let body = serde_json::to_value(MessagesRequest {
            model: "m",
            max_tokens: 10,
            temperature: 0.5,
            messages: [Message {
                role: "user",
                content: "hello",
            }],
        })
        .unwrap();
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hello");
        assert_eq!(body["max_tokens"], 10);
    }
}
