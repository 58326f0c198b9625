use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::EndpointError;

const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ERROR_BODY_LIMIT: usize = 200;
const LOCAL_QUOTE_LIMIT: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Anything that turns a chat request into a completion. One call, no retries.
#[async_trait]
pub trait CompletionEndpoint: Send + Sync {
    async fn send(&self, request: &CompletionRequest) -> Result<Completion, EndpointError>;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenRouter,
    OpenAi,
    Local,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenRouter => "openrouter",
            Provider::OpenAi => "openai",
            Provider::Local => "local",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "openrouter" => Some(Provider::OpenRouter),
            "openai" => Some(Provider::OpenAi),
            "local" => Some(Provider::Local),
            _ => None,
        }
    }
}

/// OpenAI-compatible `chat/completions` endpoint (OpenRouter or OpenAI).
#[derive(Clone)]
pub struct HttpEndpoint {
    http: Client,
    provider: Provider,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for HttpEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEndpoint")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpEndpoint {
    pub fn from_env(provider: Provider) -> Result<Self, EndpointError> {
        let (base_url, api_key) = match provider {
            Provider::OpenRouter => (
                OPENROUTER_BASE_URL.to_string(),
                read_api_key("OPENROUTER_API_KEY")?,
            ),
            Provider::OpenAi => (
                env::var("OPENAI_BASE_URL").unwrap_or_else(|_| OPENAI_BASE_URL.to_string()),
                read_api_key("OPENAI_API_KEY")?,
            ),
            Provider::Local => {
                return Err(EndpointError::Config(
                    "the local provider has no HTTP endpoint".to_string(),
                ))
            }
        };
        Self::new(provider, base_url, api_key)
    }

    pub fn new(
        provider: Provider,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, EndpointError> {
        let http = Client::builder()
            .build()
            .map_err(|err| EndpointError::Config(err.to_string()))?;
        Ok(Self {
            http,
            provider,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl CompletionEndpoint for HttpEndpoint {
    async fn send(&self, request: &CompletionRequest) -> Result<Completion, EndpointError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self.http.post(&url).bearer_auth(&self.api_key).json(request);
        if self.provider == Provider::OpenRouter {
            builder = builder.header("X-Title", "DocMatrix");
        }
        let response = builder.send().await.map_err(|err| {
            if err.is_timeout() {
                EndpointError::Timeout(Duration::ZERO)
            } else {
                EndpointError::Connection(err.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(EndpointError::Status {
                status: status.as_u16(),
                body: body.chars().take(ERROR_BODY_LIMIT).collect(),
                retry_after,
            });
        }

        let value: Value = response
            .json()
            .await
            .map_err(|err| EndpointError::Malformed(err.to_string()))?;
        decode_chat_completion(&value)
    }

    fn name(&self) -> &str {
        self.provider.as_str()
    }
}

fn read_api_key(var: &str) -> Result<String, EndpointError> {
    let value = env::var(var).map_err(|_| EndpointError::Config(format!("{var} is not set")))?;
    validate_api_key(var, &value)?;
    Ok(value)
}

fn validate_api_key(var: &str, value: &str) -> Result<(), EndpointError> {
    if var.contains("OPENROUTER") && !value.starts_with("sk-or-") {
        return Err(EndpointError::Config(format!("{var} must start with 'sk-or-'")));
    }
    if var.contains("OPENAI") && !value.starts_with("sk-") {
        return Err(EndpointError::Config(format!(
            "{var} must start with 'sk-' (see https://platform.openai.com/)"
        )));
    }
    Ok(())
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let text = headers.get(RETRY_AFTER)?.to_str().ok()?;
    let secs: f64 = text.trim().parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

fn decode_chat_completion(value: &Value) -> Result<Completion, EndpointError> {
    let text = value
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| EndpointError::Malformed("missing choices[0].message.content".to_string()))?;
    let usage = |field: &str| {
        value
            .get("usage")
            .and_then(|usage| usage.get(field))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    };
    Ok(Completion {
        text: text.to_string(),
        input_tokens: usage("prompt_tokens"),
        output_tokens: usage("completion_tokens"),
    })
}

/// Offline endpoint producing deterministic, well-formed replies from the prompt itself.
#[derive(Debug, Clone, Default)]
pub struct LocalEndpoint;

#[async_trait]
impl CompletionEndpoint for LocalEndpoint {
    async fn send(&self, request: &CompletionRequest) -> Result<Completion, EndpointError> {
        let user = request
            .messages
            .iter()
            .rev()
            .find(|message| message.role == "user")
            .map(|message| message.content.as_str())
            .unwrap_or_default();
        let text = synthesize_local_reply(user);
        let input_tokens = request
            .messages
            .iter()
            .map(|message| estimate_tokens(&message.content))
            .sum();
        Ok(Completion {
            output_tokens: estimate_tokens(&text),
            input_tokens,
            text,
        })
    }

    fn name(&self) -> &str {
        Provider::Local.as_str()
    }
}

fn estimate_tokens(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

fn synthesize_local_reply(user: &str) -> String {
    let document = extract_block(user, "Document:", "\n---");
    let quote = document.as_deref().and_then(leading_quote);
    let answer = match &quote {
        Some(quote) => format!("The document opens with [[cite:\"{quote}\"]]."),
        None => "The document does not address this question.".to_string(),
    };

    if let Some(questions) = extract_block(user, "Questions:", "\n\n") {
        let answers: serde_json::Map<String, Value> = questions
            .lines()
            .filter_map(question_id)
            .map(|id| (id, json!({ "answer": answer })))
            .collect();
        return json!({ "answers": answers }).to_string();
    }
    if document.is_some() {
        let (answer, citations): (String, Vec<Value>) = match &quote {
            Some(quote) => (
                "The document opens with [1].".to_string(),
                vec![json!({ "text": quote })],
            ),
            None => (answer, Vec::new()),
        };
        return json!({ "answer": answer, "citations": citations }).to_string();
    }
    let words: Vec<&str> = user.split_whitespace().take(40).collect();
    format!("Summary: {}", words.join(" "))
}

fn extract_block(text: &str, start_marker: &str, stop_marker: &str) -> Option<String> {
    let start = text.find(start_marker)? + start_marker.len();
    let rest = &text[start..];
    let end = rest.find(stop_marker).unwrap_or(rest.len());
    let block = rest[..end].trim();
    (!block.is_empty()).then(|| block.to_string())
}

/// `N. [id] question` lines carry the column id in brackets.
fn question_id(line: &str) -> Option<String> {
    let open = line.find('[')?;
    let close = line[open..].find(']')? + open;
    let id = line[open + 1..close].trim();
    (!id.is_empty()).then(|| id.to_string())
}

/// A verbatim prefix of the first non-empty line, cut on a word boundary.
fn leading_quote(document: &str) -> Option<String> {
    let line = document.lines().map(str::trim).find(|line| !line.is_empty())?;
    let line = line.split('"').next().unwrap_or_default();
    let mut quote = String::new();
    for word in line.split(' ') {
        let next_len = quote.chars().count() + word.chars().count() + 1;
        if !quote.is_empty() && next_len > LOCAL_QUOTE_LIMIT {
            break;
        }
        if !quote.is_empty() {
            quote.push(' ');
        }
        quote.push_str(word);
    }
    let quote = quote.trim().to_string();
    (!quote.is_empty()).then_some(quote)
}
