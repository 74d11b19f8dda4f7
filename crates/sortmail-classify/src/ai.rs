use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Serialize, Serializer};
use serde_json::{Value, json};
use tracing::{debug, warn};

use sortmail_content::{strip_non_ascii, strip_urls};
use sortmail_core::{MessageRecord, SortError};

pub const DEFAULT_MODEL_URL: &str = "https://api.deepinfra.com/v1/openai";
pub const DEFAULT_MODEL: &str = "meta-llama/Llama-2-70b-chat-hf";
pub const DEFAULT_MAX_TOKENS: u32 = 256;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

const VALIDATE_PROMPT: &str = "Say Hello";
const VALIDATE_MAX_TOKENS: u32 = 5;

/// A text-completion service. Implementations return the raw completion
/// text for one prompt.
#[async_trait]
pub trait ModelEndpoint: Send + Sync {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_MODEL_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// OpenAI-compatible `chat/completions` client.
pub struct ChatCompletionClient {
    client: reqwest::Client,
    config: ModelConfig,
    api_key: String,
}

impl ChatCompletionClient {
    pub fn new(config: ModelConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            config,
            api_key: api_key.into(),
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Sends a tiny prompt to check that the key is accepted.
    pub async fn validate(&self) -> Result<()> {
        let reply = self.complete(VALIDATE_PROMPT, VALIDATE_MAX_TOKENS).await?;
        debug!(reply = %reply, "model key validated");
        Ok(())
    }

    fn endpoint_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl ModelEndpoint for ChatCompletionClient {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let payload = json!({
            "model": self.config.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": max_tokens,
            "stream": false,
        });
        let url = self.endpoint_url();
        debug!(%url, max_tokens, prompt_len = prompt.len(), "model request");
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SortError::ModelCall(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SortError::ModelCall(format!(
                "completion request failed with status {}: {}",
                status, body
            ))
            .into());
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SortError::ModelCall(e.to_string()))?;
        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| SortError::ModelCall("completion has no message content".to_string()))?;
        Ok(content.trim().to_string())
    }
}

/// How many times a model call is attempted and how long to wait between
/// attempts. The default makes exactly one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < attempts => {
                    warn!(attempt, attempts, error = %err, "model call failed, retrying");
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    Yes,
    No,
    Unknown,
}

impl Label {
    pub fn as_str(self) -> &'static str {
        match self {
            Label::Yes => "1",
            Label::No => "0",
            Label::Unknown => "N/A",
        }
    }
}

impl Serialize for Label {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AiLabel<'a> {
    pub message: &'a MessageRecord,
    pub label: Label,
}

/// Reads `{"Output": 0|1}`. Anything else, including other values of
/// `Output`, is `Unknown`.
pub fn parse_label(completion: &str) -> Label {
    let Ok(value) = serde_json::from_str::<Value>(completion.trim()) else {
        return Label::Unknown;
    };
    match value.get("Output") {
        Some(Value::Number(n)) => match n.as_i64() {
            Some(1) => Label::Yes,
            Some(0) => Label::No,
            _ => Label::Unknown,
        },
        Some(Value::String(s)) => match s.trim() {
            "1" => Label::Yes,
            "0" => Label::No,
            _ => Label::Unknown,
        },
        _ => Label::Unknown,
    }
}

pub fn build_prompt(category: &str, message: &MessageRecord) -> String {
    let email = format!("{}\n{}\n{}", message.from, message.subject, message.body);
    let prompt = format!(
        "Assess whether the email falls under the '{}' category.\nEmail: {}.\nIf yes, return {{\"Output\": 1}}, else {{\"Output\": 0}}.",
        category, email
    );
    strip_urls(&strip_non_ascii(&prompt))
}

pub struct AiClassifier<E> {
    endpoint: E,
    retry: RetryPolicy,
    max_tokens: u32,
}

impl<E: ModelEndpoint> AiClassifier<E> {
    pub fn new(endpoint: E) -> Self {
        Self {
            endpoint,
            retry: RetryPolicy::none(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens.max(1);
        self
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    /// Labels each message in order with one model call apiece. An
    /// unreadable completion labels that message `N/A`; a failed call stops
    /// the batch.
    pub async fn classify<'a>(
        &self,
        messages: &'a [MessageRecord],
        category: &str,
    ) -> Result<Vec<AiLabel<'a>>> {
        let mut out = Vec::with_capacity(messages.len());
        for message in messages {
            let prompt = build_prompt(category, message);
            let completion = self
                .retry
                .run(|| self.endpoint.complete(&prompt, self.max_tokens))
                .await
                .map_err(|err| model_call_error(err, &message.id))?;
            let label = parse_label(&completion);
            if label == Label::Unknown {
                warn!(id = %message.id, completion = %completion, "unreadable model label");
            }
            out.push(AiLabel { message, label });
        }
        debug!(category, count = out.len(), "ai classify");
        Ok(out)
    }
}

fn model_call_error(err: anyhow::Error, id: &str) -> anyhow::Error {
    let detail = match err.downcast::<SortError>() {
        Ok(SortError::ModelCall(detail)) => detail,
        Ok(other) => other.to_string(),
        Err(other) => other.to_string(),
    };
    SortError::ModelCall(format!("message {}: {}", id, detail)).into()
}
