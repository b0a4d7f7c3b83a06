use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::{header::HeaderValue, Client, RequestBuilder, StatusCode};
use serde_json::{json, Map, Value};
use std::env;
use std::str::FromStr;
use tokio::time::{sleep, Duration};

const MAX_RETRIES: usize = 4;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    Gemini,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::Gemini => "gemini",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "gpt-4o-mini",
            LlmProvider::Anthropic => "claude-3-5-sonnet-latest",
            LlmProvider::Gemini => "gemini-2.5-flash",
        }
    }

    pub fn api_key_var(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "OPENAI_API_KEY",
            LlmProvider::Anthropic => "ANTHROPIC_API_KEY",
            LlmProvider::Gemini => "GEMINI_API_KEY",
        }
    }
}

impl FromStr for LlmProvider {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "openai" => Ok(LlmProvider::OpenAi),
            "anthropic" | "claude" => Ok(LlmProvider::Anthropic),
            "gemini" | "google" => Ok(LlmProvider::Gemini),
            other => Err(anyhow!("unknown provider {other}")),
        }
    }
}

/// A file sent inline with the prompt.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttachmentKind {
    Image,
    Pdf,
    Text,
    Binary,
}

impl Attachment {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    fn kind(&self) -> AttachmentKind {
        let mime = self.mime_type.as_str();
        if mime.starts_with("image/") {
            AttachmentKind::Image
        } else if mime == "application/pdf" {
            AttachmentKind::Pdf
        } else if mime.starts_with("text/") || mime == "application/json" {
            AttachmentKind::Text
        } else {
            AttachmentKind::Binary
        }
    }

    fn base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64())
    }

    fn as_text(&self) -> String {
        format!(
            "File {} ({}):\n{}",
            self.file_name,
            self.mime_type,
            String::from_utf8_lossy(&self.bytes)
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub user: String,
    pub attachment: Option<Attachment>,
    /// Ask the provider for a JSON body where it supports that.
    pub json_output: bool,
    /// JSON schema for providers that accept one natively.
    pub response_schema: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl LlmResponse {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    provider: LlmProvider,
    model: String,
    config: ProviderConfig,
}

#[derive(Clone)]
enum ProviderConfig {
    OpenAi { api_key: String, base_url: String },
    Anthropic { api_key: String, max_tokens: u32 },
    Gemini { api_key: String },
}

impl LlmClient {
    pub fn new(provider: LlmProvider, model: impl Into<String>) -> Result<Self> {
        Self::with_timeout(provider, model, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        provider: LlmProvider,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let model = model.into();
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        let api_key = read_api_key(provider.api_key_var())?;
        let config = match provider {
            LlmProvider::OpenAi => ProviderConfig::OpenAi {
                api_key,
                base_url: env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            },
            LlmProvider::Anthropic => ProviderConfig::Anthropic {
                api_key,
                max_tokens: env::var("ANTHROPIC_MAX_TOKENS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(8192),
            },
            LlmProvider::Gemini => ProviderConfig::Gemini { api_key },
        };
        Ok(Self {
            http,
            provider,
            model,
            config,
        })
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn chat(&self, req: &LlmRequest) -> Result<LlmResponse> {
        match &self.config {
            ProviderConfig::OpenAi { api_key, base_url } => {
                let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
                let payload = openai_payload(&self.model, req);
                let value = self
                    .send_with_retry("openai", || {
                        self.http.post(&url).bearer_auth(api_key).json(&payload)
                    })
                    .await?;
                let content = extract_openai_text(&value)
                    .ok_or_else(|| anyhow!("missing text in OpenAI response"))?;
                let usage = value.get("usage");
                Ok(LlmResponse {
                    content,
                    prompt_tokens: usage_field(usage, "prompt_tokens"),
                    completion_tokens: usage_field(usage, "completion_tokens"),
                })
            }
            ProviderConfig::Anthropic {
                api_key,
                max_tokens,
            } => {
                let payload = anthropic_payload(&self.model, *max_tokens, req);
                let value = self
                    .send_with_retry("anthropic", || {
                        self.http
                            .post("https://api.anthropic.com/v1/messages")
                            .header("x-api-key", api_key)
                            .header("anthropic-version", "2023-06-01")
                            .json(&payload)
                    })
                    .await?;
                let content = value
                    .get("content")
                    .and_then(Value::as_array)
                    .and_then(|parts| {
                        parts
                            .iter()
                            .find_map(|part| part.get("text").and_then(Value::as_str))
                    })
                    .map(str::to_string)
                    .ok_or_else(|| anyhow!("missing text in Anthropic response"))?;
                let usage = value.get("usage");
                Ok(LlmResponse {
                    content,
                    prompt_tokens: usage_field(usage, "input_tokens"),
                    completion_tokens: usage_field(usage, "output_tokens"),
                })
            }
            ProviderConfig::Gemini { api_key } => {
                let url = format!(
                    "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
                    self.model
                );
                let payload = gemini_payload(req);
                let value = self
                    .send_with_retry("gemini", || {
                        self.http
                            .post(&url)
                            .header("x-goog-api-key", api_key)
                            .json(&payload)
                    })
                    .await?;
                let content = value
                    .get("candidates")
                    .and_then(Value::as_array)
                    .and_then(|candidates| candidates.first())
                    .and_then(|candidate| candidate.pointer("/content/parts"))
                    .and_then(Value::as_array)
                    .map(|parts| {
                        parts
                            .iter()
                            .filter_map(|part| part.get("text").and_then(Value::as_str))
                            .collect::<String>()
                    })
                    .filter(|text| !text.is_empty())
                    .ok_or_else(|| anyhow!("missing text in Gemini response"))?;
                let usage = value.get("usageMetadata");
                Ok(LlmResponse {
                    content,
                    prompt_tokens: usage_field(usage, "promptTokenCount"),
                    completion_tokens: usage_field(usage, "candidatesTokenCount"),
                })
            }
        }
    }

    async fn send_with_retry<F>(&self, label: &str, build: F) -> Result<Value>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let response = match build().send().await {
                Ok(resp) => resp,
                Err(err) => {
                    if attempt > MAX_RETRIES || err.is_timeout() {
                        return Err(err).with_context(|| format!("{label} request failed"));
                    }
                    tracing::debug!(provider = label, attempt, error = %err, "retrying request");
                    sleep(backoff_delay(attempt, None)).await;
                    continue;
                }
            };
            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                if attempt > MAX_RETRIES {
                    return Err(anyhow!(
                        "{label} returned {status} after {MAX_RETRIES} retries"
                    ));
                }
                let wait = backoff_delay(attempt, response.headers().get("retry-after"));
                tracing::debug!(provider = label, attempt, %status, ?wait, "backing off");
                sleep(wait).await;
                continue;
            }
            let body = response.text().await.unwrap_or_default();
            if !status.is_success() {
                return Err(anyhow!("{label} returned error (status {status}): {body}"));
            }
            return serde_json::from_str(&body)
                .with_context(|| format!("failed to decode {label} response"));
        }
    }
}

fn openai_payload(model: &str, req: &LlmRequest) -> Value {
    let mut messages = Vec::new();
    if let Some(system) = &req.system {
        messages.push(json!({ "role": "system", "content": system }));
    }
    let mut content = vec![json!({ "type": "text", "text": req.user })];
    if let Some(file) = &req.attachment {
        content.push(match file.kind() {
            AttachmentKind::Image => json!({
                "type": "image_url",
                "image_url": { "url": file.data_url() },
            }),
            AttachmentKind::Text => json!({ "type": "text", "text": file.as_text() }),
            AttachmentKind::Pdf | AttachmentKind::Binary => json!({
                "type": "file",
                "file": { "filename": file.file_name, "file_data": file.data_url() },
            }),
        });
    }
    messages.push(json!({ "role": "user", "content": content }));
    let mut payload = json!({
        "model": model,
        "messages": messages,
    });
    if req.json_output || req.response_schema.is_some() {
        payload["response_format"] = json!({ "type": "json_object" });
    }
    payload
}

fn anthropic_payload(model: &str, max_tokens: u32, req: &LlmRequest) -> Value {
    let mut content = Vec::new();
    if let Some(file) = &req.attachment {
        content.push(match file.kind() {
            AttachmentKind::Image => json!({
                "type": "image",
                "source": { "type": "base64", "media_type": file.mime_type, "data": file.base64() },
            }),
            AttachmentKind::Pdf => json!({
                "type": "document",
                "source": { "type": "base64", "media_type": "application/pdf", "data": file.base64() },
            }),
            AttachmentKind::Text | AttachmentKind::Binary => {
                json!({ "type": "text", "text": file.as_text() })
            }
        });
    }
    content.push(json!({ "type": "text", "text": req.user }));
    let mut payload = json!({
        "model": model,
        "max_tokens": max_tokens,
        "messages": [ { "role": "user", "content": content } ],
    });
    if let Some(system) = &req.system {
        payload["system"] = json!(system);
    }
    payload
}

fn gemini_payload(req: &LlmRequest) -> Value {
    let mut parts = Vec::new();
    if let Some(file) = &req.attachment {
        parts.push(match file.kind() {
            AttachmentKind::Text => json!({ "text": file.as_text() }),
            _ => json!({
                "inline_data": { "mime_type": file.mime_type, "data": file.base64() },
            }),
        });
    }
    parts.push(json!({ "text": req.user }));
    let mut payload = json!({
        "contents": [ { "role": "user", "parts": parts } ],
    });
    if let Some(system) = &req.system {
        payload["systemInstruction"] = json!({ "parts": [ { "text": system } ] });
    }
    if req.json_output || req.response_schema.is_some() {
        let mut generation = Map::new();
        generation.insert("responseMimeType".into(), json!("application/json"));
        if let Some(schema) = &req.response_schema {
            generation.insert("responseSchema".into(), gemini_schema(schema));
        }
        payload["generationConfig"] = Value::Object(generation);
    }
    payload
}

/// Gemini spells schema types in upper case.
fn gemini_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| {
                    let value = match (key.as_str(), value) {
                        ("type", Value::String(kind)) => Value::String(kind.to_uppercase()),
                        _ => gemini_schema(value),
                    };
                    (key.clone(), value)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(gemini_schema).collect()),
        other => other.clone(),
    }
}

fn backoff_delay(attempt: usize, retry_after: Option<&HeaderValue>) -> Duration {
    if let Some(value) = retry_after {
        if let Ok(text) = value.to_str() {
            if let Ok(secs) = text.parse::<u64>() {
                return Duration::from_secs(secs.max(1));
            }
        }
    }
    let capped = attempt.min(5) as u32;
    Duration::from_secs(1u64 << capped)
}

fn usage_field(usage: Option<&Value>, field: &str) -> u32 {
    usage
        .and_then(|usage| usage.get(field))
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32
}

fn read_api_key(var: &str) -> Result<String> {
    let value = env::var(var).map_err(|_| anyhow!("{var} is not set"))?;
    validate_api_key(var, &value)?;
    Ok(value)
}

fn validate_api_key(var: &str, value: &str) -> Result<()> {
    if var.contains("ANTHROPIC") && !value.starts_with("sk-ant-") {
        return Err(anyhow!("{var} must start with 'sk-ant-'"));
    }
    if var.contains("OPENAI") && !value.starts_with("sk-") {
        return Err(anyhow!(
            "{var} must start with 'sk-' (see https://platform.openai.com/)"
        ));
    }
    if var.contains("GEMINI") && !value.starts_with("AI") {
        return Err(anyhow!(
            "{var} must be a valid Gemini API key (starts with 'AI...')"
        ));
    }
    Ok(())
}

fn extract_openai_text(value: &Value) -> Option<String> {
    let choice = value.get("choices")?.as_array()?.first()?;
    if let Some(text) = choice.get("text").and_then(Value::as_str) {
        return Some(text.to_string());
    }
    let content = choice.get("message")?.get("content")?;
    if let Some(text) = content.as_str() {
        return Some(text.to_string());
    }
    content
        .as_array()?
        .iter()
        .find_map(|part| part.get("text").and_then(Value::as_str))
        .map(str::to_string)
}
