//! LLM provider seam: one chat-completion call, no retries.
//!
//! The classifier state machine in [`super::classify`] talks to the model
//! only through [`ChatCompletion`]. Two implementations ship with the crate:
//!
//! * [`EdgequakeChat`] wraps any `edgequake_llm::LLMProvider` (OpenAI,
//!   Anthropic, Gemini, Ollama, ...) resolved by `ProviderFactory`.
//! * [`OpenAiChatClient`] posts directly to an OpenAI-compatible
//!   `/chat/completions` endpoint. Use it when `reasoning_effort` must reach
//!   the model.
//!
//! Transport failures are returned as-is. Retrying is the caller's call.

use crate::config::{FormsConfig, ReasoningEffort};
use crate::error::FormsError;
use crate::output::TokenUsage;
use crate::pipeline::encode::ImageAttachment;
use async_trait::async_trait;
use edgequake_llm::{CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Model used when neither the config nor the environment names one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

// ── Request / response ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub images: Vec<ImageAttachment>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn user_with_images(content: impl Into<String>, images: Vec<ImageAttachment>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            images,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    /// None lets the client use its own default model.
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: usize,
    pub temperature: f32,
    pub reasoning_effort: Option<ReasoningEffort>,
}

impl ChatRequest {
    pub fn from_config(config: &FormsConfig, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: config.model.clone(),
            messages,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            reasoning_effort: config.reasoning_effort,
        }
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Other(String),
}

impl FinishReason {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "stop" | "end_turn" | "STOP" => FinishReason::Stop,
            "length" | "max_tokens" | "MAX_TOKENS" => FinishReason::Length,
            "content_filter" | "SAFETY" => FinishReason::ContentFilter,
            other => FinishReason::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ContentFilter => "content_filter",
            FinishReason::Other(s) => s,
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub content: String,
    pub finish_reason: FinishReason,
    pub usage: TokenUsage,
}

/// A chat-completion backend.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Short name for logs and error messages.
    fn name(&self) -> &str;

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, FormsError>;
}

// ── edgequake-llm ────────────────────────────────────────────────────────

/// [`ChatCompletion`] over an `edgequake_llm` provider.
///
/// `CompletionOptions` has no reasoning-effort knob, so a requested effort
/// is dropped (with one warning per client). Use [`OpenAiChatClient`] when
/// it must reach the model.
pub struct EdgequakeChat {
    provider: Arc<dyn LLMProvider>,
    label: String,
    effort_warned: AtomicBool,
}

impl EdgequakeChat {
    pub fn new(provider: Arc<dyn LLMProvider>, label: impl Into<String>) -> Self {
        Self {
            provider,
            label: label.into(),
            effort_warned: AtomicBool::new(false),
        }
    }
}

/// The provider's own finish reason when it reports one. Otherwise a spent
/// completion budget is read as truncation.
fn resolve_finish_reason(reported: Option<&str>, completion_tokens: u64, max_tokens: usize) -> FinishReason {
    match reported.map(str::trim).filter(|r| !r.is_empty()) {
        Some(raw) => FinishReason::parse(raw),
        None if completion_tokens >= max_tokens as u64 => FinishReason::Length,
        None => FinishReason::Stop,
    }
}

fn to_provider_message(msg: &ChatMessage) -> edgequake_llm::ChatMessage {
    match msg.role {
        Role::System => edgequake_llm::ChatMessage::system(msg.content.clone()),
        Role::User if msg.images.is_empty() => edgequake_llm::ChatMessage::user(msg.content.clone()),
        Role::User => edgequake_llm::ChatMessage::user_with_images(
            msg.content.clone(),
            msg.images.iter().map(ImageData::from).collect(),
        ),
    }
}

#[async_trait]
impl ChatCompletion for EdgequakeChat {
    fn name(&self) -> &str {
        &self.label
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, FormsError> {
        let messages: Vec<_> = request.messages.iter().map(to_provider_message).collect();
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };
        if let Some(effort) = request.reasoning_effort {
            if !self.effort_warned.swap(true, Ordering::Relaxed) {
                warn!(
                    "{}: reasoning_effort={} is not forwarded through edgequake-llm; \
                     set FORMS_LLM_BASE_URL to use the OpenAI-compatible client",
                    self.label,
                    effort.as_str()
                );
            }
        }

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| FormsError::LlmApiError {
                message: format!("{}: {}", self.label, e),
            })?;

        let usage = TokenUsage {
            prompt_tokens: response.prompt_tokens as u64,
            completion_tokens: response.completion_tokens as u64,
        };
        let finish_reason = resolve_finish_reason(
            response.finish_reason.as_deref(),
            usage.completion_tokens,
            request.max_tokens,
        );
        debug!("{}: finish_reason={}", self.label, finish_reason);

        Ok(ChatResponse {
            content: response.content,
            finish_reason,
            usage,
        })
    }
}

// ── OpenAI-compatible REST ───────────────────────────────────────────────

/// Direct client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiChatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    default_model: String,
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    max_tokens: usize,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: WireContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Parts(Vec<WirePart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePart {
    Text { text: String },
    ImageUrl { image_url: WireImageUrl },
}

#[derive(Debug, Serialize)]
struct WireImageUrl {
    url: String,
    detail: &'static str,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl OpenAiChatClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, default_model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            default_model: default_model.into(),
        }
    }

    fn to_wire(msg: &ChatMessage) -> WireMessage {
        let role = match msg.role {
            Role::System => "system",
            Role::User => "user",
        };
        let content = if msg.images.is_empty() {
            WireContent::Text(msg.content.clone())
        } else {
            let mut parts = Vec::with_capacity(msg.images.len() + 1);
            if !msg.content.is_empty() {
                parts.push(WirePart::Text {
                    text: msg.content.clone(),
                });
            }
            parts.extend(msg.images.iter().map(|img| WirePart::ImageUrl {
                image_url: WireImageUrl {
                    url: img.to_data_url(),
                    detail: "high",
                },
            }));
            WireContent::Parts(parts)
        };
        WireMessage { role, content }
    }
}

#[async_trait]
impl ChatCompletion for OpenAiChatClient {
    fn name(&self) -> &str {
        &self.base_url
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, FormsError> {
        let body = WireRequest {
            model: request.model.as_deref().unwrap_or(&self.default_model),
            messages: request.messages.iter().map(Self::to_wire).collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            reasoning_effort: request.reasoning_effort.map(ReasoningEffort::as_str),
        };

        let mut req = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| FormsError::LlmApiError {
            message: format!("request to {} failed: {}", self.base_url, e),
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(&self.base_url, status, resp).await);
        }

        let parsed: WireResponse = resp.json().await.map_err(|e| FormsError::LlmApiError {
            message: format!("malformed response from {}: {}", self.base_url, e),
        })?;
        let choice = parsed.choices.into_iter().next();
        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(match choice {
            Some(c) => ChatResponse {
                content: c.message.content.unwrap_or_default(),
                finish_reason: c
                    .finish_reason
                    .as_deref()
                    .map(FinishReason::parse)
                    .unwrap_or(FinishReason::Stop),
                usage,
            },
            None => ChatResponse {
                content: String::new(),
                finish_reason: FinishReason::Other("no_choices".to_string()),
                usage,
            },
        })
    }
}

/// Map a non-2xx response to a typed error.
pub(crate) async fn status_error(
    provider: &str,
    status: reqwest::StatusCode,
    resp: reqwest::Response,
) -> FormsError {
    let retry_after_secs = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok());
    let body = resp.text().await.unwrap_or_default();
    let detail: String = body.chars().take(300).collect();

    match status.as_u16() {
        429 => FormsError::RateLimitExceeded {
            provider: provider.to_string(),
            retry_after_secs,
        },
        401 | 403 => FormsError::AuthError {
            provider: provider.to_string(),
            detail,
        },
        _ => FormsError::LlmApiError {
            message: format!("{provider} returned HTTP {status}: {detail}"),
        },
    }
}

// ── Resolution ───────────────────────────────────────────────────────────

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn ChatCompletion>, FormsError> {
    let provider = ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        FormsError::ProviderNotConfigured {
            stage: "LLM",
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })?;
    Ok(Arc::new(EdgequakeChat::new(
        provider,
        format!("{provider_name}/{model}"),
    )))
}

/// Resolve the chat client, from most-specific to least-specific.
///
/// 1. `config.chat_client` as-is.
/// 2. `config.llm_base_url` → [`OpenAiChatClient`].
/// 3. `config.provider_name` (+ model) through `ProviderFactory`.
/// 4. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` when both are set.
/// 5. `OPENAI_API_KEY` → OpenAI.
/// 6. `ProviderFactory::from_env` auto-detection.
pub fn resolve_chat_client(config: &FormsConfig) -> Result<Arc<dyn ChatCompletion>, FormsError> {
    if let Some(client) = &config.chat_client {
        return Ok(Arc::clone(client));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);

    if let Some(base) = &config.llm_base_url {
        return Ok(Arc::new(OpenAiChatClient::new(
            base.clone(),
            config.llm_api_key.clone(),
            model,
        )));
    }

    if let Some(name) = &config.provider_name {
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_provider(&prov, &env_model);
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        return create_provider("openai", model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| FormsError::ProviderNotConfigured {
            stage: "LLM",
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                 Set OPENAI_API_KEY, ANTHROPIC_API_KEY, FORMS_LLM_BASE_URL, or configure a provider.\n\
                 Error: {e}"
            ),
        })?;
    Ok(Arc::new(EdgequakeChat::new(llm_provider, "auto")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reason_normalises_provider_spellings() {
        assert_eq!(FinishReason::parse("length"), FinishReason::Length);
        assert_eq!(FinishReason::parse("max_tokens"), FinishReason::Length);
        assert_eq!(FinishReason::parse("end_turn"), FinishReason::Stop);
        assert_eq!(FinishReason::parse("tool_calls").as_str(), "tool_calls");
    }

    /// Provider returning one canned response to every chat call.
    struct CannedProvider(edgequake_llm::LLMResponse);

    #[async_trait]
    impl LLMProvider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }

        fn model(&self) -> &str {
            "canned-model"
        }

        fn max_context_length(&self) -> usize {
            8192
        }

        async fn complete(&self, _prompt: &str) -> edgequake_llm::Result<edgequake_llm::LLMResponse> {
            Ok(self.0.clone())
        }

        async fn complete_with_options(
            &self,
            _prompt: &str,
            _options: &CompletionOptions,
        ) -> edgequake_llm::Result<edgequake_llm::LLMResponse> {
            Ok(self.0.clone())
        }

        async fn chat(
            &self,
            _messages: &[edgequake_llm::ChatMessage],
            _options: Option<&CompletionOptions>,
        ) -> edgequake_llm::Result<edgequake_llm::LLMResponse> {
            Ok(self.0.clone())
        }
    }

    fn canned(response: edgequake_llm::LLMResponse) -> EdgequakeChat {
        EdgequakeChat::new(Arc::new(CannedProvider(response)), "canned")
    }

    fn budget_request(max_tokens: usize) -> ChatRequest {
        ChatRequest {
            model: None,
            messages: vec![ChatMessage::user("Name: ____")],
            max_tokens,
            temperature: 0.1,
            reasoning_effort: Some(ReasoningEffort::Minimal),
        }
    }

    #[test]
    fn reported_finish_reason_wins_over_budget() {
        assert_eq!(resolve_finish_reason(Some("length"), 10, 4096), FinishReason::Length);
        assert_eq!(resolve_finish_reason(Some("stop"), 4096, 4096), FinishReason::Stop);
        assert_eq!(resolve_finish_reason(None, 4096, 4096), FinishReason::Length);
        assert_eq!(resolve_finish_reason(Some(" "), 12, 4096), FinishReason::Stop);
    }

    #[tokio::test]
    async fn edgequake_chat_reads_provider_finish_reason() {
        let chat = canned(
            edgequake_llm::LLMResponse::new("", "canned-model")
                .with_usage(300, 10)
                .with_finish_reason("length"),
        );
        let resp = chat.complete(&budget_request(4096)).await.unwrap();
        assert_eq!(resp.finish_reason, FinishReason::Length);
        assert_eq!(resp.usage.completion_tokens, 10);

        let chat = canned(
            edgequake_llm::LLMResponse::new("[]", "canned-model")
                .with_usage(300, 64)
                .with_finish_reason("stop"),
        );
        let resp = chat.complete(&budget_request(64)).await.unwrap();
        assert_eq!(resp.finish_reason, FinishReason::Stop);
    }

    #[tokio::test]
    async fn dropped_reasoning_effort_is_flagged_once() {
        let chat = canned(edgequake_llm::LLMResponse::new("[]", "canned-model"));
        let mut request = budget_request(4096);
        request.reasoning_effort = None;
        chat.complete(&request).await.unwrap();
        assert!(!chat.effort_warned.load(Ordering::Relaxed));

        chat.complete(&budget_request(4096)).await.unwrap();
        chat.complete(&budget_request(4096)).await.unwrap();
        assert!(chat.effort_warned.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn empty_length_reply_is_truncation_for_the_classifier() {
        let chat = canned(
            edgequake_llm::LLMResponse::new("", "canned-model")
                .with_usage(300, 10)
                .with_finish_reason("length"),
        );
        let classifier = crate::pipeline::classify::FieldClassifier::new(Arc::new(chat));
        let err = classifier.classify(&budget_request(4096)).await.unwrap_err();
        assert!(matches!(err, FormsError::TruncatedResponse), "{err}");
    }

    #[test]
    fn request_from_config_copies_budget() {
        let config = FormsConfig::builder()
            .max_tokens(4000)
            .reasoning_effort(ReasoningEffort::High)
            .build()
            .unwrap();
        let req = ChatRequest::from_config(&config, vec![ChatMessage::user("hi")]);
        assert_eq!(req.max_tokens, 4000);
        assert_eq!(req.temperature, 0.1);
        assert_eq!(req.reasoning_effort, Some(ReasoningEffort::High));
    }

    #[test]
    fn wire_message_with_image_uses_parts() {
        let msg = ChatMessage::user_with_images(
            "look",
            vec![ImageAttachment::from_bytes(b"abc", "image/png")],
        );
        let json = serde_json::to_value(OpenAiChatClient::to_wire(&msg)).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][1]["type"], "image_url");
        assert_eq!(
            json["content"][1]["image_url"]["url"],
            "data:image/png;base64,YWJj"
        );
    }

    #[test]
    fn plain_wire_message_is_a_string() {
        let json = serde_json::to_value(OpenAiChatClient::to_wire(&ChatMessage::system("rules"))).unwrap();
        assert_eq!(json["content"], "rules");
    }

    #[test]
    fn configured_client_wins() {
        let client: Arc<dyn ChatCompletion> =
            Arc::new(OpenAiChatClient::new("http://localhost:1/v1/", None, "m"));
        let config = FormsConfig::builder().chat_client(client).build().unwrap();
        let resolved = resolve_chat_client(&config).unwrap();
        assert_eq!(resolved.name(), "http://localhost:1/v1");
    }
}
