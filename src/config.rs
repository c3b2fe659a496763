//! Configuration types for form-field extraction.
//!
//! All pipeline behaviour is controlled through [`FormsConfig`], built via
//! its [`FormsConfigBuilder`] or read from the environment with
//! [`FormsConfig::from_env`]. Credentials, thresholds and timeouts are all
//! supplied here; nothing inside the pipeline hard-codes them.

use crate::error::FormsError;
use crate::pipeline::llm::ChatCompletion;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

/// Default Google Vision `images:annotate` endpoint.
pub const DEFAULT_OCR_ENDPOINT: &str = "https://vision.googleapis.com/v1/images:annotate";

/// Configuration for a form-extraction job.
///
/// # Example
/// ```rust
/// use edgequake_forms::{FormsConfig, ReasoningEffort};
///
/// let config = FormsConfig::builder()
///     .batch_size(3)
///     .split_max_height(3000)
///     .split_overlap(150)
///     .reasoning_effort(ReasoningEffort::Low)
///     .build()
///     .unwrap();
/// assert_eq!(config.batch_size, 3);
/// ```
#[derive(Clone)]
pub struct FormsConfig {
    // ── LLM ──────────────────────────────────────────────────────────────
    /// LLM model identifier. If None, uses the provider default.
    pub model: Option<String>,

    /// edgequake-llm provider name ("openai", "anthropic", "gemini", ...).
    pub provider_name: Option<String>,

    /// Pre-constructed chat client. Takes precedence over everything else.
    pub chat_client: Option<Arc<dyn ChatCompletion>>,

    /// Base URL of an OpenAI-compatible endpoint (e.g. `http://localhost:8000/v1`).
    /// When set, requests go straight to `{base}/chat/completions`.
    pub llm_base_url: Option<String>,

    /// Bearer token for `llm_base_url`.
    pub llm_api_key: Option<String>,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Classification must be faithful to the page, not creative.
    pub temperature: f32,

    /// Maximum output tokens per classifier call. Default: 16000.
    ///
    /// A dense multi-page batch can produce a long field array; running out
    /// of budget mid-array is the most common cause of unparseable output.
    pub max_tokens: usize,

    /// Reasoning effort forwarded to models that support it. Default: None.
    pub reasoning_effort: Option<ReasoningEffort>,

    /// Custom classification system prompt. If None, uses the built-in one.
    pub system_prompt: Option<String>,

    // ── Batching ─────────────────────────────────────────────────────────
    /// Pages per classifier call. Default: 5.
    pub batch_size: usize,

    /// Maximum spatial blocks rendered into the prompt hint. Default: 50.
    pub spatial_sample_size: usize,

    // ── Images ───────────────────────────────────────────────────────────
    /// Images taller than this are split into sections. Default: 4000 px.
    pub split_max_height: u32,

    /// Vertical overlap between consecutive sections. Default: 200 px.
    ///
    /// Large enough to contain a whole field row, so a field cut by one
    /// section boundary appears intact in the neighbouring section.
    pub split_overlap: u32,

    /// Re-encoding limits applied before images leave the process.
    pub compression: CompressionOptions,

    // ── OCR ──────────────────────────────────────────────────────────────
    /// Google Vision API key.
    pub ocr_api_key: Option<String>,

    /// OCR REST endpoint. Default: [`DEFAULT_OCR_ENDPOINT`].
    pub ocr_endpoint: String,

    /// Concurrent OCR calls within one job. Default: 4.
    pub ocr_concurrency: usize,

    /// Concurrent image downloads within one job. Default: 4.
    pub fetch_concurrency: usize,

    // ── Timeouts ─────────────────────────────────────────────────────────
    /// Per-image OCR call timeout in seconds. Default: 60.
    pub ocr_timeout_secs: u64,

    /// Per-classifier-call timeout in seconds. Default: 180.
    pub llm_timeout_secs: u64,

    /// Per-image download timeout in seconds. Default: 30.
    pub fetch_timeout_secs: u64,

    /// Browser navigation + settle timeout in seconds. Default: 45.
    pub navigation_timeout_secs: u64,

    /// DOM snapshot + extraction timeout in seconds. Default: 20.
    pub extraction_timeout_secs: u64,

    /// Optional progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for FormsConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            chat_client: None,
            llm_base_url: None,
            llm_api_key: None,
            temperature: 0.1,
            max_tokens: 16_000,
            reasoning_effort: None,
            system_prompt: None,
            batch_size: 5,
            spatial_sample_size: 50,
            split_max_height: 4000,
            split_overlap: 200,
            compression: CompressionOptions::default(),
            ocr_api_key: None,
            ocr_endpoint: DEFAULT_OCR_ENDPOINT.to_string(),
            ocr_concurrency: 4,
            fetch_concurrency: 4,
            ocr_timeout_secs: 60,
            llm_timeout_secs: 180,
            fetch_timeout_secs: 30,
            navigation_timeout_secs: 45,
            extraction_timeout_secs: 20,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for FormsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormsConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("chat_client", &self.chat_client.as_ref().map(|_| "<dyn ChatCompletion>"))
            .field("llm_base_url", &self.llm_base_url)
            .field("llm_api_key", &self.llm_api_key.as_ref().map(|_| "<redacted>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("reasoning_effort", &self.reasoning_effort)
            .field("batch_size", &self.batch_size)
            .field("spatial_sample_size", &self.spatial_sample_size)
            .field("split_max_height", &self.split_max_height)
            .field("split_overlap", &self.split_overlap)
            .field("compression", &self.compression)
            .field("ocr_api_key", &self.ocr_api_key.as_ref().map(|_| "<redacted>"))
            .field("ocr_endpoint", &self.ocr_endpoint)
            .field("ocr_timeout_secs", &self.ocr_timeout_secs)
            .field("llm_timeout_secs", &self.llm_timeout_secs)
            .finish()
    }
}

impl FormsConfig {
    /// Create a new builder for `FormsConfig`.
    pub fn builder() -> FormsConfigBuilder {
        FormsConfigBuilder {
            config: Self::default(),
        }
    }

    /// Read the configuration surface from environment variables.
    ///
    /// Unset variables keep their defaults. Unparseable numeric values are
    /// ignored with a warning; cross-field constraints are then validated
    /// exactly as [`FormsConfigBuilder::build`] does.
    pub fn from_env() -> Result<Self, FormsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, FormsError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut b = Self::builder();

        if let Some(v) = get("FORMS_MODEL") {
            b = b.model(v);
        }
        if let Some(v) = get("FORMS_LLM_PROVIDER") {
            b = b.provider_name(v);
        }
        if let Some(v) = get("FORMS_LLM_BASE_URL") {
            b = b.llm_base_url(v);
        }
        if let Some(v) = get("FORMS_LLM_API_KEY") {
            b = b.llm_api_key(v);
        }
        if let Some(v) = parse_env(&get, "FORMS_TEMPERATURE") {
            b = b.temperature(v);
        }
        if let Some(v) = parse_env(&get, "FORMS_MAX_TOKENS") {
            b = b.max_tokens(v);
        }
        if let Some(v) = parse_env(&get, "FORMS_REASONING_EFFORT") {
            b = b.reasoning_effort(v);
        }
        if let Some(v) = parse_env(&get, "FORMS_BATCH_SIZE") {
            b = b.batch_size(v);
        }
        if let Some(v) = parse_env(&get, "FORMS_SPATIAL_SAMPLE_SIZE") {
            b = b.spatial_sample_size(v);
        }
        if let Some(v) = parse_env(&get, "FORMS_SPLIT_MAX_HEIGHT") {
            b = b.split_max_height(v);
        }
        if let Some(v) = parse_env(&get, "FORMS_SPLIT_OVERLAP") {
            b = b.split_overlap(v);
        }
        if let Some(v) = get("FORMS_OCR_API_KEY").or_else(|| get("GOOGLE_VISION_API_KEY")) {
            b = b.ocr_api_key(v);
        }
        if let Some(v) = get("FORMS_OCR_ENDPOINT") {
            b = b.ocr_endpoint(v);
        }
        if let Some(v) = parse_env(&get, "FORMS_OCR_TIMEOUT_SECS") {
            b = b.ocr_timeout_secs(v);
        }
        if let Some(v) = parse_env(&get, "FORMS_LLM_TIMEOUT_SECS") {
            b = b.llm_timeout_secs(v);
        }
        if let Some(v) = parse_env(&get, "FORMS_FETCH_TIMEOUT_SECS") {
            b = b.fetch_timeout_secs(v);
        }
        if let Some(v) = parse_env(&get, "FORMS_NAVIGATION_TIMEOUT_SECS") {
            b = b.navigation_timeout_secs(v);
        }
        if let Some(v) = parse_env(&get, "FORMS_EXTRACTION_TIMEOUT_SECS") {
            b = b.extraction_timeout_secs(v);
        }
        b.build()
    }
}

fn parse_env<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = get(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid value", key, raw);
            None
        }
    }
}

/// Builder for [`FormsConfig`].
pub struct FormsConfigBuilder {
    config: FormsConfig,
}

impl fmt::Debug for FormsConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormsConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl FormsConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn chat_client(mut self, client: Arc<dyn ChatCompletion>) -> Self {
        self.config.chat_client = Some(client);
        self
    }

    pub fn llm_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.llm_base_url = Some(url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn llm_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.llm_api_key = Some(key.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n.max(256);
        self
    }

    pub fn reasoning_effort(mut self, effort: ReasoningEffort) -> Self {
        self.config.reasoning_effort = Some(effort);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n.max(1);
        self
    }

    pub fn spatial_sample_size(mut self, n: usize) -> Self {
        self.config.spatial_sample_size = n;
        self
    }

    pub fn split_max_height(mut self, px: u32) -> Self {
        self.config.split_max_height = px.max(100);
        self
    }

    pub fn split_overlap(mut self, px: u32) -> Self {
        self.config.split_overlap = px;
        self
    }

    pub fn compression(mut self, options: CompressionOptions) -> Self {
        self.config.compression = options;
        self
    }

    pub fn ocr_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.ocr_api_key = Some(key.into());
        self
    }

    pub fn ocr_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.ocr_endpoint = url.into();
        self
    }

    pub fn ocr_concurrency(mut self, n: usize) -> Self {
        self.config.ocr_concurrency = n.max(1);
        self
    }

    pub fn fetch_concurrency(mut self, n: usize) -> Self {
        self.config.fetch_concurrency = n.max(1);
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs;
        self
    }

    pub fn llm_timeout_secs(mut self, secs: u64) -> Self {
        self.config.llm_timeout_secs = secs;
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fetch_timeout_secs = secs;
        self
    }

    pub fn navigation_timeout_secs(mut self, secs: u64) -> Self {
        self.config.navigation_timeout_secs = secs;
        self
    }

    pub fn extraction_timeout_secs(mut self, secs: u64) -> Self {
        self.config.extraction_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<FormsConfig, FormsError> {
        let c = &self.config;
        if c.split_overlap >= c.split_max_height {
            return Err(FormsError::InvalidConfig(format!(
                "split overlap ({}px) must be smaller than split max height ({}px)",
                c.split_overlap, c.split_max_height
            )));
        }
        let timeouts = [
            ("ocr_timeout_secs", c.ocr_timeout_secs),
            ("llm_timeout_secs", c.llm_timeout_secs),
            ("fetch_timeout_secs", c.fetch_timeout_secs),
            ("navigation_timeout_secs", c.navigation_timeout_secs),
            ("extraction_timeout_secs", c.extraction_timeout_secs),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, secs)| *secs == 0) {
            return Err(FormsError::InvalidConfig(format!("{name} must be ≥ 1")));
        }
        if c.compression.quality == 0 || c.compression.quality > 100 {
            return Err(FormsError::InvalidConfig(format!(
                "compression quality must be 1–100, got {}",
                c.compression.quality
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Reasoning budget for models that think before answering.
///
/// Reasoning tokens come out of the same output budget as the field list, so
/// batched jobs default to [`ReasoningEffort::Minimal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    /// The lowest available setting.
    pub const LOWEST: ReasoningEffort = ReasoningEffort::Minimal;

    pub fn as_str(self) -> &'static str {
        match self {
            ReasoningEffort::Minimal => "minimal",
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

impl FromStr for ReasoningEffort {
    type Err = FormsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minimal" | "none" => Ok(ReasoningEffort::Minimal),
            "low" => Ok(ReasoningEffort::Low),
            "medium" => Ok(ReasoningEffort::Medium),
            "high" => Ok(ReasoningEffort::High),
            other => Err(FormsError::InvalidConfig(format!(
                "unknown reasoning effort '{other}'"
            ))),
        }
    }
}

/// Output encoding for re-compressed images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Jpeg,
    Png,
}

impl ImageFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
        }
    }
}

/// Limits used by [`crate::pipeline::image::compress`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompressionOptions {
    /// Default: 2000 px.
    pub max_width: u32,
    /// Default: 10000 px. Tall forms are split, not shrunk.
    pub max_height: u32,
    /// JPEG quality 1–100. Default: 85.
    pub quality: u8,
    pub format: ImageFormat,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            max_width: 2000,
            max_height: 10_000,
            quality: 85,
            format: ImageFormat::Jpeg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_build() {
        let config = FormsConfig::builder().build().unwrap();
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.split_max_height, 4000);
        assert_eq!(config.split_overlap, 200);
        assert!(config.reasoning_effort.is_none());
    }

    #[test]
    fn overlap_must_be_smaller_than_max_height() {
        let err = FormsConfig::builder()
            .split_max_height(500)
            .split_overlap(500)
            .build()
            .unwrap_err();
        assert!(matches!(err, FormsError::InvalidConfig(_)));
    }

    #[test]
    fn zero_timeout_rejected() {
        let err = FormsConfig::builder().llm_timeout_secs(0).build().unwrap_err();
        assert!(err.to_string().contains("llm_timeout_secs"), "got: {err}");
    }

    #[test]
    fn builder_clamps_batch_size() {
        let config = FormsConfig::builder().batch_size(0).build().unwrap();
        assert_eq!(config.batch_size, 1);
    }

    #[test]
    fn from_lookup_reads_surface_and_skips_garbage() {
        let env: HashMap<&str, &str> = [
            ("FORMS_MODEL", "gpt-4.1-mini"),
            ("FORMS_BATCH_SIZE", "3"),
            ("FORMS_SPLIT_MAX_HEIGHT", "not-a-number"),
            ("FORMS_REASONING_EFFORT", "LOW"),
            ("GOOGLE_VISION_API_KEY", "vision-key"),
        ]
        .into_iter()
        .collect();
        let config =
            FormsConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.model.as_deref(), Some("gpt-4.1-mini"));
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.split_max_height, 4000);
        assert_eq!(config.reasoning_effort, Some(ReasoningEffort::Low));
        assert_eq!(config.ocr_api_key.as_deref(), Some("vision-key"));
    }

    #[test]
    fn debug_redacts_keys() {
        let config = FormsConfig::builder()
            .ocr_api_key("secret-ocr")
            .llm_api_key("secret-llm")
            .build()
            .unwrap();
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("secret-ocr"));
        assert!(!dbg.contains("secret-llm"));
    }
}
