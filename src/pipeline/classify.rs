//! Field classifier: one LLM invocation turned into typed fields.
//!
//! Per call the classifier walks a fixed ladder and stops at the first rung
//! that yields a field list:
//!
//! 1. attempt 1, parsed directly (outer markdown fences are tolerated)
//! 2. attempt 2 (identical request), parsed directly
//! 3. attempt 2 after the JSON syntax repair pipeline
//! 4. the first fenced or bare JSON array/object inside attempt 2, repaired
//!
//! A second sample is tried before any repair: a fresh completion is more
//! trustworthy than a patched one. Transport errors and empty completions
//! end the call immediately. Exhausting the ladder is an error, never an
//! empty list.

use crate::error::FormsError;
use crate::field::FieldCandidate;
use crate::output::{ClassifiedFields, ParsePath, TokenUsage};
use crate::pipeline::bounded;
use crate::pipeline::llm::{ChatCompletion, ChatRequest, ChatResponse, FinishReason};
use crate::pipeline::postprocess::fields_from_value;
use crate::pipeline::repair::{JsonRepair, SyntaxRepair};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Characters of the bad response kept in [`FormsError::ClassificationFailed`].
const PREVIEW_CHARS: usize = 200;

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*[ \t]*\n?(.*?)\n?```$").unwrap());

static RE_FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\n?(.*?)```").unwrap());

static RE_BARE_JSON: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)[\[{].*[\]}]").unwrap());

/// Runs the parse ladder against a [`ChatCompletion`] backend.
#[derive(Clone)]
pub struct FieldClassifier {
    llm: Arc<dyn ChatCompletion>,
    repair: Arc<dyn JsonRepair>,
    timeout_secs: u64,
}

impl FieldClassifier {
    pub fn new(llm: Arc<dyn ChatCompletion>) -> Self {
        Self {
            llm,
            repair: Arc::new(SyntaxRepair::new()),
            timeout_secs: 180,
        }
    }

    pub fn with_repair(mut self, repair: Arc<dyn JsonRepair>) -> Self {
        self.repair = repair;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn llm_name(&self) -> &str {
        self.llm.name()
    }

    /// Classify one request.
    pub async fn classify(&self, request: &ChatRequest) -> Result<ClassifiedFields, FormsError> {
        let start = Instant::now();
        let mut usage = TokenUsage::default();

        let first = self.attempt(request, 1, &mut usage).await?;
        if let Some(fields) = parse_direct(&first.content) {
            return Ok(finish(fields, usage, start, &first, ParsePath::Direct));
        }
        warn!(
            "Attempt 1: unparseable response ({} chars, finish_reason={}); retrying",
            first.content.len(),
            first.finish_reason
        );

        let second = self.attempt(request, 2, &mut usage).await?;
        if let Some(fields) = parse_direct(&second.content) {
            return Ok(finish(fields, usage, start, &second, ParsePath::Retry));
        }

        let report = self.repair.repair(strip_outer_fences(&second.content));
        debug!("Repair applied: {:?}", report.applied);
        if let Some(fields) = parse_json(&report.output) {
            warn!("Attempt 2 parsed after repair ({:?})", report.applied);
            return Ok(finish(fields, usage, start, &second, ParsePath::Repaired));
        }

        if let Some(snippet) = extract_json_snippet(&second.content) {
            let report = self.repair.repair(snippet);
            if let Some(fields) = parse_json(&report.output) {
                warn!(
                    "Attempt 2 parsed from an extracted {}-char snippet ({:?})",
                    snippet.len(),
                    report.applied
                );
                return Ok(finish(fields, usage, start, &second, ParsePath::Extracted));
            }
        }

        Err(FormsError::ClassificationFailed {
            length: second.content.chars().count(),
            finish_reason: second.finish_reason.to_string(),
            preview: second.content.chars().take(PREVIEW_CHARS).collect(),
        })
    }

    async fn attempt(
        &self,
        request: &ChatRequest,
        attempt: u8,
        usage: &mut TokenUsage,
    ) -> Result<ChatResponse, FormsError> {
        let response = bounded("LLM", self.timeout_secs, self.llm.complete(request)).await?;
        *usage += response.usage;
        debug!(
            "Attempt {}: {} prompt tokens, {} completion tokens, finish_reason={}",
            attempt,
            response.usage.prompt_tokens,
            response.usage.completion_tokens,
            response.finish_reason
        );

        if response.content.trim().is_empty() {
            return Err(match response.finish_reason {
                FinishReason::Length => FormsError::TruncatedResponse,
                ref other => FormsError::NoContent {
                    finish_reason: other.to_string(),
                },
            });
        }
        Ok(response)
    }
}

fn finish(
    fields: Vec<FieldCandidate>,
    token_usage: TokenUsage,
    start: Instant,
    response: &ChatResponse,
    parse_path: ParsePath,
) -> ClassifiedFields {
    ClassifiedFields {
        fields,
        token_usage,
        processing_time_ms: start.elapsed().as_millis() as u64,
        finish_reason: response.finish_reason.to_string(),
        parse_path,
    }
}

/// Trim and remove one pair of outer markdown fences, if present.
pub fn strip_outer_fences(content: &str) -> &str {
    let trimmed = content.trim();
    RE_OUTER_FENCES
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or(trimmed)
}

fn parse_json(text: &str) -> Option<Vec<FieldCandidate>> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    fields_from_value(&value)
}

fn parse_direct(content: &str) -> Option<Vec<FieldCandidate>> {
    parse_json(strip_outer_fences(content))
}

/// First fenced block, else the widest bare `[...]` / `{...}` span.
pub fn extract_json_snippet(content: &str) -> Option<&str> {
    if let Some(m) = RE_FENCED_BLOCK.captures(content).and_then(|c| c.get(1)) {
        let inner = m.as_str().trim();
        if !inner.is_empty() {
            return Some(inner);
        }
    }
    RE_BARE_JSON.find(content).map(|m| m.as_str())
}
