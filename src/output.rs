//! Result types returned by the extraction entry points.

use crate::error::UnitError;
use crate::field::FieldCandidate;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// Token counts reported by the LLM provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.prompt_tokens += rhs.prompt_tokens;
        self.completion_tokens += rhs.completion_tokens;
    }
}

/// Output of one successful classifier invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedFields {
    pub fields: Vec<FieldCandidate>,
    pub token_usage: TokenUsage,
    pub processing_time_ms: u64,
    pub finish_reason: String,
    /// Which rung of the parse ladder produced the fields.
    pub parse_path: ParsePath,
}

/// How a classifier response was turned into JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParsePath {
    /// Attempt 1 parsed directly.
    Direct,
    /// Attempt 1 failed to parse; attempt 2 parsed directly.
    Retry,
    /// Attempt 2 needed the JSON syntax repair pass.
    Repaired,
    /// A JSON substring had to be extracted from attempt 2, then repaired.
    Extracted,
}

/// One classified page batch. Consumed immediately by the merge step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_index: usize,
    pub pages: Vec<u32>,
    pub fields: Vec<FieldCandidate>,
    pub token_usage: TokenUsage,
    pub processing_time_ms: u64,
    pub finish_reason: String,
}

/// Per-batch telemetry. Has no effect on the returned fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchAnalytics {
    pub batch_index: usize,
    pub pages: Vec<u32>,
    pub field_count: usize,
    pub token_usage: TokenUsage,
    pub processing_time_ms: u64,
    pub finish_reason: Option<String>,
    pub error: Option<String>,
}

/// Aggregated telemetry for a classification job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassificationAnalytics {
    pub batches: Vec<BatchAnalytics>,
    pub total_pages: usize,
    pub successful_batches: usize,
    pub failed_batches: usize,
    pub token_usage: TokenUsage,
    /// Sum of per-batch classifier time.
    pub llm_duration_ms: u64,
    /// Wall-clock time of the whole job.
    pub total_duration_ms: u64,
    /// Distinct finish reasons seen across batches, in first-seen order.
    pub finish_reasons: Vec<String>,
    pub fields_before_merge: usize,
    pub fields_after_merge: usize,
}

impl ClassificationAnalytics {
    pub(crate) fn record(&mut self, batch: BatchAnalytics) {
        self.token_usage += batch.token_usage;
        self.llm_duration_ms += batch.processing_time_ms;
        if batch.error.is_some() {
            self.failed_batches += 1;
        } else {
            self.successful_batches += 1;
        }
        if let Some(reason) = &batch.finish_reason {
            if !self.finish_reasons.contains(reason) {
                self.finish_reasons.push(reason.clone());
            }
        }
        self.batches.push(batch);
    }
}

/// Result of the OCR → batch → merge path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationOutput {
    pub fields: Vec<FieldCandidate>,
    pub analytics: ClassificationAnalytics,
    /// Per-unit failures that did not abort the job.
    pub errors: Vec<UnitError>,
}

impl ClassificationOutput {
    pub fn is_partial(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Result of classifying a single (possibly very tall) image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitClassification {
    pub fields: Vec<FieldCandidate>,
    pub was_split: bool,
    pub num_sections: usize,
    pub token_usage: TokenUsage,
    pub errors: Vec<UnitError>,
    /// Fields dropped as cross-section duplicates.
    pub duplicates_removed: usize,
}
