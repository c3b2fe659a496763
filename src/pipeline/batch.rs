//! Batch orchestrator: OCR'd pages → contiguous page batches → classifier.
//!
//! Batches run one after another. A failing batch is recorded as a
//! [`UnitError::BatchFailed`] and the job moves on; only when every batch
//! fails does the call return an error.

use crate::cancel::CancelFlag;
use crate::config::{FormsConfig, ReasoningEffort};
use crate::error::{FormsError, UnitError};
use crate::field::{OcrPage, TextBlock};
use crate::output::{BatchAnalytics, BatchResult, ClassificationAnalytics, ClassificationOutput};
use crate::pipeline::classify::FieldClassifier;
use crate::pipeline::llm::{ChatMessage, ChatRequest};
use crate::pipeline::{merge, spatial};
use crate::progress;
use crate::prompts::{self, DEFAULT_SYSTEM_PROMPT};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Pages per classifier call when the requested size is unusable.
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Per-call overrides for [`run_batches`]. Unset values fall back to the
/// [`FormsConfig`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOptions {
    pub batch_size: Option<usize>,
    /// Reaches the model only through [`OpenAiChatClient`]; edgequake-llm
    /// providers drop it with a warning.
    ///
    /// [`OpenAiChatClient`]: crate::pipeline::llm::OpenAiChatClient
    pub reasoning_effort: Option<ReasoningEffort>,
    pub system_prompt: Option<String>,
}

/// A contiguous run of pages sent to the classifier together.
#[derive(Debug, Clone, PartialEq)]
pub struct PageBatch {
    /// 0-based position in the job.
    pub index: usize,
    pub pages: Vec<OcrPage>,
}

impl PageBatch {
    pub fn page_numbers(&self) -> Vec<u32> {
        self.pages.iter().map(|p| p.page).collect()
    }

    /// Spatial blocks of this batch's pages, in page order.
    pub fn blocks(&self) -> Vec<TextBlock> {
        let numbers = self.page_numbers();
        self.pages
            .iter()
            .flat_map(|p| p.blocks.iter())
            .filter(|b| numbers.contains(&b.page_number))
            .cloned()
            .collect()
    }
}

/// Effective batch size: non-positive requests fall back to the default,
/// and a batch never spans more pages than exist.
pub fn effective_batch_size(requested: usize, page_count: usize) -> usize {
    let size = if requested == 0 {
        DEFAULT_BATCH_SIZE
    } else {
        requested
    };
    size.min(page_count.max(1))
}

/// Split pages (sorted by page number) into contiguous batches.
pub fn plan_batches(pages: &[OcrPage], batch_size: usize) -> Vec<PageBatch> {
    let mut sorted = pages.to_vec();
    sorted.sort_by_key(|p| p.page);
    let size = effective_batch_size(batch_size, sorted.len());
    sorted
        .chunks(size)
        .enumerate()
        .map(|(index, chunk)| PageBatch {
            index,
            pages: chunk.to_vec(),
        })
        .collect()
}

/// Reasoning effort for a job: explicit override, then config, then the
/// lowest level whenever more than one batch will run.
pub fn effective_reasoning(
    options: &BatchOptions,
    config: &FormsConfig,
    batch_count: usize,
) -> Option<ReasoningEffort> {
    options
        .reasoning_effort
        .or(config.reasoning_effort)
        .or_else(|| (batch_count > 1).then_some(ReasoningEffort::LOWEST))
}

fn build_request(
    batch: &PageBatch,
    base_prompt: &str,
    reasoning: Option<ReasoningEffort>,
    config: &FormsConfig,
) -> ChatRequest {
    let pages = batch.page_numbers();
    let mut system = base_prompt.to_string();
    system.push_str(&spatial::build_hint(&batch.blocks(), config.spatial_sample_size));
    system.push_str(&prompts::batch_context(&pages));

    let texts: Vec<(u32, &str)> = batch.pages.iter().map(|p| (p.page, p.text.as_str())).collect();
    let messages = vec![
        ChatMessage::system(system),
        ChatMessage::user(prompts::ocr_user_message(&texts)),
    ];

    let mut request = ChatRequest::from_config(config, messages);
    request.reasoning_effort = reasoning;
    request
}

async fn classify_batch(
    classifier: &FieldClassifier,
    batch: &PageBatch,
    request: &ChatRequest,
) -> Result<BatchResult, FormsError> {
    let out = classifier.classify(request).await?;
    let pages = batch.page_numbers();

    let mut fields = out.fields;
    // A one-page batch leaves no doubt about where an untagged field sits.
    if let [only] = pages.as_slice() {
        for field in fields.iter_mut().filter(|f| f.page_number.is_none()) {
            field.page_number = Some(*only);
        }
    }

    Ok(BatchResult {
        batch_index: batch.index,
        pages,
        fields,
        token_usage: out.token_usage,
        processing_time_ms: out.processing_time_ms,
        finish_reason: out.finish_reason,
    })
}

/// Classify OCR'd pages batch by batch and merge the results.
///
/// Page-range validation uses the highest page number present, so pages
/// lost to OCR failures upstream do not shrink the valid range.
pub async fn run_batches(
    classifier: &FieldClassifier,
    pages: &[OcrPage],
    options: &BatchOptions,
    config: &FormsConfig,
    cancel: &CancelFlag,
) -> Result<ClassificationOutput, FormsError> {
    let job_start = Instant::now();
    let requested = options.batch_size.unwrap_or(config.batch_size);
    let batches = plan_batches(pages, requested);
    let total_batches = batches.len();
    let total_pages = pages.iter().map(|p| p.page).max().unwrap_or(0);
    let cb = progress::resolve(config.progress_callback.as_ref());

    let mut analytics = ClassificationAnalytics {
        total_pages: pages.len(),
        ..Default::default()
    };

    if batches.is_empty() {
        warn!("No pages to classify");
        return Ok(ClassificationOutput {
            fields: Vec::new(),
            analytics,
            errors: Vec::new(),
        });
    }

    let reasoning = effective_reasoning(options, config, total_batches);
    let template = options
        .system_prompt
        .as_deref()
        .or(config.system_prompt.as_deref())
        .unwrap_or(DEFAULT_SYSTEM_PROMPT);
    let base_prompt = prompts::render_base_prompt(template);

    info!(
        "Classifying {} pages in {} batch(es) via {} (reasoning={})",
        pages.len(),
        total_batches,
        classifier.llm_name(),
        reasoning.map_or("default", |r| r.as_str())
    );
    cb.on_job_start(pages.len(), total_batches);

    let mut results: Vec<BatchResult> = Vec::new();
    let mut errors: Vec<UnitError> = Vec::new();
    let mut cancelled = false;

    for batch in &batches {
        if cancel.is_cancelled() {
            let skipped = total_batches - batch.index;
            warn!("Cancellation observed; skipping {} batch(es)", skipped);
            errors.push(UnitError::Cancelled {
                unit: "batch".to_string(),
                skipped,
            });
            cancelled = true;
            break;
        }

        let number = batch.index + 1;
        let page_numbers = batch.page_numbers();
        cb.on_batch_start(number, total_batches, &page_numbers);
        debug!("Batch {}/{}: pages {:?}", number, total_batches, page_numbers);

        let request = build_request(batch, &base_prompt, reasoning, config);
        match classify_batch(classifier, batch, &request).await {
            Ok(result) => {
                info!(
                    "Batch {}/{}: {} fields ({} tokens, {}ms)",
                    number,
                    total_batches,
                    result.fields.len(),
                    result.token_usage.total(),
                    result.processing_time_ms
                );
                cb.on_batch_complete(number, total_batches, result.fields.len());
                analytics.record(BatchAnalytics {
                    batch_index: batch.index,
                    pages: page_numbers,
                    field_count: result.fields.len(),
                    token_usage: result.token_usage,
                    processing_time_ms: result.processing_time_ms,
                    finish_reason: Some(result.finish_reason.clone()),
                    error: None,
                });
                results.push(result);
            }
            Err(e) => {
                warn!("Batch {}/{} (pages {:?}) failed: {}", number, total_batches, page_numbers, e);
                let detail = e.to_string();
                cb.on_batch_error(number, total_batches, &detail);
                analytics.record(BatchAnalytics {
                    batch_index: batch.index,
                    pages: page_numbers.clone(),
                    field_count: 0,
                    token_usage: Default::default(),
                    processing_time_ms: 0,
                    finish_reason: None,
                    error: Some(detail.clone()),
                });
                errors.push(UnitError::BatchFailed {
                    batch: number,
                    pages: page_numbers,
                    detail,
                });
            }
        }
    }

    if results.is_empty() {
        if cancelled && analytics.failed_batches == 0 {
            return Err(FormsError::Cancelled { unit: "batch" });
        }
        let first_error = errors
            .iter()
            .find(|e| matches!(e, UnitError::BatchFailed { .. }))
            .map(|e| e.to_string())
            .unwrap_or_default();
        return Err(FormsError::AllBatchesFailed {
            total: total_batches,
            first_error,
        });
    }

    analytics.fields_before_merge = results.iter().map(|r| r.fields.len()).sum();
    let fields = merge::batch_merge(results.into_iter().map(|r| r.fields).collect(), total_pages);
    analytics.fields_after_merge = fields.len();
    analytics.total_duration_ms = job_start.elapsed().as_millis() as u64;

    info!(
        "Classification done: {} fields from {}/{} batches ({} dropped by validation)",
        fields.len(),
        analytics.successful_batches,
        total_batches,
        analytics.fields_before_merge - analytics.fields_after_merge
    );
    cb.on_job_complete(analytics.successful_batches, total_batches, fields.len());

    Ok(ClassificationOutput {
        fields,
        analytics,
        errors,
    })
}
