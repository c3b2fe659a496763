//! Error types for the edgequake-forms library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`FormsError`] (**Fatal**): the extraction cannot produce a result at
//!   all (provider not configured, every page failed, the classifier output
//!   could not be parsed even after retry and repair). Returned as
//!   `Err(FormsError)` from the top-level entry points.
//!
//! * [`UnitError`] (**Non-fatal**): one unit of work failed (one image could
//!   not be fetched, one page's OCR call timed out, one batch's classification
//!   failed) but the others are fine. Stored inside the output structs next to
//!   the successful fields so callers can inspect partial success.
//!
//! An empty field list is never used to signal failure: "this form has no
//! fields" and "the classifier broke" must stay distinguishable.

use thiserror::Error;

/// All fatal errors returned by the edgequake-forms library.
#[derive(Debug, Error)]
pub enum FormsError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder or environment validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The configured provider is not initialised (missing API key etc.).
    #[error("{stage} provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured {
        stage: &'static str,
        provider: String,
        hint: String,
    },

    // ── Transport errors ──────────────────────────────────────────────────
    /// The OCR provider returned an error (auth, quota, malformed image).
    #[error("OCR provider error: {message}")]
    OcrApiError { message: String },

    /// The LLM API returned a non-retryable error.
    #[error("LLM API error: {message}")]
    LlmApiError { message: String },

    /// API returned HTTP 429.
    #[error("Rate limit exceeded for provider '{provider}'")]
    RateLimitExceeded {
        provider: String,
        retry_after_secs: Option<u64>,
    },

    /// API returned an authentication error (401/403).
    #[error("Authentication error from provider '{provider}': {detail}")]
    AuthError { provider: String, detail: String },

    /// An external call exceeded its configured time bound.
    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: &'static str, secs: u64 },

    /// An image could not be fetched from its source.
    #[error("Failed to fetch image '{source_ref}': {reason}")]
    ImageFetchFailed { source_ref: String, reason: String },

    /// Image bytes could not be decoded or encoded.
    #[error("Image processing failed: {0}")]
    ImageError(String),

    /// Navigation or DOM access through the headless browser failed.
    #[error("Browser error while {action}: {detail}")]
    BrowserError { action: &'static str, detail: String },

    // ── Content errors ────────────────────────────────────────────────────
    /// The model hit its output-token limit before writing anything.
    #[error("LLM response truncated (finish_reason=length) with no content; raise max_tokens or lower reasoning effort")]
    TruncatedResponse,

    /// The model returned an empty completion for some other reason.
    #[error("LLM returned no content (finish_reason={finish_reason})")]
    NoContent { finish_reason: String },

    /// Retry and JSON repair were both exhausted.
    #[error("Field classification failed: unparseable response ({length} chars, finish_reason={finish_reason}): {preview}")]
    ClassificationFailed {
        length: usize,
        finish_reason: String,
        preview: String,
    },

    // ── Exhaustion ────────────────────────────────────────────────────────
    /// Every image failed to fetch; there is nothing to OCR.
    #[error("All {total} images failed to fetch.\nFirst error: {first_error}")]
    AllImagesFailed { total: usize, first_error: String },

    /// Every page failed OCR.
    #[error("All {total} pages failed OCR.\nFirst error: {first_error}")]
    AllPagesFailed { total: usize, first_error: String },

    /// Every batch failed classification.
    #[error("All {total} batches failed classification.\nFirst error: {first_error}")]
    AllBatchesFailed { total: usize, first_error: String },

    /// Every image section failed classification.
    #[error("All {total} image sections failed classification.\nFirst error: {first_error}")]
    AllSectionsFailed { total: usize, first_error: String },

    /// Cancellation was observed before any unit completed.
    #[error("Extraction cancelled before any {unit} completed")]
    Cancelled { unit: &'static str },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FormsError {
    /// `true` for errors raised by a network collaborator rather than by
    /// content handling. Used when downgrading unit failures.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            FormsError::OcrApiError { .. }
                | FormsError::LlmApiError { .. }
                | FormsError::RateLimitExceeded { .. }
                | FormsError::AuthError { .. }
                | FormsError::Timeout { .. }
                | FormsError::ImageFetchFailed { .. }
                | FormsError::BrowserError { .. }
        )
    }
}

/// A non-fatal error for a single unit of work.
///
/// Returned alongside the successful fields. The overall extraction
/// continues unless ALL units of a stage fail.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitError {
    /// One image source could not be fetched.
    #[error("Image {index} ('{source_ref}'): fetch failed: {detail}")]
    ImageFetchFailed {
        index: usize,
        source_ref: String,
        detail: String,
    },

    /// One page's OCR call failed or timed out.
    #[error("Page {page}: OCR failed: {detail}")]
    OcrFailed { page: u32, detail: String },

    /// One batch's classification failed.
    #[error("Batch {batch} (pages {pages:?}): classification failed: {detail}")]
    BatchFailed {
        batch: usize,
        pages: Vec<u32>,
        detail: String,
    },

    /// One image section's classification failed.
    #[error("Section {section}/{total}: classification failed: {detail}")]
    SectionFailed {
        section: usize,
        total: usize,
        detail: String,
    },

    /// Work that was never scheduled because cancellation was observed.
    #[error("Cancelled: {skipped} {unit}(s) not processed")]
    Cancelled { unit: String, skipped: usize },
}
