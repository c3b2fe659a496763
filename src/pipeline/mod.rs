//! Pipeline stages for form-field extraction.
//!
//! Each submodule implements exactly one transformation step.
//!
//! ## Data Flow
//!
//! ```text
//!                         ┌──▶ ocr ──▶ spatial ──▶ batch ──┐
//! input ──▶ image ──▶ ────┤                                ├──▶ merge
//! (fetch)  (compress/     └──▶ encode ──▶ classify ────────┘
//!           split)                     (llm + repair + postprocess)
//!
//! html / browser DOM ──▶ dom ──────────────────────────────────▶ fields
//! ```
//!
//! 1. [`input`]: fetch image bytes from paths or URLs, partial success
//! 2. [`image`]: compress and split tall images into overlapping sections
//! 3. [`encode`]: base64-wrap images for API request bodies
//! 4. [`ocr`]: document text detection → page text + spatial blocks
//! 5. [`spatial`]: render blocks and layout rules into a prompt hint
//! 6. [`batch`]: page batching, sequential classification, partial failure
//! 7. [`classify`]: one classifier invocation: retry, then repair, then extract
//! 8. [`merge`]: batch merge and cross-section dedup
//! 9. [`dom`]: OCR-free extraction from a form's element tree

pub mod batch;
pub mod classify;
pub mod dom;
pub mod encode;
pub mod image;
pub mod input;
pub mod llm;
pub mod merge;
pub mod ocr;
pub mod postprocess;
pub mod repair;
pub mod spatial;

use crate::error::FormsError;
use std::future::Future;
use std::time::Duration;

/// Run `fut` under a timeout; elapsing maps to [`FormsError::Timeout`].
pub(crate) async fn bounded<T, F>(stage: &'static str, secs: u64, fut: F) -> Result<T, FormsError>
where
    F: Future<Output = Result<T, FormsError>>,
{
    match tokio::time::timeout(Duration::from_secs(secs), fut).await {
        Ok(result) => result,
        Err(_) => Err(FormsError::Timeout { stage, secs }),
    }
}
