//! Progress-callback trait for per-batch classification events.
//!
//! Inject an [`Arc<dyn FormsProgressCallback>`] via
//! [`crate::config::FormsConfigBuilder::progress_callback`] to be told when
//! each page batch (or image section) starts, finishes or fails.
//!
//! # Example
//!
//! ```rust
//! use edgequake_forms::{FormsConfig, FormsProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     fields: AtomicUsize,
//! }
//!
//! impl FormsProgressCallback for CountingCallback {
//!     fn on_batch_complete(&self, _batch: usize, _total: usize, field_count: usize) {
//!         self.fields.fetch_add(field_count, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = FormsConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { fields: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the orchestrators as they work through batches or sections.
///
/// All methods have default no-op implementations. Batch indices are
/// 1-based. OCR and image-fetch events are not reported here; those stages
/// run concurrently and are summarised by the `UnitError`s in the output.
pub trait FormsProgressCallback: Send + Sync {
    /// Called once before the first unit is scheduled.
    ///
    /// # Arguments
    /// * `total_pages` - pages (or sections) in the job
    /// * `total_batches` - classifier calls that will be attempted
    fn on_job_start(&self, total_pages: usize, total_batches: usize) {
        let _ = (total_pages, total_batches);
    }

    fn on_batch_start(&self, batch: usize, total_batches: usize, pages: &[u32]) {
        let _ = (batch, total_batches, pages);
    }

    fn on_batch_complete(&self, batch: usize, total_batches: usize, field_count: usize) {
        let _ = (batch, total_batches, field_count);
    }

    /// Called when a batch fails. The job continues with the next one.
    fn on_batch_error(&self, batch: usize, total_batches: usize, error: &str) {
        let _ = (batch, total_batches, error);
    }

    /// Called once after all units were attempted (or cancellation stopped
    /// scheduling). `field_count` is the merged total.
    fn on_job_complete(&self, successful_batches: usize, total_batches: usize, field_count: usize) {
        let _ = (successful_batches, total_batches, field_count);
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl FormsProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::FormsConfig`].
pub type ProgressCallback = Arc<dyn FormsProgressCallback>;

/// The configured callback, or the no-op one.
pub(crate) fn resolve(cb: Option<&ProgressCallback>) -> ProgressCallback {
    cb.cloned()
        .unwrap_or_else(|| Arc::new(NoopProgressCallback) as ProgressCallback)
}
