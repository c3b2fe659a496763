//! Top-level extraction entry points.
//!
//! Three ingestion paths share one field model:
//!
//! * **OCR path**: [`FormsPipeline::classify_pages_from_ocr`] (pages already
//!   OCR'd) and [`FormsPipeline::classify_images`] (fetch → compress → OCR →
//!   batch → merge).
//! * **Vision path**: [`FormsPipeline::split_and_classify_image`] sends
//!   overlapping sections of one tall image to the classifier and
//!   de-duplicates across sections.
//! * **DOM path**: [`classify_from_dom`], [`classify_from_html`] and
//!   [`classify_from_url`] read fields straight from the element tree, with
//!   no LLM call.

use crate::browser::BrowserPage;
use crate::cancel::CancelFlag;
use crate::config::FormsConfig;
use crate::error::{FormsError, UnitError};
use crate::field::{FieldCandidate, OcrPage};
use crate::output::{ClassificationOutput, SplitClassification, TokenUsage};
use crate::pipeline::batch::{run_batches, BatchOptions};
use crate::pipeline::classify::FieldClassifier;
use crate::pipeline::dom::{self, DomTree};
use crate::pipeline::encode::ImageAttachment;
use crate::pipeline::image::{self, ImageSection};
use crate::pipeline::input::{fetch_all, ImageSource};
use crate::pipeline::llm::{resolve_chat_client, ChatCompletion, ChatMessage, ChatRequest};
use crate::pipeline::ocr::{ocr_pages, GoogleVisionOcr, OcrImage, OcrProvider};
use crate::pipeline::repair::{JsonRepair, SyntaxRepair};
use crate::pipeline::{bounded, merge};
use crate::progress;
use crate::prompts::{self, VISION_SECTION_PROMPT};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const SECTION_USER_MESSAGE: &str = "Extract every form field visible in this image.";

/// The OCR and vision paths, with their collaborators injected.
///
/// # Example
/// ```rust,no_run
/// use edgequake_forms::{BatchOptions, FormsConfig, FormsPipeline, ImageSource};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = FormsConfig::from_env()?;
/// let pipeline = FormsPipeline::from_config(config)?;
/// let sources = vec![ImageSource::parse("scan-page-1.jpg"), ImageSource::parse("scan-page-2.jpg")];
/// let output = pipeline.classify_images(&sources, &BatchOptions::default()).await?;
/// for field in &output.fields {
///     println!("{} ({})", field.label, field.field_type());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct FormsPipeline {
    config: FormsConfig,
    llm: Arc<dyn ChatCompletion>,
    ocr: Option<Arc<dyn OcrProvider>>,
    repair: Arc<dyn JsonRepair>,
    cancel: CancelFlag,
}

impl FormsPipeline {
    pub fn new(config: FormsConfig, llm: Arc<dyn ChatCompletion>) -> Self {
        Self {
            config,
            llm,
            ocr: None,
            repair: Arc::new(SyntaxRepair::new()),
            cancel: CancelFlag::new(),
        }
    }

    /// Resolve the chat client from the config and environment. The OCR
    /// provider is resolved when first needed.
    pub fn from_config(config: FormsConfig) -> Result<Self, FormsError> {
        let llm = resolve_chat_client(&config)?;
        Ok(Self::new(config, llm))
    }

    pub fn with_ocr(mut self, ocr: Arc<dyn OcrProvider>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    pub fn with_repair(mut self, repair: Arc<dyn JsonRepair>) -> Self {
        self.repair = repair;
        self
    }

    /// Share a cancellation flag with the caller.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &FormsConfig {
        &self.config
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    fn classifier(&self) -> FieldClassifier {
        FieldClassifier::new(Arc::clone(&self.llm))
            .with_repair(Arc::clone(&self.repair))
            .with_timeout(self.config.llm_timeout_secs)
    }

    fn ocr_provider(&self) -> Result<Arc<dyn OcrProvider>, FormsError> {
        match &self.ocr {
            Some(ocr) => Ok(Arc::clone(ocr)),
            None => Ok(Arc::new(GoogleVisionOcr::from_config(&self.config)?)),
        }
    }

    /// Classify pages that were OCR'd elsewhere.
    ///
    /// # Errors
    /// [`FormsError::AllBatchesFailed`] when no batch succeeded;
    /// [`FormsError::Cancelled`] when cancellation stopped the job before
    /// any batch ran. Individual batch failures are reported in
    /// `output.errors`.
    pub async fn classify_pages_from_ocr(
        &self,
        pages: &[OcrPage],
        options: &BatchOptions,
    ) -> Result<ClassificationOutput, FormsError> {
        run_batches(&self.classifier(), pages, options, &self.config, &self.cancel).await
    }

    /// Fetch, compress and OCR each image, then classify the pages.
    ///
    /// Image `i` (0-based) becomes page `i + 1`, so page numbers keep
    /// pointing at the caller's inputs even when some images fail.
    ///
    /// # Errors
    /// [`FormsError::AllImagesFailed`] / [`FormsError::AllPagesFailed`] when
    /// a stage produced nothing; [`FormsError::Cancelled`] when cancellation
    /// left no page OCR'd.
    pub async fn classify_images(
        &self,
        sources: &[ImageSource],
        options: &BatchOptions,
    ) -> Result<ClassificationOutput, FormsError> {
        if sources.is_empty() {
            return Err(FormsError::InvalidConfig("no image sources given".to_string()));
        }
        let ocr = self.ocr_provider()?;

        // ── Step 1: Fetch ────────────────────────────────────────────────
        let (fetched, mut errors) = fetch_all(sources, &self.config).await;
        if fetched.is_empty() {
            return Err(FormsError::AllImagesFailed {
                total: sources.len(),
                first_error: errors.first().map(|e| e.to_string()).unwrap_or_default(),
            });
        }
        if self.cancel.is_cancelled() {
            return Err(FormsError::Cancelled { unit: "page" });
        }

        // ── Step 2: Compress (CPU-bound) ─────────────────────────────────
        let compression = self.config.compression;
        let images = tokio::task::spawn_blocking(move || {
            fetched
                .into_iter()
                .map(|(index, bytes)| {
                    let compressed = image::compress(&bytes, &compression);
                    debug!(
                        "Image {}: {} → {} bytes",
                        index + 1,
                        bytes.len(),
                        compressed.bytes.len()
                    );
                    (
                        index as u32 + 1,
                        OcrImage::Content(ImageAttachment::from_bytes(
                            &compressed.bytes,
                            compressed.mime_type,
                        )),
                    )
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| FormsError::Internal(format!("compression task failed: {e}")))?;

        // ── Step 3: OCR (concurrent, partial success) ────────────────────
        let attempted = images.len();
        let (pages, ocr_errors) = ocr_pages(ocr, images, &self.config, &self.cancel).await;
        if pages.is_empty() {
            if ocr_errors
                .iter()
                .any(|e| matches!(e, UnitError::Cancelled { .. }))
            {
                return Err(FormsError::Cancelled { unit: "page" });
            }
            return Err(FormsError::AllPagesFailed {
                total: attempted,
                first_error: ocr_errors.first().map(|e| e.to_string()).unwrap_or_default(),
            });
        }
        errors.extend(ocr_errors);

        // ── Step 4: Batch + merge ────────────────────────────────────────
        let mut output = self.classify_pages_from_ocr(&pages, options).await?;
        errors.append(&mut output.errors);
        output.errors = errors;
        Ok(output)
    }

    /// Classify one image, splitting it first when it is taller than
    /// `split_max_height`.
    ///
    /// Sections run one after another. A failed section is reported in
    /// `errors`; the call fails only when no section succeeded.
    pub async fn split_and_classify_image(
        &self,
        bytes: &[u8],
    ) -> Result<SplitClassification, FormsError> {
        let owned = bytes.to_vec();
        let (max_height, overlap) = (self.config.split_max_height, self.config.split_overlap);
        let sections = tokio::task::spawn_blocking(move || image::split(&owned, max_height, overlap))
            .await
            .map_err(|e| FormsError::Internal(format!("split task failed: {e}")))?;
        let total = sections.len();
        info!("Classifying image in {} section(s)", total);

        let cb = progress::resolve(self.config.progress_callback.as_ref());
        cb.on_job_start(total, total);

        let classifier = self.classifier();
        let template = self
            .config
            .system_prompt
            .as_deref()
            .unwrap_or(VISION_SECTION_PROMPT);
        let base_prompt = prompts::render_base_prompt(template);

        let mut per_section: Vec<Vec<FieldCandidate>> = Vec::with_capacity(total);
        let mut errors: Vec<UnitError> = Vec::new();
        let mut usage = TokenUsage::default();
        let mut previous_overlap = 0;

        for section in sections {
            if self.cancel.is_cancelled() {
                let skipped = total - section.index;
                warn!("Cancellation observed; skipping {} section(s)", skipped);
                errors.push(UnitError::Cancelled {
                    unit: "section".to_string(),
                    skipped,
                });
                break;
            }
            let number = section.index + 1;
            cb.on_batch_start(number, total, &[1]);

            // Edge overlap this section shares with either neighbour.
            let shared_rows = section.overlap_with_next.max(previous_overlap);
            previous_overlap = section.overlap_with_next;
            match self
                .classify_section(&classifier, &base_prompt, section, shared_rows)
                .await
            {
                Ok((fields, section_usage)) => {
                    usage += section_usage;
                    cb.on_batch_complete(number, total, fields.len());
                    per_section.push(fields);
                }
                Err(e) => {
                    warn!("Section {}/{} failed: {}", number, total, e);
                    cb.on_batch_error(number, total, &e.to_string());
                    errors.push(UnitError::SectionFailed {
                        section: number,
                        total,
                        detail: e.to_string(),
                    });
                }
            }
        }

        if per_section.is_empty() {
            let first_error = errors
                .iter()
                .find(|e| matches!(e, UnitError::SectionFailed { .. }))
                .map(|e| e.to_string());
            return Err(match first_error {
                Some(first_error) => FormsError::AllSectionsFailed { total, first_error },
                None => FormsError::Cancelled { unit: "section" },
            });
        }

        let successful = per_section.len();
        let merged = merge::section_merge(per_section);
        info!(
            "Image done: {} fields from {}/{} sections ({} duplicates removed)",
            merged.fields.len(),
            successful,
            total,
            merged.duplicates_removed
        );
        cb.on_job_complete(successful, total, merged.fields.len());

        Ok(SplitClassification {
            fields: merged.fields,
            was_split: total > 1,
            num_sections: total,
            token_usage: usage,
            errors,
            duplicates_removed: merged.duplicates_removed,
        })
    }

    async fn classify_section(
        &self,
        classifier: &FieldClassifier,
        base_prompt: &str,
        section: ImageSection,
        shared_rows: u32,
    ) -> Result<(Vec<FieldCandidate>, TokenUsage), FormsError> {
        let mut system = base_prompt.to_string();
        if section.total > 1 {
            system.push_str(&prompts::section_context(section.index, section.total, shared_rows));
        }
        debug!(
            "Section {}/{}: rows {}..{}",
            section.index + 1,
            section.total,
            section.y_start,
            section.y_end()
        );

        let compression = self.config.compression;
        let y_start = section.y_start as f32;
        let attachment = tokio::task::spawn_blocking(move || {
            let compressed = image::compress(&section.bytes, &compression);
            ImageAttachment::from_bytes(&compressed.bytes, compressed.mime_type)
        })
        .await
        .map_err(|e| FormsError::Internal(format!("compression task failed: {e}")))?;

        let messages = vec![
            ChatMessage::system(system),
            ChatMessage::user_with_images(SECTION_USER_MESSAGE, vec![attachment]),
        ];
        let out = classifier
            .classify(&ChatRequest::from_config(&self.config, messages))
            .await?;

        // Section-relative positions become image-relative; the whole image
        // is page 1.
        let fields = out
            .fields
            .into_iter()
            .map(|mut f| {
                f.page_number = Some(f.page_number.unwrap_or(1));
                f.y = f.y.map(|y| y + y_start);
                f
            })
            .collect();
        Ok((fields, out.token_usage))
    }
}

// ── DOM path ─────────────────────────────────────────────────────────────

/// Extract fields from an already captured element tree.
pub fn classify_from_dom(tree: &DomTree) -> Vec<FieldCandidate> {
    dom::extract_fields(tree)
}

/// Parse markup and extract its fields.
pub fn classify_from_html(html: &str) -> Vec<FieldCandidate> {
    classify_from_dom(&DomTree::parse_html(html))
}

/// Navigate `page` to `url` and extract the rendered form's fields.
///
/// Navigation (including settle time) and DOM extraction are bounded by
/// separate timeouts.
pub async fn classify_from_url(
    page: &dyn BrowserPage,
    url: &str,
    config: &FormsConfig,
) -> Result<Vec<FieldCandidate>, FormsError> {
    let start = Instant::now();
    bounded("navigation", config.navigation_timeout_secs, page.goto(url)).await?;
    debug!("Navigated to {} in {}ms", url, start.elapsed().as_millis());

    let fields = bounded("DOM extraction", config.extraction_timeout_secs, async {
        let html = page.html().await?;
        tokio::task::spawn_blocking(move || classify_from_html(&html))
            .await
            .map_err(|e| FormsError::Internal(format!("extraction task failed: {e}")))
    })
    .await?;

    info!("{}: {} fields in {}ms", url, fields.len(), start.elapsed().as_millis());
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    struct SlowPage {
        delay: Duration,
        html: String,
    }

    #[async_trait]
    impl BrowserPage for SlowPage {
        async fn goto(&self, _url: &str) -> Result<(), FormsError> {
            tokio::time::sleep(self.delay).await;
            Ok(())
        }

        async fn html(&self) -> Result<String, FormsError> {
            Ok(self.html.clone())
        }

        async fn screenshot(&self) -> Result<Vec<u8>, FormsError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn url_path_extracts_from_page_html() {
        let page = SlowPage {
            delay: Duration::from_millis(1),
            html: r#"<label for="q">Question</label><input id="q">"#.to_string(),
        };
        let fields = classify_from_url(&page, "https://forms.example/x", &FormsConfig::default())
            .await
            .unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].label, "Question");
    }

    #[tokio::test]
    async fn slow_navigation_times_out() {
        let page = SlowPage {
            delay: Duration::from_secs(30),
            html: String::new(),
        };
        let config = FormsConfig::builder()
            .navigation_timeout_secs(1)
            .build()
            .unwrap();
        let err = classify_from_url(&page, "https://forms.example/slow", &config)
            .await
            .unwrap_err();
        assert!(matches!(err, FormsError::Timeout { stage: "navigation", secs: 1 }));
    }
}
