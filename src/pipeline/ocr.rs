//! OCR adapter: document text detection → page text + spatial blocks.
//!
//! [`OcrProvider`] is the seam; [`GoogleVisionOcr`] calls the Vision REST
//! `images:annotate` endpoint with `DOCUMENT_TEXT_DETECTION`. The adapter
//! does not retry. [`ocr_pages`] fans pages out concurrently, each call under
//! its own timeout, and keeps whatever succeeded.

use crate::cancel::CancelFlag;
use crate::config::FormsConfig;
use crate::error::{FormsError, UnitError};
use crate::field::{BoundingBox, OcrPage, TextBlock};
use crate::pipeline::bounded;
use crate::pipeline::encode::ImageAttachment;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Image payload for a text-detection call.
#[derive(Debug, Clone)]
pub enum OcrImage {
    /// Inline base64 content.
    Content(ImageAttachment),
    /// A URI the provider fetches itself (`gs://` or `https://`).
    Uri(String),
}

// ── Provider response shape (camelCase, as Vision returns it) ────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentAnnotation {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub pages: Vec<AnnotatedPage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnnotatedPage {
    #[serde(default)]
    pub blocks: Vec<AnnotatedBlock>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotatedBlock {
    #[serde(default)]
    pub bounding_box: Option<BoundingPoly>,
    #[serde(default)]
    pub paragraphs: Vec<Paragraph>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Paragraph {
    #[serde(default)]
    pub words: Vec<Word>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Word {
    #[serde(default)]
    pub symbols: Vec<Symbol>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Symbol {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoundingPoly {
    #[serde(default)]
    pub vertices: Vec<Vertex>,
}

/// Vision omits zero coordinates, hence the defaults.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Vertex {
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
}

/// Normalised OCR result for one image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OcrText {
    pub full_text: String,
    pub blocks: Vec<TextBlock>,
}

/// A document-text-detection backend.
#[async_trait]
pub trait OcrProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn document_text_detection(&self, image: &OcrImage) -> Result<DocumentAnnotation, FormsError>;
}

// ── Google Vision ────────────────────────────────────────────────────────

/// Google Cloud Vision over REST, authenticated with an API key.
pub struct GoogleVisionOcr {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct AnnotateRequest {
    requests: Vec<AnnotateImageRequest>,
}

#[derive(Debug, Serialize)]
struct AnnotateImageRequest {
    image: VisionImage,
    features: Vec<Feature>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum VisionImage {
    Content { content: String },
    Source { source: ImageUri },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageUri {
    image_uri: String,
}

#[derive(Debug, Serialize)]
struct Feature {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateImageResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateImageResponse {
    full_text_annotation: Option<DocumentAnnotation>,
    error: Option<VisionStatus>,
}

#[derive(Debug, Deserialize)]
struct VisionStatus {
    #[serde(default)]
    message: String,
}

impl GoogleVisionOcr {
    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    /// Build from config; fails when no OCR key is configured.
    pub fn from_config(config: &FormsConfig) -> Result<Self, FormsError> {
        let key = config
            .ocr_api_key
            .clone()
            .ok_or_else(|| FormsError::ProviderNotConfigured {
                stage: "OCR",
                provider: "google-vision".to_string(),
                hint: "Set FORMS_OCR_API_KEY or GOOGLE_VISION_API_KEY.".to_string(),
            })?;
        Ok(Self::new(key, config.ocr_endpoint.clone()))
    }
}

#[async_trait]
impl OcrProvider for GoogleVisionOcr {
    fn name(&self) -> &str {
        "google-vision"
    }

    async fn document_text_detection(&self, image: &OcrImage) -> Result<DocumentAnnotation, FormsError> {
        let image = match image {
            OcrImage::Content(att) => VisionImage::Content {
                content: att.data.clone(),
            },
            OcrImage::Uri(uri) => VisionImage::Source {
                source: ImageUri {
                    image_uri: uri.clone(),
                },
            },
        };
        let body = AnnotateRequest {
            requests: vec![AnnotateImageRequest {
                image,
                features: vec![Feature {
                    kind: "DOCUMENT_TEXT_DETECTION",
                }],
            }],
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .query(&[("key", &self.api_key)])
            .json(&body)
            .send()
            .await
            .map_err(|e| FormsError::OcrApiError {
                message: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let detail: String = text.chars().take(300).collect();
            return Err(match status.as_u16() {
                401 | 403 => FormsError::AuthError {
                    provider: self.name().to_string(),
                    detail,
                },
                429 => FormsError::RateLimitExceeded {
                    provider: self.name().to_string(),
                    retry_after_secs: None,
                },
                _ => FormsError::OcrApiError {
                    message: format!("HTTP {status}: {detail}"),
                },
            });
        }

        let parsed: AnnotateResponse = resp.json().await.map_err(|e| FormsError::OcrApiError {
            message: format!("malformed response: {e}"),
        })?;
        let first = parsed.responses.into_iter().next();
        match first {
            Some(AnnotateImageResponse {
                error: Some(err), ..
            }) => Err(FormsError::OcrApiError {
                message: err.message,
            }),
            Some(r) => Ok(r.full_text_annotation.unwrap_or_default()),
            None => Ok(DocumentAnnotation::default()),
        }
    }
}

// ── Normalisation ────────────────────────────────────────────────────────

/// Box from polygon vertices 0 (top-left) and 2 (bottom-right).
fn bounding_box(poly: Option<&BoundingPoly>) -> BoundingBox {
    let Some(poly) = poly else {
        return BoundingBox::default();
    };
    let tl = poly.vertices.first().copied().unwrap_or_default();
    let br = poly.vertices.get(2).copied().unwrap_or(tl);
    BoundingBox {
        x: tl.x,
        y: tl.y,
        width: (br.x - tl.x).abs(),
        height: (br.y - tl.y).abs(),
    }
}

/// Flatten block → paragraph → word → symbol into one text per block.
pub fn flatten(annotation: &DocumentAnnotation, page_number: u32) -> OcrText {
    let mut blocks = Vec::new();
    for page in &annotation.pages {
        for block in &page.blocks {
            let text = block
                .paragraphs
                .iter()
                .flat_map(|p| p.words.iter())
                .map(|w| w.symbols.iter().map(|s| s.text.as_str()).collect::<String>())
                .collect::<Vec<_>>()
                .join(" ");
            if text.trim().is_empty() {
                continue;
            }
            blocks.push(TextBlock::new(
                text,
                bounding_box(block.bounding_box.as_ref()),
                page_number,
            ));
        }
    }
    OcrText {
        full_text: annotation.text.clone(),
        blocks,
    }
}

/// Run text detection on one image and normalise the result.
pub async fn extract_text(
    provider: &dyn OcrProvider,
    image: &OcrImage,
    page_number: u32,
) -> Result<OcrText, FormsError> {
    let annotation = provider.document_text_detection(image).await?;
    let text = flatten(&annotation, page_number);
    debug!(
        "Page {}: {} chars, {} blocks",
        page_number,
        text.full_text.len(),
        text.blocks.len()
    );
    Ok(text)
}

/// OCR every `(page_number, image)` concurrently with partial success.
///
/// Pages come back sorted by page number. Failed or timed-out pages are
/// reported as [`UnitError::OcrFailed`] and left out. Once `cancel` is set,
/// pages not yet started are skipped and reported as one
/// [`UnitError::Cancelled`].
pub async fn ocr_pages(
    provider: Arc<dyn OcrProvider>,
    images: Vec<(u32, OcrImage)>,
    config: &FormsConfig,
    cancel: &CancelFlag,
) -> (Vec<OcrPage>, Vec<UnitError>) {
    info!("OCR: {} page(s) via {}", images.len(), provider.name());
    let timeout = config.ocr_timeout_secs;

    let mut results: Vec<(u32, Option<Result<OcrText, FormsError>>)> =
        stream::iter(images.into_iter().map(|(page, image)| {
            let provider = Arc::clone(&provider);
            let cancel = cancel.clone();
            async move {
                if cancel.is_cancelled() {
                    return (page, None);
                }
                let result = bounded("OCR", timeout, async {
                    extract_text(provider.as_ref(), &image, page).await
                })
                .await;
                (page, Some(result))
            }
        }))
        .buffer_unordered(config.ocr_concurrency)
        .collect()
        .await;
    results.sort_by_key(|(page, _)| *page);

    let mut pages = Vec::new();
    let mut errors = Vec::new();
    let mut skipped = 0;
    for (page, result) in results {
        match result {
            None => skipped += 1,
            Some(Ok(text)) => pages.push(OcrPage {
                page,
                text: text.full_text,
                blocks: text.blocks,
            }),
            Some(Err(e)) => {
                warn!("Page {}: OCR failed: {}", page, e);
                errors.push(UnitError::OcrFailed {
                    page,
                    detail: e.to_string(),
                });
            }
        }
    }
    if skipped > 0 {
        warn!("Cancellation observed; skipped OCR for {} page(s)", skipped);
        errors.push(UnitError::Cancelled {
            unit: "page".to_string(),
            skipped,
        });
    }
    (pages, errors)
}
