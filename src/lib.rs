//! # edgequake-forms
//!
//! Reconstruct fillable-form schemas from scanned pages, photographed
//! forms, raw HTML and live web forms.
//!
//! ## Why this crate?
//!
//! OCR alone turns a paper form into a wall of text: it cannot tell a
//! section header from a question, or a checkbox list from a paragraph.
//! This crate combines OCR text with block geometry and asks an LLM to
//! classify the result into typed fields (text, email, radio, rating,
//! signature, ...). Web forms skip the LLM entirely: fields are read from
//! the element tree.
//!
//! ## Pipeline Overview
//!
//! ```text
//! images / scans                     tall single image          HTML / URL
//!  │                                  │                          │
//!  ├─ 1. Fetch    paths or URLs       ├─ 1. Split  overlapping   ├─ 1. Snapshot  DOM tree
//!  ├─ 2. Prepare  compress            │            sections      └─ 2. Extract   widgets,
//!  ├─ 3. OCR      text + blocks       ├─ 2. Classify per section                 labels
//!  ├─ 4. Batch    pages → LLM         └─ 3. Dedup  across
//!  └─ 5. Merge    validate + order                 overlaps
//! ```
//!
//! The classifier retries once before repairing JSON, and every stage
//! tolerates partial failure: failed pages, batches or sections are
//! reported next to the fields that did succeed.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_forms::{BatchOptions, FormsConfig, FormsPipeline, OcrPage};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // LLM auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let pipeline = FormsPipeline::from_config(FormsConfig::from_env()?)?;
//!     let pages = vec![OcrPage { page: 1, text: "Name: ______".into(), blocks: vec![] }];
//!     let output = pipeline.classify_pages_from_ocr(&pages, &BatchOptions::default()).await?;
//!     for field in &output.fields {
//!         println!("{:<30} {}", field.label, field.field_type());
//!     }
//!     eprintln!("tokens: {}", output.analytics.token_usage.total());
//!     Ok(())
//! }
//! ```
//!
//! The DOM path needs no provider at all:
//!
//! ```rust
//! let fields = edgequake_forms::classify_from_html(
//!     r#"<label for="e">Email *</label><input id="e" type="email">"#,
//! );
//! assert_eq!(fields[0].label, "Email");
//! assert!(fields[0].required);
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `form2schema` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-forms = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod browser;
pub mod cancel;
pub mod classify;
pub mod config;
pub mod error;
pub mod field;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use browser::{BrowserPage, HttpPage};
pub use cancel::CancelFlag;
pub use classify::{classify_from_dom, classify_from_html, classify_from_url, FormsPipeline};
pub use config::{CompressionOptions, FormsConfig, FormsConfigBuilder, ImageFormat, ReasoningEffort};
pub use error::{FormsError, UnitError};
pub use field::{
    BoundingBox, ChoiceField, ChoiceStyle, FieldCandidate, FieldKind, FieldRecord, FieldType,
    InputKind, OcrPage, OtherOption, TextBlock,
};
pub use output::{
    BatchAnalytics, ClassificationAnalytics, ClassificationOutput, SplitClassification, TokenUsage,
};
pub use pipeline::batch::BatchOptions;
pub use pipeline::dom::DomTree;
pub use pipeline::input::ImageSource;
pub use pipeline::llm::{ChatCompletion, EdgequakeChat, OpenAiChatClient};
pub use pipeline::ocr::{GoogleVisionOcr, OcrProvider};
pub use progress::{FormsProgressCallback, NoopProgressCallback, ProgressCallback};
