//! Integration tests for the three ingestion paths.
//!
//! The LLM and OCR providers are stubbed, so these run offline. A live
//! smoke test at the bottom is gated behind `E2E_ENABLED`.
//!
//! Run with:
//!   cargo test --test pipeline -- --nocapture

use async_trait::async_trait;
use edgequake_forms::pipeline::llm::{ChatRequest, ChatResponse, FinishReason, Role};
use edgequake_forms::pipeline::ocr::{AnnotatedPage, DocumentAnnotation, OcrImage};
use edgequake_forms::pipeline::repair::SyntaxRepair;
use edgequake_forms::{
    classify_from_html, classify_from_url, BatchOptions, BrowserPage, CancelFlag, ChatCompletion,
    FieldType, FormsConfig, FormsError, FormsPipeline, ImageSource, OcrPage, OcrProvider,
    TokenUsage, UnitError,
};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("edgequake_forms=debug"))
        .with_test_writer()
        .try_init();
}

// ── Stubs ────────────────────────────────────────────────────────────────────

type Script = dyn Fn(usize, &ChatRequest) -> Result<String, FormsError> + Send + Sync;

/// Chat client driven by a closure of `(call number, request)`.
struct StubChat {
    calls: AtomicUsize,
    script: Box<Script>,
}

impl StubChat {
    fn new(
        script: impl Fn(usize, &ChatRequest) -> Result<String, FormsError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            script: Box::new(script),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatCompletion for StubChat {
    fn name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, FormsError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let content = (self.script)(call, request)?;
        Ok(ChatResponse {
            content,
            finish_reason: FinishReason::Stop,
            usage: TokenUsage {
                prompt_tokens: 50,
                completion_tokens: 10,
            },
        })
    }
}

/// Page numbers named by the `--- Page N ---` markers of the user message.
fn pages_in(request: &ChatRequest) -> Vec<u32> {
    request
        .messages
        .iter()
        .filter(|m| m.role == Role::User)
        .flat_map(|m| m.content.lines())
        .filter_map(|l| l.strip_prefix("--- Page "))
        .filter_map(|l| l.strip_suffix(" ---"))
        .filter_map(|n| n.parse().ok())
        .collect()
}

/// One text field per page in the request.
fn field_per_page(_call: usize, request: &ChatRequest) -> Result<String, FormsError> {
    let fields: Vec<String> = pages_in(request)
        .into_iter()
        .map(|n| format!(r#"{{"label":"Name {n}","type":"text","required":true,"pageNumber":{n}}}"#))
        .collect();
    Ok(format!("[{}]", fields.join(",")))
}

struct StaticOcr;

#[async_trait]
impl OcrProvider for StaticOcr {
    fn name(&self) -> &str {
        "static"
    }

    async fn document_text_detection(&self, _image: &OcrImage) -> Result<DocumentAnnotation, FormsError> {
        Ok(DocumentAnnotation {
            text: "Full name: ________\nEmail: ________".to_string(),
            pages: vec![AnnotatedPage::default()],
        })
    }
}

fn ocr_page(page: u32, text: &str) -> OcrPage {
    OcrPage {
        page,
        text: text.to_string(),
        blocks: vec![],
    }
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([255, 255, 255]));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

// ── OCR path ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn single_clean_page() {
    let chat = StubChat::new(|_, _| {
        Ok(r#"[
            {"type":"label","richTextContent":"<h2>Registration</h2>","pageNumber":1},
            {"label":"Full name","type":"text","required":true,"pageNumber":1},
            {"label":"Email","type":"email","pageNumber":1}
        ]"#
        .to_string())
    });
    let pipeline = FormsPipeline::new(FormsConfig::default(), chat.clone());

    let out = pipeline
        .classify_pages_from_ocr(&[ocr_page(1, "Registration\nFull name\nEmail")], &BatchOptions::default())
        .await
        .unwrap();

    assert_eq!(chat.calls(), 1);
    assert!(out.errors.is_empty());
    let types: Vec<_> = out.fields.iter().map(|f| f.field_type()).collect();
    assert_eq!(types, vec![FieldType::Label, FieldType::Text, FieldType::Email]);
    assert_eq!(out.analytics.total_pages, 1);
    assert_eq!(out.analytics.successful_batches, 1);
    assert_eq!(out.analytics.token_usage.total(), 60);
}

#[tokio::test]
async fn batch_failure_is_partial() {
    init_tracing();
    let chat = StubChat::new(|call, request| {
        if call == 2 {
            return Err(FormsError::LlmApiError {
                message: "upstream 500".to_string(),
            });
        }
        field_per_page(call, request)
    });
    let pipeline = FormsPipeline::new(FormsConfig::default(), chat.clone());
    let pages: Vec<_> = (1..=3).map(|n| ocr_page(n, "Name: ____")).collect();
    let options = BatchOptions {
        batch_size: Some(1),
        ..Default::default()
    };

    let out = pipeline.classify_pages_from_ocr(&pages, &options).await.unwrap();

    assert_eq!(chat.calls(), 3);
    let labels: Vec<_> = out.fields.iter().map(|f| f.label.as_str()).collect();
    assert_eq!(labels, vec!["Name 1", "Name 3"]);
    assert!(out.is_partial());
    assert!(matches!(
        &out.errors[..],
        [UnitError::BatchFailed { batch: 2, pages, .. }] if pages == &vec![2]
    ));
    assert_eq!(out.analytics.failed_batches, 1);
}

#[tokio::test]
async fn every_batch_failing_is_fatal() {
    let chat = StubChat::new(|_, _| {
        Err(FormsError::LlmApiError {
            message: "down".to_string(),
        })
    });
    let pipeline = FormsPipeline::new(FormsConfig::default(), chat);
    let pages: Vec<_> = (1..=2).map(|n| ocr_page(n, "x")).collect();

    let err = pipeline
        .classify_pages_from_ocr(&pages, &BatchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FormsError::AllBatchesFailed { total: 1, .. }), "{err}");
}

#[tokio::test]
async fn out_of_range_pages_are_dropped() {
    let chat = StubChat::new(|_, _| {
        Ok(r#"[
            {"label":"Kept","type":"text","pageNumber":2},
            {"label":"Phantom","type":"text","pageNumber":7},
            {"label":"Nowhere","type":"text"}
        ]"#
        .to_string())
    });
    let pipeline = FormsPipeline::new(FormsConfig::default(), chat);
    let pages = vec![ocr_page(1, "a"), ocr_page(2, "b")];

    let out = pipeline
        .classify_pages_from_ocr(&pages, &BatchOptions::default())
        .await
        .unwrap();
    let labels: Vec<_> = out.fields.iter().map(|f| f.label.as_str()).collect();
    assert_eq!(labels, vec!["Kept"]);
    assert_eq!(out.analytics.fields_before_merge, 3);
    assert_eq!(out.analytics.fields_after_merge, 1);
}

#[tokio::test]
async fn retry_runs_before_repair() {
    let chat = StubChat::new(|call, _| {
        Ok(if call == 1 {
            "Sorry, here is the form: [{label: 'Name'".to_string()
        } else {
            r#"[{"label":"Name","type":"text","pageNumber":1}]"#.to_string()
        })
    });
    let repair = Arc::new(SyntaxRepair::new());
    let pipeline =
        FormsPipeline::new(FormsConfig::default(), chat.clone()).with_repair(repair.clone());

    let out = pipeline
        .classify_pages_from_ocr(&[ocr_page(1, "Name: ___")], &BatchOptions::default())
        .await
        .unwrap();

    assert_eq!(chat.calls(), 2);
    assert_eq!(repair.invocations(), 0);
    assert_eq!(out.fields.len(), 1);
}

#[tokio::test]
async fn cancelled_before_start() {
    let chat = StubChat::new(field_per_page);
    let cancel = CancelFlag::new();
    cancel.cancel();
    let pipeline = FormsPipeline::new(FormsConfig::default(), chat.clone()).with_cancel(cancel);

    let err = pipeline
        .classify_pages_from_ocr(&[ocr_page(1, "x")], &BatchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FormsError::Cancelled { .. }), "{err}");
    assert_eq!(chat.calls(), 0);
}

// ── Image path ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn all_images_failing_is_fatal() {
    let chat = StubChat::new(field_per_page);
    let pipeline = FormsPipeline::new(FormsConfig::default(), chat.clone()).with_ocr(Arc::new(StaticOcr));
    let dir = tempfile::tempdir().unwrap();
    let sources: Vec<_> = ["a.png", "b.png"]
        .iter()
        .map(|name| ImageSource::parse(&dir.path().join(name).to_string_lossy()))
        .collect();

    let err = pipeline
        .classify_images(&sources, &BatchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FormsError::AllImagesFailed { total: 2, .. }), "{err}");
    assert_eq!(chat.calls(), 0);
}

/// Fails and cancels the job on its first call.
struct CancellingOcr {
    cancel: CancelFlag,
    calls: AtomicUsize,
}

#[async_trait]
impl OcrProvider for CancellingOcr {
    fn name(&self) -> &str {
        "cancelling"
    }

    async fn document_text_detection(&self, _image: &OcrImage) -> Result<DocumentAnnotation, FormsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.cancel.cancel();
        Err(FormsError::OcrApiError {
            message: "quota".to_string(),
        })
    }
}

#[tokio::test]
async fn cancellation_during_ocr_skips_remaining_pages() {
    let cancel = CancelFlag::new();
    let ocr = Arc::new(CancellingOcr {
        cancel: cancel.clone(),
        calls: AtomicUsize::new(0),
    });
    let config = FormsConfig::builder().ocr_concurrency(1).build().unwrap();
    let chat = StubChat::new(field_per_page);
    let pipeline = FormsPipeline::new(config, chat.clone())
        .with_ocr(ocr.clone())
        .with_cancel(cancel);
    let sources: Vec<_> = (1..=4)
        .map(|n| ImageSource::Bytes {
            name: format!("scan-{n}.png"),
            bytes: png(30, 20),
        })
        .collect();

    let err = pipeline
        .classify_images(&sources, &BatchOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, FormsError::Cancelled { unit: "page" }), "{err}");
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
    assert_eq!(chat.calls(), 0);
}

#[tokio::test]
async fn images_map_to_pages_in_input_order() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("p1.png");
    let third = dir.path().join("p3.png");
    std::fs::write(&first, png(40, 30)).unwrap();
    std::fs::write(&third, png(40, 30)).unwrap();
    let sources = vec![
        ImageSource::parse(&first.to_string_lossy()),
        ImageSource::parse(&dir.path().join("missing.png").to_string_lossy()),
        ImageSource::parse(&third.to_string_lossy()),
    ];

    let chat = StubChat::new(field_per_page);
    let pipeline = FormsPipeline::new(FormsConfig::default(), chat).with_ocr(Arc::new(StaticOcr));
    let out = pipeline
        .classify_images(&sources, &BatchOptions::default())
        .await
        .unwrap();

    let pages: Vec<_> = out.fields.iter().map(|f| f.page_number).collect();
    assert_eq!(pages, vec![Some(1), Some(3)]);
    assert!(matches!(
        &out.errors[..],
        [UnitError::ImageFetchFailed { index: 1, .. }]
    ));
}

#[tokio::test]
async fn tall_image_is_split_and_deduplicated() {
    init_tracing();
    let config = FormsConfig::builder()
        .split_max_height(4000)
        .split_overlap(200)
        .build()
        .unwrap();
    let chat = StubChat::new(|call, request| {
        assert!(
            request.messages[0].content.contains("overlap by 200px"),
            "section {call} prompt lacks overlap context"
        );
        Ok(format!(
            r#"[
                {{"label":"Signature","type":"signature","y":10}},
                {{"label":"Question {call}","type":"text","y":20}}
            ]"#
        ))
    });
    let pipeline = FormsPipeline::new(config, chat.clone());

    let out = pipeline.split_and_classify_image(&png(60, 9000)).await.unwrap();

    assert!(out.was_split);
    assert_eq!(out.num_sections, 3);
    assert_eq!(chat.calls(), 3);
    assert_eq!(out.duplicates_removed, 2);
    let labels: Vec<_> = out.fields.iter().map(|f| f.label.as_str()).collect();
    assert_eq!(labels.iter().filter(|l| **l == "Signature").count(), 1);
    for n in 1..=3 {
        assert!(labels.contains(&format!("Question {n}").as_str()), "{labels:?}");
    }
    assert!(out.fields.iter().all(|f| f.page_number == Some(1)));
    assert!(out.errors.is_empty());
}

#[tokio::test]
async fn small_image_is_one_section() {
    let chat = StubChat::new(|_, _| Ok(r#"[{"label":"Phone","type":"tel"}]"#.to_string()));
    let pipeline = FormsPipeline::new(FormsConfig::default(), chat);

    let out = pipeline.split_and_classify_image(&png(80, 120)).await.unwrap();
    assert!(!out.was_split);
    assert_eq!(out.num_sections, 1);
    assert_eq!(out.fields[0].field_type(), FieldType::Tel);
    assert_eq!(out.duplicates_removed, 0);
}

// ── DOM path ─────────────────────────────────────────────────────────────────

#[test]
fn html_form_with_other_option() {
    let html = r#"
        <form>
          <fieldset>
            <legend>How did you hear about us? *</legend>
            <label><input type="checkbox" name="src" value="web"> Website</label>
            <label><input type="checkbox" name="src" value="friend"> A friend</label>
            <label><input type="checkbox" name="src" value="other"> Other</label>
            <input type="text" name="src_other" placeholder="Tell us more">
          </fieldset>
          <label for="notes">Notes</label>
          <textarea id="notes"></textarea>
        </form>"#;

    let fields = classify_from_html(html);
    assert_eq!(fields.len(), 2, "{fields:#?}");

    let source = &fields[0];
    assert_eq!(source.field_type(), FieldType::CheckboxWithOther);
    assert_eq!(source.label, "How did you hear about us?");
    assert_eq!(source.options(), ["Website", "A friend"]);
    assert_eq!(
        source.other().and_then(|o| o.placeholder.as_deref()),
        Some("Tell us more")
    );

    assert_eq!(fields[1].field_type(), FieldType::Textarea);
    assert_eq!(fields[1].label, "Notes");
    assert_eq!(fields[1].id.as_deref(), Some("notes"));
}

#[test]
fn html_output_serialises_to_wire_shape() {
    let fields = classify_from_html(r#"<label for="d">Date of birth</label><input id="d" type="date">"#);
    let json = serde_json::to_value(&fields).unwrap();
    assert_eq!(json[0]["type"], "date");
    assert_eq!(json[0]["label"], "Date of birth");
    assert_eq!(json[0]["pageNumber"], 1);
}

struct StaticPage(&'static str);

#[async_trait]
impl BrowserPage for StaticPage {
    async fn goto(&self, _url: &str) -> Result<(), FormsError> {
        Ok(())
    }

    async fn html(&self) -> Result<String, FormsError> {
        Ok(self.0.to_string())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, FormsError> {
        Ok(Vec::new())
    }
}

#[test]
fn url_path_rates_and_signs() {
    let page = StaticPage(
        r#"<form>
             <p>Rate our service</p>
             <div><button>★</button><button>★</button><button>★</button><button>★</button><button>★</button></div>
             <div class="signature-pad"><canvas></canvas></div>
           </form>"#,
    );
    let fields = tokio_test::block_on(classify_from_url(
        &page,
        "https://forms.example.com/feedback",
        &FormsConfig::default(),
    ))
    .unwrap();

    assert_eq!(fields.len(), 2, "{fields:#?}");
    assert_eq!(fields[0].field_type(), FieldType::Rating);
    assert_eq!(fields[0].label, "Rate our service");
    assert_eq!(fields[0].options(), ["1", "2", "3", "4", "5"]);
    assert_eq!(fields[1].field_type(), FieldType::Signature);
}

// ── Live smoke test ──────────────────────────────────────────────────────────

#[tokio::test]
async fn live_classification_smoke() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP: set E2E_ENABLED=1 to run live tests");
        return;
    }
    let config = FormsConfig::from_env().unwrap();
    let pipeline = FormsPipeline::from_config(config).unwrap();
    let pages = vec![ocr_page(
        1,
        "CONTACT FORM\nFull name: ____________\nEmail address: ____________\n\
         Preferred contact: [ ] Phone [ ] Email [ ] Other: ______",
    )];
    let out = pipeline
        .classify_pages_from_ocr(&pages, &BatchOptions::default())
        .await
        .unwrap();
    println!("{}", serde_json::to_string_pretty(&out.fields).unwrap());
    assert!(!out.fields.is_empty());
}
