//! Core data model: OCR text blocks and classified form fields.
//!
//! A [`FieldCandidate`] is the unit returned to callers. Internally its
//! type-specific payload is a [`FieldKind`] so that, for example, only
//! choice fields can carry options and only display labels can carry rich
//! text. On the wire it is a single flat camelCase object (see
//! [`FieldRecord`]), which is also the shape the classifier is asked to emit.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Confidence assigned to classifier output that omits a confidence score.
pub const DEFAULT_CONFIDENCE: f32 = 0.8;

// ── OCR input ────────────────────────────────────────────────────────────

/// Axis-aligned bounding box in source-image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// One OCR-detected text region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextBlock {
    pub text: String,
    pub bounding_box: BoundingBox,
    /// 1-based page the block was detected on.
    pub page_number: u32,
}

impl TextBlock {
    pub fn new(text: impl Into<String>, bounding_box: BoundingBox, page_number: u32) -> Self {
        Self {
            text: text.into(),
            bounding_box,
            page_number,
        }
    }
}

/// One OCR'd page: full text plus its spatial blocks.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OcrPage {
    /// 1-based page number.
    pub page: u32,
    pub text: String,
    #[serde(default)]
    pub blocks: Vec<TextBlock>,
}

// ── Field vocabulary ─────────────────────────────────────────────────────

/// The fixed field-type vocabulary, as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldType {
    Text,
    Email,
    Tel,
    Number,
    Textarea,
    Select,
    Date,
    Time,
    Url,
    Radio,
    Checkbox,
    RadioWithOther,
    CheckboxWithOther,
    Rating,
    File,
    Signature,
    Payment,
    Label,
}

impl FieldType {
    pub const ALL: [FieldType; 18] = [
        FieldType::Text,
        FieldType::Email,
        FieldType::Tel,
        FieldType::Number,
        FieldType::Textarea,
        FieldType::Select,
        FieldType::Date,
        FieldType::Time,
        FieldType::Url,
        FieldType::Radio,
        FieldType::Checkbox,
        FieldType::RadioWithOther,
        FieldType::CheckboxWithOther,
        FieldType::Rating,
        FieldType::File,
        FieldType::Signature,
        FieldType::Payment,
        FieldType::Label,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Email => "email",
            FieldType::Tel => "tel",
            FieldType::Number => "number",
            FieldType::Textarea => "textarea",
            FieldType::Select => "select",
            FieldType::Date => "date",
            FieldType::Time => "time",
            FieldType::Url => "url",
            FieldType::Radio => "radio",
            FieldType::Checkbox => "checkbox",
            FieldType::RadioWithOther => "radio-with-other",
            FieldType::CheckboxWithOther => "checkbox-with-other",
            FieldType::Rating => "rating",
            FieldType::File => "file",
            FieldType::Signature => "signature",
            FieldType::Payment => "payment",
            FieldType::Label => "label",
        }
    }

    /// Exact (case-insensitive) lookup of a wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single-value input widgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputKind {
    Text,
    Email,
    Tel,
    Number,
    Textarea,
    Date,
    Time,
    Url,
    File,
    Signature,
    Payment,
}

/// How a multi-choice field is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChoiceStyle {
    Select,
    Radio,
    Checkbox,
}

/// The free-text escape of a choice field ("Other: ____").
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OtherOption {
    pub label: Option<String>,
    pub placeholder: Option<String>,
}

/// Payload of a select / radio / checkbox field.
#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceField {
    pub style: ChoiceStyle,
    /// Ordered as presented on the form. Never contains the "Other" option.
    pub options: Vec<String>,
    pub other: Option<OtherOption>,
}

/// Type-specific payload of a [`FieldCandidate`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Input(InputKind),
    Choice(ChoiceField),
    /// A rating scale; `options` are the scale points in order.
    Rating { options: Vec<String> },
    /// Display-only content (titles, instructions, disclaimers).
    Label { rich_text_content: String },
}

// ── FieldCandidate ───────────────────────────────────────────────────────

/// One extracted form field.
///
/// Fields are never mutated after classification; the merge engine only
/// filters and reorders them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FieldRecord", into = "FieldRecord")]
pub struct FieldCandidate {
    /// Stable identifier when the source provides one (DOM id/name).
    pub id: Option<String>,
    /// Question text. Always empty for [`FieldKind::Label`].
    pub label: String,
    pub required: bool,
    pub placeholder: Option<String>,
    /// Classifier confidence in `[0.0, 1.0]`.
    pub confidence: f32,
    /// 1-based page the field was found on.
    pub page_number: Option<u32>,
    /// Vertical position on the page in pixels, when the classifier reports it.
    pub y: Option<f32>,
    pub kind: FieldKind,
}

impl FieldCandidate {
    pub fn new(label: impl Into<String>, kind: FieldKind) -> Self {
        let label = match kind {
            FieldKind::Label { .. } => String::new(),
            _ => label.into(),
        };
        Self {
            id: None,
            label,
            required: false,
            placeholder: None,
            confidence: 1.0,
            page_number: None,
            y: None,
            kind,
        }
    }

    pub fn input(label: impl Into<String>, kind: InputKind) -> Self {
        Self::new(label, FieldKind::Input(kind))
    }

    pub fn choice(label: impl Into<String>, style: ChoiceStyle, options: Vec<String>) -> Self {
        Self::new(
            label,
            FieldKind::Choice(ChoiceField {
                style,
                options,
                other: None,
            }),
        )
    }

    pub fn display(rich_text_content: impl Into<String>) -> Self {
        Self::new(
            "",
            FieldKind::Label {
                rich_text_content: rich_text_content.into(),
            },
        )
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = Some(placeholder.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn on_page(mut self, page: u32) -> Self {
        self.page_number = Some(page);
        self
    }

    pub fn at_y(mut self, y: f32) -> Self {
        self.y = Some(y);
        self
    }

    /// The wire type of this field.
    pub fn field_type(&self) -> FieldType {
        match &self.kind {
            FieldKind::Input(kind) => match kind {
                InputKind::Text => FieldType::Text,
                InputKind::Email => FieldType::Email,
                InputKind::Tel => FieldType::Tel,
                InputKind::Number => FieldType::Number,
                InputKind::Textarea => FieldType::Textarea,
                InputKind::Date => FieldType::Date,
                InputKind::Time => FieldType::Time,
                InputKind::Url => FieldType::Url,
                InputKind::File => FieldType::File,
                InputKind::Signature => FieldType::Signature,
                InputKind::Payment => FieldType::Payment,
            },
            FieldKind::Choice(choice) => match (choice.style, choice.other.is_some()) {
                (ChoiceStyle::Select, _) => FieldType::Select,
                (ChoiceStyle::Radio, false) => FieldType::Radio,
                (ChoiceStyle::Radio, true) => FieldType::RadioWithOther,
                (ChoiceStyle::Checkbox, false) => FieldType::Checkbox,
                (ChoiceStyle::Checkbox, true) => FieldType::CheckboxWithOther,
            },
            FieldKind::Rating { .. } => FieldType::Rating,
            FieldKind::Label { .. } => FieldType::Label,
        }
    }

    pub fn is_label(&self) -> bool {
        matches!(self.kind, FieldKind::Label { .. })
    }

    /// Options of choice and rating fields; empty for everything else.
    pub fn options(&self) -> &[String] {
        match &self.kind {
            FieldKind::Choice(choice) => &choice.options,
            FieldKind::Rating { options } => options,
            _ => &[],
        }
    }

    pub fn other(&self) -> Option<&OtherOption> {
        match &self.kind {
            FieldKind::Choice(choice) => choice.other.as_ref(),
            _ => None,
        }
    }

    pub fn allow_other(&self) -> bool {
        self.other().is_some()
    }

    pub fn rich_text_content(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Label { rich_text_content } => Some(rich_text_content),
            _ => None,
        }
    }
}

// ── Wire format ──────────────────────────────────────────────────────────

/// Flat, loosely-typed field object as exchanged with callers and the LLM.
///
/// Every key other than `label` is optional. Converting into a
/// [`FieldCandidate`] enforces the structural invariants.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<FieldType>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_other: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rich_text_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f32>,
}

/// Why a [`FieldRecord`] could not become a [`FieldCandidate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FieldRejection {
    #[error("field has no type")]
    MissingType,
    #[error("label field has no richTextContent")]
    EmptyRichText,
}

impl TryFrom<FieldRecord> for FieldCandidate {
    type Error = FieldRejection;

    fn try_from(record: FieldRecord) -> Result<Self, Self::Error> {
        let field_type = record.field_type.ok_or(FieldRejection::MissingType)?;
        let other = || {
            Some(OtherOption {
                label: record.other_label.clone(),
                placeholder: record.other_placeholder.clone(),
            })
        };
        let allow_other = record.allow_other.unwrap_or(false);
        let choice = |style: ChoiceStyle, with_other: bool| {
            FieldKind::Choice(ChoiceField {
                style,
                options: record.options.clone(),
                other: if with_other { other() } else { None },
            })
        };

        let kind = match field_type {
            FieldType::Text => FieldKind::Input(InputKind::Text),
            FieldType::Email => FieldKind::Input(InputKind::Email),
            FieldType::Tel => FieldKind::Input(InputKind::Tel),
            FieldType::Number => FieldKind::Input(InputKind::Number),
            FieldType::Textarea => FieldKind::Input(InputKind::Textarea),
            FieldType::Date => FieldKind::Input(InputKind::Date),
            FieldType::Time => FieldKind::Input(InputKind::Time),
            FieldType::Url => FieldKind::Input(InputKind::Url),
            FieldType::File => FieldKind::Input(InputKind::File),
            FieldType::Signature => FieldKind::Input(InputKind::Signature),
            FieldType::Payment => FieldKind::Input(InputKind::Payment),
            FieldType::Select => choice(ChoiceStyle::Select, allow_other),
            FieldType::Radio => choice(ChoiceStyle::Radio, allow_other),
            FieldType::Checkbox => choice(ChoiceStyle::Checkbox, allow_other),
            FieldType::RadioWithOther => choice(ChoiceStyle::Radio, true),
            FieldType::CheckboxWithOther => choice(ChoiceStyle::Checkbox, true),
            FieldType::Rating => FieldKind::Rating {
                options: record.options.clone(),
            },
            FieldType::Label => {
                let content = record.rich_text_content.clone().unwrap_or_default();
                if content.trim().is_empty() {
                    return Err(FieldRejection::EmptyRichText);
                }
                FieldKind::Label {
                    rich_text_content: content,
                }
            }
        };

        Ok(FieldCandidate {
            id: record.id,
            label: if matches!(kind, FieldKind::Label { .. }) {
                String::new()
            } else {
                record.label
            },
            required: record.required,
            placeholder: record.placeholder,
            confidence: record
                .confidence
                .unwrap_or(DEFAULT_CONFIDENCE)
                .clamp(0.0, 1.0),
            page_number: record.page_number,
            y: record.y,
            kind,
        })
    }
}

impl From<FieldCandidate> for FieldRecord {
    fn from(field: FieldCandidate) -> Self {
        let field_type = field.field_type();
        let mut record = FieldRecord {
            id: field.id,
            label: field.label,
            field_type: Some(field_type),
            required: field.required,
            placeholder: field.placeholder,
            confidence: Some(field.confidence),
            page_number: field.page_number,
            y: field.y,
            ..Default::default()
        };
        match field.kind {
            FieldKind::Input(_) => {}
            FieldKind::Choice(choice) => {
                record.options = choice.options;
                if let Some(other) = choice.other {
                    record.allow_other = Some(true);
                    record.other_label = other.label;
                    record.other_placeholder = other.placeholder;
                }
            }
            FieldKind::Rating { options } => record.options = options,
            FieldKind::Label { rich_text_content } => {
                record.rich_text_content = Some(rich_text_content)
            }
        }
        record
    }
}
