//! Post-processing: lenient conversion of classifier JSON into typed fields.
//!
//! The classifier is asked for the exact wire shape, but models drift: type
//! names come back as "dropdown" or "phone", numbers arrive as strings,
//! "Other" is listed as an ordinary option, rich text carries `<div style>`.
//! This module normalises one raw JSON value at a time with small,
//! independent rules, then hands the result to the strict
//! `FieldRecord → FieldCandidate` conversion. Records that still violate the
//! field invariants are dropped with a warning.
//!
//! Rules (applied in order):
//! 1. Resolve type aliases onto the fixed vocabulary
//! 2. Coerce scalars (booleans, numbers, page numbers) from strings
//! 3. Trim and de-duplicate options, preserving order
//! 4. Move an "Other" option into `allowOther` / `otherPlaceholder`
//! 5. Promote numeric or "rating" choice fields to `rating` (best effort)
//! 6. Restrict rich text to display tags
//! 7. Clean labels (trailing colon, required asterisk)

use crate::field::{FieldCandidate, FieldRecord, FieldType};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Placeholder used when an "Other" option has no hint of its own.
pub const DEFAULT_OTHER_PLACEHOLDER: &str = "Please specify";

/// Extract the field array from a classifier response.
///
/// Accepts a bare array or an object with a `fields` array. Returns `None`
/// for any other shape so the caller can treat it as a parse failure.
pub fn fields_from_value(value: &Value) -> Option<Vec<FieldCandidate>> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(obj) => obj.get("fields")?.as_array()?,
        _ => return None,
    };

    let mut fields = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let Some(obj) = item.as_object() else {
            warn!("Dropping field #{}: not an object", i + 1);
            continue;
        };
        let record = normalise_record(obj);
        match FieldCandidate::try_from(record) {
            Ok(field) => fields.push(field),
            Err(reason) => warn!(
                "Dropping field #{} ({:?}): {}",
                i + 1,
                obj.get("label").and_then(serde_json::Value::as_str).unwrap_or(""),
                reason
            ),
        }
    }
    Some(fields)
}

/// Apply rules 1–7 to one raw object.
pub fn normalise_record(obj: &Map<String, Value>) -> FieldRecord {
    let str_field = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| obj.get(*k).and_then(as_text))
            .filter(|s| !s.is_empty())
    };

    let mut record = FieldRecord {
        id: str_field(&["id", "name"]),
        label: str_field(&["label", "question"]).unwrap_or_default(),
        field_type: str_field(&["type", "fieldType"]).and_then(|t| resolve_type(&t)),
        required: ["required", "isRequired"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(as_bool))
            .unwrap_or(false),
        placeholder: str_field(&["placeholder"]),
        options: obj.get("options").map(collect_options).unwrap_or_default(),
        allow_other: obj.get("allowOther").and_then(as_bool),
        other_label: str_field(&["otherLabel"]),
        other_placeholder: str_field(&["otherPlaceholder"]),
        rich_text_content: str_field(&["richTextContent", "content", "html"]),
        confidence: obj.get("confidence").and_then(as_f32),
        page_number: ["pageNumber", "page", "page_number"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(as_u32)),
        y: obj.get("y").and_then(as_f32),
    };

    extract_other_option(&mut record);
    apply_rating_heuristic(&mut record);
    if let Some(html) = record.rich_text_content.take() {
        let clean = sanitize_rich_text(&html);
        record.rich_text_content = Some(clean);
    }
    clean_label(&mut record);
    record
}

// ── Rule 1: Type aliases ─────────────────────────────────────────────────

/// Map a classifier type name onto the vocabulary, accepting common aliases.
pub fn resolve_type(raw: &str) -> Option<FieldType> {
    let key = raw.trim().to_ascii_lowercase().replace(['_', ' '], "-");
    if let Some(t) = FieldType::from_name(&key) {
        return Some(t);
    }
    let t = match key.as_str() {
        "string" | "short-text" | "input" | "name" | "shorttext" => FieldType::Text,
        "paragraph" | "long-text" | "multiline" | "text-area" | "longtext" => FieldType::Textarea,
        "phone" | "telephone" | "tel-number" | "phone-number" => FieldType::Tel,
        "mail" | "e-mail" | "email-address" => FieldType::Email,
        "integer" | "numeric" | "decimal" | "currency" => FieldType::Number,
        "dropdown" | "drop-down" | "select-one" | "combobox" | "list" => FieldType::Select,
        "radio-button" | "radio-group" | "single-choice" | "multiple-choice" => FieldType::Radio,
        "checkboxes" | "check-box" | "multi-select" | "multiselect" | "checkbox-group" => {
            FieldType::Checkbox
        }
        "radio-other" => FieldType::RadioWithOther,
        "checkbox-other" => FieldType::CheckboxWithOther,
        "scale" | "stars" | "star-rating" | "likert" | "nps" => FieldType::Rating,
        "upload" | "file-upload" | "attachment" => FieldType::File,
        "datetime" | "date-time" | "dob" | "birthdate" => FieldType::Date,
        "website" | "link" | "uri" => FieldType::Url,
        "heading" | "header" | "title" | "section" | "instructions" | "paragraph-text"
        | "static" | "display" | "html" => FieldType::Label,
        "esignature" | "e-signature" | "sign" => FieldType::Signature,
        "credit-card" | "card" => FieldType::Payment,
        _ => return None,
    };
    debug!("Type alias '{}' → {}", raw, t);
    Some(t)
}

// ── Rule 2: Scalar coercion ──────────────────────────────────────────────

fn as_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        _ => None,
    }
}

fn as_f32(v: &Value) -> Option<f32> {
    let f: Option<f32> = match v {
        Value::Number(n) => n.as_f64().map(|f| f as f32),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    f.filter(|f| f.is_finite())
}

fn as_u32(v: &Value) -> Option<u32> {
    match v {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ── Rule 3: Options ──────────────────────────────────────────────────────

fn collect_options(v: &Value) -> Vec<String> {
    let Some(items) = v.as_array() else {
        return Vec::new();
    };
    let raw = items.iter().filter_map(|item| match item {
        Value::Object(o) => ["label", "text", "value"]
            .iter()
            .find_map(|k| o.get(*k).and_then(as_text)),
        other => as_text(other),
    });
    dedupe_options(raw)
}

/// Trim, drop empties, drop case-insensitive repeats; first spelling wins.
pub fn dedupe_options(options: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    options
        .into_iter()
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty() && seen.insert(o.to_lowercase()))
        .collect()
}

// ── Rule 4: "Other" option ───────────────────────────────────────────────

/// `true` for "Other", "Others", "Other:" or "Other (please specify)", but
/// not for words that merely contain "other" ("Another", "Mother").
pub fn is_other_option(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    if lower == "others" {
        return true;
    }
    match lower.strip_prefix("other") {
        Some(rest) => !rest.starts_with(|c: char| c.is_alphabetic()),
        None => false,
    }
}

fn extract_other_option(record: &mut FieldRecord) {
    let is_choice = matches!(
        record.field_type,
        Some(
            FieldType::Radio
                | FieldType::Checkbox
                | FieldType::Select
                | FieldType::RadioWithOther
                | FieldType::CheckboxWithOther
        )
    );
    if !is_choice {
        return;
    }

    if let Some(pos) = record.options.iter().position(|o| is_other_option(o)) {
        let other = record.options.remove(pos);
        record.options.retain(|o| !is_other_option(o));
        record.allow_other = Some(true);
        if record.other_label.is_none() {
            record.other_label = Some(other);
        }
    }

    let with_other = record.allow_other == Some(true)
        || matches!(
            record.field_type,
            Some(FieldType::RadioWithOther | FieldType::CheckboxWithOther)
        );
    if with_other && record.other_placeholder.is_none() {
        record.other_placeholder = Some(DEFAULT_OTHER_PLACEHOLDER.to_string());
    }
}

// ── Rule 5: Rating heuristic ─────────────────────────────────────────────

/// Best-effort: a select/radio whose options are all numbers, or whose
/// label mentions "rating", is treated as a rating scale. Short numeric
/// ranges that are not ratings ("1", "2", "3" children) are misread.
fn apply_rating_heuristic(record: &mut FieldRecord) {
    if !matches!(record.field_type, Some(FieldType::Select | FieldType::Radio))
        || record.allow_other == Some(true)
    {
        return;
    }
    let numeric = record.options.len() >= 2
        && record
            .options
            .iter()
            .all(|o| o.trim().parse::<f64>().is_ok());
    let named = record.label.to_lowercase().contains("rating");
    if numeric || named {
        debug!("Treating '{}' as a rating scale", record.label);
        record.field_type = Some(FieldType::Rating);
    }
}

// ── Rule 6: Rich text allow-list ─────────────────────────────────────────

const ALLOWED_TAGS: [&str; 13] = [
    "h1", "h2", "h3", "h4", "p", "strong", "b", "em", "i", "u", "ul", "ol", "li",
];

static RE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(/?)([a-zA-Z][a-zA-Z0-9]*)\b[^>]*?(/?)>").unwrap());

/// Keep allow-listed tags (attributes stripped) and `<br>`; drop all others
/// but keep their text.
pub fn sanitize_rich_text(html: &str) -> String {
    RE_TAG
        .replace_all(html, |caps: &regex::Captures<'_>| {
            let closing = &caps[1];
            let name = caps[2].to_ascii_lowercase();
            if name == "br" {
                "<br>".to_string()
            } else if ALLOWED_TAGS.contains(&name.as_str()) {
                format!("<{closing}{name}>")
            } else {
                String::new()
            }
        })
        .trim()
        .to_string()
}

// ── Rule 7: Labels ───────────────────────────────────────────────────────

fn clean_label(record: &mut FieldRecord) {
    let mut label = record.label.trim().to_string();
    if label.ends_with('*') {
        record.required = true;
        label = label.trim_end_matches('*').trim_end().to_string();
    }
    if label.ends_with(':') {
        label.pop();
        label = label.trim_end().to_string();
    }
    record.label = label;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn one(value: Value) -> FieldCandidate {
        let mut fields = fields_from_value(&json!([value])).unwrap();
        assert_eq!(fields.len(), 1);
        fields.remove(0)
    }

    #[test]
    fn accepts_array_or_fields_object() {
        let f = json!({"label": "Name", "type": "text"});
        assert_eq!(fields_from_value(&json!([f.clone()])).unwrap().len(), 1);
        assert_eq!(fields_from_value(&json!({"fields": [f]})).unwrap().len(), 1);
        assert!(fields_from_value(&json!({"items": []})).is_none());
        assert!(fields_from_value(&json!("nope")).is_none());
    }

    #[test]
    fn aliases_and_coercion() {
        let f = one(json!({
            "label": "Phone number:",
            "type": "Phone",
            "required": "yes",
            "pageNumber": "2",
            "confidence": "0.65"
        }));
        assert_eq!(f.field_type(), FieldType::Tel);
        assert_eq!(f.label, "Phone number");
        assert!(f.required);
        assert_eq!(f.page_number, Some(2));
        assert!((f.confidence - 0.65).abs() < 1e-6);
    }

    #[test]
    fn other_option_becomes_allow_other() {
        let f = one(json!({
            "label": "Do you agree?",
            "type": "radio",
            "options": ["Yes", "No", "Other (please specify)"]
        }));
        assert_eq!(f.field_type(), FieldType::RadioWithOther);
        assert_eq!(f.options(), ["Yes", "No"]);
        let other = f.other().unwrap();
        assert_eq!(other.label.as_deref(), Some("Other (please specify)"));
        assert_eq!(other.placeholder.as_deref(), Some(DEFAULT_OTHER_PLACEHOLDER));
    }

    #[test]
    fn other_detection_ignores_substrings() {
        assert!(is_other_option("Other"));
        assert!(is_other_option("others"));
        assert!(is_other_option("Other:"));
        assert!(!is_other_option("Another"));
        assert!(!is_other_option("Mother"));
        assert!(!is_other_option("Otherwise"));
    }

    #[test]
    fn options_are_deduped_in_order() {
        let f = one(json!({
            "label": "Colour",
            "type": "checkbox",
            "options": [" Red", "Blue", "red", "", {"label": "Green"}]
        }));
        assert_eq!(f.options(), ["Red", "Blue", "Green"]);
    }

    #[test]
    fn numeric_radio_becomes_rating() {
        let f = one(json!({"label": "Satisfaction", "type": "radio", "options": ["1", "2", "3", "4", "5"]}));
        assert_eq!(f.field_type(), FieldType::Rating);
        let g = one(json!({"label": "Service rating", "type": "select", "options": ["Poor", "Good"]}));
        assert_eq!(g.field_type(), FieldType::Rating);
        let h = one(json!({"label": "Size", "type": "select", "options": ["S", "M"]}));
        assert_eq!(h.field_type(), FieldType::Select);
    }

    #[test]
    fn rich_text_is_allow_listed() {
        let f = one(json!({
            "type": "heading",
            "richTextContent": "<div class=\"x\"><h2 style=\"a\">Section A</h2><script>x</script><br/></div>"
        }));
        assert!(f.is_label());
        assert_eq!(f.rich_text_content(), Some("<h2>Section A</h2>x<br>"));
    }

    #[test]
    fn invalid_records_are_dropped() {
        let fields = fields_from_value(&json!([
            {"label": "No type"},
            {"label": "Bogus", "type": "hologram"},
            {"type": "label", "richTextContent": "<span></span>"},
            "not an object",
            {"label": "Email", "type": "email"}
        ]))
        .unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].label, "Email");
    }
}
