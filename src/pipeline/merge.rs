//! Merge & dedup: combine per-batch or per-section field lists.
//!
//! Merging only filters and reorders. Field contents are never edited, so
//! every returned field is exactly what some classifier call produced.
//!
//! * [`batch_merge`]: multi-page OCR path: validate page numbers, then order
//!   by page (and by `y` inside a page when every field there has one).
//! * [`section_merge`]: tall-image path: concatenate in section order and
//!   drop fields already seen in an earlier, overlapping section.

use crate::field::{FieldCandidate, FieldType};
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, warn};

/// Drop fields that violate the page-range or display-content invariants.
///
/// Kept fields stay in their input order. Applying this twice gives the
/// same list as applying it once.
pub fn validate(fields: Vec<FieldCandidate>, total_pages: u32) -> Vec<FieldCandidate> {
    let before = fields.len();
    let kept: Vec<_> = fields
        .into_iter()
        .filter(|f| match f.page_number {
            Some(p) if (1..=total_pages).contains(&p) => {
                if f.rich_text_content().is_some_and(|c| c.trim().is_empty()) {
                    warn!("Dropping label field on page {} with empty rich text", p);
                    false
                } else {
                    true
                }
            }
            Some(p) => {
                warn!(
                    "Dropping '{}' ({}): page {} outside 1..={}",
                    f.label,
                    f.field_type(),
                    p,
                    total_pages
                );
                false
            }
            None => {
                warn!("Dropping '{}' ({}): no page number", f.label, f.field_type());
                false
            }
        })
        .collect();
    if kept.len() != before {
        debug!("Validation kept {}/{} fields", kept.len(), before);
    }
    kept
}

/// Stable page order; inside a page, `y` order when every field has `y`.
pub fn order_fields(mut fields: Vec<FieldCandidate>) -> Vec<FieldCandidate> {
    fields.sort_by_key(|f| f.page_number.unwrap_or(u32::MAX));

    let mut start = 0;
    while start < fields.len() {
        let page = fields[start].page_number;
        let end = fields[start..]
            .iter()
            .position(|f| f.page_number != page)
            .map_or(fields.len(), |off| start + off);
        let group = &mut fields[start..end];
        if group.iter().all(|f| f.y.is_some()) {
            group.sort_by(|a, b| {
                a.y.partial_cmp(&b.y).unwrap_or(Ordering::Equal)
            });
        }
        start = end;
    }
    fields
}

/// Flatten batch results, validate against `total_pages`, then order.
pub fn batch_merge(results: Vec<Vec<FieldCandidate>>, total_pages: u32) -> Vec<FieldCandidate> {
    let flat: Vec<_> = results.into_iter().flatten().collect();
    order_fields(validate(flat, total_pages))
}

// ── Section merge ────────────────────────────────────────────────────────

static RE_NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\p{L}\p{N}]+").unwrap());
static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

/// Lowercase, punctuation-free, single-spaced label for comparisons.
pub fn normalize_label(label: &str) -> String {
    RE_NON_WORD
        .replace_all(&label.to_lowercase(), " ")
        .trim()
        .to_string()
}

/// Comparison text: the label, or the visible text of a display label.
fn identity_text(field: &FieldCandidate) -> String {
    match field.rich_text_content() {
        Some(html) => normalize_label(&RE_TAGS.replace_all(html, " ")),
        None => normalize_label(&field.label),
    }
}

/// The three dedup keys, strictest first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum DedupKey {
    Exact {
        label: String,
        field_type: FieldType,
        required: bool,
        options: Vec<String>,
    },
    IgnoringRequired {
        label: String,
        field_type: FieldType,
        options: Vec<String>,
    },
    OptionSet {
        label: String,
        field_type: FieldType,
        options: BTreeSet<String>,
    },
}

fn dedup_keys(field: &FieldCandidate) -> Vec<DedupKey> {
    let label = identity_text(field);
    let field_type = field.field_type();
    let mut sorted: Vec<String> = field.options().to_vec();
    sorted.sort();

    let mut keys = vec![
        DedupKey::Exact {
            label: label.clone(),
            field_type,
            required: field.required,
            options: sorted.clone(),
        },
        DedupKey::IgnoringRequired {
            label: label.clone(),
            field_type,
            options: sorted,
        },
    ];
    let set: BTreeSet<String> = field
        .options()
        .iter()
        .map(|o| o.trim().to_lowercase())
        .filter(|o| !o.is_empty())
        .collect();
    if !set.is_empty() {
        keys.push(DedupKey::OptionSet {
            label,
            field_type,
            options: set,
        });
    }
    keys
}

/// Output of [`section_merge`].
#[derive(Debug, Clone, PartialEq)]
pub struct SectionMerge {
    pub fields: Vec<FieldCandidate>,
    pub duplicates_removed: usize,
}

/// Concatenate per-section fields in section order, first occurrence wins.
///
/// A field is dropped when any of its keys was produced by an earlier field:
/// (a) label + type + required + sorted options, (b) the same without
/// required, (c) label + type + case-insensitive option set, only for fields
/// that have options. Distinct option sets therefore never collapse.
pub fn section_merge(sections: Vec<Vec<FieldCandidate>>) -> SectionMerge {
    let mut seen: HashSet<DedupKey> = HashSet::new();
    let mut fields = Vec::new();
    let mut duplicates_removed = 0;

    for (section, section_fields) in sections.into_iter().enumerate() {
        for field in section_fields {
            let keys = dedup_keys(&field);
            if let Some(hit) = keys.iter().find(|k| seen.contains(*k)) {
                let tier = match hit {
                    DedupKey::Exact { .. } => "a",
                    DedupKey::IgnoringRequired { .. } => "b",
                    DedupKey::OptionSet { .. } => "c",
                };
                warn!(
                    "Section {}: dropping duplicate '{}' ({}) [key {}]",
                    section + 1,
                    identity_text(&field),
                    field.field_type(),
                    tier
                );
                duplicates_removed += 1;
                continue;
            }
            seen.extend(keys);
            fields.push(field);
        }
    }

    SectionMerge {
        fields,
        duplicates_removed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{ChoiceStyle, InputKind};

    fn text(label: &str, page: u32) -> FieldCandidate {
        FieldCandidate::input(label, InputKind::Text).on_page(page)
    }

    fn radio(label: &str, options: &[&str]) -> FieldCandidate {
        FieldCandidate::choice(
            label,
            ChoiceStyle::Radio,
            options.iter().map(|o| o.to_string()).collect(),
        )
    }

    fn labels(fields: &[FieldCandidate]) -> Vec<&str> {
        fields.iter().map(|f| f.label.as_str()).collect()
    }

    #[test]
    fn page_range_filtering() {
        let merged = batch_merge(
            vec![vec![text("first", 1), text("last", 3), text("beyond", 4)]],
            3,
        );
        assert_eq!(labels(&merged), vec!["first", "last"]);
    }

    #[test]
    fn missing_page_is_dropped() {
        let merged = batch_merge(vec![vec![FieldCandidate::input("x", InputKind::Text)]], 2);
        assert!(merged.is_empty());
    }

    #[test]
    fn stable_page_order_keeps_within_page_order() {
        let merged = batch_merge(
            vec![
                vec![text("p2-a", 2), text("p1-a", 1)],
                vec![text("p2-b", 2), text("p1-b", 1)],
            ],
            2,
        );
        assert_eq!(labels(&merged), vec!["p1-a", "p1-b", "p2-a", "p2-b"]);
    }

    #[test]
    fn y_order_applies_only_when_whole_page_has_y() {
        let merged = batch_merge(
            vec![vec![
                text("low", 1).at_y(500.0),
                text("high", 1).at_y(100.0),
                text("b", 2).at_y(300.0),
                text("a", 2),
            ]],
            2,
        );
        assert_eq!(labels(&merged), vec!["high", "low", "b", "a"]);
    }

    #[test]
    fn validation_is_idempotent() {
        let input = vec![
            text("a", 1),
            text("b", 9),
            FieldCandidate::display("<p>Intro</p>").on_page(1),
            text("c", 2).at_y(10.0),
        ];
        let once = batch_merge(vec![input], 2);
        let twice = batch_merge(vec![once.clone()], 2);
        assert_eq!(once, twice);
        assert_eq!(validate(once.clone(), 2), once);
    }

    #[test]
    fn identical_fields_across_sections_collapse() {
        let out = section_merge(vec![
            vec![text("Full name:", 1), radio("Gender", &["M", "F"])],
            vec![radio("gender", &["F", "M"]), text("Signature", 1)],
        ]);
        assert_eq!(labels(&out.fields), vec!["Full name:", "Gender", "Signature"]);
        assert_eq!(out.duplicates_removed, 1);
    }

    #[test]
    fn required_flag_difference_still_dedupes() {
        let out = section_merge(vec![
            vec![text("Email", 1).with_required(true)],
            vec![text("Email", 1)],
        ]);
        assert_eq!(out.fields.len(), 1);
        assert!(out.fields[0].required);
    }

    #[test]
    fn option_case_differences_dedupe_via_option_set() {
        let out = section_merge(vec![
            vec![radio("Smoker", &["Yes", "No"])],
            vec![radio("Smoker", &["yes", "no", "NO"])],
        ]);
        assert_eq!(out.fields.len(), 1);
    }

    #[test]
    fn different_option_sets_are_kept() {
        let out = section_merge(vec![
            vec![radio("Phone", &["Mother", "Guardian"])],
            vec![radio("Phone", &["Father", "Guardian"])],
        ]);
        assert_eq!(out.fields.len(), 2);
        assert_eq!(out.duplicates_removed, 0);
    }

    #[test]
    fn display_labels_compare_by_visible_text() {
        let out = section_merge(vec![
            vec![FieldCandidate::display("<h2>Section A</h2>")],
            vec![
                FieldCandidate::display("<h2>Section  A</h2>"),
                FieldCandidate::display("<h2>Section B</h2>"),
            ],
        ]);
        assert_eq!(out.fields.len(), 2);
    }

    #[test]
    fn normalize_label_strips_punctuation() {
        assert_eq!(normalize_label("  Full Name: *"), "full name");
        assert_eq!(normalize_label("E-mail"), "e mail");
    }
}
