//! Widget detectors. Each pass claims the nodes it turns into a field so
//! later passes skip them.

use super::labels::{
    attribute_marks_required, clean_label, enclosing_label, for_attribute, humanize,
    label_marks_required, resolve_label, LabelHit,
};
use super::tree::{DomTree, NodeId};
use crate::field::{ChoiceField, ChoiceStyle, FieldCandidate, FieldKind, InputKind, OtherOption};
use crate::pipeline::postprocess::{dedupe_options, is_other_option, DEFAULT_OTHER_PLACEHOLDER};
use std::collections::HashSet;
use tracing::debug;

/// A field plus the node that fixes its place in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct DomField {
    pub position: NodeId,
    pub field: FieldCandidate,
}

const MIN_RATING_BUTTONS: usize = 3;
const MAX_RATING_BUTTONS: usize = 10;

const STAR_GLYPHS: &[char] = &[
    '★', '☆', '⭐', '✩', '✪', '✫', '✬', '✭', '✮', '✯', '♥', '♡', '❤',
];

const NON_FIELD_INPUTS: &[&str] = &["hidden", "submit", "button", "reset", "image"];

fn is_emoji(c: char) -> bool {
    matches!(c as u32, 0x1F300..=0x1FAFF | 0x2600..=0x27BF)
}

/// Visible text made only of star or emoji glyphs.
pub fn is_glyph_text(text: &str) -> bool {
    let mut glyphs = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{FE0F}')
        .peekable();
    glyphs.peek().is_some() && glyphs.all(|c| STAR_GLYPHS.contains(&c) || is_emoji(c))
}

fn is_button(tree: &DomTree, id: NodeId) -> bool {
    tree.is_tag(id, "button")
        || tree.attr(id, "role") == Some("button")
        || matches!(tree.input_type(id).as_deref(), Some("button"))
}

fn is_rating_button(tree: &DomTree, id: NodeId) -> bool {
    is_button(tree, id)
        && (is_glyph_text(&tree.text(id))
            || tree.class_or_id_contains(id, "star")
            || tree.attr(id, "value").is_some_and(is_glyph_text))
}

/// Nearest readable text before `start`, walking up at most three levels.
/// Elements holding controls or buttons are not labels.
fn preceding_text(tree: &DomTree, start: NodeId) -> Option<String> {
    let mut anchor = start;
    for _ in 0..3 {
        for sibling in tree.preceding_siblings(anchor) {
            let holds_input = tree.is_form_control(sibling)
                || is_button(tree, sibling)
                || tree
                    .descendants(sibling)
                    .any(|d| tree.is_form_control(d) || is_button(tree, d));
            if holds_input {
                return None;
            }
            let text = tree.visible_text(sibling);
            if !text.is_empty() {
                return Some(text);
            }
        }
        anchor = tree.parent(anchor)?;
    }
    None
}

fn aria_name(tree: &DomTree, id: NodeId) -> Option<String> {
    if let Some(label) = tree.attr(id, "aria-label").map(str::trim).filter(|v| !v.is_empty()) {
        return Some(label.to_string());
    }
    let target = tree.attr(id, "aria-labelledby")?;
    let text = target
        .split_whitespace()
        .filter_map(|t| tree.find_by_id(t))
        .map(|n| tree.visible_text(n))
        .collect::<Vec<_>>()
        .join(" ");
    (!text.is_empty()).then_some(text)
}

// ── 1. Rating widgets ───────────────────────────────────────────────────

/// Runs of 3–10 sibling glyph buttons become one rating field.
pub fn rating_widgets(tree: &DomTree, consumed: &mut HashSet<NodeId>) -> Vec<DomField> {
    let mut found = Vec::new();
    for container in tree.elements() {
        let buttons: Vec<NodeId> = tree
            .element_children(container)
            .into_iter()
            .filter(|&c| !consumed.contains(&c) && is_rating_button(tree, c))
            .collect();
        if !(MIN_RATING_BUTTONS..=MAX_RATING_BUTTONS).contains(&buttons.len()) {
            continue;
        }

        let options: Vec<String> = buttons
            .iter()
            .enumerate()
            .map(|(i, &b)| {
                tree.attr(b, "data-value")
                    .or_else(|| tree.attr(b, "value").filter(|v| !is_glyph_text(v)))
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| (i + 1).to_string())
            })
            .collect();

        let raw = aria_name(tree, container)
            .or_else(|| preceding_text(tree, container))
            .unwrap_or_else(|| "Rating".to_string());
        let label = clean_label(&raw);
        let required = raw.contains('*')
            || tree
                .attr(container, "aria-required")
                .is_some_and(|v| v.eq_ignore_ascii_case("true"));

        debug!("Rating widget '{}' with {} points", label, options.len());
        consumed.extend(buttons.iter().copied());
        let mut field = FieldCandidate::new(
            if label.is_empty() { "Rating".to_string() } else { label },
            FieldKind::Rating { options },
        )
        .with_required(required);
        if let Some(id) = tree.attr(container, "id") {
            field = field.with_id(id);
        }
        found.push(DomField {
            position: buttons[0],
            field,
        });
    }
    found
}

// ── 2. Radio / checkbox groups ───────────────────────────────────────────

fn option_text(tree: &DomTree, input: NodeId, ordinal: usize) -> String {
    if let Some(hit) = for_attribute(tree, input).or_else(|| enclosing_label(tree, input)) {
        return hit.text;
    }
    if let Some(text) = tree.next_text_sibling(input) {
        return text;
    }
    let next_label = tree
        .following_siblings(input)
        .into_iter()
        .take_while(|&s| !tree.contains_choice_input(s))
        .find(|&s| !tree.is_form_control(s))
        .map(|s| tree.visible_text(s))
        .filter(|t| !t.is_empty());
    next_label
        .or_else(|| tree.attr(input, "value").map(str::to_string).filter(|v| !v.is_empty()))
        .unwrap_or_else(|| format!("Option {ordinal}"))
}

fn is_free_text_input(tree: &DomTree, id: NodeId) -> bool {
    tree.is_tag(id, "textarea")
        || matches!(
            tree.input_type(id).as_deref(),
            Some("text" | "search" | "email" | "tel" | "url")
        )
}

/// The free-text box that goes with an "Other" option: the first text
/// input after it, before the next radio/checkbox and within its
/// grandparent's subtree.
fn other_text_input(tree: &DomTree, option: NodeId, consumed: &HashSet<NodeId>) -> Option<NodeId> {
    let scope_end = tree
        .ancestors(option)
        .nth(1)
        .map_or(tree.len(), |g| tree.descendants(g).end);
    (option + 1..scope_end)
        .take_while(|&id| !tree.is_choice_input(id))
        .find(|&id| is_free_text_input(tree, id) && !consumed.contains(&id))
}

fn is_option_label(tree: &DomTree, id: NodeId) -> bool {
    let bound_to_choice = tree
        .attr(id, "for")
        .and_then(|target| tree.find_by_id(target))
        .is_some_and(|target| tree.is_choice_input(target));
    bound_to_choice
        || std::iter::once(id)
            .chain(tree.ancestors(id))
            .any(|a| tree.is_tag(a, "label") && tree.contains_choice_input(a))
}

const QUESTION_TAGS: &[&str] = &[
    "label", "legend", "h1", "h2", "h3", "h4", "h5", "h6", "p", "span", "strong", "b", "th", "td",
    "dt",
];

/// The question text of a choice group: a fieldset legend, an ARIA group
/// name, or the nearest earlier label-like element that holds no
/// radio/checkbox. Scanning stops at any control outside the group.
fn group_label(tree: &DomTree, members: &[NodeId]) -> Option<String> {
    let first = *members.first()?;

    for ancestor in tree.ancestors(first) {
        if tree.is_tag(ancestor, "fieldset") {
            if let Some(legend) = tree
                .element_children(ancestor)
                .into_iter()
                .find(|&c| tree.is_tag(c, "legend"))
            {
                let text = tree.visible_text(legend);
                if !text.is_empty() {
                    return Some(text);
                }
            }
        }
        if matches!(tree.attr(ancestor, "role"), Some("radiogroup" | "group")) {
            if let Some(name) = aria_name(tree, ancestor) {
                return Some(name);
            }
        }
    }

    let ancestors: HashSet<NodeId> = tree.ancestors(first).collect();
    for id in (0..first).rev() {
        if tree.is_form_control(id) && !members.contains(&id) {
            return None;
        }
        let Some(tag) = tree.tag(id) else { continue };
        let label_like = QUESTION_TAGS.contains(&tag)
            || tree.class_or_id_contains(id, "question")
            || tree.class_or_id_contains(id, "label");
        if !label_like
            || ancestors.contains(&id)
            || tree.contains_choice_input(id)
            || is_option_label(tree, id)
        {
            continue;
        }
        let text = tree.visible_text(id);
        if !text.is_empty() {
            return Some(text);
        }
    }
    None
}

/// Group radio/checkbox inputs by `name`; one field per group.
pub fn choice_groups(tree: &DomTree, consumed: &mut HashSet<NodeId>) -> Vec<DomField> {
    let mut groups: Vec<(String, Vec<NodeId>)> = Vec::new();
    for id in tree.elements().filter(|&id| tree.is_choice_input(id) && !consumed.contains(&id)) {
        let key = tree
            .attr(id, "name")
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("#{id}"));
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(id),
            None => groups.push((key, vec![id])),
        }
    }

    let mut found = Vec::new();
    for (key, members) in groups {
        let style = match tree.input_type(members[0]).as_deref() {
            Some("radio") => ChoiceStyle::Radio,
            _ => ChoiceStyle::Checkbox,
        };

        let mut options = Vec::new();
        let mut other: Option<OtherOption> = None;
        for (i, &member) in members.iter().enumerate() {
            let text = option_text(tree, member, i + 1);
            if is_other_option(&text) {
                let input = other_text_input(tree, member, consumed);
                let placeholder = input
                    .and_then(|t| {
                        tree.attr(t, "placeholder")
                            .or_else(|| tree.attr(t, "aria-label"))
                            .map(str::trim)
                            .filter(|p| !p.is_empty())
                            .map(str::to_string)
                    })
                    .unwrap_or_else(|| DEFAULT_OTHER_PLACEHOLDER.to_string());
                if let Some(t) = input {
                    consumed.insert(t);
                }
                other.get_or_insert(OtherOption {
                    label: Some(text),
                    placeholder: Some(placeholder),
                });
            } else {
                options.push(text);
            }
        }
        let options = dedupe_options(options);

        let raw = group_label(tree, &members);
        let label = match &raw {
            Some(text) => clean_label(text),
            None if members.len() == 1 && !options.is_empty() => options[0].clone(),
            None if !key.starts_with('#') => humanize(&key),
            None => "Choose an option".to_string(),
        };
        let required = members.iter().any(|&m| attribute_marks_required(tree, m))
            || raw.as_deref().is_some_and(|t| t.contains('*'));

        debug!(
            "Choice group '{}': {} options{}",
            label,
            options.len(),
            if other.is_some() { " + other" } else { "" }
        );
        consumed.extend(members.iter().copied());

        let mut field = FieldCandidate::new(
            label,
            FieldKind::Choice(ChoiceField {
                style,
                options,
                other,
            }),
        )
        .with_required(required);
        if !key.starts_with('#') {
            field = field.with_id(key);
        }
        found.push(DomField {
            position: members[0],
            field,
        });
    }
    found
}

// ── 3. Signature / file-upload widgets ───────────────────────────────────

fn widget_kind(tree: &DomTree, id: NodeId) -> Option<InputKind> {
    if matches!(tree.tag(id), Some("html" | "body" | "form" | "main")) {
        return None;
    }
    let mut inner = tree.descendants(id);
    let holds_canvas = tree.is_tag(id, "canvas") || inner.clone().any(|d| tree.is_tag(d, "canvas"));
    let holds_control = inner.clone().any(|d| tree.is_form_control(d));
    let holds_other_fields = inner.any(|d| {
        tree.is_choice_input(d) || tree.is_tag(d, "select") || tree.is_tag(d, "textarea")
    });
    if holds_other_fields {
        return None;
    }

    if tree.class_or_id_contains(id, "signature") && (holds_canvas || holds_control) {
        return Some(InputKind::Signature);
    }
    let upload_container = ["upload", "dropzone", "file-drop"]
        .iter()
        .any(|n| tree.class_or_id_contains(id, n));
    let holds_file_input = tree
        .descendants(id)
        .any(|d| tree.input_type(d).as_deref() == Some("file"));
    if upload_container && holds_file_input {
        return Some(InputKind::File);
    }
    None
}

/// Signature pads and upload widgets become exactly one field each, however
/// many inputs they contain.
pub fn signature_and_file_widgets(tree: &DomTree, consumed: &mut HashSet<NodeId>) -> Vec<DomField> {
    let mut found = Vec::new();
    let mut claimed_until = 0;
    for id in tree.elements() {
        if id < claimed_until || consumed.contains(&id) {
            continue;
        }
        let Some(kind) = widget_kind(tree, id) else { continue };

        let controls: Vec<NodeId> = tree
            .descendants(id)
            .filter(|&d| tree.is_form_control(d))
            .collect();
        let hit = controls
            .first()
            .and_then(|&c| resolve_label(tree, c))
            .filter(|h| h.strategy != "attributes");
        let raw = hit
            .as_ref()
            .map(|h| h.text.clone())
            .or_else(|| aria_name(tree, id))
            .or_else(|| preceding_text(tree, id));
        let label = raw
            .as_deref()
            .map(clean_label)
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| match kind {
                InputKind::Signature => "Signature".to_string(),
                _ => "File upload".to_string(),
            });
        let required = controls.iter().any(|&c| attribute_marks_required(tree, c))
            || hit.as_ref().is_some_and(|h| label_marks_required(tree, h))
            || raw.as_deref().is_some_and(|t| t.contains('*'));

        debug!("{:?} widget '{}' ({} inner controls)", kind, label, controls.len());
        consumed.insert(id);
        consumed.extend(controls);
        claimed_until = tree.descendants(id).end;

        let mut field = FieldCandidate::input(label, kind).with_required(required);
        if let Some(html_id) = tree.attr(id, "id") {
            field = field.with_id(html_id);
        }
        found.push(DomField { position: id, field });
    }
    found
}

// ── 4. Remaining single controls ─────────────────────────────────────────

fn input_kind(tree: &DomTree, id: NodeId) -> Option<InputKind> {
    if tree.is_tag(id, "textarea") {
        return Some(InputKind::Textarea);
    }
    let ty = tree.input_type(id)?;
    if NON_FIELD_INPUTS.contains(&ty.as_str()) {
        return None;
    }
    Some(match ty.as_str() {
        "email" => InputKind::Email,
        "tel" => InputKind::Tel,
        "number" | "range" => InputKind::Number,
        "date" | "datetime-local" | "month" | "week" => InputKind::Date,
        "time" => InputKind::Time,
        "url" => InputKind::Url,
        "file" => InputKind::File,
        _ => InputKind::Text,
    })
}

fn select_field(tree: &DomTree, id: NodeId, label: String) -> FieldCandidate {
    let mut options = Vec::new();
    let mut other = None;
    for (i, opt) in tree
        .descendants(id)
        .filter(|&d| tree.is_tag(d, "option"))
        .enumerate()
    {
        let text = tree.text(opt);
        let blank_value = tree.attr(opt, "value").is_some_and(|v| v.trim().is_empty());
        if text.is_empty() || (i == 0 && blank_value) {
            continue;
        }
        if is_other_option(&text) {
            other.get_or_insert(OtherOption {
                label: Some(text),
                placeholder: Some(DEFAULT_OTHER_PLACEHOLDER.to_string()),
            });
        } else {
            options.push(text);
        }
    }
    FieldCandidate::new(
        label,
        FieldKind::Choice(ChoiceField {
            style: ChoiceStyle::Select,
            options: dedupe_options(options),
            other,
        }),
    )
}

/// Every unclaimed `<input>`, `<textarea>` and `<select>` becomes a field.
pub fn single_controls(tree: &DomTree, consumed: &mut HashSet<NodeId>) -> Vec<DomField> {
    let mut found = Vec::new();
    for id in tree.elements() {
        if consumed.contains(&id) || !tree.is_form_control(id) || tree.is_choice_input(id) {
            continue;
        }
        let is_select = tree.is_tag(id, "select");
        let kind = if is_select { None } else { input_kind(tree, id) };
        if !is_select && kind.is_none() {
            continue;
        }

        let hit: Option<LabelHit> = resolve_label(tree, id);
        let label = hit
            .as_ref()
            .map(|h| clean_label(&h.text))
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| format!("Untitled field {}", found.len() + 1));
        let required = attribute_marks_required(tree, id)
            || hit.as_ref().is_some_and(|h| label_marks_required(tree, h));

        let mut field = match kind {
            Some(kind) => FieldCandidate::input(label, kind),
            None => select_field(tree, id, label),
        }
        .with_required(required);

        if let Some(placeholder) = tree.attr(id, "placeholder").map(str::trim) {
            let used_as_label = hit.as_ref().is_some_and(|h| h.strategy == "attributes");
            if !placeholder.is_empty() && !used_as_label {
                field = field.with_placeholder(placeholder);
            }
        }
        if let Some(key) = tree
            .attr(id, "id")
            .or_else(|| tree.attr(id, "name"))
            .filter(|v| !v.is_empty())
        {
            field = field.with_id(key);
        }

        consumed.insert(id);
        found.push(DomField { position: id, field });
    }
    found
}
