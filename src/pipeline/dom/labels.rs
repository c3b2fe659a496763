//! Label resolution for form controls.
//!
//! Each strategy is a pure function of the tree and the control. They are
//! tried in [`LABEL_STRATEGIES`] order and the first hit wins.

use super::tree::{collapse_whitespace, DomTree, NodeId};
use once_cell::sync::Lazy;
use regex::Regex;

/// A resolved label, plus the element it came from (when there is one) so
/// callers can look for required markers inside it.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelHit {
    pub text: String,
    pub node: Option<NodeId>,
    pub strategy: &'static str,
}

pub type LabelStrategy = fn(&DomTree, NodeId) -> Option<LabelHit>;

pub const LABEL_STRATEGIES: [(&str, LabelStrategy); 5] = [
    ("for_attribute", for_attribute),
    ("enclosing_label", enclosing_label),
    ("preceding_sibling", preceding_sibling_label),
    ("earlier_in_parent", earlier_label_in_parent),
    ("attributes", from_attributes),
];

static RE_REQUIRED_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\(\s*(required|mandatory)\s*\)|\brequired\b$").unwrap());

/// Run the strategies in order.
pub fn resolve_label(tree: &DomTree, control: NodeId) -> Option<LabelHit> {
    LABEL_STRATEGIES.iter().find_map(|&(name, strategy)| {
        strategy(tree, control).map(|mut hit| {
            hit.strategy = name;
            hit
        })
    })
}

fn label_hit(tree: &DomTree, label: NodeId) -> Option<LabelHit> {
    let text = tree.visible_text(label);
    (!text.is_empty()).then_some(LabelHit {
        text,
        node: Some(label),
        strategy: "",
    })
}

/// `<label for="…">` pointing at the control's id.
pub fn for_attribute(tree: &DomTree, control: NodeId) -> Option<LabelHit> {
    let id = tree.attr(control, "id").filter(|v| !v.is_empty())?;
    tree.elements_by_tag("label")
        .find(|&l| tree.attr(l, "for") == Some(id))
        .and_then(|l| label_hit(tree, l))
}

/// A `<label>` wrapping the control.
pub fn enclosing_label(tree: &DomTree, control: NodeId) -> Option<LabelHit> {
    tree.ancestors(control)
        .find(|&a| tree.is_tag(a, "label"))
        .and_then(|l| label_hit(tree, l))
}

/// The nearest preceding sibling, if it is a `<label>`.
pub fn preceding_sibling_label(tree: &DomTree, control: NodeId) -> Option<LabelHit> {
    tree.preceding_siblings(control)
        .into_iter()
        .find(|&s| !tree.is_form_control(s) && tree.tag(s) != Some("br"))
        .filter(|&s| tree.is_tag(s, "label") && tree.attr(s, "for").is_none())
        .and_then(|l| label_hit(tree, l))
}

/// The last `<label>` inside the control's parent that comes before it and
/// is not bound to another control.
pub fn earlier_label_in_parent(tree: &DomTree, control: NodeId) -> Option<LabelHit> {
    let parent = tree.parent(control)?;
    tree.descendants(parent)
        .filter(|&n| n < control && tree.is_tag(n, "label"))
        .filter(|&l| tree.attr(l, "for").is_none() && !tree.descendants(l).any(|d| tree.is_form_control(d)))
        .last()
        .and_then(|l| label_hit(tree, l))
}

/// `aria-label`, `placeholder`, `title`, then a humanised `name`.
pub fn from_attributes(tree: &DomTree, control: NodeId) -> Option<LabelHit> {
    let direct = ["aria-label", "placeholder", "title"]
        .iter()
        .filter_map(|a| tree.attr(control, a))
        .map(collapse_whitespace)
        .find(|v| !v.is_empty());
    let text = direct.or_else(|| tree.attr(control, "name").map(humanize).filter(|v| !v.is_empty()))?;
    Some(LabelHit {
        text,
        node: None,
        strategy: "",
    })
}

/// `first_name` / `firstName` / `first-name` → "First name".
pub fn humanize(name: &str) -> String {
    let mut words = String::new();
    let mut prev_lower = false;
    for c in name.trim_end_matches("[]").chars() {
        if c == '_' || c == '-' || c == '.' || c == '[' || c == ']' {
            words.push(' ');
            prev_lower = false;
        } else if c.is_uppercase() && prev_lower {
            words.push(' ');
            words.extend(c.to_lowercase());
            prev_lower = false;
        } else {
            words.extend(c.to_lowercase());
            prev_lower = c.is_lowercase();
        }
    }
    let words = collapse_whitespace(&words);
    let mut chars = words.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Strip required markers and trailing punctuation from label text.
pub fn clean_label(text: &str) -> String {
    let without_marker = RE_REQUIRED_WORD.replace_all(text, "");
    without_marker
        .trim()
        .trim_end_matches(|c: char| c == '*' || c == ':' || c.is_whitespace())
        .trim_start_matches('*')
        .trim()
        .to_string()
}

/// `true` when the label text or its element marks the field as required.
pub fn label_marks_required(tree: &DomTree, hit: &LabelHit) -> bool {
    if hit.text.contains('*') || RE_REQUIRED_WORD.is_match(&hit.text) {
        return true;
    }
    hit.node.is_some_and(|label| {
        tree.descendants(label).any(|d| {
            tree.class_or_id_contains(d, "required")
                || tree.class_or_id_contains(d, "asterisk")
                || tree.attr(d, "aria-label").is_some_and(|v| v.eq_ignore_ascii_case("required"))
        })
    })
}

/// `required` or `aria-required="true"` on the control itself.
pub fn attribute_marks_required(tree: &DomTree, control: NodeId) -> bool {
    tree.has_attr(control, "required")
        || tree
            .attr(control, "aria-required")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_input(tree: &DomTree) -> NodeId {
        tree.elements()
            .find(|&id| tree.is_form_control(id))
            .unwrap()
    }

    fn resolved(html: &str) -> (String, &'static str) {
        let tree = DomTree::parse_html(html);
        let hit = resolve_label(&tree, first_input(&tree)).unwrap();
        (hit.text, hit.strategy)
    }

    #[test]
    fn for_attribute_wins() {
        let (text, strategy) = resolved(
            r#"<label>Wrong</label><label for="e">Email</label><div><input id="e"></div>"#,
        );
        assert_eq!(text, "Email");
        assert_eq!(strategy, "for_attribute");
    }

    #[test]
    fn enclosing_label_ignores_select_options() {
        let (text, strategy) = resolved(
            r#"<label>Country <select><option>France</option></select></label>"#,
        );
        assert_eq!(text, "Country");
        assert_eq!(strategy, "enclosing_label");
    }

    #[test]
    fn preceding_sibling_label() {
        let (text, strategy) = resolved(r#"<div><label>Phone</label><input type="tel"></div>"#);
        assert_eq!(text, "Phone");
        assert_eq!(strategy, "preceding_sibling");
    }

    #[test]
    fn earlier_label_nested_in_parent() {
        let (text, strategy) =
            resolved(r#"<div><span><label>City</label></span><em>hint</em><input></div>"#);
        assert_eq!(text, "City");
        assert_eq!(strategy, "earlier_in_parent");
    }

    #[test]
    fn attributes_are_last_resort() {
        let (text, strategy) = resolved(r#"<div><input name="date_of_birth"></div>"#);
        assert_eq!(text, "Date of birth");
        assert_eq!(strategy, "attributes");
        let (text, _) = resolved(r#"<input placeholder="Your answer">"#);
        assert_eq!(text, "Your answer");
    }

    #[test]
    fn no_label_at_all() {
        let tree = DomTree::parse_html("<div><input></div>");
        assert!(resolve_label(&tree, first_input(&tree)).is_none());
    }

    #[test]
    fn humanize_variants() {
        assert_eq!(humanize("firstName"), "First name");
        assert_eq!(humanize("first-name"), "First name");
        assert_eq!(humanize("interests[]"), "Interests");
    }

    #[test]
    fn required_markers() {
        let tree = DomTree::parse_html(
            r#"<label for="a">Name <span class="req-asterisk"></span></label><input id="a">
               <label for="b">Email *</label><input id="b">
               <label for="c">Notes</label><input id="c" aria-required="true">"#,
        );
        let inputs: Vec<_> = tree.elements_by_tag("input").collect();
        let a = resolve_label(&tree, inputs[0]).unwrap();
        let b = resolve_label(&tree, inputs[1]).unwrap();
        assert!(label_marks_required(&tree, &a));
        assert!(label_marks_required(&tree, &b));
        assert!(attribute_marks_required(&tree, inputs[2]));
        assert!(!attribute_marks_required(&tree, inputs[0]));
        assert_eq!(clean_label(&b.text), "Email");
        assert_eq!(clean_label("Age (required):"), "Age");
    }
}
