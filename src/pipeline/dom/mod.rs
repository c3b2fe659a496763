//! DOM field extractor: rendered element tree → fields, no LLM involved.
//!
//! Passes run in a fixed order and each claims the nodes it uses:
//!
//! 1. rating widgets (clusters of star/emoji buttons)
//! 2. radio/checkbox groups, one field per `name`
//! 3. signature pads and upload widgets
//! 4. every remaining `<input>`, `<textarea>` and `<select>`
//!
//! Fields come back in document order, de-duplicated by id. Extraction
//! never fails: a control with no discoverable label gets a synthetic one.

pub mod labels;
pub mod tree;
pub mod widgets;

pub use tree::{DomTree, NodeId};

use crate::field::FieldCandidate;
use std::collections::HashSet;
use tracing::{debug, info};
use widgets::DomField;

type Pass = fn(&DomTree, &mut HashSet<NodeId>) -> Vec<DomField>;

const PASSES: [(&str, Pass); 4] = [
    ("rating", widgets::rating_widgets),
    ("choice", widgets::choice_groups),
    ("signature/file", widgets::signature_and_file_widgets),
    ("controls", widgets::single_controls),
];

/// Extract every field of the page. DOM fields are certain: confidence 1.0,
/// page 1.
pub fn extract_fields(tree: &DomTree) -> Vec<FieldCandidate> {
    let mut consumed: HashSet<NodeId> = HashSet::new();
    let mut found: Vec<DomField> = Vec::new();
    for (name, pass) in PASSES {
        let fields = pass(tree, &mut consumed);
        debug!("DOM pass '{}': {} field(s)", name, fields.len());
        found.extend(fields);
    }
    found.sort_by_key(|f| f.position);

    let mut seen_ids: HashSet<String> = HashSet::new();
    let fields: Vec<FieldCandidate> = found
        .into_iter()
        .map(|f| f.field)
        .filter(|f| match &f.id {
            Some(id) => seen_ids.insert(id.clone()),
            None => true,
        })
        .map(|f| f.with_confidence(1.0).on_page(1))
        .collect();

    info!("DOM extraction: {} fields from {} nodes", fields.len(), tree.len());
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;

    const SURVEY: &str = r#"<html><body><form>
        <h1>Guest survey</h1>
        <label for="name">Full name *</label>
        <input id="name" name="name" required>
        <p>How was your stay?</p>
        <div class="stars"><button>⭐</button><button>⭐</button><button>⭐</button></div>
        <fieldset><legend>Would you return?</legend>
          <label><input type="radio" name="ret"> Yes</label>
          <label><input type="radio" name="ret"> No</label>
          <label><input type="radio" name="ret"> Other</label>
          <input type="text" placeholder="Please explain">
        </fieldset>
        <div class="signature-field"><canvas></canvas></div>
        <input type="email" id="name" placeholder="duplicate id">
        <button type="submit">Send</button>
    </form></body></html>"#;

    #[test]
    fn extracts_in_document_order() {
        let fields = extract_fields(&DomTree::parse_html(SURVEY));
        let types: Vec<_> = fields.iter().map(|f| f.field_type()).collect();
        assert_eq!(
            types,
            vec![
                FieldType::Text,
                FieldType::Rating,
                FieldType::RadioWithOther,
                FieldType::Signature,
            ]
        );
        assert_eq!(fields[0].label, "Full name");
        assert!(fields[0].required);
        assert_eq!(fields[1].label, "How was your stay?");
        assert_eq!(fields[2].label, "Would you return?");
        assert_eq!(fields[2].options(), ["Yes", "No"]);
        assert_eq!(
            fields[2].other().unwrap().placeholder.as_deref(),
            Some("Please explain")
        );
        assert!(fields.iter().all(|f| f.page_number == Some(1) && f.confidence == 1.0));
    }

    #[test]
    fn empty_document_has_no_fields() {
        assert!(extract_fields(&DomTree::parse_html("<p>Just text</p>")).is_empty());
    }
}
