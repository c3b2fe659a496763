//! Read-only DOM snapshot.
//!
//! Nodes live in one arena in document (pre-order) order, so "before" in
//! the document is simply a smaller [`NodeId`] and the subtree of a node is
//! the contiguous id range `id..end`.

use scraper::{ElementRef, Html};
use std::ops::Range;

pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Element {
        /// Lowercase tag name.
        tag: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DomNode {
    pub data: NodeData,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// One past the last id in this node's subtree.
    end: NodeId,
}

/// An element tree captured from a rendered page or parsed from markup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DomTree {
    nodes: Vec<DomNode>,
}

impl DomTree {
    /// Parse an HTML document (or fragment) with html5ever's error recovery.
    pub fn parse_html(html: &str) -> Self {
        let document = Html::parse_document(html);
        let mut tree = DomTree::default();
        tree.push_element(document.root_element(), None);
        tree
    }

    fn push_element(&mut self, element: ElementRef<'_>, parent: Option<NodeId>) -> NodeId {
        let id = self.nodes.len();
        let value = element.value();
        self.nodes.push(DomNode {
            data: NodeData::Element {
                tag: value.name().to_ascii_lowercase(),
                attrs: value
                    .attrs()
                    .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
                    .collect(),
            },
            parent,
            children: Vec::new(),
            end: id + 1,
        });

        for child in element.children() {
            let child_id = if let Some(child_el) = ElementRef::wrap(child) {
                Some(self.push_element(child_el, Some(id)))
            } else if let Some(text) = child.value().as_text() {
                let text: &str = text;
                let child_id = self.nodes.len();
                self.nodes.push(DomNode {
                    data: NodeData::Text(text.to_string()),
                    parent: Some(id),
                    children: Vec::new(),
                    end: child_id + 1,
                });
                Some(child_id)
            } else {
                None
            };
            if let Some(child_id) = child_id {
                self.nodes[id].children.push(child_id);
            }
        }

        self.nodes[id].end = self.nodes.len();
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &DomNode {
        &self.nodes[id]
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id].data {
            NodeData::Element { tag, .. } => Some(tag),
            NodeData::Text(_) => None,
        }
    }

    pub fn is_tag(&self, id: NodeId, name: &str) -> bool {
        self.tag(id) == Some(name)
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        match &self.nodes[id].data {
            NodeData::Element { attrs, .. } => attrs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
            NodeData::Text(_) => None,
        }
    }

    pub fn has_attr(&self, id: NodeId, name: &str) -> bool {
        self.attr(id, name).is_some()
    }

    /// Case-insensitive substring match against the `class` and `id`
    /// attributes.
    pub fn class_or_id_contains(&self, id: NodeId, needle: &str) -> bool {
        ["class", "id"].iter().any(|a| {
            self.attr(id, a)
                .is_some_and(|v| v.to_ascii_lowercase().contains(needle))
        })
    }

    /// Ids of this node's subtree, excluding the node itself.
    pub fn descendants(&self, id: NodeId) -> Range<NodeId> {
        id + 1..self.nodes[id].end
    }

    /// `true` when `node` lies strictly inside `ancestor`'s subtree.
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        node > ancestor && node < self.nodes[ancestor].end
    }

    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.nodes[id].parent, move |&p| self.nodes[p].parent)
    }

    /// All element ids in document order.
    pub fn elements(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).filter(move |&id| self.tag(id).is_some())
    }

    pub fn elements_by_tag<'a>(&'a self, name: &'a str) -> impl Iterator<Item = NodeId> + 'a {
        self.elements().filter(move |&id| self.is_tag(id, name))
    }

    pub fn element_children(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes[id]
            .children
            .iter()
            .copied()
            .filter(|&c| self.tag(c).is_some())
            .collect()
    }

    /// Element siblings before `id`, nearest first.
    pub fn preceding_siblings(&self, id: NodeId) -> Vec<NodeId> {
        let Some(parent) = self.parent(id) else {
            return Vec::new();
        };
        let mut before: Vec<NodeId> = self
            .element_children(parent)
            .into_iter()
            .filter(|&s| s < id)
            .collect();
        before.reverse();
        before
    }

    /// Element siblings after `id`, nearest first.
    pub fn following_siblings(&self, id: NodeId) -> Vec<NodeId> {
        match self.parent(id) {
            Some(parent) => self
                .element_children(parent)
                .into_iter()
                .filter(|&s| s > id)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Text of the node directly following `id` among its siblings, if that
    /// node is a non-blank text node.
    pub fn next_text_sibling(&self, id: NodeId) -> Option<String> {
        let parent = self.parent(id)?;
        let siblings = &self.nodes[parent].children;
        let pos = siblings.iter().position(|&s| s == id)?;
        match siblings.get(pos + 1).map(|&s| &self.nodes[s].data) {
            Some(NodeData::Text(t)) => Some(collapse_whitespace(t)).filter(|t| !t.is_empty()),
            _ => None,
        }
    }

    /// First element whose `id` attribute equals `value`.
    pub fn find_by_id(&self, value: &str) -> Option<NodeId> {
        self.elements().find(|&id| self.attr(id, "id") == Some(value))
    }

    /// Whitespace-collapsed text of the subtree.
    pub fn text(&self, id: NodeId) -> String {
        self.text_where(id, |_| true)
    }

    /// Text a user would read in the subtree: script, style and the
    /// contents of form controls are skipped.
    pub fn visible_text(&self, id: NodeId) -> String {
        self.text_where(id, |n| {
            !matches!(
                self.tag(n),
                Some("script" | "style" | "select" | "textarea" | "option" | "button" | "template")
            )
        })
    }

    /// Like [`DomTree::text`], but skips the subtrees of elements for which
    /// `keep` returns false.
    pub fn text_where(&self, id: NodeId, keep: impl Fn(NodeId) -> bool) -> String {
        let mut raw = String::new();
        let mut cursor = id;
        let end = self.nodes[id].end;
        while cursor < end {
            if cursor != id && self.tag(cursor).is_some() && !keep(cursor) {
                cursor = self.nodes[cursor].end;
                continue;
            }
            if let NodeData::Text(t) = &self.nodes[cursor].data {
                raw.push_str(t);
                raw.push(' ');
            }
            cursor += 1;
        }
        collapse_whitespace(&raw)
    }

    /// `true` for `<input>`, `<textarea>` and `<select>`.
    pub fn is_form_control(&self, id: NodeId) -> bool {
        matches!(self.tag(id), Some("input" | "textarea" | "select"))
    }

    /// Lowercase `type` of an `<input>` (HTML default `text`); None for
    /// anything else.
    pub fn input_type(&self, id: NodeId) -> Option<String> {
        self.is_tag(id, "input").then(|| {
            self.attr(id, "type")
                .map(|t| t.trim().to_ascii_lowercase())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "text".to_string())
        })
    }

    pub fn is_choice_input(&self, id: NodeId) -> bool {
        matches!(self.input_type(id).as_deref(), Some("radio" | "checkbox"))
    }

    /// `true` when the subtree of `id` contains a radio or checkbox.
    pub fn contains_choice_input(&self, id: NodeId) -> bool {
        self.is_choice_input(id) || self.descendants(id).any(|d| self.is_choice_input(d))
    }
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const HTML: &str = r#"<html><body>
        <form id="f">
          <label for="n">Name</label>
          <input id="n" name="name">
          <p>Hello <b>there</b> world</p>
        </form>
    </body></html>"#;

    #[test]
    fn nodes_are_in_document_order() {
        let tree = DomTree::parse_html(HTML);
        let label = tree.elements_by_tag("label").next().unwrap();
        let input = tree.elements_by_tag("input").next().unwrap();
        let form = tree.find_by_id("f").unwrap();
        assert!(label < input);
        assert!(tree.contains(form, input));
        assert!(!tree.contains(input, form));
        assert!(tree.ancestors(input).any(|a| a == form));
    }

    #[test]
    fn text_is_whitespace_collapsed() {
        let tree = DomTree::parse_html(HTML);
        let p = tree.elements_by_tag("p").next().unwrap();
        assert_eq!(tree.text(p), "Hello there world");
        let without_bold = tree.text_where(p, |id| !tree.is_tag(id, "b"));
        assert_eq!(without_bold, "Hello world");
    }

    #[test]
    fn siblings_and_input_type() {
        let tree = DomTree::parse_html(HTML);
        let input = tree.elements_by_tag("input").next().unwrap();
        let before = tree.preceding_siblings(input);
        assert!(tree.is_tag(before[0], "label"));
        assert_eq!(tree.input_type(input).as_deref(), Some("text"));
        assert!(tree.is_form_control(input));
        assert!(!tree.is_choice_input(input));
    }

    #[test]
    fn next_text_sibling_reads_inline_option_text() {
        let tree = DomTree::parse_html(r#"<div><input type="radio" name="a"> Yes <br></div>"#);
        let radio = tree.elements_by_tag("input").next().unwrap();
        assert_eq!(tree.next_text_sibling(radio).as_deref(), Some("Yes"));
    }
}
