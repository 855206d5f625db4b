//! Host document abstraction shared by the browser and in-memory backends.
//!
//! The engine never touches a concrete DOM. It reads through [`Dom`] and
//! describes the markup it wants inserted as an [`ElementSpec`] tree, which
//! the host turns into real nodes in a single operation.

use crate::rewriter::EventSender;
use std::fmt;
use thiserror::Error;
use url::Url;

/// Errors surfaced by host document operations.
#[derive(Debug, Error)]
pub enum DomError {
    /// The node is no longer part of a tree that can be modified.
    #[error("node {0} is detached from the document")]
    Detached(String),
    /// The host refused or failed the operation.
    #[error("host operation failed: {0}")]
    Host(String),
}

/// Read/write access to a live document.
///
/// All methods take `&self`: hosts use interior mutability the same way
/// browser DOM handles do.
pub trait Dom {
    /// Handle to an element inside the document.
    type Node: Clone + fmt::Debug;
    /// Guard returned by [`Dom::observe`]; dropping it ends observation.
    type Subscription;

    /// Root element of the document.
    fn root(&self) -> Option<Self::Node>;

    /// Location the document was loaded from.
    fn location(&self) -> Option<Url>;

    /// Lowercase tag name, or `None` for nodes that are not elements.
    fn tag_name(&self, node: &Self::Node) -> Option<String>;

    /// Attribute value by (case-insensitive) name.
    fn attribute(&self, node: &Self::Node, name: &str) -> Option<String>;

    /// Parent element, if any.
    fn parent(&self, node: &Self::Node) -> Option<Self::Node>;

    /// Descendant elements of `scope` (excluding `scope`) with one of `tags`, in document order.
    fn query_tags(&self, scope: &Self::Node, tags: &[&str]) -> Vec<Self::Node>;

    /// Whether `node` is still reachable from the document root.
    fn is_connected(&self, node: &Self::Node) -> bool;

    /// Marks `node` as visited. Returns `false` if it had already been claimed.
    fn claim(&self, node: &Self::Node) -> bool;

    /// Replaces `old` with the materialized `replacement` in one step and returns the new node.
    fn replace_with(
        &self,
        old: &Self::Node,
        replacement: &ElementSpec,
    ) -> Result<Self::Node, DomError>;

    /// Appends the materialized `child` as the last child of `parent`.
    fn append_child(&self, parent: &Self::Node, child: &ElementSpec)
        -> Result<Self::Node, DomError>;

    /// Whether the host can play media of `mime_type` natively.
    fn can_play_type(&self, mime_type: &str) -> bool;

    /// Registers `contents` as an in-memory resource and returns a URL handle to it.
    fn create_object_url(&self, contents: &str, mime_type: &str) -> Result<String, DomError>;

    /// Starts delivering node insertions to `events` until the subscription is dropped.
    fn observe(&self, events: EventSender<Self::Node>) -> Result<Self::Subscription, DomError>;
}

/// Behavior wired to a click on a materialized element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickAction {
    /// Writes `text` to the clipboard; on success the element briefly reads `confirmation`.
    CopyToClipboard {
        /// Text placed on the clipboard.
        text: String,
        /// Label shown after a successful copy.
        confirmation: String,
    },
}

/// Child of an [`ElementSpec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeSpec {
    /// Nested element.
    Element(ElementSpec),
    /// Text content.
    Text(String),
}

/// Host-independent description of an element subtree to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementSpec {
    tag: String,
    attributes: Vec<(String, String)>,
    children: Vec<NodeSpec>,
    on_click: Option<ClickAction>,
}

impl ElementSpec {
    /// Starts an element with the given tag.
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attributes: Vec::new(),
            children: Vec::new(),
            on_click: None,
        }
    }

    /// Sets an attribute, replacing any previous value.
    pub fn attr(mut self, name: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        match self.attributes.iter_mut().find(|(key, _)| key == name) {
            Some((_, existing)) => *existing = value,
            None => self.attributes.push((name.to_string(), value)),
        }
        self
    }

    /// Sets a boolean attribute.
    pub fn flag(self, name: &str) -> Self {
        self.attr(name, "")
    }

    /// Appends one `property: value` declaration to the inline style.
    pub fn style(mut self, property: &str, value: &str) -> Self {
        let declaration = format!("{property}: {value}");
        match self.attributes.iter_mut().find(|(key, _)| key == "style") {
            Some((_, existing)) => {
                existing.push_str("; ");
                existing.push_str(&declaration);
            }
            None => self.attributes.push(("style".to_string(), declaration)),
        }
        self
    }

    /// Appends a child element.
    pub fn child(mut self, child: ElementSpec) -> Self {
        self.children.push(NodeSpec::Element(child));
        self
    }

    /// Appends a text node.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.children.push(NodeSpec::Text(text.into()));
        self
    }

    /// Attaches click behavior.
    pub fn on_click(mut self, action: ClickAction) -> Self {
        self.on_click = Some(action);
        self
    }

    /// Lowercase tag name.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Attributes in insertion order.
    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    /// Looks up one attribute.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Direct children.
    pub fn children(&self) -> &[NodeSpec] {
        &self.children
    }

    /// Click behavior, if any.
    pub fn click_action(&self) -> Option<&ClickAction> {
        self.on_click.as_ref()
    }

    /// All descendant elements with `tag`, depth first.
    pub fn find_all(&self, tag: &str) -> Vec<&ElementSpec> {
        let mut found = Vec::new();
        self.collect(tag, &mut found);
        found
    }

    fn collect<'a>(&'a self, tag: &str, found: &mut Vec<&'a ElementSpec>) {
        for child in &self.children {
            if let NodeSpec::Element(element) = child {
                if element.tag == tag {
                    found.push(element);
                }
                element.collect(tag, found);
            }
        }
    }

    /// Concatenated text of the subtree.
    pub fn text_content(&self) -> String {
        let mut buf = String::new();
        self.push_text(&mut buf);
        buf
    }

    fn push_text(&self, buf: &mut String) {
        for child in &self.children {
            match child {
                NodeSpec::Text(text) => buf.push_str(text),
                NodeSpec::Element(element) => element.push_text(buf),
            }
        }
    }

    /// Whether the inline style hides the element.
    pub fn is_hidden(&self) -> bool {
        self.attribute("style")
            .map(|style| style.split(';').any(|decl| decl.trim() == "display: none"))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_replace_and_styles_accumulate() {
        let spec = ElementSpec::new("VIDEO")
            .attr("width", "320")
            .attr("width", "640")
            .style("display", "inline-block")
            .style("display", "none")
            .flag("controls");

        assert_eq!(spec.tag(), "video");
        assert_eq!(spec.attribute("width"), Some("640"));
        assert_eq!(
            spec.attribute("style"),
            Some("display: inline-block; display: none")
        );
        assert_eq!(spec.attribute("controls"), Some(""));
        assert!(spec.is_hidden());
    }

    #[test]
    fn find_all_walks_nested_children() {
        let spec = ElementSpec::new("div")
            .child(ElementSpec::new("p").child(ElementSpec::new("a").text("one")))
            .child(ElementSpec::new("a").text("two"));

        let links = spec.find_all("a");
        assert_eq!(links.len(), 2);
        assert_eq!(spec.text_content(), "onetwo");
    }
}
