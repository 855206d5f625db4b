//! In-memory HTML document host built on `scraper`.
//!
//! Markup is parsed with `scraper` (html5ever) and copied into a small arena
//! that supports the mutations the rewriter needs. Insertions are reported to
//! observers the way a browser `MutationObserver` reports them: one batch per
//! structural change, delivered through the rewriter's event channel.

use crate::dom::{ClickAction, Dom, DomError, ElementSpec, NodeSpec};
use crate::rewriter::{post, EventSender, RewriteEvent};
use scraper::{Html, Node};
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};
use url::Url;

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];
const RAW_TEXT_TAGS: &[&str] = &[
    "iframe", "noembed", "noframes", "noscript", "plaintext", "script", "style", "xmp",
];
const DEFAULT_PLAYABLE: &[&str] = &["video/mp4", "video/webm"];

/// Handle to a node of a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
enum NodeData {
    Document,
    Doctype(DoctypeData),
    Element(ElementData),
    Text(String),
    Comment(String),
}

#[derive(Debug)]
struct DoctypeData {
    name: String,
    public_id: String,
    system_id: String,
}

#[derive(Debug)]
struct ElementData {
    tag: String,
    attributes: Vec<(String, String)>,
    on_click: Option<ClickAction>,
}

#[derive(Debug)]
struct Slot {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    data: NodeData,
}

struct StoredObject {
    url: String,
    contents: String,
}

struct Tree {
    slots: Vec<Slot>,
    claimed: HashSet<NodeId>,
    observers: Vec<(u64, EventSender<NodeId>)>,
    next_observer: u64,
    objects: Vec<StoredObject>,
    playable: Vec<String>,
    clipboard_available: bool,
    clipboard: Option<String>,
}

const DOCUMENT: NodeId = NodeId(0);

impl Tree {
    fn new() -> Self {
        Self {
            slots: vec![Slot {
                parent: None,
                children: Vec::new(),
                data: NodeData::Document,
            }],
            claimed: HashSet::new(),
            observers: Vec::new(),
            next_observer: 0,
            objects: Vec::new(),
            playable: DEFAULT_PLAYABLE.iter().map(|s| s.to_string()).collect(),
            clipboard_available: true,
            clipboard: None,
        }
    }

    fn slot(&self, id: NodeId) -> Option<&Slot> {
        self.slots.get(id.0)
    }

    fn element(&self, id: NodeId) -> Option<&ElementData> {
        match &self.slot(id)?.data {
            NodeData::Element(element) => Some(element),
            _ => None,
        }
    }

    fn push_detached(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.slots.len());
        self.slots.push(Slot {
            parent: None,
            children: Vec::new(),
            data,
        });
        id
    }

    fn attach(&mut self, parent: NodeId, child: NodeId) {
        self.slots[child.0].parent = Some(parent);
        self.slots[parent.0].children.push(child);
    }

    fn materialize(&mut self, spec: &ElementSpec) -> NodeId {
        let id = self.push_detached(NodeData::Element(ElementData {
            tag: spec.tag().to_string(),
            attributes: spec.attributes().to_vec(),
            on_click: spec.click_action().cloned(),
        }));
        for child in spec.children() {
            let child_id = match child {
                NodeSpec::Element(element) => self.materialize(element),
                NodeSpec::Text(text) => self.push_detached(NodeData::Text(text.clone())),
            };
            self.attach(id, child_id);
        }
        id
    }

    /// Copies parsed markup below `parent`, returning the new top-level nodes.
    ///
    /// Fragments contribute the children of their synthetic `<html>` root.
    fn import(&mut self, parent: NodeId, parsed: &Html, fragment: bool) -> Vec<NodeId> {
        let top_level: Vec<_> = if fragment {
            parsed.root_element().children().collect()
        } else {
            parsed.tree.root().children().collect()
        };
        let mut inserted = Vec::new();
        let mut stack: Vec<_> = top_level
            .into_iter()
            .map(|node| (node, parent, true))
            .collect();
        stack.reverse();
        while let Some((node, parent, is_top)) = stack.pop() {
            let Some(data) = convert(node.value()) else {
                continue;
            };
            let id = self.push_detached(data);
            self.attach(parent, id);
            if is_top {
                inserted.push(id);
            }
            let children: Vec<_> = node.children().collect();
            for child in children.into_iter().rev() {
                stack.push((child, id, false));
            }
        }
        inserted
    }

    fn is_connected(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == DOCUMENT {
                return true;
            }
            current = self.slot(node).and_then(|slot| slot.parent);
        }
        false
    }

    fn descendants(&self, scope: NodeId) -> Vec<NodeId> {
        let mut found = Vec::new();
        let Some(slot) = self.slot(scope) else {
            return found;
        };
        let mut stack: Vec<NodeId> = slot.children.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            found.push(id);
            if let Some(slot) = self.slot(id) {
                stack.extend(slot.children.iter().rev().copied());
            }
        }
        found
    }

    fn live_observers(&mut self) -> Vec<EventSender<NodeId>> {
        self.observers.retain(|(_, sender)| !sender.is_closed());
        self.observers
            .iter()
            .map(|(_, sender)| sender.clone())
            .collect()
    }
}

fn convert(node: &Node) -> Option<NodeData> {
    match node {
        Node::Doctype(doctype) => Some(NodeData::Doctype(DoctypeData {
            name: doctype.name().to_string(),
            public_id: doctype.public_id().to_string(),
            system_id: doctype.system_id().to_string(),
        })),
        Node::Comment(comment) => {
            let text: &str = comment;
            Some(NodeData::Comment(text.to_string()))
        }
        Node::Text(text) => {
            let text: &str = text;
            Some(NodeData::Text(text.to_string()))
        }
        Node::Element(element) => Some(NodeData::Element(ElementData {
            tag: element.name().to_ascii_lowercase(),
            attributes: element
                .attrs()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            on_click: None,
        })),
        _ => None,
    }
}

/// Mutable HTML document with browser-like observation semantics.
///
/// Cloning yields another handle to the same document.
#[derive(Clone)]
pub struct Document {
    tree: Rc<RefCell<Tree>>,
    location: Url,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("location", &self.location.as_str())
            .field("nodes", &self.tree.borrow().slots.len())
            .finish()
    }
}

impl Document {
    /// Parses a full HTML document served from `location`.
    pub fn parse(html: &str, location: Url) -> Self {
        let parsed = Html::parse_document(html);
        let mut tree = Tree::new();
        tree.import(DOCUMENT, &parsed, false);
        Self {
            tree: Rc::new(RefCell::new(tree)),
            location,
        }
    }

    /// Replaces the MIME types reported as natively playable.
    pub fn with_playable_types<I, S>(self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tree.borrow_mut().playable = types.into_iter().map(Into::into).collect();
        self
    }

    /// Simulates a host without clipboard access.
    pub fn without_clipboard(self) -> Self {
        self.tree.borrow_mut().clipboard_available = false;
        self
    }

    /// The `<body>` element.
    pub fn body(&self) -> Option<NodeId> {
        let root = self.root()?;
        self.query_tags(&root, &["body"]).into_iter().next()
    }

    /// First element with `tag` in document order.
    pub fn find_first(&self, tag: &str) -> Option<NodeId> {
        let root = self.root()?;
        self.query_tags(&root, &[tag]).into_iter().next()
    }

    /// Direct children of `node`.
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.tree
            .borrow()
            .slot(node)
            .map(|slot| slot.children.clone())
            .unwrap_or_default()
    }

    /// Parses `html` as a fragment and appends its nodes to `parent` as one mutation.
    pub fn insert_html(&self, parent: NodeId, html: &str) -> Result<Vec<NodeId>, DomError> {
        let fragment = Html::parse_fragment(html);
        let (inserted, observers) = {
            let mut tree = self.tree.borrow_mut();
            if tree.element(parent).is_none() {
                return Err(DomError::Detached(parent.to_string()));
            }
            let inserted = tree.import(parent, &fragment, true);
            (inserted, tree.live_observers())
        };
        notify(&observers, &inserted);
        Ok(inserted)
    }

    /// Detaches `node` from its parent.
    pub fn remove(&self, node: NodeId) -> Result<(), DomError> {
        let mut tree = self.tree.borrow_mut();
        let parent = tree
            .slot(node)
            .and_then(|slot| slot.parent)
            .ok_or_else(|| DomError::Detached(node.to_string()))?;
        tree.slots[parent.0].children.retain(|child| *child != node);
        tree.slots[node.0].parent = None;
        Ok(())
    }

    /// Runs the click behavior of `node`. Returns whether anything happened.
    ///
    /// A copy action without clipboard access does nothing and reports nothing.
    pub fn click(&self, node: NodeId) -> bool {
        let mut tree = self.tree.borrow_mut();
        let Some(ClickAction::CopyToClipboard { text, confirmation }) = tree
            .element(node)
            .and_then(|element| element.on_click.clone())
        else {
            return false;
        };
        if !tree.clipboard_available {
            return false;
        }
        tree.clipboard = Some(text);
        let label = tree.push_detached(NodeData::Text(confirmation));
        tree.slots[node.0].children.clear();
        tree.attach(node, label);
        true
    }

    /// Current clipboard contents.
    pub fn clipboard(&self) -> Option<String> {
        self.tree.borrow().clipboard.clone()
    }

    /// Contents registered under an object URL.
    pub fn object_contents(&self, url: &str) -> Option<String> {
        self.tree
            .borrow()
            .objects
            .iter()
            .find(|object| object.url == url)
            .map(|object| object.contents.clone())
    }

    /// Number of live observation subscriptions.
    pub fn observer_count(&self) -> usize {
        let mut tree = self.tree.borrow_mut();
        tree.observers.retain(|(_, sender)| !sender.is_closed());
        tree.observers.len()
    }

    /// Concatenated text below `node`.
    pub fn text_content(&self, node: NodeId) -> String {
        let tree = self.tree.borrow();
        let mut buf = String::new();
        for id in std::iter::once(node).chain(tree.descendants(node)) {
            if let Some(NodeData::Text(text)) = tree.slot(id).map(|slot| &slot.data) {
                buf.push_str(text);
            }
        }
        buf
    }

    /// Serializes the whole document.
    pub fn to_html(&self) -> String {
        let tree = self.tree.borrow();
        let mut out = String::new();
        for child in &tree.slots[DOCUMENT.0].children {
            write_node(&tree, *child, &mut out);
        }
        out
    }

    /// Serializes `node` and its subtree.
    pub fn outer_html(&self, node: NodeId) -> String {
        let tree = self.tree.borrow();
        let mut out = String::new();
        write_node(&tree, node, &mut out);
        out
    }
}

fn notify(observers: &[EventSender<NodeId>], inserted: &[NodeId]) {
    if inserted.is_empty() {
        return;
    }
    for sender in observers {
        post(sender, RewriteEvent::SubtreeInserted(inserted.to_vec()));
    }
}

fn write_node(tree: &Tree, id: NodeId, out: &mut String) {
    let Some(slot) = tree.slot(id) else {
        return;
    };
    match &slot.data {
        NodeData::Document => {
            for child in &slot.children {
                write_node(tree, *child, out);
            }
        }
        NodeData::Doctype(doctype) => {
            out.push_str("<!DOCTYPE ");
            out.push_str(&doctype.name);
            // Public and system ids select the rendering mode.
            if !doctype.public_id.is_empty() {
                out.push_str(" PUBLIC \"");
                out.push_str(&doctype.public_id);
                out.push('"');
                if !doctype.system_id.is_empty() {
                    out.push_str(" \"");
                    out.push_str(&doctype.system_id);
                    out.push('"');
                }
            } else if !doctype.system_id.is_empty() {
                out.push_str(" SYSTEM \"");
                out.push_str(&doctype.system_id);
                out.push('"');
            }
            out.push('>');
        }
        NodeData::Comment(text) => {
            out.push_str("<!--");
            out.push_str(text);
            out.push_str("-->");
        }
        NodeData::Text(text) => {
            let raw = slot
                .parent
                .and_then(|parent| tree.element(parent))
                .map(|parent| RAW_TEXT_TAGS.contains(&parent.tag.as_str()))
                .unwrap_or(false);
            if raw {
                out.push_str(text);
            } else {
                out.push_str(&html_escape::encode_text(text));
            }
        }
        NodeData::Element(element) => {
            out.push('<');
            out.push_str(&element.tag);
            for (name, value) in &element.attributes {
                out.push(' ');
                out.push_str(name);
                if !value.is_empty() {
                    out.push_str("=\"");
                    out.push_str(&html_escape::encode_double_quoted_attribute(value));
                    out.push('"');
                }
            }
            out.push('>');
            if VOID_TAGS.contains(&element.tag.as_str()) {
                return;
            }
            for child in &slot.children {
                write_node(tree, *child, out);
            }
            out.push_str("</");
            out.push_str(&element.tag);
            out.push('>');
        }
    }
}

/// Observation guard for a [`Document`]; dropping it unsubscribes.
pub struct Observation {
    tree: Weak<RefCell<Tree>>,
    id: u64,
}

impl Drop for Observation {
    fn drop(&mut self) {
        if let Some(tree) = self.tree.upgrade() {
            tree.borrow_mut()
                .observers
                .retain(|(observer, _)| *observer != self.id);
        }
    }
}

impl Dom for Document {
    type Node = NodeId;
    type Subscription = Observation;

    fn root(&self) -> Option<NodeId> {
        let tree = self.tree.borrow();
        tree.slots[DOCUMENT.0]
            .children
            .iter()
            .copied()
            .find(|child| tree.element(*child).is_some())
    }

    fn location(&self) -> Option<Url> {
        Some(self.location.clone())
    }

    fn tag_name(&self, node: &NodeId) -> Option<String> {
        self.tree
            .borrow()
            .element(*node)
            .map(|element| element.tag.clone())
    }

    fn attribute(&self, node: &NodeId, name: &str) -> Option<String> {
        self.tree.borrow().element(*node).and_then(|element| {
            element
                .attributes
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.clone())
        })
    }

    fn parent(&self, node: &NodeId) -> Option<NodeId> {
        let tree = self.tree.borrow();
        let parent = tree.slot(*node)?.parent?;
        tree.element(parent).map(|_| parent)
    }

    fn query_tags(&self, scope: &NodeId, tags: &[&str]) -> Vec<NodeId> {
        let tree = self.tree.borrow();
        tree.descendants(*scope)
            .into_iter()
            .filter(|id| {
                tree.element(*id)
                    .map(|element| tags.iter().any(|tag| element.tag.eq_ignore_ascii_case(tag)))
                    .unwrap_or(false)
            })
            .collect()
    }

    fn is_connected(&self, node: &NodeId) -> bool {
        self.tree.borrow().is_connected(*node)
    }

    fn claim(&self, node: &NodeId) -> bool {
        self.tree.borrow_mut().claimed.insert(*node)
    }

    fn replace_with(&self, old: &NodeId, replacement: &ElementSpec) -> Result<NodeId, DomError> {
        let (new, observers) = {
            let mut tree = self.tree.borrow_mut();
            let parent = tree
                .slot(*old)
                .and_then(|slot| slot.parent)
                .ok_or_else(|| DomError::Detached(old.to_string()))?;
            let position = tree.slots[parent.0]
                .children
                .iter()
                .position(|child| child == old)
                .ok_or_else(|| DomError::Detached(old.to_string()))?;
            let new = tree.materialize(replacement);
            tree.slots[new.0].parent = Some(parent);
            tree.slots[parent.0].children[position] = new;
            tree.slots[old.0].parent = None;
            (new, tree.live_observers())
        };
        notify(&observers, &[new]);
        Ok(new)
    }

    fn append_child(&self, parent: &NodeId, child: &ElementSpec) -> Result<NodeId, DomError> {
        let (new, observers) = {
            let mut tree = self.tree.borrow_mut();
            if tree.element(*parent).is_none() {
                return Err(DomError::Detached(parent.to_string()));
            }
            let new = tree.materialize(child);
            tree.attach(*parent, new);
            (new, tree.live_observers())
        };
        notify(&observers, &[new]);
        Ok(new)
    }

    fn can_play_type(&self, mime_type: &str) -> bool {
        let essence = mime_type.split(';').next().unwrap_or(mime_type).trim();
        self.tree
            .borrow()
            .playable
            .iter()
            .any(|known| known.eq_ignore_ascii_case(essence))
    }

    fn create_object_url(&self, contents: &str, _mime_type: &str) -> Result<String, DomError> {
        let mut tree = self.tree.borrow_mut();
        let url = format!(
            "blob:{}/{}",
            self.location.origin().ascii_serialization(),
            tree.objects.len() + 1
        );
        tree.objects.push(StoredObject {
            url: url.clone(),
            contents: contents.to_string(),
        });
        Ok(url)
    }

    fn observe(&self, events: EventSender<NodeId>) -> Result<Observation, DomError> {
        let mut tree = self.tree.borrow_mut();
        let id = tree.next_observer;
        tree.next_observer += 1;
        tree.observers.push((id, events));
        Ok(Observation {
            tree: Rc::downgrade(&self.tree),
            id,
        })
    }
}
