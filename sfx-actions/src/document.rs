//! In-process model of the host page.
//!
//! The document is a thread-safe arena of nodes addressed by index. Handles
//! ([`Element`]) are cheap clones of the document plus a node id, so the engine can hold
//! on to rows, menus and buttons across mutation passes the same way page scripts hold
//! on to live DOM nodes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use reqwest::Url;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::element::{ClickListener, Element, NodeSpec};
use crate::errors::ActionError;
use crate::selector::Selector;

pub(crate) type NodeId = usize;

pub(crate) enum NodeKind {
    Element {
        tag: String,
        attributes: BTreeMap<String, String>,
    },
    Text(String),
}

pub(crate) struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) listeners: Vec<ClickListener>,
}

pub(crate) struct Tree {
    pub(crate) nodes: Vec<Node>,
    root: NodeId,
    body: NodeId,
    location: Url,
}

impl Tree {
    pub(crate) fn push(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.push(Node {
            kind,
            parent: None,
            children: Vec::new(),
            listeners: Vec::new(),
        });
        self.nodes.len() - 1
    }

    pub(crate) fn element_parts(&self, id: NodeId) -> Option<(&str, &BTreeMap<String, String>)> {
        match &self.nodes.get(id)?.kind {
            NodeKind::Element { tag, attributes } => Some((tag.as_str(), attributes)),
            NodeKind::Text(_) => None,
        }
    }

    pub(crate) fn matches(&self, id: NodeId, selector: &Selector) -> bool {
        self.element_parts(id)
            .is_some_and(|(tag, attributes)| selector.matches(tag, attributes))
    }

    /// Descendants of `id` in document order, `id` itself excluded.
    pub(crate) fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.nodes[id].children.iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.nodes[next].children.iter().rev().copied());
        }
        out
    }

    /// `id` followed by its ancestors up to the detached or document root.
    pub(crate) fn ancestors_or_self(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = vec![id];
        let mut current = self.nodes[id].parent;
        while let Some(parent) = current {
            out.push(parent);
            current = self.nodes[parent].parent;
        }
        out
    }

    pub(crate) fn text_content(&self, id: NodeId) -> String {
        if let NodeKind::Text(text) = &self.nodes[id].kind {
            return text.clone();
        }
        self.descendants(id)
            .into_iter()
            .filter_map(|d| match &self.nodes[d].kind {
                NodeKind::Text(text) => Some(text.as_str()),
                NodeKind::Element { .. } => None,
            })
            .collect()
    }

    pub(crate) fn text_excluding(&self, id: NodeId, skip: &Selector, out: &mut String) {
        match &self.nodes[id].kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Element { .. } if self.matches(id, skip) => {}
            NodeKind::Element { .. } => {
                for child in &self.nodes[id].children {
                    self.text_excluding(*child, skip, out);
                }
            }
        }
    }

    pub(crate) fn is_connected(&self, id: NodeId) -> bool {
        self.ancestors_or_self(id).last() == Some(&self.root)
    }

    /// Unlinks `id` from its parent, returning the former parent.
    pub(crate) fn detach(&mut self, id: NodeId) -> Option<NodeId> {
        let parent = self.nodes[id].parent.take()?;
        self.nodes[parent].children.retain(|c| *c != id);
        Some(parent)
    }

    pub(crate) fn build(&mut self, spec: NodeSpec) -> NodeId {
        let attributes = spec
            .attributes
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        let id = self.push(NodeKind::Element {
            tag: spec.tag.to_ascii_lowercase(),
            attributes,
        });
        if let Some(text) = spec.text {
            let text_id = self.push(NodeKind::Text(text));
            self.nodes[text_id].parent = Some(id);
            self.nodes[id].children.push(text_id);
        }
        for child in spec.children {
            let child_id = self.build(child);
            self.nodes[child_id].parent = Some(id);
            self.nodes[id].children.push(child_id);
        }
        id
    }
}

/// A child-list change observed below a watched node.
#[derive(Debug, Clone)]
pub struct MutationRecord {
    pub target: Element,
    pub added: Vec<Element>,
    pub removed: Vec<Element>,
}

struct ObserverSlot {
    target: NodeId,
    sender: mpsc::UnboundedSender<MutationRecord>,
}

pub(crate) struct DocumentInner {
    tree: RwLock<Tree>,
    observers: Mutex<Vec<ObserverSlot>>,
}

/// Handle to the page document. Clones share the same tree.
#[derive(Clone)]
pub struct Document {
    pub(crate) inner: Arc<DocumentInner>,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tree = self.read();
        f.debug_struct("Document")
            .field("location", &tree.location.as_str())
            .field("nodes", &tree.nodes.len())
            .finish()
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Document {}

impl Document {
    /// Creates an empty `<html><body></body></html>` page at the given absolute URL.
    pub fn new(location: &str) -> Result<Self, ActionError> {
        let location = Url::parse(location).map_err(|e| {
            ActionError::InvalidArgument(format!("Invalid page URL {location:?}: {e}"))
        })?;
        let mut tree = Tree {
            nodes: Vec::new(),
            root: 0,
            body: 0,
            location,
        };
        let root = tree.build(NodeSpec::new("html"));
        let body = tree.build(NodeSpec::new("body"));
        tree.nodes[body].parent = Some(root);
        tree.nodes[root].children.push(body);
        tree.root = root;
        tree.body = body;

        Ok(Self {
            inner: Arc::new(DocumentInner {
                tree: RwLock::new(tree),
                observers: Mutex::new(Vec::new()),
            }),
        })
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Tree> {
        self.inner.tree.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Tree> {
        self.inner.tree.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn element(&self, id: NodeId) -> Element {
        Element {
            document: self.clone(),
            id,
        }
    }

    pub fn location(&self) -> Url {
        self.read().location.clone()
    }

    pub fn href(&self) -> String {
        self.read().location.to_string()
    }

    /// Resolves `href` against the current location and makes it the new location.
    /// Hash-only hrefs replace the fragment, as client-side routers expect.
    pub fn navigate(&self, href: &str) -> Result<(), ActionError> {
        let mut tree = self.write();
        let next = tree
            .location
            .join(href)
            .map_err(|e| {
                ActionError::InvalidArgument(format!("Cannot navigate to {href:?}: {e}"))
            })?;
        debug!(from = %tree.location, to = %next, "Page navigated");
        tree.location = next;
        Ok(())
    }

    /// The `<html>` element.
    pub fn root(&self) -> Element {
        let root = self.read().root;
        self.element(root)
    }

    pub fn body(&self) -> Element {
        let body = self.read().body;
        self.element(body)
    }

    /// Creates a detached element.
    pub fn create_element(&self, tag: &str) -> Element {
        self.build(NodeSpec::new(tag))
    }

    /// Creates a detached subtree from a [`NodeSpec`] and returns its root.
    pub fn build(&self, spec: NodeSpec) -> Element {
        let id = self.write().build(spec);
        self.element(id)
    }

    pub fn query_selector_all(&self, selector: impl Into<Selector>) -> Vec<Element> {
        self.root().query_selector_all(selector)
    }

    pub fn query_selector(&self, selector: impl Into<Selector>) -> Option<Element> {
        self.root().query_selector(selector)
    }

    /// Text content of the body.
    pub fn text_content(&self) -> String {
        self.body().text_content()
    }

    /// Watches child-list changes anywhere below `target`.
    pub fn observe(&self, target: &Element) -> MutationObserver {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.inner
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ObserverSlot {
                target: target.id,
                sender,
            });
        MutationObserver { receiver }
    }

    pub(crate) fn notify(&self, target: NodeId, added: Vec<NodeId>, removed: Vec<NodeId>) {
        let chain = self.read().ancestors_or_self(target);
        let record = MutationRecord {
            target: self.element(target),
            added: added.into_iter().map(|id| self.element(id)).collect(),
            removed: removed.into_iter().map(|id| self.element(id)).collect(),
        };

        let mut observers = self
            .inner
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        observers.retain(|slot| {
            if !chain.contains(&slot.target) {
                return !slot.sender.is_closed();
            }
            slot.sender.send(record.clone()).is_ok()
        });
    }

    pub(crate) fn warn_invalid(selector: &Selector) {
        warn!(%selector, "Ignoring query with invalid selector");
    }
}

/// Receives batches of [`MutationRecord`]s for one observed subtree. Dropping it
/// disconnects the observer.
pub struct MutationObserver {
    receiver: mpsc::UnboundedReceiver<MutationRecord>,
}

impl MutationObserver {
    /// Waits for the next mutation and returns it together with everything else already
    /// queued. `None` once the document is gone.
    pub async fn changed(&mut self) -> Option<Vec<MutationRecord>> {
        let first = self.receiver.recv().await?;
        let mut batch = vec![first];
        batch.extend(self.take_records());
        Some(batch)
    }

    /// Drains queued records without waiting.
    pub fn take_records(&mut self) -> Vec<MutationRecord> {
        let mut batch = Vec::new();
        while let Ok(record) = self.receiver.try_recv() {
            batch.push(record);
        }
        batch
    }
}
