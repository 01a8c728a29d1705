use std::fmt;
use std::sync::{Arc, Weak};

use tracing::debug;

use crate::document::{Document, DocumentInner, NodeId, NodeKind};
use crate::errors::ActionError;
use crate::selector::Selector;

pub type ClickListener = Arc<dyn Fn(&mut ClickEvent) + Send + Sync>;

/// Represents an element (or text node) of the page.
#[derive(Clone)]
pub struct Element {
    pub(crate) document: Document,
    pub(crate) id: NodeId,
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("id", &self.id)
            .field("tag", &self.tag_name())
            .finish()
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.document == other.document
    }
}

impl Eq for Element {}

/// Non-owning element handle, for listeners stored inside the document they point into.
#[derive(Clone)]
pub struct WeakElement {
    document: Weak<DocumentInner>,
    id: NodeId,
}

impl WeakElement {
    pub fn upgrade(&self) -> Option<Element> {
        Some(Element {
            document: Document {
                inner: self.document.upgrade()?,
            },
            id: self.id,
        })
    }
}

/// A click travelling from its target up to the document root.
pub struct ClickEvent {
    target: Element,
    current_target: Element,
    propagation_stopped: bool,
    default_prevented: bool,
}

impl ClickEvent {
    pub fn target(&self) -> &Element {
        &self.target
    }

    /// The element whose listener is currently running.
    pub fn current_target(&self) -> &Element {
        &self.current_target
    }

    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    pub fn is_propagation_stopped(&self) -> bool {
        self.propagation_stopped
    }

    pub fn is_default_prevented(&self) -> bool {
        self.default_prevented
    }
}

/// Declarative description of a subtree, used to inject controls and to build pages.
#[derive(Debug, Clone, Default)]
pub struct NodeSpec {
    pub(crate) tag: String,
    pub(crate) attributes: Vec<(String, String)>,
    pub(crate) text: Option<String>,
    pub(crate) children: Vec<NodeSpec>,
}

impl NodeSpec {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn class(self, class: impl Into<String>) -> Self {
        self.attr("class", class)
    }

    /// Text placed before any children.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn child(mut self, child: NodeSpec) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = NodeSpec>) -> Self {
        self.children.extend(children);
        self
    }
}

impl Element {
    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn downgrade(&self) -> WeakElement {
        WeakElement {
            document: Arc::downgrade(&self.document.inner),
            id: self.id,
        }
    }

    /// Lower-case tag name, `#text` for text nodes.
    pub fn tag_name(&self) -> String {
        self.document
            .read()
            .element_parts(self.id)
            .map(|(tag, _)| tag.to_string())
            .unwrap_or_else(|| "#text".to_string())
    }

    pub fn attribute(&self, name: &str) -> Option<String> {
        let tree = self.document.read();
        let (_, attributes) = tree.element_parts(self.id)?;
        attributes.get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }

    /// Attribute writes are not child-list mutations and wake no observer.
    pub fn set_attribute(&self, name: &str, value: &str) {
        let mut tree = self.document.write();
        if let NodeKind::Element { attributes, .. } = &mut tree.nodes[self.id].kind {
            attributes.insert(name.to_ascii_lowercase(), value.to_string());
        }
    }

    /// Sets `name` to `"1"` unless it is already present, under a single write lock.
    /// Returns `true` only for the caller that set it.
    pub fn mark_once(&self, name: &str) -> bool {
        let mut tree = self.document.write();
        match &mut tree.nodes[self.id].kind {
            NodeKind::Element { attributes, .. } => {
                let name = name.to_ascii_lowercase();
                if attributes.contains_key(&name) {
                    return false;
                }
                attributes.insert(name, "1".to_string());
                true
            }
            NodeKind::Text(_) => false,
        }
    }

    pub fn class_name(&self) -> String {
        self.attribute("class").unwrap_or_default()
    }

    pub fn text_content(&self) -> String {
        self.document.read().text_content(self.id)
    }

    /// Text content without the subtrees of descendants matching `skip`.
    pub fn text_content_excluding(&self, skip: &Selector) -> String {
        let mut text = String::new();
        self.document.read().text_excluding(self.id, skip, &mut text);
        text
    }

    /// Replaces all children with a single text node.
    pub fn set_text_content(&self, text: &str) {
        let (removed, added) = {
            let mut tree = self.document.write();
            if !matches!(tree.nodes[self.id].kind, NodeKind::Element { .. }) {
                tree.nodes[self.id].kind = NodeKind::Text(text.to_string());
                return;
            }
            let removed = std::mem::take(&mut tree.nodes[self.id].children);
            for child in &removed {
                tree.nodes[*child].parent = None;
            }
            let text_id = tree.push(NodeKind::Text(text.to_string()));
            tree.nodes[text_id].parent = Some(self.id);
            tree.nodes[self.id].children.push(text_id);
            (removed, vec![text_id])
        };
        self.document.notify(self.id, added, removed);
    }

    pub fn parent(&self) -> Option<Element> {
        let parent = self.document.read().nodes[self.id].parent?;
        Some(self.document.element(parent))
    }

    /// Element children, text nodes skipped.
    pub fn children(&self) -> Vec<Element> {
        let tree = self.document.read();
        tree.nodes[self.id]
            .children
            .iter()
            .filter(|c| tree.element_parts(**c).is_some())
            .map(|c| self.document.element(*c))
            .collect()
    }

    /// Appends `child`, moving it if it is already attached somewhere.
    pub fn append_child(&self, child: &Element) -> Result<(), ActionError> {
        if child.document != self.document {
            return Err(ActionError::InvalidArgument(
                "Cannot append an element from another document".to_string(),
            ));
        }
        let previous_parent = {
            let mut tree = self.document.write();
            if tree.element_parts(self.id).is_none() {
                return Err(ActionError::InvalidArgument(
                    "Cannot append children to a text node".to_string(),
                ));
            }
            if tree.ancestors_or_self(self.id).contains(&child.id) {
                return Err(ActionError::InvalidArgument(
                    "Cannot append an element to its own subtree".to_string(),
                ));
            }
            let previous_parent = tree.detach(child.id);
            tree.nodes[child.id].parent = Some(self.id);
            tree.nodes[self.id].children.push(child.id);
            previous_parent
        };
        if let Some(previous) = previous_parent {
            self.document.notify(previous, Vec::new(), vec![child.id]);
        }
        self.document.notify(self.id, vec![child.id], Vec::new());
        Ok(())
    }

    /// Builds `spec` and appends it, returning the new subtree root.
    pub fn append(&self, spec: NodeSpec) -> Result<Element, ActionError> {
        let child = self.document.build(spec);
        self.append_child(&child)?;
        Ok(child)
    }

    /// Detaches the element; a no-op when it has no parent.
    pub fn remove(&self) {
        let parent = self.document.write().detach(self.id);
        if let Some(parent) = parent {
            self.document.notify(parent, Vec::new(), vec![self.id]);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.document.read().is_connected(self.id)
    }

    pub fn matches(&self, selector: &Selector) -> bool {
        self.document.read().matches(self.id, selector)
    }

    /// Nearest ancestor-or-self matching `selector`.
    pub fn closest(&self, selector: impl Into<Selector>) -> Option<Element> {
        let selector = selector.into();
        if !selector.is_valid() {
            Document::warn_invalid(&selector);
            return None;
        }
        let tree = self.document.read();
        tree.ancestors_or_self(self.id)
            .into_iter()
            .find(|id| tree.matches(*id, &selector))
            .map(|id| self.document.element(id))
    }

    /// Matching descendants in document order.
    pub fn query_selector_all(&self, selector: impl Into<Selector>) -> Vec<Element> {
        let selector = selector.into();
        if !selector.is_valid() {
            Document::warn_invalid(&selector);
            return Vec::new();
        }
        let tree = self.document.read();
        tree.descendants(self.id)
            .into_iter()
            .filter(|id| tree.matches(*id, &selector))
            .map(|id| self.document.element(id))
            .collect()
    }

    pub fn query_selector(&self, selector: impl Into<Selector>) -> Option<Element> {
        let selector = selector.into();
        if !selector.is_valid() {
            Document::warn_invalid(&selector);
            return None;
        }
        let tree = self.document.read();
        tree.descendants(self.id)
            .into_iter()
            .find(|id| tree.matches(*id, &selector))
            .map(|id| self.document.element(id))
    }

    pub fn add_click_listener<F>(&self, listener: F)
    where
        F: Fn(&mut ClickEvent) + Send + Sync + 'static,
    {
        self.document.write().nodes[self.id]
            .listeners
            .push(Arc::new(listener));
    }

    /// Dispatches a bubbling click. Listeners run without any document lock held, so
    /// they may freely read and mutate the page. A click that is not default-prevented
    /// and lands inside an `<a href>` navigates to that link.
    pub fn click(&self) -> ClickEvent {
        let path = self.document.read().ancestors_or_self(self.id);
        let mut event = ClickEvent {
            target: self.clone(),
            current_target: self.clone(),
            propagation_stopped: false,
            default_prevented: false,
        };

        for id in path {
            let listeners: Vec<ClickListener> = self.document.read().nodes[id].listeners.clone();
            event.current_target = self.document.element(id);
            for listener in listeners {
                listener(&mut event);
            }
            if event.propagation_stopped {
                break;
            }
        }

        if !event.default_prevented {
            let link = self.closest(Selector::Compound(vec![
                Selector::Tag("a".to_string()),
                Selector::HasAttribute("href".to_string()),
            ]));
            if let Some(href) = link.and_then(|l| l.attribute("href")) {
                if let Err(e) = self.document.navigate(&href) {
                    debug!("Link activation ignored: {}", e);
                }
            }
        }

        event
    }
}
