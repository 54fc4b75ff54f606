//! Synthetic document tree.
//!
//! The runtime augments a host page it does not own. [`Document`] models that
//! page: a shared arena of element nodes with tags, ids, classes and
//! attributes, owned by whoever plays the host (the demo binary, tests, or an
//! embedder). Every structural mutation that touches the connected tree is
//! announced as one [`MutationBatch`] on a broadcast channel. That channel is
//! the only signal the observer multiplexer and the element cache consume;
//! they never poll the tree.
//!
//! A removal batch lists the entire detached subtree, so consumers can test
//! membership directly instead of re-walking ancestor chains that no longer
//! exist.

pub mod selector;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tokio::sync::broadcast;

pub use selector::{Selector, SelectorError};
use selector::SimpleSelector;

/// Buffered mutation batches per subscriber before lagging.
pub const MUTATION_CHANNEL_CAPACITY: usize = 256;

/// Opaque handle to one element node. Never reused within a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

/// One coalesced notification of tree changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationBatch {
    /// Nodes newly connected to the tree (attached subtree, preorder).
    pub added: Vec<NodeId>,
    /// Nodes disconnected from the tree (detached subtree, preorder).
    pub removed: Vec<NodeId>,
}

impl MutationBatch {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Errors from structural document operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomError {
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),

    #[error("node {0:?} is already attached to a parent")]
    AlreadyAttached(NodeId),

    #[error("attaching {child:?} under {parent:?} would create a cycle")]
    WouldCycle { parent: NodeId, child: NodeId },

    #[error("the document root cannot be removed")]
    RootRemoval,
}

#[derive(Debug)]
struct NodeData {
    tag: String,
    element_id: Option<String>,
    classes: BTreeSet<String>,
    attributes: BTreeMap<String, String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl NodeData {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            element_id: None,
            classes: BTreeSet::new(),
            attributes: BTreeMap::new(),
            parent: None,
            children: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct TreeInner {
    nodes: HashMap<NodeId, NodeData>,
    root: NodeId,
    next_id: u64,
}

impl TreeInner {
    fn node(&self, id: NodeId) -> Result<&NodeData, DomError> {
        self.nodes.get(&id).ok_or(DomError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeData, DomError> {
        self.nodes.get_mut(&id).ok_or(DomError::UnknownNode(id))
    }

    fn is_connected(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == self.root {
                return true;
            }
            current = self.nodes.get(&node).and_then(|data| data.parent);
        }
        false
    }

    /// Preorder node ids of the subtree rooted at `id` (inclusive).
    fn collect_subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            out.push(node);
            if let Some(data) = self.nodes.get(&node) {
                // push in reverse so children come off the stack in order
                for child in data.children.iter().rev() {
                    stack.push(*child);
                }
            }
        }
        out
    }

    fn simple_matches(&self, id: NodeId, part: &SimpleSelector) -> bool {
        let Some(data) = self.nodes.get(&id) else {
            return false;
        };
        if let Some(tag) = &part.tag {
            if &data.tag != tag {
                return false;
            }
        }
        if let Some(want) = &part.id {
            if data.element_id.as_ref() != Some(want) {
                return false;
            }
        }
        if !part.classes.iter().all(|c| data.classes.contains(c)) {
            return false;
        }
        part.attrs.iter().all(|attr| match &attr.value {
            Some(value) => data.attributes.get(&attr.name) == Some(value),
            None => data.attributes.contains_key(&attr.name),
        })
    }

    fn selector_matches(&self, id: NodeId, selector: &Selector) -> bool {
        let Some((target, rest)) = selector.parts().split_last() else {
            return false;
        };
        if !self.simple_matches(id, target) {
            return false;
        }

        // Greedy right-to-left ancestor matching for descendant combinators
        let mut pending = rest.iter().rev().peekable();
        let mut current = self.nodes.get(&id).and_then(|data| data.parent);
        while let Some(ancestor) = current {
            let Some(part) = pending.peek() else { break };
            if self.simple_matches(ancestor, part) {
                pending.next();
            }
            current = self.nodes.get(&ancestor).and_then(|data| data.parent);
        }
        pending.peek().is_none()
    }

    /// Preorder descendants of `context` (exclusive) matching `selector`.
    fn query(&self, selector: &Selector, context: NodeId, first_only: bool) -> Vec<NodeId> {
        let mut out = Vec::new();
        let Some(data) = self.nodes.get(&context) else {
            return out;
        };
        let mut stack: Vec<NodeId> = data.children.iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            if self.selector_matches(node, selector) {
                out.push(node);
                if first_only {
                    return out;
                }
            }
            if let Some(child_data) = self.nodes.get(&node) {
                for child in child_data.children.iter().rev() {
                    stack.push(*child);
                }
            }
        }
        out
    }
}

/// Shared handle to the synthetic document tree.
///
/// Cheap to clone; all clones observe the same tree. Reads take a shared
/// lock, mutations an exclusive one, and mutation batches are broadcast after
/// the lock is released.
#[derive(Debug, Clone)]
pub struct Document {
    inner: Arc<RwLock<TreeInner>>,
    mutations: broadcast::Sender<MutationBatch>,
}

impl Document {
    /// Create a document containing only the root ("body") node.
    pub fn new() -> Self {
        let root = NodeId(0);
        let mut nodes = HashMap::new();
        nodes.insert(root, NodeData::new("body"));
        let (mutations, _) = broadcast::channel(MUTATION_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(RwLock::new(TreeInner {
                nodes,
                root,
                next_id: 1,
            })),
            mutations,
        }
    }

    pub fn root(&self) -> NodeId {
        self.inner.read().unwrap().root
    }

    /// Subscribe to mutation batches. Only batches that touch the connected
    /// tree are delivered.
    pub fn subscribe(&self) -> broadcast::Receiver<MutationBatch> {
        self.mutations.subscribe()
    }

    fn emit(&self, batch: MutationBatch) {
        if !batch.is_empty() {
            // Ignore send errors - it's OK if no one is listening
            let _ = self.mutations.send(batch);
        }
    }

    /// Create a detached element. No batch is emitted until it is attached.
    pub fn create_element(&self, tag: &str) -> NodeId {
        let mut inner = self.inner.write().unwrap();
        let id = NodeId(inner.next_id);
        inner.next_id += 1;
        inner.nodes.insert(id, NodeData::new(tag));
        id
    }

    /// Attach `child` (and its subtree) as the last child of `parent`.
    pub fn append_child(&self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        let batch = {
            let mut inner = self.inner.write().unwrap();
            inner.node(parent)?;
            if inner.node(child)?.parent.is_some() {
                return Err(DomError::AlreadyAttached(child));
            }
            if parent == child || inner.collect_subtree(child).contains(&parent) {
                return Err(DomError::WouldCycle { parent, child });
            }

            inner.node_mut(child)?.parent = Some(parent);
            inner.node_mut(parent)?.children.push(child);

            if inner.is_connected(parent) {
                MutationBatch {
                    added: inner.collect_subtree(child),
                    removed: Vec::new(),
                }
            } else {
                MutationBatch::default()
            }
        };
        self.emit(batch);
        Ok(())
    }

    /// Detach and delete `node` and its entire subtree.
    pub fn remove(&self, node: NodeId) -> Result<(), DomError> {
        let batch = {
            let mut inner = self.inner.write().unwrap();
            if node == inner.root {
                return Err(DomError::RootRemoval);
            }
            let parent = inner.node(node)?.parent;
            let was_connected = inner.is_connected(node);

            if let Some(parent) = parent {
                if let Ok(data) = inner.node_mut(parent) {
                    data.children.retain(|c| *c != node);
                }
            }
            let subtree = inner.collect_subtree(node);
            for id in &subtree {
                inner.nodes.remove(id);
            }

            if was_connected {
                MutationBatch {
                    added: Vec::new(),
                    removed: subtree,
                }
            } else {
                MutationBatch::default()
            }
        };
        self.emit(batch);
        Ok(())
    }

    /// Whether `node` exists and is attached to the root.
    pub fn contains(&self, node: NodeId) -> bool {
        let inner = self.inner.read().unwrap();
        inner.nodes.contains_key(&node) && inner.is_connected(node)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.inner.read().unwrap().nodes.get(&node)?.parent
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.inner
            .read()
            .unwrap()
            .nodes
            .get(&node)
            .map(|data| data.children.clone())
            .unwrap_or_default()
    }

    pub fn tag(&self, node: NodeId) -> Option<String> {
        Some(self.inner.read().unwrap().nodes.get(&node)?.tag.clone())
    }

    pub fn set_id(&self, node: NodeId, id: &str) -> Result<(), DomError> {
        self.inner.write().unwrap().node_mut(node)?.element_id = Some(id.to_string());
        Ok(())
    }

    pub fn element_id(&self, node: NodeId) -> Option<String> {
        self.inner
            .read()
            .unwrap()
            .nodes
            .get(&node)?
            .element_id
            .clone()
    }

    pub fn set_attribute(&self, node: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        self.inner
            .write()
            .unwrap()
            .node_mut(node)?
            .attributes
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        self.inner
            .read()
            .unwrap()
            .nodes
            .get(&node)?
            .attributes
            .get(name)
            .cloned()
    }

    pub fn remove_attribute(&self, node: NodeId, name: &str) -> Result<(), DomError> {
        self.inner
            .write()
            .unwrap()
            .node_mut(node)?
            .attributes
            .remove(name);
        Ok(())
    }

    pub fn add_class(&self, node: NodeId, class: &str) -> Result<(), DomError> {
        self.inner
            .write()
            .unwrap()
            .node_mut(node)?
            .classes
            .insert(class.to_string());
        Ok(())
    }

    pub fn remove_class(&self, node: NodeId, class: &str) -> Result<(), DomError> {
        self.inner
            .write()
            .unwrap()
            .node_mut(node)?
            .classes
            .remove(class);
        Ok(())
    }

    pub fn toggle_class(&self, node: NodeId, class: &str, on: bool) -> Result<(), DomError> {
        if on {
            self.add_class(node, class)
        } else {
            self.remove_class(node, class)
        }
    }

    pub fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.inner
            .read()
            .unwrap()
            .nodes
            .get(&node)
            .is_some_and(|data| data.classes.contains(class))
    }

    /// First matching descendant of the root, in document order.
    pub fn query_selector(&self, selector: &Selector) -> Option<NodeId> {
        let inner = self.inner.read().unwrap();
        inner
            .query(selector, inner.root, true)
            .into_iter()
            .next()
    }

    /// First matching descendant of `context`, in document order.
    pub fn query_selector_in(&self, selector: &Selector, context: NodeId) -> Option<NodeId> {
        let inner = self.inner.read().unwrap();
        inner.query(selector, context, true).into_iter().next()
    }

    /// All matching descendants of the root, in document order.
    pub fn query_selector_all(&self, selector: &Selector) -> Vec<NodeId> {
        let inner = self.inner.read().unwrap();
        inner.query(selector, inner.root, false)
    }

    /// All matching descendants of `context`, in document order.
    pub fn query_selector_all_in(&self, selector: &Selector, context: NodeId) -> Vec<NodeId> {
        let inner = self.inner.read().unwrap();
        inner.query(selector, context, false)
    }

    /// Total number of live nodes, attached or not.
    pub fn node_count(&self) -> usize {
        self.inner.read().unwrap().nodes.len()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sel(text: &str) -> Selector {
        Selector::parse(text).unwrap()
    }

    /// body > #feed(.feed) > [item.video, item.shorts-shelf]
    fn fixture() -> (Document, NodeId, NodeId, NodeId) {
        let doc = Document::new();
        let feed = doc.create_element("div");
        doc.set_id(feed, "feed").unwrap();
        doc.add_class(feed, "feed").unwrap();
        let video = doc.create_element("item");
        doc.add_class(video, "video").unwrap();
        let shelf = doc.create_element("item");
        doc.add_class(shelf, "shorts-shelf").unwrap();
        doc.append_child(doc.root(), feed).unwrap();
        doc.append_child(feed, video).unwrap();
        doc.append_child(feed, shelf).unwrap();
        (doc, feed, video, shelf)
    }

    #[test]
    fn test_structure_and_contains() {
        let (doc, feed, video, shelf) = fixture();
        assert!(doc.contains(feed));
        assert!(doc.contains(video));
        assert_eq!(doc.parent(video), Some(feed));
        assert_eq!(doc.children(feed), vec![video, shelf]);

        doc.remove(feed).unwrap();
        assert!(!doc.contains(feed));
        assert!(!doc.contains(video));
        // removed subtree nodes are deleted outright
        assert_eq!(doc.node_count(), 1);
    }

    #[test]
    fn test_detached_nodes_are_not_contained() {
        let doc = Document::new();
        let orphan = doc.create_element("div");
        assert!(!doc.contains(orphan));

        doc.append_child(doc.root(), orphan).unwrap();
        assert!(doc.contains(orphan));
    }

    #[test]
    fn test_append_errors() {
        let doc = Document::new();
        let a = doc.create_element("div");
        let b = doc.create_element("div");
        doc.append_child(a, b).unwrap();

        assert_eq!(
            doc.append_child(doc.root(), b),
            Err(DomError::AlreadyAttached(b))
        );
        assert_eq!(
            doc.append_child(b, a),
            Err(DomError::WouldCycle { parent: b, child: a })
        );
        assert_eq!(doc.remove(doc.root()), Err(DomError::RootRemoval));
    }

    #[test]
    fn test_query_selector_variants() {
        let (doc, feed, video, shelf) = fixture();

        assert_eq!(doc.query_selector(&sel("#feed")), Some(feed));
        assert_eq!(doc.query_selector(&sel("item.video")), Some(video));
        assert_eq!(doc.query_selector(&sel(".feed .shorts-shelf")), Some(shelf));
        assert_eq!(doc.query_selector(&sel(".missing")), None);
        assert_eq!(doc.query_selector_all(&sel("item")), vec![video, shelf]);
        // scoped query excludes the context node itself
        assert_eq!(doc.query_selector_all_in(&sel(".feed"), feed), Vec::new());
        assert_eq!(doc.query_selector_in(&sel(".video"), feed), Some(video));
    }

    #[test]
    fn test_attribute_matching() {
        let doc = Document::new();
        let node = doc.create_element("div");
        doc.set_attribute(node, "data-kind", "short").unwrap();
        doc.append_child(doc.root(), node).unwrap();

        assert_eq!(doc.query_selector(&sel("[data-kind]")), Some(node));
        assert_eq!(doc.query_selector(&sel("[data-kind=short]")), Some(node));
        assert_eq!(doc.query_selector(&sel("[data-kind=long]")), None);
    }

    #[test]
    fn test_mutation_batches() {
        let doc = Document::new();
        let mut rx = doc.subscribe();

        let parent = doc.create_element("div");
        let child = doc.create_element("span");
        doc.append_child(parent, child).unwrap();
        // attaching under a detached parent emits nothing
        assert!(rx.try_recv().is_err());

        doc.append_child(doc.root(), parent).unwrap();
        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.added, vec![parent, child]);
        assert!(batch.removed.is_empty());

        doc.remove(parent).unwrap();
        let batch = rx.try_recv().unwrap();
        assert!(batch.added.is_empty());
        assert_eq!(batch.removed, vec![parent, child]);
    }

    #[test]
    fn test_class_toggling() {
        let doc = Document::new();
        let root = doc.root();
        doc.toggle_class(root, "graft-theme", true).unwrap();
        assert!(doc.has_class(root, "graft-theme"));
        doc.toggle_class(root, "graft-theme", false).unwrap();
        assert!(!doc.has_class(root, "graft-theme"));
    }
}
