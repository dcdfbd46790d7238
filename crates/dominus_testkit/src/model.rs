//! Reference tree model.
//!
//! [`TreeModel`] keeps a plain in-memory copy of the tree and applies every
//! [`TreeOp`] to both the model and a [`Store`]. The store must accept
//! exactly the operations the model accepts, reject the rest with the right
//! error class, and afterwards agree with the model node for node.

use crate::generators::TreeOp;
use dominus_core::{Attribute, CoreError, Eid, NodeKind, Payload, Store};
use std::collections::HashMap;

/// Model of one live node.
#[derive(Debug, Clone)]
pub struct ModelNode {
    /// Node kind.
    pub kind: NodeKind,
    /// Node name (pseudo-name for non-elements).
    pub name: String,
    /// Text payload.
    pub text: Option<String>,
    /// Attributes of an element.
    pub attributes: Vec<Attribute>,
    /// Parent, if linked.
    pub parent: Option<Eid>,
    /// Children in order.
    pub children: Vec<Eid>,
}

/// In-memory mirror of a store's tree.
#[derive(Debug, Default)]
pub struct TreeModel {
    order: Vec<Eid>,
    nodes: HashMap<Eid, ModelNode>,
}

impl TreeModel {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether no node is live.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Model node for `eid`.
    pub fn node(&self, eid: Eid) -> Option<&ModelNode> {
        self.nodes.get(&eid)
    }

    /// Applies `op` to the model and the store and asserts they agree.
    ///
    /// # Panics
    ///
    /// Panics when the store result differs from the model's expectation.
    pub fn apply(&mut self, store: &Store, op: &TreeOp) {
        match op {
            TreeOp::CreateElement { name, attributes } => {
                let eid = store
                    .create_element(name, attributes.clone())
                    .expect("create_element failed");
                self.insert(eid, NodeKind::Element, name, None, attributes.clone());
            }
            TreeOp::CreateText { text } => {
                let eid = store.create_text(text).expect("create_text failed");
                self.insert(eid, NodeKind::Text, "#text", Some(text.clone()), Vec::new());
            }
            TreeOp::CreateComment { text } => {
                let eid = store.create_comment(text).expect("create_comment failed");
                self.insert(eid, NodeKind::Comment, "#comment", Some(text.clone()), Vec::new());
            }
            TreeOp::Append { parent, child } => {
                let (Some(p), Some(c)) = (self.pick(*parent), self.pick(*child)) else {
                    return;
                };
                let len = self.nodes[&p].children.len();
                let expected = self.can_link(p, c);
                let result = store.append_child(p, c);
                self.expect(result, expected, "append_child", is_hierarchy);
                if expected {
                    self.link(p, c, len);
                }
            }
            TreeOp::LinkAt {
                parent,
                child,
                index,
            } => {
                let (Some(p), Some(c)) = (self.pick(*parent), self.pick(*child)) else {
                    return;
                };
                let len = self.nodes[&p].children.len();
                let index = index % (len + 2);
                let expected = self.can_link(p, c) && index <= len;
                let result = store.link_child(p, c, index);
                self.expect(result, expected, "link_child", is_hierarchy);
                if expected {
                    self.link(p, c, index);
                }
            }
            TreeOp::Unlink { node } => {
                let Some(n) = self.pick(*node) else { return };
                let expected = self.nodes[&n].parent.is_some();
                let result = store.unlink(n);
                self.expect(result, expected, "unlink", is_hierarchy);
                if expected {
                    self.detach(n);
                }
            }
            TreeOp::Free { node } => {
                let Some(n) = self.pick(*node) else { return };
                let entry = &self.nodes[&n];
                let expected = entry.parent.is_none() && entry.children.is_empty();
                let result = store.free_node(n);
                self.expect(result, expected, "free_node", |e| {
                    matches!(e, CoreError::InvalidFree { .. })
                });
                if expected {
                    self.remove(n);
                }
            }
            TreeOp::FreeSubtree { node } => {
                let Some(n) = self.pick(*node) else { return };
                if self.nodes[&n].parent.is_some() {
                    self.detach(n);
                }
                let mut doomed = vec![n];
                let mut i = 0;
                while i < doomed.len() {
                    doomed.extend(self.nodes[&doomed[i]].children.clone());
                    i += 1;
                }
                let freed = store.free_subtree(n).expect("free_subtree failed");
                assert_eq!(freed, doomed.len() as u64, "free_subtree count");
                for eid in doomed {
                    self.remove(eid);
                }
            }
            TreeOp::SetText { node, text } => {
                let Some(n) = self.pick(*node) else { return };
                let entry = self.nodes.get_mut(&n).expect("picked node is live");
                let payload = if entry.kind == NodeKind::Element {
                    entry.attributes = vec![Attribute::new("v", text.clone())];
                    Payload::Attributes(entry.attributes.clone())
                } else {
                    entry.text = Some(text.clone());
                    Payload::text(text.clone())
                };
                store.set_payload(n, payload).expect("set_payload failed");
            }
            TreeOp::Evict { node } => {
                if let Some(n) = self.pick(*node) {
                    store.evict(n).expect("evict failed");
                }
            }
            TreeOp::Ordinal { node } => {
                let Some(n) = self.pick(*node) else { return };
                let expected = self.nodes[&n].parent.map(|p| {
                    self.nodes[&p]
                        .children
                        .iter()
                        .position(|&c| c == n)
                        .expect("child listed under its parent") as u64
                });
                let actual = store.child_ordinal(n).expect("child_ordinal failed");
                assert_eq!(actual, expected, "child_ordinal of {n}");
            }
        }
    }

    /// Asserts that the store matches the model node for node and passes
    /// verification.
    ///
    /// # Panics
    ///
    /// Panics on the first difference.
    pub fn check(&self, store: &Store) {
        for &eid in &self.order {
            let expected = &self.nodes[&eid];
            let record = store.record(eid).expect("record of live node");
            assert_eq!(
                record.parent,
                expected.parent.unwrap_or(Eid::NULL),
                "parent of {eid}"
            );
            assert_eq!(
                store.children(eid).expect("children of live node"),
                expected.children,
                "children of {eid}"
            );

            let node = store.get(eid).expect("hydrate live node");
            assert_eq!(node.kind(), expected.kind, "kind of {eid}");
            assert_eq!(node.name(), expected.name, "name of {eid}");
            assert_eq!(node.text(), expected.text, "text of {eid}");
            assert_eq!(node.attributes(), expected.attributes, "attributes of {eid}");
        }

        let stats = store.stats().expect("stats");
        assert_eq!(stats.live_nodes(), self.order.len() as u64, "live node count");

        let report = store.verify().expect("verify");
        assert!(report.is_ok(), "verify found: {:?}", report.violations);
    }

    fn pick(&self, operand: usize) -> Option<Eid> {
        if self.order.is_empty() {
            None
        } else {
            Some(self.order[operand % self.order.len()])
        }
    }

    fn insert(
        &mut self,
        eid: Eid,
        kind: NodeKind,
        name: &str,
        text: Option<String>,
        attributes: Vec<Attribute>,
    ) {
        assert!(!self.nodes.contains_key(&eid), "{eid} handed out twice");
        self.order.push(eid);
        self.nodes.insert(
            eid,
            ModelNode {
                kind,
                name: name.to_string(),
                text,
                attributes,
                parent: None,
                children: Vec::new(),
            },
        );
    }

    fn can_link(&self, parent: Eid, child: Eid) -> bool {
        parent != child
            && self.nodes[&parent].kind.is_container()
            && self.nodes[&child].parent.is_none()
            && !self.is_ancestor(child, parent)
    }

    /// Whether `ancestor` lies on the parent chain of `node`.
    fn is_ancestor(&self, ancestor: Eid, node: Eid) -> bool {
        let mut current = self.nodes[&node].parent;
        while let Some(p) = current {
            if p == ancestor {
                return true;
            }
            current = self.nodes[&p].parent;
        }
        false
    }

    fn link(&mut self, parent: Eid, child: Eid, index: usize) {
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.insert(index, child);
        }
        if let Some(c) = self.nodes.get_mut(&child) {
            c.parent = Some(parent);
        }
    }

    fn detach(&mut self, node: Eid) {
        let parent = self.nodes.get_mut(&node).and_then(|n| n.parent.take());
        if let Some(p) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            p.children.retain(|&c| c != node);
        }
    }

    fn remove(&mut self, eid: Eid) {
        self.nodes.remove(&eid);
        self.order.retain(|&e| e != eid);
    }

    fn expect(
        &self,
        result: Result<(), CoreError>,
        expected: bool,
        what: &str,
        error_class: impl Fn(&CoreError) -> bool,
    ) {
        match result {
            Ok(()) => assert!(expected, "{what} succeeded but the model rejects it"),
            Err(e) => {
                assert!(!expected, "{what} failed but the model accepts it: {e}");
                assert!(error_class(&e), "{what} failed with the wrong error: {e}");
            }
        }
    }
}

fn is_hierarchy(e: &CoreError) -> bool {
    matches!(e, CoreError::Hierarchy { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestStore;

    #[test]
    fn scripted_edits_agree() {
        let store = TestStore::memory();
        let mut model = TreeModel::new();
        let ops = [
            TreeOp::CreateElement {
                name: "root".into(),
                attributes: Vec::new(),
            },
            TreeOp::CreateText { text: "a".into() },
            TreeOp::CreateText { text: "b\nc".into() },
            TreeOp::Append { parent: 0, child: 1 },
            TreeOp::LinkAt {
                parent: 0,
                child: 2,
                index: 0,
            },
            TreeOp::Ordinal { node: 1 },
            // Text nodes cannot take children.
            TreeOp::Append { parent: 1, child: 2 },
            TreeOp::Free { node: 1 },
            TreeOp::Unlink { node: 1 },
            TreeOp::Free { node: 1 },
            TreeOp::SetText {
                node: 0,
                text: "attr".into(),
            },
            TreeOp::Evict { node: 0 },
        ];
        for op in &ops {
            model.apply(&store, op);
            model.check(&store);
        }
        assert_eq!(model.len(), 2);
    }

    #[test]
    fn cycles_are_rejected_by_both() {
        let store = TestStore::memory();
        let mut model = TreeModel::new();
        for name in ["a", "b"] {
            model.apply(
                &store,
                &TreeOp::CreateElement {
                    name: name.into(),
                    attributes: Vec::new(),
                },
            );
        }
        model.apply(&store, &TreeOp::Append { parent: 0, child: 1 });
        model.apply(&store, &TreeOp::Unlink { node: 0 });
        model.apply(&store, &TreeOp::Append { parent: 1, child: 0 });
        model.check(&store);
        let handles = store.handles().unwrap();
        assert_eq!(model.node(handles[1]).unwrap().parent, Some(handles[0]));
    }
}
