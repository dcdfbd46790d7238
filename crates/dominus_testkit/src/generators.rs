//! Property-based test generators using proptest.
//!
//! Provides strategies for names, payloads, operation sequences and
//! well-formed event streams.

use dominus_core::{Attribute, BuildEvent, HandleWidth};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for generating valid element and attribute names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_.-]{0,15}").expect("Invalid regex")
}

/// Strategy for generating text payloads.
///
/// Includes newlines, control characters and non-ASCII text.
pub fn text_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("(?s).{0,48}").expect("Invalid regex")
}

/// Strategy for generating attribute lists with unique names.
pub fn attributes_strategy() -> impl Strategy<Value = Vec<Attribute>> {
    prop::collection::btree_map(name_strategy(), text_strategy(), 0..4).prop_map(
        |attrs: BTreeMap<String, String>| {
            attrs
                .into_iter()
                .map(|(name, value)| Attribute::new(name, value))
                .collect()
        },
    )
}

/// Strategy for generating a handle width.
pub fn handle_width_strategy() -> impl Strategy<Value = HandleWidth> {
    prop::sample::select(HandleWidth::ALL.to_vec())
}

/// One step of a random tree edit.
///
/// Node operands are indices into the nodes created so far and wrap around,
/// so every generated sequence is applicable.
#[derive(Debug, Clone)]
pub enum TreeOp {
    /// Create an element.
    CreateElement {
        /// Element name.
        name: String,
        /// Attributes.
        attributes: Vec<Attribute>,
    },
    /// Create a text node.
    CreateText {
        /// Text content.
        text: String,
    },
    /// Create a comment.
    CreateComment {
        /// Comment text.
        text: String,
    },
    /// Append a child.
    Append {
        /// Parent operand.
        parent: usize,
        /// Child operand.
        child: usize,
    },
    /// Insert a child at a position.
    LinkAt {
        /// Parent operand.
        parent: usize,
        /// Child operand.
        child: usize,
        /// Position operand, wrapped to the valid range plus one past it.
        index: usize,
    },
    /// Detach a node.
    Unlink {
        /// Node operand.
        node: usize,
    },
    /// Free a single node.
    Free {
        /// Node operand.
        node: usize,
    },
    /// Free a node and its descendants.
    FreeSubtree {
        /// Node operand.
        node: usize,
    },
    /// Replace a payload.
    SetText {
        /// Node operand.
        node: usize,
        /// New text (or attribute value for elements).
        text: String,
    },
    /// Drop a node from the cache.
    Evict {
        /// Node operand.
        node: usize,
    },
    /// Ask for a child ordinal.
    Ordinal {
        /// Node operand.
        node: usize,
    },
}

/// Strategy for generating tree operations.
pub fn tree_op_strategy() -> impl Strategy<Value = TreeOp> {
    let operand = || 0usize..64;
    prop_oneof![
        3 => (name_strategy(), attributes_strategy())
            .prop_map(|(name, attributes)| TreeOp::CreateElement { name, attributes }),
        3 => text_strategy().prop_map(|text| TreeOp::CreateText { text }),
        1 => text_strategy().prop_map(|text| TreeOp::CreateComment { text }),
        5 => (operand(), operand()).prop_map(|(parent, child)| TreeOp::Append { parent, child }),
        2 => (operand(), operand(), operand())
            .prop_map(|(parent, child, index)| TreeOp::LinkAt { parent, child, index }),
        2 => operand().prop_map(|node| TreeOp::Unlink { node }),
        1 => operand().prop_map(|node| TreeOp::Free { node }),
        1 => operand().prop_map(|node| TreeOp::FreeSubtree { node }),
        1 => (operand(), text_strategy()).prop_map(|(node, text)| TreeOp::SetText { node, text }),
        1 => operand().prop_map(|node| TreeOp::Evict { node }),
        1 => operand().prop_map(|node| TreeOp::Ordinal { node }),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn tree_op_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<TreeOp>> {
    prop::collection::vec(tree_op_strategy(), min_ops..max_ops)
}

/// A generated document fragment.
#[derive(Debug, Clone)]
pub enum Fragment {
    /// Text content.
    Text(String),
    /// A comment.
    Comment(String),
    /// A CDATA section.
    CData(String),
    /// An element with children.
    Element {
        /// Element name.
        name: String,
        /// Attributes.
        attributes: Vec<Attribute>,
        /// Child fragments.
        children: Vec<Fragment>,
    },
}

impl Fragment {
    /// Flattens the fragment into a well-formed event stream.
    pub fn to_events(&self, out: &mut Vec<BuildEvent>) {
        match self {
            Self::Text(text) => out.push(BuildEvent::Text(text.clone())),
            Self::Comment(text) => out.push(BuildEvent::Comment(text.clone())),
            Self::CData(text) => out.push(BuildEvent::CData(text.clone())),
            Self::Element {
                name,
                attributes,
                children,
            } => {
                out.push(BuildEvent::StartElement {
                    name: name.clone(),
                    attributes: attributes.clone(),
                });
                for child in children {
                    child.to_events(out);
                }
                out.push(BuildEvent::EndElement { name: name.clone() });
            }
        }
    }

    /// Number of nodes the fragment creates.
    pub fn node_count(&self) -> usize {
        match self {
            Self::Element { children, .. } => {
                1 + children.iter().map(Fragment::node_count).sum::<usize>()
            }
            _ => 1,
        }
    }
}

/// Strategy for generating nested fragments up to `depth` levels deep.
pub fn fragment_strategy(depth: u32) -> impl Strategy<Value = Fragment> {
    let leaf = prop_oneof![
        4 => text_strategy().prop_map(Fragment::Text),
        1 => text_strategy().prop_map(Fragment::Comment),
        1 => text_strategy().prop_map(Fragment::CData),
    ];
    leaf.prop_recursive(depth, 64, 6, |inner| {
        (
            name_strategy(),
            attributes_strategy(),
            prop::collection::vec(inner, 0..6),
        )
            .prop_map(|(name, attributes, children)| Fragment::Element {
                name,
                attributes,
                children,
            })
    })
}

/// Strategy for generating the top-level fragments of a document.
pub fn document_strategy() -> impl Strategy<Value = Vec<Fragment>> {
    prop::collection::vec(fragment_strategy(4), 1..4)
}

/// Flattens top-level fragments into one event stream.
pub fn document_events(fragments: &[Fragment]) -> Vec<BuildEvent> {
    let mut events = Vec::new();
    for fragment in fragments {
        fragment.to_events(&mut events);
    }
    events
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn names_are_internable(name in name_strategy()) {
            prop_assert!(!name.is_empty());
            prop_assert!(!name.starts_with('#'));
            prop_assert!(!name.contains('\n'));
        }

        #[test]
        fn attribute_names_are_unique(attrs in attributes_strategy()) {
            let mut names: Vec<_> = attrs.iter().map(|a| a.name.clone()).collect();
            names.dedup();
            prop_assert_eq!(names.len(), attrs.len());
        }

        #[test]
        fn fragments_produce_balanced_events(fragment in fragment_strategy(3)) {
            let mut events = Vec::new();
            fragment.to_events(&mut events);

            let mut depth = 0i64;
            for event in &events {
                match event {
                    BuildEvent::StartElement { .. } => depth += 1,
                    BuildEvent::EndElement { .. } => depth -= 1,
                    _ => {}
                }
                prop_assert!(depth >= 0);
            }
            prop_assert_eq!(depth, 0);
        }
    }
}
