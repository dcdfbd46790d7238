//! Hydrated, in-memory form of a stored node.
//!
//! A [`Node`] is one concrete struct for every kind: the [`NodeKind`] tag
//! plus a kind-specific [`Payload`]. Links to other nodes are handles,
//! resolved through the store, never references.

use crate::error::{CoreError, CoreResult};
use crate::name_pool::NamePool;
use crate::record::NodeRecord;
use crate::text_pool::TextPool;
use crate::types::{Eid, NameCode, NodeKind};
use parking_lot::RwLock;
use std::sync::Arc;

/// Shared handle to a resident node.
///
/// Every holder of the same resident node sees the same object, so updates
/// the store makes in place are visible to all of them. Accessors return
/// values and never hand out a lock guard, so holding a `NodeRef` across
/// store calls cannot block the store.
pub type NodeRef = Arc<Node>;

/// One attribute of an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Attribute name.
    pub name: String,
    /// Attribute value.
    pub value: String,
}

impl Attribute {
    /// Creates an attribute.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Kind-specific content of a node.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Payload {
    /// No payload.
    #[default]
    None,
    /// Text of a text, CDATA or comment node, or the data of a processing
    /// instruction.
    Text(String),
    /// Attribute list of an element.
    Attributes(Vec<Attribute>),
}

impl Payload {
    /// Shorthand for a text payload.
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Whether this payload is [`Payload::None`].
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Checks that the payload shape suits `kind`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for a mismatch.
    pub fn check_kind(&self, kind: NodeKind) -> CoreResult<()> {
        let fits = match self {
            Self::None => true,
            Self::Text(_) => kind.carries_text(),
            Self::Attributes(_) => kind == NodeKind::Element,
        };
        if fits {
            Ok(())
        } else {
            Err(CoreError::invalid_operation(format!(
                "{kind} node cannot carry this payload"
            )))
        }
    }
}

/// A node hydrated from its record and pools.
///
/// Kind, name and handle never change while a node is resident. The
/// record and payload are refreshed by the store as the tree is edited;
/// each accessor takes a short internal lock and returns a copy.
pub struct Node {
    eid: Eid,
    kind: NodeKind,
    name: String,
    payload: RwLock<Payload>,
    record: RwLock<NodeRecord>,
}

impl Node {
    /// Handle of this node.
    #[must_use]
    pub fn eid(&self) -> Eid {
        self.eid
    }

    /// Node kind.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Element name, processing instruction target, or pseudo-name such as
    /// `#text`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kind-specific payload.
    #[must_use]
    pub fn payload(&self) -> Payload {
        self.payload.read().clone()
    }

    /// Text payload, if this node has one.
    #[must_use]
    pub fn text(&self) -> Option<String> {
        match &*self.payload.read() {
            Payload::Text(text) => Some(text.clone()),
            _ => None,
        }
    }

    /// Attributes of an element (empty for every other kind).
    #[must_use]
    pub fn attributes(&self) -> Vec<Attribute> {
        match &*self.payload.read() {
            Payload::Attributes(attrs) => attrs.clone(),
            _ => Vec::new(),
        }
    }

    /// Value of the named attribute.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<String> {
        match &*self.payload.read() {
            Payload::Attributes(attrs) => attrs
                .iter()
                .find(|a| a.name == name)
                .map(|a| a.value.clone()),
            _ => None,
        }
    }

    /// Parent handle.
    #[must_use]
    pub fn parent(&self) -> Eid {
        self.record.read().parent
    }

    /// Previous sibling handle.
    #[must_use]
    pub fn previous_sibling(&self) -> Eid {
        self.record.read().previous_sibling
    }

    /// Next sibling handle.
    #[must_use]
    pub fn next_sibling(&self) -> Eid {
        self.record.read().next_sibling
    }

    /// First child handle.
    #[must_use]
    pub fn first_child(&self) -> Eid {
        self.record.read().first_child
    }

    /// The record this node was hydrated from, as last synchronized.
    #[must_use]
    pub fn record(&self) -> NodeRecord {
        *self.record.read()
    }

    pub(crate) fn set_record(&self, record: NodeRecord) {
        *self.record.write() = record;
    }

    pub(crate) fn set_payload(&self, payload: Payload) {
        *self.payload.write() = payload;
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.eid == other.eid
            && self.kind == other.kind
            && self.name == other.name
            && self.record() == other.record()
            && self.payload() == other.payload()
    }
}

impl Eq for Node {}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("eid", &self.eid)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("payload", &self.payload())
            .field("record", &self.record())
            .finish()
    }
}

/// Builds a [`Node`] from its record, resolving name and payload.
///
/// # Errors
///
/// Returns `FreedHandle` for a free slot, `CorruptRecord` if the name code
/// or the payload cannot be resolved.
pub fn hydrate(
    eid: Eid,
    record: NodeRecord,
    names: &NamePool,
    text: &TextPool,
) -> CoreResult<Node> {
    if record.is_free() {
        return Err(CoreError::FreedHandle { eid: eid.as_u64() });
    }

    let name = names
        .name_of(record.name_code)
        .map_err(|e| CoreError::corrupt(format!("{eid}: {e}")))?
        .to_string();

    let payload = if record.text_start == 0 {
        Payload::None
    } else {
        let raw = text.read_string_at(record.text_start)?;
        match record.kind {
            NodeKind::Element => Payload::Attributes(decode_attributes(&raw, names)?),
            NodeKind::Text
            | NodeKind::CData
            | NodeKind::Comment
            | NodeKind::ProcessingInstruction => Payload::Text(raw),
            NodeKind::Document | NodeKind::Free => {
                return Err(CoreError::corrupt(format!(
                    "{eid}: {} node has a payload",
                    record.kind
                )))
            }
        }
    };

    Ok(Node {
        eid,
        kind: record.kind,
        name,
        payload: RwLock::new(payload),
        record: RwLock::new(record),
    })
}

/// Serializes an attribute list as `[[name_code, value], ...]`, interning
/// attribute names.
///
/// # Errors
///
/// Propagates name pool errors.
pub fn encode_attributes(attrs: &[Attribute], names: &mut NamePool) -> CoreResult<String> {
    let pairs = attrs
        .iter()
        .map(|a| Ok((names.code_of(&a.name)?.as_u16(), a.value.as_str())))
        .collect::<CoreResult<Vec<(u16, &str)>>>()?;
    serde_json::to_string(&pairs)
        .map_err(|e| CoreError::invalid_operation(format!("cannot encode attributes: {e}")))
}

/// Parses an attribute list written by [`encode_attributes`].
///
/// # Errors
///
/// Returns `CorruptRecord` for malformed JSON or an unknown name code.
pub fn decode_attributes(raw: &str, names: &NamePool) -> CoreResult<Vec<Attribute>> {
    let pairs: Vec<(u16, String)> = serde_json::from_str(raw)
        .map_err(|e| CoreError::corrupt(format!("malformed attribute list: {e}")))?;
    pairs
        .into_iter()
        .map(|(code, value)| {
            let name = names
                .name_of(NameCode(code))
                .map_err(|e| CoreError::corrupt(format!("attribute name: {e}")))?;
            Ok(Attribute::new(name, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dominus_storage::InMemoryBackend;

    fn pools() -> (NamePool, TextPool) {
        (
            NamePool::create(Box::new(InMemoryBackend::new())).unwrap(),
            TextPool::create(Box::new(InMemoryBackend::new()), true).unwrap(),
        )
    }

    #[test]
    fn payload_kind_checks() {
        assert!(Payload::text("x").check_kind(NodeKind::Comment).is_ok());
        assert!(Payload::text("x").check_kind(NodeKind::Element).is_err());
        assert!(Payload::Attributes(vec![])
            .check_kind(NodeKind::Text)
            .is_err());
        assert!(Payload::None.check_kind(NodeKind::Document).is_ok());
    }

    #[test]
    fn attributes_roundtrip_through_pool() {
        let (mut names, _) = pools();
        let attrs = vec![
            Attribute::new("id", "intro"),
            Attribute::new("title", "say \"hi\"\nthere"),
        ];
        let raw = encode_attributes(&attrs, &mut names).unwrap();
        assert!(!raw.contains('\n'));
        assert_eq!(decode_attributes(&raw, &names).unwrap(), attrs);
        assert_eq!(names.lookup("title"), Some(NameCode(17)));
    }

    #[test]
    fn hydrate_element_with_attributes() {
        let (mut names, mut text) = pools();
        let code = names.code_of("section").unwrap();
        let raw = encode_attributes(&[Attribute::new("id", "s1")], &mut names).unwrap();

        let mut record = NodeRecord::new(NodeKind::Element, code);
        record.text_start = text.add_string(&raw).unwrap();
        record.parent = Eid(1);

        let node = hydrate(Eid(2), record, &names, &text).unwrap();
        assert_eq!(node.name(), "section");
        assert_eq!(node.attribute("id").as_deref(), Some("s1"));
        assert_eq!(node.parent(), Eid(1));
        assert_eq!(node.text(), None);
    }

    #[test]
    fn hydrate_text_uses_pseudo_name() {
        let (names, mut text) = pools();
        let mut record = NodeRecord::new(NodeKind::Text, NameCode::TEXT);
        record.text_start = text.add_string("two\nlines").unwrap();

        let node = hydrate(Eid(3), record, &names, &text).unwrap();
        assert_eq!(node.name(), "#text");
        assert_eq!(node.text().as_deref(), Some("two\nlines"));
        assert!(node.attributes().is_empty());
    }

    #[test]
    fn hydrate_free_slot_fails() {
        let (names, text) = pools();
        let err = hydrate(Eid(4), NodeRecord::free_marker(Eid::NULL), &names, &text).unwrap_err();
        assert!(matches!(err, CoreError::FreedHandle { eid: 4 }));
    }

    #[test]
    fn hydrate_unknown_name_is_corrupt() {
        let (names, text) = pools();
        let record = NodeRecord::new(NodeKind::Element, NameCode(99));
        assert!(matches!(
            hydrate(Eid(5), record, &names, &text),
            Err(CoreError::CorruptRecord { .. })
        ));
    }
}
