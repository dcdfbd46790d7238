//! Streaming tree construction.
//!
//! A parser drives a [`TreeBuilder`] with [`BuildEvent`]s. The builder owns
//! all construction state (the open element stack and the last child of each
//! open element), so several builders can run against different stores
//! without sharing anything.
//!
//! Every event appends in constant time through [`Store::insert_after`].

use crate::error::{CoreError, CoreResult};
use crate::node::{Attribute, Payload};
use crate::store::Store;
use crate::types::{Eid, NodeKind};
use tracing::debug;

/// One parse event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    /// Opening tag.
    StartElement {
        /// Element name.
        name: String,
        /// Attributes in document order.
        attributes: Vec<Attribute>,
    },
    /// Closing tag.
    EndElement {
        /// Element name; must match the innermost open element.
        name: String,
    },
    /// Character data.
    Text(String),
    /// A CDATA section.
    CData(String),
    /// A comment.
    Comment(String),
    /// A processing instruction.
    ProcessingInstruction {
        /// Instruction target.
        target: String,
        /// Instruction data.
        data: String,
    },
}

struct OpenNode {
    eid: Eid,
    name: String,
    last_child: Eid,
}

/// Builds a document in a store from parse events.
pub struct TreeBuilder<'a> {
    store: &'a Store,
    document: Eid,
    stack: Vec<OpenNode>,
    nodes: u64,
}

impl<'a> TreeBuilder<'a> {
    /// Creates the document node and registers it as the store root.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Store::create_document`] and
    /// [`Store::set_root`].
    pub fn new(store: &'a Store) -> CoreResult<Self> {
        let document = store.create_document()?;
        store.set_root(document)?;
        Ok(Self {
            store,
            document,
            stack: vec![OpenNode {
                eid: document,
                name: String::new(),
                last_child: Eid::NULL,
            }],
            nodes: 1,
        })
    }

    /// The document node being built.
    #[must_use]
    pub fn document(&self) -> Eid {
        self.document
    }

    /// Number of open elements, not counting the document.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len() - 1
    }

    /// Applies one event and returns the node it created, if any.
    ///
    /// # Errors
    ///
    /// Returns `Hierarchy` for an end tag that does not match the innermost
    /// open element, plus any store error.
    pub fn push(&mut self, event: BuildEvent) -> CoreResult<Option<Eid>> {
        let (kind, name, payload) = match event {
            BuildEvent::EndElement { name } => {
                self.close(&name)?;
                return Ok(None);
            }
            BuildEvent::StartElement { name, attributes } => {
                let payload = if attributes.is_empty() {
                    Payload::None
                } else {
                    Payload::Attributes(attributes)
                };
                (NodeKind::Element, Some(name), payload)
            }
            BuildEvent::Text(text) => (NodeKind::Text, None, Payload::Text(text)),
            BuildEvent::CData(text) => (NodeKind::CData, None, Payload::Text(text)),
            BuildEvent::Comment(text) => (NodeKind::Comment, None, Payload::Text(text)),
            BuildEvent::ProcessingInstruction { target, data } => {
                (NodeKind::ProcessingInstruction, Some(target), Payload::Text(data))
            }
        };

        let eid = self.store.create_node(kind, name.as_deref(), payload)?;
        let top = self.top_mut()?;
        let (parent, reference) = (top.eid, top.last_child);
        self.store.insert_after(parent, reference, eid)?;
        self.top_mut()?.last_child = eid;
        self.nodes += 1;

        if kind == NodeKind::Element {
            self.stack.push(OpenNode {
                eid,
                name: name.unwrap_or_default(),
                last_child: Eid::NULL,
            });
        }
        Ok(Some(eid))
    }

    /// Applies every event in order.
    ///
    /// # Errors
    ///
    /// Stops at the first failing event; see [`push`](Self::push).
    pub fn extend<I>(&mut self, events: I) -> CoreResult<()>
    where
        I: IntoIterator<Item = BuildEvent>,
    {
        for event in events {
            self.push(event)?;
        }
        Ok(())
    }

    /// Finishes the document and returns its handle.
    ///
    /// # Errors
    ///
    /// Returns `Hierarchy` if elements are still open.
    pub fn finish(self) -> CoreResult<Eid> {
        if let Some(open) = self.stack.last().filter(|_| self.stack.len() > 1) {
            return Err(CoreError::hierarchy(format!(
                "element <{}> is never closed",
                open.name
            )));
        }
        debug!(document = %self.document, nodes = self.nodes, "built document");
        Ok(self.document)
    }

    fn close(&mut self, name: &str) -> CoreResult<()> {
        if self.stack.len() < 2 {
            return Err(CoreError::hierarchy(format!(
                "end tag </{name}> without an open element"
            )));
        }
        let top = self.top_mut()?;
        if top.name != name {
            return Err(CoreError::hierarchy(format!(
                "end tag </{name}> does not match <{}>",
                top.name
            )));
        }
        self.stack.pop();
        Ok(())
    }

    fn top_mut(&mut self) -> CoreResult<&mut OpenNode> {
        self.stack
            .last_mut()
            .ok_or_else(|| CoreError::invalid_operation("builder has no open node"))
    }
}

impl std::fmt::Debug for TreeBuilder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeBuilder")
            .field("document", &self.document)
            .field("depth", &self.depth())
            .field("nodes", &self.nodes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(name: &str) -> BuildEvent {
        BuildEvent::StartElement {
            name: name.to_string(),
            attributes: Vec::new(),
        }
    }

    fn end(name: &str) -> BuildEvent {
        BuildEvent::EndElement {
            name: name.to_string(),
        }
    }

    #[test]
    fn builds_nested_document() {
        let store = Store::open_in_memory().unwrap();
        let mut builder = TreeBuilder::new(&store).unwrap();
        builder
            .extend([
                BuildEvent::ProcessingInstruction {
                    target: "xml-stylesheet".into(),
                    data: "href=\"a.css\"".into(),
                },
                BuildEvent::StartElement {
                    name: "book".into(),
                    attributes: vec![Attribute::new("lang", "en")],
                },
                start("title"),
                BuildEvent::Text("Dominus".into()),
                end("title"),
                BuildEvent::Comment("chapters follow".into()),
                start("chapter"),
                BuildEvent::CData("<code/>".into()),
                end("chapter"),
                end("book"),
            ])
            .unwrap();
        let doc = builder.finish().unwrap();

        assert_eq!(store.root(), Some(doc));
        let top = store.children(doc).unwrap();
        assert_eq!(top.len(), 2);
        let book = store.get(top[1]).unwrap();
        assert_eq!(book.name(), "book");
        assert_eq!(book.attribute("lang").as_deref(), Some("en"));

        let chapters = store.children(top[1]).unwrap();
        assert_eq!(chapters.len(), 3);
        let title_text = store.children(chapters[0]).unwrap()[0];
        assert_eq!(store.get(title_text).unwrap().text().as_deref(), Some("Dominus"));
        assert_eq!(store.child_ordinal(chapters[2]).unwrap(), Some(2));
        assert!(store.verify().unwrap().is_ok());
    }

    #[test]
    fn mismatched_end_tag_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        let mut builder = TreeBuilder::new(&store).unwrap();
        builder.push(start("a")).unwrap();
        assert!(matches!(
            builder.push(end("b")),
            Err(CoreError::Hierarchy { .. })
        ));
        assert_eq!(builder.depth(), 1);
    }

    #[test]
    fn stray_end_tag_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        let mut builder = TreeBuilder::new(&store).unwrap();
        assert!(matches!(
            builder.push(end("a")),
            Err(CoreError::Hierarchy { .. })
        ));
    }

    #[test]
    fn unclosed_element_fails_finish() {
        let store = Store::open_in_memory().unwrap();
        let mut builder = TreeBuilder::new(&store).unwrap();
        builder.push(start("open")).unwrap();
        assert!(matches!(builder.finish(), Err(CoreError::Hierarchy { .. })));
    }

    #[test]
    fn text_events_return_their_nodes() {
        let store = Store::open_in_memory().unwrap();
        let mut builder = TreeBuilder::new(&store).unwrap();
        let text = builder.push(BuildEvent::Text("top".into())).unwrap().unwrap();
        assert!(builder.push(start("x")).unwrap().is_some());
        assert_eq!(builder.push(end("x")).unwrap(), None);
        assert_eq!(store.record(text).unwrap().parent, builder.document());
    }
}
