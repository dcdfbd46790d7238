//! Full-store consistency check.
//!
//! Scans every slot and reports each broken tree invariant it finds instead
//! of stopping at the first one. Nothing is repaired; a store that fails
//! verification should be rebuilt from its source document.

use crate::directory::NodeDirectory;
use crate::error::CoreResult;
use crate::name_pool::{NamePool, FIRST_USER_CODE};
use crate::node::decode_attributes;
use crate::record::NodeRecord;
use crate::text_pool::TextPool;
use crate::types::{Eid, NodeKind};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// One broken invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// Node the problem was found on, if it is tied to one.
    pub eid: Option<u64>,
    /// What is wrong.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.eid {
            Some(eid) => write!(f, "eid:{eid}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Outcome of [`Store::verify`](crate::Store::verify).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    /// Slots scanned, excluding slot 0.
    pub slots: u64,
    /// Live nodes found.
    pub live_nodes: u64,
    /// Free slots found.
    pub free_slots: u64,
    /// Payloads read back successfully.
    pub payloads: u64,
    /// Every problem found.
    pub violations: Vec<Violation>,
}

impl VerifyReport {
    /// Whether no violation was found.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }

    fn flag(&mut self, eid: Eid, message: impl Into<String>) {
        self.violations.push(Violation {
            eid: Some(eid.as_u64()),
            message: message.into(),
        });
    }

    fn flag_store(&mut self, message: impl Into<String>) {
        self.violations.push(Violation {
            eid: None,
            message: message.into(),
        });
    }
}

struct Scan<'a> {
    directory: &'a NodeDirectory,
    text: &'a TextPool,
    names: &'a NamePool,
    records: Vec<Option<NodeRecord>>,
    report: VerifyReport,
}

/// Checks every record, link, payload and the free list.
///
/// # Errors
///
/// Only I/O failures are returned; everything else becomes a [`Violation`].
pub fn verify(
    directory: &NodeDirectory,
    text: &TextPool,
    names: &NamePool,
) -> CoreResult<VerifyReport> {
    let mut scan = Scan {
        directory,
        text,
        names,
        records: Vec::new(),
        report: VerifyReport::default(),
    };
    scan.load_records()?;
    scan.check_free_list();
    scan.check_root();
    scan.check_nodes()?;

    let report = scan.report;
    if report.is_ok() {
        debug!(live = report.live_nodes, "store verified");
    } else {
        warn!(violations = report.violations.len(), "store failed verification");
    }
    Ok(report)
}

impl Scan<'_> {
    fn load_records(&mut self) -> CoreResult<()> {
        let slots = self.directory.slot_count()?;
        self.records = vec![None; slots as usize];
        self.report.slots = slots.saturating_sub(1);

        for eid in self.directory.handles()? {
            match self.directory.read_record(eid) {
                Ok(record) => {
                    if record.is_free() {
                        self.report.free_slots += 1;
                    } else {
                        self.report.live_nodes += 1;
                    }
                    self.records[eid.as_u64() as usize] = Some(record);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => self.report.flag(eid, e.to_string()),
            }
        }
        Ok(())
    }

    fn live(&self, eid: Eid) -> Option<&NodeRecord> {
        self.records
            .get(eid.as_u64() as usize)
            .and_then(Option::as_ref)
            .filter(|r| !r.is_free())
    }

    fn check_free_list(&mut self) {
        match self.directory.free_slots() {
            Ok(list) => {
                if list.len() as u64 != self.report.free_slots {
                    self.report.flag_store(format!(
                        "free list holds {} slots but {} slots are free",
                        list.len(),
                        self.report.free_slots
                    ));
                }
            }
            Err(e) => self.report.flag_store(format!("free list: {e}")),
        }
    }

    fn check_root(&mut self) {
        let root = self.directory.header().root;
        if root.is_null() {
            return;
        }
        match self.live(root).copied() {
            Some(record) if record.kind == NodeKind::Document => {
                if !record.parent.is_null() {
                    self.report.flag(root, "document root has a parent");
                }
            }
            Some(record) => self
                .report
                .flag(root, format!("root is a {} node, not a document", record.kind)),
            None => self.report.flag(root, "root handle does not name a live node"),
        }
    }

    fn check_nodes(&mut self) -> CoreResult<()> {
        let limit = self.records.len();
        let mut text_owners: HashMap<u64, Eid> = HashMap::new();

        for eid in self.directory.handles()? {
            let Some(record) = self.live(eid).copied() else {
                continue;
            };

            self.check_name(eid, &record);
            self.check_payload(eid, &record, &mut text_owners)?;
            self.check_links(eid, &record);
            self.check_children(eid, &record, limit);
            self.check_ancestry(eid, &record, limit);
        }
        Ok(())
    }

    fn check_name(&mut self, eid: Eid, record: &NodeRecord) {
        let code = record.name_code;
        match record.kind.pseudo_name() {
            Some(expected) if code != expected => self.report.flag(
                eid,
                format!("{} node carries name code {}", record.kind, code.as_u16()),
            ),
            Some(_) => {}
            None => {
                if code.as_u16() < FIRST_USER_CODE {
                    self.report
                        .flag(eid, format!("{} node has no interned name", record.kind));
                } else if let Err(e) = self.names.name_of(code) {
                    self.report.flag(eid, e.to_string());
                }
            }
        }
    }

    fn check_payload(
        &mut self,
        eid: Eid,
        record: &NodeRecord,
        owners: &mut HashMap<u64, Eid>,
    ) -> CoreResult<()> {
        if record.text_start == 0 {
            return Ok(());
        }
        if !record.kind.carries_text() && record.kind != NodeKind::Element {
            self.report
                .flag(eid, format!("{} node has a payload", record.kind));
            return Ok(());
        }
        if let Some(other) = owners.insert(record.text_start, eid) {
            self.report.flag(
                eid,
                format!("text offset {} is shared with {other}", record.text_start),
            );
        }

        match self.text.read_string_at(record.text_start) {
            Ok(raw) => {
                if record.kind == NodeKind::Element {
                    if let Err(e) = decode_attributes(&raw, self.names) {
                        self.report.flag(eid, e.to_string());
                        return Ok(());
                    }
                }
                self.report.payloads += 1;
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => self.report.flag(eid, e.to_string()),
        }
        Ok(())
    }

    fn check_links(&mut self, eid: Eid, record: &NodeRecord) {
        let fields = [
            ("parent", record.parent),
            ("previous sibling", record.previous_sibling),
            ("next sibling", record.next_sibling),
            ("first child", record.first_child),
        ];
        for (what, target) in fields {
            if !target.is_null() && self.live(target).is_none() {
                self.report
                    .flag(eid, format!("{what} {target} is not a live node"));
            }
        }

        if record.parent.is_null() {
            if !record.previous_sibling.is_null() || !record.next_sibling.is_null() {
                self.report.flag(eid, "siblings without a parent");
            }
        } else if let Some(parent) = self.live(record.parent).copied() {
            if !parent.kind.is_container() {
                self.report
                    .flag(eid, format!("parent {} is a {} node", record.parent, parent.kind));
            }
            if record.previous_sibling.is_null() && parent.first_child != eid {
                self.report.flag(
                    eid,
                    format!("no previous sibling but parent's first child is {}", parent.first_child),
                );
            }
        }

        if let Some(prev) = self.live(record.previous_sibling).copied() {
            if prev.next_sibling != eid {
                self.report.flag(
                    eid,
                    format!(
                        "previous sibling {} points forward to {}",
                        record.previous_sibling, prev.next_sibling
                    ),
                );
            }
        }
        if let Some(next) = self.live(record.next_sibling).copied() {
            if next.previous_sibling != eid {
                self.report.flag(
                    eid,
                    format!(
                        "next sibling {} points back to {}",
                        record.next_sibling, next.previous_sibling
                    ),
                );
            }
        }

        if !record.kind.is_container() && !record.first_child.is_null() {
            self.report
                .flag(eid, format!("{} node has children", record.kind));
        }
    }

    fn check_children(&mut self, eid: Eid, record: &NodeRecord, limit: usize) {
        let mut seen = HashSet::new();
        let mut child = record.first_child;
        let mut position = 0u64;

        while let Some(child_record) = self.live(child).copied() {
            if !seen.insert(child) || seen.len() > limit {
                self.report.flag(eid, "child list contains a cycle");
                return;
            }
            if child_record.parent != eid {
                self.report.flag(
                    child,
                    format!("listed under {eid} but its parent is {}", child_record.parent),
                );
            }
            if let Some(ordinal) = child_record.ordinal() {
                if u64::from(ordinal) != position {
                    self.report.flag(
                        child,
                        format!("cached ordinal {ordinal} but position is {position}"),
                    );
                }
            }
            position += 1;
            child = child_record.next_sibling;
        }
    }

    fn check_ancestry(&mut self, eid: Eid, record: &NodeRecord, limit: usize) {
        let mut current = record.parent;
        let mut steps = 0;
        while let Some(ancestor) = self.live(current).copied() {
            if current == eid || steps > limit {
                self.report.flag(eid, "node is its own ancestor");
                return;
            }
            current = ancestor.parent;
            steps += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HandleWidth, NameCode};
    use dominus_storage::InMemoryBackend;

    struct Parts {
        directory: NodeDirectory,
        text: TextPool,
        names: NamePool,
    }

    impl Parts {
        fn new() -> Self {
            Self {
                directory: NodeDirectory::create(Box::new(InMemoryBackend::new()), HandleWidth::Two)
                    .unwrap(),
                text: TextPool::create(Box::new(InMemoryBackend::new()), true).unwrap(),
                names: NamePool::create(Box::new(InMemoryBackend::new())).unwrap(),
            }
        }

        fn add(&mut self, record: NodeRecord) -> Eid {
            let eid = self.directory.allocate().unwrap();
            self.directory.write_record(eid, &record).unwrap();
            eid
        }

        fn verify(&self) -> VerifyReport {
            verify(&self.directory, &self.text, &self.names).unwrap()
        }
    }

    fn linked_pair(parts: &mut Parts) -> (Eid, Eid) {
        let code = parts.names.code_of("p").unwrap();
        let parent = parts.add(NodeRecord::new(NodeKind::Element, code));
        let mut child = NodeRecord::new(NodeKind::Text, NameCode::TEXT);
        child.parent = parent;
        child.child_ordinal = 0;
        child.text_start = parts.text.add_string("hello").unwrap();
        let child = parts.add(child);

        let mut record = parts.directory.read_record(parent).unwrap();
        record.first_child = child;
        parts.directory.write_record(parent, &record).unwrap();
        (parent, child)
    }

    #[test]
    fn consistent_store_passes() {
        let mut parts = Parts::new();
        linked_pair(&mut parts);
        let spare = parts.add(NodeRecord::new(NodeKind::Comment, NameCode::COMMENT));
        parts.directory.free(spare).unwrap();

        let report = parts.verify();
        assert!(report.is_ok(), "{:?}", report.violations);
        assert_eq!(report.live_nodes, 2);
        assert_eq!(report.free_slots, 1);
        assert_eq!(report.payloads, 1);
    }

    #[test]
    fn broken_back_link_is_reported() {
        let mut parts = Parts::new();
        let (parent, child) = linked_pair(&mut parts);
        let mut record = parts.directory.read_record(parent).unwrap();
        record.first_child = Eid::NULL;
        parts.directory.write_record(parent, &record).unwrap();

        let report = parts.verify();
        assert!(!report.is_ok());
        assert!(report
            .violations
            .iter()
            .any(|v| v.eid == Some(child.as_u64())));
    }

    #[test]
    fn stale_ordinal_is_reported() {
        let mut parts = Parts::new();
        let (_, child) = linked_pair(&mut parts);
        let mut record = parts.directory.read_record(child).unwrap();
        record.child_ordinal = 3;
        parts.directory.write_record(child, &record).unwrap();

        let report = parts.verify();
        assert_eq!(report.violations.len(), 1);
        assert!(report.violations[0].message.contains("ordinal"));
    }

    #[test]
    fn root_must_be_a_document() {
        let mut parts = Parts::new();
        let (parent, _) = linked_pair(&mut parts);
        parts.directory.set_root(parent).unwrap();
        assert!(!parts.verify().is_ok());
    }
}
