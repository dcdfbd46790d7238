//! # Dominus Core
//!
//! Disk-resident DOM node store.
//!
//! A document lives in three files: a node directory of fixed-size records
//! (the EDir), a text pool of newline-terminated payloads, and a name pool of
//! interned element and attribute names. Nodes refer to each other only by
//! [`Eid`] handles; a bounded cache hydrates them on demand.
//!
//! This crate provides:
//! - Record and header codecs for 2, 4 or 8 byte handles
//! - Slot allocation with an on-disk free list
//! - Text and name pools
//! - A demand-paged node cache with LRU eviction
//! - The [`Store`] facade for creating, linking and freeing nodes
//! - Streaming construction through [`TreeBuilder`]
//! - Offline text pool compaction and a consistency checker
//!
//! ## Example
//!
//! ```rust
//! use dominus_core::{Attribute, Store};
//!
//! let store = Store::open_in_memory().unwrap();
//! let doc = store.create_document().unwrap();
//! store.set_root(doc).unwrap();
//!
//! let link = store
//!     .create_element("a", vec![Attribute::new("href", "/home")])
//!     .unwrap();
//! store.append_child(doc, link).unwrap();
//!
//! let node = store.get(link).unwrap();
//! assert_eq!(node.attribute("href").as_deref(), Some("/home"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod builder;
pub mod cache;
pub mod compaction;
mod config;
pub mod dir;
pub mod directory;
mod error;
pub mod header;
pub mod name_pool;
mod node;
pub mod record;
mod stats;
mod store;
pub mod text_pool;
mod types;
pub mod verify;

pub use builder::{BuildEvent, TreeBuilder};
pub use compaction::CompactionResult;
pub use config::Config;
pub use dir::StoreDir;
pub use error::{CoreError, CoreResult};
pub use header::StoreHeader;
pub use node::{decode_attributes, encode_attributes, hydrate, Attribute, Node, NodeRef, Payload};
pub use record::{NodeRecord, ORDINAL_UNKNOWN};
pub use stats::{StatsSnapshot, StoreStats};
pub use store::Store;
pub use text_pool::FreeChunk;
pub use types::{Eid, HandleWidth, NameCode, NodeKind};
pub use verify::{VerifyReport, Violation};

/// Crate version, stamped into `inspect` output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
