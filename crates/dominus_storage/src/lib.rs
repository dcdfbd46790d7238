//! # Dominus Storage
//!
//! Byte-store backends underneath the Dominus node store.
//!
//! The node directory, text pool and name pool are all laid out by
//! `dominus_core`; a backend only moves bytes. It never interprets headers,
//! records or payload framing.
//!
//! ## Contract
//!
//! - `append` grows the store and returns the offset written at
//! - `write_at` overwrites bytes in place (records and headers are mutable)
//! - `read_at` returns exactly the bytes last written at that range
//! - `flush` / `sync` push data towards durable storage
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and throwaway stores
//! - [`FileBackend`] - For persistent stores using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use dominus_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"<doc/>").unwrap();
//! backend.write_at(offset + 1, b"DOC").unwrap();
//! assert_eq!(backend.read_at(offset, 6).unwrap(), b"<DOC/>");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
