//! Name interning table.
//!
//! The pool file holds one name per line in assignment order; the name on
//! line `i` has code `FIRST_USER_CODE + i`. Codes below [`FIRST_USER_CODE`]
//! are reserved for pseudo-names that every store understands without
//! loading its pool. Entries are never removed or renumbered.

use crate::error::{CoreError, CoreResult};
use crate::types::NameCode;
use dominus_storage::StorageBackend;
use std::collections::HashMap;
use tracing::{debug, trace, warn};

/// First code handed out to an ordinary name.
pub const FIRST_USER_CODE: u16 = 16;

/// Pseudo-names bound to fixed codes.
pub const RESERVED_NAMES: [(NameCode, &str); 5] = [
    (NameCode::TEXT, "#text"),
    (NameCode::CDATA, "#cdata-section"),
    (NameCode::COMMENT, "#comment"),
    (NameCode::DOCUMENT, "#document"),
    (NameCode::PROCESSING_INSTRUCTION, "#processing-instruction"),
];

const NEAR_FULL: usize = 60_000;

/// Returns the pseudo-name bound to a reserved code.
#[must_use]
pub fn reserved_name(code: NameCode) -> Option<&'static str> {
    RESERVED_NAMES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

fn reserved_code(name: &str) -> Option<NameCode> {
    RESERVED_NAMES
        .iter()
        .find(|(_, n)| *n == name)
        .map(|(code, _)| *code)
}

/// Append-only bidirectional map between names and codes.
pub struct NamePool {
    backend: Box<dyn StorageBackend>,
    names: Vec<String>,
    codes: HashMap<String, NameCode>,
}

impl NamePool {
    /// Initializes an empty pool on `backend`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the backend is not empty.
    pub fn create(backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        if backend.size()? != 0 {
            return Err(CoreError::invalid_operation(
                "cannot create a name pool over existing data",
            ));
        }
        Ok(Self {
            backend,
            names: Vec::new(),
            codes: HashMap::new(),
        })
    }

    /// Loads every name from an existing pool file.
    ///
    /// # Errors
    ///
    /// Returns `CorruptRecord` for an unterminated last line, invalid UTF-8
    /// or a duplicate name, and `Format` if the file holds more names than
    /// codes exist.
    pub fn open(backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        let size = backend.size()?;
        let data = backend.read_at(0, size as usize)?;

        if data.last().is_some_and(|&b| b != b'\n') {
            return Err(CoreError::corrupt("name pool ends with an unterminated name"));
        }

        let text = std::str::from_utf8(&data)
            .map_err(|e| CoreError::corrupt(format!("name pool is not UTF-8: {e}")))?;

        let mut names = Vec::new();
        let mut codes = HashMap::new();
        for name in text.split_terminator('\n') {
            let code = u16::try_from(names.len())
                .ok()
                .and_then(|i| i.checked_add(FIRST_USER_CODE))
                .ok_or_else(|| CoreError::format("name pool holds more names than codes"))?;
            if codes.insert(name.to_string(), NameCode(code)).is_some() {
                return Err(CoreError::corrupt(format!("duplicate name {name:?}")));
            }
            names.push(name.to_string());
        }

        debug!(names = names.len(), "opened name pool");
        Ok(Self {
            backend,
            names,
            codes,
        })
    }

    /// Returns the code for `name`, assigning the next one if unseen.
    ///
    /// New names are appended to the pool file immediately.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for an empty name, one containing a
    /// newline, or an unbound `#` pseudo-name, and `Allocation` once every
    /// code is taken.
    pub fn code_of(&mut self, name: &str) -> CoreResult<NameCode> {
        if let Some(code) = self.lookup(name) {
            return Ok(code);
        }

        if name.is_empty() || name.contains('\n') || name.starts_with('#') {
            return Err(CoreError::invalid_operation(format!(
                "{name:?} cannot be interned"
            )));
        }

        let code = u16::try_from(self.names.len())
            .ok()
            .and_then(|i| i.checked_add(FIRST_USER_CODE))
            .ok_or_else(|| CoreError::allocation("name codes exhausted"))?;

        let mut line = Vec::with_capacity(name.len() + 1);
        line.extend_from_slice(name.as_bytes());
        line.push(b'\n');
        self.backend
            .append(&line)
            .map_err(|e| CoreError::from_growth("name pool", e))?;

        self.names.push(name.to_string());
        self.codes.insert(name.to_string(), NameCode(code));
        trace!(name, code, "interned name");
        if self.names.len() == NEAR_FULL {
            warn!(names = NEAR_FULL, "name pool is close to running out of codes");
        }

        Ok(NameCode(code))
    }

    /// Returns the code for `name` without assigning one.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<NameCode> {
        reserved_code(name).or_else(|| self.codes.get(name).copied())
    }

    /// Returns the name bound to `code`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownNameCode` if the code was never assigned.
    pub fn name_of(&self, code: NameCode) -> CoreResult<&str> {
        if let Some(name) = reserved_name(code) {
            return Ok(name);
        }
        code.as_u16()
            .checked_sub(FIRST_USER_CODE)
            .and_then(|i| self.names.get(usize::from(i)))
            .map(String::as_str)
            .ok_or(CoreError::UnknownNameCode {
                code: code.as_u16(),
            })
    }

    /// Number of interned (non-reserved) names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no ordinary name has been interned yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Iterates over interned names in assignment order.
    pub fn iter(&self) -> impl Iterator<Item = (NameCode, &str)> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, name)| (NameCode(FIRST_USER_CODE + i as u16), name.as_str()))
    }

    /// Flushes pending writes.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the flush fails.
    pub fn flush(&mut self) -> CoreResult<()> {
        self.backend.flush()?;
        Ok(())
    }

    /// Syncs the pool to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the sync fails.
    pub fn sync(&mut self) -> CoreResult<()> {
        self.backend.sync()?;
        Ok(())
    }
}

impl std::fmt::Debug for NamePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamePool")
            .field("names", &self.names.len())
            .finish()
    }
}
