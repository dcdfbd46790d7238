//! Store configuration.

use crate::error::{CoreError, CoreResult};
use crate::types::HandleWidth;

/// Configuration for opening a store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to error if the store already exists.
    pub error_if_exists: bool,

    /// Handle width for newly created stores. Ignored when opening an
    /// existing store, whose width comes from its header.
    pub handle_width: HandleWidth,

    /// Maximum number of hydrated nodes kept resident.
    pub cache_capacity: usize,

    /// Whether freed text chunks are overwritten with zeros.
    pub zero_fill_freed_text: bool,

    /// Whether [`Store::flush`](crate::Store::flush) also syncs every file.
    pub sync_on_flush: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            handle_width: HandleWidth::Four,
            cache_capacity: 4096,
            zero_fill_freed_text: true,
            sync_on_flush: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the store if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to error if the store exists.
    #[must_use]
    pub const fn error_if_exists(mut self, value: bool) -> Self {
        self.error_if_exists = value;
        self
    }

    /// Sets the handle width used at creation.
    #[must_use]
    pub const fn handle_width(mut self, width: HandleWidth) -> Self {
        self.handle_width = width;
        self
    }

    /// Sets the node cache capacity.
    #[must_use]
    pub const fn cache_capacity(mut self, nodes: usize) -> Self {
        self.cache_capacity = nodes;
        self
    }

    /// Sets whether freed text is zero-filled.
    #[must_use]
    pub const fn zero_fill_freed_text(mut self, value: bool) -> Self {
        self.zero_fill_freed_text = value;
        self
    }

    /// Sets whether flushing syncs to disk.
    #[must_use]
    pub const fn sync_on_flush(mut self, value: bool) -> Self {
        self.sync_on_flush = value;
        self
    }

    /// Checks the configuration for values no store can work with.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for a zero cache capacity.
    pub fn validate(&self) -> CoreResult<()> {
        if self.cache_capacity == 0 {
            return Err(CoreError::invalid_operation(
                "cache capacity must be at least one node",
            ));
        }
        Ok(())
    }
}
