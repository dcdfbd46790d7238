//! Store directory management.
//!
//! This module handles the file system layout of a store:
//!
//! ```text
//! <store_path>/
//! ├─ LOCK          # Advisory lock for single-writer
//! ├─ nodes.edir    # Node directory (header + records)
//! ├─ text.pool     # Text pool
//! ├─ text.free     # Persisted text pool free list
//! └─ names.pool    # Name pool, one name per line
//! ```
//!
//! The LOCK file ensures only one process can open the store at a time.

use crate::error::{CoreError, CoreResult};
use crate::text_pool::{decode_free_list, encode_free_list, FreeChunk};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File names within the store directory.
const LOCK_FILE: &str = "LOCK";
const NODES_FILE: &str = "nodes.edir";
const TEXT_POOL_FILE: &str = "text.pool";
const TEXT_FREE_FILE: &str = "text.free";
const NAMES_FILE: &str = "names.pool";
/// Scratch file the compactor writes before swapping it in.
const TEXT_POOL_TEMP: &str = "text.pool.tmp";

/// Manages the store directory and its lock.
///
/// Only one `StoreDir` can exist per directory at a time; the lock is
/// released when it is dropped.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens or creates a store directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - The path is not a directory
    /// - Another process holds the lock (`StoreLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_operation(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_operation(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::StoreLocked);
        }

        debug!(path = %path.display(), "locked store directory");
        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path to the node directory file.
    #[must_use]
    pub fn nodes_path(&self) -> PathBuf {
        self.path.join(NODES_FILE)
    }

    /// Returns the path to the text pool.
    #[must_use]
    pub fn text_pool_path(&self) -> PathBuf {
        self.path.join(TEXT_POOL_FILE)
    }

    /// Returns the path to the persisted free list.
    #[must_use]
    pub fn text_free_path(&self) -> PathBuf {
        self.path.join(TEXT_FREE_FILE)
    }

    /// Returns the path to the name pool.
    #[must_use]
    pub fn names_path(&self) -> PathBuf {
        self.path.join(NAMES_FILE)
    }

    /// Returns the path the compactor writes the replacement pool to.
    #[must_use]
    pub fn text_pool_temp_path(&self) -> PathBuf {
        self.path.join(TEXT_POOL_TEMP)
    }

    /// Checks if no node directory has been written here yet.
    #[must_use]
    pub fn is_new_store(&self) -> bool {
        !self.nodes_path().exists()
    }

    /// Loads the persisted text pool free list.
    ///
    /// A missing sidecar means no free chunks.
    ///
    /// # Errors
    ///
    /// Returns `Format` if the sidecar is malformed.
    pub fn load_free_list(&self) -> CoreResult<Vec<FreeChunk>> {
        let path = self.text_free_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = fs::read(&path)?;
        if data.is_empty() {
            return Ok(Vec::new());
        }
        decode_free_list(&data)
    }

    /// Saves the text pool free list atomically.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if any step of the write fails.
    pub fn save_free_list(&self, chunks: &[FreeChunk]) -> CoreResult<()> {
        self.write_atomic(TEXT_FREE_FILE, &encode_free_list(chunks))
    }

    /// Replaces the text pool with the fully written temp file.
    ///
    /// The temp file must already be synced. After the rename the directory
    /// is fsynced so the swap is durable.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the rename or directory sync fails.
    pub fn install_text_pool(&self) -> CoreResult<()> {
        fs::rename(self.text_pool_temp_path(), self.text_pool_path())?;
        self.sync_directory()?;
        debug!(path = %self.path.display(), "installed compacted text pool");
        Ok(())
    }

    /// Removes a leftover compaction temp file, if any.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file exists but cannot be removed.
    pub fn remove_text_pool_temp(&self) -> CoreResult<()> {
        let temp = self.text_pool_temp_path();
        if temp.exists() {
            fs::remove_file(&temp)?;
        }
        Ok(())
    }

    /// Write temp, sync, rename, sync directory.
    fn write_atomic(&self, name: &str, data: &[u8]) -> CoreResult<()> {
        let target = self.path.join(name);
        let temp = self.path.join(format!("{name}.tmp"));

        let mut file = File::create(&temp)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp, &target)?;
        self.sync_directory()
    }

    /// Syncs the directory so renames and creations are durable.
    ///
    /// On Windows, NTFS journaling covers metadata durability and directory
    /// handles cannot be fsynced, so this is a no-op there.
    #[cfg(unix)]
    fn sync_directory(&self) -> CoreResult<()> {
        let dir = File::open(&self.path)?;
        dir.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> CoreResult<()> {
        Ok(())
    }
}
