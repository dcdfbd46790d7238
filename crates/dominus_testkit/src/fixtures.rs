//! Test fixtures and store helpers.
//!
//! Provides convenience functions for setting up test stores
//! and common document shapes.

use dominus_core::{Config, CoreResult, Store};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A test store with automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub store: Store,
    /// Store directory, for file-backed stores.
    path: Option<PathBuf>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates a new in-memory test store.
    pub fn memory() -> Self {
        Self::memory_with_config(Config::default())
    }

    /// Creates a new in-memory test store with custom configuration.
    pub fn memory_with_config(config: Config) -> Self {
        Self {
            store: Store::open_in_memory_with_config(config)
                .expect("Failed to open in-memory store"),
            path: None,
            _temp_dir: None,
        }
    }

    /// Creates a new file-backed test store in a temporary directory.
    pub fn file() -> Self {
        Self::file_with_config(Config::default())
    }

    /// Creates a new file-backed test store with custom configuration.
    pub fn file_with_config(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("test.dominus");
        let store = Store::open_with_config(&path, config).expect("Failed to open file store");

        Self {
            store,
            path: Some(path),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the store path if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Closes the store and opens it again from disk.
    ///
    /// # Panics
    ///
    /// Panics for in-memory stores, which do not survive a close.
    pub fn reopen(self) -> CoreResult<Self> {
        let Self {
            store,
            path,
            _temp_dir,
        } = self;
        let path = path.expect("only file-backed stores can be reopened");
        let config = store.config().clone().create_if_missing(false);
        store.close()?;
        drop(store);

        Ok(Self {
            store: Store::open_with_config(&path, config)?,
            path: Some(path),
            _temp_dir,
        })
    }
}

impl std::ops::Deref for TestStore {
    type Target = Store;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Runs a test with a temporary in-memory store.
///
/// # Example
///
/// ```rust,ignore
/// use dominus_testkit::with_temp_store;
///
/// #[test]
/// fn my_test() {
///     with_temp_store(|store| {
///         let doc = store.create_document().unwrap();
///         // ... test operations
///     });
/// }
/// ```
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&Store) -> R,
{
    let test_store = TestStore::memory();
    f(&test_store.store)
}

/// Runs a test with a temporary file-backed store.
pub fn with_file_store<F, R>(f: F) -> R
where
    F: FnOnce(&Store, &Path) -> R,
{
    let test_store = TestStore::file();
    let path = test_store
        .path()
        .expect("File store should have a path")
        .to_path_buf();
    f(&test_store.store, &path)
}

/// Document shape helpers.
pub mod scenarios {
    use dominus_core::{Attribute, BuildEvent, Eid, Store, TreeBuilder};

    /// Handles of the document built by [`sample_tree`].
    #[derive(Debug, Clone)]
    pub struct SampleTree {
        /// The document node (also the store root).
        pub document: Eid,
        /// The `<html>` element.
        pub html: Eid,
        /// The `<body>` element.
        pub body: Eid,
        /// The `<p>` elements in order.
        pub paragraphs: Vec<Eid>,
    }

    /// Builds a small XHTML-like document with `paragraphs` paragraphs.
    ///
    /// ```text
    /// #document
    /// ├─ <?xml-stylesheet href="style.css"?>
    /// └─ <html lang="en">
    ///    ├─ <!-- generated -->
    ///    └─ <body>
    ///       └─ <p id="p{i}">paragraph {i}</p> ...
    /// ```
    pub fn sample_tree(store: &Store, paragraphs: usize) -> SampleTree {
        let mut builder = TreeBuilder::new(store).expect("Failed to start document");
        let document = builder.document();

        builder
            .push(BuildEvent::ProcessingInstruction {
                target: "xml-stylesheet".into(),
                data: "href=\"style.css\"".into(),
            })
            .expect("Failed to add instruction");
        let html = builder
            .push(BuildEvent::StartElement {
                name: "html".into(),
                attributes: vec![Attribute::new("lang", "en")],
            })
            .expect("Failed to open html")
            .expect("element events create nodes");
        builder
            .push(BuildEvent::Comment(" generated ".into()))
            .expect("Failed to add comment");
        let body = builder
            .push(BuildEvent::StartElement {
                name: "body".into(),
                attributes: Vec::new(),
            })
            .expect("Failed to open body")
            .expect("element events create nodes");

        let mut handles = Vec::with_capacity(paragraphs);
        for i in 0..paragraphs {
            let p = builder
                .push(BuildEvent::StartElement {
                    name: "p".into(),
                    attributes: vec![Attribute::new("id", format!("p{i}"))],
                })
                .expect("Failed to open paragraph")
                .expect("element events create nodes");
            builder
                .extend([
                    BuildEvent::Text(format!("paragraph {i}")),
                    BuildEvent::EndElement { name: "p".into() },
                ])
                .expect("Failed to fill paragraph");
            handles.push(p);
        }

        builder
            .extend([
                BuildEvent::EndElement {
                    name: "body".into(),
                },
                BuildEvent::EndElement {
                    name: "html".into(),
                },
            ])
            .expect("Failed to close document");
        builder.finish().expect("Failed to finish document");

        SampleTree {
            document,
            html,
            body,
            paragraphs: handles,
        }
    }

    /// Creates an element with `n` text children, unattached to any root.
    pub fn wide_list(store: &Store, n: usize) -> (Eid, Vec<Eid>) {
        let list = store
            .create_element("ul", Vec::new())
            .expect("Failed to create list");
        let items = (0..n)
            .map(|i| {
                let item = store
                    .create_text(&format!("item {i}"))
                    .expect("Failed to create item");
                store.append_child(list, item).expect("Failed to append item");
                item
            })
            .collect();
        (list, items)
    }
}
