//! The current index of a running program.
//!
//! A [`Session`] owns the open [`Index`] and replaces it as a whole on
//! "new", "load" and "save as". Callers take an `Arc<Index>` handle per
//! operation; a swap never affects a handle already taken, and the word
//! cache goes away with the index it belongs to. Observers are owned by the
//! session and carried over to every index it opens.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::RwLock;

use crate::{
    error::{Error, Result},
    index::Index,
    observers::{Event, Observers},
};

pub struct Session {
    current: RwLock<Arc<Index>>,
    observers: Arc<Observers>,
}

impl Session {
    /// Open (or create) the index at `path` as the current index.
    pub fn open(path: &Path) -> Result<Self> {
        let observers = Arc::new(Observers::new());
        let index = Index::open_with_observers(path, Arc::clone(&observers))?;
        Ok(Self {
            current: RwLock::new(Arc::new(index)),
            observers,
        })
    }

    /// Handle to the current index.
    pub fn index(&self) -> Arc<Index> {
        Arc::clone(&self.current.read())
    }

    pub fn path(&self) -> PathBuf {
        self.current.read().path().to_path_buf()
    }

    pub fn subscribe<F>(&self, event: Event, handler: F)
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.observers.subscribe(event, handler);
    }

    fn swap(&self, index: Index) {
        let path = index.path().to_path_buf();
        let old = std::mem::replace(&mut *self.current.write(), Arc::new(index));
        tracing::info!(from = %old.path().display(), to = %path.display(), "switched index");
    }

    fn is_current(&self, path: &Path) -> bool {
        let current = self.path();
        current == path
            || matches!(
                (current.canonicalize(), path.canonicalize()),
                (Ok(a), Ok(b)) if a == b
            )
    }

    /// Start over with an empty index at `path`. An existing file there is
    /// replaced.
    pub fn new_index(&self, path: &Path) -> Result<()> {
        if self.is_current(path) {
            return self.index().reset();
        }
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let index = Index::open_with_observers(path, Arc::clone(&self.observers))?;
        self.swap(index);
        Ok(())
    }

    /// Make the existing index at `path` current.
    pub fn load(&self, path: &Path) -> Result<()> {
        if !path.is_file() {
            return Err(Error::SourceNotFound {
                path: path.to_path_buf(),
                reason: "no such index file".into(),
            });
        }
        if self.is_current(path) {
            self.index().cache.lock().clear();
            return Ok(());
        }
        let index = Index::open_with_observers(path, Arc::clone(&self.observers))?;
        self.swap(index);
        Ok(())
    }

    /// Copy the current index to `path` and continue working on the copy.
    pub fn save_as(&self, path: &Path) -> Result<()> {
        if self.is_current(path) {
            return Err(Error::invalid(
                "save target",
                path.to_string_lossy(),
            ));
        }
        self.index().snapshot_to(path)?;
        self.load(path)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("path", &self.path())
            .finish_non_exhaustive()
    }
}
