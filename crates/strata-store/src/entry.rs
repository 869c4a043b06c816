//! Stateful, thread-safe file entries.
//!
//! A [`FileEntry`] owns one internal entry plus the state it is recorded in,
//! behind a single mutex. Every operation takes a verify predicate that runs
//! after the lock is acquired and before anything is touched, so a check such
//! as "the blob is still in `incomplete`" cannot go stale before the action
//! that depends on it.

use std::fmt;
use std::fs::Metadata;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::handle::{FileReadWriter, FileReader};
use crate::internal::FileEntryInternal;
use crate::metadata::MetadataType;
use crate::state::FileState;

/// Read-only view of an entry while its lock is held, handed to verify
/// predicates.
pub struct LockedEntry<'a> {
    state: &'a FileState,
    internal: &'a dyn FileEntryInternal,
}

impl LockedEntry<'_> {
    pub fn state(&self) -> &FileState {
        self.state
    }

    pub fn name(&self) -> &str {
        self.internal.name()
    }

    pub fn path(&self) -> PathBuf {
        self.internal.path()
    }

    pub fn stat(&self) -> Result<Metadata> {
        self.internal.stat()
    }
}

/// Verify predicate that accepts everything.
pub fn noop_verify(_: &LockedEntry<'_>) -> Result<()> {
    Ok(())
}

/// Verify predicate accepting entries whose current state is in `states`.
pub fn in_states(states: &[FileState]) -> impl Fn(&LockedEntry<'_>) -> Result<()> + '_ {
    move |entry| {
        if states.contains(entry.state()) {
            Ok(())
        } else {
            Err(StoreError::WrongState {
                name: entry.name().to_string(),
                actual: entry.state().clone(),
                expected: states.to_vec(),
            })
        }
    }
}

struct Inner {
    state: FileState,
    internal: Box<dyn FileEntryInternal>,
    removed: bool,
}

impl Inner {
    fn view(&self) -> LockedEntry<'_> {
        LockedEntry {
            state: &self.state,
            internal: self.internal.as_ref(),
        }
    }

    fn occupied(&self) -> bool {
        self.internal.stat().is_ok()
    }

    /// Run `op` with the internal entry pointed at `target`, restoring the
    /// previous directory if it fails.
    fn in_target<T>(
        &mut self,
        target: &FileState,
        op: impl FnOnce(&mut dyn FileEntryInternal) -> Result<T>,
    ) -> Result<T> {
        let retarget = self.state != *target;
        if retarget {
            self.internal.relocate(target.directory());
        }
        match op(self.internal.as_mut()) {
            Ok(value) => {
                self.state = target.clone();
                Ok(value)
            }
            Err(e) => {
                if retarget {
                    self.internal.relocate(self.state.directory());
                }
                Err(e)
            }
        }
    }
}

/// One blob and its metadata, tracked in exactly one [`FileState`].
pub struct FileEntry {
    name: String,
    inner: Mutex<Inner>,
}

impl FileEntry {
    pub fn new(state: FileState, internal: Box<dyn FileEntryInternal>) -> Self {
        Self {
            name: internal.name().to_string(),
            inner: Mutex::new(Inner {
                state,
                internal,
                removed: false,
            }),
        }
    }

    /// Lock, reject removed entries, verify, then act.
    fn locked<T, V>(&self, verify: V, op: impl FnOnce(&mut Inner) -> Result<T>) -> Result<T>
    where
        V: FnOnce(&LockedEntry<'_>) -> Result<()>,
    {
        let mut inner = self.inner.lock();
        if inner.removed {
            return Err(StoreError::EntryRemoved {
                name: self.name.clone(),
            });
        }
        verify(&inner.view())?;
        op(&mut *inner)
    }

    pub fn is_removed(&self) -> bool {
        self.inner.lock().removed
    }

    /// Recorded state without verification; for logging only.
    pub fn state_unsafe(&self) -> FileState {
        self.inner.lock().state.clone()
    }

    pub fn state<V>(&self, verify: V) -> Result<FileState>
    where
        V: FnOnce(&LockedEntry<'_>) -> Result<()>,
    {
        self.locked(verify, |inner| Ok(inner.state.clone()))
    }

    /// Overwrite the recorded state without moving anything on disk.
    ///
    /// Only for callers that already relocated the backing files themselves.
    pub fn set_state<V>(&self, verify: V, state: &FileState) -> Result<()>
    where
        V: FnOnce(&LockedEntry<'_>) -> Result<()>,
    {
        self.locked(verify, |inner| {
            inner.internal.relocate(state.directory());
            inner.state = state.clone();
            Ok(())
        })
    }

    pub fn name<V>(&self, verify: V) -> Result<String>
    where
        V: FnOnce(&LockedEntry<'_>) -> Result<()>,
    {
        self.locked(verify, |inner| Ok(inner.internal.name().to_string()))
    }

    pub fn path<V>(&self, verify: V) -> Result<PathBuf>
    where
        V: FnOnce(&LockedEntry<'_>) -> Result<()>,
    {
        self.locked(verify, |inner| Ok(inner.internal.path()))
    }

    pub fn stat<V>(&self, verify: V) -> Result<Metadata>
    where
        V: FnOnce(&LockedEntry<'_>) -> Result<()>,
    {
        self.locked(verify, |inner| inner.internal.stat())
    }

    /// Create an empty data file of `len` bytes in `target`.
    pub fn create<V>(&self, verify: V, target: &FileState, len: u64) -> Result<()>
    where
        V: FnOnce(&LockedEntry<'_>) -> Result<()>,
    {
        self.locked(verify, |inner| {
            if inner.occupied() {
                return Err(StoreError::AlreadyExists {
                    path: inner.internal.path(),
                });
            }
            inner.in_target(target, |internal| internal.create(len))?;
            debug!(name = %self.name, state = %target, len, "created file");
            Ok(())
        })
    }

    /// Create the data file in `target` as a hardlink to `source`.
    pub fn create_link_from<V>(&self, verify: V, target: &FileState, source: &Path) -> Result<()>
    where
        V: FnOnce(&LockedEntry<'_>) -> Result<()>,
    {
        self.locked(verify, |inner| {
            if inner.occupied() {
                return Err(StoreError::AlreadyExists {
                    path: inner.internal.path(),
                });
            }
            inner.in_target(target, |internal| internal.create_link_from(source))?;
            debug!(
                name = %self.name,
                state = %target,
                source = %source.display(),
                "linked file in"
            );
            Ok(())
        })
    }

    /// Hardlink the data file out to `target`.
    pub fn link_to<V>(&self, verify: V, target: &Path) -> Result<()>
    where
        V: FnOnce(&LockedEntry<'_>) -> Result<()>,
    {
        self.locked(verify, |inner| inner.internal.link_to(target))
    }

    pub fn move_to<V>(&self, verify: V, target: &FileState) -> Result<()>
    where
        V: FnOnce(&LockedEntry<'_>) -> Result<()>,
    {
        self.locked(verify, |inner| {
            inner.internal.move_to(target.directory())?;
            debug!(name = %self.name, from = %inner.state, to = %target, "moved file");
            inner.state = target.clone();
            Ok(())
        })
    }

    /// Delete the data file and all metadata.
    ///
    /// `on_removed` runs while the lock is still held, after the files are
    /// gone; the store uses it to unregister the entry so no other caller can
    /// pick up an entry without backing.
    pub fn delete<V, F>(&self, verify: V, on_removed: F) -> Result<()>
    where
        V: FnOnce(&LockedEntry<'_>) -> Result<()>,
        F: FnOnce(&str),
    {
        self.locked(verify, |inner| {
            inner.internal.delete()?;
            inner.removed = true;
            debug!(name = %self.name, state = %inner.state, "deleted file");
            on_removed(&self.name);
            Ok(())
        })
    }

    /// Mark the entry removed if nothing backs it on disk.
    ///
    /// Used to drop entries registered for a create that then failed.
    pub fn remove_if_vacant<F>(&self, on_removed: F) -> bool
    where
        F: FnOnce(&str),
    {
        let mut inner = self.inner.lock();
        if inner.removed || inner.occupied() {
            return false;
        }
        inner.removed = true;
        on_removed(&self.name);
        true
    }

    pub fn reader<V>(&self, verify: V) -> Result<FileReader>
    where
        V: FnOnce(&LockedEntry<'_>) -> Result<()>,
    {
        self.locked(verify, |inner| FileReader::open(&inner.internal.path()))
    }

    pub fn read_writer<V>(&self, verify: V) -> Result<FileReadWriter>
    where
        V: FnOnce(&LockedEntry<'_>) -> Result<()>,
    {
        self.locked(verify, |inner| FileReadWriter::open(&inner.internal.path()))
    }

    pub fn add_metadata<V>(&self, verify: V, mt: &MetadataType) -> Result<()>
    where
        V: FnOnce(&LockedEntry<'_>) -> Result<()>,
    {
        self.locked(verify, |inner| inner.internal.add_metadata(mt))
    }

    pub fn read_metadata<V>(&self, verify: V, mt: &MetadataType) -> Result<Vec<u8>>
    where
        V: FnOnce(&LockedEntry<'_>) -> Result<()>,
    {
        self.locked(verify, |inner| inner.internal.read_metadata(mt))
    }

    /// Returns whether the stored bytes changed.
    pub fn write_metadata<V>(&self, verify: V, mt: &MetadataType, data: &[u8]) -> Result<bool>
    where
        V: FnOnce(&LockedEntry<'_>) -> Result<()>,
    {
        self.locked(verify, |inner| inner.internal.write_metadata(mt, data))
    }

    pub fn read_metadata_at<V>(
        &self,
        verify: V,
        mt: &MetadataType,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<usize>
    where
        V: FnOnce(&LockedEntry<'_>) -> Result<()>,
    {
        self.locked(verify, |inner| inner.internal.read_metadata_at(mt, buf, offset))
    }

    pub fn write_metadata_at<V>(
        &self,
        verify: V,
        mt: &MetadataType,
        buf: &[u8],
        offset: u64,
    ) -> Result<usize>
    where
        V: FnOnce(&LockedEntry<'_>) -> Result<()>,
    {
        self.locked(verify, |inner| inner.internal.write_metadata_at(mt, buf, offset))
    }

    pub fn delete_metadata<V>(&self, verify: V, mt: &MetadataType) -> Result<()>
    where
        V: FnOnce(&LockedEntry<'_>) -> Result<()>,
    {
        self.locked(verify, |inner| inner.internal.delete_metadata(mt))
    }

    pub fn range_metadata<V, F>(&self, verify: V, mut f: F) -> Result<()>
    where
        V: FnOnce(&LockedEntry<'_>) -> Result<()>,
        F: FnMut(&MetadataType) -> Result<()>,
    {
        self.locked(verify, |inner| inner.internal.range_metadata(&mut f))
    }
}

impl fmt::Debug for FileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileEntry")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
