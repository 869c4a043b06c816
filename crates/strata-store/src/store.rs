//! The file store: name + acceptable states → verified entry operation.

use std::fs::{self, DirBuilder, Metadata};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::config::StoreConfig;
use crate::entry::{in_states, FileEntry, LockedEntry};
use crate::error::{Result, StoreError};
use crate::file_map::{DashFileMap, FileMap};
use crate::handle::{FileReadWriter, FileReader};
use crate::internal::{is_staging_name, FileEntryInternalFactory, LocalEntryFactory};
use crate::metadata::{MetadataRegistry, MetadataType};
use crate::state::{FileState, StateSet};

/// Assembles a [`FileStore`] from its storage backend.
#[derive(Debug)]
pub struct FileStoreBuilder {
    config: StoreConfig,
    states: StateSet,
    registry: MetadataRegistry,
    entry_factory: Option<Arc<dyn FileEntryInternalFactory>>,
    file_map: Option<Arc<dyn FileMap>>,
}

impl FileStoreBuilder {
    fn new(config: StoreConfig) -> Self {
        Self {
            config,
            states: StateSet::new(),
            registry: MetadataRegistry::new(),
            entry_factory: None,
            file_map: None,
        }
    }

    pub fn state(mut self, state: FileState) -> Self {
        self.states.insert(state);
        self
    }

    pub fn states<I: IntoIterator<Item = FileState>>(mut self, states: I) -> Self {
        for state in states {
            self.states.insert(state);
        }
        self
    }

    /// Metadata types used to resolve side-files found on disk. Ignored when
    /// a custom entry factory is supplied.
    pub fn metadata_registry(mut self, registry: MetadataRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn entry_factory(mut self, factory: Arc<dyn FileEntryInternalFactory>) -> Self {
        self.entry_factory = Some(factory);
        self
    }

    pub fn file_map(mut self, file_map: Arc<dyn FileMap>) -> Self {
        self.file_map = Some(file_map);
        self
    }

    /// Create missing state directories, sweep leftovers of interrupted
    /// moves and deletes, and return the store.
    pub fn build(self) -> Result<FileStore> {
        self.config.validate()?;
        if self.states.is_empty() {
            return Err(StoreError::InvalidArgument(
                "a file store needs at least one state".to_string(),
            ));
        }

        for state in &self.states {
            DirBuilder::new()
                .recursive(true)
                .mode(self.config.dir_mode)
                .create(state.directory())
                .map_err(StoreError::io(state.directory()))?;
            sweep_staging(state, self.config.shard_id_length);
        }

        let entry_factory: Arc<dyn FileEntryInternalFactory> = match self.entry_factory {
            Some(factory) => factory,
            None => Arc::new(LocalEntryFactory::new(self.config.clone(), self.registry)?),
        };
        let file_map: Arc<dyn FileMap> = self
            .file_map
            .unwrap_or_else(|| Arc::new(DashFileMap::new()));

        info!(states = self.states.len(), "file store ready");
        Ok(FileStore {
            config: self.config,
            states: self.states,
            entry_factory,
            file_map,
        })
    }
}

/// Manages blobs and their metadata across a fixed set of states.
///
/// Every operation names the states the caller expects the blob to be in;
/// the check runs under the blob's lock together with the operation, and a
/// mismatch fails with [`StoreError::WrongState`].
#[derive(Debug)]
pub struct FileStore {
    config: StoreConfig,
    states: StateSet,
    entry_factory: Arc<dyn FileEntryInternalFactory>,
    file_map: Arc<dyn FileMap>,
}

impl FileStore {
    pub fn builder(config: StoreConfig) -> FileStoreBuilder {
        FileStoreBuilder::new(config)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn states(&self) -> &StateSet {
        &self.states
    }

    fn check_target(&self, state: &FileState) -> Result<()> {
        if self.states.contains(state) {
            Ok(())
        } else {
            Err(StoreError::InvalidArgument(format!(
                "state {state:?} is not managed by this store"
            )))
        }
    }

    /// Registered entry for `name`, or one recovered from disk.
    ///
    /// On a map miss the acceptable states are checked first, then the rest,
    /// so a blob that survived a restart is registered in the state it
    /// physically occupies.
    fn lookup(&self, name: &str, states: &[FileState]) -> Result<Arc<FileEntry>> {
        self.entry_factory.relative_path(name)?;
        'resolve: loop {
            if let Some(entry) = self.file_map.load(name) {
                return Ok(entry);
            }

            let others = self.states.iter().filter(|s| !states.contains(s));
            for state in states.iter().chain(others) {
                let internal = self.entry_factory.create(state.directory(), name)?;
                match internal.stat() {
                    Ok(_) => {
                        let candidate = Arc::new(FileEntry::new(state.clone(), internal));
                        let (entry, loaded) = self.file_map.load_or_store(name, candidate);
                        if loaded {
                            return Ok(entry);
                        }
                        // The disk check ran unlocked; a delete may have removed the
                        // files before the candidate was registered.
                        if entry.remove_if_vacant(|n| self.file_map.delete(n)) {
                            debug!(name, state = %state, "blob vanished while recovering");
                            continue 'resolve;
                        }
                        debug!(name, state = %state, "recovered entry from disk");
                        return Ok(entry);
                    }
                    Err(StoreError::NotFound { .. }) => continue,
                    Err(e) => return Err(e),
                }
            }
            break;
        }

        let path = match states.first() {
            Some(state) => self.entry_factory.create(state.directory(), name)?.path(),
            None => self.entry_factory.relative_path(name)?,
        };
        Err(StoreError::NotFound { path })
    }

    /// Resolve `name` and run `op`, re-resolving if the entry was deleted
    /// while we waited for its lock.
    fn with_entry<T>(
        &self,
        name: &str,
        states: &[FileState],
        mut op: impl FnMut(&FileEntry) -> Result<T>,
    ) -> Result<T> {
        loop {
            let entry = self.lookup(name, states)?;
            match op(&*entry) {
                Err(StoreError::EntryRemoved { .. }) => continue,
                result => return result,
            }
        }
    }

    /// Like [`with_entry`](Self::with_entry), but registers a fresh entry in
    /// `create_state` when the name is unknown. `op` learns whether the entry
    /// is the fresh one; a fresh entry is unregistered again if `op` fails.
    fn with_new_entry<T>(
        &self,
        name: &str,
        states: &[FileState],
        create_state: &FileState,
        mut op: impl FnMut(&FileEntry, bool) -> Result<T>,
    ) -> Result<T> {
        self.check_target(create_state)?;
        loop {
            let (entry, fresh) = match self.lookup(name, states) {
                Ok(entry) => (entry, false),
                Err(StoreError::NotFound { .. }) => {
                    let internal = self.entry_factory.create(create_state.directory(), name)?;
                    let candidate = Arc::new(FileEntry::new(create_state.clone(), internal));
                    let (entry, loaded) = self.file_map.load_or_store(name, candidate);
                    (entry, !loaded)
                }
                Err(e) => return Err(e),
            };

            match op(&*entry, fresh) {
                Err(StoreError::EntryRemoved { .. }) => continue,
                Err(e) => {
                    if fresh {
                        entry.remove_if_vacant(|n| self.file_map.delete(n));
                    }
                    return Err(e);
                }
                ok => return ok,
            }
        }
    }

    /// Create an empty file of `len` bytes in `create_state`.
    ///
    /// Fails with `AlreadyExists` if the blob is already present in an
    /// acceptable state, `WrongState` if it is present elsewhere.
    #[instrument(skip(self, states), level = "debug")]
    pub fn create_file(
        &self,
        name: &str,
        states: &[FileState],
        create_state: &FileState,
        len: u64,
    ) -> Result<()> {
        self.with_new_entry(name, states, create_state, |entry, fresh| {
            entry.create(create_verify(states, fresh), create_state, len)
        })
    }

    /// Create the file in `create_state` as a hardlink to `source`.
    #[instrument(skip(self, states), level = "debug")]
    pub fn create_link_from_file(
        &self,
        name: &str,
        states: &[FileState],
        create_state: &FileState,
        source: &Path,
    ) -> Result<()> {
        self.with_new_entry(name, states, create_state, |entry, fresh| {
            entry.create_link_from(create_verify(states, fresh), create_state, source)
        })
    }

    /// Hardlink the blob out to `target`.
    #[instrument(skip(self, states), level = "debug")]
    pub fn link_to_file(&self, name: &str, states: &[FileState], target: &Path) -> Result<()> {
        self.with_entry(name, states, |entry| entry.link_to(in_states(states), target))
    }

    /// Move the blob, with all movable metadata, into `goal_state`.
    #[instrument(skip(self, states), level = "debug")]
    pub fn move_file(
        &self,
        name: &str,
        states: &[FileState],
        goal_state: &FileState,
    ) -> Result<()> {
        self.check_target(goal_state)?;
        self.with_entry(name, states, |entry| entry.move_to(in_states(states), goal_state))
    }

    /// Delete the blob and all of its metadata.
    ///
    /// The entry leaves the map under its own lock, so the next operation on
    /// `name` starts from scratch.
    #[instrument(skip(self, states), level = "debug")]
    pub fn delete_file(&self, name: &str, states: &[FileState]) -> Result<()> {
        self.with_entry(name, states, |entry| {
            entry.delete(in_states(states), |n| self.file_map.delete(n))
        })
    }

    pub fn file_path(&self, name: &str, states: &[FileState]) -> Result<PathBuf> {
        self.with_entry(name, states, |entry| entry.path(in_states(states)))
    }

    pub fn file_stat(&self, name: &str, states: &[FileState]) -> Result<Metadata> {
        self.with_entry(name, states, |entry| entry.stat(in_states(states)))
    }

    pub fn file_state(&self, name: &str, states: &[FileState]) -> Result<FileState> {
        self.with_entry(name, states, |entry| entry.state(in_states(states)))
    }

    /// Record `state` for a blob whose files were relocated out of band.
    #[instrument(skip(self, states), level = "debug")]
    pub fn set_file_state(
        &self,
        name: &str,
        states: &[FileState],
        state: &FileState,
    ) -> Result<()> {
        self.check_target(state)?;
        self.with_entry(name, states, |entry| entry.set_state(in_states(states), state))
    }

    pub fn file_reader(&self, name: &str, states: &[FileState]) -> Result<FileReader> {
        self.with_entry(name, states, |entry| entry.reader(in_states(states)))
    }

    pub fn file_read_writer(&self, name: &str, states: &[FileState]) -> Result<FileReadWriter> {
        self.with_entry(name, states, |entry| entry.read_writer(in_states(states)))
    }

    pub fn add_file_metadata(
        &self,
        name: &str,
        states: &[FileState],
        mt: &MetadataType,
    ) -> Result<()> {
        self.with_entry(name, states, |entry| entry.add_metadata(in_states(states), mt))
    }

    pub fn read_file_metadata(
        &self,
        name: &str,
        states: &[FileState],
        mt: &MetadataType,
    ) -> Result<Vec<u8>> {
        self.with_entry(name, states, |entry| entry.read_metadata(in_states(states), mt))
    }

    /// Returns whether the stored bytes changed; callers skip side effects
    /// on `false`.
    pub fn write_file_metadata(
        &self,
        name: &str,
        states: &[FileState],
        mt: &MetadataType,
        data: &[u8],
    ) -> Result<bool> {
        self.with_entry(name, states, |entry| {
            entry.write_metadata(in_states(states), mt, data)
        })
    }

    pub fn read_file_metadata_at(
        &self,
        name: &str,
        states: &[FileState],
        mt: &MetadataType,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<usize> {
        self.with_entry(name, states, |entry| {
            entry.read_metadata_at(in_states(states), mt, buf, offset)
        })
    }

    pub fn write_file_metadata_at(
        &self,
        name: &str,
        states: &[FileState],
        mt: &MetadataType,
        buf: &[u8],
        offset: u64,
    ) -> Result<usize> {
        self.with_entry(name, states, |entry| {
            entry.write_metadata_at(in_states(states), mt, buf, offset)
        })
    }

    pub fn delete_file_metadata(
        &self,
        name: &str,
        states: &[FileState],
        mt: &MetadataType,
    ) -> Result<()> {
        self.with_entry(name, states, |entry| {
            entry.delete_metadata(in_states(states), mt)
        })
    }

    /// Visit every metadata type present for the blob. An error returned by
    /// `f` stops the walk and is returned.
    pub fn range_file_metadata<F>(&self, name: &str, states: &[FileState], mut f: F) -> Result<()>
    where
        F: FnMut(&MetadataType) -> Result<()>,
    {
        self.with_entry(name, states, |entry| {
            entry.range_metadata(in_states(states), &mut f)
        })
    }
}

/// A freshly registered entry has nothing to verify yet; an existing one
/// must be in an acceptable state.
fn create_verify(
    states: &[FileState],
    fresh: bool,
) -> impl FnOnce(&LockedEntry<'_>) -> Result<()> + '_ {
    move |entry| {
        if fresh {
            Ok(())
        } else {
            in_states(states)(entry)
        }
    }
}

/// Remove tombstones and staging directories left by a crash between the
/// two halves of a delete or cross-device move.
fn sweep_staging(state: &FileState, shard_id_length: usize) {
    let depth = shard_id_length + 1;
    let leftovers = WalkDir::new(state.directory())
        .min_depth(depth)
        .max_depth(depth)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_type().is_dir() && is_staging_name(&e.file_name().to_string_lossy())
        });

    for entry in leftovers {
        let path = entry.path();
        match fs::remove_dir_all(path) {
            Ok(()) => debug!(path = %path.display(), "swept staging directory"),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to sweep staging directory")
            }
        }
    }
}
