//! Physical representation of one blob.
//!
//! An internal entry maps a name onto a directory tree and translates
//! lifecycle operations into filesystem calls. It knows nothing about states
//! beyond the directory it currently lives in, and it is not thread-safe:
//! callers serialize access through [`FileEntry`](crate::FileEntry).
//!
//! ```text
//! <state-dir>/ab/12/ab12cd.../data        # blob bytes
//! <state-dir>/ab/12/ab12cd.../_refcount   # metadata side-file
//! ```

use std::fmt;
use std::fs::{self, DirBuilder, File, Metadata, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, FileExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::metadata::{MetadataRegistry, MetadataType};
use crate::shard::shard_path;

/// Lifecycle operations on one blob and its metadata side-files.
pub trait FileEntryInternal: Send + fmt::Debug {
    fn name(&self) -> &str;

    /// Directory holding the data file and all side-files.
    fn entry_dir(&self) -> PathBuf;

    /// Path of the data file.
    fn path(&self) -> PathBuf;

    fn stat(&self) -> Result<Metadata>;

    /// Point the entry at another state directory without touching disk.
    fn relocate(&mut self, dir: &Path);

    fn create(&mut self, len: u64) -> Result<()>;
    fn create_link_from(&mut self, source: &Path) -> Result<()>;
    fn link_to(&self, target: &Path) -> Result<()>;
    fn move_to(&mut self, target_dir: &Path) -> Result<()>;
    fn delete(&mut self) -> Result<()>;

    fn add_metadata(&mut self, mt: &MetadataType) -> Result<()>;
    fn read_metadata(&self, mt: &MetadataType) -> Result<Vec<u8>>;
    /// Returns false if the stored bytes already equal `data`.
    fn write_metadata(&mut self, mt: &MetadataType, data: &[u8]) -> Result<bool>;
    fn read_metadata_at(&self, mt: &MetadataType, buf: &mut [u8], offset: u64) -> Result<usize>;
    /// Returns 0 if the stored bytes at `offset` already equal `buf`.
    fn write_metadata_at(&mut self, mt: &MetadataType, buf: &[u8], offset: u64) -> Result<usize>;
    fn delete_metadata(&mut self, mt: &MetadataType) -> Result<()>;
    fn range_metadata(&self, f: &mut dyn FnMut(&MetadataType) -> Result<()>) -> Result<()>;
}

/// Builds internal entries for a given state directory and name.
pub trait FileEntryInternalFactory: Send + Sync + fmt::Debug {
    fn create(&self, dir: &Path, name: &str) -> Result<Box<dyn FileEntryInternal>>;

    /// Path of the entry directory relative to its state directory,
    /// e.g. `ab/12/ab12cd...`.
    fn relative_path(&self, name: &str) -> Result<PathBuf>;
}

#[derive(Debug)]
struct Layout {
    config: StoreConfig,
    registry: MetadataRegistry,
}

/// Factory for [`LocalFileEntry`] using the sharded layout from a
/// [`StoreConfig`].
#[derive(Debug, Clone)]
pub struct LocalEntryFactory {
    layout: Arc<Layout>,
}

impl LocalEntryFactory {
    pub fn new(config: StoreConfig, registry: MetadataRegistry) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            layout: Arc::new(Layout { config, registry }),
        })
    }
}

impl FileEntryInternalFactory for LocalEntryFactory {
    fn create(&self, dir: &Path, name: &str) -> Result<Box<dyn FileEntryInternal>> {
        Ok(Box::new(LocalFileEntry {
            dir: dir.to_path_buf(),
            name: name.to_string(),
            relative: self.relative_path(name)?,
            layout: Arc::clone(&self.layout),
        }))
    }

    fn relative_path(&self, name: &str) -> Result<PathBuf> {
        shard_path(name, self.layout.config.shard_id_length)
    }
}

/// Internal entry backed by the local filesystem.
#[derive(Debug)]
pub struct LocalFileEntry {
    dir: PathBuf,
    name: String,
    relative: PathBuf,
    layout: Arc<Layout>,
}

impl LocalFileEntry {
    fn metadata_path(&self, mt: &MetadataType) -> Result<PathBuf> {
        mt.validate(&self.layout.config.data_file_name)?;
        Ok(self.entry_dir().join(mt.suffix()))
    }

    fn metadata_err(
        &self,
        mt: &MetadataType,
        path: &Path,
    ) -> impl FnOnce(std::io::Error) -> StoreError {
        let name = self.name.clone();
        let suffix = mt.suffix().to_string();
        let path = path.to_path_buf();
        move |err| match err.kind() {
            std::io::ErrorKind::NotFound => StoreError::MetadataNotFound { name, suffix },
            _ => StoreError::from_io(err, &path),
        }
    }

    fn ensure_dir(&self, dir: &Path) -> Result<()> {
        DirBuilder::new()
            .recursive(true)
            .mode(self.layout.config.dir_mode)
            .create(dir)
            .map_err(StoreError::io(dir))
    }

    /// Copy the entry directory to `target` through a hidden staging
    /// directory, then retire the source. Used when `rename` crosses
    /// filesystems.
    fn move_across_devices(&self, source: &Path, target: &Path) -> Result<()> {
        let staging = hidden_sibling(target, "moving");
        let staged = self
            .copy_tree(source, &staging)
            .and_then(|_| fs::rename(&staging, target).map_err(StoreError::io(target)));
        if let Err(e) = staged {
            if let Err(cleanup) = fs::remove_dir_all(&staging) {
                warn!(
                    path = %staging.display(),
                    error = %cleanup,
                    "failed to clean up staging directory"
                );
            }
            return Err(e);
        }

        // Hide the source in one rename so the blob is never visible twice.
        let tombstone = hidden_sibling(source, "deleting");
        if let Err(e) = fs::rename(source, &tombstone) {
            if let Err(cleanup) = fs::remove_dir_all(target) {
                warn!(
                    path = %target.display(),
                    error = %cleanup,
                    "failed to roll back copied entry"
                );
            }
            return Err(StoreError::from_io(e, source));
        }
        remove_tombstone(&tombstone);
        Ok(())
    }

    fn copy_tree(&self, source: &Path, dest: &Path) -> Result<()> {
        for entry in WalkDir::new(source) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(source).to_path_buf();
                StoreError::from_io(e.into(), &path)
            })?;
            let Ok(relative) = entry.path().strip_prefix(source) else {
                continue;
            };
            let dest_path = dest.join(relative);
            if entry.file_type().is_dir() {
                self.ensure_dir(&dest_path)?;
            } else {
                fs::copy(entry.path(), &dest_path).map_err(StoreError::io(entry.path()))?;
            }
        }
        Ok(())
    }

    /// Remove side-files whose type does not follow the blob across moves.
    fn drop_unmovable_metadata(&self) {
        let mut stale = Vec::new();
        let listed = self.range_metadata(&mut |mt| {
            if !mt.movable() {
                stale.push(mt.clone());
            }
            Ok(())
        });
        if let Err(e) = listed {
            warn!(name = %self.name, error = %e, "failed to list metadata after move");
            return;
        }
        for mt in stale {
            let path = self.entry_dir().join(mt.suffix());
            if let Err(e) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "failed to drop non-movable metadata");
            }
        }
    }
}

impl FileEntryInternal for LocalFileEntry {
    fn name(&self) -> &str {
        &self.name
    }

    fn entry_dir(&self) -> PathBuf {
        self.dir.join(&self.relative)
    }

    fn path(&self) -> PathBuf {
        self.entry_dir().join(&self.layout.config.data_file_name)
    }

    fn stat(&self) -> Result<Metadata> {
        let path = self.path();
        fs::metadata(&path).map_err(StoreError::io(&path))
    }

    fn relocate(&mut self, dir: &Path) {
        self.dir = dir.to_path_buf();
    }

    fn create(&mut self, len: u64) -> Result<()> {
        self.ensure_dir(&self.entry_dir())?;
        let path = self.path();
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(StoreError::io(&path))?;
        if len > 0 {
            file.set_len(len).map_err(StoreError::io(&path))?;
        }
        Ok(())
    }

    fn create_link_from(&mut self, source: &Path) -> Result<()> {
        fs::metadata(source).map_err(StoreError::io(source))?;
        self.ensure_dir(&self.entry_dir())?;
        let path = self.path();
        fs::hard_link(source, &path).map_err(StoreError::io(&path))
    }

    fn link_to(&self, target: &Path) -> Result<()> {
        let path = self.stat().map(|_| self.path())?;
        fs::hard_link(&path, target).map_err(StoreError::io(target))
    }

    fn move_to(&mut self, target_dir: &Path) -> Result<()> {
        let source = self.entry_dir();
        let target = target_dir.join(&self.relative);

        fs::symlink_metadata(&source).map_err(StoreError::io(&source))?;
        // rename(2) happily replaces an empty directory, so check explicitly
        if fs::symlink_metadata(&target).is_ok() {
            return Err(StoreError::AlreadyExists { path: target });
        }
        if let Some(parent) = target.parent() {
            self.ensure_dir(parent)?;
        }

        match fs::rename(&source, &target) {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
                debug!(name = %self.name, "cross-device move, falling back to copy");
                self.move_across_devices(&source, &target)?;
            }
            Err(e) => return Err(StoreError::from_io(e, &source)),
        }

        self.dir = target_dir.to_path_buf();
        self.drop_unmovable_metadata();
        Ok(())
    }

    fn delete(&mut self) -> Result<()> {
        let dir = self.entry_dir();
        fs::symlink_metadata(&dir).map_err(StoreError::io(&dir))?;

        let tombstone = hidden_sibling(&dir, "deleting");
        if fs::symlink_metadata(&tombstone).is_ok() {
            fs::remove_dir_all(&tombstone).map_err(StoreError::io(&tombstone))?;
        }
        fs::rename(&dir, &tombstone).map_err(StoreError::io(&dir))?;
        remove_tombstone(&tombstone);
        Ok(())
    }

    fn add_metadata(&mut self, mt: &MetadataType) -> Result<()> {
        let path = self.metadata_path(mt)?;
        self.ensure_dir(&self.entry_dir())?;
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(StoreError::io(&path))?;
        Ok(())
    }

    fn read_metadata(&self, mt: &MetadataType) -> Result<Vec<u8>> {
        let path = self.metadata_path(mt)?;
        fs::read(&path).map_err(self.metadata_err(mt, &path))
    }

    fn write_metadata(&mut self, mt: &MetadataType, data: &[u8]) -> Result<bool> {
        let path = self.metadata_path(mt)?;
        match fs::read(&path) {
            Ok(existing) if existing == data => return Ok(false),
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::from_io(e, &path)),
        }

        self.ensure_dir(&self.entry_dir())?;
        let temp_path = hidden_sibling(&path, "tmp");
        let written = File::create(&temp_path)
            .and_then(|mut file| {
                file.write_all(data)?;
                file.sync_all()
            })
            .and_then(|_| fs::rename(&temp_path, &path));
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(StoreError::from_io(e, &path));
        }
        Ok(true)
    }

    fn read_metadata_at(&self, mt: &MetadataType, buf: &mut [u8], offset: u64) -> Result<usize> {
        let path = self.metadata_path(mt)?;
        let file = File::open(&path).map_err(self.metadata_err(mt, &path))?;
        file.read_at(buf, offset).map_err(StoreError::io(&path))
    }

    fn write_metadata_at(&mut self, mt: &MetadataType, buf: &[u8], offset: u64) -> Result<usize> {
        let path = self.metadata_path(mt)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(self.metadata_err(mt, &path))?;

        let mut current = vec![0u8; buf.len()];
        let n = file
            .read_at(&mut current, offset)
            .map_err(StoreError::io(&path))?;
        if n == buf.len() && current == buf {
            return Ok(0);
        }

        file.write_all_at(buf, offset)
            .map_err(StoreError::io(&path))?;
        Ok(buf.len())
    }

    fn delete_metadata(&mut self, mt: &MetadataType) -> Result<()> {
        let path = self.metadata_path(mt)?;
        fs::remove_file(&path).map_err(self.metadata_err(mt, &path))
    }

    fn range_metadata(&self, f: &mut dyn FnMut(&MetadataType) -> Result<()>) -> Result<()> {
        let dir = self.entry_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StoreError::from_io(e, &dir)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(StoreError::io(&dir))?;
            if !entry.file_type().map_err(StoreError::io(&dir))?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            // Skip the data file and in-flight temp files
            if name == self.layout.config.data_file_name || name.starts_with('.') {
                continue;
            }
            names.push(name);
        }
        names.sort();

        for name in names {
            f(&self.layout.registry.resolve(&name))?;
        }
        Ok(())
    }
}

/// `parent/.<file name>.<pid>.<tag>`: a private name next to `path` that never
/// collides with a blob name.
pub(crate) fn hidden_sibling(path: &Path, tag: &str) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.{}", file_name, std::process::id(), tag))
}

pub(crate) fn is_staging_name(name: &str) -> bool {
    name.starts_with('.') && (name.ends_with(".deleting") || name.ends_with(".moving"))
}

fn remove_tombstone(tombstone: &Path) {
    if let Err(e) = fs::remove_dir_all(tombstone) {
        // Hidden from lookups; swept on the next store start
        warn!(path = %tombstone.display(), error = %e, "failed to remove tombstone");
    }
}
