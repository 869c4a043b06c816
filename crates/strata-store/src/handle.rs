//! Open handles on blob data files.
//!
//! A handle is bound to the path the blob had when it was opened. The store
//! only guarantees that path and state were correct at that moment; a later
//! move of the blob does not follow the handle.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};

/// Read-only handle on a blob.
#[derive(Debug)]
pub struct FileReader {
    file: File,
    path: PathBuf,
}

impl FileReader {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(StoreError::io(path))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> Result<u64> {
        let meta = self.file.metadata().map_err(StoreError::io(&self.path))?;
        Ok(meta.len())
    }

    /// Positional read; does not move the cursor.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.file
            .read_at(buf, offset)
            .map_err(StoreError::io(&self.path))
    }
}

impl Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for FileReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

/// Read/write handle on a blob, used to stage uploads and downloads.
#[derive(Debug)]
pub struct FileReadWriter {
    file: File,
    path: PathBuf,
}

impl FileReadWriter {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(StoreError::io(path))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> Result<u64> {
        let meta = self.file.metadata().map_err(StoreError::io(&self.path))?;
        Ok(meta.len())
    }

    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.file
            .read_at(buf, offset)
            .map_err(StoreError::io(&self.path))
    }

    /// Positional write of the whole buffer; does not move the cursor.
    pub fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize> {
        self.file
            .write_all_at(buf, offset)
            .map_err(StoreError::io(&self.path))?;
        Ok(buf.len())
    }

    /// Flush written bytes to disk and close the handle.
    pub fn commit(self) -> Result<()> {
        self.file.sync_all().map_err(StoreError::io(&self.path))
    }

    /// Close the handle without syncing.
    pub fn cancel(self) {
        drop(self.file);
    }
}

impl Read for FileReadWriter {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for FileReadWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Seek for FileReadWriter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}
