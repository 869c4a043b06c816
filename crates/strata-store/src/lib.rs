//! # strata-store
//!
//! Local, stateful, content-addressable file store.
//!
//! Blobs are identified by name (usually a content digest) and live in
//! exactly one [`FileState`] at a time. A state is a top-level directory such
//! as `incomplete/` or `complete/`; moving a blob between states is an atomic
//! directory rename. Each blob can carry small metadata side-files that
//! either follow it across moves or stay behind.
//!
//! ## Directory Layout
//!
//! ```text
//! <state>/
//! └── ab/
//!     └── 12/
//!         └── ab12cd34.../
//!             ├── data        # blob contents
//!             └── _refcount   # metadata, one file per suffix
//! ```
//!
//! Hex names shard on their own leading characters; other names shard on
//! the BLAKE3 digest of the name.
//!
//! ## Concurrency
//!
//! Every [`FileStore`] operation names the states the caller expects the blob
//! to be in. The check runs under the blob's own lock, together with the
//! operation, so it cannot go stale. Operations on different blobs never
//! contend.

pub mod config;
pub mod entry;
pub mod error;
pub mod file_map;
pub mod handle;
pub mod internal;
pub mod metadata;
pub mod shard;
pub mod state;
mod store;

pub use config::StoreConfig;
pub use entry::{in_states, noop_verify, FileEntry, LockedEntry};
pub use error::{ErrorKind, Result, StoreError};
pub use file_map::{DashFileMap, FileMap};
pub use handle::{FileReadWriter, FileReader};
pub use internal::{FileEntryInternal, FileEntryInternalFactory, LocalEntryFactory};
pub use metadata::{MetadataRegistry, MetadataType};
pub use state::{FileState, StateSet};
pub use store::{FileStore, FileStoreBuilder};
