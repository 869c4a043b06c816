use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::shard::{validate_name, MAX_SHARD_ID_LENGTH};

/// On-disk layout settings for a [`FileStore`](crate::FileStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Number of name bytes turned into nested shard directories (0 = flat).
    pub shard_id_length: usize,
    /// Permission bits for every directory the store creates.
    pub dir_mode: u32,
    /// File name of the blob bytes inside an entry directory.
    pub data_file_name: String,
}

impl StoreConfig {
    pub const DEFAULT_SHARD_ID_LENGTH: usize = 2;
    /// Owner rwx, group r-x, no world access.
    pub const DEFAULT_DIR_MODE: u32 = 0o750;
    pub const DEFAULT_DATA_FILE_NAME: &'static str = "data";

    pub fn validate(&self) -> Result<()> {
        if self.shard_id_length > MAX_SHARD_ID_LENGTH {
            return Err(StoreError::InvalidArgument(format!(
                "shard_id_length {} exceeds {}",
                self.shard_id_length, MAX_SHARD_ID_LENGTH
            )));
        }
        if self.dir_mode & !0o777 != 0 || self.dir_mode & 0o700 != 0o700 {
            return Err(StoreError::InvalidArgument(format!(
                "dir_mode {:o} must be a permission mask granting the owner rwx",
                self.dir_mode
            )));
        }
        if self.dir_mode & 0o007 != 0 {
            return Err(StoreError::InvalidArgument(format!(
                "dir_mode {:o} must not grant world access",
                self.dir_mode
            )));
        }
        validate_name(&self.data_file_name)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            shard_id_length: Self::DEFAULT_SHARD_ID_LENGTH,
            dir_mode: Self::DEFAULT_DIR_MODE,
            data_file_name: Self::DEFAULT_DATA_FILE_NAME.to_string(),
        }
    }
}
