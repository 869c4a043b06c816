//! Metadata types and their side-file naming.
//!
//! Each metadata type is stored as one file next to the blob data, inside the
//! entry directory. The file name is the type's suffix, by convention with a
//! leading underscore (`_refcount`, `_last_access`).

use std::borrow::Cow;
use std::collections::HashMap;

use crate::error::{Result, StoreError};
use crate::shard::validate_name;

/// Identifies one kind of side-band metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetadataType {
    suffix: Cow<'static, str>,
    movable: bool,
}

impl MetadataType {
    /// A movable metadata type: it follows the blob across state moves.
    pub const fn new(suffix: &'static str) -> Self {
        Self {
            suffix: Cow::Borrowed(suffix),
            movable: true,
        }
    }

    pub fn from_suffix(suffix: impl Into<String>) -> Self {
        Self {
            suffix: Cow::Owned(suffix.into()),
            movable: true,
        }
    }

    /// Mark the type as dropped whenever its blob moves to another state.
    pub fn non_movable(mut self) -> Self {
        self.movable = false;
        self
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn movable(&self) -> bool {
        self.movable
    }

    pub(crate) fn validate(&self, data_file_name: &str) -> Result<()> {
        validate_name(&self.suffix)?;
        if self.suffix == data_file_name {
            return Err(StoreError::InvalidArgument(format!(
                "metadata suffix {:?} collides with the data file",
                self.suffix
            )));
        }
        Ok(())
    }
}

/// Known metadata types, keyed by suffix.
///
/// Used to turn side-files found on disk back into typed values. Side-files
/// with no registered type resolve to a movable type named by the file.
#[derive(Debug, Clone, Default)]
pub struct MetadataRegistry {
    types: HashMap<String, MetadataType>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, mt: MetadataType) -> Self {
        self.register(mt);
        self
    }

    pub fn register(&mut self, mt: MetadataType) {
        self.types.insert(mt.suffix().to_string(), mt);
    }

    pub fn resolve(&self, file_name: &str) -> MetadataType {
        self.types
            .get(file_name)
            .cloned()
            .unwrap_or_else(|| MetadataType::from_suffix(file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFCOUNT: MetadataType = MetadataType::new("_refcount");

    #[test]
    fn test_registry_resolves_known_types() {
        let registry = MetadataRegistry::new()
            .with(REFCOUNT)
            .with(MetadataType::new("_last_access").non_movable());

        assert_eq!(registry.resolve("_refcount"), REFCOUNT);
        assert!(!registry.resolve("_last_access").movable());

        let unknown = registry.resolve("_custom");
        assert_eq!(unknown.suffix(), "_custom");
        assert!(unknown.movable());
    }

    #[test]
    fn test_validate_rejects_data_file_collision() {
        assert!(MetadataType::new("data").validate("data").is_err());
        assert!(MetadataType::new("_x/y").validate("data").is_err());
        assert!(MetadataType::new(".tmp").validate("data").is_err());
        assert!(REFCOUNT.validate("data").is_ok());
    }
}
