//! Fan-out path derivation.
//!
//! Blob names are usually hex digests, so the leading digest bytes make good
//! directory buckets: with the default shard length of 2,
//! `ab12cd...` lives under `ab/12/ab12cd...`. Names that do not start with
//! enough hex digits are bucketed by the BLAKE3 hash of the name instead, so
//! every name gets the same nesting depth.

use std::path::PathBuf;

use crate::error::{Result, StoreError};

/// Upper bound on shard levels: one per byte of a BLAKE3 hash.
pub const MAX_SHARD_ID_LENGTH: usize = blake3::OUT_LEN;

/// Check that `name` can be used as a single path component of the store.
///
/// Dot-prefixed names are reserved for the store's staging and tombstone
/// entries.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(StoreError::InvalidArgument("empty file name".to_string()));
    }
    if name.starts_with('.') {
        return Err(StoreError::InvalidArgument(format!(
            "file name must not start with '.': {name:?}"
        )));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(StoreError::InvalidArgument(format!(
            "file name must be a single path component: {name:?}"
        )));
    }
    Ok(())
}

/// Relative path of `name` below a state directory.
///
/// Returns `shard_id_length` directory levels followed by the name itself.
pub fn shard_path(name: &str, shard_id_length: usize) -> Result<PathBuf> {
    validate_name(name)?;
    if shard_id_length > MAX_SHARD_ID_LENGTH {
        return Err(StoreError::InvalidArgument(format!(
            "shard id length {shard_id_length} exceeds {MAX_SHARD_ID_LENGTH}"
        )));
    }

    let mut path = PathBuf::new();
    for level in shard_ids(name, shard_id_length) {
        path.push(level);
    }
    path.push(name);
    Ok(path)
}

fn shard_ids(name: &str, shard_id_length: usize) -> Vec<String> {
    let prefix_len = shard_id_length * 2;
    let prefix = &name.as_bytes()[..prefix_len.min(name.len())];

    if prefix.len() == prefix_len && prefix.iter().all(u8::is_ascii_hexdigit) {
        // ASCII only, so byte offsets are char boundaries
        (0..shard_id_length)
            .map(|i| name[i * 2..i * 2 + 2].to_string())
            .collect()
    } else {
        let digest = blake3::hash(name.as_bytes());
        digest.as_bytes()[..shard_id_length]
            .iter()
            .map(|b| hex::encode([*b]))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_digest_name_uses_leading_bytes() {
        let name = "ab12cd34ef";
        let path = shard_path(name, 2).unwrap();
        assert_eq!(path, Path::new("ab/12/ab12cd34ef"));
    }

    #[test]
    fn test_shard_length_controls_depth() {
        let name = "0123456789abcdef";
        assert_eq!(shard_path(name, 0).unwrap(), Path::new(name));
        assert_eq!(
            shard_path(name, 3).unwrap(),
            Path::new("01/23/45/0123456789abcdef")
        );
    }

    #[test]
    fn test_non_hex_name_is_hashed() {
        let path = shard_path("layer.tar", 2).unwrap();
        let components: Vec<_> = path.iter().map(|c| c.to_string_lossy()).collect();
        assert_eq!(components.len(), 3);
        assert_eq!(components[2], "layer.tar");

        let digest = blake3::hash(b"layer.tar");
        assert_eq!(components[0], hex::encode(&digest.as_bytes()[..1]));
        assert_eq!(components[1], hex::encode(&digest.as_bytes()[1..2]));

        // Deterministic
        assert_eq!(path, shard_path("layer.tar", 2).unwrap());
    }

    #[test]
    fn test_short_hex_name_is_hashed() {
        // "ab" has only one byte of digest, not enough for two levels
        let path = shard_path("ab", 2).unwrap();
        assert_eq!(path.iter().count(), 3);
        assert!(path.ends_with("ab"));
    }

    #[test]
    fn test_rejects_bad_names() {
        for name in ["", ".hidden", "..", "a/b", "nul\0"] {
            let err = shard_path(name, 2).unwrap_err();
            assert!(
                matches!(err, StoreError::InvalidArgument(_)),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_oversized_shard_length() {
        let err = shard_path("abcd", MAX_SHARD_ID_LENGTH + 1).unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }
}
