//! File states: the top-level directories a blob moves between.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One of the store's top-level directories.
///
/// Two states are equal when they point at the same directory; the label is
/// only used for logs and error messages. Cloning is cheap.
#[derive(Clone)]
pub struct FileState {
    inner: Arc<StateInner>,
}

struct StateInner {
    label: String,
    dir: PathBuf,
}

impl FileState {
    pub fn new(label: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(StateInner {
                label: label.into(),
                dir: dir.into(),
            }),
        }
    }

    /// State whose directory is `root/<label>`.
    pub fn under(root: &Path, label: &str) -> Self {
        Self::new(label, root.join(label))
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn directory(&self) -> &Path {
        &self.inner.dir
    }
}

impl PartialEq for FileState {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.inner.dir == other.inner.dir
    }
}

impl Eq for FileState {}

impl Hash for FileState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.dir.hash(state);
    }
}

impl fmt::Debug for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.inner.label, self.inner.dir.display())
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.label)
    }
}

/// Ordered set of the states managed by one store.
#[derive(Debug, Clone, Default)]
pub struct StateSet {
    states: Vec<FileState>,
}

impl StateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a state; returns false if its directory is already registered.
    pub fn insert(&mut self, state: FileState) -> bool {
        if self.states.contains(&state) {
            return false;
        }
        self.states.push(state);
        true
    }

    /// Look a state up by label.
    pub fn get(&self, label: &str) -> Option<&FileState> {
        self.states.iter().find(|s| s.label() == label)
    }

    pub fn contains(&self, state: &FileState) -> bool {
        self.states.contains(state)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FileState> {
        self.states.iter()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl FromIterator<FileState> for StateSet {
    fn from_iter<I: IntoIterator<Item = FileState>>(iter: I) -> Self {
        let mut set = StateSet::new();
        for state in iter {
            set.insert(state);
        }
        set
    }
}

impl<'a> IntoIterator for &'a StateSet {
    type Item = &'a FileState;
    type IntoIter = std::slice::Iter<'a, FileState>;

    fn into_iter(self) -> Self::IntoIter {
        self.states.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_is_by_directory() {
        let a = FileState::new("cache", "/var/strata/cache");
        let b = FileState::new("renamed", "/var/strata/cache");
        let c = FileState::new("cache", "/var/strata/other");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_under_joins_label() {
        let s = FileState::under(Path::new("/root"), "complete");
        assert_eq!(s.directory(), Path::new("/root/complete"));
        assert_eq!(s.to_string(), "complete");
    }

    #[test]
    fn test_state_set_dedups_directories() {
        let mut set = StateSet::new();
        assert!(set.insert(FileState::new("a", "/x/a")));
        assert!(!set.insert(FileState::new("a2", "/x/a")));
        assert!(set.insert(FileState::new("b", "/x/b")));
        assert_eq!(set.len(), 2);
        assert_eq!(set.get("b").unwrap().directory(), Path::new("/x/b"));
        assert!(set.get("a2").is_none());
    }
}
