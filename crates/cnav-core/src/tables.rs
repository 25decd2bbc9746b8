//! Interning tables: USR string → dense `UsrId`, absolute path → dense `FileId`.
//!
//! Both tables are per-project singletons with their own internal locking;
//! neither requires (or takes) the graph lock. Ids are monotonic and never
//! reused, so downstream `HashSet<UsrId>`/`HashSet<FileId>` containers stay
//! cheap and string storage is amortised across the process.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use crate::{FileId, UsrId};

// Interning never fails; running out of the 32-bit id space is fatal.
fn next_id(len: usize) -> u32 {
    assert!(len < u32::MAX as usize, "id space exhausted");
    len as u32
}

struct Interner {
    ids: HashMap<String, u32>,
    strings: Vec<String>,
}

impl Interner {
    fn new() -> Self {
        Self {
            ids: HashMap::new(),
            strings: Vec::new(),
        }
    }

    fn intern(&mut self, s: &str) -> u32 {
        if let Some(&id) = self.ids.get(s) {
            return id;
        }
        let id = next_id(self.strings.len());
        self.ids.insert(s.to_string(), id);
        self.strings.push(s.to_string());
        id
    }
}

// ── USR Table ───────────────────────────────────────────────────────────────

/// Concurrent mapping from UTF-8 USR string to `UsrId`.
///
/// Multiple callers racing `intern` on the same string observe the same id.
pub struct UsrTable {
    inner: RwLock<Interner>,
}

impl UsrTable {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Interner::new()),
        }
    }

    /// Insert-or-get. Returns the existing id if the USR is known,
    /// otherwise allocates the next id.
    pub fn intern(&self, usr: &str) -> UsrId {
        if let Some(id) = self.lookup(usr) {
            return id;
        }
        let mut inner = self.inner.write().expect("usr table poisoned");
        UsrId(inner.intern(usr))
    }

    /// Non-inserting lookup.
    pub fn lookup(&self, usr: &str) -> Option<UsrId> {
        let inner = self.inner.read().expect("usr table poisoned");
        inner.ids.get(usr).copied().map(UsrId)
    }

    /// Reverse mapping, used by queries and persistence.
    pub fn resolve(&self, id: UsrId) -> Option<String> {
        let inner = self.inner.read().expect("usr table poisoned");
        inner.strings.get(id.0 as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("usr table poisoned").strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All (id, usr) pairs in id order, for persistence.
    pub fn snapshot(&self) -> Vec<(UsrId, String)> {
        let inner = self.inner.read().expect("usr table poisoned");
        inner
            .strings
            .iter()
            .enumerate()
            .map(|(i, s)| (UsrId(i as u32), s.clone()))
            .collect()
    }
}

impl Default for UsrTable {
    fn default() -> Self {
        Self::new()
    }
}

// ── File Registry ───────────────────────────────────────────────────────────

/// Bidirectional `Path ↔ FileId` mapping.
///
/// Paths must be absolute (precondition); they are normalized (`.`/`..`
/// resolved lexically, redundant separators dropped) before hashing.
pub struct FileRegistry {
    inner: RwLock<Interner>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Interner::new()),
        }
    }

    /// Lexical normalization: resolves `.` and `..` components without
    /// touching the filesystem, so unseen paths still intern cleanly.
    pub fn normalize(path: &Path) -> PathBuf {
        let mut out = PathBuf::new();
        for component in path.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    out.pop();
                }
                other => out.push(other.as_os_str()),
            }
        }
        out
    }

    /// Insert-or-get for an absolute path.
    pub fn intern(&self, path: &Path) -> FileId {
        assert!(path.is_absolute(), "file registry requires absolute paths");
        let normalized = Self::normalize(path);
        let key = normalized.to_string_lossy();
        if let Some(id) = self.lookup_normalized(&key) {
            return id;
        }
        let mut inner = self.inner.write().expect("file registry poisoned");
        FileId(inner.intern(&key))
    }

    /// Non-inserting lookup.
    pub fn lookup(&self, path: &Path) -> Option<FileId> {
        let normalized = Self::normalize(path);
        self.lookup_normalized(&normalized.to_string_lossy())
    }

    fn lookup_normalized(&self, key: &str) -> Option<FileId> {
        let inner = self.inner.read().expect("file registry poisoned");
        inner.ids.get(key).copied().map(FileId)
    }

    /// Reverse mapping.
    pub fn resolve(&self, id: FileId) -> Option<PathBuf> {
        let inner = self.inner.read().expect("file registry poisoned");
        inner.strings.get(id.0 as usize).map(PathBuf::from)
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .expect("file registry poisoned")
            .strings
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All (id, path) pairs in id order, for persistence.
    pub fn snapshot(&self) -> Vec<(FileId, PathBuf)> {
        let inner = self.inner.read().expect("file registry poisoned");
        inner
            .strings
            .iter()
            .enumerate()
            .map(|(i, s)| (FileId(i as u32), PathBuf::from(s)))
            .collect()
    }
}

impl Default for FileRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn interning_is_deterministic() {
        let table = UsrTable::new();
        let a = table.intern("c:@F@foo#");
        let b = table.intern("c:@F@foo#");
        let c = table.intern("c:@F@bar#");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(table.len(), 2);
        assert_eq!(table.resolve(a).as_deref(), Some("c:@F@foo#"));
    }

    #[test]
    fn lookup_does_not_insert() {
        let table = UsrTable::new();
        assert_eq!(table.lookup("c:@S@B"), None);
        assert_eq!(table.len(), 0);
        let id = table.intern("c:@S@B");
        assert_eq!(table.lookup("c:@S@B"), Some(id));
    }

    #[test]
    fn racing_interns_agree() {
        let table = Arc::new(UsrTable::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let table = Arc::clone(&table);
            handles.push(std::thread::spawn(move || {
                (0..100)
                    .map(|i| table.intern(&format!("c:@F@f{}#", i % 10)))
                    .collect::<Vec<_>>()
            }));
        }
        let results: Vec<Vec<UsrId>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for other in &results[1..] {
            assert_eq!(&results[0], other);
        }
        assert_eq!(table.len(), 10);
    }

    #[test]
    fn paths_normalize_before_hashing() {
        let files = FileRegistry::new();
        let a = files.intern(Path::new("/src/./lib/../main.c"));
        let b = files.intern(Path::new("/src/main.c"));
        assert_eq!(a, b);
        assert_eq!(files.resolve(a), Some(PathBuf::from("/src/main.c")));
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn file_ids_are_monotonic() {
        let files = FileRegistry::new();
        let a = files.intern(Path::new("/a.c"));
        let b = files.intern(Path::new("/b.c"));
        let c = files.intern(Path::new("/c.c"));
        assert!(a.0 < b.0 && b.0 < c.0);
    }

    #[test]
    #[should_panic(expected = "absolute")]
    fn relative_paths_are_rejected() {
        FileRegistry::new().intern(Path::new("src/main.c"));
    }
}
