//! Fixed-capacity cache of parsed translation units.
//!
//! A pure optimisation for reparses: jobs consult it before invoking the
//! front-end and deposit fresh handles after. Graph contents never depend
//! on it.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::parser::TranslationUnit;

/// LRU of opaque parser handles keyed by primary path: move-to-front on
/// hit, oldest evicted on insertion past capacity.
pub struct UnitCache {
    units: LruCache<PathBuf, Arc<dyn TranslationUnit>>,
}

impl UnitCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to >= 1");
        Self {
            units: LruCache::new(capacity),
        }
    }

    pub fn get(&mut self, path: &Path) -> Option<Arc<dyn TranslationUnit>> {
        self.units.get(path).cloned()
    }

    pub fn put(&mut self, path: PathBuf, unit: Arc<dyn TranslationUnit>) {
        self.units.put(path, unit);
    }

    pub fn remove(&mut self, path: &Path) {
        self.units.pop(path);
    }

    /// Cached paths, most recently used first.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.units.iter().map(|(path, _)| path.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}
