#![forbid(unsafe_code)]

//! Families: keyed factories caching one cell per argument.
//!
//! Identity is structural (`Hash + Eq` on the key). With caching enabled
//! (the default) the factory runs once per distinct key; `clear` drops the
//! cache without disposing the produced cells, which may still be held
//! elsewhere.

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::Rc;

use ahash::AHashMap;

/// A memoized factory from key to cell.
///
/// Cloning the handle shares the same cache.
pub struct Family<K, B>
where
    K: Hash + Eq + Clone + 'static,
    B: Clone + 'static,
{
    cache: Rc<RefCell<AHashMap<K, B>>>,
    factory: Rc<dyn Fn(&K) -> B>,
    cache_enabled: bool,
}

impl<K, B> Clone for Family<K, B>
where
    K: Hash + Eq + Clone + 'static,
    B: Clone + 'static,
{
    fn clone(&self) -> Self {
        Self {
            cache: Rc::clone(&self.cache),
            factory: Rc::clone(&self.factory),
            cache_enabled: self.cache_enabled,
        }
    }
}

impl<K, B> Family<K, B>
where
    K: Hash + Eq + Clone + 'static,
    B: Clone + 'static,
{
    pub(crate) fn create(factory: impl Fn(&K) -> B + 'static, cache_enabled: bool) -> Self {
        Self {
            cache: Rc::new(RefCell::new(AHashMap::new())),
            factory: Rc::new(factory),
            cache_enabled,
        }
    }

    /// The cell for `key`: cached if seen before (and caching is on),
    /// freshly built otherwise.
    pub fn get(&self, key: K) -> B {
        if self.cache_enabled {
            if let Some(cached) = self.cache.borrow().get(&key) {
                return cached.clone();
            }
        }
        let built = (self.factory)(&key);
        if self.cache_enabled {
            self.cache.borrow_mut().insert(key, built.clone());
        }
        built
    }

    /// Whether a cell is cached for `key`.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.cache.borrow().contains_key(key)
    }

    /// Number of cached cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.borrow().is_empty()
    }

    /// Drop the cache. Produced cells are not disposed — they may be held
    /// externally.
    pub fn clear(&self) {
        self.cache.borrow_mut().clear();
    }
}

impl<K, B> std::fmt::Debug for Family<K, B>
where
    K: Hash + Eq + Clone + 'static,
    B: Clone + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Family")
            .field("cached", &self.cache.borrow().len())
            .field("cache_enabled", &self.cache_enabled)
            .finish()
    }
}
