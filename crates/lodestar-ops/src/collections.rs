#![forbid(unsafe_code)]

//! Collection cells: lists, sets and maps that notify on in-place mutation.
//!
//! Unlike writable cells there is no equality gate — every mutating call
//! notifies, because observers of a collection usually care about the event
//! as much as the content. Readers get clones via `get`/`peek` or borrow via
//! `with`.

use std::rc::Rc;

use ahash::{AHashMap, AHashSet};

use lodestar_core::{Beacon, ProducerCore, Runtime};

// ---------------------------------------------------------------------------
// ListBeacon
// ---------------------------------------------------------------------------

/// A `Vec<T>` cell with notifying mutation methods.
///
/// Cloning the handle shares the same cell.
pub struct ListBeacon<T: Clone + 'static> {
    core: Rc<ProducerCore<Vec<T>>>,
}

impl<T: Clone + 'static> Clone for ListBeacon<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T: Clone + 'static> ListBeacon<T> {
    pub(crate) fn create(rt: &Runtime, initial: Vec<T>, name: Option<String>) -> Self {
        Self {
            core: ProducerCore::new(rt, "list", name, Some(initial)),
        }
    }

    pub fn push(&self, value: T) {
        let _ = self.core.mutate(|list| list.push(value));
    }

    pub fn pop(&self) -> Option<T> {
        let mut popped = None;
        let _ = self.core.mutate(|list| popped = list.pop());
        popped
    }

    pub fn insert(&self, index: usize, value: T) {
        let _ = self.core.mutate(|list| list.insert(index, value));
    }

    /// Remove and return the element at `index`; `None` when out of bounds.
    pub fn remove(&self, index: usize) -> Option<T> {
        let mut removed = None;
        let _ = self.core.mutate(|list| {
            if index < list.len() {
                removed = Some(list.remove(index));
            }
        });
        removed
    }

    /// Replace the element at `index`. Returns `false` when out of bounds.
    pub fn set_at(&self, index: usize, value: T) -> bool {
        let mut replaced = false;
        let _ = self.core.mutate(|list| {
            if let Some(slot) = list.get_mut(index) {
                *slot = value;
                replaced = true;
            }
        });
        replaced
    }

    pub fn extend(&self, values: impl IntoIterator<Item = T>) {
        let _ = self.core.mutate(|list| list.extend(values));
    }

    pub fn retain(&self, f: impl FnMut(&T) -> bool) {
        let _ = self.core.mutate(|list| list.retain(f));
    }

    pub fn clear(&self) {
        let _ = self.core.mutate(Vec::clear);
    }

    /// Tracked length read.
    #[must_use]
    pub fn len(&self) -> usize {
        self.with(|list| list.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty_list(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + 'static> Beacon<Vec<T>> for ListBeacon<T> {
    fn core(&self) -> &Rc<ProducerCore<Vec<T>>> {
        &self.core
    }
}

impl<T: Clone + std::fmt::Debug + 'static> std::fmt::Debug for ListBeacon<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListBeacon")
            .field("name", &self.core.name())
            .field("value", &self.core.peek())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SetBeacon
// ---------------------------------------------------------------------------

/// A hash-set cell with notifying mutation methods.
///
/// Cloning the handle shares the same cell.
pub struct SetBeacon<T: Clone + std::hash::Hash + Eq + 'static> {
    core: Rc<ProducerCore<AHashSet<T>>>,
}

impl<T: Clone + std::hash::Hash + Eq + 'static> Clone for SetBeacon<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T: Clone + std::hash::Hash + Eq + 'static> SetBeacon<T> {
    pub(crate) fn create(rt: &Runtime, initial: AHashSet<T>, name: Option<String>) -> Self {
        Self {
            core: ProducerCore::new(rt, "set", name, Some(initial)),
        }
    }

    /// Insert; returns `true` if the value was new. No-value-change inserts
    /// still notify.
    pub fn insert(&self, value: T) -> bool {
        let mut inserted = false;
        let _ = self.core.mutate(|set| inserted = set.insert(value));
        inserted
    }

    pub fn remove(&self, value: &T) -> bool {
        let mut removed = false;
        let _ = self.core.mutate(|set| removed = set.remove(value));
        removed
    }

    /// Tracked membership read.
    #[must_use]
    pub fn contains(&self, value: &T) -> bool {
        self.with(|set| set.contains(value)).unwrap_or(false)
    }

    pub fn clear(&self) {
        let _ = self.core.mutate(|set| set.clear());
    }

    /// Tracked size read.
    #[must_use]
    pub fn len(&self) -> usize {
        self.with(|set| set.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty_set(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + std::hash::Hash + Eq + 'static> Beacon<AHashSet<T>> for SetBeacon<T> {
    fn core(&self) -> &Rc<ProducerCore<AHashSet<T>>> {
        &self.core
    }
}

// ---------------------------------------------------------------------------
// MapBeacon
// ---------------------------------------------------------------------------

/// A hash-map cell with notifying mutation methods.
///
/// Cloning the handle shares the same cell.
pub struct MapBeacon<K, V>
where
    K: Clone + std::hash::Hash + Eq + 'static,
    V: Clone + 'static,
{
    core: Rc<ProducerCore<AHashMap<K, V>>>,
}

impl<K, V> Clone for MapBeacon<K, V>
where
    K: Clone + std::hash::Hash + Eq + 'static,
    V: Clone + 'static,
{
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<K, V> MapBeacon<K, V>
where
    K: Clone + std::hash::Hash + Eq + 'static,
    V: Clone + 'static,
{
    pub(crate) fn create(rt: &Runtime, initial: AHashMap<K, V>, name: Option<String>) -> Self {
        Self {
            core: ProducerCore::new(rt, "map", name, Some(initial)),
        }
    }

    /// Insert; returns the previous value under the key, if any.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let mut previous = None;
        let _ = self.core.mutate(|map| previous = map.insert(key, value));
        previous
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let mut removed = None;
        let _ = self.core.mutate(|map| removed = map.remove(key));
        removed
    }

    /// Tracked lookup.
    #[must_use]
    pub fn get_value(&self, key: &K) -> Option<V> {
        self.with(|map| map.get(key).cloned()).ok().flatten()
    }

    /// Tracked membership read.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.with(|map| map.contains_key(key)).unwrap_or(false)
    }

    pub fn clear(&self) {
        let _ = self.core.mutate(|map| map.clear());
    }

    /// Tracked size read.
    #[must_use]
    pub fn len(&self) -> usize {
        self.with(|map| map.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty_map(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Beacon<AHashMap<K, V>> for MapBeacon<K, V>
where
    K: Clone + std::hash::Hash + Eq + 'static,
    V: Clone + 'static,
{
    fn core(&self) -> &Rc<ProducerCore<AHashMap<K, V>>> {
        &self.core
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use crate::creator::OpsRuntimeExt;

    #[test]
    fn list_mutations_notify() {
        let (rt, _clock) = Runtime::new_test();
        rt.use_sync();
        let list = rt.list(vec![1, 2]);
        let notifications = Rc::new(RefCell::new(0u32));
        let n = Rc::clone(&notifications);
        let _sub = list.subscribe_with(
            move |_: &Vec<i32>| *n.borrow_mut() += 1,
            lodestar_core::SubscribeOptions::new().with_start_now(false),
        );

        list.push(3);
        assert_eq!(list.pop(), Some(3));
        list.insert(0, 0);
        assert_eq!(list.remove(0), Some(0));
        list.set_at(1, 9);
        assert_eq!(list.peek(), vec![1, 9]);
        assert_eq!(*notifications.borrow(), 5);
    }

    #[test]
    fn list_out_of_bounds_is_safe() {
        let (rt, _clock) = Runtime::new_test();
        let list = rt.list::<i32>(vec![]);
        assert_eq!(list.remove(3), None);
        assert!(!list.set_at(0, 1));
        assert_eq!(list.pop(), None);
    }

    #[test]
    fn list_is_trackable_by_derivations() {
        let (rt, _clock) = Runtime::new_test();
        rt.use_sync();
        let list = rt.list(vec![1, 2, 3]);
        let total = {
            let list = list.clone();
            rt.derived(move || list.with(|v| v.iter().sum::<i32>()).unwrap_or(0))
        };
        assert_eq!(total.peek(), 6);
        list.push(4);
        assert_eq!(total.peek(), 10);
        list.clear();
        assert_eq!(total.peek(), 0);
    }

    #[test]
    fn set_insert_and_remove() {
        let (rt, _clock) = Runtime::new_test();
        let set = rt.hash_set::<&str>(AHashSet::new());
        assert!(set.insert("a"));
        assert!(!set.insert("a"));
        assert!(set.contains(&"a"));
        assert!(set.remove(&"a"));
        assert!(set.is_empty_set());
    }

    #[test]
    fn map_insert_lookup_remove() {
        let (rt, _clock) = Runtime::new_test();
        let map = rt.hash_map::<&str, i32>(AHashMap::new());
        assert_eq!(map.insert("one", 1), None);
        assert_eq!(map.insert("one", 11), Some(1));
        assert_eq!(map.get_value(&"one"), Some(11));
        assert!(map.contains_key(&"one"));
        assert_eq!(map.remove(&"one"), Some(11));
        assert_eq!(map.len(), 0);
    }
}
