//! This module contains copy-on-write associative containers used for state
//! that is shared between forked symbolic states.
//!
//! Cloning one of these containers is `O(1)`, as the clone shares its storage
//! with the original. The first mutation through either handle detaches that
//! handle from the shared storage, so a clone can never observe a mutation
//! performed on one of its siblings.

use std::{
    collections::{HashMap, HashSet},
    fmt::Debug,
    hash::Hash,
    rc::Rc,
};

use derivative::Derivative;

/// A map whose storage is shared between clones until one of them is mutated.
#[derive(Derivative)]
#[derivative(
    Clone(bound = ""),
    Debug(bound = "K: Debug, V: Debug"),
    Default(bound = "")
)]
pub struct CowMap<K, V> {
    inner: Rc<HashMap<K, V>>,
}

impl<K, V> CowMap<K, V>
where
    K: Eq + Hash,
{
    /// Creates a new, empty, map.
    #[must_use]
    pub fn new() -> Self {
        let inner = Rc::new(HashMap::new());
        Self { inner }
    }

    /// Gets the value associated with `key`, if any.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.inner.get(key)
    }

    /// Checks if the map contains an entry for `key`.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    /// Gets the number of entries in the map.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Checks if the map has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterates over the entries of the map in an arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.inner.iter()
    }

    /// Checks if `self` and `other` still share the same storage.
    #[must_use]
    pub fn shares_storage_with(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<K, V> CowMap<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    /// Inserts `value` under `key`, returning the previous value if one was
    /// present.
    ///
    /// # Complexity
    ///
    /// If the storage is shared with another handle it is copied first, which
    /// is `O(n)`. Otherwise the insertion is `O(1)`.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        Rc::make_mut(&mut self.inner).insert(key, value)
    }

    /// Gets a mutable reference to the value associated with `key`, detaching
    /// the storage from other handles if the key is present.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        if self.inner.contains_key(key) {
            Rc::make_mut(&mut self.inner).get_mut(key)
        } else {
            None
        }
    }

    /// Removes the entry for `key`, returning its value if one was present.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        if self.inner.contains_key(key) {
            Rc::make_mut(&mut self.inner).remove(key)
        } else {
            None
        }
    }

    /// Creates a new map that is `self` with `value` inserted under `key`,
    /// leaving `self` untouched.
    #[must_use]
    pub fn with(&self, key: K, value: V) -> Self {
        let mut new = self.clone();
        new.insert(key, value);
        new
    }
}

/// A set whose storage is shared between clones until one of them is mutated.
#[derive(Derivative)]
#[derivative(Clone(bound = ""), Debug(bound = "T: Debug"), Default(bound = ""))]
pub struct CowSet<T> {
    inner: Rc<HashSet<T>>,
}

impl<T> CowSet<T>
where
    T: Eq + Hash,
{
    /// Creates a new, empty, set.
    #[must_use]
    pub fn new() -> Self {
        let inner = Rc::new(HashSet::new());
        Self { inner }
    }

    /// Checks if `item` is a member of the set.
    #[must_use]
    pub fn contains(&self, item: &T) -> bool {
        self.inner.contains(item)
    }

    /// Gets the number of members of the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Checks if the set has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterates over the members of the set in an arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.inner.iter()
    }

    /// Checks if `self` and `other` still share the same storage.
    #[must_use]
    pub fn shares_storage_with(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> CowSet<T>
where
    T: Clone + Eq + Hash,
{
    /// Adds `item` to the set, returning `true` if it was not already present.
    ///
    /// The storage is only detached from other handles if the item is new.
    pub fn insert(&mut self, item: T) -> bool {
        if self.inner.contains(&item) {
            false
        } else {
            Rc::make_mut(&mut self.inner).insert(item)
        }
    }
}

/// A list whose storage is shared between clones until one of them is
/// mutated.
#[derive(Derivative)]
#[derivative(Clone(bound = ""), Debug(bound = "T: Debug"), Default(bound = ""))]
pub struct CowVec<T> {
    inner: Rc<Vec<T>>,
}

impl<T> CowVec<T> {
    /// Creates a new, empty, list.
    #[must_use]
    pub fn new() -> Self {
        let inner = Rc::new(Vec::new());
        Self { inner }
    }

    /// Gets the number of items in the list.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Checks if the list has no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Gets the items of the list in insertion order.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.inner
    }

    /// Iterates over the items of the list in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.inner.iter()
    }
}

impl<T: Clone> CowVec<T> {
    /// Appends `item` to the end of the list.
    pub fn push(&mut self, item: T) {
        Rc::make_mut(&mut self.inner).push(item);
    }

    /// Appends every item of `items` to the end of the list.
    pub fn extend(&mut self, items: impl IntoIterator<Item = T>) {
        let mut items = items.into_iter().peekable();
        if items.peek().is_some() {
            Rc::make_mut(&mut self.inner).extend(items);
        }
    }
}

#[cfg(test)]
mod test {
    use crate::data::cow::{CowMap, CowSet, CowVec};

    #[test]
    fn clones_share_storage_until_mutated() {
        let mut original: CowMap<u32, &str> = CowMap::new();
        original.insert(1, "one");

        let mut fork = original.clone();
        assert!(fork.shares_storage_with(&original));

        fork.insert(2, "two");
        assert!(!fork.shares_storage_with(&original));
        assert_eq!(original.len(), 1);
        assert_eq!(fork.len(), 2);
        assert_eq!(original.get(&2), None);
    }

    #[test]
    fn sibling_clones_never_observe_each_other() {
        let mut base: CowMap<u32, u32> = CowMap::new();
        base.insert(0, 0);
        let mut left = base.clone();
        let mut right = base.clone();

        left.insert(0, 1);
        right.insert(0, 2);

        assert_eq!(base.get(&0), Some(&0));
        assert_eq!(left.get(&0), Some(&1));
        assert_eq!(right.get(&0), Some(&2));
    }

    #[test]
    fn with_leaves_the_original_untouched() {
        let base: CowMap<u32, u32> = CowMap::new();
        let extended = base.with(3, 4);
        assert!(base.is_empty());
        assert_eq!(extended.get(&3), Some(&4));
    }

    #[test]
    fn set_insert_of_existing_member_keeps_sharing() {
        let mut set = CowSet::new();
        set.insert(7u32);
        let mut fork = set.clone();
        assert!(!fork.insert(7));
        assert!(fork.shares_storage_with(&set));
        assert!(fork.insert(8));
        assert!(!set.contains(&8));
    }

    #[test]
    fn lists_detach_on_push() {
        let mut list = CowVec::new();
        list.push(1u32);
        let mut fork = list.clone();
        fork.extend([]);
        assert_eq!(fork.as_slice(), &[1]);
        fork.push(2);
        assert_eq!(list.len(), 1);
        assert_eq!(fork.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
    }
}
