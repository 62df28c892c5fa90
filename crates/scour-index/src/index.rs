//! [`OrderedIndex`] and its embedded [`Cursor`].

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::ops::Bound;

use crate::IndexError;

type Result<T> = std::result::Result<T, IndexError>;

/// Where to position a [`Cursor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe<'k, K> {
    /// Smallest key.
    First,
    /// Largest key.
    Last,
    /// Exactly this key.
    Eq(&'k K),
    /// Smallest key greater than or equal to this one.
    Ge(&'k K),
    /// Largest key less than or equal to this one.
    Le(&'k K),
}

/// An ordered key/value index.
#[derive(Debug, Clone)]
pub struct OrderedIndex<K, V> {
    map: BTreeMap<K, V>,
}

impl<K: Ord + Clone, V> OrderedIndex<K, V> {
    /// Create an empty index.
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Look up the value stored under `key`.
    pub fn lookup(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    /// Look up the value stored under `key` for modification.
    pub fn lookup_mut(&mut self, key: &K) -> Option<&mut V> {
        self.map.get_mut(key)
    }

    /// Insert `value` under `key`, returning the value it replaced.
    pub fn insert_or_update(&mut self, key: K, value: V) -> Option<V> {
        self.map.insert(key, value)
    }

    /// Return the value under `key`, creating it with `f` if absent.
    ///
    /// The boolean is `true` when the entry was created by this call.
    pub fn lookup_or_insert_with(&mut self, key: K, f: impl FnOnce() -> V) -> (&mut V, bool) {
        match self.map.entry(key) {
            Entry::Occupied(entry) => (entry.into_mut(), false),
            Entry::Vacant(entry) => (entry.insert(f()), true),
        }
    }

    /// Remove `key`, returning its value.
    pub fn delete(&mut self, key: &K) -> Result<V> {
        self.map.remove(key).ok_or(IndexError::NotFound)
    }

    /// Iterate over entries in key order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&K, &V)> + '_ {
        self.map.iter()
    }

    /// Iterate over keys in order.
    pub fn keys(&self) -> impl DoubleEndedIterator<Item = &K> + '_ {
        self.map.keys()
    }

    /// Iterate over values in key order.
    pub fn values(&self) -> impl DoubleEndedIterator<Item = &V> + '_ {
        self.map.values()
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Open a cursor over this index. The cursor starts unset.
    pub fn cursor(&mut self) -> Cursor<'_, K, V> {
        Cursor {
            index: self,
            position: None,
        }
    }
}

impl<K: Ord + Clone, V> Default for OrderedIndex<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone, V> FromIterator<(K, V)> for OrderedIndex<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            map: iter.into_iter().collect(),
        }
    }
}

/// A cursor embedded in an [`OrderedIndex`].
///
/// The cursor holds the key it is positioned on. Stepping past either end,
/// a failed probe, or a [`Cursor::delete`] leaves it unset; reading or
/// stepping an unset cursor returns [`IndexError::CursorUnset`].
pub struct Cursor<'a, K, V> {
    index: &'a mut OrderedIndex<K, V>,
    position: Option<K>,
}

impl<K: Ord + Clone, V> Cursor<'_, K, V> {
    /// Position the cursor. Returns `false` (and unsets it) if no key matches.
    pub fn probe(&mut self, probe: Probe<'_, K>) -> bool {
        let map = &self.index.map;
        self.position = match probe {
            Probe::First => map.keys().next().cloned(),
            Probe::Last => map.keys().next_back().cloned(),
            Probe::Eq(key) => map.contains_key(key).then(|| key.clone()),
            Probe::Ge(key) => map
                .range::<K, _>((Bound::Included(key), Bound::Unbounded))
                .next()
                .map(|(k, _)| k.clone()),
            Probe::Le(key) => map
                .range::<K, _>((Bound::Unbounded, Bound::Included(key)))
                .next_back()
                .map(|(k, _)| k.clone()),
        };
        self.position.is_some()
    }

    /// Whether the cursor currently points at an entry.
    pub fn is_set(&self) -> bool {
        self.position.is_some()
    }

    /// Step to the next key. Returns `false` when the end was reached.
    pub fn next(&mut self) -> Result<bool> {
        let current = self.position.as_ref().ok_or(IndexError::CursorUnset)?;
        let next = self
            .index
            .map
            .range::<K, _>((Bound::Excluded(current), Bound::Unbounded))
            .next()
            .map(|(k, _)| k.clone());
        self.position = next;
        Ok(self.position.is_some())
    }

    /// Step to the previous key. Returns `false` when the start was reached.
    pub fn prev(&mut self) -> Result<bool> {
        let current = self.position.as_ref().ok_or(IndexError::CursorUnset)?;
        let prev = self
            .index
            .map
            .range::<K, _>((Bound::Unbounded, Bound::Excluded(current)))
            .next_back()
            .map(|(k, _)| k.clone());
        self.position = prev;
        Ok(self.position.is_some())
    }

    /// Key under the cursor.
    pub fn key(&self) -> Result<&K> {
        self.position.as_ref().ok_or(IndexError::CursorUnset)
    }

    /// Value under the cursor.
    pub fn value(&self) -> Result<&V> {
        let key = self.key()?;
        self.index.map.get(key).ok_or(IndexError::NotFound)
    }

    /// Mutable value under the cursor.
    pub fn value_mut(&mut self) -> Result<&mut V> {
        let key = self.position.as_ref().ok_or(IndexError::CursorUnset)?;
        self.index.map.get_mut(key).ok_or(IndexError::NotFound)
    }

    /// Delete the entry under the cursor and unset it.
    pub fn delete(&mut self) -> Result<(K, V)> {
        let key = self.position.take().ok_or(IndexError::CursorUnset)?;
        let value = self.index.map.remove(&key).ok_or(IndexError::NotFound)?;
        Ok((key, value))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
