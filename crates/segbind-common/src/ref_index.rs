//! Reference counting index that never auto-creates entries.
//!
//! Counting references with `*map.entry(k).or_default() += 1` style code
//! makes it easy to resurrect a key while releasing it, and the count then
//! never returns to zero. `RefIndex` keeps creation explicit:
//! - `acquire()` is the only operation that inserts
//! - `release()` fails with `KeyNotFound` on a missing key
//! - `count()` reports 0 for a missing key without inserting it

use std::collections::BTreeMap;
use thiserror::Error;

/// Error type for RefIndex operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefIndexError {
    #[error("Key not found")]
    KeyNotFound,
}

/// What happened to a key's count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefTransition {
    /// First reference; the key was created.
    Created,
    /// The count went up to the given value.
    Incremented(u32),
    /// The count went down to the given non-zero value.
    Decremented(u32),
    /// Last reference released; the key is gone.
    Dropped,
}

/// Reference counts keyed by `K`.
///
/// # Example
///
/// ```
/// use segbind_common::{RefIndex, RefTransition};
///
/// let mut refs: RefIndex<&str> = RefIndex::new();
/// assert_eq!(refs.acquire("vlan100"), RefTransition::Created);
/// assert_eq!(refs.acquire("vlan100"), RefTransition::Incremented(2));
/// assert_eq!(refs.release(&"vlan100"), Ok(RefTransition::Decremented(1)));
/// assert_eq!(refs.release(&"vlan100"), Ok(RefTransition::Dropped));
/// assert_eq!(refs.count(&"vlan100"), 0);
/// ```
#[derive(Debug, Clone)]
pub struct RefIndex<K> {
    inner: BTreeMap<K, u32>,
}

impl<K: Ord> Default for RefIndex<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord> RefIndex<K> {
    pub fn new() -> Self {
        Self {
            inner: BTreeMap::new(),
        }
    }

    /// Adds a reference, creating the key on first use.
    pub fn acquire(&mut self, key: K) -> RefTransition {
        let count = self.inner.entry(key).or_insert(0);
        *count += 1;
        if *count == 1 {
            RefTransition::Created
        } else {
            RefTransition::Incremented(*count)
        }
    }

    /// Removes a reference. The key is dropped when its count reaches zero.
    ///
    /// **This never creates entries.**
    pub fn release(&mut self, key: &K) -> Result<RefTransition, RefIndexError> {
        let count = self.inner.get_mut(key).ok_or(RefIndexError::KeyNotFound)?;
        *count -= 1;
        if *count == 0 {
            self.inner.remove(key);
            Ok(RefTransition::Dropped)
        } else {
            Ok(RefTransition::Decremented(*count))
        }
    }

    /// Current count; 0 for unknown keys.
    pub fn count(&self, key: &K) -> u32 {
        self.inner.get(key).copied().unwrap_or(0)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    /// Number of referenced keys.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, u32)> {
        self.inner.iter().map(|(k, c)| (k, *c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_auto_vivification() {
        let mut refs: RefIndex<String> = RefIndex::new();

        assert_eq!(refs.count(&"missing".to_string()), 0);
        assert!(!refs.contains(&"missing".to_string()));
        assert_eq!(
            refs.release(&"missing".to_string()),
            Err(RefIndexError::KeyNotFound)
        );
        assert!(refs.is_empty());
    }

    #[test]
    fn test_acquire_release_cycle() {
        let mut refs = RefIndex::new();

        assert_eq!(refs.acquire(100u16), RefTransition::Created);
        assert_eq!(refs.acquire(100u16), RefTransition::Incremented(2));
        assert_eq!(refs.acquire(200u16), RefTransition::Created);
        assert_eq!(refs.len(), 2);

        assert_eq!(refs.release(&100), Ok(RefTransition::Decremented(1)));
        assert_eq!(refs.release(&100), Ok(RefTransition::Dropped));
        assert!(!refs.contains(&100));
        assert_eq!(refs.len(), 1);

        // Re-acquiring after a drop starts over.
        assert_eq!(refs.acquire(100u16), RefTransition::Created);
    }

    #[test]
    fn test_iter_in_key_order() {
        let mut refs = RefIndex::new();
        refs.acquire("b");
        refs.acquire("a");
        refs.acquire("a");

        let counts: Vec<_> = refs.iter().collect();
        assert_eq!(counts, vec![(&"a", 2), (&"b", 1)]);
    }
}
