#![forbid(unsafe_code)]

//! Key/value patches: a ready-made composable payload.
//!
//! A [`Patch`] is a set of key assignments. Composing patches overlays them
//! in order, so later assignments win; that makes composition associative,
//! as [`Composer`] requires. Assignments live in an [`im::OrdMap`], so
//! cloning a large composed patch shares structure instead of copying.
//!
//! ```ignore
//! let composer = PatchComposer::<String, u32>::new();
//! let mut history = HistoryEngine::new(Patch::new(), composer, DeferredQueue::new());
//! history.push(Patch::new().with("opacity".into(), 80));
//! ```

use std::borrow::Borrow;
use std::fmt;

use im::OrdMap;

use crate::composer::Composer;

/// An ordered set of key assignments.
pub struct Patch<K, V> {
    assignments: OrdMap<K, V>,
}

impl<K: Ord + Clone, V: Clone> Patch<K, V> {
    /// Empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self {
            assignments: OrdMap::new(),
        }
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, key: K, value: V) -> Self {
        self.insert(key, value);
        self
    }

    /// Assign `value` to `key`, returning the previous assignment.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.assignments.insert(key, value)
    }

    /// Value assigned to `key`.
    #[must_use]
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        Q: Ord + ?Sized,
        K: Borrow<Q>,
    {
        self.assignments.get(key)
    }

    /// Number of assignments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    /// True if the patch assigns nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Assignments in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.assignments.iter()
    }

    /// Apply `top` over `self`; assignments in `top` win.
    #[must_use]
    pub fn overlay(&self, top: &Self) -> Self {
        let mut assignments = self.assignments.clone();
        for (k, v) in top.assignments.iter() {
            assignments.insert(k.clone(), v.clone());
        }
        Self { assignments }
    }
}

impl<K: Ord + Clone, V: Clone> Default for Patch<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone, V: Clone> Clone for Patch<K, V> {
    fn clone(&self) -> Self {
        Self {
            assignments: self.assignments.clone(),
        }
    }
}

impl<K: Ord + Clone, V: Clone + PartialEq> PartialEq for Patch<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other.iter()).all(|(a, b)| a == b)
    }
}

impl<K: Ord + Clone, V: Clone + Eq> Eq for Patch<K, V> {}

impl<K: Ord + Clone + fmt::Debug, V: Clone + fmt::Debug> fmt::Debug for Patch<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: Ord + Clone, V: Clone> FromIterator<(K, V)> for Patch<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut patch = Self::new();
        for (k, v) in iter {
            patch.insert(k, v);
        }
        patch
    }
}

fn default_value_size<V>(_: &V) -> usize {
    std::mem::size_of::<V>()
}

/// [`Composer`] for [`Patch`] payloads.
///
/// Size estimate: `entry_overhead + value_size(v)` per assignment.
pub struct PatchComposer<K, V> {
    entry_overhead: usize,
    value_size: fn(&V) -> usize,
    _key: std::marker::PhantomData<fn() -> K>,
}

impl<K, V> fmt::Debug for PatchComposer<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchComposer")
            .field("entry_overhead", &self.entry_overhead)
            .finish_non_exhaustive()
    }
}

impl<K, V> Default for PatchComposer<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> PatchComposer<K, V> {
    /// Charge `size_of::<K>()` per assignment plus `size_of::<V>()` per value.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entry_overhead: std::mem::size_of::<K>(),
            value_size: default_value_size::<V>,
            _key: std::marker::PhantomData,
        }
    }

    /// Fixed cost charged per assignment.
    #[must_use]
    pub fn with_entry_overhead(mut self, bytes: usize) -> Self {
        self.entry_overhead = bytes;
        self
    }

    /// Per-value cost function (e.g. heap length of a buffer).
    #[must_use]
    pub fn with_value_size(mut self, value_size: fn(&V) -> usize) -> Self {
        self.value_size = value_size;
        self
    }
}

impl<K: Ord + Clone, V: Clone + PartialEq> Composer<Patch<K, V>> for PatchComposer<K, V> {
    fn estimate_bytes(&self, payload: &Patch<K, V>) -> usize {
        payload.iter().fold(0usize, |acc, (_, v)| {
            acc.saturating_add(self.entry_overhead)
                .saturating_add((self.value_size)(v))
        })
    }

    fn compose(&self, payloads: &[&Patch<K, V>], _anchor_hint: Option<usize>) -> Patch<K, V> {
        let Some((first, rest)) = payloads.split_first() else {
            return Patch::new();
        };
        rest.iter().fold((*first).clone(), |acc, top| acc.overlay(top))
    }

    fn causes_change(&self, candidate: &Patch<K, V>, reference: &Patch<K, V>) -> bool {
        candidate.iter().any(|(k, v)| reference.get(k) != Some(v))
    }
}
