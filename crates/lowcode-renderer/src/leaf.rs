//! Identity cache for wrapped leaves.
//!
//! Maps `leaf → (override source, wrap decision) → derived component`. The
//! derived component for a pair is created once and handed out unchanged
//! afterwards, so the mount pass sees the same component identity on every
//! render. Entries are owned by one render root; the root's generation is
//! retired in bulk on unmount.

use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::component::{Component, ComponentId};

/// Monotonically increasing id of a render root's cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(u64);

thread_local! {
    static NEXT_GENERATION: Cell<u64> = const { Cell::new(1) };
}

impl Generation {
    fn next() -> Self {
        NEXT_GENERATION.with(|next| {
            let generation = next.get();
            next.set(generation + 1);
            Self(generation)
        })
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

struct CachedWrap {
    source: Weak<Component>,
    derived: Rc<Component>,
}

struct LeafEntry {
    leaf: Weak<Component>,
    wraps: HashMap<(ComponentId, bool), CachedWrap>,
}

impl LeafEntry {
    /// The leaf is alive only through derived components this entry owns.
    fn is_unreachable(&self, leaf_id: ComponentId) -> bool {
        let strong = self.leaf.strong_count();
        if strong == 0 {
            return true;
        }
        let mut held_by_cache = 0;
        for wrap in self.wraps.values() {
            if wrap.derived.id() == leaf_id {
                held_by_cache += 1;
            } else if Rc::strong_count(&wrap.derived) == 1 {
                held_by_cache += 1;
            } else {
                return false;
            }
        }
        strong == held_by_cache
    }
}

pub struct LeafCache {
    generation: Generation,
    retired: bool,
    entries: HashMap<ComponentId, LeafEntry>,
}

impl Default for LeafCache {
    fn default() -> Self {
        Self::new()
    }
}

impl LeafCache {
    pub fn new() -> Self {
        Self {
            generation: Generation::next(),
            retired: false,
            entries: HashMap::new(),
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    pub fn get(&self, leaf: &Component, source: &Component, wrap: bool) -> Option<Rc<Component>> {
        self.entries
            .get(&leaf.id())
            .and_then(|entry| entry.wraps.get(&(source.id(), wrap)))
            .map(|cached| cached.derived.clone())
    }

    /// Cached derived component for the pair, or the one `make` builds.
    pub fn get_or_insert_with(
        &mut self,
        leaf: &Rc<Component>,
        source: &Rc<Component>,
        wrap: bool,
        make: impl FnOnce() -> Rc<Component>,
    ) -> Rc<Component> {
        if let Some(derived) = self.get(leaf, source, wrap) {
            trace!(leaf = leaf.name(), source = source.name(), "leaf cache hit");
            return derived;
        }
        let derived = make();
        self.entries
            .entry(leaf.id())
            .or_insert_with(|| LeafEntry {
                leaf: Rc::downgrade(leaf),
                wraps: HashMap::new(),
            })
            .wraps
            .insert(
                (source.id(), wrap),
                CachedWrap {
                    source: Rc::downgrade(source),
                    derived: derived.clone(),
                },
            );
        derived
    }

    /// Number of cached pairs.
    pub fn len(&self) -> usize {
        self.entries.values().map(|entry| entry.wraps.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn leaf_count(&self) -> usize {
        self.entries.len()
    }

    /// Drops pairs whose source is gone and leaves reachable only through
    /// the cache. Returns how many pairs were removed.
    pub fn purge_dead(&mut self) -> usize {
        let mut removed = 0;
        self.entries.retain(|leaf_id, entry| {
            let before = entry.wraps.len();
            entry.wraps.retain(|_, wrap| wrap.source.strong_count() > 0);
            removed += before - entry.wraps.len();
            if entry.wraps.is_empty() || entry.is_unreachable(*leaf_id) {
                removed += entry.wraps.len();
                return false;
            }
            true
        });
        removed
    }

    /// Empties the cache for good; the owning root unmounted.
    pub fn retire(&mut self) -> usize {
        let removed = self.len();
        self.entries.clear();
        self.retired = true;
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ComponentKind, LeafMode};
    use indexmap::IndexMap;

    fn leaf() -> Rc<Component> {
        Rc::new(Component::new("Live", ComponentKind::Leaf(LeafMode::Live)))
    }

    #[test]
    fn pairs_are_built_once() {
        let mut cache = LeafCache::new();
        let leaf = leaf();
        let source = Component::plain("Button");
        let mut builds = 0;
        let mut wrap = |cache: &mut LeafCache| {
            cache.get_or_insert_with(&leaf, &source, true, || {
                builds += 1;
                Component::derive(&leaf, IndexMap::new())
            })
        };

        let first = wrap(&mut cache);
        let second = wrap(&mut cache);
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(builds, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn purge_drops_pairs_of_dropped_sources() {
        let mut cache = LeafCache::new();
        let leaf = leaf();
        let kept = Component::plain("Kept");
        let dropped = Component::plain("Dropped");
        cache.get_or_insert_with(&leaf, &kept, false, || leaf.clone());
        cache.get_or_insert_with(&leaf, &dropped, false, || leaf.clone());

        drop(dropped);
        assert_eq!(cache.purge_dead(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&leaf, &kept, false).is_some());
    }

    #[test]
    fn purge_drops_leaves_only_the_cache_keeps_alive() {
        let mut cache = LeafCache::new();
        let source = Component::plain("Button");
        let leaf = leaf();
        let derived = cache.get_or_insert_with(&leaf, &source, true, || {
            Component::derive(&leaf, IndexMap::new())
        });

        assert_eq!(cache.purge_dead(), 0);
        drop(leaf);
        assert_eq!(cache.purge_dead(), 0, "derived component still in use");
        drop(derived);
        assert_eq!(cache.purge_dead(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn retiring_empties_the_generation() {
        let mut first = LeafCache::new();
        let second = LeafCache::new();
        assert!(second.generation() > first.generation());

        let leaf = leaf();
        let source = Component::plain("Button");
        first.get_or_insert_with(&leaf, &source, false, || leaf.clone());
        assert_eq!(first.retire(), 1);
        assert!(first.is_retired());
        assert!(first.get(&leaf, &source, false).is_none());
    }
}
