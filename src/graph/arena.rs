//! Generation-checked slot storage for graph entities.

use slab::Slab;

use crate::types::Handle;

/// Slab storage whose handles carry the slot generation.
///
/// Removing an entry bumps the generation of its slot, so handles to the
/// removed entry no longer resolve even after the slot is reused.
#[derive(Clone, Debug)]
pub(crate) struct Arena<T> {
    entries: Slab<T>,
    generations: Vec<u32>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            entries: Slab::new(),
            generations: Vec::new(),
        }
    }
}

impl<T> Arena<T> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert<H: Handle>(&mut self, value: T) -> H {
        let index = self.entries.insert(value);
        if index >= self.generations.len() {
            self.generations.resize(index + 1, 0);
        }
        H::from_parts(index, self.generations[index])
    }

    pub(crate) fn contains<H: Handle>(&self, handle: H) -> bool {
        self.entries.contains(handle.index())
            && self.generations.get(handle.index()) == Some(&handle.generation())
    }

    pub(crate) fn get<H: Handle>(&self, handle: H) -> Option<&T> {
        if self.contains(handle) {
            self.entries.get(handle.index())
        } else {
            None
        }
    }

    pub(crate) fn get_mut<H: Handle>(&mut self, handle: H) -> Option<&mut T> {
        if self.contains(handle) {
            self.entries.get_mut(handle.index())
        } else {
            None
        }
    }

    pub(crate) fn remove<H: Handle>(&mut self, handle: H) -> Option<T> {
        if !self.contains(handle) {
            return None;
        }
        let value = self.entries.remove(handle.index());
        let generation = &mut self.generations[handle.index()];
        *generation = generation.wrapping_add(1);
        Some(value)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// One past the highest slot index ever used.
    pub(crate) fn capacity_bound(&self) -> usize {
        self.generations.len()
    }

    /// Live entries in ascending slot order.
    pub(crate) fn iter<H: Handle>(&self) -> impl Iterator<Item = (H, &T)> + '_ {
        self.entries
            .iter()
            .map(move |(index, value)| (H::from_parts(index, self.generations[index]), value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeId;

    #[test]
    fn test_stale_handle_after_reuse() {
        let mut arena = Arena::new();
        let a: NodeId = arena.insert("a");
        assert_eq!(arena.remove(a), Some("a"));
        let b: NodeId = arena.insert("b");
        assert_eq!(a.index(), b.index());
        assert!(arena.get(a).is_none());
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.remove(a), None);
    }

    #[test]
    fn test_iter_skips_removed_entries() {
        let mut arena = Arena::new();
        let a: NodeId = arena.insert(1);
        let b: NodeId = arena.insert(2);
        let c: NodeId = arena.insert(3);
        arena.remove(b);
        let live: Vec<(NodeId, i32)> = arena.iter().map(|(h, v)| (h, *v)).collect();
        assert_eq!(live, vec![(a, 1), (c, 3)]);
    }
}
