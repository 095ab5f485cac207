/// Generational index into the arena.
/// Allows safe reuse of slots with use-after-free detection.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct SlotId {
    pub index: u32,
    pub generation: u32,
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot allocator with generation checks.
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_list: Vec<u32>,
    live: usize,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            live: 0,
        }
    }

    /// Allocate a new slot in the arena.
    pub fn alloc(&mut self, value: T) -> SlotId {
        self.live += 1;
        if let Some(index) = self.free_list.pop() {
            // Generation was bumped on free
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            SlotId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                value: Some(value),
            });
            SlotId { index, generation: 0 }
        }
    }

    /// Free a slot, making it available for reuse.
    pub fn free(&mut self, id: SlotId) -> Option<T> {
        if !self.is_valid(id) {
            return None;
        }
        let slot = &mut self.slots[id.index as usize];
        // Bump generation immediately to invalidate the id
        slot.generation += 1;
        self.free_list.push(id.index);
        self.live -= 1;
        slot.value.take()
    }

    /// Check if a SlotId is valid (correct generation, not freed).
    pub fn is_valid(&self, id: SlotId) -> bool {
        self.slots
            .get(id.index as usize)
            .is_some_and(|slot| slot.generation == id.generation && slot.value.is_some())
    }

    pub fn get(&self, id: SlotId) -> Option<&T> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut T> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    /// Number of live slots.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    SlotId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    value,
                )
            })
        })
    }

    /// Frees every slot; outstanding ids become invalid.
    pub fn clear(&mut self) {
        let ids: Vec<_> = self.iter().map(|(id, _)| id).collect();
        for id in ids {
            self.free(id);
        }
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_alloc_and_free() {
        let mut arena = Arena::new();

        let slot1 = arena.alloc("a");
        let slot2 = arena.alloc("b");

        assert!(arena.is_valid(slot1));
        assert!(arena.is_valid(slot2));
        assert_ne!(slot1, slot2);

        assert_eq!(arena.free(slot1), Some("a"));
        assert!(!arena.is_valid(slot1));
        assert_eq!(arena.free(slot1), None);

        // Reuse freed slot
        let slot3 = arena.alloc("c");
        assert_eq!(slot3.index, slot1.index);
        assert_ne!(slot3.generation, slot1.generation);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn arena_get_mut() {
        let mut arena = Arena::new();
        let slot = arena.alloc(1);

        *arena.get_mut(slot).unwrap() += 1;

        assert_eq!(arena.get(slot), Some(&2));
    }

    #[test]
    fn arena_generation_check() {
        let mut arena = Arena::new();

        let slot1 = arena.alloc(());
        arena.free(slot1);
        let slot2 = arena.alloc(()); // Reuses slot1's index

        // Old slot ID should be invalid
        assert!(!arena.is_valid(slot1));
        assert!(arena.get(slot1).is_none());
        assert!(arena.is_valid(slot2));
    }

    #[test]
    fn arena_clear_invalidates_everything() {
        let mut arena = Arena::new();
        let ids: Vec<_> = (0..3).map(|value| arena.alloc(value)).collect();
        arena.clear();
        assert!(arena.is_empty());
        assert!(ids.iter().all(|id| !arena.is_valid(*id)));
    }
}
