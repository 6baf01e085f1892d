//! Per-axis sorted entity orderings
//!
//! Every collidable entity appears exactly once in each of three
//! orderings, one per world axis, sorted ascending by that axis's
//! coordinate. Because per-tick displacement is small relative to entity
//! spacing, re-sorting after movement is a bubble of adjacent swaps —
//! amortized near-O(1) per entity per tick, where a full re-sort would be
//! O(n log n).
//!
//! Entries are plain indices into the entity arena rather than intrusive
//! node pointers; a secondary map records each entity's slot in each
//! ordering so removal needs no search.

use slotmap::SecondaryMap;

use crate::entity::EntityId;
use crate::foundation::math::Vec3;

/// One entry in an axis ordering
#[derive(Debug, Clone, Copy, PartialEq)]
struct Entry {
    id: EntityId,
    key: f32,
}

/// Three axis-sorted orderings over the collidable entity population
#[derive(Debug, Default)]
pub struct AxisLists {
    order: [Vec<Entry>; 3],
    slots: SecondaryMap<EntityId, [usize; 3]>,
}

impl AxisLists {
    /// Create empty orderings
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entities tracked (identical across all three orderings)
    pub fn len(&self) -> usize {
        self.order[0].len()
    }

    /// Whether no entities are tracked
    pub fn is_empty(&self) -> bool {
        self.order[0].is_empty()
    }

    /// Whether an entity is tracked
    pub fn contains(&self, id: EntityId) -> bool {
        self.slots.contains_key(id)
    }

    /// Insert an entity at its sorted position in all three orderings.
    ///
    /// Spawn-time cost is a binary search plus a shift per axis; ties on
    /// an axis preserve insertion order.
    pub fn insert(&mut self, id: EntityId, position: Vec3) {
        debug_assert!(!self.contains(id), "entity inserted into axis lists twice");

        let mut slot = [0usize; 3];
        for axis in 0..3 {
            let key = position[axis];
            let index = self.order[axis].partition_point(|e| e.key <= key);
            self.order[axis].insert(index, Entry { id, key });
            slot[axis] = index;
            self.reindex_from(axis, index + 1);
        }
        self.slots.insert(id, slot);
    }

    /// Unlink an entity from all three orderings.
    ///
    /// Uses the stored slots, so no search is required; neighbours close
    /// ranks and their recorded slots are patched before returning.
    pub fn remove(&mut self, id: EntityId) {
        let Some(slot) = self.slots.remove(id) else {
            return;
        };
        for axis in 0..3 {
            let index = slot[axis];
            debug_assert_eq!(self.order[axis][index].id, id, "axis slot out of sync");
            self.order[axis].remove(index);
            self.reindex_from(axis, index);
        }
    }

    /// Re-sort an entity after its position changed, by bubbling it past
    /// adjacent entries. Equal keys never swap, keeping ties stable.
    pub fn update(&mut self, id: EntityId, position: Vec3) {
        let Some(&slot) = self.slots.get(id) else {
            return;
        };

        for axis in 0..3 {
            let mut index = slot[axis];
            self.order[axis][index].key = position[axis];

            while index > 0 && self.order[axis][index - 1].key > self.order[axis][index].key {
                self.swap_adjacent(axis, index - 1);
                index -= 1;
            }
            while index + 1 < self.order[axis].len()
                && self.order[axis][index + 1].key < self.order[axis][index].key
            {
                self.swap_adjacent(axis, index);
                index += 1;
            }
        }
    }

    /// Entities in ascending order along an axis (0 = X, 1 = Y, 2 = Z)
    pub fn ordered(&self, axis: usize) -> impl Iterator<Item = EntityId> + '_ {
        self.order[axis].iter().map(|e| e.id)
    }

    /// An entity's rank along an axis, if tracked
    pub fn rank(&self, axis: usize, id: EntityId) -> Option<usize> {
        self.slots.get(id).map(|slot| slot[axis])
    }

    /// Validate every structural invariant: each ordering sorted, all
    /// three containing the same set exactly once, and every recorded
    /// slot pointing at its entity.
    ///
    /// This is a debug-build facility; the per-tick hot path never
    /// re-validates.
    pub fn verify_integrity(&self) -> Result<(), String> {
        for axis in 0..3 {
            let list = &self.order[axis];
            if list.len() != self.slots.len() {
                return Err(format!(
                    "axis {axis} has {} entries for {} tracked entities",
                    list.len(),
                    self.slots.len()
                ));
            }
            for (index, entry) in list.iter().enumerate() {
                if index > 0 && list[index - 1].key > entry.key {
                    return Err(format!("axis {axis} out of order at index {index}"));
                }
                match self.slots.get(entry.id) {
                    Some(slot) if slot[axis] == index => {}
                    Some(slot) => {
                        return Err(format!(
                            "axis {axis} slot mismatch: recorded {}, actual {index}",
                            slot[axis]
                        ));
                    }
                    None => {
                        return Err(format!("axis {axis} entry at {index} not in slot map"));
                    }
                }
            }
        }
        Ok(())
    }

    fn swap_adjacent(&mut self, axis: usize, lower: usize) {
        self.order[axis].swap(lower, lower + 1);
        let a = self.order[axis][lower].id;
        let b = self.order[axis][lower + 1].id;
        self.slots[a][axis] = lower;
        self.slots[b][axis] = lower + 1;
    }

    fn reindex_from(&mut self, axis: usize, start: usize) {
        for index in start..self.order[axis].len() {
            let id = self.order[axis][index].id;
            self.slots[id][axis] = index;
        }
    }
}
