//! Generational entity arena
//!
//! Entities live in a slot map: identifiers are index + generation pairs,
//! so a slot freed by a removed entity can be reused without old
//! identifiers resolving to the new occupant. Looking up a stale id is a
//! normal outcome (`None`), not an error — weak relations such as
//! projectile owners rely on this.

use slotmap::{new_key_type, SlotMap};
use thiserror::Error;

use super::Entity;

new_key_type! {
    /// Stable identifier for a live entity
    pub struct EntityId;
}

/// Errors raised by arena mutation
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ArenaError {
    /// The live-entity cap was reached
    #[error("entity arena is at capacity ({0} live entities)")]
    AtCapacity(usize),
}

/// Bounded storage for all live entities
#[derive(Debug)]
pub struct EntityArena {
    entities: SlotMap<EntityId, Entity>,
    capacity: usize,
}

impl EntityArena {
    /// Create an arena bounded at `capacity` live entities
    pub fn new(capacity: usize) -> Self {
        Self {
            entities: SlotMap::with_capacity_and_key(capacity),
            capacity,
        }
    }

    /// Insert an entity, assigning it a fresh identifier
    pub fn insert(&mut self, entity: Entity) -> Result<EntityId, ArenaError> {
        if self.entities.len() >= self.capacity {
            return Err(ArenaError::AtCapacity(self.capacity));
        }
        let id = self.entities.insert(entity);
        self.entities[id].id = id;
        Ok(id)
    }

    /// Remove an entity, releasing its identifier for reuse
    pub fn remove(&mut self, id: EntityId) -> Option<Entity> {
        self.entities.remove(id)
    }

    /// Look up a live entity; stale ids return `None`
    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// Mutable lookup; stale ids return `None`
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(id)
    }

    /// Disjoint mutable lookup of two distinct entities
    pub fn get_pair(&mut self, a: EntityId, b: EntityId) -> Option<(&mut Entity, &mut Entity)> {
        self.entities.get_disjoint_mut([a, b]).map(|[a, b]| (a, b))
    }

    /// Whether an id refers to a live entity
    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(id)
    }

    /// Number of live entities
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the arena holds no entities
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// The live-entity cap
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate over all live entities
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &Entity)> {
        self.entities.iter()
    }

    /// Iterate mutably over all live entities
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (EntityId, &mut Entity)> {
        self.entities.iter_mut()
    }

    /// Collect the ids of all live entities. Used by tick passes that
    /// need to mutate entities while walking the full population.
    pub fn ids(&self) -> Vec<EntityId> {
        self.entities.keys().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Collidable;
    use crate::foundation::math::Vec3;

    fn test_entity() -> Entity {
        Entity::builder(Vec3::zeros())
            .collidable(Collidable::sphere(1.0))
            .build()
    }

    #[test]
    fn insert_assigns_id() {
        let mut arena = EntityArena::new(8);
        let id = arena.insert(test_entity()).unwrap();
        assert_eq!(arena.get(id).unwrap().id, id);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn capacity_is_enforced() {
        let mut arena = EntityArena::new(2);
        arena.insert(test_entity()).unwrap();
        arena.insert(test_entity()).unwrap();
        assert_eq!(
            arena.insert(test_entity()),
            Err(ArenaError::AtCapacity(2))
        );
    }

    #[test]
    fn removed_slot_is_reused_with_new_generation() {
        let mut arena = EntityArena::new(8);
        let first = arena.insert(test_entity()).unwrap();
        arena.remove(first);

        let second = arena.insert(test_entity()).unwrap();
        // The slot is reclaimed but the stale id no longer resolves
        assert_ne!(first, second);
        assert!(arena.get(first).is_none());
        assert!(arena.get(second).is_some());
    }

    #[test]
    fn stale_lookup_is_none_not_panic() {
        let mut arena = EntityArena::new(8);
        let id = arena.insert(test_entity()).unwrap();
        arena.remove(id);
        assert!(arena.get(id).is_none());
        assert!(arena.get_mut(id).is_none());
        assert!(!arena.contains(id));
    }
}
