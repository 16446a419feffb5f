//! Identifier-based lookup for entities referenced from deferred callbacks.
//!
//! Timers never hold the entity itself, only its [`EntityId`]. When a timer
//! fires after the entity was despawned the lookup misses and the callback
//! does nothing.

use crate::entity::{Entity, EntityId};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: HashMap<EntityId, Entity>,
    next_id: u64,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entity built by `build` and return its fresh id.
    ///
    /// Ids are never reused, so a stale id cannot resolve to a newer entity.
    pub fn spawn(&mut self, build: impl FnOnce(EntityId) -> Entity) -> EntityId {
        self.next_id += 1;
        let id = EntityId(self.next_id);
        self.entities.insert(id, build(id));
        id
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn despawn(&mut self, id: EntityId) -> Option<Entity> {
        self.entities.remove(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
