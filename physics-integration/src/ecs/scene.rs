// Copyright 2025 John Brosnihan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Scene: entities, hierarchy, transforms and attached components
//!
//! The scene is the framework side of the physics integration. It owns every
//! component and reports structural changes through an event queue that the
//! owning system drains with [`dispatch_events`](super::dispatch_events):
//!
//! - attaching a component queues [`SceneEvent::ComponentAdded`];
//! - detaching one moves the component itself into
//!   [`SceneEvent::ComponentRemoved`], so the system can release whatever
//!   native resources it still holds;
//! - destroying an entity detaches its components (children first) and then
//!   queues [`SceneEvent::EntityRemoved`].
//!
//! External transform writes are recorded in a "transform changed" set.
//! Writes made on behalf of the simulation go through
//! [`Scene::write_simulated_transform`] and are not recorded.

use crate::ecs::component::ErasedStorage;
use crate::ecs::{Component, ComponentId, ComponentStorage, Entity};
use crate::math::Transform;
use std::any::{Any, TypeId};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;

/// A component that has been detached from the scene
pub struct RemovedComponent {
    id: ComponentId,
    type_id: TypeId,
    component: Box<dyn Any + Send + Sync>,
}

impl RemovedComponent {
    /// Id the component had while attached
    pub fn id(&self) -> ComponentId {
        self.id
    }

    /// Check the concrete component type
    pub fn is<T: Component>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Take the component back by value
    pub fn downcast<T: Component>(self) -> Result<T, RemovedComponent> {
        let RemovedComponent {
            id,
            type_id,
            component,
        } = self;
        component
            .downcast::<T>()
            .map(|c| *c)
            .map_err(|component| RemovedComponent {
                id,
                type_id,
                component,
            })
    }
}

impl fmt::Debug for RemovedComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemovedComponent")
            .field("id", &self.id)
            .field("type_id", &self.type_id)
            .finish_non_exhaustive()
    }
}

/// Structural change reported to the owning system
#[derive(Debug)]
pub enum SceneEvent {
    /// An entity was created
    EntityAdded(Entity),
    /// An entity was destroyed, after all of its components were removed
    EntityRemoved(Entity),
    /// A component was attached
    ComponentAdded {
        /// Owning entity
        entity: Entity,
        /// Component id
        id: ComponentId,
        /// Concrete component type
        type_id: TypeId,
    },
    /// A component was detached
    ComponentRemoved {
        /// Entity the component was attached to
        entity: Entity,
        /// The detached component
        removed: RemovedComponent,
    },
}

struct EntityRecord {
    entity: Entity,
    parent: Option<Entity>,
    children: Vec<Entity>,
    local: Transform,
    world: Transform,
    components: Vec<(TypeId, ComponentId)>,
}

impl EntityRecord {
    fn new(entity: Entity) -> Self {
        EntityRecord {
            entity,
            parent: None,
            children: Vec::new(),
            local: Transform::IDENTITY,
            world: Transform::IDENTITY,
            components: Vec::new(),
        }
    }
}

/// Entity container with hierarchy, transforms and typed component storage
pub struct Scene {
    records: Vec<Option<EntityRecord>>,
    generations: Vec<u32>,
    free_slots: Vec<usize>,
    alive_count: usize,
    next_component_id: u64,
    storages: HashMap<TypeId, Box<dyn ErasedStorage>>,
    owners: HashMap<ComponentId, (Entity, TypeId)>,
    singletons: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    transform_changed: BTreeSet<Entity>,
    events: VecDeque<SceneEvent>,
}

impl Scene {
    /// Create a new empty scene
    pub fn new() -> Self {
        Scene {
            records: Vec::new(),
            generations: Vec::new(),
            free_slots: Vec::new(),
            alive_count: 0,
            next_component_id: 0,
            storages: HashMap::new(),
            owners: HashMap::new(),
            singletons: HashMap::new(),
            transform_changed: BTreeSet::new(),
            events: VecDeque::new(),
        }
    }

    fn record(&self, entity: Entity) -> Option<&EntityRecord> {
        self.records
            .get(entity.index())
            .and_then(Option::as_ref)
            .filter(|r| r.entity == entity)
    }

    fn record_mut(&mut self, entity: Entity) -> Option<&mut EntityRecord> {
        self.records
            .get_mut(entity.index())
            .and_then(Option::as_mut)
            .filter(|r| r.entity == entity)
    }

    /// Create a new root entity with an identity transform
    pub fn create_entity(&mut self) -> Entity {
        let slot = match self.free_slots.pop() {
            Some(slot) => slot,
            None => {
                self.records.push(None);
                self.generations.push(0);
                self.records.len() - 1
            }
        };

        let entity = Entity::new(slot as u64, self.generations[slot]);
        self.records[slot] = Some(EntityRecord::new(entity));
        self.alive_count += 1;
        self.events.push_back(SceneEvent::EntityAdded(entity));
        entity
    }

    /// Create an entity parented to `parent`
    ///
    /// Returns `None` if the parent is not alive.
    pub fn create_child(&mut self, parent: Entity) -> Option<Entity> {
        if !self.is_alive(parent) {
            return None;
        }
        let child = self.create_entity();
        self.set_parent(child, Some(parent));
        Some(child)
    }

    /// Destroy an entity and, recursively, its children
    ///
    /// Components are detached newest first. The slot generation is bumped so
    /// old handles become stale.
    pub fn destroy_entity(&mut self, entity: Entity) -> bool {
        let children = match self.record(entity) {
            Some(record) => record.children.clone(),
            None => return false,
        };
        for child in children {
            self.destroy_entity(child);
        }

        let attached: Vec<ComponentId> = self
            .record(entity)
            .map(|r| r.components.iter().rev().map(|(_, id)| *id).collect())
            .unwrap_or_default();
        for id in attached {
            self.remove_component(id);
        }

        self.set_parent(entity, None);
        let slot = entity.index();
        self.records[slot] = None;
        self.generations[slot] = self.generations[slot].wrapping_add(1);
        self.free_slots.push(slot);
        self.alive_count -= 1;
        self.transform_changed.remove(&entity);
        self.events.push_back(SceneEvent::EntityRemoved(entity));
        true
    }

    /// Check if an entity is alive
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.record(entity).is_some()
    }

    /// Get the number of alive entities
    pub fn entity_count(&self) -> usize {
        self.alive_count
    }

    /// All alive entities in slot order
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.records.iter().flatten().map(|r| r.entity)
    }

    /// Parent of an entity
    pub fn parent(&self, entity: Entity) -> Option<Entity> {
        self.record(entity).and_then(|r| r.parent)
    }

    /// Direct children of an entity
    pub fn children(&self, entity: Entity) -> &[Entity] {
        self.record(entity)
            .map(|r| r.children.as_slice())
            .unwrap_or(&[])
    }

    /// All descendants, depth first, excluding `entity` itself
    pub fn descendants(&self, entity: Entity) -> Vec<Entity> {
        let mut out = Vec::new();
        let mut stack: Vec<Entity> = self.children(entity).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    /// Check `ancestor` is a strict ancestor of `entity`
    pub fn is_ancestor(&self, ancestor: Entity, entity: Entity) -> bool {
        let mut current = self.parent(entity);
        while let Some(p) = current {
            if p == ancestor {
                return true;
            }
            current = self.parent(p);
        }
        false
    }

    /// Re-parent an entity, keeping its local transform
    ///
    /// Returns `false` if either entity is dead or the change would create a
    /// cycle.
    pub fn set_parent(&mut self, entity: Entity, parent: Option<Entity>) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        if let Some(p) = parent {
            if p == entity || !self.is_alive(p) || self.is_ancestor(entity, p) {
                return false;
            }
        }

        if let Some(old) = self.parent(entity) {
            if let Some(record) = self.record_mut(old) {
                record.children.retain(|c| *c != entity);
            }
        }
        if let Some(p) = parent {
            if let Some(record) = self.record_mut(p) {
                record.children.push(entity);
            }
        }
        if let Some(record) = self.record_mut(entity) {
            record.parent = parent;
        }
        self.propagate_world(entity, true);
        true
    }

    /// Parent-relative transform
    pub fn local_transform(&self, entity: Entity) -> Option<Transform> {
        self.record(entity).map(|r| r.local)
    }

    /// World transform
    pub fn world_transform(&self, entity: Entity) -> Option<Transform> {
        self.record(entity).map(|r| r.world)
    }

    /// Set the parent-relative transform and flag the subtree as changed
    pub fn set_local_transform(&mut self, entity: Entity, local: Transform) -> bool {
        match self.record_mut(entity) {
            Some(record) => record.local = local,
            None => return false,
        }
        self.propagate_world(entity, true);
        true
    }

    /// Set the world transform and flag the subtree as changed
    pub fn set_world_transform(&mut self, entity: Entity, world: Transform) -> bool {
        match self.local_from_world(entity, &world) {
            Some(local) => self.set_local_transform(entity, local),
            None => false,
        }
    }

    /// Write a world transform computed by the simulation
    ///
    /// The entity is not flagged as changed, so the write does not feed back
    /// into the next transform sync.
    pub fn write_simulated_transform(&mut self, entity: Entity, world: Transform) -> bool {
        let local = match self.local_from_world(entity, &world) {
            Some(local) => local,
            None => return false,
        };
        if let Some(record) = self.record_mut(entity) {
            record.local = local;
        }
        self.propagate_world(entity, false);
        true
    }

    fn local_from_world(&self, entity: Entity, world: &Transform) -> Option<Transform> {
        let record = self.record(entity)?;
        Some(match record.parent.and_then(|p| self.world_transform(p)) {
            Some(parent_world) => parent_world.relative(world),
            None => *world,
        })
    }

    fn propagate_world(&mut self, root: Entity, mark_changed: bool) {
        let mut stack = vec![root];
        while let Some(entity) = stack.pop() {
            let parent_world = self.parent(entity).and_then(|p| self.world_transform(p));
            let children = match self.record_mut(entity) {
                Some(record) => {
                    record.world = match parent_world {
                        Some(pw) => pw.mul_transform(&record.local),
                        None => record.local,
                    };
                    record.children.clone()
                }
                None => continue,
            };
            if mark_changed {
                self.transform_changed.insert(entity);
            }
            stack.extend(children);
        }
    }

    /// Check whether the entity's transform was written externally since the
    /// changes were last taken
    pub fn transform_changed(&self, entity: Entity) -> bool {
        self.transform_changed.contains(&entity)
    }

    /// Take and clear the set of externally changed entities
    pub fn take_transform_changes(&mut self) -> Vec<Entity> {
        std::mem::take(&mut self.transform_changed)
            .into_iter()
            .collect()
    }

    /// Attach a component
    ///
    /// Returns `None` if the entity is not alive.
    pub fn add_component<T: Component>(&mut self, entity: Entity, component: T) -> Option<ComponentId> {
        if !self.is_alive(entity) {
            return None;
        }
        let id = ComponentId::new(self.next_component_id);
        self.next_component_id += 1;
        let type_id = TypeId::of::<T>();

        self.storage_entry::<T>().insert(id, entity, component);
        self.owners.insert(id, (entity, type_id));
        if let Some(record) = self.record_mut(entity) {
            record.components.push((type_id, id));
        }
        self.events.push_back(SceneEvent::ComponentAdded {
            entity,
            id,
            type_id,
        });
        Some(id)
    }

    fn storage_entry<T: Component>(&mut self) -> &mut ComponentStorage<T> {
        let storage = self
            .storages
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(ComponentStorage::<T>::new()));
        match storage.as_any_mut().downcast_mut::<ComponentStorage<T>>() {
            Some(typed) => typed,
            None => unreachable!("storage registered under a foreign TypeId"),
        }
    }

    /// Detach a component, queueing it for the owning system
    pub fn remove_component(&mut self, id: ComponentId) -> bool {
        let (entity, type_id) = match self.owners.remove(&id) {
            Some(owner) => owner,
            None => return false,
        };
        if let Some(record) = self.record_mut(entity) {
            record.components.retain(|(_, c)| *c != id);
        }
        let component = self
            .storages
            .get_mut(&type_id)
            .and_then(|storage| storage.remove_boxed(id));
        if let Some(component) = component {
            self.events.push_back(SceneEvent::ComponentRemoved {
                entity,
                removed: RemovedComponent {
                    id,
                    type_id,
                    component,
                },
            });
        }
        true
    }

    /// Typed storage of all components of type `T`
    pub fn storage<T: Component>(&self) -> Option<&ComponentStorage<T>> {
        self.storages
            .get(&TypeId::of::<T>())
            .and_then(|s| s.as_any().downcast_ref::<ComponentStorage<T>>())
    }

    /// Mutable typed storage of all components of type `T`
    pub fn storage_mut<T: Component>(&mut self) -> Option<&mut ComponentStorage<T>> {
        self.storages
            .get_mut(&TypeId::of::<T>())
            .and_then(|s| s.as_any_mut().downcast_mut::<ComponentStorage<T>>())
    }

    /// Component by id
    pub fn get<T: Component>(&self, id: ComponentId) -> Option<&T> {
        self.storage::<T>().and_then(|s| s.get(id))
    }

    /// Mutable component by id
    pub fn get_mut<T: Component>(&mut self, id: ComponentId) -> Option<&mut T> {
        self.storage_mut::<T>().and_then(|s| s.get_mut(id))
    }

    /// Owning entity of an attached component
    pub fn entity_of(&self, id: ComponentId) -> Option<Entity> {
        self.owners.get(&id).map(|(e, _)| *e)
    }

    /// First attached component of type `T` on `entity`
    pub fn find<T: Component>(&self, entity: Entity) -> Option<ComponentId> {
        let wanted = TypeId::of::<T>();
        self.record(entity)?
            .components
            .iter()
            .find(|(t, _)| *t == wanted)
            .map(|(_, id)| *id)
    }

    /// Every attached component of type `T` on `entity`, in attach order
    pub fn find_all<T: Component>(&self, entity: Entity) -> Vec<ComponentId> {
        let wanted = TypeId::of::<T>();
        self.record(entity)
            .map(|r| {
                r.components
                    .iter()
                    .filter(|(t, _)| *t == wanted)
                    .map(|(_, id)| *id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Check whether `entity` carries a component of type `T`
    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        self.find::<T>(entity).is_some()
    }

    /// Nearest entity, starting at `entity` and walking up, that carries a `T`
    pub fn find_in_ancestors<T: Component>(&self, entity: Entity) -> Option<(Entity, ComponentId)> {
        let mut current = Some(entity);
        while let Some(e) = current {
            if let Some(id) = self.find::<T>(e) {
                return Some((e, id));
            }
            current = self.parent(e);
        }
        None
    }

    /// Install or replace a scene singleton
    pub fn set_singleton<T: Component>(&mut self, value: T) {
        self.singletons.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Scene singleton of type `T`
    pub fn singleton<T: Component>(&self) -> Option<&T> {
        self.singletons
            .get(&TypeId::of::<T>())
            .and_then(|s| s.downcast_ref::<T>())
    }

    /// Mutable scene singleton of type `T`
    pub fn singleton_mut<T: Component>(&mut self) -> Option<&mut T> {
        self.singletons
            .get_mut(&TypeId::of::<T>())
            .and_then(|s| s.downcast_mut::<T>())
    }

    /// Drain the queued structural events
    pub fn take_events(&mut self) -> Vec<SceneEvent> {
        self.events.drain(..).collect()
    }

    /// Number of queued structural events
    pub fn pending_event_count(&self) -> usize {
        self.events.len()
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}
