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
//! Generational handle arenas
//!
//! Every native object lives in an index-stable arena owned by the native
//! world. Components and systems only ever hold a [`Handle`]: a slot index
//! plus generation. A handle to a released object is detected as stale
//! instead of aliasing whatever object reused the slot.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Marker for shape handles
#[derive(Debug)]
pub enum Shape {}
/// Marker for actor handles
#[derive(Debug)]
pub enum Actor {}
/// Marker for character controller handles
#[derive(Debug)]
pub enum Controller {}
/// Marker for vehicle rig handles
#[derive(Debug)]
pub enum Vehicle {}

/// Typed generational handle
pub struct Handle<M> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> M>,
}

/// Handle to a native collision shape
pub type ShapeHandle = Handle<Shape>;
/// Handle to a native actor
pub type ActorHandle = Handle<Actor>;
/// Handle to a native character controller
pub type ControllerHandle = Handle<Controller>;
/// Handle to a native vehicle rig
pub type VehicleHandle = Handle<Vehicle>;

impl<M> Handle<M> {
    fn new(index: u32, generation: u32) -> Self {
        Handle {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Slot index
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Slot generation
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl<M> Clone for Handle<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M> Copy for Handle<M> {}

impl<M> PartialEq for Handle<M> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<M> Eq for Handle<M> {}

impl<M> Hash for Handle<M> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<M> PartialOrd for Handle<M> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<M> Ord for Handle<M> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.index, self.generation).cmp(&(other.index, other.generation))
    }
}

impl<M> fmt::Debug for Handle<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Index-stable table of native objects addressed by [`Handle`]
pub struct HandleArena<M, T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
    _marker: PhantomData<fn() -> M>,
}

impl<M, T> HandleArena<M, T> {
    /// Create an empty arena
    pub fn new() -> Self {
        HandleArena {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            _marker: PhantomData,
        }
    }

    /// Store a value and return its handle
    pub fn insert(&mut self, value: T) -> Handle<M> {
        self.len += 1;
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.value = Some(value);
                Handle::new(index, slot.generation)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    value: Some(value),
                });
                Handle::new(index, 0)
            }
        }
    }

    /// Remove a value, invalidating its handle
    pub fn remove(&mut self, handle: Handle<M>) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some(value)
    }

    /// Look up a live value
    pub fn get(&self, handle: Handle<M>) -> Option<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    /// Look up a live value mutably
    pub fn get_mut(&mut self, handle: Handle<M>) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    /// Check whether a handle is live
    pub fn contains(&self, handle: Handle<M>) -> bool {
        self.get(handle).is_some()
    }

    /// Number of live values
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check whether the arena is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterate live values with their handles, in slot order
    pub fn iter(&self) -> impl Iterator<Item = (Handle<M>, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.value
                .as_ref()
                .map(|v| (Handle::new(i as u32, slot.generation), v))
        })
    }

    /// Iterate live values mutably with their handles, in slot order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<M>, &mut T)> + '_ {
        self.slots.iter_mut().enumerate().filter_map(|(i, slot)| {
            let generation = slot.generation;
            slot.value
                .as_mut()
                .map(|v| (Handle::new(i as u32, generation), v))
        })
    }

    /// Handles of every live value
    pub fn handles(&self) -> Vec<Handle<M>> {
        self.iter().map(|(h, _)| h).collect()
    }
}

impl<M, T> Default for HandleArena<M, T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let mut arena: HandleArena<Shape, &str> = HandleArena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a), Some(&"a"));

        assert_eq!(arena.remove(a), Some("a"));
        assert!(!arena.contains(a));
        assert_eq!(arena.remove(a), None);
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_stale_handle_after_slot_reuse() {
        let mut arena: HandleArena<Actor, u32> = HandleArena::new();
        let old = arena.insert(1);
        arena.remove(old);
        let new = arena.insert(2);

        assert_eq!(old.index(), new.index());
        assert_ne!(old, new);
        assert!(arena.get(old).is_none());
        assert_eq!(arena.get(new), Some(&2));
    }

    #[test]
    fn test_iteration_skips_free_slots() {
        let mut arena: HandleArena<Controller, u32> = HandleArena::new();
        let handles: Vec<_> = (0..4).map(|i| arena.insert(i)).collect();
        arena.remove(handles[1]);
        let values: Vec<u32> = arena.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![0, 2, 3]);
    }
}
