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
//! Deferred native mutations
//!
//! Structural changes to the native world are queued here and applied in
//! the quiescent window, when no simulation step is in flight.

use crate::ecs::ComponentId;
use crate::native::{ActorHandle, ControllerHandle, ShapeHandle};
use indexmap::IndexSet;

/// Kind of native object a component materialises into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    /// Rigid body actor
    Body,
    /// Collision shape
    Shape,
    /// Character controller
    Controller,
}

impl ObjectKind {
    /// Lower-case name used in logs
    pub fn name(self) -> &'static str {
        match self {
            ObjectKind::Body => "body",
            ObjectKind::Shape => "shape",
            ObjectKind::Controller => "controller",
        }
    }
}

/// Native object detached from its component and awaiting release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeObject {
    /// Shape
    Shape(ShapeHandle),
    /// Actor
    Actor(ActorHandle),
    /// Character controller with its implicit actor
    Controller(ControllerHandle),
}

/// One queued mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Materialise a component's native object
    Create {
        /// Object kind
        kind: ObjectKind,
        /// Component to materialise
        id: ComponentId,
    },
    /// Release a native object
    Destroy(NativeObject),
    /// Re-apply filter, material, trigger and local pose of a live shape
    PatchFilter(ComponentId),
    /// Swap the geometry of a live shape
    RebuildGeometry(ComponentId),
}

/// Ordered, duplicate-free command queue
#[derive(Debug, Default)]
pub struct CommandBuffer {
    commands: IndexSet<Command>,
}

impl CommandBuffer {
    /// Empty buffer
    pub fn new() -> Self {
        CommandBuffer::default()
    }

    /// Queue a command; an identical queued command makes this a no-op
    pub fn push(&mut self, command: Command) -> bool {
        self.commands.insert(command)
    }

    /// Drop any queued creation of `id`
    pub fn cancel(&mut self, id: ComponentId) -> bool {
        let before = self.commands.len();
        self.commands.retain(|c| match *c {
            Command::Create { id: queued, .. } | Command::PatchFilter(queued) | Command::RebuildGeometry(queued) => {
                queued != id
            }
            Command::Destroy(_) => true,
        });
        before != self.commands.len()
    }

    /// Whether a creation of `id` is queued
    pub fn is_create_pending(&self, id: ComponentId) -> bool {
        self.commands
            .iter()
            .any(|c| matches!(*c, Command::Create { id: queued, .. } if queued == id))
    }

    /// Take every queued release, oldest first
    pub fn take_destroys(&mut self) -> Vec<NativeObject> {
        self.take_where(|c| match *c {
            Command::Destroy(object) => Some(object),
            _ => None,
        })
    }

    /// Take queued creations of one kind, oldest first
    pub fn take_creates(&mut self, kind: ObjectKind) -> Vec<ComponentId> {
        self.take_where(|c| match *c {
            Command::Create { kind: k, id } if k == kind => Some(id),
            _ => None,
        })
    }

    /// Take queued shape patches and rebuilds, oldest first
    pub fn take_shape_updates(&mut self) -> Vec<Command> {
        self.take_where(|c| match *c {
            Command::PatchFilter(_) | Command::RebuildGeometry(_) => Some(*c),
            _ => None,
        })
    }

    /// Queued creations of one kind
    pub fn pending_creates(&self, kind: ObjectKind) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::Create { kind: k, .. } if *k == kind))
            .count()
    }

    /// Queued commands
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.commands.clear();
    }

    fn take_where<T, F>(&mut self, mut select: F) -> Vec<T>
    where
        F: FnMut(&Command) -> Option<T>,
    {
        let mut taken = Vec::new();
        self.commands.retain(|c| match select(c) {
            Some(value) => {
                taken.push(value);
                false
            }
            None => true,
        });
        taken
    }
}
