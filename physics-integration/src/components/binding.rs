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
//! Privileged native-handle access
//!
//! Components expose read accessors and request setters publicly. Installing
//! and releasing native handles goes through [`PhysicsBinding`], which is
//! crate-private and only driven by the physics system.

use crate::components::UpdateSink;
use crate::ecs::ComponentId;
use crate::error::{PhysicsError, Result};
use crate::native::Handle;
use std::fmt;

/// Optional native handle owned on a component's behalf
pub struct NativeSlot<M> {
    handle: Option<Handle<M>>,
}

impl<M> NativeSlot<M> {
    /// Empty slot
    pub fn new() -> Self {
        NativeSlot { handle: None }
    }

    /// Installed handle
    pub fn get(&self) -> Option<Handle<M>> {
        self.handle
    }

    /// Check whether a handle is installed
    pub fn is_installed(&self) -> bool {
        self.handle.is_some()
    }

    /// Install `handle`; an installed handle must be released first
    pub(crate) fn install(&mut self, handle: Handle<M>, kind: &'static str) -> Result<()> {
        match self.handle {
            Some(existing) if existing != handle => Err(PhysicsError::HandleAlreadyInstalled { kind }),
            _ => {
                self.handle = Some(handle);
                Ok(())
            }
        }
    }

    /// Remove and return the handle
    pub(crate) fn take(&mut self) -> Option<Handle<M>> {
        self.handle.take()
    }
}

impl<M> Default for NativeSlot<M> {
    fn default() -> Self {
        NativeSlot::new()
    }
}

impl<M> fmt::Debug for NativeSlot<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.handle {
            Some(handle) => write!(f, "NativeSlot({:?})", handle),
            None => write!(f, "NativeSlot(empty)"),
        }
    }
}

/// Link from a registered component to its system's update-pending set
#[derive(Debug, Clone)]
pub struct UpdateLink {
    id: ComponentId,
    sink: UpdateSink,
}

impl UpdateLink {
    pub(crate) fn new(id: ComponentId, sink: UpdateSink) -> Self {
        UpdateLink { id, sink }
    }

    /// Component the link schedules
    pub fn id(&self) -> ComponentId {
        self.id
    }

    fn schedule(&self) -> bool {
        self.sink.schedule(self.id)
    }
}

/// System-only access to a physics component
pub(crate) trait PhysicsBinding {
    fn update_link(&self) -> Option<&UpdateLink>;

    fn set_update_link(&mut self, link: Option<UpdateLink>);

    /// Enqueue into the update-pending set; a no-op until registered
    fn schedule_update(&self) -> bool {
        self.update_link().map_or(false, UpdateLink::schedule)
    }
}
