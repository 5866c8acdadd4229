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
//! Idempotent update-pending sets
//!
//! Component setters schedule their component for re-application on the
//! native side. Scheduling the same component many times within a frame
//! leaves a single entry, so each component costs at most one native update
//! per drain regardless of how many setters fired.

use crate::ecs::ComponentId;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Insertion-ordered set of scheduled components
#[derive(Debug, Default)]
pub struct UpdateQueue {
    order: Vec<ComponentId>,
    queued: HashSet<ComponentId>,
}

impl UpdateQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        UpdateQueue::default()
    }

    /// Schedule `id`; returns `false` when it was already queued
    pub fn push(&mut self, id: ComponentId) -> bool {
        if self.queued.insert(id) {
            self.order.push(id);
            true
        } else {
            false
        }
    }

    /// Unschedule `id`
    pub fn remove(&mut self, id: ComponentId) -> bool {
        if self.queued.remove(&id) {
            self.order.retain(|queued| *queued != id);
            true
        } else {
            false
        }
    }

    /// Check whether `id` is scheduled
    pub fn contains(&self, id: ComponentId) -> bool {
        self.queued.contains(&id)
    }

    /// Number of scheduled components
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Check whether nothing is scheduled
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Take every scheduled component in scheduling order
    pub fn drain(&mut self) -> Vec<ComponentId> {
        self.queued.clear();
        std::mem::take(&mut self.order)
    }

    /// Drop every scheduled component
    pub fn clear(&mut self) {
        self.queued.clear();
        self.order.clear();
    }
}

/// Shared handle to an [`UpdateQueue`]
///
/// The system keeps one sink per component kind and hands clones to the
/// components it registers.
#[derive(Debug, Clone, Default)]
pub struct UpdateSink {
    queue: Arc<Mutex<UpdateQueue>>,
}

impl UpdateSink {
    /// Create a sink over an empty queue
    pub fn new() -> Self {
        UpdateSink::default()
    }

    fn lock(&self) -> MutexGuard<'_, UpdateQueue> {
        // a panic while holding the lock cannot leave the set half-updated
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedule `id`; returns `false` when it was already queued
    pub fn schedule(&self, id: ComponentId) -> bool {
        self.lock().push(id)
    }

    /// Unschedule `id`
    pub fn remove(&self, id: ComponentId) -> bool {
        self.lock().remove(id)
    }

    /// Check whether `id` is scheduled
    pub fn contains(&self, id: ComponentId) -> bool {
        self.lock().contains(id)
    }

    /// Number of scheduled components
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check whether nothing is scheduled
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Take every scheduled component in scheduling order
    pub fn drain(&self) -> Vec<ComponentId> {
        self.lock().drain()
    }

    /// Drop every scheduled component
    pub fn clear(&self) {
        self.lock().clear()
    }
}
