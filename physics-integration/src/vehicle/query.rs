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
//! Batched suspension raycasts
//!
//! Every wheel of every stepped vehicle casts one ray down its suspension
//! line. The rays are collected into a pooled buffer and resolved by the
//! native world in a single batched dispatch.

use crate::error::{PhysicsError, Result};
use crate::native::{NativeWorld, QueryFilter, Ray, RaycastHit};
use log::trace;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Fixed table of batched-query slots, one per live vehicle rig
#[derive(Debug, Clone)]
pub struct QuerySlots {
    used: Vec<bool>,
    in_use: usize,
}

impl QuerySlots {
    /// Table with `capacity` free slots
    pub fn new(capacity: usize) -> Self {
        QuerySlots {
            used: vec![false; capacity],
            in_use: 0,
        }
    }

    /// Claim the lowest free slot
    pub fn allocate(&mut self) -> Result<usize> {
        let slot = self
            .used
            .iter()
            .position(|used| !used)
            .ok_or(PhysicsError::CapacityExceeded {
                what: "vehicle",
                capacity: self.used.len(),
            })?;
        self.used[slot] = true;
        self.in_use += 1;
        Ok(slot)
    }

    /// Free a slot; releasing a free or unknown slot does nothing
    pub fn release(&mut self, slot: usize) -> bool {
        match self.used.get_mut(slot) {
            Some(used) if *used => {
                *used = false;
                self.in_use -= 1;
                true
            }
            _ => false,
        }
    }

    /// Claimed slots
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Total slots
    pub fn capacity(&self) -> usize {
        self.used.len()
    }
}

/// Buffer reuse statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Acquisitions served from the pool
    pub hits: usize,
    /// Acquisitions that allocated a new buffer
    pub misses: usize,
    /// Buffers currently parked in the pool
    pub pool_size: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared pool of reusable `Vec<T>` buffers
pub struct BufferPool<T> {
    pool: Arc<Mutex<Vec<Vec<T>>>>,
    stats: Arc<Mutex<PoolStats>>,
    initial_capacity: usize,
    max_pool_size: usize,
}

impl<T> BufferPool<T> {
    /// Pool handing out buffers of at least `initial_capacity`
    pub fn new(initial_capacity: usize, max_pool_size: usize) -> Self {
        BufferPool {
            pool: Arc::new(Mutex::new(Vec::new())),
            stats: Arc::new(Mutex::new(PoolStats::default())),
            initial_capacity,
            max_pool_size,
        }
    }

    /// Borrow an empty buffer; it returns to the pool when the guard drops
    pub fn acquire(&self) -> BufferGuard<T> {
        // pool lock is released before the stats lock is taken
        let (buffer, hit, parked) = {
            let mut pool = lock(&self.pool);
            let hit = !pool.is_empty();
            let buffer = match pool.pop() {
                Some(mut buffer) => {
                    buffer.clear();
                    buffer
                }
                None => Vec::with_capacity(self.initial_capacity),
            };
            (buffer, hit, pool.len())
        };
        {
            let mut stats = lock(&self.stats);
            if hit {
                stats.hits += 1;
            } else {
                stats.misses += 1;
            }
            stats.pool_size = parked;
        }
        BufferGuard {
            buffer,
            pool: Arc::clone(&self.pool),
            stats: Arc::clone(&self.stats),
            max_pool_size: self.max_pool_size,
        }
    }

    /// Current statistics
    pub fn stats(&self) -> PoolStats {
        *lock(&self.stats)
    }
}

impl<T> Clone for BufferPool<T> {
    fn clone(&self) -> Self {
        BufferPool {
            pool: Arc::clone(&self.pool),
            stats: Arc::clone(&self.stats),
            initial_capacity: self.initial_capacity,
            max_pool_size: self.max_pool_size,
        }
    }
}

/// Buffer borrowed from a [`BufferPool`]
pub struct BufferGuard<T> {
    buffer: Vec<T>,
    pool: Arc<Mutex<Vec<Vec<T>>>>,
    stats: Arc<Mutex<PoolStats>>,
    max_pool_size: usize,
}

impl<T> std::ops::Deref for BufferGuard<T> {
    type Target = Vec<T>;

    fn deref(&self) -> &Vec<T> {
        &self.buffer
    }
}

impl<T> std::ops::DerefMut for BufferGuard<T> {
    fn deref_mut(&mut self) -> &mut Vec<T> {
        &mut self.buffer
    }
}

impl<T> Drop for BufferGuard<T> {
    fn drop(&mut self) {
        let buffer = std::mem::take(&mut self.buffer);
        let mut pool = lock(&self.pool);
        if pool.len() < self.max_pool_size {
            pool.push(buffer);
            lock(&self.stats).pool_size = pool.len();
        }
    }
}

/// One suspension ray and the wheel it belongs to
#[derive(Debug, Clone, Copy)]
pub struct SuspensionRay {
    /// Index of the vehicle in the frame's stepping list
    pub vehicle: usize,
    /// Wheel index on that vehicle
    pub wheel: usize,
    /// Ray down the suspension line
    pub ray: Ray,
    /// Drivable-surface pre-filter excluding the vehicle itself
    pub filter: QueryFilter,
}

/// Resolves all suspension rays of a frame in one native dispatch
pub struct VehicleSceneQuery {
    buffers: BufferPool<(Ray, QueryFilter)>,
    dispatches: u64,
}

impl VehicleSceneQuery {
    /// Query sized for a full vehicle table
    pub fn new(max_rays: usize) -> Self {
        VehicleSceneQuery {
            buffers: BufferPool::new(max_rays, 2),
            dispatches: 0,
        }
    }

    /// Cast every ray, returning the closest drivable hit per ray in order
    ///
    /// Nothing is dispatched for an empty list.
    pub fn cast(&mut self, world: &mut NativeWorld, rays: &[SuspensionRay]) -> Vec<Option<RaycastHit>> {
        if rays.is_empty() {
            return Vec::new();
        }
        let mut batch = self.buffers.acquire();
        batch.extend(rays.iter().map(|r| (r.ray, r.filter)));
        self.dispatches += 1;
        let hits = world.raycast_batch(&batch);
        trace!(
            "suspension batch {}: {} rays, {} hits",
            self.dispatches,
            rays.len(),
            hits.iter().filter(|h| h.is_some()).count()
        );
        hits
    }

    /// Batched dispatches issued so far
    pub fn dispatch_count(&self) -> u64 {
        self.dispatches
    }

    /// Ray buffer reuse statistics
    pub fn buffer_stats(&self) -> PoolStats {
        self.buffers.stats()
    }
}
