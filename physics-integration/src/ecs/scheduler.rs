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
//! Fixed-timestep driver
//!
//! The engine loop runs at a variable rate; physics advances in fixed steps.
//! [`FixedTimestep`] accumulates frame time and reports how many fixed steps
//! to run, clamped so a long hitch cannot trigger a spiral of catch-up steps.

use crate::ecs::{dispatch_events, Scene, SceneSystem};

/// Accumulator turning variable frame times into fixed steps
#[derive(Debug, Clone)]
pub struct FixedTimestep {
    fixed_dt: f32,
    max_steps: u32,
    accumulator: f32,
    total_steps: u64,
}

impl FixedTimestep {
    /// Create a driver with the given step length and per-frame step cap
    ///
    /// # Panics
    ///
    /// Panics if `fixed_dt` is non-positive, NaN, or infinite, or if
    /// `max_steps` is zero
    pub fn new(fixed_dt: f32, max_steps: u32) -> Self {
        assert!(
            fixed_dt > 0.0 && fixed_dt.is_finite(),
            "Timestep must be positive and finite"
        );
        assert!(max_steps > 0, "Max steps per frame must be at least 1");
        FixedTimestep {
            fixed_dt,
            max_steps,
            accumulator: 0.0,
            total_steps: 0,
        }
    }

    /// Fixed step length in seconds
    pub fn fixed_dt(&self) -> f32 {
        self.fixed_dt
    }

    /// Steps taken since creation
    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    /// Fraction of a step left in the accumulator, for render interpolation
    pub fn alpha(&self) -> f32 {
        self.accumulator / self.fixed_dt
    }

    /// Add frame time and return the number of fixed steps to run
    ///
    /// Time beyond `max_steps` steps is dropped.
    pub fn advance(&mut self, frame_dt: f32) -> u32 {
        if frame_dt.is_finite() && frame_dt > 0.0 {
            self.accumulator += frame_dt;
        }
        let mut steps = 0;
        while self.accumulator >= self.fixed_dt && steps < self.max_steps {
            self.accumulator -= self.fixed_dt;
            steps += 1;
        }
        if steps == self.max_steps && self.accumulator >= self.fixed_dt {
            self.accumulator %= self.fixed_dt;
        }
        self.total_steps += u64::from(steps);
        steps
    }

    /// Drop any accumulated time
    pub fn reset(&mut self) {
        self.accumulator = 0.0;
    }
}

/// Run one variable-rate frame: deliver scene events, then step `system` as
/// many times as the accumulator allows
///
/// Returns the number of fixed steps taken.
pub fn run_frame(
    scene: &mut Scene,
    system: &mut dyn SceneSystem,
    timestep: &mut FixedTimestep,
    frame_dt: f32,
) -> u32 {
    dispatch_events(scene, system);
    let steps = timestep.advance(frame_dt);
    for _ in 0..steps {
        system.process_fixed(scene, timestep.fixed_dt());
    }
    steps
}
