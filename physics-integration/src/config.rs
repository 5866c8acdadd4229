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
//! Physics system configuration
//!
//! Values are normally read from the engine options archive with
//! [`PhysicsConfig::from_options`]; the builder methods cover tests and tools
//! that construct a system without an engine.

use crate::archive::KeyedArchive;
use crate::error::{PhysicsError, Result};
use crate::native::IntegratorKind;
use glam::Vec3;

/// Default size of the native simulation scratch block
pub const DEFAULT_SIMULATION_BLOCK_SIZE: u32 = 16 * 1024 * 512;

/// The simulation block must be a multiple of this many bytes
pub const SIMULATION_BLOCK_GRANULARITY: u32 = 16 * 1024;

/// Options archive keys
pub mod keys {
    /// Scratch memory block size in bytes
    pub const SIMULATION_BLOCK_SIZE: &str = "physics.simulationBlockSize";
    /// World gravity vector
    pub const GRAVITY: &str = "physics.gravity";
    /// Native worker thread count
    pub const THREAD_COUNT: &str = "physics.threadCount";
    /// Whether the same-frame fetch blocks until the step completes
    pub const WAIT_FOR_FETCH_FINISH: &str = "physics.waitForFetchFinish";
    /// Fixed simulation timestep in seconds
    pub const FIXED_TIMESTEP: &str = "physics.fixedTimestep";
    /// Upper bound on fixed steps taken for one variable-rate frame
    pub const MAX_STEPS_PER_FRAME: &str = "physics.maxStepsPerFrame";
    /// Body integrator, `"euler"` or `"verlet"`
    pub const INTEGRATOR: &str = "physics.integrator";
}

/// Configuration for [`PhysicsSystem`](crate::system::PhysicsSystem)
#[derive(Debug, Clone)]
pub struct PhysicsConfig {
    /// Native scratch memory size in bytes, multiple of 16 KiB
    pub simulation_block_size: u32,
    /// Gravity applied to dynamic bodies and walking controllers
    pub gravity: Vec3,
    /// Native worker threads
    pub thread_count: u32,
    /// Block in the same-frame fetch instead of polling once
    pub wait_for_fetch_finish: bool,
    /// Fixed timestep used by [`FixedTimestep`](crate::ecs::FixedTimestep)
    pub fixed_timestep: f32,
    /// Maximum fixed steps per variable frame
    pub max_steps_per_frame: u32,
    /// Integrator used by the native world for dynamic bodies
    pub integrator: IntegratorKind,
    /// Log a warning for every component whose native object cannot be created
    pub log_creation_failures: bool,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        PhysicsConfig {
            simulation_block_size: DEFAULT_SIMULATION_BLOCK_SIZE,
            gravity: Vec3::new(0.0, 0.0, -9.81),
            thread_count: 2,
            wait_for_fetch_finish: true,
            fixed_timestep: 1.0 / 60.0,
            max_steps_per_frame: 4,
            integrator: IntegratorKind::SemiImplicitEuler,
            log_creation_failures: true,
        }
    }
}

impl PhysicsConfig {
    /// Create a configuration with the given gravity and defaults elsewhere
    pub fn new(gravity: Vec3) -> Self {
        PhysicsConfig {
            gravity,
            ..PhysicsConfig::default()
        }
    }

    /// Read configuration from an engine options archive
    ///
    /// Missing keys keep their defaults. Values that are present but invalid
    /// are rejected rather than silently replaced.
    pub fn from_options(options: &KeyedArchive) -> Result<Self> {
        let defaults = PhysicsConfig::default();
        let integrator = match options.try_string(keys::INTEGRATOR)? {
            None => defaults.integrator,
            Some(name) => IntegratorKind::from_name(&name).ok_or_else(|| {
                PhysicsError::InvalidConfig(format!("unknown integrator `{}`", name))
            })?,
        };

        let config = PhysicsConfig {
            simulation_block_size: options
                .try_u32(keys::SIMULATION_BLOCK_SIZE)?
                .unwrap_or(defaults.simulation_block_size),
            gravity: options.try_vector3(keys::GRAVITY)?.unwrap_or(defaults.gravity),
            thread_count: options
                .try_u32(keys::THREAD_COUNT)?
                .unwrap_or(defaults.thread_count),
            wait_for_fetch_finish: options
                .try_bool(keys::WAIT_FOR_FETCH_FINISH)?
                .unwrap_or(defaults.wait_for_fetch_finish),
            fixed_timestep: options
                .try_f32(keys::FIXED_TIMESTEP)?
                .unwrap_or(defaults.fixed_timestep),
            max_steps_per_frame: options
                .try_u32(keys::MAX_STEPS_PER_FRAME)?
                .unwrap_or(defaults.max_steps_per_frame),
            integrator,
            log_creation_failures: defaults.log_creation_failures,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.simulation_block_size == 0
            || self.simulation_block_size % SIMULATION_BLOCK_GRANULARITY != 0
        {
            return Err(PhysicsError::InvalidConfig(format!(
                "simulation block size {} is not a positive multiple of {}",
                self.simulation_block_size, SIMULATION_BLOCK_GRANULARITY
            )));
        }
        if self.thread_count == 0 {
            return Err(PhysicsError::InvalidConfig(
                "thread count must be at least 1".to_string(),
            ));
        }
        if !self.gravity.is_finite() {
            return Err(PhysicsError::InvalidConfig(format!(
                "gravity {:?} is not finite",
                self.gravity
            )));
        }
        if !(self.fixed_timestep > 0.0 && self.fixed_timestep.is_finite()) {
            return Err(PhysicsError::InvalidConfig(format!(
                "fixed timestep {} must be positive and finite",
                self.fixed_timestep
            )));
        }
        if self.max_steps_per_frame == 0 {
            return Err(PhysicsError::InvalidConfig(
                "max steps per frame must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Set gravity
    pub fn with_gravity(mut self, gravity: Vec3) -> Self {
        self.gravity = gravity;
        self
    }

    /// Poll the step once in the same frame instead of blocking
    ///
    /// An unfinished step is then fetched with a blocking wait at the start of
    /// the next frame.
    pub fn with_async_fetch(mut self) -> Self {
        self.wait_for_fetch_finish = false;
        self
    }

    /// Set the native worker thread count
    ///
    /// # Panics
    ///
    /// Panics if `count` is zero
    pub fn with_thread_count(mut self, count: u32) -> Self {
        assert!(count > 0, "Thread count must be at least 1");
        self.thread_count = count;
        self
    }

    /// Set the fixed timestep
    ///
    /// # Panics
    ///
    /// Panics if `dt` is non-positive, NaN, or infinite
    pub fn with_fixed_timestep(mut self, dt: f32) -> Self {
        assert!(dt > 0.0 && dt.is_finite(), "Timestep must be positive and finite");
        self.fixed_timestep = dt;
        self
    }

    /// Select the body integrator
    pub fn with_integrator(mut self, integrator: IntegratorKind) -> Self {
        self.integrator = integrator;
        self
    }

    /// Silence per-component creation failure warnings
    pub fn without_failure_logging(mut self) -> Self {
        self.log_creation_failures = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PhysicsConfig::default();
        assert_eq!(config.simulation_block_size, 16 * 1024 * 512);
        assert_eq!(config.gravity, Vec3::new(0.0, 0.0, -9.81));
        assert_eq!(config.thread_count, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_empty_options_uses_defaults() {
        let config = PhysicsConfig::from_options(&KeyedArchive::new()).unwrap();
        assert_eq!(config.thread_count, 2);
        assert!(config.wait_for_fetch_finish);
    }

    #[test]
    fn test_from_options_reads_values() {
        let mut options = KeyedArchive::new();
        options.set_u32(keys::SIMULATION_BLOCK_SIZE, 32 * 1024);
        options.set_vector3(keys::GRAVITY, Vec3::new(0.0, -9.81, 0.0));
        options.set_u32(keys::THREAD_COUNT, 4);
        options.set_string(keys::INTEGRATOR, "verlet".to_string());

        let config = PhysicsConfig::from_options(&options).unwrap();
        assert_eq!(config.simulation_block_size, 32 * 1024);
        assert_eq!(config.gravity, Vec3::new(0.0, -9.81, 0.0));
        assert_eq!(config.thread_count, 4);
        assert_eq!(config.integrator, IntegratorKind::VelocityVerlet);
    }

    #[test]
    fn test_block_size_must_be_16k_multiple() {
        let mut options = KeyedArchive::new();
        options.set_u32(keys::SIMULATION_BLOCK_SIZE, 16 * 1024 + 1);
        let err = PhysicsConfig::from_options(&options).unwrap_err();
        assert!(matches!(err, PhysicsError::InvalidConfig(_)));
    }

    #[test]
    fn test_mistyped_option_is_rejected() {
        let mut options = KeyedArchive::new();
        options.set_f32(keys::THREAD_COUNT, 2.0);
        assert!(PhysicsConfig::from_options(&options).is_err());
    }

    #[test]
    fn test_unknown_integrator_is_rejected() {
        let mut options = KeyedArchive::new();
        options.set_string(keys::INTEGRATOR, "rk8".to_string());
        assert!(PhysicsConfig::from_options(&options).is_err());
    }

    #[test]
    #[should_panic(expected = "Timestep must be positive and finite")]
    fn test_builder_rejects_zero_timestep() {
        let _ = PhysicsConfig::default().with_fixed_timestep(0.0);
    }
}
