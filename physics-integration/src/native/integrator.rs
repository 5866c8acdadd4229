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
//! Rigid-body integrators used inside the native step
//!
//! Provides two explicit schemes behind the [`Integrator`] trait:
//! - **Semi-implicit Euler**: velocity first, then position. The default.
//! - **Velocity Verlet**: second-order in position, uses the acceleration of
//!   the previous step.
//!
//! Forces are taken as constant over a step. With the `parallel` feature the
//! bodies are integrated with rayon; results are identical either way.

use glam::{Quat, Vec3};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Selects the integrator a native world is created with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntegratorKind {
    /// [`SemiImplicitEulerIntegrator`]
    #[default]
    SemiImplicitEuler,
    /// [`VelocityVerletIntegrator`]
    VelocityVerlet,
}

impl IntegratorKind {
    /// Parse an options value (`"euler"` or `"verlet"`)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "euler" => Some(IntegratorKind::SemiImplicitEuler),
            "verlet" => Some(IntegratorKind::VelocityVerlet),
            _ => None,
        }
    }

    /// Options value naming this integrator
    pub fn name(&self) -> &'static str {
        match self {
            IntegratorKind::SemiImplicitEuler => "euler",
            IntegratorKind::VelocityVerlet => "verlet",
        }
    }

    /// Instantiate the integrator
    pub fn create(&self, timestep: f32) -> Box<dyn Integrator> {
        match self {
            IntegratorKind::SemiImplicitEuler => Box::new(SemiImplicitEulerIntegrator::new(timestep)),
            IntegratorKind::VelocityVerlet => Box::new(VelocityVerletIntegrator::new(timestep)),
        }
    }
}

/// Integrable state of one dynamic body
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyState {
    /// World position of the centre of mass frame
    pub position: Vec3,
    /// World orientation
    pub rotation: Quat,
    /// Linear velocity
    pub linear_velocity: Vec3,
    /// Angular velocity
    pub angular_velocity: Vec3,
    /// Inverse mass, zero for immovable bodies
    pub inv_mass: f32,
    /// Inverse diagonal inertia in body space
    pub inv_inertia: Vec3,
    /// Force accumulated for this step
    pub force: Vec3,
    /// Torque accumulated for this step
    pub torque: Vec3,
    /// Linear damping coefficient
    pub linear_damping: f32,
    /// Angular damping coefficient
    pub angular_damping: f32,
    /// Acceleration used in the previous step
    pub previous_acceleration: Option<Vec3>,
}

impl BodyState {
    /// Resting body at `position` with unit mass
    pub fn at(position: Vec3) -> Self {
        BodyState {
            position,
            rotation: Quat::IDENTITY,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            inv_mass: 1.0,
            inv_inertia: Vec3::ONE,
            force: Vec3::ZERO,
            torque: Vec3::ZERO,
            linear_damping: 0.0,
            angular_damping: 0.05,
            previous_acceleration: None,
        }
    }

    fn is_movable(&self) -> bool {
        self.inv_mass > 0.0
    }

    fn acceleration(&self, gravity: Vec3) -> Vec3 {
        gravity + self.force * self.inv_mass
    }

    fn integrate_angular(&mut self, dt: f32) {
        let local_torque = self.rotation.inverse() * self.torque;
        let alpha = self.rotation * (self.inv_inertia * local_torque);
        self.angular_velocity += alpha * dt;
        self.angular_velocity *= 1.0 / (1.0 + dt * self.angular_damping);

        let w = self.angular_velocity;
        let spin = Quat::from_xyzw(w.x, w.y, w.z, 0.0) * self.rotation;
        self.rotation = (self.rotation + spin * (0.5 * dt)).normalize();
    }
}

/// Common interface of the body integrators
pub trait Integrator: Send + Sync {
    /// Get the name of this integrator
    fn name(&self) -> &str;

    /// Get the timestep used by this integrator
    fn timestep(&self) -> f32;

    /// Set the timestep for this integrator
    ///
    /// # Panics
    ///
    /// Panics if timestep is non-positive, NaN, or infinite
    fn set_timestep(&mut self, dt: f32);

    /// Check the timestep against the range the step is stable in
    fn validate_timestep(&self) -> Result<(), String> {
        let dt = self.timestep();
        if dt <= 0.0 || !dt.is_finite() {
            return Err(format!("Invalid timestep: {}. Must be positive and finite.", dt));
        }
        if dt < 1e-6 {
            return Err(format!(
                "Timestep {} is too small for single precision integration",
                dt
            ));
        }
        if dt > 0.25 {
            return Err(format!("Timestep {} is too large for a stable step", dt));
        }
        Ok(())
    }

    /// Advance every movable body by one timestep under `gravity`
    ///
    /// Returns the number of bodies updated.
    fn integrate(&self, bodies: &mut [BodyState], gravity: Vec3) -> usize;
}

fn for_each_movable<F>(bodies: &mut [BodyState], step: F) -> usize
where
    F: Fn(&mut BodyState) + Send + Sync,
{
    #[cfg(feature = "parallel")]
    bodies
        .par_iter_mut()
        .filter(|b| b.is_movable())
        .for_each(|b| step(b));

    #[cfg(not(feature = "parallel"))]
    bodies
        .iter_mut()
        .filter(|b| b.is_movable())
        .for_each(|b| step(b));

    bodies.iter().filter(|b| b.is_movable()).count()
}

/// Semi-implicit (symplectic) Euler
#[derive(Debug, Clone)]
pub struct SemiImplicitEulerIntegrator {
    timestep: f32,
}

impl SemiImplicitEulerIntegrator {
    /// Create the integrator
    ///
    /// # Panics
    ///
    /// Panics if timestep is non-positive, NaN, or infinite
    pub fn new(timestep: f32) -> Self {
        assert!(
            timestep > 0.0 && timestep.is_finite(),
            "Timestep must be positive and finite"
        );
        SemiImplicitEulerIntegrator { timestep }
    }
}

impl Integrator for SemiImplicitEulerIntegrator {
    fn name(&self) -> &str {
        "Semi-implicit Euler"
    }

    fn timestep(&self) -> f32 {
        self.timestep
    }

    fn set_timestep(&mut self, dt: f32) {
        assert!(dt > 0.0 && dt.is_finite(), "Timestep must be positive and finite");
        self.timestep = dt;
    }

    fn integrate(&self, bodies: &mut [BodyState], gravity: Vec3) -> usize {
        let dt = self.timestep;
        for_each_movable(bodies, |body| {
            let acceleration = body.acceleration(gravity);
            body.linear_velocity += acceleration * dt;
            body.linear_velocity *= 1.0 / (1.0 + dt * body.linear_damping);
            body.position += body.linear_velocity * dt;
            body.previous_acceleration = Some(acceleration);
            body.integrate_angular(dt);
        })
    }
}

/// Velocity Verlet
#[derive(Debug, Clone)]
pub struct VelocityVerletIntegrator {
    timestep: f32,
}

impl VelocityVerletIntegrator {
    /// Create a new velocity Verlet integrator with the given timestep
    ///
    /// # Panics
    ///
    /// Panics if timestep is non-positive, NaN, or infinite
    pub fn new(timestep: f32) -> Self {
        assert!(
            timestep > 0.0 && timestep.is_finite(),
            "Timestep must be positive and finite"
        );
        VelocityVerletIntegrator { timestep }
    }
}

impl Integrator for VelocityVerletIntegrator {
    fn name(&self) -> &str {
        "Velocity Verlet"
    }

    fn timestep(&self) -> f32 {
        self.timestep
    }

    fn set_timestep(&mut self, dt: f32) {
        assert!(dt > 0.0 && dt.is_finite(), "Timestep must be positive and finite");
        self.timestep = dt;
    }

    fn integrate(&self, bodies: &mut [BodyState], gravity: Vec3) -> usize {
        let dt = self.timestep;
        for_each_movable(bodies, |body| {
            let new_acceleration = body.acceleration(gravity);
            let old_acceleration = body.previous_acceleration.unwrap_or(new_acceleration);

            // x(t + dt) = x(t) + v(t)*dt + 0.5*a(t)*dt²
            body.position += body.linear_velocity * dt + old_acceleration * (0.5 * dt * dt);
            // v(t + dt) = v(t) + 0.5*(a(t) + a(t + dt))*dt
            body.linear_velocity += (old_acceleration + new_acceleration) * (0.5 * dt);
            body.linear_velocity *= 1.0 / (1.0 + dt * body.linear_damping);
            body.previous_acceleration = Some(new_acceleration);
            body.integrate_angular(dt);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRAVITY: Vec3 = Vec3::new(0.0, 0.0, -9.81);

    #[test]
    fn test_verlet_creation() {
        let integrator = VelocityVerletIntegrator::new(0.01);
        assert_eq!(integrator.timestep(), 0.01);
        assert_eq!(integrator.name(), "Velocity Verlet");
    }

    #[test]
    #[should_panic(expected = "Timestep must be positive and finite")]
    fn test_verlet_invalid_timestep() {
        VelocityVerletIntegrator::new(0.0);
    }

    #[test]
    #[should_panic(expected = "Timestep must be positive and finite")]
    fn test_euler_nan_timestep() {
        SemiImplicitEulerIntegrator::new(f32::NAN);
    }

    #[test]
    fn test_timestep_validation() {
        assert!(VelocityVerletIntegrator::new(1.0 / 60.0).validate_timestep().is_ok());
        assert!(VelocityVerletIntegrator::new(1e-8).validate_timestep().is_err());
        assert!(SemiImplicitEulerIntegrator::new(2.0).validate_timestep().is_err());
    }

    #[test]
    fn test_set_timestep() {
        let mut integrator = SemiImplicitEulerIntegrator::new(0.01);
        integrator.set_timestep(0.02);
        assert_eq!(integrator.timestep(), 0.02);
    }

    #[test]
    fn test_free_motion_keeps_velocity() {
        let integrator = VelocityVerletIntegrator::new(0.1);
        let mut body = BodyState::at(Vec3::ZERO);
        body.linear_velocity = Vec3::new(1.0, 2.0, 0.0);
        let mut bodies = [body];
        for _ in 0..10 {
            integrator.integrate(&mut bodies, Vec3::ZERO);
        }
        assert!((bodies[0].position - Vec3::new(1.0, 2.0, 0.0)).length() < 1e-4);
        assert_eq!(bodies[0].linear_velocity, Vec3::new(1.0, 2.0, 0.0));
    }

    #[test]
    fn test_verlet_constant_acceleration_is_exact() {
        let integrator = VelocityVerletIntegrator::new(0.01);
        let mut bodies = [BodyState::at(Vec3::ZERO)];
        for _ in 0..100 {
            integrator.integrate(&mut bodies, GRAVITY);
        }
        // z = 0.5 * g * t²
        assert!((bodies[0].position.z - 0.5 * -9.81).abs() < 1e-3);
        assert!((bodies[0].linear_velocity.z + 9.81).abs() < 1e-3);
    }

    #[test]
    fn test_euler_falls_under_gravity() {
        let integrator = SemiImplicitEulerIntegrator::new(1.0 / 60.0);
        let mut bodies = [BodyState::at(Vec3::ZERO)];
        assert_eq!(integrator.integrate(&mut bodies, GRAVITY), 1);
        assert!(bodies[0].linear_velocity.z < 0.0);
        assert!(bodies[0].position.z < 0.0);
    }

    #[test]
    fn test_immovable_bodies_are_skipped() {
        let integrator = SemiImplicitEulerIntegrator::new(0.01);
        let mut fixed = BodyState::at(Vec3::ONE);
        fixed.inv_mass = 0.0;
        let mut bodies = [fixed, BodyState::at(Vec3::ZERO)];
        assert_eq!(integrator.integrate(&mut bodies, GRAVITY), 1);
        assert_eq!(bodies[0].position, Vec3::ONE);
    }

    #[test]
    fn test_torque_spins_body() {
        let integrator = SemiImplicitEulerIntegrator::new(0.01);
        let mut body = BodyState::at(Vec3::ZERO);
        body.torque = Vec3::new(0.0, 0.0, 10.0);
        body.angular_damping = 0.0;
        let mut bodies = [body];
        integrator.integrate(&mut bodies, Vec3::ZERO);
        assert!((bodies[0].angular_velocity.z - 0.1).abs() < 1e-5);
        assert!(bodies[0].rotation != Quat::IDENTITY);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(IntegratorKind::from_name("Verlet"), Some(IntegratorKind::VelocityVerlet));
        assert_eq!(IntegratorKind::from_name("rk8"), None);
        assert_eq!(IntegratorKind::default().name(), "euler");
        assert_eq!(IntegratorKind::VelocityVerlet.create(0.01).name(), "Velocity Verlet");
    }
}
