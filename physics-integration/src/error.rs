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
//! Error types for the physics integration layer
//!
//! Every fallible native call returns [`Result`]. The [`PhysicsSystem`](crate::system::PhysicsSystem)
//! converts these into log entries and partial-result state at its boundary, so
//! per-frame processing itself never returns an error to the scene framework.

use thiserror::Error;

/// Errors produced by the native layer, the archive and configuration
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PhysicsError {
    /// Geometry description cannot produce a native shape (zero extents, empty mesh, ...)
    #[error("invalid {kind} geometry: {reason}")]
    InvalidGeometry {
        /// Shape kind name
        kind: &'static str,
        /// What is wrong with the description
        reason: String,
    },

    /// Render-dependent geometry whose render data has not been attached yet
    #[error("{kind} geometry is waiting for render data")]
    GeometryNotReady {
        /// Shape kind name
        kind: &'static str,
    },

    /// A handle refers to a released or never-created native object
    #[error("stale {kind} handle")]
    StaleHandle {
        /// Native object kind
        kind: &'static str,
    },

    /// Attempt to install a native handle over a live one
    #[error("{kind} handle already installed")]
    HandleAlreadyInstalled {
        /// Native object kind
        kind: &'static str,
    },

    /// Structural mutation requested while a simulation step is in flight
    #[error("simulation step is in flight")]
    StepInFlight,

    /// The native simulation step reported an internal error
    #[error("simulation step failed: {0}")]
    StepFailed(String),

    /// Configuration value out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Archive value missing or of the wrong type
    #[error("archive key `{key}`: {reason}")]
    Archive {
        /// Archive key
        key: String,
        /// Failure description
        reason: String,
    },

    /// JSON (de)serialization of an archive
    #[error("archive JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A fixed-capacity native resource is exhausted
    #[error("{what} capacity of {capacity} exceeded")]
    CapacityExceeded {
        /// Resource name
        what: &'static str,
        /// Maximum number of entries
        capacity: usize,
    },
}

impl PhysicsError {
    /// Shorthand for [`PhysicsError::InvalidGeometry`]
    pub fn invalid_geometry(kind: &'static str, reason: impl Into<String>) -> Self {
        PhysicsError::InvalidGeometry {
            kind,
            reason: reason.into(),
        }
    }

    /// Whether the error only means "try again once render data exists"
    pub fn is_not_ready(&self) -> bool {
        matches!(self, PhysicsError::GeometryNotReady { .. })
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, PhysicsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PhysicsError::invalid_geometry("sphere", "radius must be positive");
        assert_eq!(err.to_string(), "invalid sphere geometry: radius must be positive");

        let err = PhysicsError::CapacityExceeded { what: "vehicle", capacity: 100 };
        assert_eq!(err.to_string(), "vehicle capacity of 100 exceeded");
    }

    #[test]
    fn test_not_ready_classification() {
        assert!(PhysicsError::GeometryNotReady { kind: "mesh" }.is_not_ready());
        assert!(!PhysicsError::StepInFlight.is_not_ready());
    }

    #[test]
    fn test_json_conversion() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: PhysicsError = parse.unwrap_err().into();
        assert!(matches!(err, PhysicsError::Json(_)));
    }
}
