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
//! Keyed archive used as the persisted-state boundary
//!
//! Components serialize themselves into a [`KeyedArchive`]: a map from stable
//! string keys (for example `"characterController.up"`) to typed values. The
//! archive round-trips through JSON without loss, floats included.
//!
//! Lookups come in two flavours. The `get_*` accessors take a default and never
//! fail, matching how engine options are read. The `try_*` accessors return an
//! error when the key holds a value of a different type.

use crate::error::{PhysicsError, Result};
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single typed archive value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum ArchiveValue {
    /// Boolean flag
    Bool(bool),
    /// Signed 32-bit integer
    Int32(i32),
    /// Unsigned 32-bit integer
    UInt32(u32),
    /// Single precision float
    Float(f32),
    /// UTF-8 string
    String(String),
    /// Three-component vector
    Vector3(Vec3),
    /// Rotation quaternion
    Quaternion(Quat),
    /// Nested archive
    Archive(KeyedArchive),
}

impl ArchiveValue {
    fn type_name(&self) -> &'static str {
        match self {
            ArchiveValue::Bool(_) => "bool",
            ArchiveValue::Int32(_) => "int32",
            ArchiveValue::UInt32(_) => "uint32",
            ArchiveValue::Float(_) => "float",
            ArchiveValue::String(_) => "string",
            ArchiveValue::Vector3(_) => "vector3",
            ArchiveValue::Quaternion(_) => "quaternion",
            ArchiveValue::Archive(_) => "archive",
        }
    }
}

/// String-keyed typed value store with deterministic key order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyedArchive {
    values: BTreeMap<String, ArchiveValue>,
}

macro_rules! archive_accessors {
    ($set:ident, $get:ident, $try_get:ident, $variant:ident, $ty:ty, $name:literal) => {
        #[doc = concat!("Store a ", $name, " value under `key`")]
        pub fn $set(&mut self, key: &str, value: $ty) {
            self.values.insert(key.to_string(), ArchiveValue::$variant(value));
        }

        #[doc = concat!("Read a ", $name, " value, falling back to `default` when missing or mistyped")]
        pub fn $get(&self, key: &str, default: $ty) -> $ty {
            match self.values.get(key) {
                Some(ArchiveValue::$variant(v)) => v.clone(),
                _ => default,
            }
        }

        #[doc = concat!("Read a ", $name, " value; `Ok(None)` when missing, error when mistyped")]
        pub fn $try_get(&self, key: &str) -> Result<Option<$ty>> {
            match self.values.get(key) {
                None => Ok(None),
                Some(ArchiveValue::$variant(v)) => Ok(Some(v.clone())),
                Some(other) => Err(PhysicsError::Archive {
                    key: key.to_string(),
                    reason: format!("expected {}, found {}", $name, other.type_name()),
                }),
            }
        }
    };
}

impl KeyedArchive {
    /// Create an empty archive
    pub fn new() -> Self {
        KeyedArchive {
            values: BTreeMap::new(),
        }
    }

    archive_accessors!(set_bool, get_bool, try_bool, Bool, bool, "bool");
    archive_accessors!(set_i32, get_i32, try_i32, Int32, i32, "int32");
    archive_accessors!(set_u32, get_u32, try_u32, UInt32, u32, "uint32");
    archive_accessors!(set_f32, get_f32, try_f32, Float, f32, "float");
    archive_accessors!(set_string, get_string, try_string, String, String, "string");
    archive_accessors!(set_vector3, get_vector3, try_vector3, Vector3, Vec3, "vector3");
    archive_accessors!(set_quaternion, get_quaternion, try_quaternion, Quaternion, Quat, "quaternion");
    archive_accessors!(set_archive, get_archive, try_archive, Archive, KeyedArchive, "archive");

    /// Raw value lookup
    pub fn value(&self, key: &str) -> Option<&ArchiveValue> {
        self.values.get(key)
    }

    /// Whether `key` is present
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Remove a key, returning its value
    pub fn remove(&mut self, key: &str) -> Option<ArchiveValue> {
        self.values.remove(key)
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the archive has no keys
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Keys in sorted order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Serialize to a JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse an archive from JSON produced by [`KeyedArchive::to_json`]
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
