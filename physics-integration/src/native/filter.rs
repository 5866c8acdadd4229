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
//! Collision filter words and scene-query filters
//!
//! Every native shape carries four 32-bit filter words:
//!
//! | word | meaning |
//! |------|---------|
//! | `word0` | engine flags, bit 0 enables CCD |
//! | `word1` | type mask: what the shape *is* |
//! | `word2` | collide-with mask: what the shape collides with |
//! | `word3` | surface tag used by vehicle suspension queries |

use crate::native::ActorHandle;
use serde::{Deserialize, Serialize};

/// `word0` bit enabling continuous collision detection
pub const CCD_FLAG: u32 = 1 << 0;

/// Native per-shape filter data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterData {
    /// Engine flags
    pub word0: u32,
    /// Type mask
    pub word1: u32,
    /// Collide-with mask
    pub word2: u32,
    /// Surface tag
    pub word3: u32,
}

impl FilterData {
    /// Filter data with the given masks and no flags
    pub fn new(type_mask: u32, collide_with: u32) -> Self {
        FilterData {
            word0: 0,
            word1: type_mask,
            word2: collide_with,
            word3: 0,
        }
    }

    /// Type mask
    pub fn type_mask(&self) -> u32 {
        self.word1
    }

    /// Collide-with mask
    pub fn collide_with(&self) -> u32 {
        self.word2
    }

    /// Surface tag
    pub fn surface(&self) -> u32 {
        self.word3
    }

    /// Whether CCD is enabled
    pub fn ccd(&self) -> bool {
        self.word0 & CCD_FLAG != 0
    }

    /// Copy with CCD set or cleared
    pub fn with_ccd(mut self, enabled: bool) -> Self {
        if enabled {
            self.word0 |= CCD_FLAG;
        } else {
            self.word0 &= !CCD_FLAG;
        }
        self
    }

    /// Copy with the surface tag replaced
    pub fn with_surface(mut self, surface: u32) -> Self {
        self.word3 = surface;
        self
    }

    /// Copy with type and collide-with masks replaced
    pub fn with_masks(mut self, type_mask: u32, collide_with: u32) -> Self {
        self.word1 = type_mask;
        self.word2 = collide_with;
        self
    }
}

/// Pair filter used by the simulation and by controller sweeps
///
/// A pair is suppressed only when neither shape's type appears in the other
/// shape's collide-with mask.
pub fn pairs_collide(a: &FilterData, b: &FilterData) -> bool {
    (a.word1 & b.word2) != 0 || (b.word1 & a.word2) != 0
}

/// Which shapes a scene query may hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Every shape
    All,
    /// Shapes whose type mask intersects the given mask
    TypeMask(u32),
    /// Shapes whose surface tag intersects the given mask
    SurfaceMask(u32),
    /// Shapes that pass [`pairs_collide`] against the given filter
    Collision(FilterData),
}

/// Scene-query pre-filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryFilter {
    /// Shape selection
    pub mode: QueryMode,
    /// Never report hits on this actor's shapes
    pub exclude_actor: Option<ActorHandle>,
    /// Report trigger shapes as hits
    pub include_triggers: bool,
}

impl QueryFilter {
    /// Hit every non-trigger shape
    pub fn all() -> Self {
        QueryFilter {
            mode: QueryMode::All,
            exclude_actor: None,
            include_triggers: false,
        }
    }

    /// Hit shapes whose type mask intersects `mask`
    pub fn type_mask(mask: u32) -> Self {
        QueryFilter {
            mode: QueryMode::TypeMask(mask),
            ..QueryFilter::all()
        }
    }

    /// Hit shapes whose surface tag intersects `mask`
    pub fn surface_mask(mask: u32) -> Self {
        QueryFilter {
            mode: QueryMode::SurfaceMask(mask),
            ..QueryFilter::all()
        }
    }

    /// Hit shapes that would collide with `filter`
    pub fn collision(filter: FilterData) -> Self {
        QueryFilter {
            mode: QueryMode::Collision(filter),
            ..QueryFilter::all()
        }
    }

    /// Copy that ignores one actor
    pub fn excluding(mut self, actor: ActorHandle) -> Self {
        self.exclude_actor = Some(actor);
        self
    }

    /// Copy that also reports trigger shapes
    pub fn with_triggers(mut self) -> Self {
        self.include_triggers = true;
        self
    }

    /// Pre-filter one shape
    pub fn accepts(&self, actor: ActorHandle, filter: &FilterData, trigger: bool) -> bool {
        if trigger && !self.include_triggers {
            return false;
        }
        if self.exclude_actor == Some(actor) {
            return false;
        }
        match self.mode {
            QueryMode::All => true,
            QueryMode::TypeMask(mask) => filter.word1 & mask != 0,
            QueryMode::SurfaceMask(mask) => filter.word3 & mask != 0,
            QueryMode::Collision(ref query) => pairs_collide(query, filter),
        }
    }
}

impl Default for QueryFilter {
    fn default() -> Self {
        QueryFilter::all()
    }
}
