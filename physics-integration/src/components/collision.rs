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
//! Per-step collision and trigger events

use crate::ecs::{Component, Entity};
use crate::native::ContactPoint;

/// Contact points kept per pair
pub const MAX_CONTACT_POINTS: usize = 10;

/// Two entities touching during the last step
#[derive(Debug, Clone, PartialEq)]
pub struct CollisionInfo {
    /// First entity
    pub first: Entity,
    /// Second entity
    pub second: Entity,
    /// Up to [`MAX_CONTACT_POINTS`] points
    pub points: Vec<ContactPoint>,
}

/// An entity entering a trigger during the last step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerInfo {
    /// Entity owning the trigger shape
    pub trigger: Entity,
    /// Entity that entered
    pub other: Entity,
}

/// Scene singleton collecting the events of the last step
#[derive(Debug, Clone, Default)]
pub struct CollisionSingleComponent {
    /// Contacts
    pub collisions: Vec<CollisionInfo>,
    /// Trigger entries
    pub triggers: Vec<TriggerInfo>,
}

impl Component for CollisionSingleComponent {}

impl CollisionSingleComponent {
    /// Drop every event
    pub fn clear(&mut self) {
        self.collisions.clear();
        self.triggers.clear();
    }

    /// Check whether no event is recorded
    pub fn is_empty(&self) -> bool {
        self.collisions.is_empty() && self.triggers.is_empty()
    }

    /// Record a contact, truncating its points
    pub fn push_collision(&mut self, first: Entity, second: Entity, mut points: Vec<ContactPoint>) {
        points.truncate(MAX_CONTACT_POINTS);
        self.collisions.push(CollisionInfo { first, second, points });
    }

    /// Record a trigger entry
    pub fn push_trigger(&mut self, trigger: Entity, other: Entity) {
        self.triggers.push(TriggerInfo { trigger, other });
    }

    /// Contacts involving `entity`
    pub fn collisions_of(&self, entity: Entity) -> impl Iterator<Item = &CollisionInfo> + '_ {
        self.collisions
            .iter()
            .filter(move |c| c.first == entity || c.second == entity)
    }

    /// Drop every event involving `entity`
    pub fn remove_entity(&mut self, entity: Entity) {
        self.collisions
            .retain(|c| c.first != entity && c.second != entity);
        self.triggers
            .retain(|t| t.trigger != entity && t.other != entity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::Scene;
    use glam::Vec3;

    #[test]
    fn test_points_are_truncated_and_entities_removed() {
        let mut scene = Scene::new();
        let (a, b, c) = (scene.create_entity(), scene.create_entity(), scene.create_entity());
        let point = ContactPoint {
            position: Vec3::ZERO,
            normal: Vec3::Z,
            separation: -0.01,
        };
        let mut single = CollisionSingleComponent::default();
        single.push_collision(a, b, vec![point; 25]);
        single.push_collision(b, c, vec![point]);
        single.push_trigger(c, a);

        assert_eq!(single.collisions[0].points.len(), MAX_CONTACT_POINTS);
        assert_eq!(single.collisions_of(b).count(), 2);
        single.remove_entity(a);
        assert_eq!(single.collisions.len(), 1);
        assert!(single.triggers.is_empty());
        single.clear();
        assert!(single.is_empty());
    }
}
