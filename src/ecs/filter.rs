use super::SceneWorld;
use bevy_ecs::prelude::Entity;
use serde::{Deserialize, Serialize};

/// Selects entities by their tags, field keys and place in the tree. Every listed
/// requirement must hold; an empty filter matches every entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityFilter {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub top_level_only: bool,
}

impl EntityFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>) -> Self {
        self.fields.push(key.into());
        self
    }

    pub fn top_level(mut self) -> Self {
        self.top_level_only = true;
        self
    }

    pub fn matches(&self, scene: &SceneWorld, entity: Entity) -> bool {
        if !scene.contains(entity) || (self.top_level_only && scene.parent(entity).is_some()) {
            return false;
        }
        if !self.tags.iter().all(|tag| scene.has_tag(entity, tag)) {
            return false;
        }
        let fields = scene.fields(entity);
        self.fields.iter().all(|key| fields.is_some_and(|fields| fields.0.contains_key(key)))
    }
}
