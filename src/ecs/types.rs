use bevy_ecs::prelude::*;
use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------- Components ----------
#[derive(Component, Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub translation: Vec2,
    pub rotation: f32,
    pub scale: Vec2,
}
impl Default for Transform {
    fn default() -> Self {
        Self { translation: Vec2::ZERO, rotation: 0.0, scale: Vec2::splat(1.0) }
    }
}
#[derive(Component, Clone, Debug, PartialEq, Eq)]
pub struct EntityName(pub String);
#[derive(Component, Clone, Copy)]
pub struct Parent(pub Entity);
#[derive(Component, Default, Clone)]
pub struct Children(pub Vec<Entity>);
/// Read by the external renderer; toggled from scripts through `render.setVisible`.
#[derive(Component, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Visible(pub bool);
impl Default for Visible {
    fn default() -> Self {
        Self(true)
    }
}
/// Script instances bound to the entity, in attachment order.
#[derive(Component, Default, Clone)]
pub struct ScriptSlots(pub Vec<InstanceId>);
/// Free-form labels used to group entities for queries, in insertion order.
#[derive(Component, Default, Clone, Debug, PartialEq, Eq)]
pub struct Tags(pub Vec<String>);
/// Named per-entity data shared by every script on the entity.
#[derive(Component, Default, Clone, Debug)]
pub struct EntityFields(pub BTreeMap<String, serde_json::Value>);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance#{}", self.0)
    }
}
