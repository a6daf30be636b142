use crate::ecs::Transform;
use crate::error::ScriptError;
use crate::scripts::ScriptHost;
use anyhow::{Context, Result};
use bevy_ecs::prelude::Entity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Declarative scene tree: entities, their transforms and the behaviours attached to them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneDocument {
    #[serde(default)]
    pub entities: Vec<SceneEntity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneEntity {
    pub name: String,
    #[serde(default)]
    pub transform: TransformData,
    #[serde(default = "default_visible")]
    pub visible: bool,
    /// Behaviour ids, attached in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub behaviours: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SceneEntity>,
}

const fn default_visible() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformData {
    #[serde(default)]
    pub translation: Vec2Data,
    #[serde(default)]
    pub rotation: f32,
    #[serde(default = "Vec2Data::one")]
    pub scale: Vec2Data,
}

impl Default for TransformData {
    fn default() -> Self {
        Self { translation: Vec2Data::default(), rotation: 0.0, scale: Vec2Data::one() }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2Data {
    pub x: f32,
    pub y: f32,
}

impl Vec2Data {
    const fn one() -> Self {
        Self { x: 1.0, y: 1.0 }
    }
}

impl From<glam::Vec2> for Vec2Data {
    fn from(value: glam::Vec2) -> Self {
        Self { x: value.x, y: value.y }
    }
}

impl From<Vec2Data> for glam::Vec2 {
    fn from(value: Vec2Data) -> Self {
        glam::Vec2::new(value.x, value.y)
    }
}

impl From<TransformData> for Transform {
    fn from(value: TransformData) -> Self {
        Transform::from_parts(value.translation.into(), value.rotation, value.scale.into())
    }
}

impl From<Transform> for TransformData {
    fn from(value: Transform) -> Self {
        Self { translation: value.translation.into(), rotation: value.rotation, scale: value.scale.into() }
    }
}

impl SceneDocument {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).with_context(|| format!("Reading scene file {}", path.display()))?;
        let scene = serde_json::from_slice::<SceneDocument>(&bytes)
            .with_context(|| format!("Parsing scene file {}", path.display()))?;
        Ok(scene)
    }

    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("Creating scene directory {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json.as_bytes()).with_context(|| format!("Writing scene file {}", path.display()))?;
        Ok(())
    }

    /// Behaviour ids referenced anywhere in the tree, deduplicated and sorted.
    pub fn behaviour_ids(&self) -> Vec<String> {
        fn collect(entity: &SceneEntity, out: &mut Vec<String>) {
            out.extend(entity.behaviours.iter().cloned());
            for child in &entity.children {
                collect(child, out);
            }
        }
        let mut ids = Vec::new();
        for entity in &self.entities {
            collect(entity, &mut ids);
        }
        ids.sort();
        ids.dedup();
        ids
    }
}

impl ScriptHost {
    /// Spawns the document's entities and attaches their behaviours. Returns the new roots.
    /// Scene-load hooks run on the next `load_scene` or `frame`. On failure everything this
    /// call spawned is despawned again before the error is returned.
    pub fn instantiate_scene(&mut self, scene: &SceneDocument) -> Result<Vec<Entity>, ScriptError> {
        let mut roots = Vec::with_capacity(scene.entities.len());
        for data in &scene.entities {
            let root = self.spawn_root(data.name.clone(), Transform::from(data.transform));
            roots.push(root);
            if let Err(err) = self.populate_entity(root, data) {
                warn!(entity = %data.name, error = %err, "scene_instantiation_rolled_back");
                for root in roots {
                    if let Err(cleanup) = self.despawn(root) {
                        debug!(error = %cleanup, "scene_rollback_skipped_root");
                    }
                }
                return Err(err);
            }
        }
        Ok(roots)
    }

    fn populate_entity(&mut self, entity: Entity, data: &SceneEntity) -> Result<(), ScriptError> {
        if !data.visible {
            self.set_visible(entity, false)?;
        }
        for (key, value) in &data.fields {
            self.set_field(entity, key, value.clone())?;
        }
        for tag in &data.tags {
            self.add_tag(entity, tag)?;
        }
        for behaviour in &data.behaviours {
            self.attach(entity, behaviour)?;
        }
        for child in &data.children {
            let spawned = self.spawn_child(entity, child.name.clone(), Transform::from(child.transform))?;
            self.populate_entity(spawned, child)?;
        }
        Ok(())
    }

    /// Captures the live tree as a document. Script state is not part of the document.
    pub fn export_scene(&self) -> SceneDocument {
        let roots = self.with_scene(|scene| scene.roots().to_vec());
        SceneDocument { entities: roots.into_iter().map(|root| self.export_entity(root)).collect() }
    }

    fn export_entity(&self, entity: Entity) -> SceneEntity {
        let (name, transform, visible, fields, tags, children) = self.with_scene(|scene| {
            (
                scene.label(entity),
                scene.transform(entity).unwrap_or_default(),
                scene.is_visible(entity),
                scene.fields(entity).map(|fields| fields.0.clone()).unwrap_or_default(),
                scene.tags(entity).to_vec(),
                scene.children(entity).to_vec(),
            )
        });
        let behaviours =
            self.instances_on(entity).into_iter().filter_map(|instance| self.behaviour_of(instance)).collect();
        SceneEntity {
            name,
            transform: transform.into(),
            visible,
            behaviours,
            fields,
            tags,
            children: children.into_iter().map(|child| self.export_entity(child)).collect(),
        }
    }
}
