use super::*;
use crate::error::ScriptError;
use bevy_ecs::prelude::{Entity, Mut, World};
use glam::Mat4;
use smallvec::SmallVec;

type NodeStack = SmallVec<[Entity; 64]>;

/// Parent label reported when a root-level lookup fails.
const SCENE_LABEL: &str = "scene";

// ---------- Scene tree container ----------
pub struct SceneWorld {
    pub world: World,
    roots: Vec<Entity>,
}

impl Default for SceneWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneWorld {
    pub fn new() -> Self {
        Self { world: World::new(), roots: Vec::new() }
    }

    pub fn spawn_root(&mut self, name: impl Into<String>, transform: Transform) -> Entity {
        let entity = self
            .world
            .spawn((
                EntityName(name.into()),
                transform,
                Visible::default(),
                Children::default(),
                ScriptSlots::default(),
                EntityFields::default(),
                Tags::default(),
            ))
            .id();
        self.roots.push(entity);
        entity
    }

    pub fn spawn_child(
        &mut self,
        parent: Entity,
        name: impl Into<String>,
        transform: Transform,
    ) -> Result<Entity, ScriptError> {
        if !self.contains(parent) {
            return Err(ScriptError::UnknownEntity(parent));
        }
        let entity = self
            .world
            .spawn((
                EntityName(name.into()),
                transform,
                Visible::default(),
                Parent(parent),
                Children::default(),
                ScriptSlots::default(),
                EntityFields::default(),
                Tags::default(),
            ))
            .id();
        if let Some(mut children) = self.world.get_mut::<Children>(parent) {
            children.0.push(entity);
        }
        Ok(entity)
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.world.get::<EntityName>(entity).is_some()
    }

    pub fn roots(&self) -> &[Entity] {
        &self.roots
    }

    pub fn name(&self, entity: Entity) -> Option<&str> {
        self.world.get::<EntityName>(entity).map(|name| name.0.as_str())
    }

    /// Name for diagnostics; falls back to the raw id for despawned entities.
    pub fn label(&self, entity: Entity) -> String {
        self.name(entity).map(str::to_string).unwrap_or_else(|| format!("{entity:?}"))
    }

    pub fn transform(&self, entity: Entity) -> Option<Transform> {
        self.world.get::<Transform>(entity).copied()
    }

    pub fn transform_mut(&mut self, entity: Entity) -> Option<Mut<'_, Transform>> {
        self.world.get_mut::<Transform>(entity)
    }

    pub fn parent(&self, entity: Entity) -> Option<Entity> {
        self.world.get::<Parent>(entity).map(|parent| parent.0)
    }

    pub fn children(&self, entity: Entity) -> &[Entity] {
        self.world.get::<Children>(entity).map(|children| children.0.as_slice()).unwrap_or(&[])
    }

    pub fn scripts(&self, entity: Entity) -> &[InstanceId] {
        self.world.get::<ScriptSlots>(entity).map(|slots| slots.0.as_slice()).unwrap_or(&[])
    }

    pub fn scripts_mut(&mut self, entity: Entity) -> Option<Mut<'_, ScriptSlots>> {
        self.world.get_mut::<ScriptSlots>(entity)
    }

    pub fn fields(&self, entity: Entity) -> Option<&EntityFields> {
        self.world.get::<EntityFields>(entity)
    }

    pub fn fields_mut(&mut self, entity: Entity) -> Option<Mut<'_, EntityFields>> {
        self.world.get_mut::<EntityFields>(entity)
    }

    pub fn is_visible(&self, entity: Entity) -> bool {
        self.world.get::<Visible>(entity).map(|visible| visible.0).unwrap_or(false)
    }

    /// Returns whether the flag changed.
    pub fn set_visible(&mut self, entity: Entity, visible: bool) -> Result<bool, ScriptError> {
        let mut flag = self.world.get_mut::<Visible>(entity).ok_or(ScriptError::UnknownEntity(entity))?;
        if flag.0 == visible {
            return Ok(false);
        }
        flag.0 = visible;
        Ok(true)
    }

    pub fn tags(&self, entity: Entity) -> &[String] {
        self.world.get::<Tags>(entity).map(|tags| tags.0.as_slice()).unwrap_or(&[])
    }

    pub fn has_tag(&self, entity: Entity, tag: &str) -> bool {
        self.tags(entity).iter().any(|existing| existing == tag)
    }

    /// Returns whether the tag was new.
    pub fn add_tag(&mut self, entity: Entity, tag: &str) -> Result<bool, ScriptError> {
        let mut tags = self.world.get_mut::<Tags>(entity).ok_or(ScriptError::UnknownEntity(entity))?;
        if tags.0.iter().any(|existing| existing == tag) {
            return Ok(false);
        }
        tags.0.push(tag.to_string());
        Ok(true)
    }

    /// Returns whether the tag was present.
    pub fn remove_tag(&mut self, entity: Entity, tag: &str) -> Result<bool, ScriptError> {
        let mut tags = self.world.get_mut::<Tags>(entity).ok_or(ScriptError::UnknownEntity(entity))?;
        let before = tags.0.len();
        tags.0.retain(|existing| existing != tag);
        Ok(tags.0.len() != before)
    }

    /// Entities accepted by `filter`, in traversal order.
    pub fn entities_matching(&self, filter: &EntityFilter) -> Vec<Entity> {
        self.traversal_order().into_iter().filter(|entity| filter.matches(self, *entity)).collect()
    }

    /// First root named `name`.
    pub fn root_by_name(&self, name: &str) -> Result<Entity, ScriptError> {
        self.roots
            .iter()
            .copied()
            .find(|root| self.name(*root) == Some(name))
            .ok_or_else(|| ScriptError::NotFound { parent: SCENE_LABEL.to_string(), name: name.to_string() })
    }

    /// First direct child of `entity` named `name`.
    pub fn child_by_name(&self, entity: Entity, name: &str) -> Result<Entity, ScriptError> {
        self.children(entity)
            .iter()
            .copied()
            .find(|child| self.name(*child) == Some(name))
            .ok_or_else(|| ScriptError::NotFound { parent: self.label(entity), name: name.to_string() })
    }

    /// Resolves a dot-separated path such as `player.camera`: the first segment names a
    /// root, every later one a direct child of the entity before it.
    pub fn find_path(&self, path: &str) -> Result<Entity, ScriptError> {
        let mut segments = path.split('.');
        let root = self.root_by_name(segments.next().unwrap_or_default())?;
        segments.try_fold(root, |current, segment| self.child_by_name(current, segment))
    }

    /// Like `find_path`, but every segment is a direct child, starting below `entity`.
    pub fn find_relative(&self, entity: Entity, path: &str) -> Result<Entity, ScriptError> {
        path.split('.').try_fold(entity, |current, segment| self.child_by_name(current, segment))
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.traversal_order().len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Depth-first pre-order search below `entity`; the first match wins when names repeat.
    pub fn find_descendant(&self, entity: Entity, name: &str) -> Result<Entity, ScriptError> {
        let mut stack: NodeStack = self.children(entity).iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            if self.name(current) == Some(name) {
                return Ok(current);
            }
            stack.extend(self.children(current).iter().rev().copied());
        }
        Err(ScriptError::NotFound { parent: self.label(entity), name: name.to_string() })
    }

    /// Every live entity, parents before children, siblings in attachment order.
    pub fn traversal_order(&self) -> Vec<Entity> {
        let mut order = Vec::new();
        let mut stack: NodeStack = self.roots.iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            order.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        order
    }

    /// Post-order over the subtree rooted at `entity`: deepest descendants first, `entity` last.
    pub fn destruction_order(&self, entity: Entity) -> Vec<Entity> {
        if !self.contains(entity) {
            return Vec::new();
        }
        let mut order = Vec::new();
        let mut stack: NodeStack = SmallVec::new();
        stack.push(entity);
        while let Some(current) = stack.pop() {
            order.push(current);
            stack.extend(self.children(current).iter().copied());
        }
        order.reverse();
        order
    }

    /// Removes the subtree and unlinks it from its parent. Script teardown is the caller's job.
    pub fn despawn_subtree(&mut self, entity: Entity) -> Result<Vec<Entity>, ScriptError> {
        if !self.contains(entity) {
            return Err(ScriptError::UnknownEntity(entity));
        }
        let order = self.destruction_order(entity);
        self.unlink(entity);
        for node in &order {
            let _ = self.world.despawn(*node);
        }
        Ok(order)
    }

    pub fn is_ancestor(&self, ancestor: Entity, entity: Entity) -> bool {
        let mut current = self.parent(entity);
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self.parent(node);
        }
        false
    }

    /// Moves `child` under `new_parent`, or to the root list when `None`. The local
    /// transform is recomputed so the entity keeps its world pose; under a parent whose
    /// world matrix cannot be inverted (a zero scale somewhere up the chain) the local
    /// transform is kept as it was.
    pub fn reparent(&mut self, child: Entity, new_parent: Option<Entity>) -> Result<(), ScriptError> {
        if !self.contains(child) {
            return Err(ScriptError::UnknownEntity(child));
        }
        if let Some(parent) = new_parent {
            if !self.contains(parent) {
                return Err(ScriptError::UnknownEntity(parent));
            }
            if parent == child || self.is_ancestor(child, parent) {
                return Err(ScriptError::HierarchyCycle { child: self.label(child), parent: self.label(parent) });
            }
        }
        let old_world = self.world_matrix(child).unwrap_or(Mat4::IDENTITY);
        let parent_world = match new_parent {
            Some(parent) => self.world_matrix(parent).unwrap_or(Mat4::IDENTITY),
            None => Mat4::IDENTITY,
        };
        if parent_world.determinant().abs() > f32::EPSILON {
            let local = Transform::from_mat4(parent_world.inverse() * old_world);
            if local.is_finite() {
                if let Some(mut transform) = self.world.get_mut::<Transform>(child) {
                    *transform = local;
                }
            }
        }
        self.unlink(child);
        match new_parent {
            Some(parent) => {
                self.world.entity_mut(child).insert(Parent(parent));
                if let Some(mut children) = self.world.get_mut::<Children>(parent) {
                    children.0.push(child);
                }
            }
            None => {
                self.world.entity_mut(child).remove::<Parent>();
                self.roots.push(child);
            }
        }
        Ok(())
    }

    /// Composes local transforms from the root down to `entity`.
    pub fn world_matrix(&self, entity: Entity) -> Option<Mat4> {
        let mut matrix = self.transform(entity)?.to_mat4();
        let mut current = self.parent(entity);
        while let Some(node) = current {
            matrix = self.transform(node)?.to_mat4() * matrix;
            current = self.parent(node);
        }
        Some(matrix)
    }

    fn unlink(&mut self, entity: Entity) {
        match self.parent(entity) {
            Some(parent) => {
                if let Some(mut children) = self.world.get_mut::<Children>(parent) {
                    children.0.retain(|child| *child != entity);
                }
            }
            None => self.roots.retain(|root| *root != entity),
        }
    }
}
