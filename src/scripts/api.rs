use super::instance::StateRecord;
use super::{dispatch, ScriptCommand, ScriptLog, SharedHost};
use crate::ecs::{EntityFilter, InstanceId, SceneWorld, Transform};
use crate::error::ScriptError;
use crate::events::HostEvent;
use crate::input::InputSnapshot;
use bevy_ecs::prelude::Entity;
use glam::Vec2;
use rand::Rng;
use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString, Map, NativeCallContext, FLOAT, INT};
use std::rc::Rc;
use tracing::info;

type ApiResult<T> = Result<T, Box<EvalAltResult>>;

pub(crate) const FIELD_TRANSLATION: &str = "translation";
pub(crate) const FIELD_ROTATION: &str = "rotation";
pub(crate) const FIELD_SCALE: &str = "scale";
pub(crate) const FIELD_VISIBLE: &str = "visible";
pub(crate) const FIELD_NAME: &str = "name";
const FIELD_TAGS: &str = "tags";

const BUILTIN_FIELDS: &[&str] = &[FIELD_TRANSLATION, FIELD_ROTATION, FIELD_SCALE, FIELD_VISIBLE, FIELD_NAME];

fn number(value: &Dynamic, what: &str) -> ApiResult<f32> {
    if let Ok(float) = value.as_float() {
        return Ok(float as f32);
    }
    if let Ok(int) = value.as_int() {
        return Ok(int as f32);
    }
    Err(format!("{what} expects a number, got {}", value.type_name()).into())
}

fn pair(value: &Dynamic, what: &str) -> ApiResult<Vec2> {
    let items = value
        .clone()
        .try_cast::<Array>()
        .filter(|items| items.len() == 2)
        .ok_or_else(|| format!("{what} expects a [x, y] array, got {}", value.type_name()))?;
    Ok(Vec2::new(number(&items[0], what)?, number(&items[1], what)?))
}

fn vec_to_array(value: Vec2) -> Array {
    vec![Dynamic::from(value.x as FLOAT), Dynamic::from(value.y as FLOAT)]
}

/// First argument of every hook and export. Hands out the capability handles for the
/// entity the running instance is attached to.
#[derive(Clone)]
pub struct ScriptContext {
    shared: SharedHost,
    entity: Entity,
    instance: InstanceId,
    state: StateRecord,
    input: Rc<InputSnapshot>,
}

impl ScriptContext {
    pub(crate) fn new(
        shared: SharedHost,
        entity: Entity,
        instance: InstanceId,
        state: StateRecord,
        input: Rc<InputSnapshot>,
    ) -> Self {
        Self { shared, entity, instance, state, input }
    }

    fn transform(&mut self) -> TransformHandle {
        TransformHandle { shared: Rc::clone(&self.shared), entity: self.entity }
    }

    fn keyboard(&mut self) -> KeyboardHandle {
        KeyboardHandle { input: Rc::clone(&self.input) }
    }

    fn mouse(&mut self) -> MouseHandle {
        MouseHandle { input: Rc::clone(&self.input) }
    }

    fn render(&mut self) -> RenderHandle {
        RenderHandle { shared: Rc::clone(&self.shared), entity: self.entity }
    }

    fn logger(&mut self) -> LoggerHandle {
        LoggerHandle { shared: Rc::clone(&self.shared), entity: self.entity, instance: self.instance }
    }

    fn entity(&mut self) -> EntityHandle {
        EntityHandle { shared: Rc::clone(&self.shared), entity: self.entity, owned: true }
    }

    fn state(&mut self) -> StateRecord {
        self.state.clone()
    }

    fn scene(&mut self) -> SceneHandle {
        SceneHandle { shared: Rc::clone(&self.shared) }
    }

    fn instance_id(&mut self) -> INT {
        self.instance.0 as INT
    }

    fn random(&mut self, min: Dynamic, max: Dynamic) -> ApiResult<FLOAT> {
        let min = number(&min, "random")? as FLOAT;
        let max = number(&max, "random")? as FLOAT;
        if max <= min {
            return Ok(min);
        }
        Ok(self.shared.borrow_mut().rng.gen_range(min..max))
    }

    /// Queues removal of this instance; it takes effect once the running hook returns.
    fn detach(&mut self) {
        self.shared.borrow_mut().commands.push(ScriptCommand::Detach(self.instance));
    }
}

#[derive(Clone)]
pub struct TransformHandle {
    shared: SharedHost,
    entity: Entity,
}

impl TransformHandle {
    fn read(&self) -> Transform {
        self.shared.borrow().scene.transform(self.entity).unwrap_or_default()
    }

    fn modify(&self, apply: impl FnOnce(&mut Transform)) -> ApiResult<()> {
        let mut host = self.shared.borrow_mut();
        let mut transform =
            host.scene.transform_mut(self.entity).ok_or_else(|| ScriptError::UnknownEntity(self.entity).into_rhai())?;
        apply(&mut *transform);
        Ok(())
    }

    fn translate(&mut self, dx: Dynamic, dy: Dynamic) -> ApiResult<()> {
        let delta = Vec2::new(number(&dx, "translate")?, number(&dy, "translate")?);
        self.modify(|transform| transform.translate(delta))
    }

    fn rotate(&mut self, radians: Dynamic) -> ApiResult<()> {
        let radians = number(&radians, "rotate")?;
        self.modify(|transform| transform.rotate(radians))
    }

    fn scale(&mut self, sx: Dynamic, sy: Dynamic) -> ApiResult<()> {
        let factor = Vec2::new(number(&sx, "scale")?, number(&sy, "scale")?);
        self.modify(|transform| transform.scale_by(factor))
    }

    fn x(&mut self) -> FLOAT {
        self.read().translation.x as FLOAT
    }

    fn y(&mut self) -> FLOAT {
        self.read().translation.y as FLOAT
    }

    fn rotation(&mut self) -> FLOAT {
        self.read().rotation as FLOAT
    }

    fn scale_x(&mut self) -> FLOAT {
        self.read().scale.x as FLOAT
    }

    fn scale_y(&mut self) -> FLOAT {
        self.read().scale.y as FLOAT
    }
}

#[derive(Clone)]
pub struct KeyboardHandle {
    input: Rc<InputSnapshot>,
}

impl KeyboardHandle {
    fn get_key(&mut self, name: &str) -> ApiResult<INT> {
        self.input.key(name).map(|code| code as INT).map_err(ScriptError::into_rhai)
    }

    fn is_key_pressed(&mut self, code: INT) -> bool {
        u32::try_from(code).map(|code| self.input.is_pressed(code)).unwrap_or(false)
    }

    fn is_down(&mut self, name: &str) -> ApiResult<bool> {
        self.input.is_named_pressed(name).map_err(ScriptError::into_rhai)
    }
}

#[derive(Clone)]
pub struct MouseHandle {
    input: Rc<InputSnapshot>,
}

impl MouseHandle {
    fn get_x(&mut self) -> FLOAT {
        self.input.mouse_x() as FLOAT
    }

    fn get_y(&mut self) -> FLOAT {
        self.input.mouse_y() as FLOAT
    }
}

#[derive(Clone)]
pub struct RenderHandle {
    shared: SharedHost,
    entity: Entity,
}

impl RenderHandle {
    fn set_visible(&mut self, visible: bool) -> ApiResult<()> {
        let mut host = self.shared.borrow_mut();
        let changed = host.scene.set_visible(self.entity, visible).map_err(ScriptError::into_rhai)?;
        if changed {
            host.events.push(HostEvent::VisibilityChanged { entity: self.entity, visible });
        }
        Ok(())
    }

    fn is_visible(&mut self) -> bool {
        self.shared.borrow().scene.is_visible(self.entity)
    }
}

#[derive(Clone)]
pub struct LoggerHandle {
    shared: SharedHost,
    entity: Entity,
    instance: InstanceId,
}

impl LoggerHandle {
    fn out(&mut self, message: Dynamic) {
        let message = message.to_string();
        let mut host = self.shared.borrow_mut();
        let entity = host.scene.label(self.entity);
        info!(target: "script", entity = %entity, instance = %self.instance, "{message}");
        host.logs.push(ScriptLog { entity, instance: self.instance, message });
    }
}

/// Navigable reference to an entity. Handles obtained from the tree of another entity
/// can read fields and dispatch calls but cannot write fields.
#[derive(Clone)]
pub struct EntityHandle {
    shared: SharedHost,
    entity: Entity,
    owned: bool,
}

impl EntityHandle {
    fn foreign(&self, entity: Entity) -> EntityHandle {
        EntityHandle { shared: Rc::clone(&self.shared), entity, owned: false }
    }

    fn tree(&mut self) -> TreeHandle {
        TreeHandle { origin: self.clone() }
    }

    fn scripts(&mut self) -> ScriptsHandle {
        ScriptsHandle { shared: Rc::clone(&self.shared), entity: self.entity }
    }

    fn fields(&mut self) -> FieldsHandle {
        FieldsHandle { shared: Rc::clone(&self.shared), entity: self.entity, writable: self.owned }
    }

    fn name(&mut self) -> String {
        self.shared.borrow().scene.label(self.entity)
    }

    fn id(&mut self) -> INT {
        self.entity.to_bits() as INT
    }

    fn alive(&mut self) -> bool {
        self.shared.borrow().scene.contains(self.entity)
    }

    /// Deferred: the subtree is torn down after the running hook returns.
    fn despawn(&mut self) {
        self.shared.borrow_mut().commands.push(ScriptCommand::Despawn(self.entity));
    }

    fn describe(&mut self) -> String {
        format!("Entity({})", self.name())
    }

    fn tags(&mut self) -> Array {
        self.shared.borrow().scene.tags(self.entity).iter().map(|tag| Dynamic::from(tag.clone())).collect()
    }

    fn has_tag(&mut self, tag: &str) -> bool {
        self.shared.borrow().scene.has_tag(self.entity, tag)
    }

    fn add_tag(&mut self, tag: &str) -> ApiResult<bool> {
        self.edit_tags(|scene, entity| scene.add_tag(entity, tag))
    }

    fn remove_tag(&mut self, tag: &str) -> ApiResult<bool> {
        self.edit_tags(|scene, entity| scene.remove_tag(entity, tag))
    }

    /// Tags of foreign entities are read-only, like their fields.
    fn edit_tags(
        &self,
        edit: impl FnOnce(&mut SceneWorld, Entity) -> Result<bool, ScriptError>,
    ) -> ApiResult<bool> {
        let mut host = self.shared.borrow_mut();
        if !self.owned {
            let entity = host.scene.label(self.entity);
            return Err(ScriptError::ReadOnlyField { entity, field: FIELD_TAGS.to_string() }.into_rhai());
        }
        edit(&mut host.scene, self.entity).map_err(ScriptError::into_rhai)
    }
}

/// Scene-wide lookups: dotted paths from a root, roots by name, and tag or field queries.
/// Every handle it returns is foreign.
#[derive(Clone)]
pub struct SceneHandle {
    shared: SharedHost,
}

impl SceneHandle {
    fn handle(&self, entity: Entity) -> EntityHandle {
        EntityHandle { shared: Rc::clone(&self.shared), entity, owned: false }
    }

    fn handles(&self, entities: Vec<Entity>) -> Array {
        entities.into_iter().map(|entity| Dynamic::from(self.handle(entity))).collect()
    }

    fn find(&mut self, path: &str) -> ApiResult<EntityHandle> {
        let found = self.shared.borrow().scene.find_path(path);
        found.map(|entity| self.handle(entity)).map_err(ScriptError::into_rhai)
    }

    fn root(&mut self, name: &str) -> ApiResult<EntityHandle> {
        let found = self.shared.borrow().scene.root_by_name(name);
        found.map(|entity| self.handle(entity)).map_err(ScriptError::into_rhai)
    }

    fn tagged(&mut self, tag: &str) -> Array {
        let matches = self.shared.borrow().scene.entities_matching(&EntityFilter::new().with_tag(tag));
        self.handles(matches)
    }

    /// `#{ tags: [..], fields: [..], top_level_only: bool }`; omitted keys impose nothing.
    fn query(&mut self, filter: Map) -> ApiResult<Array> {
        let filter: EntityFilter = rhai::serde::from_dynamic(&Dynamic::from_map(filter))?;
        let matches = self.shared.borrow().scene.entities_matching(&filter);
        Ok(self.handles(matches))
    }
}

#[derive(Clone)]
pub struct TreeHandle {
    origin: EntityHandle,
}

impl TreeHandle {
    fn get_child(&mut self, name: &str) -> ApiResult<EntityHandle> {
        let found = self.origin.shared.borrow().scene.find_descendant(self.origin.entity, name);
        found.map(|entity| self.origin.foreign(entity)).map_err(ScriptError::into_rhai)
    }

    fn has_child(&mut self, name: &str) -> bool {
        self.origin.shared.borrow().scene.find_descendant(self.origin.entity, name).is_ok()
    }

    fn parent(&mut self) -> Dynamic {
        let parent = self.origin.shared.borrow().scene.parent(self.origin.entity);
        match parent {
            Some(entity) => Dynamic::from(self.origin.foreign(entity)),
            None => Dynamic::UNIT,
        }
    }

    fn children(&mut self) -> Array {
        let children = self.origin.shared.borrow().scene.children(self.origin.entity).to_vec();
        children.into_iter().map(|entity| Dynamic::from(self.origin.foreign(entity))).collect()
    }

    /// Dotted path of direct children below this entity, e.g. `"arm.hand"`.
    fn find(&mut self, path: &str) -> ApiResult<EntityHandle> {
        let found = self.origin.shared.borrow().scene.find_relative(self.origin.entity, path);
        found.map(|entity| self.origin.foreign(entity)).map_err(ScriptError::into_rhai)
    }
}

#[derive(Clone)]
pub struct ScriptsHandle {
    shared: SharedHost,
    entity: Entity,
}

impl ScriptsHandle {
    fn call(&self, context: &NativeCallContext, function: &str, args: Vec<Dynamic>) -> ApiResult<Dynamic> {
        dispatch(context.engine(), &self.shared, self.entity, function, args).map_err(ScriptError::into_rhai)
    }

    fn has(&mut self, function: &str) -> bool {
        let host = self.shared.borrow();
        host.scene.scripts(self.entity).iter().any(|id| {
            host.instances.get(id).map(|record| record.is_live() && record.definition.exports(function)).unwrap_or(false)
        })
    }
}

/// Shared named data of an entity. The transform fields read and write the entity's
/// transform; every other key lives in the entity's field table.
#[derive(Clone)]
pub struct FieldsHandle {
    shared: SharedHost,
    entity: Entity,
    writable: bool,
}

impl FieldsHandle {
    fn get(&mut self, key: &str) -> ApiResult<Dynamic> {
        let host = self.shared.borrow();
        let scene = &host.scene;
        let transform = scene.transform(self.entity).ok_or_else(|| ScriptError::UnknownEntity(self.entity).into_rhai())?;
        match key {
            FIELD_TRANSLATION => Ok(vec_to_array(transform.translation).into()),
            FIELD_ROTATION => Ok(Dynamic::from(transform.rotation as FLOAT)),
            FIELD_SCALE => Ok(vec_to_array(transform.scale).into()),
            FIELD_VISIBLE => Ok(Dynamic::from(scene.is_visible(self.entity))),
            FIELD_NAME => Ok(scene.label(self.entity).into()),
            _ => match scene.fields(self.entity).and_then(|fields| fields.0.get(key)) {
                Some(value) => rhai::serde::to_dynamic(value),
                None => Err(ScriptError::UnknownField { entity: scene.label(self.entity), field: key.to_string() }
                    .into_rhai()),
            },
        }
    }

    fn set(&mut self, key: &str, value: Dynamic) -> ApiResult<()> {
        let mut host = self.shared.borrow_mut();
        if !self.writable || key == FIELD_NAME {
            return Err(ScriptError::ReadOnlyField { entity: host.scene.label(self.entity), field: key.to_string() }
                .into_rhai());
        }
        match key {
            FIELD_TRANSLATION | FIELD_ROTATION | FIELD_SCALE => {
                let mut transform = host
                    .scene
                    .transform_mut(self.entity)
                    .ok_or_else(|| ScriptError::UnknownEntity(self.entity).into_rhai())?;
                match key {
                    FIELD_TRANSLATION => transform.translation = pair(&value, key)?,
                    FIELD_ROTATION => transform.rotation = number(&value, key)?,
                    _ => transform.scale = pair(&value, key)?,
                }
            }
            FIELD_VISIBLE => {
                let visible = value.as_bool().map_err(|ty| format!("visible expects a bool, got {ty}"))?;
                if host.scene.set_visible(self.entity, visible).map_err(ScriptError::into_rhai)? {
                    host.events.push(HostEvent::VisibilityChanged { entity: self.entity, visible });
                }
            }
            _ => {
                let json: serde_json::Value = rhai::serde::from_dynamic(&value)?;
                let mut fields = host
                    .scene
                    .fields_mut(self.entity)
                    .ok_or_else(|| ScriptError::UnknownEntity(self.entity).into_rhai())?;
                fields.0.insert(key.to_string(), json);
            }
        }
        Ok(())
    }

    fn has(&mut self, key: &str) -> bool {
        let host = self.shared.borrow();
        (BUILTIN_FIELDS.contains(&key) && host.scene.contains(self.entity))
            || host.scene.fields(self.entity).map(|fields| fields.0.contains_key(key)).unwrap_or(false)
    }

    fn keys(&mut self) -> Array {
        let host = self.shared.borrow();
        let mut keys: Array = BUILTIN_FIELDS.iter().map(|key| Dynamic::from(key.to_string())).collect();
        if let Some(fields) = host.scene.fields(self.entity) {
            keys.extend(fields.0.keys().map(|key| Dynamic::from(key.clone())));
        }
        keys
    }
}

fn state_index_get(state: &mut StateRecord, key: ImmutableString) -> ApiResult<Dynamic> {
    state.get(&key).ok_or_else(|| ScriptError::UnknownStateKey(key.to_string()).into_rhai())
}

fn state_index_set(state: &mut StateRecord, key: ImmutableString, value: Dynamic) {
    state.set(&key, value);
}

pub(crate) fn register_api(engine: &mut Engine) {
    engine.register_type_with_name::<ScriptContext>("Context");
    engine.register_get("transform", ScriptContext::transform);
    engine.register_get("keyboard", ScriptContext::keyboard);
    engine.register_get("mouse", ScriptContext::mouse);
    engine.register_get("render", ScriptContext::render);
    engine.register_get("logger", ScriptContext::logger);
    engine.register_get("entity", ScriptContext::entity);
    engine.register_get("state", ScriptContext::state);
    engine.register_get("scene", ScriptContext::scene);
    engine.register_get("instance_id", ScriptContext::instance_id);
    engine.register_fn("random", ScriptContext::random);
    engine.register_fn("detach", ScriptContext::detach);

    engine.register_type_with_name::<TransformHandle>("Transform");
    engine.register_fn("translate", TransformHandle::translate);
    engine.register_fn("rotate", TransformHandle::rotate);
    engine.register_fn("scale", TransformHandle::scale);
    engine.register_get("x", TransformHandle::x);
    engine.register_get("y", TransformHandle::y);
    engine.register_get("rotation", TransformHandle::rotation);
    engine.register_get("scale_x", TransformHandle::scale_x);
    engine.register_get("scale_y", TransformHandle::scale_y);

    engine.register_type_with_name::<KeyboardHandle>("Keyboard");
    engine.register_fn("getKey", KeyboardHandle::get_key);
    engine.register_fn("isKeyPressed", KeyboardHandle::is_key_pressed);
    engine.register_fn("isDown", KeyboardHandle::is_down);

    engine.register_type_with_name::<MouseHandle>("Mouse");
    engine.register_fn("getX", MouseHandle::get_x);
    engine.register_fn("getY", MouseHandle::get_y);

    engine.register_type_with_name::<RenderHandle>("Render");
    engine.register_fn("setVisible", RenderHandle::set_visible);
    engine.register_fn("isVisible", RenderHandle::is_visible);

    engine.register_type_with_name::<LoggerHandle>("Logger");
    engine.register_fn("out", LoggerHandle::out);

    engine.register_type_with_name::<EntityHandle>("Entity");
    engine.register_fn("tree", EntityHandle::tree);
    engine.register_fn("scripts", EntityHandle::scripts);
    engine.register_fn("fields", EntityHandle::fields);
    engine.register_fn("despawn", EntityHandle::despawn);
    engine.register_get("name", EntityHandle::name);
    engine.register_get("id", EntityHandle::id);
    engine.register_get("alive", EntityHandle::alive);
    engine.register_fn("to_string", EntityHandle::describe);
    engine.register_fn("to_debug", EntityHandle::describe);
    engine.register_fn("tags", EntityHandle::tags);
    engine.register_fn("hasTag", EntityHandle::has_tag);
    engine.register_fn("addTag", EntityHandle::add_tag);
    engine.register_fn("removeTag", EntityHandle::remove_tag);

    engine.register_type_with_name::<SceneHandle>("Scene");
    engine.register_fn("find", SceneHandle::find);
    engine.register_fn("root", SceneHandle::root);
    engine.register_fn("tagged", SceneHandle::tagged);
    engine.register_fn("query", SceneHandle::query);

    engine.register_type_with_name::<TreeHandle>("Tree");
    engine.register_fn("getChild", TreeHandle::get_child);
    engine.register_fn("hasChild", TreeHandle::has_child);
    engine.register_fn("parent", TreeHandle::parent);
    engine.register_fn("children", TreeHandle::children);
    engine.register_fn("find", TreeHandle::find);

    engine.register_type_with_name::<ScriptsHandle>("Scripts");
    engine.register_fn("callFunc", |context: NativeCallContext, scripts: &mut ScriptsHandle, function: &str| {
        scripts.call(&context, function, Vec::new())
    });
    engine.register_fn(
        "callFunc",
        |context: NativeCallContext, scripts: &mut ScriptsHandle, function: &str, a: Dynamic| {
            scripts.call(&context, function, vec![a])
        },
    );
    engine.register_fn(
        "callFunc",
        |context: NativeCallContext, scripts: &mut ScriptsHandle, function: &str, a: Dynamic, b: Dynamic| {
            scripts.call(&context, function, vec![a, b])
        },
    );
    engine.register_fn(
        "callFunc",
        |context: NativeCallContext, scripts: &mut ScriptsHandle, function: &str, a: Dynamic, b: Dynamic, c: Dynamic| {
            scripts.call(&context, function, vec![a, b, c])
        },
    );
    engine.register_fn(
        "callFuncArgs",
        |context: NativeCallContext, scripts: &mut ScriptsHandle, function: &str, args: Array| {
            scripts.call(&context, function, args)
        },
    );
    engine.register_fn("has", ScriptsHandle::has);

    engine.register_type_with_name::<FieldsHandle>("Fields");
    engine.register_fn("get", FieldsHandle::get);
    engine.register_fn("set", FieldsHandle::set);
    engine.register_fn("has", FieldsHandle::has);
    engine.register_fn("keys", FieldsHandle::keys);

    engine.register_type_with_name::<StateRecord>("State");
    engine.register_indexer_get(state_index_get);
    engine.register_indexer_set(state_index_set);
    engine.register_fn("get", |state: &mut StateRecord, key: &str, default: Dynamic| {
        state.get(key).unwrap_or(default)
    });
    engine.register_fn("contains", |state: &mut StateRecord, key: &str| state.contains(key));
    engine.register_fn("remove", |state: &mut StateRecord, key: &str| state.remove(key).unwrap_or(Dynamic::UNIT));
    engine.register_fn("keys", |state: &mut StateRecord| -> Array {
        state.keys().into_iter().map(Dynamic::from).collect()
    });

    engine.register_type_with_name::<ScriptError>("ScriptError");
    engine.register_get("kind", |err: &mut ScriptError| err.kind().to_string());
    engine.register_get("message", |err: &mut ScriptError| err.to_string());
    engine.register_fn("to_string", |err: &mut ScriptError| err.to_string());
}
