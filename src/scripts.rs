mod api;
mod behaviour;
mod instance;

pub use api::{
    EntityHandle, FieldsHandle, KeyboardHandle, LoggerHandle, MouseHandle, RenderHandle, SceneHandle,
    ScriptContext, ScriptsHandle, TransformHandle, TreeHandle,
};
pub use behaviour::{
    BehaviourDefinition, BehaviourRegistry, HookSet, HOOK_EXIT, HOOK_INITIAL_STATE, HOOK_SCENE_LOAD, HOOK_UPDATE,
};
pub use instance::{Lifecycle, ScriptInstance, StateRecord};

use crate::config::{FaultPolicy, HostConfig};
use crate::ecs::{EntityFilter, InstanceId, SceneWorld, Transform};
use crate::error::ScriptError;
use crate::events::{EventBus, HostEvent};
use crate::input::{InputSnapshot, InputState, KeyTable};
use crate::time::FrameClock;
use anyhow::Result;
use bevy_ecs::prelude::Entity;
use glam::Mat4;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rhai::{CallFnOptions, Dynamic, Engine, Map, Scope};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;
use tracing::{debug, info, warn};

pub(crate) type SharedHost = Rc<RefCell<HostState>>;

/// Everything script code can reach through its capability handles. Borrows of this
/// state never span a script call.
pub(crate) struct HostState {
    pub scene: SceneWorld,
    pub instances: BTreeMap<InstanceId, ScriptInstance>,
    pub input: Rc<InputSnapshot>,
    pub events: EventBus,
    pub logs: Vec<ScriptLog>,
    pub commands: Vec<ScriptCommand>,
    pub rng: StdRng,
    pub dispatch_depth: usize,
    pub max_dispatch_depth: usize,
    pub fault_policy: FaultPolicy,
}

/// Structural changes requested by scripts, applied once the requesting hook returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScriptCommand {
    Despawn(Entity),
    Detach(InstanceId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptLog {
    pub entity: String,
    pub instance: InstanceId,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub frame: u64,
    pub scene_loads: usize,
    pub updates: usize,
    pub faults: usize,
}

/// What the external renderer needs per entity.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderItem {
    pub entity: Entity,
    pub name: String,
    pub world: Mat4,
    pub visible: bool,
}

struct DispatchGuard<'a> {
    shared: &'a SharedHost,
}

impl<'a> DispatchGuard<'a> {
    fn enter(shared: &'a SharedHost, function: &str) -> Result<Self, ScriptError> {
        let mut host = shared.borrow_mut();
        if host.dispatch_depth >= host.max_dispatch_depth {
            return Err(ScriptError::DispatchCycle { function: function.to_string(), limit: host.max_dispatch_depth });
        }
        host.dispatch_depth += 1;
        Ok(Self { shared })
    }
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        let mut host = self.shared.borrow_mut();
        host.dispatch_depth = host.dispatch_depth.saturating_sub(1);
    }
}

fn call_options() -> CallFnOptions<'static> {
    CallFnOptions::new().eval_ast(false).rewind_scope(true)
}

fn call_script(
    engine: &Engine,
    definition: &BehaviourDefinition,
    ctx: ScriptContext,
    function: &str,
    args: Vec<Dynamic>,
) -> Result<Dynamic, ScriptError> {
    let mut call_args = Vec::with_capacity(args.len() + 1);
    call_args.push(Dynamic::from(ctx));
    call_args.extend(args);
    engine
        .call_fn_with_options::<Dynamic>(call_options(), &mut Scope::new(), definition.ast(), function, call_args)
        .map_err(|err| ScriptError::from_eval(function, &err))
}

fn exited(instance: InstanceId) -> ScriptError {
    ScriptError::InstanceExited { target: instance.to_string() }
}

/// Calls `function` on a live instance with a fresh context.
fn invoke(
    engine: &Engine,
    shared: &SharedHost,
    instance: InstanceId,
    function: &str,
    args: Vec<Dynamic>,
) -> Result<Dynamic, ScriptError> {
    let (definition, ctx) = {
        let host = shared.borrow();
        let record = host.instances.get(&instance).filter(|record| record.is_live()).ok_or_else(|| exited(instance))?;
        let ctx = ScriptContext::new(
            Rc::clone(shared),
            record.entity,
            instance,
            record.state.clone(),
            Rc::clone(&host.input),
        );
        (Rc::clone(&record.definition), ctx)
    };
    call_script(engine, &definition, ctx, function, args)
}

/// Picks the first instance on `target`, in attachment order, that exports `function`.
fn resolve_export(host: &HostState, target: Entity, function: &str, given: usize) -> Result<InstanceId, ScriptError> {
    if !host.scene.contains(target) {
        return Err(ScriptError::InstanceExited { target: format!("entity {target:?}") });
    }
    let mut exited_match = None;
    let mut expected = None;
    for id in host.scene.scripts(target) {
        let Some(record) = host.instances.get(id) else { continue };
        let Some(arities) = record.definition.export_arities(function) else { continue };
        if !record.is_live() {
            exited_match.get_or_insert(*id);
            continue;
        }
        if arities.contains(&given) {
            return Ok(*id);
        }
        if expected.is_none() {
            expected = arities.iter().next().copied();
        }
    }
    if let Some(expected) = expected {
        return Err(ScriptError::ArgumentCount { function: function.to_string(), expected, given });
    }
    if let Some(id) = exited_match {
        return Err(exited(id));
    }
    Err(ScriptError::NoSuchFunction { entity: host.scene.label(target), function: function.to_string() })
}

/// Cross-script call on `target`. Shared by the host API and by `callFunc` inside scripts,
/// so nested calls count against the same depth limit.
pub(crate) fn dispatch(
    engine: &Engine,
    shared: &SharedHost,
    target: Entity,
    function: &str,
    args: Vec<Dynamic>,
) -> Result<Dynamic, ScriptError> {
    let _guard = DispatchGuard::enter(shared, function)?;
    let resolved = {
        let host = shared.borrow();
        resolve_export(&host, target, function, args.len())
    };
    invoke(engine, shared, resolved?, function, args)
}

/// Owns the scripting engine, the compiled behaviours and the scene their instances act on.
pub struct ScriptHost {
    engine: Engine,
    registry: BehaviourRegistry,
    shared: SharedHost,
    keys: KeyTable,
    next_instance: u64,
    frame: u64,
    last_error: Option<ScriptError>,
}

impl ScriptHost {
    pub fn new() -> Self {
        Self::with_config(HostConfig::default())
    }

    pub fn with_config(config: HostConfig) -> Self {
        let mut engine = Engine::new();
        engine.set_fast_operators(true);
        engine.set_max_operations(config.max_operations);
        engine.on_print(|text| info!(target: "script", "{text}"));
        engine.on_debug(|text, source, pos| debug!(target: "script", source = ?source, position = %pos, "{text}"));
        api::register_api(&mut engine);

        let keys = match &config.key_bindings {
            Some(path) => KeyTable::load_or_default(path),
            None => KeyTable::default(),
        };
        let rng = match config.deterministic_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let input = Rc::new(InputState::with_keys(keys.clone()).snapshot());
        let state = HostState {
            scene: SceneWorld::new(),
            instances: BTreeMap::new(),
            input,
            events: EventBus::default(),
            logs: Vec::new(),
            commands: Vec::new(),
            rng,
            dispatch_depth: 0,
            max_dispatch_depth: config.max_dispatch_depth,
            fault_policy: config.fault_policy,
        };
        Self {
            engine,
            registry: BehaviourRegistry::new(),
            shared: Rc::new(RefCell::new(state)),
            keys,
            next_instance: 1,
            frame: 0,
            last_error: None,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn last_error(&self) -> Option<&ScriptError> {
        self.last_error.as_ref()
    }

    /// Input collector bound to this host's key table.
    pub fn input_state(&self) -> InputState {
        InputState::with_keys(self.keys.clone())
    }

    pub fn register_behaviour(&mut self, id: &str, source: &str) -> Result<Rc<BehaviourDefinition>, ScriptError> {
        self.registry.register_source(&self.engine, id, source)
    }

    pub fn register_behaviour_file(&mut self, id: &str, path: impl AsRef<Path>) -> Result<Rc<BehaviourDefinition>> {
        self.registry.register_file(&self.engine, id, path)
    }

    pub fn behaviours(&self) -> &BehaviourRegistry {
        &self.registry
    }

    // ---------- Scene structure ----------

    pub fn spawn_root(&mut self, name: impl Into<String>, transform: Transform) -> Entity {
        self.shared.borrow_mut().scene.spawn_root(name, transform)
    }

    pub fn spawn_child(
        &mut self,
        parent: Entity,
        name: impl Into<String>,
        transform: Transform,
    ) -> Result<Entity, ScriptError> {
        self.shared.borrow_mut().scene.spawn_child(parent, name, transform)
    }

    pub fn reparent(&mut self, child: Entity, parent: Option<Entity>) -> Result<(), ScriptError> {
        self.shared.borrow_mut().scene.reparent(child, parent)
    }

    pub fn set_visible(&mut self, entity: Entity, visible: bool) -> Result<(), ScriptError> {
        let mut host = self.shared.borrow_mut();
        if host.scene.set_visible(entity, visible)? {
            host.events.push(HostEvent::VisibilityChanged { entity, visible });
        }
        Ok(())
    }

    pub fn set_transform(&mut self, entity: Entity, transform: Transform) -> Result<(), ScriptError> {
        let mut host = self.shared.borrow_mut();
        let mut current = host.scene.transform_mut(entity).ok_or(ScriptError::UnknownEntity(entity))?;
        *current = transform;
        Ok(())
    }

    pub fn set_field(&mut self, entity: Entity, key: &str, value: serde_json::Value) -> Result<(), ScriptError> {
        let mut host = self.shared.borrow_mut();
        let mut fields = host.scene.fields_mut(entity).ok_or(ScriptError::UnknownEntity(entity))?;
        fields.0.insert(key.to_string(), value);
        Ok(())
    }

    /// Read-only access to the scene. Structural changes go through the host so that
    /// script instances are torn down with their entities.
    pub fn with_scene<R>(&self, read: impl FnOnce(&SceneWorld) -> R) -> R {
        read(&self.shared.borrow().scene)
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.shared.borrow().scene.contains(entity)
    }

    pub fn find_child(&self, entity: Entity, name: &str) -> Result<Entity, ScriptError> {
        self.shared.borrow().scene.find_descendant(entity, name)
    }

    /// Dotted path from a root, e.g. `player.camera`.
    pub fn find_path(&self, path: &str) -> Result<Entity, ScriptError> {
        self.shared.borrow().scene.find_path(path)
    }

    pub fn entities_matching(&self, filter: &EntityFilter) -> Vec<Entity> {
        self.shared.borrow().scene.entities_matching(filter)
    }

    pub fn add_tag(&mut self, entity: Entity, tag: &str) -> Result<bool, ScriptError> {
        self.shared.borrow_mut().scene.add_tag(entity, tag)
    }

    pub fn remove_tag(&mut self, entity: Entity, tag: &str) -> Result<bool, ScriptError> {
        self.shared.borrow_mut().scene.remove_tag(entity, tag)
    }

    pub fn transform(&self, entity: Entity) -> Option<Transform> {
        self.shared.borrow().scene.transform(entity)
    }

    pub fn is_visible(&self, entity: Entity) -> bool {
        self.shared.borrow().scene.is_visible(entity)
    }

    pub fn field(&self, entity: Entity, key: &str) -> Option<serde_json::Value> {
        self.shared.borrow().scene.fields(entity).and_then(|fields| fields.0.get(key).cloned())
    }

    // ---------- Instances ----------

    /// Binds a new instance of `behaviour` to `entity` with a fresh state record. The
    /// instance receives its scene-load hook on the next `load_scene` or `frame`.
    pub fn attach(&mut self, entity: Entity, behaviour: &str) -> Result<InstanceId, ScriptError> {
        let definition = self.registry.get(behaviour)?;
        if !self.shared.borrow().scene.contains(entity) {
            return Err(ScriptError::UnknownEntity(entity));
        }
        let state = self.initial_state(&definition)?;
        let id = InstanceId(self.next_instance);
        self.next_instance += 1;

        let mut host = self.shared.borrow_mut();
        host.instances.insert(id, ScriptInstance::new(id, entity, Rc::clone(&definition), state));
        if let Some(mut slots) = host.scene.scripts_mut(entity) {
            slots.0.push(id);
        }
        host.events.push(HostEvent::InstanceAttached { entity, instance: id, behaviour: behaviour.to_string() });
        debug!(entity = %host.scene.label(entity), instance = %id, behaviour, "script_attached");
        Ok(id)
    }

    fn initial_state(&self, definition: &BehaviourDefinition) -> Result<StateRecord, ScriptError> {
        if !definition.hooks().initial_state {
            return Ok(StateRecord::default());
        }
        let value = self
            .engine
            .call_fn_with_options::<Dynamic>(call_options(), &mut Scope::new(), definition.ast(), HOOK_INITIAL_STATE, ())
            .map_err(|err| ScriptError::from_eval(HOOK_INITIAL_STATE, &err))?;
        let map = value.try_cast::<Map>().ok_or_else(|| ScriptError::Runtime {
            hook: HOOK_INITIAL_STATE.to_string(),
            message: format!("behaviour '{}' must return an object map", definition.id()),
        })?;
        Ok(StateRecord::new(map))
    }

    /// Ends the instance: it stops receiving calls, runs its exit hook if it ever loaded,
    /// and is unbound from its entity.
    pub fn detach(&mut self, instance: InstanceId) -> Result<(), ScriptError> {
        self.retire(instance)?;
        self.apply_commands();
        Ok(())
    }

    /// Runs exit hooks for the whole subtree (deepest first) while it is still intact,
    /// then removes it from the scene.
    pub fn despawn(&mut self, entity: Entity) -> Result<(), ScriptError> {
        self.despawn_now(entity)?;
        self.apply_commands();
        Ok(())
    }

    /// Tears the whole scene down: every root is despawned in traversal order, so each
    /// subtree delivers its exit hooks deepest-first before the next root goes. Returns
    /// the number of entities removed.
    pub fn unload_scene(&mut self) -> usize {
        let roots = self.shared.borrow().scene.roots().to_vec();
        let before = self.shared.borrow().scene.len();
        for root in roots {
            // Roots despawned by an earlier exit hook are already gone.
            if let Err(err) = self.despawn(root) {
                debug!(error = %err, "scene_unload_skipped_root");
            }
        }
        let after = self.shared.borrow().scene.len();
        info!(removed = before.saturating_sub(after), remaining = after, "scene_unloaded");
        before.saturating_sub(after)
    }

    pub fn instances_on(&self, entity: Entity) -> Vec<InstanceId> {
        self.shared.borrow().scene.scripts(entity).to_vec()
    }

    /// Instance ids are never reused, so an id this host issued that is no longer
    /// tracked belongs to an instance that exited.
    pub fn lifecycle(&self, instance: InstanceId) -> Option<Lifecycle> {
        match self.shared.borrow().instances.get(&instance) {
            Some(record) => Some(record.lifecycle()),
            None if instance.0 > 0 && instance.0 < self.next_instance => Some(Lifecycle::Exited),
            None => None,
        }
    }

    pub fn state(&self, instance: InstanceId) -> Option<Map> {
        self.shared.borrow().instances.get(&instance).map(|record| record.state.snapshot())
    }

    pub fn update_count(&self, instance: InstanceId) -> Option<u64> {
        self.shared.borrow().instances.get(&instance).map(ScriptInstance::updates)
    }

    pub fn is_faulted(&self, instance: InstanceId) -> bool {
        self.shared.borrow().instances.get(&instance).map(ScriptInstance::is_faulted).unwrap_or(false)
    }

    pub fn behaviour_of(&self, instance: InstanceId) -> Option<String> {
        self.shared.borrow().instances.get(&instance).map(|record| record.definition.id().to_string())
    }

    // ---------- Lifecycle delivery ----------

    /// Delivers the scene-load hook to every instance that has not loaded yet, parents
    /// before children.
    pub fn load_scene(&mut self) -> FrameReport {
        let mut report = FrameReport { frame: self.frame, ..FrameReport::default() };
        let order = self.shared.borrow().scene.traversal_order();
        for entity in order {
            for instance in self.live_slots(entity) {
                let pending = self
                    .shared
                    .borrow()
                    .instances
                    .get(&instance)
                    .map(|record| record.lifecycle() == Lifecycle::Uninitialized)
                    .unwrap_or(false);
                if pending {
                    self.scene_load_instance(instance, &mut report);
                }
            }
        }
        report
    }

    /// Runs one frame: publishes `input`, then calls `update(ctx, elapsed_ms)` on every
    /// live instance, parents before children. Instances attached since the last frame
    /// receive their scene-load hook first. Entities and instances removed during the
    /// frame are skipped from the moment of removal.
    pub fn frame(&mut self, elapsed_ms: f64, input: InputSnapshot) -> FrameReport {
        self.frame += 1;
        let mut report = FrameReport { frame: self.frame, ..FrameReport::default() };
        let order = {
            let mut host = self.shared.borrow_mut();
            host.input = Rc::new(input);
            host.scene.traversal_order()
        };
        for entity in order {
            for instance in self.live_slots(entity) {
                self.update_instance(instance, elapsed_ms, &mut report);
            }
        }
        report
    }

    pub fn frame_with_clock(&mut self, clock: &mut FrameClock, input: &InputState) -> FrameReport {
        let elapsed = clock.tick();
        self.frame(elapsed, input.snapshot())
    }

    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    fn live_slots(&self, entity: Entity) -> Vec<InstanceId> {
        let host = self.shared.borrow();
        if !host.scene.contains(entity) {
            return Vec::new();
        }
        host.scene.scripts(entity).to_vec()
    }

    /// `None` when the instance should not run this frame; otherwise whether it still
    /// needs its scene-load hook.
    fn pending_update(&self, instance: InstanceId) -> Option<bool> {
        let host = self.shared.borrow();
        let record = host.instances.get(&instance)?;
        if !record.is_live() || !host.scene.contains(record.entity) {
            return None;
        }
        if record.is_faulted() && host.fault_policy == FaultPolicy::Suspend {
            return None;
        }
        Some(record.lifecycle() == Lifecycle::Uninitialized)
    }

    fn update_instance(&mut self, instance: InstanceId, elapsed_ms: f64, report: &mut FrameReport) {
        let Some(needs_load) = self.pending_update(instance) else { return };
        if needs_load {
            self.scene_load_instance(instance, report);
            if self.pending_update(instance).is_none() {
                return;
            }
        }
        let has_update = {
            let mut host = self.shared.borrow_mut();
            let Some(record) = host.instances.get_mut(&instance) else { return };
            if !record.begin_update() {
                return;
            }
            record.definition.hooks().update
        };
        if has_update {
            report.updates += 1;
            if !self.run_hook(instance, HOOK_UPDATE, vec![Dynamic::from(elapsed_ms)]) {
                report.faults += 1;
            }
        }
    }

    fn scene_load_instance(&mut self, instance: InstanceId, report: &mut FrameReport) {
        let has_hook = {
            let mut host = self.shared.borrow_mut();
            let Some(record) = host.instances.get_mut(&instance) else { return };
            if !record.mark_loaded() {
                return;
            }
            record.definition.hooks().scene_load
        };
        if has_hook {
            report.scene_loads += 1;
            if !self.run_hook(instance, HOOK_SCENE_LOAD, Vec::new()) {
                report.faults += 1;
            }
        }
    }

    /// Returns false if the hook failed. Queued structural changes are applied either way.
    fn run_hook(&mut self, instance: InstanceId, hook: &str, args: Vec<Dynamic>) -> bool {
        let result = invoke(&self.engine, &self.shared, instance, hook, args);
        let entity = self.shared.borrow().instances.get(&instance).map(|record| record.entity);
        let ok = match (result, entity) {
            (Ok(_), _) => true,
            (Err(err), Some(entity)) => {
                self.record_fault(entity, instance, hook, err);
                false
            }
            (Err(err), None) => {
                warn!(instance = %instance, hook, error = %err, "script_hook_failed");
                self.last_error = Some(err);
                false
            }
        };
        self.apply_commands();
        ok
    }

    fn record_fault(&mut self, entity: Entity, instance: InstanceId, hook: &str, err: ScriptError) {
        let mut host = self.shared.borrow_mut();
        let label = host.scene.label(entity);
        warn!(entity = %label, instance = %instance, hook, kind = err.kind(), error = %err, "script_hook_failed");
        if let Some(record) = host.instances.get_mut(&instance) {
            record.set_faulted();
        }
        host.events.push(HostEvent::ScriptFault { entity, instance, hook: hook.to_string(), error: err.clone() });
        self.last_error = Some(err);
    }

    fn retire(&mut self, instance: InstanceId) -> Result<(), ScriptError> {
        let (entity, previous, definition, state, input) = {
            let mut host = self.shared.borrow_mut();
            let input = Rc::clone(&host.input);
            let record =
                host.instances.get_mut(&instance).filter(|record| record.is_live()).ok_or_else(|| exited(instance))?;
            let previous = record.mark_exited();
            (record.entity, previous, Rc::clone(&record.definition), record.state.clone(), input)
        };
        if previous != Lifecycle::Uninitialized && definition.hooks().exit {
            let ctx = ScriptContext::new(Rc::clone(&self.shared), entity, instance, state, input);
            if let Err(err) = call_script(&self.engine, &definition, ctx, HOOK_EXIT, Vec::new()) {
                self.record_fault(entity, instance, HOOK_EXIT, err);
            }
        }
        let mut host = self.shared.borrow_mut();
        if let Some(mut slots) = host.scene.scripts_mut(entity) {
            slots.0.retain(|id| *id != instance);
        }
        host.instances.remove(&instance);
        host.events.push(HostEvent::InstanceExited { entity, instance });
        debug!(entity = %host.scene.label(entity), instance = %instance, "script_exited");
        Ok(())
    }

    fn despawn_now(&mut self, entity: Entity) -> Result<(), ScriptError> {
        let order = {
            let host = self.shared.borrow();
            if !host.scene.contains(entity) {
                return Err(ScriptError::UnknownEntity(entity));
            }
            host.scene.destruction_order(entity)
        };
        for node in &order {
            for instance in self.instances_on(*node) {
                // Already-exited instances are skipped.
                let _ = self.retire(instance);
            }
        }
        let mut host = self.shared.borrow_mut();
        let removed = host.scene.despawn_subtree(entity)?;
        for node in removed {
            host.events.push(HostEvent::EntityDespawned { entity: node });
        }
        Ok(())
    }

    fn apply_commands(&mut self) {
        loop {
            let pending = std::mem::take(&mut self.shared.borrow_mut().commands);
            if pending.is_empty() {
                break;
            }
            for command in pending {
                let result = match command {
                    ScriptCommand::Despawn(entity) => self.despawn_now(entity),
                    ScriptCommand::Detach(instance) => self.retire(instance),
                };
                if let Err(err) = result {
                    debug!(command = ?command, error = %err, "script_command_skipped");
                }
            }
        }
    }

    // ---------- Dispatch ----------

    /// Calls an exported function on the first instance of `entity` that exports it.
    pub fn call_func(&mut self, entity: Entity, function: &str, args: Vec<Dynamic>) -> Result<Dynamic, ScriptError> {
        let result = dispatch(&self.engine, &self.shared, entity, function, args);
        self.apply_commands();
        result
    }

    /// Calls an exported function on one specific instance.
    pub fn call_instance(
        &mut self,
        instance: InstanceId,
        function: &str,
        args: Vec<Dynamic>,
    ) -> Result<Dynamic, ScriptError> {
        let result = {
            let guard = DispatchGuard::enter(&self.shared, function)?;
            let checked = {
                let host = self.shared.borrow();
                match host.instances.get(&instance).filter(|record| record.is_live()) {
                    None => Err(exited(instance)),
                    Some(record) => match record.definition.export_arities(function) {
                        None => Err(ScriptError::NoSuchFunction {
                            entity: host.scene.label(record.entity),
                            function: function.to_string(),
                        }),
                        Some(arities) if !arities.contains(&args.len()) => Err(ScriptError::ArgumentCount {
                            function: function.to_string(),
                            expected: arities.iter().next().copied().unwrap_or_default(),
                            given: args.len(),
                        }),
                        Some(_) => Ok(()),
                    },
                }
            };
            let result = checked.and_then(|()| invoke(&self.engine, &self.shared, instance, function, args));
            drop(guard);
            result
        };
        self.apply_commands();
        result
    }

    // ---------- Outputs ----------

    pub fn take_logs(&mut self) -> Vec<ScriptLog> {
        std::mem::take(&mut self.shared.borrow_mut().logs)
    }

    pub fn drain_events(&mut self) -> Vec<HostEvent> {
        self.shared.borrow_mut().events.drain()
    }

    /// World matrices and visibility for every live entity, in traversal order.
    pub fn render_view(&self) -> Vec<RenderItem> {
        let host = self.shared.borrow();
        host.scene
            .traversal_order()
            .into_iter()
            .filter_map(|entity| {
                Some(RenderItem {
                    entity,
                    name: host.scene.label(entity),
                    world: host.scene.world_matrix(entity)?,
                    visible: host.scene.is_visible(entity),
                })
            })
            .collect()
    }
}

impl Default for ScriptHost {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> ScriptHost {
        ScriptHost::with_config(HostConfig { deterministic_seed: Some(3), ..HostConfig::default() })
    }

    #[test]
    fn dispatch_depth_returns_to_zero_after_errors() {
        let mut host = host();
        host.register_behaviour("pinger", "fn ping(ctx) { 1 }").unwrap();
        let entity = host.spawn_root("pinger", Transform::default());
        host.attach(entity, "pinger").unwrap();
        assert_eq!(host.call_func(entity, "pong", Vec::new()).unwrap_err().kind(), "NoSuchFunction");
        assert_eq!(host.call_func(entity, "ping", vec![Dynamic::from(1_i64)]).unwrap_err().kind(), "ArgumentCount");
        assert_eq!(host.shared.borrow().dispatch_depth, 0);
        assert_eq!(host.call_func(entity, "ping", Vec::new()).unwrap().as_int().unwrap(), 1);
    }

    #[test]
    fn initial_state_must_be_a_map() {
        let mut host = host();
        host.register_behaviour("bad", "fn initial_state() { 42 }").unwrap();
        let entity = host.spawn_root("e", Transform::default());
        let err = host.attach(entity, "bad").unwrap_err();
        assert_eq!(err.kind(), "Runtime");
        assert!(host.instances_on(entity).is_empty());
    }

    #[test]
    fn lifecycle_reports_exited_for_retired_ids() {
        let mut host = host();
        host.register_behaviour("noop", "fn update(ctx, elapsed) { }").unwrap();
        let entity = host.spawn_root("e", Transform::default());
        let id = host.attach(entity, "noop").unwrap();
        assert_eq!(host.lifecycle(id), Some(Lifecycle::Uninitialized));
        host.detach(id).unwrap();
        assert_eq!(host.lifecycle(id), Some(Lifecycle::Exited));
        assert_eq!(host.lifecycle(InstanceId(99)), None);
        assert_eq!(host.detach(id).unwrap_err().kind(), "InstanceExited");
    }
}
