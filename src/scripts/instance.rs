use super::behaviour::BehaviourDefinition;
use crate::ecs::InstanceId;
use bevy_ecs::prelude::Entity;
use rhai::{Dynamic, Map};
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Lifecycle {
    Uninitialized,
    Loaded,
    Active,
    Exited,
}

/// Private persistent variables of one script instance.
///
/// Each instance gets its own record when it is attached; records are never cloned
/// between instances. Borrows last for a single field access, so a behaviour that is
/// re-entered through dispatch still sees and updates the same record.
#[derive(Clone, Default)]
pub struct StateRecord(Rc<RefCell<Map>>);

impl StateRecord {
    pub fn new(initial: Map) -> Self {
        Self(Rc::new(RefCell::new(initial)))
    }

    pub fn get(&self, key: &str) -> Option<Dynamic> {
        self.0.borrow().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: Dynamic) {
        self.0.borrow_mut().insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Dynamic> {
        self.0.borrow_mut().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.borrow().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.borrow().keys().map(|key| key.to_string()).collect()
    }

    pub fn snapshot(&self) -> Map {
        self.0.borrow().clone()
    }

    pub fn ptr_eq(&self, other: &StateRecord) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

pub struct ScriptInstance {
    pub id: InstanceId,
    pub entity: Entity,
    pub definition: Rc<BehaviourDefinition>,
    pub state: StateRecord,
    lifecycle: Lifecycle,
    faulted: bool,
    updates: u64,
}

impl ScriptInstance {
    pub fn new(id: InstanceId, entity: Entity, definition: Rc<BehaviourDefinition>, state: StateRecord) -> Self {
        Self { id, entity, definition, state, lifecycle: Lifecycle::Uninitialized, faulted: false, updates: 0 }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_live(&self) -> bool {
        self.lifecycle != Lifecycle::Exited
    }

    /// `Uninitialized -> Loaded`. Returns false if the scene-load step already happened.
    pub fn mark_loaded(&mut self) -> bool {
        if self.lifecycle != Lifecycle::Uninitialized {
            return false;
        }
        self.lifecycle = Lifecycle::Loaded;
        true
    }

    /// `Loaded | Active -> Active`, counting the update. Refused before scene load and after exit.
    pub fn begin_update(&mut self) -> bool {
        match self.lifecycle {
            Lifecycle::Loaded | Lifecycle::Active => {
                self.lifecycle = Lifecycle::Active;
                self.updates += 1;
                true
            }
            Lifecycle::Uninitialized | Lifecycle::Exited => false,
        }
    }

    /// Moves to `Exited` and returns the state it left.
    pub fn mark_exited(&mut self) -> Lifecycle {
        std::mem::replace(&mut self.lifecycle, Lifecycle::Exited)
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    pub fn set_faulted(&mut self) {
        self.faulted = true;
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }
}
