use crate::ecs::InstanceId;
use crate::error::ScriptError;
use bevy_ecs::prelude::Entity;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    InstanceAttached { entity: Entity, instance: InstanceId, behaviour: String },
    InstanceExited { entity: Entity, instance: InstanceId },
    EntityDespawned { entity: Entity },
    VisibilityChanged { entity: Entity, visible: bool },
    ScriptFault { entity: Entity, instance: InstanceId, hook: String, error: ScriptError },
}

impl fmt::Display for HostEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostEvent::InstanceAttached { entity, instance, behaviour } => {
                write!(f, "InstanceAttached entity={} {instance} behaviour={behaviour}", entity.index())
            }
            HostEvent::InstanceExited { entity, instance } => {
                write!(f, "InstanceExited entity={} {instance}", entity.index())
            }
            HostEvent::EntityDespawned { entity } => write!(f, "EntityDespawned entity={}", entity.index()),
            HostEvent::VisibilityChanged { entity, visible } => {
                write!(f, "VisibilityChanged entity={} visible={visible}", entity.index())
            }
            HostEvent::ScriptFault { entity, instance, hook, error } => {
                write!(f, "ScriptFault entity={} {instance} hook={hook} error={error}", entity.index())
            }
        }
    }
}

#[derive(Default)]
pub struct EventBus {
    events: Vec<HostEvent>,
}

impl EventBus {
    pub fn push(&mut self, event: HostEvent) {
        self.events.push(event);
    }

    pub fn drain(&mut self) -> Vec<HostEvent> {
        self.events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
