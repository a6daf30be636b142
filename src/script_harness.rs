use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use bevy_ecs::prelude::Entity;
use serde::{Deserialize, Serialize};

use crate::config::{FaultPolicy, HostConfig};
use crate::events::HostEvent;
use crate::input::InputEvent;
use crate::scene::SceneDocument;
use crate::scripts::{ScriptHost, ScriptLog};

/// A headless run: behaviours to compile, a scene to instantiate and the input to feed
/// on each step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessFixture {
    /// Behaviour id to script path.
    pub behaviours: BTreeMap<String, String>,
    #[serde(default)]
    pub scene: SceneDocument,
    #[serde(default = "default_steps")]
    pub steps: usize,
    /// Frame delta in milliseconds.
    #[serde(default = "default_dt")]
    pub dt: f64,
    #[serde(default = "default_seed")]
    pub deterministic_seed: Option<u64>,
    #[serde(default)]
    pub input: Vec<StepInput>,
    #[serde(default)]
    pub max_dispatch_depth: Option<usize>,
    #[serde(default)]
    pub fault_policy: FaultPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepInput {
    pub step: usize,
    /// Key names held down during this step only.
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mouse: Option<[f32; 2]>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessOutput {
    pub steps: usize,
    pub dt: f64,
    pub behaviours: Vec<String>,
    #[serde(default)]
    pub scene_load: Vec<String>,
    pub results: Vec<StepResult>,
    pub final_entities: Vec<EntitySummary>,
    /// Logs written by exit hooks while the scene is unloaded after the last step.
    #[serde(default)]
    pub teardown: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    pub step: usize,
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub faults: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntitySummary {
    /// Slash-separated names from the root, e.g. `parent/child`.
    pub path: String,
    pub translation: [f32; 2],
    pub rotation: f32,
    pub scale: [f32; 2],
    pub visible: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub behaviours: Vec<String>,
}

fn default_steps() -> usize {
    1
}

fn default_dt() -> f64 {
    16.0
}

fn default_seed() -> Option<u64> {
    Some(0)
}

pub fn run_fixture(fixture: &HarnessFixture) -> Result<HarnessOutput> {
    let mut config = HostConfig {
        deterministic_seed: fixture.deterministic_seed,
        fault_policy: fixture.fault_policy,
        ..HostConfig::default()
    };
    if let Some(depth) = fixture.max_dispatch_depth {
        config.max_dispatch_depth = depth;
    }
    let mut host = ScriptHost::with_config(config);
    for (id, path) in &fixture.behaviours {
        host.register_behaviour_file(id, path).with_context(|| format!("registering behaviour '{id}'"))?;
    }
    host.instantiate_scene(&fixture.scene).with_context(|| "instantiating fixture scene")?;
    host.load_scene();
    let scene_load = format_logs(host.take_logs());
    host.drain_events();

    let mut input = host.input_state();
    let mut results = Vec::with_capacity(fixture.steps);
    for step in 0..fixture.steps {
        input.release_all();
        for entry in fixture.input.iter().filter(|entry| entry.step == step) {
            for key in &entry.keys {
                input.set_key(key, true).with_context(|| format!("step {step} input"))?;
            }
            if let Some([x, y]) = entry.mouse {
                input.push(InputEvent::CursorPos { x, y });
            }
        }
        host.frame(fixture.dt, input.snapshot());
        let logs = format_logs(host.take_logs());
        let mut events = Vec::new();
        let mut faults = Vec::new();
        for event in host.drain_events() {
            match event {
                HostEvent::ScriptFault { entity, hook, error, .. } => {
                    let name = host.with_scene(|scene| scene.label(entity));
                    faults.push(format!("{name} {hook} {}", error.kind()));
                }
                other => events.push(other.to_string()),
            }
        }
        results.push(StepResult { step, logs, events, faults });
    }

    let final_entities = collect_entities(&host);
    host.unload_scene();
    let teardown = format_logs(host.take_logs());
    let behaviours = fixture.behaviours.keys().cloned().collect();
    Ok(HarnessOutput { steps: fixture.steps, dt: fixture.dt, behaviours, scene_load, results, final_entities, teardown })
}

pub fn load_fixture<P: AsRef<Path>>(path: P) -> Result<HarnessFixture> {
    let file = File::open(path.as_ref()).with_context(|| format!("opening fixture '{}'", path.as_ref().display()))?;
    serde_json::from_reader(file).with_context(|| "parsing fixture JSON")
}

/// Describes the first place `actual` departs from `expected`, or `None` when they match.
pub fn first_divergence(expected: &HarnessOutput, actual: &HarnessOutput) -> Option<String> {
    if expected.steps != actual.steps || expected.dt != actual.dt {
        return Some(format!(
            "run shape differs: expected {} steps of {} ms, got {} steps of {} ms",
            expected.steps, expected.dt, actual.steps, actual.dt
        ));
    }
    if expected.behaviours != actual.behaviours {
        return Some(format!("behaviours differ: expected {:?}, got {:?}", expected.behaviours, actual.behaviours));
    }
    if expected.scene_load != actual.scene_load {
        return Some(format!("scene load logs differ: expected {:?}, got {:?}", expected.scene_load, actual.scene_load));
    }
    for (want, got) in expected.results.iter().zip(&actual.results) {
        if want != got {
            return Some(format!("step {} differs:\n  expected: {want:?}\n  actual:   {got:?}", want.step));
        }
    }
    if expected.results.len() != actual.results.len() {
        return Some(format!("expected {} step results, got {}", expected.results.len(), actual.results.len()));
    }
    let expected_paths: Vec<_> = expected.final_entities.iter().map(|entity| entity.path.as_str()).collect();
    let actual_paths: Vec<_> = actual.final_entities.iter().map(|entity| entity.path.as_str()).collect();
    if expected_paths != actual_paths {
        return Some(format!("final entities differ: expected {expected_paths:?}, got {actual_paths:?}"));
    }
    if let Some((want, got)) = expected.final_entities.iter().zip(&actual.final_entities).find(|(want, got)| want != got) {
        return Some(format!("final state of '{}' differs:\n  expected: {want:?}\n  actual:   {got:?}", want.path));
    }
    if expected.teardown != actual.teardown {
        return Some(format!("teardown logs differ: expected {:?}, got {:?}", expected.teardown, actual.teardown));
    }
    None
}

fn format_logs(logs: Vec<ScriptLog>) -> Vec<String> {
    logs.into_iter().map(|log| format!("{}: {}", log.entity, log.message)).collect()
}

fn collect_entities(host: &ScriptHost) -> Vec<EntitySummary> {
    let order: Vec<(Entity, String)> = host.with_scene(|scene| {
        scene
            .traversal_order()
            .into_iter()
            .map(|entity| {
                let mut names = vec![scene.label(entity)];
                let mut current = scene.parent(entity);
                while let Some(parent) = current {
                    names.push(scene.label(parent));
                    current = scene.parent(parent);
                }
                names.reverse();
                (entity, names.join("/"))
            })
            .collect()
    });
    order
        .into_iter()
        .filter_map(|(entity, path)| {
            let transform = host.transform(entity)?;
            let behaviours =
                host.instances_on(entity).into_iter().filter_map(|instance| host.behaviour_of(instance)).collect();
            Some(EntitySummary {
                path,
                translation: transform.translation.to_array(),
                rotation: transform.rotation,
                scale: transform.scale.to_array(),
                visible: host.is_visible(entity),
                behaviours,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output() -> HarnessOutput {
        HarnessOutput {
            steps: 2,
            dt: 16.0,
            behaviours: vec!["stepper".to_string()],
            scene_load: vec!["a: hello".to_string()],
            results: vec![
                StepResult { step: 0, logs: vec!["a: 1".to_string()], events: Vec::new(), faults: Vec::new() },
                StepResult { step: 1, logs: vec!["a: 2".to_string()], events: Vec::new(), faults: Vec::new() },
            ],
            final_entities: vec![EntitySummary {
                path: "a".to_string(),
                translation: [1.0, 0.0],
                rotation: 0.0,
                scale: [1.0, 1.0],
                visible: true,
                behaviours: vec!["stepper".to_string()],
            }],
            teardown: vec!["a: bye".to_string()],
        }
    }

    #[test]
    fn identical_outputs_do_not_diverge() {
        assert_eq!(first_divergence(&output(), &output()), None);
    }

    #[test]
    fn divergence_names_the_first_differing_step() {
        let expected = output();
        let mut actual = output();
        actual.results[1].logs[0] = "a: 3".to_string();
        actual.final_entities[0].translation = [2.0, 0.0];
        let message = first_divergence(&expected, &actual).expect("outputs differ");
        assert!(message.starts_with("step 1 differs"), "{message}");
    }

    #[test]
    fn divergence_reports_final_entity_state() {
        let expected = output();
        let mut actual = output();
        actual.final_entities[0].visible = false;
        let message = first_divergence(&expected, &actual).expect("outputs differ");
        assert!(message.contains("final state of 'a'"), "{message}");
    }

    #[test]
    fn divergence_reports_teardown_logs() {
        let expected = output();
        let mut actual = output();
        actual.teardown.clear();
        let message = first_divergence(&expected, &actual).expect("outputs differ");
        assert!(message.starts_with("teardown logs differ"), "{message}");
    }
}
