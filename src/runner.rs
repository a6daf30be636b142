use crate::cli::RunOptions;
use crate::config::HostConfig;
use crate::scene::SceneDocument;
use crate::scripts::{FrameReport, RenderItem, ScriptHost};
use crate::time::FrameClock;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

const FIXED_STEP_MS: f64 = 1000.0 / 60.0;
const FRAME_BUDGET: Duration = Duration::from_millis(16);

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub frames: u64,
    pub scene_loads: usize,
    pub updates: usize,
    pub faults: usize,
    /// Script log lines written during the run, teardown included.
    pub logs: usize,
    /// Entities removed when the scene was unloaded after the last frame.
    pub unloaded: usize,
    pub render: Vec<RenderItem>,
}

/// Registers every `*.rhai` file in `dir` under its file stem, in name order.
pub fn register_behaviour_dir(host: &mut ScriptHost, dir: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(dir).with_context(|| format!("Reading behaviour directory {}", dir.display()))?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "rhai"))
        .collect();
    paths.sort();
    let mut ids = Vec::with_capacity(paths.len());
    for path in paths {
        let Some(stem) = path.file_stem() else { continue };
        let id = stem.to_string_lossy().into_owned();
        host.register_behaviour_file(&id, &path)?;
        ids.push(id);
    }
    Ok(ids)
}

pub fn run(options: &RunOptions) -> Result<RunSummary> {
    let config = match &options.config {
        Some(path) => HostConfig::load(path)?,
        None => HostConfig::default(),
    };
    let mut host = ScriptHost::with_config(config);
    let ids = register_behaviour_dir(&mut host, &options.behaviours)?;
    info!(count = ids.len(), dir = %options.behaviours.display(), "behaviours_registered");

    let scene = SceneDocument::load_from_path(&options.scene)?;
    host.instantiate_scene(&scene).with_context(|| format!("Instantiating scene {}", options.scene.display()))?;
    let mut totals = host.load_scene();
    let mut logs = drain_outputs(&mut host);

    let input = host.input_state();
    let mut clock = FrameClock::new();
    for _ in 0..options.frames {
        let report = if options.realtime {
            thread::sleep(FRAME_BUDGET);
            host.frame_with_clock(&mut clock, &input)
        } else {
            host.frame(FIXED_STEP_MS, input.snapshot())
        };
        accumulate(&mut totals, report);
        logs += drain_outputs(&mut host);
    }
    if let Some(err) = host.last_error() {
        warn!(kind = err.kind(), error = %err, "last_script_error");
    }
    let render = host.render_view();
    let unloaded = host.unload_scene();
    logs += drain_outputs(&mut host);
    Ok(RunSummary {
        frames: host.frame_count(),
        scene_loads: totals.scene_loads,
        updates: totals.updates,
        faults: totals.faults,
        logs,
        unloaded,
        render,
    })
}

/// Empties the host's log and event buffers so long runs stay bounded. Log lines were
/// already echoed through tracing when the script wrote them.
fn drain_outputs(host: &mut ScriptHost) -> usize {
    for event in host.drain_events() {
        debug!(%event, "host_event");
    }
    host.take_logs().len()
}

fn accumulate(totals: &mut FrameReport, report: FrameReport) {
    totals.frame = report.frame;
    totals.scene_loads += report.scene_loads;
    totals.updates += report.updates;
    totals.faults += report.faults;
}
