use kestrel_script_host::cli::RunOptions;
use kestrel_script_host::logging::init_tracing;
use kestrel_script_host::runner;
use tracing::{error, info};

fn main() {
    init_tracing();
    let options = match RunOptions::parse_from_env() {
        Ok(options) => options,
        Err(err) => {
            error!(error = %err, "invalid_arguments");
            std::process::exit(2);
        }
    };
    match runner::run(&options) {
        Ok(summary) => {
            for item in &summary.render {
                let origin = item.world.w_axis.truncate();
                info!(entity = %item.name, x = origin.x, y = origin.y, visible = item.visible, "entity_pose");
            }
            info!(
                frames = summary.frames,
                scene_loads = summary.scene_loads,
                updates = summary.updates,
                faults = summary.faults,
                logs = summary.logs,
                unloaded = summary.unloaded,
                "run_complete"
            );
        }
        Err(err) => {
            error!(error = ?err, "run_failed");
            std::process::exit(1);
        }
    }
}
