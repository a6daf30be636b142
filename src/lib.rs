pub mod cli;
pub mod config;
pub mod ecs;
pub mod error;
pub mod events;
pub mod input;
pub mod logging;
pub mod runner;
pub mod scene;
pub mod script_harness;
pub mod scripts;
pub mod time;

pub use config::{FaultPolicy, HostConfig};
pub use error::ScriptError;
pub use scene::SceneDocument;
pub use scripts::{FrameReport, ScriptHost};
