use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;

const DEFAULT_FRAMES: u64 = 60;

/// Options of the headless scene runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub scene: PathBuf,
    pub behaviours: PathBuf,
    pub config: Option<PathBuf>,
    pub frames: u64,
    pub realtime: bool,
}

impl RunOptions {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut scene = None;
        let mut behaviours = None;
        let mut config = None;
        let mut frames = DEFAULT_FRAMES;
        let mut realtime = false;
        let mut iter = args.into_iter();
        let _ = iter.next(); // skip program name if present
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            if !flag.starts_with("--") {
                bail!("Unexpected argument '{flag}'. Use --scene/--behaviours/--config/--frames/--realtime.");
            }
            let key = &flag[2..];
            if key == "realtime" {
                realtime = true;
                continue;
            }
            let value =
                iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?.as_ref().to_string();
            match key {
                "scene" => scene = Some(PathBuf::from(value)),
                "behaviours" => behaviours = Some(PathBuf::from(value)),
                "config" => config = Some(PathBuf::from(value)),
                "frames" => {
                    frames = value.parse::<u64>().with_context(|| format!("Invalid frame count '{value}'"))?;
                }
                _ => bail!("Unknown flag '{flag}'. Supported flags: --scene, --behaviours, --config, --frames, --realtime."),
            }
        }
        let scene = scene.ok_or_else(|| anyhow!("--scene <path> is required"))?;
        let behaviours = behaviours.unwrap_or_else(|| PathBuf::from("assets/scripts"));
        Ok(Self { scene, behaviours, config, frames, realtime })
    }
}
