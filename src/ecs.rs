mod filter;
mod transform;
mod types;
mod world;

pub use filter::EntityFilter;
pub use types::*;
pub use world::SceneWorld;
