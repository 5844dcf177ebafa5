mod bbfile;
mod block;
mod config;
mod events;
mod image;
mod interval;
mod profile;
mod profiler;
mod reuse;
mod stack_distance;
mod utils;

pub use bbfile::*;
pub use block::*;
pub use config::*;
pub use events::*;
pub use image::*;
pub use interval::*;
pub use profile::*;
pub use profiler::*;
pub use reuse::*;
pub use stack_distance::*;
pub use utils::*;
