//! H.265 tools for driving stateless hardware encoders

mod level;
mod profile;

pub mod encoder;

pub use level::{H265Level, H265LevelLimits, H265Tier};
pub use profile::{H265ChromaFormat, H265Profile};
