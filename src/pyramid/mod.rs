//! Depth pyramid construction from the previous frame's depth buffer.

pub mod builder;
pub mod depth;

pub use builder::{level_count, DepthPyramid, PyramidLevel};
pub use depth::DepthImage;
