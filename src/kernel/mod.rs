//! The visibility and LOD kernel.

pub mod visibility;

pub use visibility::{is_occluded, CullDecision, KernelOptions, VisibilityKernel};
