//! gpu_cull – GPU-driven visibility for large instanced scenes.
//!
//! Each frame a compute context reduces last frame's depth buffer into a
//! hierarchical depth pyramid, then tests every object against the view
//! frustum and the pyramid and picks a level of detail by distance. The
//! result is a fixed-slot indirect command buffer plus a count cell that a
//! graphics context consumes with one indirect-count draw, without the host
//! reading anything back mid-frame.
//!
//! Two backends implement the same frame protocol ([`CullBackend`]):
//! [`CpuBackend`] runs both contexts as host threads, [`AshBackend`] records
//! them into Vulkan command buffers. [`CullingEngine`] drives either one.

pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod gpu;
pub mod indirect;
pub mod kernel;
pub mod pyramid;
pub mod sync;
pub mod utils;
pub mod vulkan;

pub use glam::{Mat4, Vec3, Vec4};

pub use config::{CullConfig, DepthConvention};
pub use core::{
    CameraRig, FrameUniforms, Frustum, LodDescriptor, LodRange, LodTable, ObjectInstance, Scene,
};
pub use engine::CullingEngine;
pub use error::{CullError, ErrorClass, Result};
pub use gpu::{
    AshBackend, AshFrameInput, CpuBackend, CullBackend, DepthTarget, FarPlaneStage, RenderStage,
    ShaderSources, StaticDepthStage, TransferLog,
};
pub use indirect::{CullStats, DrawIndexedIndirectCommand, IndirectCommandBuffer, StatsBlock};
pub use kernel::{CullDecision, KernelOptions, VisibilityKernel};
pub use pyramid::{DepthImage, DepthPyramid};
pub use sync::{FrameFence, FrameState, FrameTimeline, QueueFamilies};
pub use utils::CullProfiler;
