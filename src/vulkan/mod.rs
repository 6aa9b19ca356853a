//! Vulkan building blocks for the device-side frame: context, memory,
//! pipelines, the depth pyramid, the culling dispatch and transfer barriers.

pub mod allocator;
pub mod buffer;
pub mod command;
pub mod compute_pipeline;
pub mod context;
pub mod cull;
pub mod pyramid;
pub mod transfer;

pub use allocator::Allocator;
pub use buffer::{DeviceResource, GpuBuffer};
pub use command::CommandPool;
pub use compute_pipeline::{
    load_shader_module, ComputePipeline, ComputePipelineBuilder, SpecializationConstants,
};
pub use context::{RequiredFeatures, VulkanContext};
pub use cull::{cull_workgroups, CullBindings, CullPipeline, CullSpecialization};
pub use pyramid::{level_extents, pyramid_workgroups, GpuDepthPyramid, PyramidPushConstants};
pub use transfer::{record_batch, FrameBarriers};
