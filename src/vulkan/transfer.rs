//! Barrier batches for one culling frame, planned once with ownership tokens.

use ash::vk;

use crate::sync::{BarrierBatch, ComputeContext, GraphicsContext, Owned, QueueFamilies};
use crate::vulkan::DeviceResource;

/// The four barrier points of a frame, two per context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameBarriers {
    pub compute_acquire: BarrierBatch,
    pub compute_release: BarrierBatch,
    pub graphics_acquire: BarrierBatch,
    pub graphics_release: BarrierBatch,
}

impl FrameBarriers {
    /// Walks every resource once around the frame cycle. Between frames the
    /// resources rest on the graphics side.
    pub fn plan(families: &QueueFamilies, resources: &[DeviceResource]) -> Self {
        let mut plan = Self::default();
        for &resource in resources {
            let owned: Owned<DeviceResource, GraphicsContext> = Owned::new(resource);
            let owned = owned
                .release::<ComputeContext>(families, &mut plan.graphics_release)
                .acquire(families, &mut plan.compute_acquire);
            let _owned = owned
                .release::<GraphicsContext>(families, &mut plan.compute_release)
                .acquire(families, &mut plan.graphics_acquire);
        }
        plan
    }
}

/// Records `batch` as a single pipeline barrier. Empty batches record nothing.
///
/// # Safety
/// `cmd` must be in the recording state on a queue of the batch's context.
pub unsafe fn record_batch(device: &ash::Device, cmd: vk::CommandBuffer, batch: &BarrierBatch) {
    if batch.is_empty() {
        return;
    }
    let buffer_barriers = batch.buffer_barriers();
    let image_barriers = batch.image_barriers();
    device.cmd_pipeline_barrier(
        cmd,
        batch.src_stage_mask(),
        batch.dst_stage_mask(),
        vk::DependencyFlags::empty(),
        &[],
        &buffer_barriers,
        &image_barriers,
    );
}
