use ash::vk;
use ash::vk::Handle;
use gpu_cull::sync::{
    BarrierBatch, ComputeContext, ContextRole, GraphicsContext, Owned, TransferHalf,
    TransferHandle, TransferTarget,
};
use gpu_cull::vulkan::{DeviceResource, FrameBarriers};
use gpu_cull::*;

fn device_resources() -> Vec<DeviceResource> {
    let buffer = |target, raw| DeviceResource {
        target,
        handle: TransferHandle::Buffer {
            buffer: vk::Buffer::from_raw(raw),
            offset: 0,
            size: vk::WHOLE_SIZE,
        },
    };
    vec![
        buffer(TransferTarget::IndirectCommands, 0x10),
        buffer(TransferTarget::CountBuffer, 0x20),
        DeviceResource::depth_image(vk::Image::from_raw(0x30), vk::ImageAspectFlags::DEPTH),
    ]
}

#[test]
fn depth_image_survives_a_full_round_trip() {
    let families = QueueFamilies::new(0, 2);
    let mut depth: Owned<DepthImage, GraphicsContext> =
        Owned::new(DepthImage::cleared(8, 8, DepthConvention::Standard).unwrap());
    depth.fill_rect(0, 0, 4, 4, 0.3);

    let mut batches: [BarrierBatch; 4] = Default::default();
    let [graphics_release, compute_acquire, compute_release, graphics_acquire] = &mut batches;

    let on_compute = depth
        .release::<ComputeContext>(&families, graphics_release)
        .acquire(&families, compute_acquire);
    assert_eq!(on_compute.role(), ContextRole::Compute);
    assert_eq!(on_compute.get(1, 1), 0.3);

    let back = on_compute
        .release::<GraphicsContext>(&families, compute_release)
        .acquire(&families, graphics_acquire);
    assert_eq!(back.role(), ContextRole::Graphics);
    assert_eq!(back.get(6, 6), 1.0);
    let image = back.into_inner();
    assert_eq!((image.width(), image.height()), (8, 8));

    let out = *compute_acquire.iter().next().unwrap();
    let home = *graphics_acquire.iter().next().unwrap();
    for batch in &batches {
        assert_eq!(batch.len(), 1);
    }
    // The layout the image leaves graphics in is the one it comes back to.
    assert_eq!(out.old_layout, home.new_layout);
    assert_eq!(out.new_layout, home.old_layout);
}

#[test]
fn planned_barriers_carry_device_handles() {
    let plan = FrameBarriers::plan(&QueueFamilies::new(0, 1), &device_resources());

    let buffers = plan.compute_release.buffer_barriers();
    assert_eq!(buffers.len(), 2);
    let raws: Vec<u64> = buffers.iter().map(|b| b.buffer.as_raw()).collect();
    assert_eq!(raws, [0x10, 0x20]);
    assert!(buffers
        .iter()
        .all(|b| b.src_queue_family_index == 1 && b.dst_queue_family_index == 0));

    let images = plan.graphics_release.image_barriers();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].image.as_raw(), 0x30);
    assert_eq!(images[0].subresource_range.aspect_mask, vk::ImageAspectFlags::DEPTH);
    assert_eq!(images[0].old_layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    assert_eq!(images[0].new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
}

#[test]
fn release_and_acquire_halves_split_the_access_masks() {
    let plan = FrameBarriers::plan(&QueueFamilies::new(3, 5), &device_resources());

    for release in plan.compute_release.iter().chain(plan.graphics_release.iter()) {
        assert_eq!(release.half, TransferHalf::Release);
        assert_eq!(release.dst_access, vk::AccessFlags::empty());
        assert_eq!(release.dst_stage, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
    }
    for acquire in plan.compute_acquire.iter().chain(plan.graphics_acquire.iter()) {
        assert_eq!(acquire.half, TransferHalf::Acquire);
        assert_eq!(acquire.src_access, vk::AccessFlags::empty());
        assert_eq!(acquire.src_stage, acquire.dst_stage);
    }
    assert_eq!(
        plan.graphics_acquire.dst_stage_mask(),
        vk::PipelineStageFlags::DRAW_INDIRECT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
    );
}

#[test]
fn shared_family_plan_is_one_barrier_per_hand_off() {
    let plan = FrameBarriers::plan(&QueueFamilies::shared(0), &device_resources());
    assert_eq!(plan.graphics_release.len(), 3);
    assert_eq!(plan.compute_release.len(), 3);

    let indirect = plan
        .compute_release
        .iter()
        .find(|b| b.target == TransferTarget::IndirectCommands)
        .unwrap();
    assert_eq!(indirect.src_stage, vk::PipelineStageFlags::COMPUTE_SHADER);
    assert_eq!(indirect.dst_stage, vk::PipelineStageFlags::DRAW_INDIRECT);
    assert_eq!(indirect.dst_access, vk::AccessFlags::INDIRECT_COMMAND_READ);
}
