//! Vulkan implementation of the frame protocol.
//!
//! The compute command buffer (pyramid build, stats clear, culling dispatch
//! and the ownership barriers around them) is recorded once at setup and
//! resubmitted every frame. The caller records the graphics side with
//! [`AshBackend::record_graphics_acquire`], [`AshBackend::record_draw`] and
//! [`AshBackend::record_graphics_release`] and hands that command buffer to
//! [`CullBackend::submit_frame`].

use ash::vk;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{CullConfig, DepthConvention, BOUNDING_RADIUS_SCALE};
use crate::core::scene::Scene;
use crate::core::types::FrameUniforms;
use crate::error::{CullError, Result};
use crate::gpu::CullBackend;
use crate::indirect::{
    CullStats, DrawIndirectCountCall, IndirectCommandBuffer, IndirectStats, COMMAND_STRIDE,
    DRAW_EXTENT_OFFSET,
};
use crate::sync::{FrameState, FrameTimeline, TransferTarget};
use crate::vulkan::{
    load_shader_module, record_batch, Allocator, CommandPool, CullBindings, CullPipeline,
    CullSpecialization, DeviceResource, FrameBarriers, GpuBuffer, GpuDepthPyramid, VulkanContext,
};

/// The caller's depth attachment. The image needs `SAMPLED` and
/// `TRANSFER_DST` usage besides the attachment usage.
#[derive(Debug, Clone, Copy)]
pub struct DepthTarget {
    pub image: vk::Image,
    /// Depth-aspect view sampled by the first pyramid level.
    pub view: vk::ImageView,
    pub aspect: vk::ImageAspectFlags,
}

/// SPIR-V of the two compute shaders.
#[derive(Debug, Clone, Copy)]
pub struct ShaderSources<'a> {
    pub depth_reduce: &'a [u8],
    pub cull: &'a [u8],
}

/// Per-frame graphics submission.
#[derive(Debug, Clone, Default)]
pub struct AshFrameInput {
    /// Recorded with the acquire, draw and release helpers of [`AshBackend`].
    pub graphics_command_buffer: vk::CommandBuffer,
    /// Extra waits, e.g. swapchain image acquisition.
    pub wait_semaphores: Vec<(vk::Semaphore, vk::PipelineStageFlags)>,
    pub signal_semaphores: Vec<vk::Semaphore>,
}

struct FrameBuffers {
    allocator: Arc<Allocator>,
    instances: Option<GpuBuffer>,
    lods: Option<GpuBuffer>,
    commands: Option<GpuBuffer>,
    stats: Option<GpuBuffer>,
    uniforms: Option<GpuBuffer>,
}

fn present<'a>(slot: &'a Option<GpuBuffer>, name: &str) -> Result<&'a GpuBuffer> {
    slot.as_ref()
        .ok_or_else(|| CullError::Vulkan(format!("{name} buffer missing")))
}

fn present_mut<'a>(slot: &'a mut Option<GpuBuffer>, name: &str) -> Result<&'a mut GpuBuffer> {
    slot.as_mut()
        .ok_or_else(|| CullError::Vulkan(format!("{name} buffer missing")))
}

impl FrameBuffers {
    unsafe fn new(allocator: Arc<Allocator>, scene: &Scene) -> Result<Self> {
        let mut buffers = Self {
            allocator,
            instances: None,
            lods: None,
            commands: None,
            stats: None,
            uniforms: None,
        };
        let allocator = Arc::clone(&buffers.allocator);

        buffers.instances = Some(GpuBuffer::with_data(
            &allocator,
            scene.instances(),
            vk::BufferUsageFlags::STORAGE_BUFFER,
        )?);
        buffers.lods = Some(GpuBuffer::with_data(
            &allocator,
            scene.lods().as_slice(),
            vk::BufferUsageFlags::STORAGE_BUFFER,
        )?);

        let initial = IndirectCommandBuffer::new(scene.object_count(), scene.lods().finest());
        buffers.commands = Some(GpuBuffer::with_data(
            &allocator,
            initial.slots(),
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::INDIRECT_BUFFER,
        )?);

        let mut stats = GpuBuffer::readback(
            &allocator,
            std::mem::size_of::<IndirectStats>() as u64,
            vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::INDIRECT_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST,
        )?;
        stats.write(&allocator, &[IndirectStats::default()])?;
        buffers.stats = Some(stats);

        buffers.uniforms = Some(GpuBuffer::with_data(
            &allocator,
            &[FrameUniforms::default()],
            vk::BufferUsageFlags::UNIFORM_BUFFER,
        )?);

        Ok(buffers)
    }

    fn instances(&self) -> Result<&GpuBuffer> {
        present(&self.instances, "instance")
    }

    fn lods(&self) -> Result<&GpuBuffer> {
        present(&self.lods, "LOD")
    }

    fn commands(&self) -> Result<&GpuBuffer> {
        present(&self.commands, "indirect command")
    }

    fn stats(&self) -> Result<&GpuBuffer> {
        present(&self.stats, "statistics")
    }

    fn uniforms(&self) -> Result<&GpuBuffer> {
        present(&self.uniforms, "uniform")
    }

    unsafe fn write_uniforms(&mut self, uniforms: &FrameUniforms) -> Result<()> {
        let allocator = Arc::clone(&self.allocator);
        present_mut(&mut self.uniforms, "uniform")?.write(&allocator, std::slice::from_ref(uniforms))
    }

    unsafe fn read_stats(&mut self) -> Result<IndirectStats> {
        let allocator = Arc::clone(&self.allocator);
        present_mut(&mut self.stats, "statistics")?.read::<IndirectStats>(&allocator)
    }
}

impl Drop for FrameBuffers {
    fn drop(&mut self) {
        let allocator = Arc::clone(&self.allocator);
        for slot in [
            &mut self.instances,
            &mut self.lods,
            &mut self.commands,
            &mut self.stats,
            &mut self.uniforms,
        ] {
            if let Some(mut buffer) = slot.take() {
                unsafe { buffer.destroy(&allocator) };
            }
        }
    }
}

pub struct AshBackend {
    context: VulkanContext,
    pyramid: Option<GpuDepthPyramid>,
    cull: Option<CullPipeline>,
    buffers: Option<FrameBuffers>,
    command_pool: Option<CommandPool>,
    compute_cmd: vk::CommandBuffer,
    compute_done: vk::Semaphore,
    frame_fence: vk::Fence,
    barriers: FrameBarriers,
    timeline: FrameTimeline,
    object_count: u32,
    fence_timeout: Duration,
    fence_observed: bool,
    last_stats: CullStats,
}

impl AshBackend {
    /// Uploads the scene, builds both pipelines, records the compute command
    /// buffer and clears `depth` to the far plane on the graphics queue.
    ///
    /// # Safety
    /// `depth` belongs to `context.device` and is not in use; its extent is
    /// `config.viewport`. The caller keeps it alive while the backend exists.
    pub unsafe fn new(
        context: VulkanContext,
        config: &CullConfig,
        scene: &Scene,
        depth: DepthTarget,
        shaders: ShaderSources<'_>,
    ) -> Result<Self> {
        config.validate()?;
        if scene.lods().len() > config.max_lod_levels {
            return Err(CullError::TooManyLods {
                count: scene.lods().len(),
                max: config.max_lod_levels,
            });
        }

        let device = Arc::clone(&context.device);
        let allocator = Arc::new(Allocator::new(&context)?);
        let families = context.families;

        let mut backend = Self {
            context,
            pyramid: None,
            cull: None,
            buffers: None,
            command_pool: None,
            compute_cmd: vk::CommandBuffer::null(),
            compute_done: vk::Semaphore::null(),
            frame_fence: vk::Fence::null(),
            barriers: FrameBarriers::default(),
            timeline: FrameTimeline::new(),
            object_count: scene.object_count(),
            fence_timeout: config.fence_timeout,
            fence_observed: false,
            last_stats: CullStats::default(),
        };

        backend.buffers = Some(FrameBuffers::new(Arc::clone(&allocator), scene)?);
        backend.build_pipelines(allocator, config, scene, depth, shaders)?;

        let buffers = backend.frame_buffers()?;
        let barriers = FrameBarriers::plan(
            &families,
            &[
                DeviceResource::buffer(TransferTarget::IndirectCommands, buffers.commands()?),
                DeviceResource::buffer(TransferTarget::CountBuffer, buffers.stats()?),
                DeviceResource::depth_image(depth.image, depth.aspect),
            ],
        );
        backend.barriers = barriers;

        backend.compute_done = device
            .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
            .map_err(|e| CullError::Vulkan(format!("Failed to create semaphore: {e}")))?;
        backend.frame_fence = device
            .create_fence(
                &vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED),
                None,
            )
            .map_err(|e| CullError::Vulkan(format!("Failed to create frame fence: {e}")))?;

        let mut pool = CommandPool::new(Arc::clone(&device), families.compute)?;
        backend.compute_cmd = backend.record_compute(&mut pool)?;
        backend.command_pool = Some(pool);

        backend.prime_depth(depth, config.depth_convention)?;

        log::info!(
            "ash backend: {} objects, {} LODs, {}x{} viewport",
            backend.object_count,
            scene.lods().len(),
            config.viewport.0,
            config.viewport.1
        );

        Ok(backend)
    }

    unsafe fn build_pipelines(
        &mut self,
        allocator: Arc<Allocator>,
        config: &CullConfig,
        scene: &Scene,
        depth: DepthTarget,
        shaders: ShaderSources<'_>,
    ) -> Result<()> {
        let device = Arc::clone(&self.context.device);
        let reduce_module = load_shader_module(&device, shaders.depth_reduce)?;
        let cull_module = match load_shader_module(&device, shaders.cull) {
            Ok(module) => module,
            Err(err) => {
                device.destroy_shader_module(reduce_module, None);
                return Err(err);
            }
        };

        let result = (|| -> Result<()> {
            let pyramid = GpuDepthPyramid::new(
                &self.context,
                allocator,
                config.viewport,
                config.depth_convention,
                depth.view,
                reduce_module,
            )?;
            let buffers = self.frame_buffers()?;
            let cull = CullPipeline::new(
                Arc::clone(&device),
                cull_module,
                CullSpecialization {
                    max_lod: scene.lods().coarsest_index() as u32,
                    object_count: scene.object_count(),
                    reversed_depth: (config.depth_convention == DepthConvention::Reversed) as u32,
                    bounding_radius_scale: BOUNDING_RADIUS_SCALE,
                },
                &CullBindings {
                    instances: buffers.instances()?,
                    commands: buffers.commands()?,
                    uniforms: buffers.uniforms()?,
                    stats: buffers.stats()?,
                    lods: buffers.lods()?,
                    pyramid_view: pyramid.full_view(),
                    pyramid_sampler: pyramid.sampler(),
                },
            )?;
            self.pyramid = Some(pyramid);
            self.cull = Some(cull);
            Ok(())
        })();

        device.destroy_shader_module(reduce_module, None);
        device.destroy_shader_module(cull_module, None);
        result
    }

    fn frame_buffers(&self) -> Result<&FrameBuffers> {
        self.buffers
            .as_ref()
            .ok_or_else(|| CullError::Vulkan("frame buffers missing".to_string()))
    }

    unsafe fn record_compute(&self, pool: &mut CommandPool) -> Result<vk::CommandBuffer> {
        let device = &self.context.device;
        let pyramid = self
            .pyramid
            .as_ref()
            .ok_or_else(|| CullError::Vulkan("depth pyramid missing".to_string()))?;
        let cull = self
            .cull
            .as_ref()
            .ok_or_else(|| CullError::Vulkan("cull pipeline missing".to_string()))?;
        let stats = self.frame_buffers()?.stats()?.buffer;

        pool.record(|cmd| {
            let layout = pyramid.layout_barrier();
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&layout),
            );
            record_batch(device, cmd, &self.barriers.compute_acquire);

            pyramid.record_build(cmd)?;

            device.cmd_fill_buffer(cmd, stats, 0, vk::WHOLE_SIZE, 0);
            let cleared = vk::BufferMemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .buffer(stats)
                .offset(0)
                .size(vk::WHOLE_SIZE);
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                std::slice::from_ref(&cleared),
                &[],
            );

            cull.record_dispatch(cmd)?;
            record_batch(device, cmd, &self.barriers.compute_release);
            Ok(())
        })
    }

    /// Clears the depth attachment to the far plane and hands it to compute,
    /// standing in for the graphics release of a frame that never ran.
    unsafe fn prime_depth(&self, depth: DepthTarget, convention: DepthConvention) -> Result<()> {
        let device = &self.context.device;
        let mut pool = CommandPool::new(Arc::clone(device), self.context.families.graphics)?;

        let range = vk::ImageSubresourceRange {
            aspect_mask: depth.aspect,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        let to_transfer = vk::ImageMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(depth.image)
            .subresource_range(range);
        let to_attachment = vk::ImageMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(depth.image)
            .subresource_range(range);

        pool.submit_one_time(self.context.graphics_queue, |cmd| {
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&to_transfer),
            );
            device.cmd_clear_depth_stencil_image(
                cmd,
                depth.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &vk::ClearDepthStencilValue {
                    depth: convention.far_value(),
                    stencil: 0,
                },
                std::slice::from_ref(&range),
            );
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&to_attachment),
            );
            record_batch(device, cmd, &self.barriers.graphics_release);
            Ok(())
        })
    }

    pub fn context(&self) -> &VulkanContext {
        &self.context
    }

    pub fn barriers(&self) -> &FrameBarriers {
        &self.barriers
    }

    /// Instance buffer, for vertex-stage reads in the caller's draw.
    pub fn instance_buffer(&self) -> Result<vk::Buffer> {
        Ok(self.frame_buffers()?.instances()?.buffer)
    }

    pub fn uniform_buffer(&self) -> Result<vk::Buffer> {
        Ok(self.frame_buffers()?.uniforms()?.buffer)
    }

    /// The indirect-count draw over the command slots.
    pub fn draw_call(&self) -> Result<DrawIndirectCountCall<vk::Buffer>> {
        let buffers = self.frame_buffers()?;
        Ok(DrawIndirectCountCall {
            buffer: buffers.commands()?.buffer,
            offset: 0,
            stride: COMMAND_STRIDE,
            count_buffer: buffers.stats()?.buffer,
            count_offset: DRAW_EXTENT_OFFSET,
            max_draw_count: self.object_count,
        })
    }

    /// Acquires the command slots, the count cells and the depth image on
    /// the graphics queue. Record before the render pass.
    ///
    /// # Safety
    /// `cmd` is recording on a graphics-family queue.
    pub unsafe fn record_graphics_acquire(&self, cmd: vk::CommandBuffer) {
        record_batch(&self.context.device, cmd, &self.barriers.graphics_acquire);
    }

    /// # Safety
    /// `cmd` is inside a render pass whose pipeline reads the instance buffer.
    pub unsafe fn record_draw(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let call = self.draw_call()?;
        self.context.device.cmd_draw_indexed_indirect_count(
            cmd,
            call.buffer,
            call.offset,
            call.count_buffer,
            call.count_offset,
            call.max_draw_count,
            call.stride,
        );
        Ok(())
    }

    /// Hands everything back to compute. Record after the render pass.
    ///
    /// # Safety
    /// `cmd` is recording on a graphics-family queue, outside a render pass.
    pub unsafe fn record_graphics_release(&self, cmd: vk::CommandBuffer) {
        record_batch(&self.context.device, cmd, &self.barriers.graphics_release);
    }

    fn wait_fence(&self, timeout: Duration) -> Result<()> {
        let nanos = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        unsafe {
            self.context
                .device
                .wait_for_fences(std::slice::from_ref(&self.frame_fence), true, nanos)?;
        }
        Ok(())
    }
}

impl CullBackend for AshBackend {
    type FrameInput = AshFrameInput;

    fn name(&self) -> &str {
        "vulkan-ash"
    }

    fn object_count(&self) -> u32 {
        self.object_count
    }

    fn timeline(&self) -> &FrameTimeline {
        &self.timeline
    }

    fn wait_frame_complete(&mut self, timeout: Duration) -> Result<()> {
        self.wait_fence(timeout)?;
        let buffers = self
            .buffers
            .as_mut()
            .ok_or_else(|| CullError::Vulkan("frame buffers missing".to_string()))?;
        let raw = unsafe { buffers.read_stats()? };
        self.last_stats = CullStats::from_raw(self.object_count, &raw);
        self.fence_observed = true;
        if self.timeline.state() == FrameState::DrawSubmitted {
            self.timeline.advance(FrameState::DrawSubmitted);
        }
        Ok(())
    }

    fn read_stats(&self) -> Result<CullStats> {
        if !self.fence_observed {
            return Err(CullError::StatsNotReady);
        }
        Ok(self.last_stats)
    }

    fn submit_frame(&mut self, uniforms: &FrameUniforms, input: AshFrameInput) -> Result<()> {
        self.wait_fence(self.fence_timeout)?;
        if self.timeline.state() == FrameState::DrawSubmitted {
            self.timeline.advance(FrameState::DrawSubmitted);
        }
        if self.timeline.state() == FrameState::StatsReadable {
            self.timeline.advance(FrameState::StatsReadable);
        }

        let device = Arc::clone(&self.context.device);
        self.fence_observed = false;

        let buffers = self
            .buffers
            .as_mut()
            .ok_or_else(|| CullError::Vulkan("frame buffers missing".to_string()))?;
        unsafe { buffers.write_uniforms(uniforms)? };

        // The compute submission covers the pyramid build and the kernel.
        let compute = vk::SubmitInfo::default()
            .command_buffers(std::slice::from_ref(&self.compute_cmd))
            .signal_semaphores(std::slice::from_ref(&self.compute_done));
        unsafe {
            device.queue_submit(
                self.context.compute_queue,
                std::slice::from_ref(&compute),
                vk::Fence::null(),
            )?;
        }
        self.timeline.advance(FrameState::Idle);
        self.timeline.advance(FrameState::PyramidBuilding);
        self.timeline.advance(FrameState::KernelReady);

        let mut wait_semaphores = vec![self.compute_done];
        let mut wait_stages = vec![
            vk::PipelineStageFlags::DRAW_INDIRECT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        ];
        for (semaphore, stage) in &input.wait_semaphores {
            wait_semaphores.push(*semaphore);
            wait_stages.push(*stage);
        }
        self.timeline.advance(FrameState::KernelDispatched);

        let graphics = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(std::slice::from_ref(&input.graphics_command_buffer))
            .signal_semaphores(&input.signal_semaphores);
        // Reset only once nothing before the signalling submit can fail.
        unsafe {
            device.reset_fences(std::slice::from_ref(&self.frame_fence))?;
            device.queue_submit(
                self.context.graphics_queue,
                std::slice::from_ref(&graphics),
                self.frame_fence,
            )?;
        }
        self.timeline.advance(FrameState::DrawReady);
        Ok(())
    }
}

impl Drop for AshBackend {
    fn drop(&mut self) {
        unsafe {
            if let Err(err) = self.context.device.device_wait_idle() {
                log::error!("device_wait_idle failed during teardown: {err}");
            }
            self.cull.take();
            self.pyramid.take();
            self.command_pool.take();
            self.buffers.take();
            self.context.device.destroy_semaphore(self.compute_done, None);
            self.context.device.destroy_fence(self.frame_fence, None);
        }
        log::debug!("ash backend destroyed");
    }
}
