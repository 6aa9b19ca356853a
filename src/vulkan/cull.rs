//! The culling compute pipeline and its single descriptor set.

use ash::vk;
use std::sync::Arc;

use crate::config::CULL_WORKGROUP_SIZE;
use crate::vulkan::{ComputePipeline, GpuBuffer, SpecializationConstants};
use crate::{CullError, Result};

/// Buffers and pyramid bound to the six culling bindings.
pub struct CullBindings<'a> {
    /// Binding 0.
    pub instances: &'a GpuBuffer,
    /// Binding 1.
    pub commands: &'a GpuBuffer,
    /// Binding 2.
    pub uniforms: &'a GpuBuffer,
    /// Binding 3.
    pub stats: &'a GpuBuffer,
    /// Binding 4.
    pub lods: &'a GpuBuffer,
    /// Binding 5, sampled in `GENERAL` layout.
    pub pyramid_view: vk::ImageView,
    pub pyramid_sampler: vk::Sampler,
}

/// Values baked into the culling shader.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CullSpecialization {
    /// `constant_id = 0`: index of the coarsest LOD.
    pub max_lod: u32,
    /// `constant_id = 1`: bound on the invocation index.
    pub object_count: u32,
    /// `constant_id = 2`: non-zero for reversed depth.
    pub reversed_depth: u32,
    /// `constant_id = 3`: bounding sphere radius per unit of instance scale.
    pub bounding_radius_scale: f32,
}

impl CullSpecialization {
    pub fn constants(&self) -> SpecializationConstants {
        let mut constants = SpecializationConstants::default();
        constants.push(0, self.max_lod);
        constants.push(1, self.object_count);
        constants.push(2, self.reversed_depth);
        constants.push(3, self.bounding_radius_scale);
        constants
    }
}

/// Workgroups covering `object_count` invocations.
#[inline]
pub fn cull_workgroups(object_count: u32) -> u32 {
    object_count.div_ceil(CULL_WORKGROUP_SIZE)
}

pub struct CullPipeline {
    device: Arc<ash::Device>,
    set_layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    set: vk::DescriptorSet,
    pipeline: Option<ComputePipeline>,
    object_count: u32,
}

impl CullPipeline {
    /// # Safety
    /// `shader` is the culling shader module and every binding is a live resource.
    pub unsafe fn new(
        device: Arc<ash::Device>,
        shader: vk::ShaderModule,
        specialization: CullSpecialization,
        bindings: &CullBindings<'_>,
    ) -> Result<Self> {
        let mut cull = Self {
            device,
            set_layout: vk::DescriptorSetLayout::null(),
            pool: vk::DescriptorPool::null(),
            set: vk::DescriptorSet::null(),
            pipeline: None,
            object_count: specialization.object_count,
        };

        let binding = |index: u32, ty: vk::DescriptorType| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(index)
                .descriptor_type(ty)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
        };
        let layout_bindings = [
            binding(0, vk::DescriptorType::STORAGE_BUFFER),
            binding(1, vk::DescriptorType::STORAGE_BUFFER),
            binding(2, vk::DescriptorType::UNIFORM_BUFFER),
            binding(3, vk::DescriptorType::STORAGE_BUFFER),
            binding(4, vk::DescriptorType::STORAGE_BUFFER),
            binding(5, vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
        ];
        cull.set_layout = cull
            .device
            .create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::default().bindings(&layout_bindings),
                None,
            )
            .map_err(|e| CullError::Vulkan(format!("Failed to create cull set layout: {e}")))?;

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: 4,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: 1,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: 1,
            },
        ];
        cull.pool = cull
            .device
            .create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::default()
                    .max_sets(1)
                    .pool_sizes(&pool_sizes),
                None,
            )
            .map_err(|e| CullError::Vulkan(format!("Failed to create cull pool: {e}")))?;

        cull.set = cull
            .device
            .allocate_descriptor_sets(
                &vk::DescriptorSetAllocateInfo::default()
                    .descriptor_pool(cull.pool)
                    .set_layouts(std::slice::from_ref(&cull.set_layout)),
            )
            .map_err(|e| CullError::Vulkan(format!("Failed to allocate cull set: {e}")))?[0];

        let buffers = [
            (0, vk::DescriptorType::STORAGE_BUFFER, bindings.instances.descriptor()),
            (1, vk::DescriptorType::STORAGE_BUFFER, bindings.commands.descriptor()),
            (2, vk::DescriptorType::UNIFORM_BUFFER, bindings.uniforms.descriptor()),
            (3, vk::DescriptorType::STORAGE_BUFFER, bindings.stats.descriptor()),
            (4, vk::DescriptorType::STORAGE_BUFFER, bindings.lods.descriptor()),
        ];
        let pyramid = vk::DescriptorImageInfo {
            sampler: bindings.pyramid_sampler,
            image_view: bindings.pyramid_view,
            image_layout: vk::ImageLayout::GENERAL,
        };

        let mut writes: Vec<vk::WriteDescriptorSet> = buffers
            .iter()
            .map(|(index, ty, info)| {
                vk::WriteDescriptorSet::default()
                    .dst_set(cull.set)
                    .dst_binding(*index)
                    .descriptor_type(*ty)
                    .buffer_info(std::slice::from_ref(info))
            })
            .collect();
        writes.push(
            vk::WriteDescriptorSet::default()
                .dst_set(cull.set)
                .dst_binding(5)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(std::slice::from_ref(&pyramid)),
        );
        cull.device.update_descriptor_sets(&writes, &[]);

        cull.pipeline = Some(
            ComputePipeline::builder(Arc::clone(&cull.device), shader)
                .set_layout(cull.set_layout)
                .specialization(specialization.constants())
                .build()?,
        );

        log::info!(
            "Cull pipeline created: {} objects, max LOD {}",
            specialization.object_count,
            specialization.max_lod
        );

        Ok(cull)
    }

    /// Binds and dispatches one invocation per object.
    ///
    /// # Safety
    /// `cmd` is recording on the compute queue with every binding owned by compute.
    pub unsafe fn record_dispatch(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let pipeline = self
            .pipeline
            .as_ref()
            .ok_or_else(|| CullError::Vulkan("cull pipeline missing".to_string()))?;
        pipeline.bind(cmd, self.set);
        self.device
            .cmd_dispatch(cmd, cull_workgroups(self.object_count), 1, 1);
        Ok(())
    }
}

impl Drop for CullPipeline {
    fn drop(&mut self) {
        self.pipeline.take();
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
            self.device.destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}
