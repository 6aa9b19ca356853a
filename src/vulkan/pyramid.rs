//! Device-side Hi-Z pyramid: one compute dispatch per level.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;

use crate::config::{DepthConvention, PYRAMID_WORKGROUP_SIZE};
use crate::pyramid::level_count;
use crate::vulkan::{Allocator, ComputePipeline, VulkanContext};
use crate::{CullError, Result};

/// Push constant of the reduction shader (16-byte aligned block).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct PyramidPushConstants {
    pub image_size: [f32; 2],
    pub _pad: [f32; 2],
}

impl PyramidPushConstants {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image_size: [width as f32, height as f32],
            _pad: [0.0; 2],
        }
    }
}

/// Extent of every level, base first. The base is the viewport rounded up to powers of two.
pub fn level_extents(width: u32, height: u32) -> Vec<(u32, u32)> {
    let count = level_count(width, height);
    let mut extent = (width.next_power_of_two(), height.next_power_of_two());
    (0..count)
        .map(|_| {
            let current = extent;
            extent = ((extent.0 / 2).max(1), (extent.1 / 2).max(1));
            current
        })
        .collect()
}

/// Workgroups covering `extent` texels along one axis.
#[inline]
pub fn pyramid_workgroups(extent: u32) -> u32 {
    extent.div_ceil(PYRAMID_WORKGROUP_SIZE)
}

pub struct GpuDepthPyramid {
    device: Arc<ash::Device>,
    allocator: Arc<Allocator>,
    image: vk::Image,
    allocation: Option<vk_mem::Allocation>,
    full_view: vk::ImageView,
    level_views: Vec<vk::ImageView>,
    sampler: vk::Sampler,
    set_layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    level_sets: Vec<vk::DescriptorSet>,
    pipeline: Option<ComputePipeline>,
    extents: Vec<(u32, u32)>,
}

impl GpuDepthPyramid {
    /// Creates the pyramid image, its views, the reduction sampler and the
    /// per-level descriptor sets. Level 0 samples `depth_view`.
    ///
    /// # Safety
    /// `depth_view` must be a depth-aspect view of the caller's depth
    /// attachment sized to `viewport`; `shader` is the reduction shader module.
    pub unsafe fn new(
        context: &VulkanContext,
        allocator: Arc<Allocator>,
        viewport: (u32, u32),
        convention: DepthConvention,
        depth_view: vk::ImageView,
        shader: vk::ShaderModule,
    ) -> Result<Self> {
        if viewport.0 == 0 || viewport.1 == 0 {
            return Err(CullError::InvalidViewport {
                width: viewport.0,
                height: viewport.1,
            });
        }

        let extents = level_extents(viewport.0, viewport.1);
        let levels = extents.len() as u32;
        let mut pyramid = Self {
            device: Arc::clone(&context.device),
            allocator,
            image: vk::Image::null(),
            allocation: None,
            full_view: vk::ImageView::null(),
            level_views: Vec::new(),
            sampler: vk::Sampler::null(),
            set_layout: vk::DescriptorSetLayout::null(),
            pool: vk::DescriptorPool::null(),
            level_sets: Vec::new(),
            pipeline: None,
            extents,
        };

        let (base_width, base_height) = pyramid.extents[0];
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(vk::Format::R32_SFLOAT)
            .extent(vk::Extent3D {
                width: base_width,
                height: base_height,
                depth: 1,
            })
            .mip_levels(levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::STORAGE)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let (image, allocation) = pyramid.allocator.create_image(&image_info)?;
        pyramid.image = image;
        pyramid.allocation = Some(allocation);

        pyramid.full_view = pyramid.create_view(0, levels)?;
        for level in 0..levels {
            let view = pyramid.create_view(level, 1)?;
            pyramid.level_views.push(view);
        }

        let mut reduction = vk::SamplerReductionModeCreateInfo::default().reduction_mode(
            match convention {
                DepthConvention::Standard => vk::SamplerReductionMode::MAX,
                DepthConvention::Reversed => vk::SamplerReductionMode::MIN,
            },
        );
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .min_lod(0.0)
            .max_lod(16.0)
            .push_next(&mut reduction);
        pyramid.sampler = pyramid
            .device
            .create_sampler(&sampler_info, None)
            .map_err(|e| CullError::Vulkan(format!("Failed to create depth sampler: {e}")))?;

        let bindings = [
            vk::DescriptorSetLayoutBinding::default()
                .binding(0)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE),
            vk::DescriptorSetLayoutBinding::default()
                .binding(1)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE),
        ];
        pyramid.set_layout = pyramid
            .device
            .create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings),
                None,
            )
            .map_err(|e| CullError::Vulkan(format!("Failed to create pyramid set layout: {e}")))?;

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: levels,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: levels,
            },
        ];
        pyramid.pool = pyramid
            .device
            .create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::default()
                    .max_sets(levels)
                    .pool_sizes(&pool_sizes),
                None,
            )
            .map_err(|e| CullError::Vulkan(format!("Failed to create pyramid pool: {e}")))?;

        let layouts = vec![pyramid.set_layout; levels as usize];
        pyramid.level_sets = pyramid
            .device
            .allocate_descriptor_sets(
                &vk::DescriptorSetAllocateInfo::default()
                    .descriptor_pool(pyramid.pool)
                    .set_layouts(&layouts),
            )
            .map_err(|e| CullError::Vulkan(format!("Failed to allocate pyramid sets: {e}")))?;

        let image_infos: Vec<[vk::DescriptorImageInfo; 2]> = (0..levels as usize)
            .map(|level| {
                let output = vk::DescriptorImageInfo {
                    sampler: vk::Sampler::null(),
                    image_view: pyramid.level_views[level],
                    image_layout: vk::ImageLayout::GENERAL,
                };
                let input = if level == 0 {
                    vk::DescriptorImageInfo {
                        sampler: pyramid.sampler,
                        image_view: depth_view,
                        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    }
                } else {
                    vk::DescriptorImageInfo {
                        sampler: pyramid.sampler,
                        image_view: pyramid.level_views[level - 1],
                        image_layout: vk::ImageLayout::GENERAL,
                    }
                };
                [output, input]
            })
            .collect();

        let writes: Vec<vk::WriteDescriptorSet> = pyramid
            .level_sets
            .iter()
            .zip(image_infos.iter())
            .flat_map(|(&set, infos)| {
                [
                    vk::WriteDescriptorSet::default()
                        .dst_set(set)
                        .dst_binding(0)
                        .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                        .image_info(std::slice::from_ref(&infos[0])),
                    vk::WriteDescriptorSet::default()
                        .dst_set(set)
                        .dst_binding(1)
                        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                        .image_info(std::slice::from_ref(&infos[1])),
                ]
            })
            .collect();
        pyramid.device.update_descriptor_sets(&writes, &[]);

        pyramid.pipeline = Some(
            ComputePipeline::builder(Arc::clone(&pyramid.device), shader)
                .set_layout(pyramid.set_layout)
                .push_constants::<PyramidPushConstants>()
                .build()?,
        );

        log::info!(
            "Depth pyramid created: {}x{} base, {} levels",
            base_width,
            base_height,
            levels
        );

        Ok(pyramid)
    }

    unsafe fn create_view(&self, base_mip_level: u32, level_count: u32) -> Result<vk::ImageView> {
        let info = vk::ImageViewCreateInfo::default()
            .image(self.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(vk::Format::R32_SFLOAT)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level,
                level_count,
                base_array_layer: 0,
                layer_count: 1,
            });
        self.device
            .create_image_view(&info, None)
            .map_err(|e| CullError::Vulkan(format!("Failed to create pyramid view: {e}")))
    }

    pub fn level_count(&self) -> u32 {
        self.extents.len() as u32
    }

    pub fn extents(&self) -> &[(u32, u32)] {
        &self.extents
    }

    /// View over every level, sampled by the culling shader.
    pub fn full_view(&self) -> vk::ImageView {
        self.full_view
    }

    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    /// Discards the previous contents and moves every level to `GENERAL`.
    pub fn layout_barrier(&self) -> vk::ImageMemoryBarrier<'static> {
        vk::ImageMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::SHADER_WRITE)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::GENERAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: self.level_count(),
                base_array_layer: 0,
                layer_count: 1,
            })
    }

    /// Records the per-level reductions, each level waiting on the previous one.
    ///
    /// # Safety
    /// `cmd` is recording on the compute queue; the source depth image is in
    /// `SHADER_READ_ONLY_OPTIMAL` and owned by compute.
    pub unsafe fn record_build(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let pipeline = self
            .pipeline
            .as_ref()
            .ok_or_else(|| CullError::Vulkan("depth pyramid pipeline missing".to_string()))?;
        let level_barrier = vk::MemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::SHADER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ);

        for (level, &(width, height)) in self.extents.iter().enumerate() {
            if level > 0 {
                self.device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::COMPUTE_SHADER,
                    vk::PipelineStageFlags::COMPUTE_SHADER,
                    vk::DependencyFlags::empty(),
                    std::slice::from_ref(&level_barrier),
                    &[],
                    &[],
                );
            }
            pipeline.bind(cmd, self.level_sets[level]);
            pipeline.push_constants(cmd, &PyramidPushConstants::new(width, height));
            self.device.cmd_dispatch(
                cmd,
                pyramid_workgroups(width),
                pyramid_workgroups(height),
                1,
            );
        }

        self.device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::DependencyFlags::empty(),
            std::slice::from_ref(&level_barrier),
            &[],
            &[],
        );
        Ok(())
    }
}

impl Drop for GpuDepthPyramid {
    fn drop(&mut self) {
        self.pipeline.take();
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
            self.device.destroy_descriptor_set_layout(self.set_layout, None);
            self.device.destroy_sampler(self.sampler, None);
            for view in self.level_views.drain(..) {
                self.device.destroy_image_view(view, None);
            }
            self.device.destroy_image_view(self.full_view, None);
            if let Some(mut allocation) = self.allocation.take() {
                self.allocator.destroy_image(self.image, &mut allocation);
            }
        }
        log::debug!("Depth pyramid destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_extents_halve_to_one() {
        let extents = level_extents(1280, 720);
        assert_eq!(extents.len(), 11);
        assert_eq!(extents[0], (2048, 1024));
        assert_eq!(extents[1], (1024, 512));
        assert_eq!(*extents.last().unwrap(), (2, 1));
    }

    #[test]
    fn test_workgroups_round_up() {
        assert_eq!(pyramid_workgroups(2048), 64);
        assert_eq!(pyramid_workgroups(33), 2);
        assert_eq!(pyramid_workgroups(1), 1);
    }

    #[test]
    fn test_push_constant_block_size() {
        assert_eq!(std::mem::size_of::<PyramidPushConstants>(), 16);
    }
}
