//! Compute pipelines for the depth reduction and culling shaders.

use ash::vk;
use bytemuck::Pod;
use std::sync::Arc;

use crate::{CullError, Result};

/// Creates a shader module from SPIR-V bytes.
///
/// # Safety
/// `device` must be valid; the module must be destroyed by the caller.
pub unsafe fn load_shader_module(device: &ash::Device, spirv: &[u8]) -> Result<vk::ShaderModule> {
    let words = ash::util::read_spv(&mut std::io::Cursor::new(spirv))
        .map_err(|e| CullError::Vulkan(format!("Invalid SPIR-V: {e}")))?;
    let info = vk::ShaderModuleCreateInfo::default().code(&words);
    device
        .create_shader_module(&info, None)
        .map_err(|e| CullError::Vulkan(format!("Failed to create shader module: {e}")))
}

/// Packed specialization constant values and their map entries.
#[derive(Debug, Clone, Default)]
pub struct SpecializationConstants {
    entries: Vec<vk::SpecializationMapEntry>,
    data: Vec<u8>,
}

impl SpecializationConstants {
    pub fn push<T: Pod>(&mut self, constant_id: u32, value: T) {
        let bytes = bytemuck::bytes_of(&value);
        self.entries.push(vk::SpecializationMapEntry {
            constant_id,
            offset: self.data.len() as u32,
            size: bytes.len(),
        });
        self.data.extend_from_slice(bytes);
    }

    pub fn entries(&self) -> &[vk::SpecializationMapEntry] {
        &self.entries
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A compute pipeline together with the layout it owns.
pub struct ComputePipeline {
    device: Arc<ash::Device>,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl ComputePipeline {
    pub fn builder(device: Arc<ash::Device>, shader: vk::ShaderModule) -> ComputePipelineBuilder {
        ComputePipelineBuilder {
            device,
            shader,
            set_layouts: Vec::new(),
            push_constant_size: 0,
            constants: SpecializationConstants::default(),
        }
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Binds the pipeline and `set` at index 0.
    ///
    /// # Safety
    /// `cmd` is recording; `set` matches the pipeline's first set layout.
    pub unsafe fn bind(&self, cmd: vk::CommandBuffer, set: vk::DescriptorSet) {
        self.device
            .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, self.pipeline);
        self.device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::COMPUTE,
            self.layout,
            0,
            std::slice::from_ref(&set),
            &[],
        );
    }

    /// # Safety
    /// `cmd` is recording and this pipeline was built with push constants of type `T`.
    pub unsafe fn push_constants<T: Pod>(&self, cmd: vk::CommandBuffer, value: &T) {
        self.device.cmd_push_constants(
            cmd,
            self.layout,
            vk::ShaderStageFlags::COMPUTE,
            0,
            bytemuck::bytes_of(value),
        );
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

pub struct ComputePipelineBuilder {
    device: Arc<ash::Device>,
    shader: vk::ShaderModule,
    set_layouts: Vec<vk::DescriptorSetLayout>,
    push_constant_size: u32,
    constants: SpecializationConstants,
}

impl ComputePipelineBuilder {
    pub fn set_layout(mut self, layout: vk::DescriptorSetLayout) -> Self {
        self.set_layouts.push(layout);
        self
    }

    /// Declares a compute-stage push constant block of type `T` at offset 0.
    pub fn push_constants<T: Pod>(mut self) -> Self {
        self.push_constant_size = std::mem::size_of::<T>() as u32;
        self
    }

    pub fn specialization(mut self, constants: SpecializationConstants) -> Self {
        self.constants = constants;
        self
    }

    /// # Safety
    /// The shader module and set layouts must be valid for the builder's device.
    pub unsafe fn build(self) -> Result<ComputePipeline> {
        let ranges = [vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .offset(0)
            .size(self.push_constant_size)];
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&self.set_layouts)
            .push_constant_ranges(if self.push_constant_size > 0 { &ranges[..] } else { &[] });
        let layout = self
            .device
            .create_pipeline_layout(&layout_info, None)
            .map_err(|e| CullError::Vulkan(format!("Failed to create pipeline layout: {e}")))?;

        let specialization = vk::SpecializationInfo::default()
            .map_entries(self.constants.entries())
            .data(self.constants.data());
        let mut stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(self.shader)
            .name(c"main");
        if !self.constants.is_empty() {
            stage = stage.specialization_info(&specialization);
        }

        let info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(layout);
        let created = self.device.create_compute_pipelines(
            vk::PipelineCache::null(),
            std::slice::from_ref(&info),
            None,
        );
        let pipeline = match created {
            Ok(pipelines) => pipelines.into_iter().next(),
            Err((_, e)) => {
                self.device.destroy_pipeline_layout(layout, None);
                return Err(CullError::Vulkan(format!("Failed to create compute pipeline: {e}")));
            }
        };
        let Some(pipeline) = pipeline else {
            self.device.destroy_pipeline_layout(layout, None);
            return Err(CullError::Vulkan("driver returned no compute pipeline".to_string()));
        };

        log::debug!(
            "compute pipeline created ({} set layouts, {} specialization constants)",
            self.set_layouts.len(),
            self.constants.entries().len()
        );
        Ok(ComputePipeline {
            device: self.device,
            pipeline,
            layout,
        })
    }
}
