use ash::vk;
use vk_mem::Alloc;

use crate::vulkan::VulkanContext;
use crate::{CullError, Result};

pub struct Allocator {
    pub vma: vk_mem::Allocator,
}

impl Allocator {
    /// Creates a VMA allocator for the culling resources.
    ///
    /// # Safety
    ///
    /// - `context` references a valid and initialized Vulkan device
    /// - All buffers and images allocated here are destroyed before the allocator is dropped
    pub unsafe fn new(context: &VulkanContext) -> Result<Self> {
        let vma = vk_mem::Allocator::new(vk_mem::AllocatorCreateInfo::new(
            &context.instance,
            &context.device,
            context.physical_device,
        ))
        .map_err(|e| CullError::Vulkan(format!("VMA init failed: {e:?}")))?;

        log::info!("VMA allocator created");

        Ok(Self { vma })
    }

    /// Allocates a buffer. Host-preferring memory is mapped for sequential writes.
    ///
    /// # Safety
    ///
    /// The returned allocation must be released with [`destroy_buffer`](Self::destroy_buffer)
    /// before the allocator is dropped.
    pub unsafe fn create_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        memory_usage: vk_mem::MemoryUsage,
    ) -> Result<(vk::Buffer, vk_mem::Allocation)> {
        let flags = if memory_usage == vk_mem::MemoryUsage::AutoPreferHost {
            vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE
        } else {
            vk_mem::AllocationCreateFlags::empty()
        };
        self.create_buffer_with(
            size,
            usage,
            &vk_mem::AllocationCreateInfo {
                usage: memory_usage,
                flags,
                ..Default::default()
            },
        )
    }

    /// Allocates a host-coherent buffer the host reads back after the frame fence.
    ///
    /// # Safety
    /// Same contract as [`create_buffer`](Self::create_buffer).
    pub unsafe fn create_readback_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
    ) -> Result<(vk::Buffer, vk_mem::Allocation)> {
        self.create_buffer_with(
            size,
            usage,
            &vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferHost,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
                required_flags: vk::MemoryPropertyFlags::HOST_VISIBLE
                    | vk::MemoryPropertyFlags::HOST_COHERENT,
                ..Default::default()
            },
        )
    }

    unsafe fn create_buffer_with(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        allocation_info: &vk_mem::AllocationCreateInfo,
    ) -> Result<(vk::Buffer, vk_mem::Allocation)> {
        self.vma
            .create_buffer(
                &vk::BufferCreateInfo::default()
                    .size(size)
                    .usage(usage)
                    .sharing_mode(vk::SharingMode::EXCLUSIVE),
                allocation_info,
            )
            .map_err(|e| CullError::Vulkan(format!("Buffer creation failed: {e:?}")))
    }

    /// Creates a device-local image.
    ///
    /// # Safety
    /// The image must be destroyed with [`destroy_image`](Self::destroy_image) once the
    /// device no longer uses it.
    pub unsafe fn create_image(
        &self,
        image_info: &vk::ImageCreateInfo,
    ) -> Result<(vk::Image, vk_mem::Allocation)> {
        self.vma
            .create_image(
                image_info,
                &vk_mem::AllocationCreateInfo {
                    usage: vk_mem::MemoryUsage::AutoPreferDevice,
                    ..Default::default()
                },
            )
            .map_err(|e| CullError::Vulkan(format!("Image creation failed: {e:?}")))
    }

    /// # Safety
    /// `buffer` was allocated here and is no longer in use by the device.
    pub unsafe fn destroy_buffer(&self, buffer: vk::Buffer, allocation: &mut vk_mem::Allocation) {
        self.vma.destroy_buffer(buffer, allocation);
    }

    /// # Safety
    /// `image` was allocated here and is no longer in use by the device.
    pub unsafe fn destroy_image(&self, image: vk::Image, allocation: &mut vk_mem::Allocation) {
        self.vma.destroy_image(image, allocation);
    }
}

impl Drop for Allocator {
    fn drop(&mut self) {
        log::info!("VMA allocator destroyed");
    }
}
