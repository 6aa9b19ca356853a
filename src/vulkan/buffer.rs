use ash::vk;
use bytemuck::Pod;

use crate::sync::{TransferHandle, TransferTarget, Transferable};
use crate::vulkan::Allocator;
use crate::{CullError, Result};

pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub allocation: vk_mem::Allocation,
    pub size: u64,
}

impl GpuBuffer {
    /// Host-writable buffer (instances, LODs, commands, uniforms).
    ///
    /// # Safety
    /// Must be destroyed with [`destroy`](Self::destroy) on the same allocator.
    pub unsafe fn new(allocator: &Allocator, size: u64, usage: vk::BufferUsageFlags) -> Result<Self> {
        let (buffer, allocation) =
            allocator.create_buffer(size, usage, vk_mem::MemoryUsage::AutoPreferHost)?;
        Ok(Self {
            buffer,
            allocation,
            size,
        })
    }

    /// Host-coherent buffer read back after the frame fence.
    ///
    /// # Safety
    /// Must be destroyed with [`destroy`](Self::destroy) on the same allocator.
    pub unsafe fn readback(allocator: &Allocator, size: u64, usage: vk::BufferUsageFlags) -> Result<Self> {
        let (buffer, allocation) = allocator.create_readback_buffer(size, usage)?;
        Ok(Self {
            buffer,
            allocation,
            size,
        })
    }

    /// Creates a buffer sized for `data` and uploads it.
    ///
    /// # Safety
    /// Same contract as [`new`](Self::new).
    pub unsafe fn with_data<T: Pod>(
        allocator: &Allocator,
        data: &[T],
        usage: vk::BufferUsageFlags,
    ) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let mut buffer = Self::new(allocator, bytes.len().max(1) as u64, usage)?;
        buffer.write(allocator, data)?;
        Ok(buffer)
    }

    /// Copies `data` to the start of the buffer.
    ///
    /// # Safety
    /// The device must not be accessing the buffer.
    pub unsafe fn write<T: Pod>(&mut self, allocator: &Allocator, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.len() as u64 > self.size {
            return Err(CullError::Vulkan(format!(
                "write of {} bytes exceeds buffer of {} bytes",
                bytes.len(),
                self.size
            )));
        }
        let ptr = allocator
            .vma
            .map_memory(&mut self.allocation)
            .map_err(|e| CullError::Vulkan(format!("Failed to map buffer: {e:?}")))?;
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len());
        allocator.vma.unmap_memory(&mut self.allocation);
        Ok(())
    }

    /// Reads a `T` from the start of the buffer.
    ///
    /// # Safety
    /// The device must have finished writing the buffer.
    pub unsafe fn read<T: Pod>(&mut self, allocator: &Allocator) -> Result<T> {
        let len = std::mem::size_of::<T>();
        if len as u64 > self.size {
            return Err(CullError::Vulkan(format!(
                "read of {} bytes exceeds buffer of {} bytes",
                len, self.size
            )));
        }
        let ptr = allocator
            .vma
            .map_memory(&mut self.allocation)
            .map_err(|e| CullError::Vulkan(format!("Failed to map buffer: {e:?}")))?;
        let value = bytemuck::pod_read_unaligned(std::slice::from_raw_parts(ptr, len));
        allocator.vma.unmap_memory(&mut self.allocation);
        Ok(value)
    }

    pub fn descriptor(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset: 0,
            range: self.size,
        }
    }

    /// # Safety
    /// The device must no longer use the buffer.
    pub unsafe fn destroy(&mut self, allocator: &Allocator) {
        allocator.destroy_buffer(self.buffer, &mut self.allocation);
        self.buffer = vk::Buffer::null();
    }
}

/// A device resource named by its transfer target, for barrier planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceResource {
    pub target: TransferTarget,
    pub handle: TransferHandle,
}

impl DeviceResource {
    pub fn buffer(target: TransferTarget, buffer: &GpuBuffer) -> Self {
        Self {
            target,
            handle: TransferHandle::Buffer {
                buffer: buffer.buffer,
                offset: 0,
                size: vk::WHOLE_SIZE,
            },
        }
    }

    pub fn depth_image(image: vk::Image, aspect: vk::ImageAspectFlags) -> Self {
        Self {
            target: TransferTarget::DepthImage,
            handle: TransferHandle::Image { image, aspect },
        }
    }
}

impl Transferable for DeviceResource {
    fn target(&self) -> TransferTarget {
        self.target
    }

    fn handle(&self) -> TransferHandle {
        self.handle
    }
}
