use ash::vk;
use std::sync::Arc;

use crate::{CullError, Result};

/// Command pool bound to one queue family.
///
/// The culling frame needs two kinds of command buffers: the compute buffer
/// recorded once and resubmitted every frame ([`CommandPool::record`]) and
/// short setup work submitted once and waited on
/// ([`CommandPool::submit_one_time`]). Buffers live as long as the pool.
pub struct CommandPool {
    device: Arc<ash::Device>,
    pool: vk::CommandPool,
    family: u32,
    allocated: Vec<vk::CommandBuffer>,
}

impl CommandPool {
    pub fn new(device: Arc<ash::Device>, family: u32) -> Result<Self> {
        let info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool = unsafe { device.create_command_pool(&info, None) }
            .map_err(|e| CullError::Vulkan(format!("Failed to create command pool: {e}")))?;

        log::debug!("command pool created for queue family {family}");
        Ok(Self {
            device,
            pool,
            family,
            allocated: Vec::new(),
        })
    }

    pub fn family(&self) -> u32 {
        self.family
    }

    fn allocate(&mut self) -> Result<vk::CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = unsafe { self.device.allocate_command_buffers(&info) }
            .map_err(|e| CullError::Vulkan(format!("Failed to allocate command buffer: {e}")))?
            .into_iter()
            .next()
            .ok_or_else(|| CullError::Vulkan("driver returned no command buffer".to_string()))?;
        self.allocated.push(cmd);
        Ok(cmd)
    }

    /// Allocates a primary buffer and records `body` into it for repeated submission.
    ///
    /// # Safety
    /// Every command `body` records must be valid on this pool's queue family.
    pub unsafe fn record<F>(&mut self, body: F) -> Result<vk::CommandBuffer>
    where
        F: FnOnce(vk::CommandBuffer) -> Result<()>,
    {
        let cmd = self.allocate()?;
        self.device
            .begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default())
            .map_err(|e| CullError::Vulkan(format!("Failed to begin command buffer: {e}")))?;
        body(cmd)?;
        self.device
            .end_command_buffer(cmd)
            .map_err(|e| CullError::Vulkan(format!("Failed to end command buffer: {e}")))?;
        Ok(cmd)
    }

    /// Records `body`, submits it to `queue` and blocks until the queue is idle.
    ///
    /// # Safety
    /// `queue` belongs to this pool's family; as for [`CommandPool::record`].
    pub unsafe fn submit_one_time<F>(&mut self, queue: vk::Queue, body: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer) -> Result<()>,
    {
        let cmd = self.allocate()?;
        self.device.begin_command_buffer(
            cmd,
            &vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
        )?;
        body(cmd)?;
        self.device.end_command_buffer(cmd)?;

        let submit = vk::SubmitInfo::default().command_buffers(std::slice::from_ref(&cmd));
        self.device
            .queue_submit(queue, std::slice::from_ref(&submit), vk::Fence::null())?;
        self.device.queue_wait_idle(queue)?;
        Ok(())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            if !self.allocated.is_empty() {
                self.device.free_command_buffers(self.pool, &self.allocated);
            }
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}
