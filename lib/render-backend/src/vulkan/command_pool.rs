use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use super::logical_device::LogicalDevice;

/// A command pool on the graphics queue family. Allocation is serialized by
/// the pool lock; recorded buffers are reset individually.
pub struct CommandPool {
    pool: Mutex<vk::CommandPool>,

    pub device: Arc<LogicalDevice>,
}

impl std::fmt::Debug for CommandPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandPool").finish()
    }
}

impl CommandPool {
    pub fn new(device: Arc<LogicalDevice>) -> anyhow::Result<Arc<CommandPool>> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.phy_device.graphics_queue_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool = unsafe { device.device.create_command_pool(&create_info, None) }?;
        Ok(Arc::new(CommandPool {
            pool: Mutex::new(pool),
            device,
        }))
    }

    pub(super) fn allocate(
        &self,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> ash::prelude::VkResult<Vec<vk::CommandBuffer>> {
        let pool = self.pool.lock();
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(*pool)
            .level(level)
            .command_buffer_count(count);
        unsafe { self.device.device.allocate_command_buffers(&alloc_info) }
    }

    pub(super) fn free(&self, buffers: &[vk::CommandBuffer]) {
        if buffers.is_empty() {
            return;
        }
        let pool = self.pool.lock();
        unsafe {
            self.device.device.free_command_buffers(*pool, buffers);
        }
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        let pool = self.pool.lock();
        unsafe {
            self.device.device.destroy_command_pool(*pool, None);
        }
    }
}
