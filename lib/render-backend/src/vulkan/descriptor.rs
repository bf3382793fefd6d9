use std::sync::Arc;

use ash::vk;

use super::logical_device::LogicalDevice;

/// Descriptor set layout shared by every Scinth of one ScinthDef.
pub struct DescriptorSetLayout {
    pub layout: vk::DescriptorSetLayout,

    device: Arc<LogicalDevice>,
}

impl std::fmt::Debug for DescriptorSetLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorSetLayout").finish()
    }
}

impl DescriptorSetLayout {
    pub fn new(
        device: Arc<LogicalDevice>,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> anyhow::Result<Arc<DescriptorSetLayout>> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
        let layout = unsafe {
            device
                .device
                .create_descriptor_set_layout(&create_info, None)
        }?;
        Ok(Arc::new(DescriptorSetLayout { layout, device }))
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .device
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// A per-Scinth descriptor pool; the sets allocated from it live exactly as
/// long as the pool, so they are freed wholesale with it.
pub struct DescriptorPool {
    pub pool: vk::DescriptorPool,

    pub device: Arc<LogicalDevice>,
}

impl std::fmt::Debug for DescriptorPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorPool").finish()
    }
}

impl DescriptorPool {
    pub fn new(
        device: Arc<LogicalDevice>,
        pool_sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
    ) -> anyhow::Result<Arc<DescriptorPool>> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(pool_sizes)
            .max_sets(max_sets);
        let pool = unsafe { device.device.create_descriptor_pool(&create_info, None) }?;
        Ok(Arc::new(DescriptorPool { pool, device }))
    }

    pub fn allocate(
        &self,
        layouts: &[vk::DescriptorSetLayout],
    ) -> ash::prelude::VkResult<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);
        unsafe { self.device.device.allocate_descriptor_sets(&alloc_info) }
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}
