use std::sync::Arc;

use ash::vk;

use super::logical_device::LogicalDevice;

pub struct Semaphore {
    pub semaphore: vk::Semaphore,

    device: Arc<LogicalDevice>,
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore").finish()
    }
}

impl Semaphore {
    pub fn new(device: Arc<LogicalDevice>) -> anyhow::Result<Arc<Semaphore>> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.device.create_semaphore(&create_info, None) }?;
        Ok(Arc::new(Semaphore { semaphore, device }))
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_semaphore(self.semaphore, None);
        }
    }
}
