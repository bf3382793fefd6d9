use std::sync::Arc;

use anyhow::anyhow;
use ash::vk;
use parking_lot::Mutex;

use super::instance::Instance;
use super::phy_device::PhyDevice;

/// The logical device and its single graphics queue. Submission is
/// serialized through the queue lock since the render thread and the
/// staging path both submit here.
pub struct LogicalDevice {
    pub device: ash::Device,
    graphics_queue: Mutex<vk::Queue>,

    // Has to outlive the device.
    pub phy_device: Arc<PhyDevice>,
}

impl std::fmt::Debug for LogicalDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicalDevice")
            .field("phy_device", &self.phy_device)
            .finish()
    }
}

impl LogicalDevice {
    pub fn new(phy_device: Arc<PhyDevice>, with_swapchain: bool) -> anyhow::Result<Arc<Self>> {
        let queue_priorities = [1.0];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(phy_device.graphics_queue_index)
            .queue_priorities(&queue_priorities)];

        let mut extensions: Vec<*const std::os::raw::c_char> = Vec::new();
        if with_swapchain {
            extensions.push(vk::KHR_SWAPCHAIN_NAME.as_ptr());
        }

        let features = vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(phy_device.supports_sampler_anisotropy);
        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe {
            phy_device
                .instance
                .vk_instance
                .create_device(phy_device.cur_device, &create_info, None)
        }
        .map_err(|err| anyhow!("creating logical device failed: {err}"))?;

        let graphics_queue =
            unsafe { device.get_device_queue(phy_device.graphics_queue_index, 0) };

        Ok(Arc::new(LogicalDevice {
            device,
            graphics_queue: Mutex::new(graphics_queue),
            phy_device,
        }))
    }

    /// Convenience constructor: instance, physical device pick, and device
    /// creation in one call for the headless server path.
    pub fn create_headless(with_validation: bool) -> anyhow::Result<Arc<Self>> {
        let instance = Instance::new(with_validation)?;
        let phy_device = PhyDevice::choose(&instance)?;
        Self::new(phy_device, false)
    }

    pub fn submit_to_graphics_queue(
        &self,
        submits: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> anyhow::Result<()> {
        let queue = self.graphics_queue.lock();
        unsafe { self.device.queue_submit(*queue, submits, fence) }
            .map_err(|err| anyhow!("graphics queue submit failed: {err}"))
    }

    pub fn with_graphics_queue<R>(&self, f: impl FnOnce(vk::Queue) -> R) -> R {
        let queue = self.graphics_queue.lock();
        f(*queue)
    }

    pub fn wait_idle(&self) {
        // Best effort at shutdown, a lost device fails this anyway.
        let _ = unsafe { self.device.device_wait_idle() };
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_device(None);
        }
    }
}
