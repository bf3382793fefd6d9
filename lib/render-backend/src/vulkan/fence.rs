use std::sync::Arc;

use anyhow::anyhow;
use ash::vk;

use super::logical_device::LogicalDevice;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceState {
    Signaled,
    Unsignaled,
}

pub struct Fence {
    pub fence: vk::Fence,

    device: Arc<LogicalDevice>,
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence").finish()
    }
}

impl Fence {
    pub fn new(device: Arc<LogicalDevice>, state: FenceState) -> anyhow::Result<Arc<Fence>> {
        let flags = match state {
            FenceState::Signaled => vk::FenceCreateFlags::SIGNALED,
            FenceState::Unsignaled => vk::FenceCreateFlags::empty(),
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.device.create_fence(&create_info, None) }?;
        Ok(Arc::new(Fence { fence, device }))
    }

    pub fn wait(&self) -> anyhow::Result<()> {
        unsafe {
            self.device
                .device
                .wait_for_fences(&[self.fence], true, u64::MAX)
        }
        .map_err(|err| anyhow!("waiting on fence failed: {err}"))
    }

    pub fn reset(&self) -> anyhow::Result<()> {
        unsafe { self.device.device.reset_fences(&[self.fence]) }
            .map_err(|err| anyhow!("resetting fence failed: {err}"))
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_fence(self.fence, None);
        }
    }
}
