use std::sync::Arc;

use ash::vk;

use super::fence::{Fence, FenceState};
use super::logical_device::LogicalDevice;
use super::semaphore::Semaphore;

/// The synchronization primitives for pipelined rendering: one fence per
/// in-flight frame slot, plus optional swapchain semaphores when a window
/// is presenting.
#[derive(Debug)]
pub struct RenderSync {
    frame_rendering: Vec<Arc<Fence>>,
    image_available: Vec<Arc<Semaphore>>,
    render_finished: Vec<Arc<Semaphore>>,
}

impl RenderSync {
    pub fn new(
        device: &Arc<LogicalDevice>,
        in_flight_frames: usize,
        make_swapchain_semaphores: bool,
    ) -> anyhow::Result<RenderSync> {
        let mut frame_rendering = Vec::with_capacity(in_flight_frames);
        let mut image_available = Vec::new();
        let mut render_finished = Vec::new();
        for _ in 0..in_flight_frames {
            frame_rendering.push(Fence::new(device.clone(), FenceState::Signaled)?);
            if make_swapchain_semaphores {
                image_available.push(Semaphore::new(device.clone())?);
                render_finished.push(Semaphore::new(device.clone())?);
            }
        }
        Ok(RenderSync {
            frame_rendering,
            image_available,
            render_finished,
        })
    }

    /// Block until the GPU is done with the frame pipelined in `index`.
    pub fn wait_for_frame(&self, index: usize) -> anyhow::Result<()> {
        self.frame_rendering[index].wait()
    }

    pub fn reset_frame(&self, index: usize) -> anyhow::Result<()> {
        self.frame_rendering[index].reset()
    }

    pub fn frame_rendering(&self, index: usize) -> vk::Fence {
        self.frame_rendering[index].fence
    }

    pub fn image_available(&self, index: usize) -> vk::Semaphore {
        self.image_available[index].semaphore
    }

    pub fn render_finished(&self, index: usize) -> vk::Semaphore {
        self.render_finished[index].semaphore
    }
}
