use std::any::Any;
use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use super::command_pool::CommandPool;

/// A set of command buffers, one per pipelined image slot, allocated from a
/// shared pool.
///
/// Holds shared references to any resources its recorded commands touch so
/// those resources outlive every queue submission of these buffers.
pub struct CommandBuffers {
    buffers: Vec<vk::CommandBuffer>,
    retained: Mutex<Vec<Arc<dyn Any + Send + Sync>>>,

    pub pool: Arc<CommandPool>,
}

impl std::fmt::Debug for CommandBuffers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffers")
            .field("count", &self.buffers.len())
            .finish()
    }
}

impl CommandBuffers {
    pub fn new(
        pool: Arc<CommandPool>,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> anyhow::Result<Arc<CommandBuffers>> {
        let buffers = pool.allocate(level, count)?;
        Ok(Arc::new(CommandBuffers {
            buffers,
            retained: Mutex::new(Vec::new()),
            pool,
        }))
    }

    pub fn buffer(&self, index: usize) -> vk::CommandBuffer {
        self.buffers[index]
    }

    pub fn count(&self) -> usize {
        self.buffers.len()
    }

    /// Retain a resource for the recorded lifetime of these buffers.
    pub fn associate_resource(&self, resource: Arc<dyn Any + Send + Sync>) {
        self.retained.lock().push(resource);
    }
}

impl Drop for CommandBuffers {
    fn drop(&mut self) {
        self.pool.free(&self.buffers);
    }
}
