use std::sync::Arc;

use parking_lot::Mutex;

use crate::scinth::Scinth;
use crate::vulkan::command_buffer::CommandBuffers;
use crate::vulkan::image::DeviceImage;

/// Everything one pipelined frame holds while the GPU may still be reading
/// it. The render loop keeps one context per image slot and resets a slot's
/// context only after that slot's fence has signaled, so Scinths and
/// command buffers deleted from the tree mid-flight stay alive here until
/// their last submission retires.
pub struct FrameContext {
    image_index: usize,
    frame_time: f64,
    nodes: Vec<Arc<Mutex<Scinth>>>,
    compute_commands: Vec<Arc<CommandBuffers>>,
    draw_commands: Vec<Arc<CommandBuffers>>,
    images: Vec<Arc<DeviceImage>>,
    compute_primary: Option<Arc<CommandBuffers>>,
    draw_primary: Option<Arc<CommandBuffers>>,
}

impl std::fmt::Debug for FrameContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameContext")
            .field("image_index", &self.image_index)
            .field("frame_time", &self.frame_time)
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

impl FrameContext {
    pub fn new(image_index: usize) -> FrameContext {
        FrameContext {
            image_index,
            frame_time: 0.0,
            nodes: Vec::new(),
            compute_commands: Vec::new(),
            draw_commands: Vec::new(),
            images: Vec::new(),
            compute_primary: None,
            draw_primary: None,
        }
    }

    /// Drop every reference retained for the previous use of this slot and
    /// prepare for a new frame at `frame_time`.
    pub fn reset(&mut self, frame_time: f64) {
        self.frame_time = frame_time;
        self.nodes.clear();
        self.compute_commands.clear();
        self.draw_commands.clear();
        self.images.clear();
        self.compute_primary = None;
        self.draw_primary = None;
    }

    pub fn append_node(&mut self, node: Arc<Mutex<Scinth>>) {
        self.nodes.push(node);
    }

    pub fn append_compute_commands(&mut self, commands: Arc<CommandBuffers>) {
        self.compute_commands.push(commands);
    }

    pub fn append_draw_commands(&mut self, commands: Arc<CommandBuffers>) {
        self.draw_commands.push(commands);
    }

    pub fn append_image(&mut self, image: Arc<DeviceImage>) {
        self.images.push(image);
    }

    pub fn set_compute_primary(&mut self, commands: Arc<CommandBuffers>) {
        self.compute_primary = Some(commands);
    }

    pub fn set_draw_primary(&mut self, commands: Arc<CommandBuffers>) {
        self.draw_primary = Some(commands);
    }

    pub fn image_index(&self) -> usize {
        self.image_index
    }

    pub fn frame_time(&self) -> f64 {
        self.frame_time
    }

    pub fn draw_commands(&self) -> &[Arc<CommandBuffers>] {
        &self.draw_commands
    }

    pub fn compute_primary(&self) -> Option<&Arc<CommandBuffers>> {
        self.compute_primary.as_ref()
    }

    pub fn draw_primary(&self) -> Option<&Arc<CommandBuffers>> {
        self.draw_primary.as_ref()
    }
}
