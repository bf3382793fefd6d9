use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use ash::vk;
use log::{debug, error};
use parking_lot::{Condvar, Mutex};

use crate::vulkan::buffer::HostBuffer;
use crate::vulkan::command_buffer::CommandBuffers;
use crate::vulkan::command_pool::CommandPool;
use crate::vulkan::fence::{Fence, FenceState};
use crate::vulkan::image::{color_subresource_range, DeviceImage};
use crate::vulkan::logical_device::LogicalDevice;

struct PendingTransfer {
    source: Arc<HostBuffer>,
    target: Arc<DeviceImage>,
    completion: Box<dyn FnOnce() + Send>,
}

struct Batch {
    fence: Arc<Fence>,
    completions: Vec<Box<dyn FnOnce() + Send>>,
    // Keeps the recorded transfer commands and their resources alive until
    // the fence signals.
    _commands: Arc<CommandBuffers>,
}

#[derive(Default)]
struct WaitQueue {
    batches: Mutex<VecDeque<Batch>>,
    condition: Condvar,
}

/// Coalesces outstanding host-to-device transfers into one command buffer
/// per submission, with a callback thread that waits on the batch fence and
/// invokes per-transfer completions in submission order.
///
/// Clients registering a staging listener get poked the first time a
/// transfer becomes pending, so the render loop wakes up to submit.
pub struct StageManager {
    device: Arc<LogicalDevice>,
    command_pool: Arc<CommandPool>,
    pending: Mutex<Vec<PendingTransfer>>,
    staging_requested: Mutex<Option<Box<dyn Fn() + Send>>>,
    quit: Arc<AtomicBool>,
    wait_queue: Arc<WaitQueue>,
    callback_thread: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for StageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageManager").finish()
    }
}

impl StageManager {
    pub fn new(device: Arc<LogicalDevice>) -> anyhow::Result<StageManager> {
        let command_pool = CommandPool::new(device.clone())?;
        let quit = Arc::new(AtomicBool::new(false));
        let wait_queue = Arc::new(WaitQueue::default());

        let thread_quit = quit.clone();
        let thread_queue = wait_queue.clone();
        let callback_thread = std::thread::Builder::new()
            .name("stage_callbacks".to_string())
            .spawn(move || Self::callback_thread_main(&thread_quit, &thread_queue))
            .expect("spawning stage manager callback thread");

        Ok(StageManager {
            device,
            command_pool,
            pending: Mutex::new(Vec::new()),
            staging_requested: Mutex::new(None),
            quit,
            wait_queue,
            callback_thread: Mutex::new(Some(callback_thread)),
        })
    }

    /// Request a copy from `source` into `target`; `completion` fires on the
    /// callback thread after the transfer's fence has signaled.
    pub fn stage_image(
        &self,
        source: Arc<HostBuffer>,
        target: Arc<DeviceImage>,
        completion: Box<dyn FnOnce() + Send>,
    ) {
        let was_empty = {
            let mut pending = self.pending.lock();
            let was_empty = pending.is_empty();
            pending.push(PendingTransfer {
                source,
                target,
                completion,
            });
            was_empty
        };
        if was_empty {
            if let Some(listener) = self.staging_requested.lock().as_ref() {
                listener();
            }
        }
    }

    /// The listener is poked whenever the pending set transitions from
    /// empty to non-empty, typically to wake the render loop.
    pub fn set_staging_requested(&self, listener: Box<dyn Fn() + Send>) {
        *self.staging_requested.lock() = Some(listener);
    }

    pub fn has_pending_transfers(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    /// Record and submit every pending transfer in one command buffer.
    /// Called from the render loop when staging was requested.
    pub fn submit_transfer_commands(&self) -> anyhow::Result<()> {
        let transfers = std::mem::take(&mut *self.pending.lock());
        if transfers.is_empty() {
            return Ok(());
        }
        debug!("staging {} pending transfers", transfers.len());

        let commands = CommandBuffers::new(
            self.command_pool.clone(),
            vk::CommandBufferLevel::PRIMARY,
            1,
        )?;
        let buffer = commands.buffer(0);
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device.device.begin_command_buffer(buffer, &begin_info)?;
        }

        let mut completions = Vec::with_capacity(transfers.len());
        for transfer in transfers {
            self.record_transfer(buffer, &transfer);
            commands.associate_resource(transfer.source);
            commands.associate_resource(transfer.target);
            completions.push(transfer.completion);
        }

        unsafe {
            self.device.device.end_command_buffer(buffer)?;
        }

        let fence = Fence::new(self.device.clone(), FenceState::Unsignaled)?;
        let command_buffers = [buffer];
        let submit = vk::SubmitInfo::default().command_buffers(&command_buffers);
        self.device
            .submit_to_graphics_queue(&[submit], fence.fence)?;

        self.wait_queue.batches.lock().push_back(Batch {
            fence,
            completions,
            _commands: commands,
        });
        self.wait_queue.condition.notify_one();
        Ok(())
    }

    fn record_transfer(&self, buffer: vk::CommandBuffer, transfer: &PendingTransfer) {
        let to_transfer_dst = vk::ImageMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(transfer.target.image)
            .subresource_range(color_subresource_range());
        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D {
                width: transfer.target.width(),
                height: transfer.target.height(),
                depth: 1,
            });
        let to_shader_read = vk::ImageMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ)
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(transfer.target.image)
            .subresource_range(color_subresource_range());

        unsafe {
            self.device.device.cmd_pipeline_barrier(
                buffer,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer_dst],
            );
            self.device.device.cmd_copy_buffer_to_image(
                buffer,
                transfer.source.buffer,
                transfer.target.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
            self.device.device.cmd_pipeline_barrier(
                buffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_shader_read],
            );
        }
    }

    fn callback_thread_main(quit: &AtomicBool, wait_queue: &WaitQueue) {
        debug!("stage manager callback thread starting");
        while !quit.load(Ordering::SeqCst) {
            let batch = {
                let mut batches = wait_queue.batches.lock();
                wait_queue.condition.wait_while(&mut batches, |batches| {
                    !quit.load(Ordering::SeqCst) && batches.is_empty()
                });
                if quit.load(Ordering::SeqCst) {
                    break;
                }
                batches.pop_front()
            };
            let Some(batch) = batch else {
                continue;
            };
            if let Err(err) = batch.fence.wait() {
                error!("stage manager failed waiting on transfer fence: {err}");
                continue;
            }
            for completion in batch.completions {
                completion();
            }
        }
        debug!("stage manager callback thread exiting");
    }

    /// Stop the callback thread. Pending batches are dropped; their
    /// completions never fire.
    pub fn stop(&self) {
        if !self.quit.swap(true, Ordering::SeqCst) {
            self.wait_queue.condition.notify_all();
            if let Some(thread) = self.callback_thread.lock().take() {
                let _ = thread.join();
            }
        }
    }
}

impl Drop for StageManager {
    fn drop(&mut self) {
        self.stop();
    }
}
