use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::anyhow;
use ash::vk;
use log::{error, info, warn};
use parking_lot::{Condvar, Mutex};

use crate::canvas::Canvas;
use crate::encode::{BufferPool, Encoder, ScreenShotEncoder, SendBuffer};
use crate::frame_context::FrameContext;
use crate::frame_timer::FrameTimer;
use crate::root_node::RootNode;
use crate::vulkan::command_buffer::CommandBuffers;
use crate::vulkan::command_pool::CommandPool;
use crate::vulkan::image::{color_subresource_range, DeviceImage, HostImage};
use crate::vulkan::logical_device::LogicalDevice;
use crate::vulkan::render_sync::RenderSync;
use crate::vulkan::swapchain::Swapchain;

const FRAMEBUFFER_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

struct RenderRequest {
    render: bool,
    swap_blit_requested: bool,
    staging_requested: bool,
    swapchain_image_index: u32,
    delta_time: f64,
    flush_callback: Option<Box<dyn FnOnce(usize) + Send>>,
}

struct SwapSupport {
    swapchain: Arc<Swapchain>,
    render_sync: RenderSync,
    // The ith entry blits from the ith framebuffer image; its jth buffer
    // targets the jth swapchain image.
    blit_commands: Vec<Arc<CommandBuffers>>,
}

/// Drives rendering without a window: owns the pipelined framebuffer
/// images, per-slot fences, and host-visible readback images feeding the
/// encoders.
///
/// Two modes: free-running advances time by `1 / frame_rate` per iteration;
/// snapshot (frame rate zero) blocks until `advance_frame` requests one
/// frame and invokes its callback after the submit has signaled.
pub struct Offscreen {
    device: Arc<LogicalDevice>,
    width: u32,
    height: u32,
    frame_rate: i32,
    snap_shot_mode: bool,
    number_of_images: usize,

    canvas: Arc<Canvas>,
    render_sync: RenderSync,
    command_pool: Arc<CommandPool>,
    readback_images: Vec<Arc<HostImage>>,
    readback_commands: Arc<CommandBuffers>,
    buffer_pool: BufferPool,
    frame_timer: Mutex<FrameTimer>,

    encoders: Mutex<Vec<Box<dyn Encoder>>>,
    swap_support: Mutex<Option<SwapSupport>>,

    quit: AtomicBool,
    state: Mutex<RenderRequest>,
    render_condition: Condvar,
    render_thread: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Offscreen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Offscreen")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("frame_rate", &self.frame_rate)
            .field("images", &self.number_of_images)
            .finish()
    }
}

impl Offscreen {
    /// Create the offscreen renderer pipelined across `number_of_images`
    /// frames (at least 2). More pipelining costs GPU memory and latency
    /// between render and encode but can increase throughput.
    pub fn new(
        device: Arc<LogicalDevice>,
        width: u32,
        height: u32,
        frame_rate: i32,
        number_of_images: usize,
    ) -> anyhow::Result<Arc<Offscreen>> {
        let number_of_images = number_of_images.max(2);
        info!("creating Offscreen renderer with {number_of_images} images");

        let mut framebuffer_images = Vec::with_capacity(number_of_images);
        for _ in 0..number_of_images {
            framebuffer_images.push(DeviceImage::new_framebuffer_attachment(
                device.clone(),
                FRAMEBUFFER_FORMAT,
                width,
                height,
            )?);
        }
        let canvas = Canvas::new(
            device.clone(),
            framebuffer_images,
            vk::Extent2D { width, height },
        )?;
        let render_sync = RenderSync::new(&device, number_of_images, false)?;
        let command_pool = CommandPool::new(device.clone())?;

        let mut readback_images = Vec::with_capacity(number_of_images);
        for _ in 0..number_of_images {
            readback_images.push(HostImage::new(device.clone(), width, height)?);
        }

        // Prefer blit when the device can blit between the framebuffer and
        // readback formats, otherwise fall back to a raw image copy.
        let framebuffer_props = device.phy_device.format_properties(FRAMEBUFFER_FORMAT);
        let readback_props = device
            .phy_device
            .format_properties(readback_images[0].format());
        let mut readback_supports_blit = true;
        if !framebuffer_props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::BLIT_SRC)
        {
            warn!("framebuffer format doesn't support blit source, readback will be slow");
            readback_supports_blit = false;
        }
        if !readback_props
            .linear_tiling_features
            .contains(vk::FormatFeatureFlags::BLIT_DST)
        {
            warn!("readback image format doesn't support blit destination, readback will be slow");
            readback_supports_blit = false;
        }

        let readback_commands = CommandBuffers::new(
            command_pool.clone(),
            vk::CommandBufferLevel::PRIMARY,
            number_of_images as u32,
        )?;
        for i in 0..number_of_images {
            let source = canvas.image(i);
            let target = &readback_images[i];
            if readback_supports_blit {
                Self::write_blit_commands(
                    &device,
                    readback_commands.buffer(i),
                    source.image,
                    target.image,
                    width,
                    height,
                    vk::ImageLayout::GENERAL,
                )?;
            } else {
                Self::write_copy_commands(
                    &device,
                    readback_commands.buffer(i),
                    source.image,
                    target.image,
                    width,
                    height,
                )?;
            }
            readback_commands.associate_resource(source.clone());
            readback_commands.associate_resource(target.clone());
        }

        let snap_shot_mode = frame_rate == 0;
        let delta_time = if frame_rate > 0 {
            1.0 / frame_rate as f64
        } else {
            0.0
        };

        Ok(Arc::new(Offscreen {
            width,
            height,
            frame_rate,
            snap_shot_mode,
            number_of_images,
            canvas,
            render_sync,
            command_pool,
            readback_images,
            readback_commands,
            buffer_pool: BufferPool::new(width, height),
            frame_timer: Mutex::new(FrameTimer::new(frame_rate)),
            encoders: Mutex::new(Vec::new()),
            swap_support: Mutex::new(None),
            quit: AtomicBool::new(false),
            state: Mutex::new(RenderRequest {
                render: frame_rate > 0,
                swap_blit_requested: false,
                staging_requested: false,
                swapchain_image_index: 0,
                delta_time,
                flush_callback: None,
            }),
            render_condition: Condvar::new(),
            render_thread: Mutex::new(None),
            device,
        }))
    }

    pub fn canvas(&self) -> &Arc<Canvas> {
        &self.canvas
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_snap_shot_mode(&self) -> bool {
        self.snap_shot_mode
    }

    pub fn frame_timer_stats(&self) -> crate::frame_timer::FrameTimerStats {
        self.frame_timer.lock().stats()
    }

    /// Prepare blit command buffers from each framebuffer image to each
    /// swapchain image, so a window thread can schedule presents without
    /// its own queue.
    pub fn support_swapchain(
        self: &Arc<Self>,
        swapchain: Arc<Swapchain>,
    ) -> anyhow::Result<()> {
        let render_sync = RenderSync::new(&self.device, 1, true)?;
        let mut blit_commands = Vec::with_capacity(self.number_of_images);
        for i in 0..self.number_of_images {
            let commands = CommandBuffers::new(
                self.command_pool.clone(),
                vk::CommandBufferLevel::PRIMARY,
                swapchain.number_of_images() as u32,
            )?;
            for j in 0..swapchain.number_of_images() {
                Self::write_blit_commands(
                    &self.device,
                    commands.buffer(j),
                    self.canvas.image(i).image,
                    swapchain.image(j),
                    self.width,
                    self.height,
                    vk::ImageLayout::PRESENT_SRC_KHR,
                )?;
            }
            commands.associate_resource(self.canvas.image(i).clone());
            blit_commands.push(commands);
        }
        *self.swap_support.lock() = Some(SwapSupport {
            swapchain,
            render_sync,
            blit_commands,
        });
        Ok(())
    }

    /// Acquire the next swapchain image, signaling the blit wait semaphore.
    /// The window layer calls this before `request_swapchain_blit`.
    pub fn acquire_swapchain_image(&self) -> anyhow::Result<u32> {
        let support = self.swap_support.lock();
        let support = support
            .as_ref()
            .ok_or_else(|| anyhow!("no swapchain configured"))?;
        support
            .swapchain
            .acquire_next_image(support.render_sync.image_available(0))
    }

    /// Add a frame sink called with readback contents of subsequent frames.
    pub fn add_encoder(&self, encoder: Box<dyn Encoder>) {
        self.encoders.lock().push(encoder);
    }

    /// Queue a one-frame PNG capture of the next rendered frame.
    pub fn screen_shot(
        &self,
        file_path: PathBuf,
        mime_type: &str,
        completion: Box<dyn FnOnce(bool) + Send>,
    ) {
        if !matches!(mime_type, "image/png" | "") {
            warn!("screen shot only supports image/png, got {mime_type}");
            completion(false);
            return;
        }
        self.add_encoder(Box::new(ScreenShotEncoder::new(file_path, completion)));
    }

    /// Ask the render thread to blit the most recent frame contents to the
    /// given swapchain image and present it.
    pub fn request_swapchain_blit(&self, swapchain_image_index: u32) {
        {
            let mut state = self.state.lock();
            if state.swap_blit_requested {
                error!("Offscreen already had swapchain blit requested");
                return;
            }
            state.swap_blit_requested = true;
            state.swapchain_image_index = swapchain_image_index;
        }
        self.render_condition.notify_one();
    }

    /// In snapshot mode, render one frame, advance time by `dt`, and call
    /// `callback` with the frame number after submit and fence.
    pub fn advance_frame(&self, dt: f64, callback: Box<dyn FnOnce(usize) + Send>) {
        if !self.snap_shot_mode {
            error!("Offscreen got advance_frame request but not in snapshot mode");
            return;
        }
        {
            let mut state = self.state.lock();
            if state.render {
                warn!("Offscreen detects snapshot render already requested, ignoring");
                return;
            }
            state.delta_time = dt;
            state.flush_callback = Some(callback);
            state.render = true;
        }
        self.render_condition.notify_one();
    }

    /// Run the render loop on a new thread.
    pub fn run_threaded(self: &Arc<Self>, root_node: Arc<RootNode>) {
        let this = self.clone();
        let thread = std::thread::Builder::new()
            .name("render".to_string())
            .spawn(move || this.thread_main(&root_node))
            .expect("spawning render thread");
        *self.render_thread.lock() = Some(thread);
    }

    /// Run the render loop on the calling thread until `stop`.
    pub fn run(self: &Arc<Self>, root_node: &Arc<RootNode>) {
        self.thread_main(root_node);
    }

    pub fn stop(&self) {
        self.quit.store(true, Ordering::SeqCst);
        self.render_condition.notify_one();
        if let Some(thread) = self.render_thread.lock().take() {
            let _ = thread.join();
        }
    }

    fn thread_main(self: &Arc<Self>, root_node: &Arc<RootNode>) {
        info!("Offscreen render thread starting up");

        {
            let this = self.clone();
            root_node
                .stage_manager()
                .set_staging_requested(Box::new(move || {
                    this.state.lock().staging_requested = true;
                    this.render_condition.notify_one();
                }));
            // Transfers staged before the listener existed still need a
            // first submission.
            if root_node.stage_manager().has_pending_transfers() {
                self.state.lock().staging_requested = true;
            }
        }

        let mut time = 0.0f64;
        let mut frame_number = 0usize;
        let mut frame_index = 0usize;
        let mut contexts: Vec<FrameContext> =
            (0..self.number_of_images).map(FrameContext::new).collect();
        let mut pending_encodes: Vec<Vec<SendBuffer>> = (0..self.number_of_images)
            .map(|_| Vec::new())
            .collect();

        self.frame_timer.lock().start();

        while !self.quit.load(Ordering::SeqCst) {
            let mut flush = false;
            let mut flush_callback = None;
            let render;
            let stage;
            let swap_blit;
            let swap_image_index;
            let delta_time;
            {
                let mut state = self.state.lock();
                self.render_condition.wait_while(&mut state, |state| {
                    !self.quit.load(Ordering::SeqCst)
                        && !(state.swap_blit_requested || state.staging_requested || state.render)
                });
                if self.quit.load(Ordering::SeqCst) {
                    break;
                }

                render = state.render && !state.swap_blit_requested;
                stage = state.staging_requested;
                swap_blit = state.swap_blit_requested;
                swap_image_index = state.swapchain_image_index;
                delta_time = state.delta_time;

                state.staging_requested = false;
                state.swap_blit_requested = false;

                // Zero frame rate turns the render flag back off so the loop
                // blocks again after this snapshot.
                if render && self.frame_rate == 0 {
                    state.render = false;
                    flush = true;
                    state.delta_time = 0.0;
                    flush_callback = state.flush_callback.take();
                }
            }

            if stage {
                if let Err(err) = root_node.stage_manager().submit_transfer_commands() {
                    error!("staging submit failed: {err}");
                }
            }
            if swap_blit {
                if let Err(err) = self.blit_and_present(frame_index, swap_image_index) {
                    error!("swapchain blit failed: {err}");
                }
                continue;
            }
            if !render {
                continue;
            }

            // Wait for rendering and readback of the previous frame
            // pipelined in this slot.
            if let Err(err) = self.render_sync.wait_for_frame(frame_index) {
                error!("failed waiting for frame fence: {err}");
                break;
            }

            self.frame_timer.lock().mark_frame();
            self.process_pending_encodes(frame_index, &mut pending_encodes);

            let context = &mut contexts[frame_index];
            context.reset(time);
            root_node.prepare_frame(context);

            let mut command_buffers: Vec<vk::CommandBuffer> = Vec::new();
            match context.draw_primary() {
                Some(primary) => command_buffers.push(primary.buffer(frame_index)),
                None => {
                    error!("no primary command buffer prepared, stopping render loop");
                    break;
                }
            }

            // Collect the encoder sends this frame has to fill; with any
            // active the readback copy joins the submission.
            let mut encode_requests: Vec<SendBuffer> = Vec::new();
            {
                let mut encoders = self.encoders.lock();
                encoders.retain_mut(|encoder| {
                    let (send, keep) = encoder.queue_encode(time, frame_number);
                    if let Some(send) = send {
                        encode_requests.push(send);
                    }
                    keep
                });
            }
            if !encode_requests.is_empty() {
                command_buffers.push(self.readback_commands.buffer(frame_index));
            }
            pending_encodes[frame_index] = encode_requests;

            if let Err(err) = self.render_sync.reset_frame(frame_index) {
                error!("failed resetting frame fence: {err}");
                break;
            }
            let submit = vk::SubmitInfo::default().command_buffers(&command_buffers);
            if let Err(err) = self
                .device
                .submit_to_graphics_queue(&[submit], self.render_sync.frame_rendering(frame_index))
            {
                error!("failed to submit render commands: {err}");
                break;
            }

            if flush {
                if let Err(err) = self.render_sync.wait_for_frame(frame_index) {
                    error!("failed waiting for snapshot fence: {err}");
                    break;
                }
                self.process_pending_encodes(frame_index, &mut pending_encodes);
                if let Some(callback) = flush_callback {
                    callback(frame_number);
                }
            }

            time += delta_time;
            frame_number += 1;
            frame_index = frame_number % self.number_of_images;
        }

        self.device.wait_idle();
        info!("Offscreen render thread terminating");
    }

    fn process_pending_encodes(
        &self,
        frame_index: usize,
        pending_encodes: &mut [Vec<SendBuffer>],
    ) {
        if pending_encodes[frame_index].is_empty() {
            return;
        }
        let buffer = self.buffer_pool.get_buffer();
        buffer.fill_with(|data| self.readback_images[frame_index].read_pixels(data));
        for send in pending_encodes[frame_index].drain(..) {
            send(buffer.clone());
        }
    }

    fn blit_and_present(&self, frame_index: usize, swap_image_index: u32) -> anyhow::Result<()> {
        let support = self.swap_support.lock();
        let Some(support) = support.as_ref() else {
            return Err(anyhow!("swapchain blit requested without swapchain support"));
        };

        support.render_sync.wait_for_frame(0)?;
        support.render_sync.reset_frame(0)?;

        let wait_semaphores = [support.render_sync.image_available(0)];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [support.render_sync.render_finished(0)];
        let command_buffers =
            [support.blit_commands[frame_index].buffer(swap_image_index as usize)];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);
        self.device
            .submit_to_graphics_queue(&[submit], support.render_sync.frame_rendering(0))?;

        self.device.with_graphics_queue(|queue| {
            support.swapchain.present(
                queue,
                swap_image_index,
                support.render_sync.render_finished(0),
            )
        })?;
        Ok(())
    }

    fn write_copy_commands(
        device: &Arc<LogicalDevice>,
        buffer: vk::CommandBuffer,
        source: vk::Image,
        destination: vk::Image,
        width: u32,
        height: u32,
    ) -> anyhow::Result<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);
        unsafe {
            device.device.begin_command_buffer(buffer, &begin_info)?;
            Self::record_transfer_barriers(device, buffer, source, destination);

            let copy = vk::ImageCopy::default()
                .src_subresource(color_subresource_layers())
                .dst_subresource(color_subresource_layers())
                .extent(vk::Extent3D {
                    width,
                    height,
                    depth: 1,
                });
            device.device.cmd_copy_image(
                buffer,
                source,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                destination,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[copy],
            );

            Self::record_host_read_barrier(device, buffer, destination, vk::ImageLayout::GENERAL);
            device.device.end_command_buffer(buffer)?;
        }
        Ok(())
    }

    fn write_blit_commands(
        device: &Arc<LogicalDevice>,
        buffer: vk::CommandBuffer,
        source: vk::Image,
        destination: vk::Image,
        width: u32,
        height: u32,
        destination_layout: vk::ImageLayout,
    ) -> anyhow::Result<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);
        unsafe {
            device.device.begin_command_buffer(buffer, &begin_info)?;
            Self::record_transfer_barriers(device, buffer, source, destination);

            let extent = vk::Offset3D {
                x: width as i32,
                y: height as i32,
                z: 1,
            };
            let blit = vk::ImageBlit::default()
                .src_subresource(color_subresource_layers())
                .src_offsets([vk::Offset3D::default(), extent])
                .dst_subresource(color_subresource_layers())
                .dst_offsets([vk::Offset3D::default(), extent]);
            device.device.cmd_blit_image(
                buffer,
                source,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                destination,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::NEAREST,
            );

            Self::record_host_read_barrier(device, buffer, destination, destination_layout);
            device.device.end_command_buffer(buffer)?;
        }
        Ok(())
    }

    /// Transition the source framebuffer image to transfer source and the
    /// destination to transfer destination.
    fn record_transfer_barriers(
        device: &Arc<LogicalDevice>,
        buffer: vk::CommandBuffer,
        source: vk::Image,
        destination: vk::Image,
    ) {
        let source_barrier = vk::ImageMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::MEMORY_READ)
            .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
            .old_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(source)
            .subresource_range(color_subresource_range());
        let destination_barrier = vk::ImageMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(destination)
            .subresource_range(color_subresource_range());
        unsafe {
            device.device.cmd_pipeline_barrier(
                buffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[source_barrier, destination_barrier],
            );
        }
    }

    /// Make the transfer destination visible to its consumer: the host for
    /// readback images, the presentation engine for swapchain images.
    fn record_host_read_barrier(
        device: &Arc<LogicalDevice>,
        buffer: vk::CommandBuffer,
        destination: vk::Image,
        destination_layout: vk::ImageLayout,
    ) {
        let barrier = vk::ImageMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::HOST_READ | vk::AccessFlags::MEMORY_READ)
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(destination_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(destination)
            .subresource_range(color_subresource_range());
        unsafe {
            device.device.cmd_pipeline_barrier(
                buffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::HOST | vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }
}

fn color_subresource_layers() -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    }
}

impl Drop for Offscreen {
    fn drop(&mut self) {
        self.quit.store(true, Ordering::SeqCst);
        self.render_condition.notify_one();
    }
}
