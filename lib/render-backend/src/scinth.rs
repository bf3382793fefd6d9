use std::sync::Arc;

use anyhow::anyhow;
use ash::vk;
use log::warn;
use synth_graph::intrinsic::Intrinsic;
use synth_graph::vgen::ImageSource;

use crate::image_map::ImageMap;
use crate::scinth_def::ScinthDef;
use crate::vulkan::buffer::{BufferKind, HostBuffer};
use crate::vulkan::command_buffer::CommandBuffers;
use crate::vulkan::descriptor::DescriptorPool;
use crate::vulkan::image::DeviceImage;
use crate::vulkan::logical_device::LogicalDevice;

/// A running instance of a ScinthDef: its own parameter state, per-image
/// uniform buffers, descriptor sets, and cached secondary draw command
/// buffers, one per pipelined image slot.
pub struct Scinth {
    node_id: i32,
    scinth_def: Arc<ScinthDef>,
    device: Arc<LogicalDevice>,

    cued: bool,
    start_time: f64,
    running: bool,

    parameter_values: Vec<f32>,
    uniform_buffers: Vec<Arc<HostBuffer>>,
    descriptor_pool: Option<Arc<DescriptorPool>>,
    descriptor_sets: Vec<vk::DescriptorSet>,
    bound_images: Vec<Arc<DeviceImage>>,
    draw_commands: Option<Arc<CommandBuffers>>,
    compute_commands: Option<Arc<CommandBuffers>>,
    commands_dirty: bool,
}

impl std::fmt::Debug for Scinth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scinth")
            .field("node_id", &self.node_id)
            .field("def", &self.scinth_def.abstract_def().name())
            .field("running", &self.running)
            .finish()
    }
}

impl Scinth {
    pub fn create(
        device: &Arc<LogicalDevice>,
        node_id: i32,
        scinth_def: Arc<ScinthDef>,
        image_map: &ImageMap,
    ) -> anyhow::Result<Scinth> {
        let abstract_def = scinth_def.abstract_def();
        let number_of_images = scinth_def.canvas().number_of_images();

        let parameter_values: Vec<f32> = abstract_def
            .parameters()
            .iter()
            .map(|parameter| parameter.default_value())
            .collect();

        let uniform_size = abstract_def.uniform_manifest().size_in_bytes();
        let mut uniform_buffers = Vec::new();
        if uniform_size > 0 {
            for _ in 0..number_of_images {
                uniform_buffers.push(HostBuffer::new(
                    device.clone(),
                    BufferKind::Uniform,
                    uniform_size as vk::DeviceSize,
                )?);
            }
        }

        let mut scinth = Scinth {
            node_id,
            scinth_def,
            device: device.clone(),
            cued: true,
            start_time: 0.0,
            running: true,
            parameter_values,
            uniform_buffers,
            descriptor_pool: None,
            descriptor_sets: Vec::new(),
            bound_images: Vec::new(),
            draw_commands: None,
            compute_commands: None,
            commands_dirty: true,
        };
        scinth.allocate_descriptors(image_map)?;
        scinth.rebuild_buffers()?;
        Ok(scinth)
    }

    /// Build this Scinth's per-frame state: latch the start time when cued,
    /// refresh the uniform buffer for `image_index`, and re-record command
    /// buffers if a parameter change marked them dirty.
    pub fn prepare_frame(&mut self, image_index: usize, frame_time: f64) -> anyhow::Result<()> {
        if self.cued {
            self.start_time = frame_time;
            self.cued = false;
        }

        if !self.uniform_buffers.is_empty() {
            let manifest = self.scinth_def.abstract_def().uniform_manifest();
            let buffer = &self.uniform_buffers[image_index];
            for i in 0..manifest.number_of_elements() {
                match manifest.intrinsic_for_element(i) {
                    Some(Intrinsic::Time) => {
                        buffer.write_f32(
                            manifest.offset_for_element(i) as usize,
                            (frame_time - self.start_time) as f32,
                        );
                    }
                    other => {
                        return Err(anyhow!(
                            "unknown or invalid uniform intrinsic {other:?} in Scinth {}",
                            self.node_id
                        ));
                    }
                }
            }
        }

        if self.commands_dirty {
            self.rebuild_buffers()?;
        }
        Ok(())
    }

    pub fn set_parameter_by_name(&mut self, name: &str, value: f32) {
        match self
            .scinth_def
            .abstract_def()
            .index_for_parameter_name(name)
        {
            Some(index) => {
                self.parameter_values[index] = value;
                self.commands_dirty = true;
            }
            None => {
                warn!("Scinth {} failed to find parameter named {name}", self.node_id);
            }
        }
    }

    pub fn set_parameter_by_index(&mut self, index: usize, value: f32) {
        if index >= self.parameter_values.len() {
            warn!(
                "Scinth {} has no parameter at index {index}",
                self.node_id
            );
            return;
        }
        self.parameter_values[index] = value;
        self.commands_dirty = true;
    }

    pub fn parameter_value(&self, index: usize) -> Option<f32> {
        self.parameter_values.get(index).copied()
    }

    pub fn node_id(&self) -> i32 {
        self.node_id
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    pub fn commands_dirty(&self) -> bool {
        self.commands_dirty
    }

    pub fn scinth_def(&self) -> &Arc<ScinthDef> {
        &self.scinth_def
    }

    pub fn draw_commands(&self) -> Option<Arc<CommandBuffers>> {
        self.draw_commands.clone()
    }

    pub fn compute_commands(&self) -> Option<Arc<CommandBuffers>> {
        self.compute_commands.clone()
    }

    /// Allocate the descriptor pool and per-image sets, and write the
    /// uniform buffer and image bindings. Image bindings resolve against
    /// the image map once here; a missing id binds the empty image.
    fn allocate_descriptors(&mut self, image_map: &ImageMap) -> anyhow::Result<()> {
        let Some(layout) = self.scinth_def.layout() else {
            return Ok(());
        };
        let abstract_def = self.scinth_def.abstract_def();
        let number_of_images = self.scinth_def.canvas().number_of_images() as u32;

        let mut pool_sizes = Vec::new();
        if !self.uniform_buffers.is_empty() {
            pool_sizes.push(
                vk::DescriptorPoolSize::default()
                    .ty(vk::DescriptorType::UNIFORM_BUFFER)
                    .descriptor_count(number_of_images),
            );
        }
        let image_bindings = abstract_def.image_bindings();
        if !image_bindings.is_empty() {
            pool_sizes.push(
                vk::DescriptorPoolSize::default()
                    .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .descriptor_count(number_of_images * image_bindings.len() as u32),
            );
        }

        let pool = DescriptorPool::new(self.device.clone(), &pool_sizes, number_of_images)?;
        let layouts = vec![layout; number_of_images as usize];
        self.descriptor_sets = pool
            .allocate(&layouts)
            .map_err(|err| anyhow!("Scinth {} failed to allocate descriptor sets: {err}", self.node_id))?;
        self.descriptor_pool = Some(pool);

        // Resolve every image binding once. A parameterized binding reads
        // the parameter's default, rounded to an image id.
        let mut resolved_images = Vec::with_capacity(image_bindings.len());
        for image_binding in &image_bindings {
            let image_id = match image_binding.source {
                ImageSource::Constant(image_id) => image_id,
                ImageSource::Parameter(index) => {
                    self.parameter_values[index].round() as i32
                }
            };
            let image = match image_map.get_image(image_id) {
                Some(image) => image,
                None => {
                    warn!(
                        "Scinth {} found no image with id {image_id}, using empty image",
                        self.node_id
                    );
                    image_map.empty_image().ok_or_else(|| {
                        anyhow!("Scinth {} has no image for id {image_id}", self.node_id)
                    })?
                }
            };
            resolved_images.push(image);
        }

        for i in 0..number_of_images as usize {
            let mut writes: Vec<vk::WriteDescriptorSet> = Vec::new();
            let buffer_infos: Vec<vk::DescriptorBufferInfo> = self
                .uniform_buffers
                .get(i)
                .map(|buffer| {
                    vec![vk::DescriptorBufferInfo::default()
                        .buffer(buffer.buffer)
                        .offset(0)
                        .range(buffer.size())]
                })
                .unwrap_or_default();
            if !buffer_infos.is_empty() {
                writes.push(
                    vk::WriteDescriptorSet::default()
                        .dst_set(self.descriptor_sets[i])
                        .dst_binding(0)
                        .dst_array_element(0)
                        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                        .buffer_info(&buffer_infos),
                );
            }

            let image_infos: Vec<vk::DescriptorImageInfo> = image_bindings
                .iter()
                .zip(resolved_images.iter())
                .zip(self.scinth_def.samplers().iter())
                .map(|((_, image), sampler)| {
                    vk::DescriptorImageInfo::default()
                        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                        .image_view(image.view)
                        .sampler(sampler.sampler)
                })
                .collect();
            for (k, image_binding) in image_bindings.iter().enumerate() {
                writes.push(
                    vk::WriteDescriptorSet::default()
                        .dst_set(self.descriptor_sets[i])
                        .dst_binding(image_binding.binding)
                        .dst_array_element(0)
                        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                        .image_info(std::slice::from_ref(&image_infos[k])),
                );
            }

            unsafe {
                self.device.device.update_descriptor_sets(&writes, &[]);
            }
        }

        self.bound_images = resolved_images;
        Ok(())
    }

    /// Re-record the secondary draw buffers, one per image slot, against
    /// the canvas render pass. The previous buffers stay alive through any
    /// FrameContext that submitted them.
    fn rebuild_buffers(&mut self) -> anyhow::Result<()> {
        let number_of_images = self.scinth_def.canvas().number_of_images();
        let commands = CommandBuffers::new(
            self.scinth_def.command_pool().clone(),
            vk::CommandBufferLevel::SECONDARY,
            number_of_images as u32,
        )?;

        commands.associate_resource(self.scinth_def.clone());
        if let Some(pool) = &self.descriptor_pool {
            commands.associate_resource(pool.clone());
        }
        for buffer in &self.uniform_buffers {
            commands.associate_resource(buffer.clone());
        }
        for image in &self.bound_images {
            commands.associate_resource(image.clone());
        }

        let device = &self.device.device;
        for i in 0..number_of_images {
            let buffer = commands.buffer(i);
            let inheritance_info = vk::CommandBufferInheritanceInfo::default()
                .render_pass(self.scinth_def.canvas().render_pass())
                .subpass(0)
                .framebuffer(self.scinth_def.canvas().framebuffer(i));
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(
                    vk::CommandBufferUsageFlags::SIMULTANEOUS_USE
                        | vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE,
                )
                .inheritance_info(&inheritance_info);

            unsafe {
                device
                    .begin_command_buffer(buffer, &begin_info)
                    .map_err(|err| {
                        anyhow!("failed beginning command buffer for Scinth {}: {err}", self.node_id)
                    })?;

                if !self.parameter_values.is_empty() {
                    let bytes: Vec<u8> = self
                        .parameter_values
                        .iter()
                        .flat_map(|value| value.to_ne_bytes())
                        .collect();
                    device.cmd_push_constants(
                        buffer,
                        self.scinth_def.pipeline().layout(),
                        vk::ShaderStageFlags::FRAGMENT,
                        0,
                        &bytes,
                    );
                }

                device.cmd_bind_pipeline(
                    buffer,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.scinth_def.pipeline().get(),
                );
                device.cmd_bind_vertex_buffers(
                    buffer,
                    0,
                    &[self.scinth_def.vertex_buffer().buffer],
                    &[0],
                );
                device.cmd_bind_index_buffer(
                    buffer,
                    self.scinth_def.index_buffer().buffer,
                    0,
                    vk::IndexType::UINT16,
                );
                if !self.descriptor_sets.is_empty() {
                    device.cmd_bind_descriptor_sets(
                        buffer,
                        vk::PipelineBindPoint::GRAPHICS,
                        self.scinth_def.pipeline().layout(),
                        0,
                        &[self.descriptor_sets[i]],
                        &[],
                    );
                }
                device.cmd_draw_indexed(
                    buffer,
                    self.scinth_def.abstract_def().shape().number_of_indices(),
                    1,
                    0,
                    0,
                    0,
                );

                device.end_command_buffer(buffer).map_err(|err| {
                    anyhow!("failed ending command buffer for Scinth {}: {err}", self.node_id)
                })?;
            }
        }

        self.draw_commands = Some(commands);
        self.commands_dirty = false;
        Ok(())
    }
}
