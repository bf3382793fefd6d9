use std::sync::Arc;

use anyhow::anyhow;
use ash::vk;
use log::debug;
use synth_graph::abstract_scinth_def::AbstractScinthDef;
use synth_graph::intrinsic::Intrinsic;
use synth_graph::manifest::ElementType;

use crate::canvas::Canvas;
use crate::compiler::ShaderCompiler;
use crate::pipeline::Pipeline;
use crate::sampler_factory::SamplerFactory;
use crate::vulkan::buffer::{BufferKind, HostBuffer};
use crate::vulkan::command_pool::CommandPool;
use crate::vulkan::descriptor::DescriptorSetLayout;
use crate::vulkan::logical_device::LogicalDevice;
use crate::vulkan::sampler::Sampler;
use crate::vulkan::shader::ShaderStage;

/// The GPU-resident compilation of one AbstractScinthDef: shader modules,
/// pipeline, shared vertex and index buffers, and the samplers for its
/// image bindings. Scinths instantiate against this and share all of it.
pub struct ScinthDef {
    abstract_def: Arc<AbstractScinthDef>,
    canvas: Arc<Canvas>,
    command_pool: Arc<CommandPool>,
    vertex_buffer: Arc<HostBuffer>,
    index_buffer: Arc<HostBuffer>,
    descriptor_set_layout: Option<Arc<DescriptorSetLayout>>,
    pipeline: Arc<Pipeline>,
    samplers: Vec<Arc<Sampler>>,
    sampler_factory: Arc<SamplerFactory>,
}

impl std::fmt::Debug for ScinthDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScinthDef")
            .field("name", &self.abstract_def.name())
            .finish()
    }
}

impl ScinthDef {
    pub fn build(
        device: &Arc<LogicalDevice>,
        canvas: &Arc<Canvas>,
        command_pool: &Arc<CommandPool>,
        sampler_factory: &Arc<SamplerFactory>,
        compiler: &ShaderCompiler,
        abstract_def: Arc<AbstractScinthDef>,
    ) -> anyhow::Result<Arc<ScinthDef>> {
        let (vertex_buffer, index_buffer) =
            Self::build_vertex_data(device, canvas, &abstract_def)?;

        let vertex_shader = compiler.compile(
            device,
            abstract_def.vertex_shader(),
            &format!("{}_vertex", abstract_def.prefix()),
            ShaderStage::Vertex,
        )?;
        let fragment_shader = compiler.compile(
            device,
            abstract_def.fragment_shader(),
            &format!("{}_fragment", abstract_def.prefix()),
            ShaderStage::Fragment,
        )?;

        let descriptor_set_layout = Self::build_descriptor_set_layout(device, &abstract_def)?;

        let mut samplers = Vec::new();
        for image_binding in abstract_def.image_bindings() {
            samplers.push(sampler_factory.get_sampler(
                synth_graph::sampler_config::SamplerConfig::from_key(image_binding.sampler_key),
            )?);
        }

        let pipeline = Pipeline::new(
            device.clone(),
            abstract_def.vertex_manifest(),
            abstract_def.shape(),
            canvas,
            vertex_shader,
            fragment_shader,
            descriptor_set_layout.as_ref().map(|layout| layout.layout),
            (abstract_def.parameters().len() * std::mem::size_of::<f32>()) as u32,
        )?;

        debug!("built ScinthDef {}", abstract_def.name());
        Ok(Arc::new(ScinthDef {
            abstract_def,
            canvas: canvas.clone(),
            command_pool: command_pool.clone(),
            vertex_buffer,
            index_buffer,
            descriptor_set_layout,
            pipeline,
            samplers,
            sampler_factory: sampler_factory.clone(),
        }))
    }

    /// Evaluate the vertex manifest against the shape, filling position from
    /// the shape data and the intrinsic elements from their definitions,
    /// then copy vertex and index data into shared host buffers.
    fn build_vertex_data(
        device: &Arc<LogicalDevice>,
        canvas: &Arc<Canvas>,
        abstract_def: &Arc<AbstractScinthDef>,
    ) -> anyhow::Result<(Arc<HostBuffer>, Arc<HostBuffer>)> {
        let shape = abstract_def.shape();
        let manifest = abstract_def.vertex_manifest();

        // The normPos intrinsic scales 2D vertices so the longer canvas axis
        // extends past [-1, 1] proportionally to the aspect ratio.
        let mut norm_pos_scale = [1.0f32, 1.0f32];
        if abstract_def.intrinsics().contains(&Intrinsic::NormPos) {
            if shape.element_type() != ElementType::Vec2 {
                return Err(anyhow!(
                    "normPos intrinsic only supported for 2D vertices in ScinthDef {}",
                    abstract_def.name()
                ));
            }
            if canvas.width() > canvas.height() {
                norm_pos_scale[0] = canvas.width() as f32 / canvas.height() as f32;
            } else {
                norm_pos_scale[1] = canvas.height() as f32 / canvas.width() as f32;
            }
        }

        let floats_per_vertex = (manifest.size_in_bytes() / 4) as usize;
        let mut vertex_data = vec![0.0f32; shape.number_of_vertices() as usize * floats_per_vertex];
        for i in 0..shape.number_of_vertices() {
            let vertex = &mut vertex_data[i as usize * floats_per_vertex..];
            for j in 0..manifest.number_of_elements() {
                let offset = (manifest.offset_for_element(j) / 4) as usize;
                if manifest.name_for_element(j) == abstract_def.vertex_position_element_name() {
                    shape.store_vertex_at_index(i, &mut vertex[offset..]);
                    continue;
                }
                match manifest.intrinsic_for_element(j) {
                    Some(Intrinsic::NormPos) => {
                        let mut position = [0.0f32; 2];
                        shape.store_vertex_at_index(i, &mut position);
                        vertex[offset] = position[0] * norm_pos_scale[0];
                        vertex[offset + 1] = position[1] * norm_pos_scale[1];
                    }
                    Some(Intrinsic::TexPos) => {
                        shape.store_texture_vertex_at_index(i, &mut vertex[offset..]);
                    }
                    _ => {
                        return Err(anyhow!(
                            "invalid vertex intrinsic for ScinthDef {}",
                            abstract_def.name()
                        ));
                    }
                }
            }
        }

        let vertex_buffer = HostBuffer::new(
            device.clone(),
            BufferKind::Vertex,
            (vertex_data.len() * std::mem::size_of::<f32>()) as vk::DeviceSize,
        )?;
        vertex_buffer.write_f32_slice(0, &vertex_data);
        debug!(
            "copied {} bytes of vertex data for ScinthDef {}",
            vertex_buffer.size(),
            abstract_def.name()
        );

        let indices = shape.indices();
        let index_bytes: Vec<u8> = indices
            .iter()
            .flat_map(|index| index.to_ne_bytes())
            .collect();
        let index_buffer = HostBuffer::new(
            device.clone(),
            BufferKind::Index,
            index_bytes.len() as vk::DeviceSize,
        )?;
        index_buffer.write_bytes(0, &index_bytes);

        Ok((vertex_buffer, index_buffer))
    }

    fn build_descriptor_set_layout(
        device: &Arc<LogicalDevice>,
        abstract_def: &Arc<AbstractScinthDef>,
    ) -> anyhow::Result<Option<Arc<DescriptorSetLayout>>> {
        let mut bindings: Vec<vk::DescriptorSetLayoutBinding> = Vec::new();
        if abstract_def.uniform_manifest().number_of_elements() > 0 {
            bindings.push(
                vk::DescriptorSetLayoutBinding::default()
                    .binding(0)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .descriptor_count(1)
                    .stage_flags(
                        vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                    ),
            );
        }
        for image_binding in abstract_def.image_bindings() {
            bindings.push(
                vk::DescriptorSetLayoutBinding::default()
                    .binding(image_binding.binding)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::FRAGMENT),
            );
        }
        if bindings.is_empty() {
            return Ok(None);
        }
        Ok(Some(DescriptorSetLayout::new(device.clone(), &bindings)?))
    }

    pub fn abstract_def(&self) -> &Arc<AbstractScinthDef> {
        &self.abstract_def
    }

    pub fn canvas(&self) -> &Arc<Canvas> {
        &self.canvas
    }

    pub fn command_pool(&self) -> &Arc<CommandPool> {
        &self.command_pool
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn vertex_buffer(&self) -> &Arc<HostBuffer> {
        &self.vertex_buffer
    }

    pub fn index_buffer(&self) -> &Arc<HostBuffer> {
        &self.index_buffer
    }

    pub fn layout(&self) -> Option<vk::DescriptorSetLayout> {
        self.descriptor_set_layout
            .as_ref()
            .map(|layout| layout.layout)
    }

    /// Samplers parallel to `abstract_def().image_bindings()`.
    pub fn samplers(&self) -> &[Arc<Sampler>] {
        &self.samplers
    }
}

impl Drop for ScinthDef {
    fn drop(&mut self) {
        debug!("ScinthDef {} dropping", self.abstract_def.name());
        for sampler in &self.samplers {
            self.sampler_factory.release_sampler(sampler);
        }
    }
}
