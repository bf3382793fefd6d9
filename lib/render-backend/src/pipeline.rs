use std::ffi::CStr;
use std::sync::Arc;

use anyhow::anyhow;
use ash::vk;
use synth_graph::manifest::{ElementType, Manifest};
use synth_graph::shape::{Shape, Topology};

use crate::canvas::Canvas;
use crate::vulkan::logical_device::LogicalDevice;
use crate::vulkan::shader::ShaderModule;

const SHADER_ENTRY: &CStr = c"main";

/// The graphics pipeline for one ScinthDef: vertex layout from the packed
/// vertex manifest, topology from the shape, alpha blending over the canvas.
pub struct Pipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,

    // Modules must outlive the pipeline.
    _vertex_shader: Arc<ShaderModule>,
    _fragment_shader: Arc<ShaderModule>,

    device: Arc<LogicalDevice>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").finish()
    }
}

fn format_for_element(ty: ElementType) -> vk::Format {
    match ty {
        ElementType::Float => vk::Format::R32_SFLOAT,
        ElementType::Vec2 => vk::Format::R32G32_SFLOAT,
        ElementType::Vec3 => vk::Format::R32G32B32_SFLOAT,
        ElementType::Vec4 => vk::Format::R32G32B32A32_SFLOAT,
    }
}

impl Pipeline {
    pub fn new(
        device: Arc<LogicalDevice>,
        vertex_manifest: &Manifest,
        shape: &dyn Shape,
        canvas: &Canvas,
        vertex_shader: Arc<ShaderModule>,
        fragment_shader: Arc<ShaderModule>,
        descriptor_set_layout: Option<vk::DescriptorSetLayout>,
        push_constant_block_size: u32,
    ) -> anyhow::Result<Arc<Pipeline>> {
        let binding_descriptions = [vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride(vertex_manifest.size_in_bytes())
            .input_rate(vk::VertexInputRate::VERTEX)];
        let attribute_descriptions: Vec<vk::VertexInputAttributeDescription> = (0
            ..vertex_manifest.number_of_elements())
            .map(|index| {
                vk::VertexInputAttributeDescription::default()
                    .binding(0)
                    .location(index as u32)
                    .format(format_for_element(vertex_manifest.type_for_element(index)))
                    .offset(vertex_manifest.offset_for_element(index))
            })
            .collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&binding_descriptions)
            .vertex_attribute_descriptions(&attribute_descriptions);

        let topology = match shape.topology() {
            Topology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(topology)
            .primitive_restart_enable(false);

        let viewports = [vk::Viewport::default()
            .x(0.0)
            .y(0.0)
            .width(canvas.width() as f32)
            .height(canvas.height() as f32)
            .min_depth(0.0)
            .max_depth(1.0)];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: canvas.extent(),
        }];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0);

        let blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(vk::ColorComponentFlags::RGBA)];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&blend_attachments);

        let set_layouts: Vec<vk::DescriptorSetLayout> =
            descriptor_set_layout.into_iter().collect();
        let push_constant_ranges: Vec<vk::PushConstantRange> = if push_constant_block_size > 0 {
            vec![vk::PushConstantRange::default()
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                .offset(0)
                .size(push_constant_block_size)]
        } else {
            Vec::new()
        };
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);
        let layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
            .map_err(|err| anyhow!("creating pipeline layout failed: {err}"))?;

        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_shader.module)
                .name(SHADER_ENTRY),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_shader.module)
                .name(SHADER_ENTRY),
        ];

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .layout(layout)
            .render_pass(canvas.render_pass())
            .subpass(0);

        let pipelines = unsafe {
            device.device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info],
                None,
            )
        };
        let pipeline = match pipelines {
            Ok(pipelines) => pipelines[0],
            Err((_, err)) => {
                unsafe { device.device.destroy_pipeline_layout(layout, None) };
                return Err(anyhow!("creating the graphics pipeline failed: {err}"));
            }
        };

        Ok(Arc::new(Pipeline {
            pipeline,
            layout,
            _vertex_shader: vertex_shader,
            _fragment_shader: fragment_shader,
            device,
        }))
    }

    pub fn get(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}
