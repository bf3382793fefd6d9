use std::sync::Arc;

use anyhow::anyhow;
use ash::vk;

use crate::vulkan::image::DeviceImage;
use crate::vulkan::logical_device::LogicalDevice;

/// The render pass and framebuffer set for one output target. ScinthDefs
/// compile against a Canvas; Scinth secondary buffers inherit its render
/// pass and framebuffers.
pub struct Canvas {
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    extent: vk::Extent2D,
    images: Vec<Arc<DeviceImage>>,

    device: Arc<LogicalDevice>,
}

impl std::fmt::Debug for Canvas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Canvas")
            .field("extent", &self.extent)
            .field("images", &self.images.len())
            .finish()
    }
}

impl Canvas {
    pub fn new(
        device: Arc<LogicalDevice>,
        images: Vec<Arc<DeviceImage>>,
        extent: vk::Extent2D,
    ) -> anyhow::Result<Arc<Canvas>> {
        let format = images
            .first()
            .map(|image| image.format())
            .ok_or_else(|| anyhow!("canvas requires at least one target image"))?;

        let color_attachment = vk::AttachmentDescription::default()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        let color_reference = vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        let color_references = [color_reference];
        let subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_references);
        let dependency = vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE);

        let attachments = [color_attachment];
        let subpasses = [subpass];
        let dependencies = [dependency];
        let render_pass_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        let render_pass = unsafe { device.device.create_render_pass(&render_pass_info, None) }
            .map_err(|err| anyhow!("creating canvas render pass failed: {err}"))?;

        let mut framebuffers = Vec::with_capacity(images.len());
        for image in &images {
            let attachments = [image.view];
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            match unsafe { device.device.create_framebuffer(&framebuffer_info, None) } {
                Ok(framebuffer) => framebuffers.push(framebuffer),
                Err(err) => {
                    for framebuffer in framebuffers {
                        unsafe { device.device.destroy_framebuffer(framebuffer, None) };
                    }
                    unsafe { device.device.destroy_render_pass(render_pass, None) };
                    return Err(anyhow!("creating canvas framebuffer failed: {err}"));
                }
            }
        }

        Ok(Arc::new(Canvas {
            render_pass,
            framebuffers,
            extent,
            images,
            device,
        }))
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn framebuffer(&self, index: usize) -> vk::Framebuffer {
        self.framebuffers[index]
    }

    pub fn number_of_images(&self) -> usize {
        self.images.len()
    }

    pub fn image(&self, index: usize) -> &Arc<DeviceImage> {
        &self.images[index]
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn width(&self) -> u32 {
        self.extent.width
    }

    pub fn height(&self) -> u32 {
        self.extent.height
    }
}

impl Drop for Canvas {
    fn drop(&mut self) {
        unsafe {
            for framebuffer in &self.framebuffers {
                self.device.device.destroy_framebuffer(*framebuffer, None);
            }
            self.device.device.destroy_render_pass(self.render_pass, None);
        }
    }
}
