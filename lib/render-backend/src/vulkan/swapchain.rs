use std::sync::Arc;

use anyhow::anyhow;
use ash::vk;
use log::info;

use super::logical_device::LogicalDevice;

/// A minimal swapchain wrapper servicing the offscreen driver's swap-blit
/// path. The surface comes from an external windowing layer; this crate
/// only transfers rendered framebuffer images into the presentable images.
pub struct Swapchain {
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    extent: vk::Extent2D,
    format: vk::Format,

    #[allow(dead_code)]
    device: Arc<LogicalDevice>,
}

impl std::fmt::Debug for Swapchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Swapchain")
            .field("extent", &self.extent)
            .field("images", &self.images.len())
            .finish()
    }
}

impl Swapchain {
    pub fn new(
        device: Arc<LogicalDevice>,
        surface: vk::SurfaceKHR,
        surface_format: vk::SurfaceFormatKHR,
        extent: vk::Extent2D,
        image_count: u32,
        present_mode: vk::PresentModeKHR,
    ) -> anyhow::Result<Arc<Swapchain>> {
        let loader = ash::khr::swapchain::Device::new(
            &device.phy_device.instance.vk_instance,
            &device.device,
        );
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(vk::SurfaceTransformFlagsKHR::IDENTITY)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);
        let swapchain = unsafe { loader.create_swapchain(&create_info, None) }
            .map_err(|err| anyhow!("creating swapchain failed: {err}"))?;
        let images = unsafe { loader.get_swapchain_images(swapchain) }?;
        info!("created swapchain with {} images", images.len());

        Ok(Arc::new(Swapchain {
            loader,
            swapchain,
            images,
            extent,
            format: surface_format.format,
            device,
        }))
    }

    pub fn number_of_images(&self) -> usize {
        self.images.len()
    }

    pub fn image(&self, index: usize) -> vk::Image {
        self.images[index]
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> anyhow::Result<u32> {
        let (index, _suboptimal) = unsafe {
            self.loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        }
        .map_err(|err| anyhow!("acquiring swapchain image failed: {err}"))?;
        Ok(index)
    }

    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> anyhow::Result<()> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        unsafe { self.loader.queue_present(queue, &present_info) }
            .map_err(|err| anyhow!("presenting swapchain image failed: {err}"))?;
        Ok(())
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}
