use std::sync::Arc;

use anyhow::anyhow;
use ash::vk;

use super::logical_device::LogicalDevice;

/// A device-local sampled image with its view, the transfer target of the
/// staging path and the resource bound into Scinth descriptor sets.
pub struct DeviceImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    memory: vk::DeviceMemory,
    format: vk::Format,
    width: u32,
    height: u32,
    size: vk::DeviceSize,

    device: Arc<LogicalDevice>,
}

impl std::fmt::Debug for DeviceImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceImage")
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl DeviceImage {
    pub fn new(
        device: Arc<LogicalDevice>,
        format: vk::Format,
        width: u32,
        height: u32,
        usage: vk::ImageUsageFlags,
    ) -> anyhow::Result<Arc<DeviceImage>> {
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);
        let image = unsafe { device.device.create_image(&create_info, None) }?;

        let requirements = unsafe { device.device.get_image_memory_requirements(image) };
        let memory_type = device.phy_device.find_memory_type(
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        let memory = match unsafe { device.device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { device.device.destroy_image(image, None) };
                return Err(anyhow!("allocating image memory failed: {err}"));
            }
        };
        if let Err(err) = unsafe { device.device.bind_image_memory(image, memory, 0) } {
            unsafe {
                device.device.destroy_image(image, None);
                device.device.free_memory(memory, None);
            }
            return Err(anyhow!("binding image memory failed: {err}"));
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(color_subresource_range());
        let view = match unsafe { device.device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(err) => {
                unsafe {
                    device.device.destroy_image(image, None);
                    device.device.free_memory(memory, None);
                }
                return Err(anyhow!("creating image view failed: {err}"));
            }
        };

        Ok(Arc::new(DeviceImage {
            image,
            view,
            memory,
            format,
            width,
            height,
            size: requirements.size,
            device,
        }))
    }

    /// A sampled transfer-destination image, the common case for staged
    /// client images.
    pub fn new_sampled(
        device: Arc<LogicalDevice>,
        format: vk::Format,
        width: u32,
        height: u32,
    ) -> anyhow::Result<Arc<DeviceImage>> {
        Self::new(
            device,
            format,
            width,
            height,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        )
    }

    /// A render-target image that the offscreen driver also reads back from.
    pub fn new_framebuffer_attachment(
        device: Arc<LogicalDevice>,
        format: vk::Format,
        width: u32,
        height: u32,
    ) -> anyhow::Result<Arc<DeviceImage>> {
        Self::new(
            device,
            format,
            width,
            height,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
        )
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size_in_bytes(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for DeviceImage {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_image_view(self.view, None);
            self.device.device.destroy_image(self.image, None);
            self.device.device.free_memory(self.memory, None);
        }
    }
}

/// A linear-tiled, host-visible, persistently mapped image used for
/// readback of rendered frames.
pub struct HostImage {
    pub image: vk::Image,
    memory: vk::DeviceMemory,
    format: vk::Format,
    width: u32,
    height: u32,
    mapped: *mut u8,
    row_pitch: vk::DeviceSize,

    device: Arc<LogicalDevice>,
}

unsafe impl Send for HostImage {}
unsafe impl Sync for HostImage {}

impl std::fmt::Debug for HostImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl HostImage {
    pub fn new(
        device: Arc<LogicalDevice>,
        width: u32,
        height: u32,
    ) -> anyhow::Result<Arc<HostImage>> {
        let format = vk::Format::R8G8B8A8_UNORM;
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::LINEAR)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::TRANSFER_DST)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);
        let image = unsafe { device.device.create_image(&create_info, None) }?;

        let requirements = unsafe { device.device.get_image_memory_requirements(image) };
        let memory_type = device.phy_device.find_memory_type(
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        let memory = match unsafe { device.device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { device.device.destroy_image(image, None) };
                return Err(anyhow!("allocating readback image memory failed: {err}"));
            }
        };

        let mapped = unsafe {
            device
                .device
                .bind_image_memory(image, memory, 0)
                .and_then(|_| {
                    device.device.map_memory(
                        memory,
                        0,
                        requirements.size,
                        vk::MemoryMapFlags::empty(),
                    )
                })
        };
        let mapped = match mapped {
            Ok(mapped) => mapped as *mut u8,
            Err(err) => {
                unsafe {
                    device.device.destroy_image(image, None);
                    device.device.free_memory(memory, None);
                }
                return Err(anyhow!("binding or mapping readback image failed: {err}"));
            }
        };

        let subresource = vk::ImageSubresource {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            array_layer: 0,
        };
        let layout = unsafe {
            device
                .device
                .get_image_subresource_layout(image, subresource)
        };

        Ok(Arc::new(HostImage {
            image,
            memory,
            format,
            width,
            height,
            mapped,
            row_pitch: layout.row_pitch,
            device,
        }))
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Copy the image contents into `out` as tightly packed RGBA rows.
    pub fn read_pixels(&self, out: &mut [u8]) {
        let row_bytes = self.width as usize * 4;
        debug_assert!(out.len() >= row_bytes * self.height as usize);
        for y in 0..self.height as usize {
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.mapped.add(y * self.row_pitch as usize),
                    out[y * row_bytes..].as_mut_ptr(),
                    row_bytes,
                );
            }
        }
    }
}

impl Drop for HostImage {
    fn drop(&mut self) {
        unsafe {
            self.device.device.unmap_memory(self.memory);
            self.device.device.destroy_image(self.image, None);
            self.device.device.free_memory(self.memory, None);
        }
    }
}

pub fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}
