use std::ffi::CStr;
use std::sync::Arc;

use anyhow::anyhow;
use ash::vk;
use log::info;

use super::instance::Instance;

/// The chosen physical device plus the properties the rest of the backend
/// consults: queue family, memory types, limits, format support.
pub struct PhyDevice {
    pub cur_device: vk::PhysicalDevice,
    pub graphics_queue_index: u32,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub supports_sampler_anisotropy: bool,

    pub instance: Arc<Instance>,
}

impl std::fmt::Debug for PhyDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhyDevice")
            .field("graphics_queue_index", &self.graphics_queue_index)
            .finish()
    }
}

impl PhyDevice {
    /// Pick a device with a graphics queue, preferring discrete GPUs.
    pub fn choose(instance: &Arc<Instance>) -> anyhow::Result<Arc<PhyDevice>> {
        let devices = unsafe { instance.vk_instance.enumerate_physical_devices() }?;
        if devices.is_empty() {
            return Err(anyhow!("no Vulkan physical devices found"));
        }

        let mut chosen: Option<(vk::PhysicalDevice, u32, vk::PhysicalDeviceProperties)> = None;
        for device in devices {
            let properties =
                unsafe { instance.vk_instance.get_physical_device_properties(device) };
            let Some(queue_index) = Self::find_graphics_queue(instance, device) else {
                continue;
            };
            let is_discrete = properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU;
            match &chosen {
                Some((_, _, current))
                    if current.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
                        || !is_discrete => {}
                _ => chosen = Some((device, queue_index, properties)),
            }
        }

        let (cur_device, graphics_queue_index, properties) =
            chosen.ok_or_else(|| anyhow!("no Vulkan device with a graphics queue found"))?;

        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
        info!(
            "choosing physical device {} with graphics queue family {}",
            device_name.to_string_lossy(),
            graphics_queue_index
        );

        let memory_properties = unsafe {
            instance
                .vk_instance
                .get_physical_device_memory_properties(cur_device)
        };
        let features = unsafe {
            instance
                .vk_instance
                .get_physical_device_features(cur_device)
        };

        Ok(Arc::new(PhyDevice {
            cur_device,
            graphics_queue_index,
            properties,
            memory_properties,
            supports_sampler_anisotropy: features.sampler_anisotropy != 0,
            instance: instance.clone(),
        }))
    }

    fn find_graphics_queue(instance: &Arc<Instance>, device: vk::PhysicalDevice) -> Option<u32> {
        let families = unsafe {
            instance
                .vk_instance
                .get_physical_device_queue_family_properties(device)
        };
        families
            .iter()
            .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .map(|index| index as u32)
    }

    /// Find a memory type matching the filter bits and requested properties.
    pub fn find_memory_type(
        &self,
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> anyhow::Result<u32> {
        for i in 0..self.memory_properties.memory_type_count {
            if (type_filter & (1 << i)) != 0
                && self.memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(properties)
            {
                return Ok(i);
            }
        }
        Err(anyhow!("no suitable memory type found"))
    }

    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .vk_instance
                .get_physical_device_format_properties(self.cur_device, format)
        }
    }
}
