use std::ffi::CStr;
use std::sync::Arc;

use anyhow::anyhow;
use ash::vk;
use log::debug;

const APP_NAME: &CStr = c"lumen";
const ENGINE_NAME: &CStr = c"lumen-vulkan";

/// The Vulkan entry and instance. Every device object in the crate descends
/// from this through `Arc` parents, so the instance is destroyed last.
pub struct Instance {
    pub vk_instance: ash::Instance,
    pub vk_entry: ash::Entry,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance").finish()
    }
}

impl Instance {
    /// Create a headless instance, optionally with the Khronos validation
    /// layer when `with_validation` is set and the layer is installed.
    pub fn new(with_validation: bool) -> anyhow::Result<Arc<Instance>> {
        let entry = unsafe { ash::Entry::load() }?;

        let mut layers: Vec<*const std::os::raw::c_char> = Vec::new();
        if with_validation && Self::has_validation_layer(&entry)? {
            debug!("enabling VK_LAYER_KHRONOS_validation");
            layers.push(VALIDATION_LAYER.as_ptr());
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(APP_NAME)
            .application_version(1)
            .engine_name(ENGINE_NAME)
            .engine_version(1)
            .api_version(vk::API_VERSION_1_1);

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(|err| anyhow!("creating instance failed: {err}"))?;

        Ok(Arc::new(Instance {
            vk_instance: instance,
            vk_entry: entry,
        }))
    }

    fn has_validation_layer(entry: &ash::Entry) -> anyhow::Result<bool> {
        let layers = unsafe { entry.enumerate_instance_layer_properties() }?;
        Ok(layers.iter().any(|layer| {
            (unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) }) == VALIDATION_LAYER
        }))
    }
}

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe { self.vk_instance.destroy_instance(None) };
    }
}
