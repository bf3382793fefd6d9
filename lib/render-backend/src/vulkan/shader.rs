use std::sync::Arc;

use anyhow::anyhow;
use ash::vk;

use super::logical_device::LogicalDevice;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn flags(&self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }
}

/// A compiled shader module; pipelines retain these until destroyed.
pub struct ShaderModule {
    pub module: vk::ShaderModule,
    pub stage: ShaderStage,

    device: Arc<LogicalDevice>,
}

impl std::fmt::Debug for ShaderModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderModule").field("stage", &self.stage).finish()
    }
}

impl ShaderModule {
    pub fn new(
        device: Arc<LogicalDevice>,
        stage: ShaderStage,
        spirv: &[u32],
    ) -> anyhow::Result<Arc<ShaderModule>> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(spirv);
        let module = unsafe { device.device.create_shader_module(&create_info, None) }
            .map_err(|err| anyhow!("shader module was not created: {err}"))?;
        Ok(Arc::new(ShaderModule {
            module,
            stage,
            device,
        }))
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_shader_module(self.module, None);
        }
    }
}
