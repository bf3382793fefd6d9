use std::sync::Arc;

use ash::vk;
use synth_graph::sampler_config::{AddressMode, ClampBorderColor, FilterMode, SamplerConfig};

use super::logical_device::LogicalDevice;

/// A device sampler created from a packed [`SamplerConfig`] key. Samplers
/// are shared through the factory, keyed by that config.
pub struct Sampler {
    pub sampler: vk::Sampler,
    config: SamplerConfig,

    device: Arc<LogicalDevice>,
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler").field("config", &self.config).finish()
    }
}

fn filter(mode: FilterMode) -> vk::Filter {
    match mode {
        FilterMode::Linear => vk::Filter::LINEAR,
        FilterMode::Nearest => vk::Filter::NEAREST,
    }
}

fn address_mode(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
    }
}

fn border_color(color: ClampBorderColor) -> vk::BorderColor {
    match color {
        ClampBorderColor::TransparentBlack => vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
        ClampBorderColor::Black => vk::BorderColor::FLOAT_OPAQUE_BLACK,
        ClampBorderColor::White => vk::BorderColor::FLOAT_OPAQUE_WHITE,
    }
}

impl Sampler {
    pub fn new(
        device: Arc<LogicalDevice>,
        config: SamplerConfig,
    ) -> anyhow::Result<Arc<Sampler>> {
        let max_anisotropy = device
            .phy_device
            .properties
            .limits
            .max_sampler_anisotropy;
        let anisotropy_enable = config.is_anisotropic_filtering_enabled()
            && device.phy_device.supports_sampler_anisotropy;
        let create_info = vk::SamplerCreateInfo::default()
            .min_filter(filter(config.min_filter_mode()))
            .mag_filter(filter(config.mag_filter_mode()))
            .address_mode_u(address_mode(config.address_mode_u()))
            .address_mode_v(address_mode(config.address_mode_v()))
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_BORDER)
            .anisotropy_enable(anisotropy_enable)
            .max_anisotropy(max_anisotropy)
            .border_color(border_color(config.clamp_border_color()))
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(0.0);

        let sampler = unsafe { device.device.create_sampler(&create_info, None) }?;

        Ok(Arc::new(Sampler {
            sampler,
            config,
            device,
        }))
    }

    pub fn config(&self) -> SamplerConfig {
        self.config
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_sampler(self.sampler, None);
        }
    }
}
