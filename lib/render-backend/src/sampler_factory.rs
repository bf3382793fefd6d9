use std::collections::HashMap;
use std::sync::Arc;

use log::error;
use parking_lot::Mutex;
use synth_graph::sampler_config::SamplerConfig;

use crate::vulkan::logical_device::LogicalDevice;
use crate::vulkan::sampler::Sampler;

/// Deduplicates device samplers by their packed configuration key with
/// reference counting, as samplers are a limited device resource.
pub struct SamplerFactory {
    device: Arc<LogicalDevice>,
    samplers: Mutex<HashMap<u32, (usize, Arc<Sampler>)>>,
}

impl std::fmt::Debug for SamplerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamplerFactory")
            .field("samplers", &self.samplers.lock().len())
            .finish()
    }
}

impl SamplerFactory {
    pub fn new(device: Arc<LogicalDevice>) -> SamplerFactory {
        SamplerFactory {
            device,
            samplers: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the shared sampler for `config`, creating it on first use.
    /// Creation happens while holding the map lock, which can block other
    /// callers but avoids duplicate samplers under race.
    pub fn get_sampler(&self, config: SamplerConfig) -> anyhow::Result<Arc<Sampler>> {
        let mut samplers = self.samplers.lock();
        if let Some((count, sampler)) = samplers.get_mut(&config.key()) {
            *count += 1;
            return Ok(sampler.clone());
        }
        let sampler = Sampler::new(self.device.clone(), config)?;
        samplers.insert(config.key(), (1, sampler.clone()));
        Ok(sampler)
    }

    pub fn release_sampler(&self, sampler: &Arc<Sampler>) {
        let mut samplers = self.samplers.lock();
        let key = sampler.config().key();
        match samplers.get_mut(&key) {
            Some((count, _)) => {
                *count -= 1;
                if *count == 0 {
                    samplers.remove(&key);
                }
            }
            None => {
                error!("SamplerFactory got release request for sampler key {key:08x} with no associated map entry");
            }
        }
    }

    #[cfg(test)]
    pub fn number_of_samplers(&self) -> usize {
        self.samplers.lock().len()
    }
}
