use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::anyhow;
use ash::vk;
use log::error;
use parking_lot::Mutex;

use crate::stage_manager::StageManager;
use crate::vulkan::buffer::{BufferKind, HostBuffer};
use crate::vulkan::image::DeviceImage;
use crate::vulkan::logical_device::LogicalDevice;

/// A thread-safe ring of interleaved stereo samples fed by an external
/// audio source and drained by the render thread once per frame.
pub struct Ingress {
    sample_rate: u32,
    samples: Mutex<VecDeque<f32>>,
}

impl std::fmt::Debug for Ingress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingress")
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

impl Ingress {
    pub fn new(sample_rate: u32) -> Ingress {
        Ingress {
            sample_rate,
            samples: Mutex::new(VecDeque::new()),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Append interleaved stereo samples.
    pub fn ingest_samples(&self, samples: &[f32]) {
        self.samples.lock().extend(samples.iter().copied());
    }

    pub fn available_frames(&self) -> usize {
        self.samples.lock().len() / 2
    }

    pub fn drop_samples(&self, frames: usize) {
        let mut samples = self.samples.lock();
        let drain = (frames * 2).min(samples.len());
        samples.drain(0..drain);
    }

    /// Copy `frames` stereo frames into `out`, removing them from the ring.
    pub fn extract_samples(&self, out: &mut [f32], frames: usize) -> usize {
        let mut samples = self.samples.lock();
        let count = (frames * 2).min(samples.len()).min(out.len());
        for (slot, sample) in out.iter_mut().zip(samples.drain(0..count)) {
            *slot = sample;
        }
        count / 2
    }
}

/// Owns a host buffer and a device image and automates the per-frame copy
/// of audio data from an [`Ingress`] onto the GPU, where sampling VGens can
/// read it as a one-texel-high image.
pub struct AudioStager {
    ingress: Arc<Ingress>,
    buffer_frame_size: usize,
    buffer: Arc<HostBuffer>,
    image: Arc<DeviceImage>,
}

impl std::fmt::Debug for AudioStager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioStager")
            .field("buffer_frame_size", &self.buffer_frame_size)
            .finish()
    }
}

impl AudioStager {
    pub fn new(
        device: &Arc<LogicalDevice>,
        ingress: Arc<Ingress>,
    ) -> anyhow::Result<AudioStager> {
        // One visual frame of stereo audio at a nominal 60 Hz update rate.
        let buffer_frame_size = (ingress.sample_rate() / 60) as usize;
        if buffer_frame_size == 0 {
            return Err(anyhow!("audio ingress sample rate too low"));
        }
        let buffer = HostBuffer::new(
            device.clone(),
            BufferKind::Staging,
            (buffer_frame_size * 2 * std::mem::size_of::<f32>()) as vk::DeviceSize,
        )?;
        let image = DeviceImage::new_sampled(
            device.clone(),
            vk::Format::R32G32_SFLOAT,
            buffer_frame_size as u32,
            1,
        )?;
        Ok(AudioStager {
            ingress,
            buffer_frame_size,
            buffer,
            image,
        })
    }

    pub fn image(&self) -> &Arc<DeviceImage> {
        &self.image
    }

    /// Pull a buffer's worth of samples and stage them, dropping backlog
    /// beyond two buffers to stay near real time.
    pub fn stage_audio(&self, stage_manager: &StageManager) {
        let available = self.ingress.available_frames();
        if available > 2 * self.buffer_frame_size {
            self.ingress
                .drop_samples(available - 2 * self.buffer_frame_size);
        }
        if available > self.buffer_frame_size {
            let mut samples = vec![0.0f32; self.buffer_frame_size * 2];
            let extracted = self
                .ingress
                .extract_samples(&mut samples, self.buffer_frame_size);
            if extracted < self.buffer_frame_size {
                error!("audio ingress under-delivered {extracted} frames");
            }
            self.buffer.write_f32_slice(0, &samples);
            stage_manager.stage_image(self.buffer.clone(), self.image.clone(), Box::new(|| {}));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingress_ring_semantics() {
        let ingress = Ingress::new(48000);
        assert_eq!(0, ingress.available_frames());
        ingress.ingest_samples(&[0.0, 0.1, 0.2, 0.3, 0.4, 0.5]);
        assert_eq!(3, ingress.available_frames());

        ingress.drop_samples(1);
        assert_eq!(2, ingress.available_frames());

        let mut out = [0.0f32; 4];
        assert_eq!(2, ingress.extract_samples(&mut out, 2));
        assert_eq!([0.2, 0.3, 0.4, 0.5], out);
        assert_eq!(0, ingress.available_frames());
    }
}
