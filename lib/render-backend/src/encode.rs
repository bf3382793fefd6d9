use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use log::{error, info};
use parking_lot::Mutex;

/// One frame of tightly packed RGBA pixels handed to encoders. The data
/// lock lets the render loop refill a recycled buffer while encoders from
/// previous frames have already released theirs.
#[derive(Debug)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    data: Mutex<Vec<u8>>,
}

impl PixelBuffer {
    fn new(width: u32, height: u32) -> PixelBuffer {
        PixelBuffer {
            width,
            height,
            data: Mutex::new(vec![0; (width * height * 4) as usize]),
        }
    }

    pub fn size_in_bytes(&self) -> usize {
        (self.width * self.height * 4) as usize
    }

    pub fn fill_with(&self, f: impl FnOnce(&mut [u8])) {
        f(&mut self.data.lock())
    }

    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.data.lock())
    }
}

/// Recycles frame-sized pixel buffers between readback and encoding so the
/// render loop does not allocate per frame.
pub struct BufferPool {
    width: u32,
    height: u32,
    buffers: Mutex<Vec<Arc<PixelBuffer>>>,
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl BufferPool {
    pub fn new(width: u32, height: u32) -> BufferPool {
        BufferPool {
            width,
            height,
            buffers: Mutex::new(Vec::new()),
        }
    }

    /// Returns a buffer no encoder references anymore, or a fresh
    /// allocation when all pooled buffers are still in flight.
    pub fn get_buffer(&self) -> Arc<PixelBuffer> {
        let mut buffers = self.buffers.lock();
        for buffer in buffers.iter() {
            if Arc::strong_count(buffer) == 1 {
                return buffer.clone();
            }
        }
        let buffer = Arc::new(PixelBuffer::new(self.width, self.height));
        buffers.push(buffer.clone());
        buffer
    }
}

/// Callback invoked with the readback pixels once the frame an encoder
/// queued for has signaled its fence.
pub type SendBuffer = Box<dyn FnOnce(Arc<PixelBuffer>) + Send>;

/// A sink for rendered frames. The offscreen driver polls every encoder
/// once per rendered frame; an encoder that wants the frame returns a
/// [`SendBuffer`], and returning `keep` false removes it from the list.
pub trait Encoder: Send {
    fn queue_encode(&mut self, time: f64, frame_number: usize) -> (Option<SendBuffer>, bool);
}

/// Writes a single frame as a PNG file, then removes itself.
pub struct ScreenShotEncoder {
    file_path: PathBuf,
    completion: Option<Box<dyn FnOnce(bool) + Send>>,
}

impl ScreenShotEncoder {
    pub fn new(
        file_path: PathBuf,
        completion: Box<dyn FnOnce(bool) + Send>,
    ) -> ScreenShotEncoder {
        ScreenShotEncoder {
            file_path,
            completion: Some(completion),
        }
    }

    fn write_png(file_path: &PathBuf, buffer: &PixelBuffer) -> anyhow::Result<()> {
        let file = std::fs::File::create(file_path)
            .with_context(|| format!("creating {file_path:?}"))?;
        let mut encoder =
            png::Encoder::new(std::io::BufWriter::new(file), buffer.width, buffer.height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header().context("writing png header")?;
        buffer.with_data(|data| {
            writer
                .write_image_data(data)
                .context("writing png image data")
        })?;
        Ok(())
    }
}

impl Encoder for ScreenShotEncoder {
    fn queue_encode(&mut self, _time: f64, _frame_number: usize) -> (Option<SendBuffer>, bool) {
        let file_path = self.file_path.clone();
        let completion = self.completion.take();
        let send: SendBuffer = Box::new(move |buffer: Arc<PixelBuffer>| {
            let result = Self::write_png(&file_path, &buffer);
            match &result {
                Ok(()) => info!("wrote screenshot to {file_path:?}"),
                Err(err) => error!("failed to write screenshot to {file_path:?}: {err}"),
            }
            if let Some(completion) = completion {
                completion(result.is_ok());
            }
        });
        (Some(send), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_pool_recycles_unreferenced_buffers() {
        let pool = BufferPool::new(4, 4);
        let first = pool.get_buffer();
        let first_ptr = Arc::as_ptr(&first);
        drop(first);
        let second = pool.get_buffer();
        assert_eq!(first_ptr, Arc::as_ptr(&second));

        // A still-referenced buffer is not handed out again.
        let third = pool.get_buffer();
        assert_ne!(Arc::as_ptr(&second), Arc::as_ptr(&third));
    }

    #[test]
    fn screen_shot_encoder_is_one_shot() {
        let dir = std::env::temp_dir().join("synth-encode-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("shot.png");
        let fired = Arc::new(Mutex::new(None));
        let mut encoder = {
            let fired = fired.clone();
            ScreenShotEncoder::new(
                path.clone(),
                Box::new(move |ok| {
                    *fired.lock() = Some(ok);
                }),
            )
        };

        let (send, keep) = encoder.queue_encode(0.0, 0);
        assert!(!keep);
        let buffer = Arc::new(PixelBuffer::new(2, 2));
        send.unwrap()(buffer);
        assert_eq!(Some(true), *fired.lock());
        assert!(path.is_file());
    }
}
