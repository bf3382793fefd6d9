use std::sync::Arc;

use anyhow::anyhow;
use ash::vk;

use super::logical_device::LogicalDevice;

/// What a host-visible buffer will be used for, selecting its usage flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Vertex,
    Index,
    Uniform,
    Staging,
}

impl BufferKind {
    fn usage(&self) -> vk::BufferUsageFlags {
        match self {
            BufferKind::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferKind::Index => vk::BufferUsageFlags::INDEX_BUFFER,
            BufferKind::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferKind::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }
}

/// A host-visible, coherent, persistently mapped buffer.
///
/// Writes go through the mapped pointer; callers are responsible for not
/// writing a region the GPU is concurrently reading, which the frame fences
/// guarantee for per-image uniform buffers.
pub struct HostBuffer {
    pub buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    mapped: *mut u8,

    device: Arc<LogicalDevice>,
}

unsafe impl Send for HostBuffer {}
unsafe impl Sync for HostBuffer {}

impl std::fmt::Debug for HostBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostBuffer").field("size", &self.size).finish()
    }
}

impl HostBuffer {
    pub fn new(
        device: Arc<LogicalDevice>,
        kind: BufferKind,
        size: vk::DeviceSize,
    ) -> anyhow::Result<Arc<HostBuffer>> {
        let create_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(kind.usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.device.create_buffer(&create_info, None) }?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };
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
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(anyhow!("allocating {size} bytes of buffer memory failed: {err}"));
            }
        };

        let mapped = unsafe {
            device
                .device
                .bind_buffer_memory(buffer, memory, 0)
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
                    device.device.destroy_buffer(buffer, None);
                    device.device.free_memory(memory, None);
                }
                return Err(anyhow!("binding or mapping buffer memory failed: {err}"));
            }
        };

        Ok(Arc::new(HostBuffer {
            buffer,
            memory,
            size,
            mapped,
            device,
        }))
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn write_bytes(&self, offset: usize, bytes: &[u8]) {
        debug_assert!(offset + bytes.len() <= self.size as usize);
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.mapped.add(offset), bytes.len());
        }
    }

    pub fn write_f32(&self, offset: usize, value: f32) {
        self.write_bytes(offset, &value.to_ne_bytes());
    }

    pub fn write_f32_slice(&self, offset: usize, values: &[f32]) {
        debug_assert!(offset + values.len() * 4 <= self.size as usize);
        unsafe {
            std::ptr::copy_nonoverlapping(
                values.as_ptr() as *const u8,
                self.mapped.add(offset),
                values.len() * 4,
            );
        }
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.unmap_memory(self.memory);
            self.device.device.destroy_buffer(self.buffer, None);
            self.device.device.free_memory(self.memory, None);
        }
    }
}
