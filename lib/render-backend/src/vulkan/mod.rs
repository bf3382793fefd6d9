pub mod buffer;
pub mod command_buffer;
pub mod command_pool;
pub mod descriptor;
pub mod fence;
pub mod image;
pub mod instance;
pub mod logical_device;
pub mod phy_device;
pub mod render_sync;
pub mod sampler;
pub mod semaphore;
pub mod shader;
pub mod swapchain;
