pub mod audio;
pub mod canvas;
pub mod compiler;
pub mod encode;
pub mod frame_context;
pub mod frame_timer;
pub mod image_map;
pub mod node_tree;
pub mod offscreen;
pub mod pipeline;
pub mod root_node;
pub mod sampler_factory;
pub mod scinth;
pub mod scinth_def;
pub mod stage_manager;
pub mod vulkan;
