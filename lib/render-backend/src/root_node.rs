use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use ash::vk;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use synth_graph::abstract_scinth_def::AbstractScinthDef;

use crate::audio::{AudioStager, Ingress};
use crate::canvas::Canvas;
use crate::compiler::ShaderCompiler;
use crate::frame_context::FrameContext;
use crate::image_map::ImageMap;
use crate::node_tree::{AddAction, NodeTree, ROOT_GROUP_ID};
use crate::sampler_factory::SamplerFactory;
use crate::scinth::Scinth;
use crate::scinth_def::ScinthDef;
use crate::stage_manager::StageManager;
use crate::vulkan::buffer::{BufferKind, HostBuffer};
use crate::vulkan::command_buffer::CommandBuffers;
use crate::vulkan::command_pool::CommandPool;
use crate::vulkan::image::DeviceImage;
use crate::vulkan::logical_device::LogicalDevice;

struct Tree {
    nodes: NodeTree<Arc<Mutex<Scinth>>>,
    audio_stagers: Vec<AudioStager>,
    commands_dirty: bool,
    draw_secondary_per_slot: Vec<Vec<Arc<CommandBuffers>>>,
    compute_secondary_per_slot: Vec<Vec<Arc<CommandBuffers>>>,
}

/// Root of the render tree, with node id 0. Owns the shared render-side
/// registries (compiled defs, staged images, samplers) and the primary
/// command buffers the offscreen driver submits.
///
/// Every structural mutation marks the primary command buffers dirty;
/// `prepare_frame` observes the flag and re-records them.
pub struct RootNode {
    device: Arc<LogicalDevice>,
    canvas: Arc<Canvas>,
    compiler: ShaderCompiler,
    draw_command_pool: Arc<CommandPool>,
    stage_manager: Arc<StageManager>,
    sampler_factory: Arc<SamplerFactory>,
    image_map: Arc<ImageMap>,
    node_serial: AtomicI32,

    scinth_defs: Mutex<HashMap<String, Arc<ScinthDef>>>,

    tree: Mutex<Tree>,
    clear_color: Mutex<[f32; 3]>,
    draw_primary: Mutex<Option<Arc<CommandBuffers>>>,
}

impl std::fmt::Debug for RootNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootNode").finish()
    }
}

impl RootNode {
    pub fn new(device: Arc<LogicalDevice>, canvas: Arc<Canvas>) -> anyhow::Result<RootNode> {
        let draw_command_pool = CommandPool::new(device.clone())?;
        let stage_manager = Arc::new(StageManager::new(device.clone())?);
        let number_of_images = canvas.number_of_images();
        Ok(RootNode {
            sampler_factory: Arc::new(SamplerFactory::new(device.clone())),
            image_map: Arc::new(ImageMap::new()),
            compiler: ShaderCompiler::new(),
            draw_command_pool,
            stage_manager,
            node_serial: AtomicI32::new(-2),
            scinth_defs: Mutex::new(HashMap::new()),
            tree: Mutex::new(Tree {
                nodes: NodeTree::new(),
                audio_stagers: Vec::new(),
                commands_dirty: true,
                draw_secondary_per_slot: vec![Vec::new(); number_of_images],
                compute_secondary_per_slot: vec![Vec::new(); number_of_images],
            }),
            clear_color: Mutex::new([0.0, 0.0, 0.0]),
            draw_primary: Mutex::new(None),
            device,
            canvas,
        })
    }

    /// Stage the shared 1x1 transparent black empty image, bound wherever a
    /// requested image id is missing.
    pub fn create(&self) -> anyhow::Result<()> {
        let empty_buffer = HostBuffer::new(self.device.clone(), BufferKind::Staging, 4)?;
        empty_buffer.write_bytes(0, &[0, 0, 0, 0]);
        let empty_image =
            DeviceImage::new_sampled(self.device.clone(), vk::Format::R8G8B8A8_UNORM, 1, 1)?;
        let image_map = self.image_map.clone();
        let image = empty_image.clone();
        self.stage_manager.stage_image(
            empty_buffer,
            empty_image,
            Box::new(move || {
                image_map.set_empty_image(image);
                info!("finished staging the empty image");
            }),
        );
        Ok(())
    }

    /// Tear down the tree and every cached GPU object. Called after the
    /// render loop exits and the device has quiesced.
    pub fn destroy(&self) {
        {
            let mut tree = self.tree.lock();
            let _ = tree.nodes.remove_group_children(ROOT_GROUP_ID);
            tree.audio_stagers.clear();
            for slot in &mut tree.draw_secondary_per_slot {
                slot.clear();
            }
            for slot in &mut tree.compute_secondary_per_slot {
                slot.clear();
            }
        }
        *self.draw_primary.lock() = None;
        self.stage_manager.stop();
        self.scinth_defs.lock().clear();
    }

    pub fn stage_manager(&self) -> &Arc<StageManager> {
        &self.stage_manager
    }

    pub fn image_map(&self) -> &Arc<ImageMap> {
        &self.image_map
    }

    pub fn canvas(&self) -> &Arc<Canvas> {
        &self.canvas
    }

    /// Compile an abstract def into its GPU objects and admit it to the def
    /// map under its name, clobbering any existing def of that name.
    pub fn def_add(&self, abstract_def: Arc<AbstractScinthDef>) -> bool {
        match ScinthDef::build(
            &self.device,
            &self.canvas,
            &self.draw_command_pool,
            &self.sampler_factory,
            &self.compiler,
            abstract_def,
        ) {
            Ok(scinth_def) => {
                let name = scinth_def.abstract_def().name().to_string();
                self.scinth_defs.lock().insert(name, scinth_def);
                true
            }
            Err(err) => {
                error!("failed building ScinthDef: {err}");
                false
            }
        }
    }

    pub fn def_free(&self, names: &[String]) {
        let mut defs = self.scinth_defs.lock();
        for name in names {
            if defs.remove(name).is_none() {
                warn!("failed to free ScinthDef {name}, name not found");
            }
        }
    }

    pub fn number_of_scinth_defs(&self) -> usize {
        self.scinth_defs.lock().len()
    }

    /// Create a new Scinth from a def, cue it to start on its first
    /// prepared frame, and splice it into the tree. A negative id is
    /// replaced with a server-assigned serial; reusing a live id frees the
    /// old node first.
    pub fn scinth_new(
        &self,
        def_name: &str,
        node_id: i32,
        add_action: AddAction,
        target_id: i32,
        named_values: &[(String, f32)],
        indexed_values: &[(usize, f32)],
    ) {
        let Some(scinth_def) = self.scinth_defs.lock().get(def_name).cloned() else {
            error!("scinth_new found no ScinthDef named {def_name}");
            return;
        };

        let node_id = if node_id < 0 {
            self.node_serial.fetch_sub(1, Ordering::SeqCst)
        } else {
            node_id
        };

        let mut tree = self.tree.lock();
        if tree.nodes.contains(node_id) {
            debug!("scinth_new clobbering existing node {node_id}");
            match tree.nodes.remove(node_id) {
                Ok(_) => tree.commands_dirty = true,
                Err(err) => {
                    warn!("failed to clobber node {node_id}: {err}");
                    return;
                }
            }
        }

        let mut scinth =
            match Scinth::create(&self.device, node_id, scinth_def, &self.image_map) {
                Ok(scinth) => scinth,
                Err(err) => {
                    error!("failed creating Scinth {node_id} from def {def_name}: {err}");
                    return;
                }
            };
        for (name, value) in named_values {
            scinth.set_parameter_by_name(name, *value);
        }
        for (index, value) in indexed_values {
            scinth.set_parameter_by_index(*index, *value);
        }

        if let Err(err) = tree.nodes.insert_scinth(
            node_id,
            Arc::new(Mutex::new(scinth)),
            add_action,
            target_id,
        ) {
            warn!("failed to place Scinth {node_id}: {err}");
            return;
        }
        tree.commands_dirty = true;
    }

    /// Recursively free every node in the list; groups take their whole
    /// subtree with them. FrameContexts retain any freed Scinth still
    /// pipelined on the GPU.
    pub fn node_free(&self, node_ids: &[i32]) {
        let mut tree = self.tree.lock();
        for node_id in node_ids {
            match tree.nodes.remove(*node_id) {
                Ok(_) => tree.commands_dirty = true,
                Err(err) => warn!("node_free: {err}"),
            }
        }
    }

    /// Pause or play nodes; addressing a group applies to every Scinth in
    /// its subtree.
    pub fn node_run(&self, pairs: &[(i32, i32)]) {
        let mut tree = self.tree.lock();
        for (node_id, run) in pairs {
            match tree.nodes.scinth_ids_in(*node_id) {
                Ok(scinth_ids) => {
                    for scinth_id in scinth_ids {
                        if let Some(scinth) = tree.nodes.payload(scinth_id) {
                            scinth.lock().set_running(*run != 0);
                        }
                    }
                    tree.commands_dirty = true;
                }
                Err(err) => warn!("node_run: {err}"),
            }
        }
    }

    /// Set control parameters on a node, or on every Scinth in a group.
    pub fn node_set(
        &self,
        node_id: i32,
        named_values: &[(String, f32)],
        indexed_values: &[(usize, f32)],
    ) {
        let mut tree = self.tree.lock();
        match tree.nodes.scinth_ids_in(node_id) {
            Ok(scinth_ids) => {
                for scinth_id in scinth_ids {
                    if let Some(scinth) = tree.nodes.payload(scinth_id) {
                        let mut scinth = scinth.lock();
                        for (name, value) in named_values {
                            scinth.set_parameter_by_name(name, *value);
                        }
                        for (index, value) in indexed_values {
                            scinth.set_parameter_by_index(*index, *value);
                        }
                    }
                }
                tree.commands_dirty = true;
            }
            Err(err) => warn!("node_set: {err}"),
        }
    }

    /// Move each pair's first node immediately before its second.
    pub fn node_before(&self, pairs: &[(i32, i32)]) {
        let mut tree = self.tree.lock();
        for (node_id, target_id) in pairs {
            match tree
                .nodes
                .move_node(*node_id, AddAction::BeforeNode, *target_id)
            {
                Ok(()) => tree.commands_dirty = true,
                Err(err) => warn!("node_before: {err}"),
            }
        }
    }

    /// Move each pair's first node immediately after its second.
    pub fn node_after(&self, pairs: &[(i32, i32)]) {
        let mut tree = self.tree.lock();
        for (node_id, target_id) in pairs {
            match tree
                .nodes
                .move_node(*node_id, AddAction::AfterNode, *target_id)
            {
                Ok(()) => tree.commands_dirty = true,
                Err(err) => warn!("node_after: {err}"),
            }
        }
    }

    /// Re-splice a list of nodes relative to a target, preserving the list
    /// order. Replace is not supported for ordering.
    pub fn node_order(&self, add_action: AddAction, target_id: i32, node_ids: &[i32]) {
        if matches!(add_action, AddAction::Replace) {
            warn!("node_order does not support the replace action");
            return;
        }
        let mut tree = self.tree.lock();
        let mut anchor = target_id;
        let mut anchor_action = add_action;
        for node_id in node_ids {
            if *node_id == target_id {
                warn!("node_order skipping move of node {node_id} relative to itself");
                continue;
            }
            match tree.nodes.move_node(*node_id, anchor_action, anchor) {
                Ok(()) => {
                    tree.commands_dirty = true;
                    // Subsequent nodes follow the one just placed, keeping
                    // the list order for head/after placements.
                    match add_action {
                        AddAction::GroupHead | AddAction::AfterNode => {
                            anchor = *node_id;
                            anchor_action = AddAction::AfterNode;
                        }
                        AddAction::GroupTail | AddAction::BeforeNode => {}
                        AddAction::Replace => unreachable!(),
                    }
                }
                Err(err) => warn!("node_order: {err}"),
            }
        }
    }

    /// Create new empty groups, each placed by its own add action.
    pub fn group_new(&self, groups: &[(i32, AddAction, i32)]) {
        let mut tree = self.tree.lock();
        for (group_id, add_action, target_id) in groups {
            let group_id = if *group_id < 0 {
                self.node_serial.fetch_sub(1, Ordering::SeqCst)
            } else {
                *group_id
            };
            match tree.nodes.insert_group(group_id, *add_action, *target_id) {
                Ok(_) => tree.commands_dirty = true,
                Err(err) => warn!("group_new: {err}"),
            }
        }
    }

    /// Move nodes to the head of groups, for execution first in the group.
    pub fn group_head(&self, pairs: &[(i32, i32)]) {
        let mut tree = self.tree.lock();
        for (group_id, node_id) in pairs {
            match tree.nodes.move_node(*node_id, AddAction::GroupHead, *group_id) {
                Ok(()) => tree.commands_dirty = true,
                Err(err) => warn!("group_head: {err}"),
            }
        }
    }

    /// Move nodes to the tail of groups, for execution last in the group.
    pub fn group_tail(&self, pairs: &[(i32, i32)]) {
        let mut tree = self.tree.lock();
        for (group_id, node_id) in pairs {
            match tree.nodes.move_node(*node_id, AddAction::GroupTail, *group_id) {
                Ok(()) => tree.commands_dirty = true,
                Err(err) => warn!("group_tail: {err}"),
            }
        }
    }

    /// Free every node inside each group; the groups themselves remain.
    pub fn group_free_all(&self, group_ids: &[i32]) {
        let mut tree = self.tree.lock();
        for group_id in group_ids {
            match tree.nodes.remove_group_children(*group_id) {
                Ok(_) => tree.commands_dirty = true,
                Err(err) => warn!("group_free_all: {err}"),
            }
        }
    }

    /// Free only the Scinths in each group's subtree; groups remain.
    pub fn group_deep_free(&self, group_ids: &[i32]) {
        let mut tree = self.tree.lock();
        for group_id in group_ids {
            match tree.nodes.remove_scinths_deep(*group_id) {
                Ok(_) => tree.commands_dirty = true,
                Err(err) => warn!("group_deep_free: {err}"),
            }
        }
    }

    /// Post a description of each group's subtree to the log; a nonzero
    /// flag also posts Scinth parameter values.
    pub fn group_dump_tree(&self, pairs: &[(i32, i32)]) {
        let tree = self.tree.lock();
        for (group_id, flag) in pairs {
            if !tree.nodes.is_group(*group_id) {
                warn!("group_dump_tree: node {group_id} is not a group");
                continue;
            }
            info!("NODE TREE Group {group_id}");
            self.dump_group(&tree, *group_id, 1, *flag != 0);
        }
    }

    fn dump_group(&self, tree: &Tree, group_id: i32, depth: usize, with_controls: bool) {
        let Some(children) = tree.nodes.children_of(group_id) else {
            return;
        };
        let indent = "   ".repeat(depth);
        for (child_id, is_group) in children {
            if is_group {
                info!("{indent}{child_id} group");
                self.dump_group(tree, child_id, depth + 1, with_controls);
            } else if let Some(scinth) = tree.nodes.payload(child_id) {
                let scinth = scinth.lock();
                let def_name = scinth.scinth_def().abstract_def().name().to_string();
                info!("{indent}{child_id} {def_name}");
                if with_controls {
                    for (index, parameter) in scinth
                        .scinth_def()
                        .abstract_def()
                        .parameters()
                        .iter()
                        .enumerate()
                    {
                        info!(
                            "{indent}   {}: {}",
                            parameter.name(),
                            scinth.parameter_value(index).unwrap_or_default()
                        );
                    }
                }
            }
        }
    }

    pub fn number_of_running_nodes(&self) -> usize {
        let tree = self.tree.lock();
        tree.nodes
            .flat()
            .iter()
            .filter(|id| {
                tree.nodes
                    .payload(**id)
                    .is_some_and(|scinth| scinth.lock().running())
            })
            .count()
    }

    /// Copy a decoded RGBA image to the GPU and install it in the image map
    /// under `image_id` once the transfer completes.
    pub fn stage_image(
        &self,
        image_id: i32,
        width: u32,
        height: u32,
        bytes: Vec<u8>,
        completion: Box<dyn FnOnce() + Send>,
    ) -> anyhow::Result<()> {
        let expected = width as usize * height as usize * 4;
        if bytes.len() < expected {
            return Err(anyhow!(
                "image {image_id} supplied {} bytes, needs {expected}",
                bytes.len()
            ));
        }
        let buffer = HostBuffer::new(
            self.device.clone(),
            BufferKind::Staging,
            expected as vk::DeviceSize,
        )?;
        buffer.write_bytes(0, &bytes[0..expected]);
        let image = DeviceImage::new_sampled(
            self.device.clone(),
            vk::Format::R8G8B8A8_UNORM,
            width,
            height,
        )?;
        let image_map = self.image_map.clone();
        let install = image.clone();
        self.stage_manager.stage_image(
            buffer,
            image,
            Box::new(move || {
                image_map.add_image(image_id, install);
                completion();
            }),
        );
        Ok(())
    }

    /// Basic information about a staged image: (size in bytes, width,
    /// height).
    pub fn query_image(&self, image_id: i32) -> Option<(usize, u32, u32)> {
        self.image_map.get_image(image_id).map(|image| {
            (
                image.width() as usize * image.height() as usize * 4,
                image.width(),
                image.height(),
            )
        })
    }

    /// Consume audio from `ingress` on every prepared frame, exposing it as
    /// the image registered under `image_id`.
    pub fn add_audio_ingress(
        &self,
        ingress: Arc<Ingress>,
        image_id: i32,
    ) -> anyhow::Result<()> {
        let stager = AudioStager::new(&self.device, ingress)?;
        self.image_map.add_image(image_id, stager.image().clone());
        self.tree.lock().audio_stagers.push(stager);
        Ok(())
    }

    pub fn set_clear_color(&self, color: [f32; 3]) {
        *self.clear_color.lock() = color;
        self.tree.lock().commands_dirty = true;
    }

    /// Build this frame: stage audio, prepare every running Scinth in draw
    /// order, snapshot the secondary lists for this image slot, and rebuild
    /// the primary command buffers if anything structural changed. Returns
    /// true when the primary was rebuilt.
    pub fn prepare_frame(&self, context: &mut FrameContext) -> bool {
        let image_index = context.image_index();
        let frame_time = context.frame_time();

        let mut tree = self.tree.lock();
        for stager in &tree.audio_stagers {
            stager.stage_audio(&self.stage_manager);
        }

        let mut draw_secondary = Vec::new();
        let mut compute_secondary = Vec::new();
        for scinth_id in tree.nodes.flat().to_vec() {
            let Some(scinth) = tree.nodes.payload(scinth_id) else {
                continue;
            };
            let scinth = scinth.clone();
            let mut locked = scinth.lock();
            if !locked.running() {
                continue;
            }
            if let Err(err) = locked.prepare_frame(image_index, frame_time) {
                error!("failed preparing Scinth {scinth_id}: {err}");
                continue;
            }
            if let Some(compute) = locked.compute_commands() {
                compute_secondary.push(compute);
            }
            if let Some(draw) = locked.draw_commands() {
                draw_secondary.push(draw);
            }
            drop(locked);
            context.append_node(scinth);
        }

        tree.draw_secondary_per_slot[image_index] = draw_secondary.clone();
        tree.compute_secondary_per_slot[image_index] = compute_secondary.clone();

        let rebuilt = if tree.commands_dirty {
            match self.rebuild_primary(&tree) {
                Ok(primary) => {
                    *self.draw_primary.lock() = Some(primary);
                    tree.commands_dirty = false;
                    true
                }
                Err(err) => {
                    error!("failed rebuilding primary command buffers: {err}");
                    false
                }
            }
        } else {
            false
        };
        drop(tree);

        for commands in draw_secondary {
            context.append_draw_commands(commands);
        }
        for commands in compute_secondary {
            context.append_compute_commands(commands);
        }
        if let Some(primary) = self.draw_primary.lock().clone() {
            context.set_draw_primary(primary);
        }
        rebuilt
    }

    /// Record the primary buffers, one per image slot: begin the render
    /// pass with the clear color, execute that slot's secondary list, end.
    fn rebuild_primary(&self, tree: &Tree) -> anyhow::Result<Arc<CommandBuffers>> {
        let number_of_images = self.canvas.number_of_images();
        let commands = CommandBuffers::new(
            self.draw_command_pool.clone(),
            vk::CommandBufferLevel::PRIMARY,
            number_of_images as u32,
        )?;
        let clear_color = *self.clear_color.lock();
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [clear_color[0], clear_color[1], clear_color[2], 1.0],
            },
        }];

        let device = &self.device.device;
        for slot in 0..number_of_images {
            let buffer = commands.buffer(slot);
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);
            let secondaries = &tree.draw_secondary_per_slot[slot];
            let render_pass_info = vk::RenderPassBeginInfo::default()
                .render_pass(self.canvas.render_pass())
                .framebuffer(self.canvas.framebuffer(slot))
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: self.canvas.extent(),
                })
                .clear_values(&clear_values);
            let contents = if secondaries.is_empty() {
                vk::SubpassContents::INLINE
            } else {
                vk::SubpassContents::SECONDARY_COMMAND_BUFFERS
            };
            unsafe {
                device.begin_command_buffer(buffer, &begin_info)?;
                device.cmd_begin_render_pass(buffer, &render_pass_info, contents);
                if !secondaries.is_empty() {
                    let buffers: Vec<vk::CommandBuffer> = secondaries
                        .iter()
                        .map(|commands| commands.buffer(slot))
                        .collect();
                    device.cmd_execute_commands(buffer, &buffers);
                }
                device.cmd_end_render_pass(buffer);
                device.end_command_buffer(buffer)?;
            }
            for secondary in secondaries {
                commands.associate_resource(secondary.clone());
            }
        }
        Ok(commands)
    }
}

impl scheduler::DefReceiver for RootNode {
    fn build_scinth_def(&self, abstract_scinth_def: Arc<AbstractScinthDef>) -> bool {
        self.def_add(abstract_scinth_def)
    }

    fn stage_decoded_image(
        &self,
        image_id: i32,
        width: u32,
        height: u32,
        bytes: Vec<u8>,
        completion: Box<dyn FnOnce() + Send>,
    ) {
        if let Err(err) = self.stage_image(image_id, width, height, bytes, completion) {
            error!("failed staging decoded image {image_id}: {err}");
        }
    }
}
