use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::Parser;
use log::{error, info};
use render_backend::node_tree::{AddAction, ROOT_GROUP_ID};
use render_backend::offscreen::Offscreen;
use render_backend::root_node::RootNode;
use render_backend::vulkan::logical_device::LogicalDevice;
use scheduler::Async;
use synth_graph::archetypes::Archetypes;

/// Offscreen visual synthesis server. Loads VGen and ScinthDef definitions,
/// renders the tree into an offscreen framebuffer, and can capture frames
/// to PNG files. An OSC control surface plugs into the same APIs this
/// binary drives directly.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Framebuffer width in pixels.
    #[arg(long, default_value_t = 800)]
    width: u32,

    /// Framebuffer height in pixels.
    #[arg(long, default_value_t = 600)]
    height: u32,

    /// Target frame rate; 0 selects snapshot mode where frames only advance
    /// on request.
    #[arg(long, default_value_t = 30)]
    frame_rate: i32,

    /// Number of scheduler worker threads.
    #[arg(long, default_value_t = 2)]
    workers: usize,

    /// Directory of VGen yaml definitions to load at startup.
    #[arg(long)]
    vgen_dir: Option<PathBuf>,

    /// Directory of ScinthDef yaml definitions to load at startup.
    #[arg(long)]
    def_dir: Option<PathBuf>,

    /// Name of a ScinthDef to instantiate at the root group once loaded.
    #[arg(long)]
    scinth: Option<String>,

    /// Number of frames to render before exiting.
    #[arg(long, default_value_t = 300)]
    frames: usize,

    /// Write the final frame to this PNG file.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Enable Vulkan validation layers.
    #[arg(long, default_value_t = false)]
    validation: bool,
}

fn main() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let args = Args::parse();
    if let Err(err) = run(args) {
        error!("server failed: {err:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let archetypes = Arc::new(Archetypes::new());
    let device =
        LogicalDevice::create_headless(args.validation).context("creating Vulkan device")?;
    let offscreen = Offscreen::new(
        device.clone(),
        args.width,
        args.height,
        args.frame_rate,
        2,
    )
    .context("creating offscreen renderer")?;
    let root_node = Arc::new(
        RootNode::new(device.clone(), offscreen.canvas().clone())
            .context("creating render tree")?,
    );
    root_node.create().context("staging startup resources")?;

    let mut scheduler = Async::new(archetypes.clone(), root_node.clone());
    scheduler.run(args.workers);

    offscreen.run_threaded(root_node.clone());

    if let Some(vgen_dir) = &args.vgen_dir {
        let (sender, receiver) = mpsc::channel();
        scheduler.vgen_load_directory(vgen_dir.clone(), move |count| {
            let _ = sender.send(count);
        });
        let count = receiver
            .recv()
            .map_err(|_| anyhow!("vgen load completion dropped"))?;
        if count < 0 {
            return Err(anyhow!("failed loading VGens from {vgen_dir:?}"));
        }
        info!("loaded {count} VGens from {vgen_dir:?}");
    }

    if let Some(def_dir) = &args.def_dir {
        let (sender, receiver) = mpsc::channel();
        scheduler.scinth_def_load_directory(def_dir.clone(), move |count| {
            let _ = sender.send(count);
        });
        let count = receiver
            .recv()
            .map_err(|_| anyhow!("def load completion dropped"))?;
        if count < 0 {
            return Err(anyhow!("failed loading ScinthDefs from {def_dir:?}"));
        }
        info!("loaded {count} ScinthDefs from {def_dir:?}");
    }

    if let Some(def_name) = &args.scinth {
        root_node.scinth_new(def_name, -1, AddAction::GroupTail, ROOT_GROUP_ID, &[], &[]);
        info!(
            "created scinth from def {def_name}, {} nodes running",
            root_node.number_of_running_nodes()
        );
    }

    if offscreen.is_snap_shot_mode() {
        // Snapshot mode: advance frames one at a time at a nominal 30 Hz.
        for _ in 0..args.frames {
            advance_one_frame(&offscreen)?;
        }
    } else {
        let seconds = args.frames as f64 / args.frame_rate.max(1) as f64;
        std::thread::sleep(Duration::from_secs_f64(seconds));
    }

    if let Some(output) = &args.output {
        let (sender, receiver) = mpsc::channel();
        offscreen.screen_shot(
            output.clone(),
            "image/png",
            Box::new(move |ok| {
                let _ = sender.send(ok);
            }),
        );
        if offscreen.is_snap_shot_mode() {
            // The capture needs a frame rendered after the encoder queued.
            advance_one_frame(&offscreen)?;
            advance_one_frame(&offscreen)?;
        }
        match receiver.recv_timeout(Duration::from_secs(10)) {
            Ok(true) => info!("captured final frame to {output:?}"),
            Ok(false) => error!("failed capturing final frame to {output:?}"),
            Err(_) => error!("timed out capturing final frame to {output:?}"),
        }
    }

    offscreen.stop();
    scheduler.stop();
    root_node.destroy();
    device.wait_idle();
    Ok(())
}

fn advance_one_frame(offscreen: &Arc<Offscreen>) -> anyhow::Result<usize> {
    let (sender, receiver) = mpsc::channel();
    offscreen.advance_frame(
        1.0 / 30.0,
        Box::new(move |frame_number| {
            let _ = sender.send(frame_number);
        }),
    );
    receiver
        .recv()
        .map_err(|_| anyhow!("advance_frame completion dropped"))
}
