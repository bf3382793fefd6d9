//! End-to-end exercises of the offscreen render pipeline. These require a
//! working Vulkan implementation; without one each test logs and passes
//! vacuously so the suite stays green on headless CI runners.

use std::sync::{mpsc, Arc};
use std::time::Duration;

use render_backend::node_tree::{AddAction, ROOT_GROUP_ID};
use render_backend::offscreen::Offscreen;
use render_backend::root_node::RootNode;
use render_backend::vulkan::logical_device::LogicalDevice;
use synth_graph::archetypes::Archetypes;

const TEST_VGENS: &str = r#"---
name: Level
rates: [ pixel ]
inputs: [ a ]
outputs: [ out ]
dimensions:
    - inputs: 1
      outputs: 4
shader: "@out = vec4(@a, @a, @a, 1.0);"
"#;

const TEST_DEF: &str = r#"
name: flatColor
parameters:
    - name: gain
      defaultValue: 1.0
vgens:
    - className: Level
      rate: pixel
      inputs:
          - type: parameter
            dimension: 1
            index: 0
      outputs:
          - dimension: 4
"#;

fn create_device() -> Option<Arc<LogicalDevice>> {
    match LogicalDevice::create_headless(false) {
        Ok(device) => Some(device),
        Err(err) => {
            eprintln!("no Vulkan device available, skipping: {err}");
            None
        }
    }
}

fn advance(offscreen: &Arc<Offscreen>) -> usize {
    let (sender, receiver) = mpsc::channel();
    offscreen.advance_frame(
        1.0 / 30.0,
        Box::new(move |frame_number| {
            let _ = sender.send(frame_number);
        }),
    );
    receiver
        .recv_timeout(Duration::from_secs(10))
        .expect("advance_frame completion")
}

#[test]
fn snapshot_mode_renders_stages_and_captures() {
    let Some(device) = create_device() else {
        return;
    };

    let offscreen = Offscreen::new(device.clone(), 64, 64, 0, 2).unwrap();
    let root_node =
        Arc::new(RootNode::new(device.clone(), offscreen.canvas().clone()).unwrap());
    root_node.create().unwrap();
    offscreen.run_threaded(root_node.clone());

    // Def admission through the parser into the GPU def map.
    let archetypes = Archetypes::new();
    assert_eq!(1, archetypes.parse_abstract_vgens_from_string(TEST_VGENS));
    let defs = archetypes.parse_from_string(TEST_DEF);
    assert_eq!(1, defs.len());
    assert!(root_node.def_add(defs[0].clone()));
    assert_eq!(1, root_node.number_of_scinth_defs());

    // Ten empty snapshot frames: each submits, signals, and calls back.
    for i in 0..10 {
        assert_eq!(i, advance(&offscreen));
    }

    // A new scinth with a parameter override renders on following frames.
    root_node.scinth_new(
        "flatColor",
        7,
        AddAction::GroupHead,
        ROOT_GROUP_ID,
        &[("gain".to_string(), 0.25)],
        &[],
    );
    assert_eq!(1, root_node.number_of_running_nodes());
    advance(&offscreen);
    root_node.node_set(7, &[("gain".to_string(), 0.75)], &[]);
    advance(&offscreen);

    // Host image staging installs into the image map after fence signal.
    let (sender, receiver) = mpsc::channel();
    root_node
        .stage_image(
            42,
            4,
            4,
            vec![0x80; 64],
            Box::new(move || {
                let _ = sender.send(());
            }),
        )
        .unwrap();
    receiver
        .recv_timeout(Duration::from_secs(10))
        .expect("stage_image completion");
    assert_eq!(Some((64, 4, 4)), root_node.query_image(42));

    // Screen shot of the next rendered frame.
    let dir = std::env::temp_dir().join("lumen-render-test");
    std::fs::create_dir_all(&dir).unwrap();
    let shot = dir.join("frame.png");
    let (sender, receiver) = mpsc::channel();
    offscreen.screen_shot(
        shot.clone(),
        "image/png",
        Box::new(move |ok| {
            let _ = sender.send(ok);
        }),
    );
    advance(&offscreen);
    assert_eq!(
        Ok(true),
        receiver
            .recv_timeout(Duration::from_secs(10))
            .map_err(|_| "timeout")
    );
    assert!(shot.is_file());

    // Pause, free, and shut down cleanly.
    root_node.node_run(&[(7, 0)]);
    advance(&offscreen);
    assert_eq!(0, root_node.number_of_running_nodes());
    root_node.node_free(&[7]);
    advance(&offscreen);

    offscreen.stop();
    root_node.destroy();
    device.wait_idle();
}
