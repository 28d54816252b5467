//! Show scene information.

use std::path::PathBuf;

use framecast_common::config::ExportDefaults;
use framecast_scene_model::{ExportConfig, LayerKind, Scene};

pub fn run(path: PathBuf, defaults: &ExportDefaults) -> anyhow::Result<()> {
    let scene = Scene::load(&path).map_err(|e| anyhow::anyhow!("Failed to load scene: {e}"))?;
    let desc = scene.description();

    println!("Scene: {}", desc.name);
    println!("  Version: {}", desc.version);
    println!(
        "  Background: #{:02x}{:02x}{:02x}",
        desc.background[0], desc.background[1], desc.background[2]
    );
    println!();

    println!("Palettes:");
    for (name, colours) in &desc.palettes {
        println!("  {name}: {} colour(s)", colours.len());
    }
    println!();

    println!("Layers:");
    for (idx, layer) in desc.layers.iter().enumerate() {
        let detail = match &layer.kind {
            LayerKind::Spiral { arms, twist, speed } => {
                format!("{arms} arm(s), twist {twist}, {speed} turn/s")
            }
            LayerKind::Rings { density, speed } => format!("density {density}, speed {speed}"),
            LayerKind::Pulse { period_secs } => format!("period {period_secs}s"),
        };
        let window = match layer.end_secs {
            Some(end) => format!("{:.2}s..{end:.2}s", layer.start_secs),
            None => format!("from {:.2}s", layer.start_secs),
        };
        println!(
            "  [{idx}] {} ({detail}) palette '{}', opacity {}, {window}",
            layer.kind.label(),
            layer.palette,
            layer.opacity
        );
    }
    println!();

    let config = ExportConfig::from_defaults(defaults, "output.mp4");
    println!("Default export:");
    println!(
        "  Output: {}x{} @ {}fps, {:.2}s",
        config.width, config.height, config.fps, config.length_secs
    );
    println!("  Frames: {}", config.total_frames());
    println!(
        "  Frame size: {:.2} MiB",
        config.frame_len() as f64 / (1024.0 * 1024.0)
    );
    println!(
        "  Workers: {} (look-ahead {} frames)",
        config.threads,
        config.lookahead_window()
    );

    Ok(())
}
