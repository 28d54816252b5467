//! Render a single frame to a binary PPM image.

use std::io::Write;
use std::path::{Path, PathBuf};

use framecast_common::config::ExportDefaults;
use framecast_render_engine::{FrameRenderer, RenderedFrame, SceneRenderer};
use framecast_scene_model::{ExportConfig, Scene};

pub fn run(
    scene_path: PathBuf,
    index: u64,
    output: PathBuf,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    defaults: &ExportDefaults,
) -> anyhow::Result<()> {
    let scene =
        Scene::load(&scene_path).map_err(|e| anyhow::anyhow!("Failed to load scene: {e}"))?;

    let mut config = ExportConfig::from_defaults(defaults, output.clone());
    config.width = width.unwrap_or(config.width);
    config.height = height.unwrap_or(config.height);
    config.fps = fps.unwrap_or(config.fps);
    config.validate()?;

    let mut renderer = SceneRenderer::new(scene);
    let frame = renderer.render(index, &config)?;
    write_ppm(&output, config.width, config.height, &frame)?;

    println!(
        "Frame {index} ({:.3}s) written to {} [checksum {:016x}]",
        config.frame_time_secs(index),
        output.display(),
        frame.checksum()
    );
    Ok(())
}

/// Write a binary (P6) PPM.
pub fn write_ppm(path: &Path, width: u32, height: u32, frame: &RenderedFrame) -> anyhow::Result<()> {
    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    write!(file, "P6\n{width} {height}\n255\n")?;
    file.write_all(frame.pixels())?;
    file.flush()?;
    Ok(())
}
