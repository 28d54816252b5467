//! Frame renderers.
//!
//! A renderer turns a frame index into one RGB24 buffer. Rendering must be
//! deterministic: the same scene, config and index always produce the same
//! bytes, whichever worker draws the frame and in whatever order.

use std::f64::consts::TAU;
use std::sync::Arc;

use framecast_common::error::{FramecastError, FramecastResult};
use framecast_scene_model::{ExportConfig, LayerKind, Rgb, Scene, BYTES_PER_PIXEL};

use crate::frame::RenderedFrame;

/// Draws single frames.
///
/// Each worker owns its own instance, so implementations may keep mutable
/// per-instance caches without synchronisation.
pub trait FrameRenderer: Send {
    /// Render frame `index` at `config.width × config.height`.
    fn render(&mut self, index: u64, config: &ExportConfig) -> FramecastResult<RenderedFrame>;

    /// Renderer name for logs.
    fn name(&self) -> &str;
}

/// Builds one renderer per worker.
pub type RendererFactory = Arc<dyn Fn() -> Box<dyn FrameRenderer> + Send + Sync>;

/// Factory producing [`SceneRenderer`]s over a shared scene.
pub fn scene_renderer_factory(scene: Scene) -> RendererFactory {
    Arc::new(move || Box::new(SceneRenderer::new(scene.clone())) as Box<dyn FrameRenderer>)
}

/// Per-pixel polar coordinates, both normalised to [0, 1].
struct PolarTable {
    width: u32,
    height: u32,
    angle: Vec<f32>,
    radius: Vec<f32>,
}

impl PolarTable {
    fn build(width: u32, height: u32) -> Self {
        let cx = width as f64 / 2.0;
        let cy = height as f64 / 2.0;
        let half_diagonal = (cx * cx + cy * cy).sqrt().max(f64::EPSILON);
        let pixels = width as usize * height as usize;
        let mut angle = Vec::with_capacity(pixels);
        let mut radius = Vec::with_capacity(pixels);

        for y in 0..height {
            let dy = y as f64 + 0.5 - cy;
            for x in 0..width {
                let dx = x as f64 + 0.5 - cx;
                angle.push((dy.atan2(dx) / TAU + 0.5) as f32);
                radius.push(((dx * dx + dy * dy).sqrt() / half_diagonal) as f32);
            }
        }

        Self {
            width,
            height,
            angle,
            radius,
        }
    }

    fn matches(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }
}

/// Renders a [`Scene`] layer by layer.
pub struct SceneRenderer {
    scene: Scene,
    polar: Option<PolarTable>,
}

impl SceneRenderer {
    pub fn new(scene: Scene) -> Self {
        Self { scene, polar: None }
    }

    fn polar(&mut self, width: u32, height: u32) -> &PolarTable {
        if !self.polar.as_ref().is_some_and(|p| p.matches(width, height)) {
            tracing::debug!(width, height, "Building polar lookup table");
            self.polar = None;
        }
        self.polar
            .get_or_insert_with(|| PolarTable::build(width, height))
    }
}

impl FrameRenderer for SceneRenderer {
    fn render(&mut self, index: u64, config: &ExportConfig) -> FramecastResult<RenderedFrame> {
        let time = config.frame_time_secs(index);
        let scene = self.scene.clone();
        let desc = scene.description();

        // Resolve palettes up front so a bad layer fails before any drawing.
        let mut active: Vec<(&LayerKind, &[Rgb], u8)> = Vec::new();
        for (layer_idx, layer) in desc.layers.iter().enumerate() {
            if !layer.is_active(time) || layer.opacity == 0 {
                continue;
            }
            let palette = match desc.palettes.get(&layer.palette) {
                Some(colours) if !colours.is_empty() => colours.as_slice(),
                Some(_) => {
                    return Err(FramecastError::render(
                        index,
                        format!("layer {layer_idx} uses empty palette '{}'", layer.palette),
                    ))
                }
                None => {
                    return Err(FramecastError::render(
                        index,
                        format!(
                            "layer {layer_idx} references undefined palette '{}'",
                            layer.palette
                        ),
                    ))
                }
            };
            active.push((&layer.kind, palette, layer.opacity));
        }

        let mut pixels = Vec::with_capacity(config.frame_len());
        let pixel_count = config.width as usize * config.height as usize;
        for _ in 0..pixel_count {
            pixels.extend_from_slice(&desc.background);
        }

        if active.is_empty() {
            return Ok(RenderedFrame::new(index, pixels));
        }

        let polar = self.polar(config.width, config.height);
        for (kind, palette, opacity) in active {
            match *kind {
                LayerKind::Pulse { period_secs } => {
                    let colour = pick(palette, phase(time, period_secs));
                    for px in pixels.chunks_exact_mut(BYTES_PER_PIXEL) {
                        blend(px, colour, opacity);
                    }
                }
                LayerKind::Spiral { arms, twist, speed } => {
                    let shift = speed * time;
                    for (i, px) in pixels.chunks_exact_mut(BYTES_PER_PIXEL).enumerate() {
                        let v = polar.angle[i] as f64 * arms as f64
                            + polar.radius[i] as f64 * twist
                            - shift;
                        blend(px, pick(palette, v), opacity);
                    }
                }
                LayerKind::Rings { density, speed } => {
                    let shift = speed * time;
                    for (i, px) in pixels.chunks_exact_mut(BYTES_PER_PIXEL).enumerate() {
                        let v = polar.radius[i] as f64 * density - shift;
                        blend(px, pick(palette, v), opacity);
                    }
                }
            }
        }

        Ok(RenderedFrame::new(index, pixels))
    }

    fn name(&self) -> &str {
        "scene"
    }
}

fn phase(time: f64, period_secs: f64) -> f64 {
    if period_secs > 0.0 && period_secs.is_finite() {
        time / period_secs
    } else {
        0.0
    }
}

/// Palette entry for the fractional part of `v`.
fn pick(palette: &[Rgb], v: f64) -> Rgb {
    let frac = if v.is_finite() { v - v.floor() } else { 0.0 };
    let len = palette.len();
    let idx = ((frac * len as f64) as usize).min(len - 1);
    palette[idx]
}

fn blend(px: &mut [u8], colour: Rgb, alpha: u8) {
    let a = alpha as u32;
    for (dst, src) in px.iter_mut().zip(colour) {
        *dst = ((*dst as u32 * (255 - a) + src as u32 * a + 127) / 255) as u8;
    }
}
