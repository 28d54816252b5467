//! Scene descriptions.
//!
//! A scene is a stack of procedural layers evaluated over time. Layers pick
//! their colours from named palettes. The export pipeline never looks inside
//! a scene; it only hands the [`Scene`] handle to renderers.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use framecast_common::error::FramecastError;
use serde::{Deserialize, Serialize};

/// Packed RGB colour.
pub type Rgb = [u8; 3];

/// Scene file (`*.scene.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneDescription {
    /// Schema version.
    #[serde(default = "default_version")]
    pub version: String,

    /// Human-readable scene name.
    pub name: String,

    /// Colour behind all layers.
    #[serde(default)]
    pub background: Rgb,

    /// Named colour palettes referenced by layers.
    #[serde(default)]
    pub palettes: BTreeMap<String, Vec<Rgb>>,

    /// Layers, bottom first.
    #[serde(default)]
    pub layers: Vec<Layer>,
}

/// One procedural layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    /// What the layer draws.
    #[serde(flatten)]
    pub kind: LayerKind,

    /// Palette name (key into [`SceneDescription::palettes`]).
    pub palette: String,

    /// Blend opacity, 255 = opaque.
    #[serde(default = "default_opacity")]
    pub opacity: u8,

    /// First second (inclusive) at which the layer is drawn.
    #[serde(default)]
    pub start_secs: f64,

    /// Last second (exclusive). `None` = until the end.
    #[serde(default)]
    pub end_secs: Option<f64>,
}

/// Layer geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LayerKind {
    /// Logarithmic-looking spiral arms rotating around the centre.
    Spiral {
        arms: u32,
        #[serde(default = "default_twist")]
        twist: f64,
        /// Turns per second.
        speed: f64,
    },
    /// Concentric rings moving outward (positive speed) or inward.
    Rings {
        /// Rings per half-diagonal.
        density: f64,
        speed: f64,
    },
    /// Whole-frame colour cycling through the palette.
    Pulse { period_secs: f64 },
}

impl LayerKind {
    pub fn label(&self) -> &'static str {
        match self {
            LayerKind::Spiral { .. } => "spiral",
            LayerKind::Rings { .. } => "rings",
            LayerKind::Pulse { .. } => "pulse",
        }
    }
}

impl Layer {
    /// Whether the layer is drawn at `time_secs`.
    pub fn is_active(&self, time_secs: f64) -> bool {
        time_secs >= self.start_secs && self.end_secs.map_or(true, |end| time_secs < end)
    }
}

fn default_version() -> String {
    "1".to_string()
}

fn default_opacity() -> u8 {
    255
}

fn default_twist() -> f64 {
    4.0
}

/// Static problem found in a scene description.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SceneIssue {
    #[error("palette '{name}' has no colours")]
    EmptyPalette { name: String },

    #[error("layer {layer} ({kind}) references undefined palette '{palette}'")]
    UnknownPalette {
        layer: usize,
        kind: &'static str,
        palette: String,
    },

    #[error("layer {layer} ({kind}): {message}")]
    InvalidLayer {
        layer: usize,
        kind: &'static str,
        message: String,
    },
}

impl SceneDescription {
    /// Create an empty scene.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            version: default_version(),
            name: name.into(),
            background: [0, 0, 0],
            palettes: BTreeMap::new(),
            layers: Vec::new(),
        }
    }

    /// Report every structural problem without rendering anything.
    pub fn validate(&self) -> Vec<SceneIssue> {
        let mut issues = Vec::new();

        for (name, colours) in &self.palettes {
            if colours.is_empty() {
                issues.push(SceneIssue::EmptyPalette { name: name.clone() });
            }
        }

        for (idx, layer) in self.layers.iter().enumerate() {
            let kind = layer.kind.label();
            if !self.palettes.contains_key(&layer.palette) {
                issues.push(SceneIssue::UnknownPalette {
                    layer: idx,
                    kind,
                    palette: layer.palette.clone(),
                });
            }

            let invalid = |message: &str| SceneIssue::InvalidLayer {
                layer: idx,
                kind,
                message: message.to_string(),
            };

            if !layer.start_secs.is_finite() || layer.start_secs < 0.0 {
                issues.push(invalid("start_secs must be a non-negative number"));
            }
            if let Some(end) = layer.end_secs {
                if !end.is_finite() || end <= layer.start_secs {
                    issues.push(invalid("end_secs must be greater than start_secs"));
                }
            }

            match layer.kind {
                LayerKind::Spiral { arms, twist, speed } => {
                    if arms == 0 {
                        issues.push(invalid("a spiral needs at least one arm"));
                    }
                    if !twist.is_finite() || !speed.is_finite() {
                        issues.push(invalid("twist and speed must be finite"));
                    }
                }
                LayerKind::Rings { density, speed } => {
                    if !density.is_finite() || density <= 0.0 {
                        issues.push(invalid("density must be positive"));
                    }
                    if !speed.is_finite() {
                        issues.push(invalid("speed must be finite"));
                    }
                }
                LayerKind::Pulse { period_secs } => {
                    if !period_secs.is_finite() || period_secs <= 0.0 {
                        issues.push(invalid("period_secs must be positive"));
                    }
                }
            }
        }

        issues
    }
}

/// Shared, immutable handle to a scene description.
///
/// Cloning is cheap; every worker holds its own clone.
#[derive(Clone, PartialEq)]
pub struct Scene {
    inner: Arc<SceneDescription>,
}

impl Scene {
    pub fn new(description: SceneDescription) -> Self {
        Self {
            inner: Arc::new(description),
        }
    }

    /// Parse a scene from JSON text.
    pub fn from_json(json: &str) -> Result<Self, SceneError> {
        let description = serde_json::from_str(json).map_err(|e| SceneError::ParseError {
            path: PathBuf::from("<inline>"),
            source: e,
        })?;
        Ok(Self::new(description))
    }

    /// Load a scene file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SceneError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| SceneError::IoError {
            path: path.to_path_buf(),
            source: e,
        })?;
        let description = serde_json::from_str(&json).map_err(|e| SceneError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        tracing::debug!(path = %path.display(), "Scene loaded");
        Ok(Self::new(description))
    }

    /// Write the scene description as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SceneError> {
        let path = path.as_ref();
        let json =
            serde_json::to_string_pretty(&*self.inner).map_err(|e| SceneError::ParseError {
                path: path.to_path_buf(),
                source: e,
            })?;
        std::fs::write(path, json).map_err(|e| SceneError::IoError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// The underlying description. Only renderers should need this.
    pub fn description(&self) -> &SceneDescription {
        &self.inner
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

impl fmt::Debug for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scene")
            .field("name", &self.inner.name)
            .field("layers", &self.inner.layers.len())
            .finish()
    }
}

/// Errors that can occur when loading scenes.
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl From<SceneError> for FramecastError {
    fn from(err: SceneError) -> Self {
        match err {
            SceneError::IoError { path, source } if source.kind() == std::io::ErrorKind::NotFound => {
                FramecastError::FileNotFound { path }
            }
            other => FramecastError::scene(other.to_string()),
        }
    }
}
