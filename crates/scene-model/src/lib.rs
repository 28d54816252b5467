//! Framecast Scene Model
//!
//! Defines the data contracts handed to the export pipeline:
//! - **Scene:** an immutable, shareable handle to a layered scene description
//! - **ExportConfig:** validated output parameters (size, rate, length, workers, quality)
//!
//! The pipeline treats a [`Scene`] as opaque; only renderers look inside.

pub mod export;
pub mod scene;

pub use export::*;
pub use scene::*;
