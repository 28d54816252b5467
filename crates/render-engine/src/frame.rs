//! Rendered frame buffers.

use std::fmt;

/// One fully decoded frame: packed RGB24 pixels for a single time sample.
///
/// Ownership moves from the worker that rendered it, through the ordering
/// buffer, into the sink that finally consumes it.
#[derive(Clone, PartialEq, Eq)]
pub struct RenderedFrame {
    index: u64,
    pixels: Vec<u8>,
}

impl RenderedFrame {
    pub fn new(index: u64, pixels: Vec<u8>) -> Self {
        Self { index, pixels }
    }

    /// Frame number within the export.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Raw pixel bytes.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Give up the frame and keep only its pixel buffer.
    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    /// Buffer size in bytes.
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// FNV-1a digest of the pixel bytes.
    pub fn checksum(&self) -> u64 {
        fnv1a_64(&self.pixels)
    }
}

impl fmt::Debug for RenderedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderedFrame")
            .field("index", &self.index)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// 64-bit FNV-1a hash.
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_tracks_content() {
        let a = RenderedFrame::new(0, vec![1, 2, 3]);
        let b = RenderedFrame::new(7, vec![1, 2, 3]);
        let c = RenderedFrame::new(0, vec![1, 2, 4]);
        assert_eq!(a.checksum(), b.checksum());
        assert_ne!(a.checksum(), c.checksum());
        assert_eq!(fnv1a_64(&[]), 0xcbf29ce484222325);
    }

    #[test]
    fn test_debug_omits_pixels() {
        let frame = RenderedFrame::new(3, vec![0; 12]);
        assert_eq!(format!("{frame:?}"), "RenderedFrame { index: 3, bytes: 12 }");
    }
}
