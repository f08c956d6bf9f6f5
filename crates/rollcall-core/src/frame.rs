//! Frame and face-crop rasters exchanged with the capture and detection collaborators.

use crate::types::BoundingBox;

/// A captured grayscale camera frame.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes). May be empty for sources
    /// that deliver detections without pixels.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
}

impl Frame {
    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }

    pub fn has_pixels(&self) -> bool {
        !self.data.is_empty() && self.data.len() >= (self.width * self.height) as usize
    }

    /// Cut the region under `bbox` out of the frame, clamped to the frame bounds.
    ///
    /// Returns `None` when the frame carries no pixels or the clamped box is empty.
    pub fn crop(&self, bbox: &BoundingBox) -> Option<FaceCrop> {
        if !self.has_pixels() {
            return None;
        }
        let w = self.width as i64;
        let h = self.height as i64;

        let x0 = (bbox.x.floor() as i64).clamp(0, w);
        let y0 = (bbox.y.floor() as i64).clamp(0, h);
        let x1 = ((bbox.x + bbox.width).ceil() as i64).clamp(0, w);
        let y1 = ((bbox.y + bbox.height).ceil() as i64).clamp(0, h);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        let cw = (x1 - x0) as usize;
        let ch = (y1 - y0) as usize;
        let mut gray = Vec::with_capacity(cw * ch);
        for y in y0 as usize..y1 as usize {
            let row = y * self.width as usize;
            gray.extend_from_slice(&self.data[row + x0 as usize..row + x1 as usize]);
        }

        Some(FaceCrop {
            gray,
            rgb: None,
            width: cw as u32,
            height: ch as u32,
        })
    }
}

/// Pixels of one detected face, as handed to the liveness scorer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaceCrop {
    /// Grayscale pixels, row-major, width * height bytes.
    pub gray: Vec<u8>,
    /// Optional interleaved RGB pixels (width * height * 3 bytes).
    pub rgb: Option<Vec<u8>>,
    pub width: u32,
    pub height: u32,
}

impl FaceCrop {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.gray.len() < (self.width * self.height) as usize
    }
}

/// One face found by the detector in a specific frame.
#[derive(Debug, Clone)]
pub struct FaceRegion {
    pub frame_sequence: u32,
    /// Position of this face in the detector's output for the frame.
    pub index: usize,
    pub bbox: BoundingBox,
    pub crop: Option<FaceCrop>,
}
