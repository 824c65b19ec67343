//! Detection records handed to callers
//!
//! These are plain values decoded from the native result buffers; they
//! carry no reference back to native memory.

use serde::{Deserialize, Serialize};

use crate::runtime::DetectionRecord;

/// Axis-aligned box in the original image's pixel coordinates, top-left origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    /// X coordinate of top-left corner (pixels)
    pub x: i32,
    /// Y coordinate of top-left corner (pixels)
    pub y: i32,
    /// Width of bounding box (pixels)
    pub width: i32,
    /// Height of bounding box (pixels)
    pub height: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Calculate area
    pub fn area(&self) -> i64 {
        self.width as i64 * self.height as i64
    }
}

/// A single recognized object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Index into the caller's label table
    pub class_index: i32,
    /// Confidence score in (0, 1]
    pub confidence: f32,
    /// Bounding box in pixel coordinates
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(class_index: i32, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class_index,
            confidence,
            bbox,
        }
    }
}

impl From<DetectionRecord> for Detection {
    fn from(record: DetectionRecord) -> Self {
        Self {
            class_index: record.class_index,
            confidence: record.confidence,
            bbox: BoundingBox::new(record.x, record.y, record.width, record.height),
        }
    }
}
