//! Mapping of annotation boxes from a sequence's source resolution into the
//! canonical working resolution.

use crate::bbox::PixelBox;
use crate::config::Resolution;
use crate::error::Error;

use serde_derive::{Deserialize, Serialize};

/// Box as written in the annotation file, in source-resolution pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawBox {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl RawBox {
    #[inline]
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }
}

/// Source and target resolution of one sequence, fixed for the lifetime of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceContext {
    sequence: u32,
    source: Resolution,
    target: Resolution,
}

impl SequenceContext {
    pub fn new(sequence: u32, source: Resolution, target: Resolution) -> Result<Self, Error> {
        Ok(Self {
            sequence,
            source: source.validate()?,
            target: target.validate()?,
        })
    }

    #[inline(always)]
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    #[inline(always)]
    pub fn source(&self) -> Resolution {
        self.source
    }

    #[inline(always)]
    pub fn target(&self) -> Resolution {
        self.target
    }

    #[inline]
    pub fn normalize(&self, raw: &RawBox) -> PixelBox {
        normalize(raw, self.source, self.target)
    }
}

/// Advisory diagnostic for a box left with no positive area after clipping.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DegenerateBox {
    pub frame_index: u32,
    pub track_id: i32,
    /// The clipped box before its extent was clamped.
    pub clipped: PixelBox,
}

// Keeps any sum of two scaled components inside i32.
const COMPONENT_LIMIT: f64 = (i32::MAX / 4) as f64;

#[inline]
fn scale_component(value: f64, source: u32, target: u32) -> i32 {
    (value / source as f64 * target as f64).clamp(-COMPONENT_LIMIT, COMPONENT_LIMIT) as i32
}

/// Scales each component independently, truncating toward zero.
pub fn scale(raw: &RawBox, source: Resolution, target: Resolution) -> PixelBox {
    PixelBox::new(
        scale_component(raw.left, source.width, target.width),
        scale_component(raw.top, source.height, target.height),
        scale_component(raw.width, source.width, target.width),
        scale_component(raw.height, source.height, target.height),
    )
}

/// Shrinks far-edge overhang, then folds near-edge overhang into the extent.
///
/// A box lying completely outside the frame comes out with a negative width
/// or height; see [`clamp_degenerate`].
pub fn clip(bbox: PixelBox, target: Resolution) -> PixelBox {
    let (tw, th) = (target.width as i32, target.height as i32);
    let PixelBox {
        mut x,
        mut y,
        mut w,
        mut h,
    } = bbox;

    if x + w > tw {
        w = tw - x;
    }

    if y + h > th {
        h = th - y;
    }

    if x < 0 {
        w += x;
        x = 0;
    }

    if y < 0 {
        h += y;
        y = 0;
    }

    PixelBox::new(x, y, w, h)
}

/// Scale then clip. The result may still be degenerate.
#[inline]
pub fn normalize(raw: &RawBox, source: Resolution, target: Resolution) -> PixelBox {
    clip(scale(raw, source, target), target)
}

/// Forces a clipped box into the frame with non-negative extent.
pub fn clamp_degenerate(bbox: PixelBox, target: Resolution) -> PixelBox {
    let (tw, th) = (target.width as i32, target.height as i32);

    let x = bbox.x.clamp(0, tw - 1);
    let y = bbox.y.clamp(0, th - 1);
    let w = bbox.w.clamp(0, tw - x);
    let h = bbox.h.clamp(0, th - y);

    PixelBox::new(x, y, w, h)
}
