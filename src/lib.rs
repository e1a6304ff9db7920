pub mod annotation;
pub mod bbox;
pub mod config;
pub mod dataset;
pub mod error;
pub mod frame;
pub mod loader;
pub mod normalize;
pub mod roi_align;

pub use annotation::{FrameIndex, Instance};
pub use bbox::PixelBox;
pub use config::{DatasetConfig, Resolution};
pub use dataset::{Crop, FrameRecord, SequenceDataset};
pub use error::Error;
pub use frame::FrameTensor;
pub use loader::FrameLoader;
pub use normalize::{DegenerateBox, SequenceContext};
pub use roi_align::RoiAlign;

/// Indexable per-frame source consumed by a training or inference loop.
///
/// `get` must be idempotent: the same index yields the same item on every
/// call, and a failing index leaves the dataset usable for the others.
pub trait Dataset {
    type Item;

    fn len(&self) -> usize;

    #[inline]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, idx: usize) -> Result<Self::Item, Error>;
}
