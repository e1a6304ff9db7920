use crate::annotation::{self, FrameIndex};
use crate::bbox::{BBox, Ltrb, PixelBox};
use crate::config::DatasetConfig;
use crate::error::Error;
use crate::frame::FrameTensor;
use crate::loader::FrameLoader;
use crate::normalize::SequenceContext;
use crate::roi_align::RoiAlign;
use crate::Dataset;

use log::{debug, info};
use ndarray::Array3;
use rayon::prelude::*;
use std::sync::Arc;

/// Fixed-size crop of one instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Crop {
    pub track_id: i32,
    /// `(C, crop_height, crop_width)`
    pub data: Array3<f32>,
}

/// Everything produced for one frame. `boxes[i]`, `crops[i]` and `track_ids[i]`
/// always describe the same instance.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    pub frame_index: u32,
    pub frame: FrameTensor,
    pub boxes: Vec<PixelBox>,
    pub crops: Vec<Crop>,
    pub track_ids: Vec<i32>,
}

impl FrameRecord {
    /// Number of instances.
    #[inline]
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}

pub struct SequenceDataset {
    ctx: SequenceContext,
    index: Arc<FrameIndex>,
    loader: FrameLoader,
    roi: RoiAlign,
}

impl SequenceDataset {
    pub fn new(
        ctx: SequenceContext,
        index: Arc<FrameIndex>,
        loader: FrameLoader,
        roi: RoiAlign,
    ) -> Self {
        Self {
            ctx,
            index,
            loader,
            roi,
        }
    }

    /// Parses the sequence's annotation file and binds it to its image directory.
    pub fn open(config: &DatasetConfig, sequence: u32) -> Result<Self, Error> {
        let ctx = config.context(sequence)?;
        let index = annotation::parse(config.annotation_path(sequence), &ctx, config.degenerate)?;
        let loader = FrameLoader::from_config(config, sequence, ctx.target());

        info!(
            "opened sequence {:04}: {}x{} -> {}x{}, {} frames",
            sequence,
            ctx.source().width,
            ctx.source().height,
            ctx.target().width,
            ctx.target().height,
            index.len()
        );

        Ok(Self::new(
            ctx,
            Arc::new(index),
            loader,
            RoiAlign::from_config(&config.crop),
        ))
    }

    #[inline]
    pub fn context(&self) -> &SequenceContext {
        &self.ctx
    }

    /// Shared, read-only frame index.
    #[inline]
    pub fn index(&self) -> &Arc<FrameIndex> {
        &self.index
    }

    #[inline]
    pub fn loader(&self) -> &FrameLoader {
        &self.loader
    }

    #[inline]
    pub fn roi(&self) -> &RoiAlign {
        &self.roi
    }

    /// Extracts the instances of `frame_index` from an already loaded frame.
    pub fn record(&self, frame_index: u32, frame: FrameTensor) -> FrameRecord {
        let instances = self.index.get(frame_index).unwrap_or(&[]);

        let boxes: Vec<PixelBox> = instances.iter().map(|i| i.bbox).collect();
        let track_ids: Vec<i32> = instances.iter().map(|i| i.track_id).collect();
        let rois: Vec<BBox<Ltrb>> = boxes.iter().map(PixelBox::as_ltrb).collect();

        let crops = self
            .roi
            .crops(frame.view(), &rois)
            .into_iter()
            .zip(&track_ids)
            .map(|(data, &track_id)| Crop { track_id, data })
            .collect();

        debug!("frame {}: {} instances", frame_index, boxes.len());

        FrameRecord {
            frame_index,
            frame,
            boxes,
            crops,
            track_ids,
        }
    }

    /// Prepares several records in parallel; results keep the order of `indices`.
    pub fn get_many(&self, indices: &[usize]) -> Vec<Result<FrameRecord, Error>> {
        indices.par_iter().map(|&idx| self.get(idx)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = Result<FrameRecord, Error>> + '_ {
        (0..self.len()).map(move |idx| self.get(idx))
    }
}

impl Dataset for SequenceDataset {
    type Item = FrameRecord;

    #[inline]
    fn len(&self) -> usize {
        self.index.len()
    }

    fn get(&self, idx: usize) -> Result<FrameRecord, Error> {
        let len = self.len();
        if idx >= len {
            return Err(Error::IndexOutOfRange { index: idx, len });
        }

        let frame_index = (idx + 1) as u32;
        let frame = self.loader.load(frame_index)?;

        Ok(self.record(frame_index, frame))
    }
}
