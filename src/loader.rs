use crate::config::{ChannelOrder, DatasetConfig, Resolution};
use crate::error::Error;
use crate::frame::FrameTensor;

use log::debug;
use std::path::{Path, PathBuf};

/// Reads `<dir>/<frame:06>.<ext>` images of one sequence at a fixed resolution.
#[derive(Debug, Clone)]
pub struct FrameLoader {
    dir: PathBuf,
    target: Resolution,
    extension: String,
    order: ChannelOrder,
}

impl FrameLoader {
    pub fn new<P: Into<PathBuf>>(
        dir: P,
        target: Resolution,
        extension: &str,
        order: ChannelOrder,
    ) -> Self {
        Self {
            dir: dir.into(),
            target,
            extension: extension.trim_start_matches('.').to_string(),
            order,
        }
    }

    pub fn from_config(config: &DatasetConfig, sequence: u32, target: Resolution) -> Self {
        Self::new(
            config.sequence_dir(sequence),
            target,
            &config.image_extension,
            config.channel_order,
        )
    }

    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[inline]
    pub fn target(&self) -> Resolution {
        self.target
    }

    #[inline]
    pub fn frame_path(&self, frame_index: u32) -> PathBuf {
        self.dir
            .join(format!("{:06}.{}", frame_index, self.extension))
    }

    pub fn load(&self, frame_index: u32) -> Result<FrameTensor, Error> {
        let path = self.frame_path(frame_index);
        if !path.is_file() {
            return Err(Error::FrameNotFound(path));
        }

        let img = image::open(&path)?;
        debug!(
            "loaded {:?} ({}x{}) -> {}x{}",
            path,
            img.width(),
            img.height(),
            self.target.width,
            self.target.height
        );

        Ok(FrameTensor::from_image(&img, self.target, self.order))
    }
}
