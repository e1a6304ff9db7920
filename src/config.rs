use crate::error::Error;
use crate::normalize::SequenceContext;

use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    #[inline]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn validate(&self) -> Result<Self, Error> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidResolution {
                width: self.width,
                height: self.height,
            });
        }

        Ok(*self)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SequenceOverride {
    pub source: Resolution,
    #[serde(default)]
    pub canonical: Option<Resolution>,
}

/// Maps a sequence id to the resolution its annotations were recorded against.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SequenceTable {
    /// Used for every sequence without an override. `None` turns unknown ids into errors.
    #[serde(default)]
    pub default: Option<Resolution>,
    #[serde(default)]
    pub overrides: HashMap<u32, SequenceOverride>,
}

impl SequenceTable {
    pub fn empty() -> Self {
        Self {
            default: None,
            overrides: HashMap::new(),
        }
    }

    pub fn with_default(mut self, source: Resolution) -> Self {
        self.default = Some(source);
        self
    }

    pub fn with_override(mut self, sequence: u32, source: Resolution) -> Self {
        self.overrides.insert(
            sequence,
            SequenceOverride {
                source,
                canonical: None,
            },
        );
        self
    }

    pub fn context(&self, sequence: u32, canonical: Resolution) -> Result<SequenceContext, Error> {
        let (source, target) = match self.overrides.get(&sequence) {
            Some(ov) => (ov.source, ov.canonical.unwrap_or(canonical)),
            None => (
                self.default.ok_or(Error::UnknownSequence(sequence))?,
                canonical,
            ),
        };

        SequenceContext::new(sequence, source.validate()?, target.validate()?)
    }
}

impl Default for SequenceTable {
    /// The two capture rigs of the MOTS training set.
    fn default() -> Self {
        Self::empty()
            .with_default(Resolution::new(1080, 608))
            .with_override(5, Resolution::new(810, 608))
            .with_override(6, Resolution::new(810, 608))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CropConfig {
    pub height: usize,
    pub width: usize,
    /// Ratio between the sampled tensor and the box coordinate space.
    pub spatial_scale: f32,
    pub extrapolation_value: f32,
    /// Sample at bin centres instead of spreading samples edge to edge.
    pub aligned: bool,
}

impl Default for CropConfig {
    fn default() -> Self {
        Self {
            height: 56,
            width: 56,
            spatial_scale: 1.0,
            extrapolation_value: 0.25,
            aligned: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    #[default]
    Bgr,
    Rgb,
}

/// What to do with a box whose width or height ends up non-positive after clipping.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DegeneratePolicy {
    /// Keep the instance with its extent clamped to zero.
    #[default]
    Clamp,
    /// Drop the instance from the frame index.
    Skip,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DatasetConfig {
    pub images_root: PathBuf,
    pub annotations_root: PathBuf,
    pub canonical: Resolution,
    pub sequences: SequenceTable,
    pub crop: CropConfig,
    pub image_extension: String,
    pub channel_order: ChannelOrder,
    pub degenerate: DegeneratePolicy,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            images_root: PathBuf::from("images"),
            annotations_root: PathBuf::from("annotations"),
            canonical: Resolution::new(2048, 1024),
            sequences: SequenceTable::default(),
            crop: CropConfig::default(),
            image_extension: "jpg".to_string(),
            channel_order: ChannelOrder::default(),
            degenerate: DegeneratePolicy::default(),
        }
    }
}

impl DatasetConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)?;

        Self::from_str(&content)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(content)?)
    }

    #[inline]
    pub fn annotation_path(&self, sequence: u32) -> PathBuf {
        self.annotations_root.join(format!("{:04}.txt", sequence))
    }

    #[inline]
    pub fn sequence_dir(&self, sequence: u32) -> PathBuf {
        self.images_root.join(format!("{:04}", sequence))
    }

    #[inline]
    pub fn context(&self, sequence: u32) -> Result<SequenceContext, Error> {
        self.sequences.context(sequence, self.canonical)
    }
}
