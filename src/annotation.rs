//! Parsing of MOT-style `frame,track,x,y,w,h,...` annotation files into a
//! frame-indexed set of instances.

use crate::bbox::PixelBox;
use crate::config::DegeneratePolicy;
use crate::error::Error;
use crate::normalize::{self, DegenerateBox, RawBox, SequenceContext};

use log::{debug, info, warn};
use serde_derive::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

const REQUIRED_FIELDS: usize = 6;

/// One tracked object observed in one frame.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instance {
    pub frame_index: u32,
    pub track_id: i32,
    /// Canonical-space box, already clipped.
    pub bbox: PixelBox,
}

/// Instances grouped by 1-based frame number. Frames without instances are absent.
#[derive(Debug, Clone, Default)]
pub struct FrameIndex {
    frames: BTreeMap<u32, Vec<Instance>>,
    degenerate: Vec<DegenerateBox>,
}

impl FrameIndex {
    /// Number of frames that have at least one instance.
    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[inline]
    pub fn get(&self, frame_index: u32) -> Option<&[Instance]> {
        self.frames.get(&frame_index).map(Vec::as_slice)
    }

    #[inline]
    pub fn frames(&self) -> impl Iterator<Item = (u32, &[Instance])> {
        self.frames.iter().map(|(&k, v)| (k, v.as_slice()))
    }

    pub fn instance_count(&self) -> usize {
        self.frames.values().map(Vec::len).sum()
    }

    pub fn track_ids(&self) -> Vec<i32> {
        self.frames
            .values()
            .flatten()
            .map(|i| i.track_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Boxes that collapsed to no area while parsing, in file order.
    #[inline]
    pub fn degenerate(&self) -> &[DegenerateBox] {
        &self.degenerate
    }

    fn push(&mut self, instance: Instance) {
        self.frames
            .entry(instance.frame_index)
            .or_insert_with(Vec::new)
            .push(instance);
    }
}

fn field<T: FromStr>(raw: &str, name: &str, line: usize) -> Result<T, Error>
where
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e| Error::malformed(line, format!("{} {:?}: {}", name, raw, e)))
}

fn coordinate(raw: &str, name: &str, line: usize) -> Result<f64, Error> {
    let value: f64 = field(raw, name, line)?;
    if !value.is_finite() {
        return Err(Error::malformed(line, format!("{} {:?} is not finite", name, raw)));
    }

    Ok(value)
}

fn parse_record(text: &str, line: usize) -> Result<(u32, i32, RawBox), Error> {
    let fields: Vec<&str> = text.split(',').map(str::trim).collect();
    if fields.len() < REQUIRED_FIELDS {
        return Err(Error::malformed(
            line,
            format!(
                "expected at least {} fields, got {}",
                REQUIRED_FIELDS,
                fields.len()
            ),
        ));
    }

    let frame_index: u32 = field(fields[0], "frame", line)?;
    if frame_index == 0 {
        return Err(Error::malformed(line, "frame numbers start at 1"));
    }

    let track_id: i32 = field(fields[1], "track", line)?;
    let raw = RawBox::new(
        coordinate(fields[2], "x", line)?,
        coordinate(fields[3], "y", line)?,
        coordinate(fields[4], "w", line)?,
        coordinate(fields[5], "h", line)?,
    );

    Ok((frame_index, track_id, raw))
}

/// Builds a [`FrameIndex`] from annotation text. Any bad record fails the whole parse.
pub fn parse_reader<R: BufRead>(
    reader: R,
    ctx: &SequenceContext,
    policy: DegeneratePolicy,
) -> Result<FrameIndex, Error> {
    let target = ctx.target();
    let mut index = FrameIndex::default();

    for (no, text) in reader.lines().enumerate() {
        let text = text?;
        let line = no + 1;
        if text.trim().is_empty() {
            continue;
        }

        let (frame_index, track_id, raw) = parse_record(&text, line)?;
        let mut bbox = ctx.normalize(&raw);

        if bbox.is_degenerate() {
            let diag = DegenerateBox {
                frame_index,
                track_id,
                clipped: bbox,
            };
            warn!(
                "sequence {:04} line {}: degenerate box {:?} for track {} in frame {}",
                ctx.sequence(),
                line,
                bbox,
                track_id,
                frame_index
            );
            index.degenerate.push(diag);

            match policy {
                DegeneratePolicy::Clamp => bbox = normalize::clamp_degenerate(bbox, target),
                DegeneratePolicy::Skip => continue,
            }
        }

        index.push(Instance {
            frame_index,
            track_id,
            bbox,
        });
    }

    info!(
        "sequence {:04}: {} frames, {} instances, {} degenerate",
        ctx.sequence(),
        index.len(),
        index.instance_count(),
        index.degenerate.len()
    );

    Ok(index)
}

pub fn parse<P: AsRef<Path>>(
    path: P,
    ctx: &SequenceContext,
    policy: DegeneratePolicy,
) -> Result<FrameIndex, Error> {
    let path = path.as_ref();
    debug!("parsing annotations {:?}", path);

    let file = File::open(path)?;
    parse_reader(BufReader::new(file), ctx, policy)
}
