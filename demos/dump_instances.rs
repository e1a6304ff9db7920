use clap::Parser;
use log::{error, info};
use motcrop::{Dataset, DatasetConfig, SequenceDataset};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(about = "Print per-frame instance and crop statistics of one sequence")]
struct Args {
    /// JSON dataset config; defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Sequence id, e.g. 2 for images/0002
    #[arg(short, long, default_value_t = 2)]
    sequence: u32,

    /// Stop after this many frames
    #[arg(short, long)]
    limit: Option<usize>,

    /// Frames prepared in parallel per batch
    #[arg(short, long, default_value_t = 8)]
    batch: usize,
}

fn main() -> Result<(), motcrop::Error> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => DatasetConfig::from_file(path)?,
        None => DatasetConfig::default(),
    };

    let ds = SequenceDataset::open(&config, args.sequence)?;
    let index = ds.index();
    info!(
        "{} frames, {} instances, {} tracks, {} degenerate boxes",
        index.len(),
        index.instance_count(),
        index.track_ids().len(),
        index.degenerate().len()
    );

    let total = args.limit.map_or(ds.len(), |l| l.min(ds.len()));
    let indices: Vec<usize> = (0..total).collect();

    for chunk in indices.chunks(args.batch.max(1)) {
        for res in ds.get_many(chunk) {
            match res {
                Ok(rec) => {
                    let mean = |c: &motcrop::Crop| c.data.mean().unwrap_or(0.0);
                    println!(
                        "{:06}: {} instances, tracks {:?}, crop means {:?}",
                        rec.frame_index,
                        rec.len(),
                        rec.track_ids,
                        rec.crops.iter().map(mean).collect::<Vec<_>>()
                    );
                }
                Err(err) => error!("{}", err),
            }
        }
    }

    Ok(())
}
