use std::collections::HashMap;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use ndarray::{Array2, Array4};
use stemclass::{
    BinCollision, BraggPeak, ClassAverager, EmptyClusterPolicy, PeakBinner, PeakHistogram,
    PeakSource, PointListArray, Progress, RuntimeConfig,
};

/// Bins and class-averages a synthetic two-phase 4D-STEM scan
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Scan positions along x
    #[arg(long, default_value_t = 8)]
    scan_x: usize,

    /// Scan positions along y
    #[arg(long, default_value_t = 8)]
    scan_y: usize,

    /// Detector pixels along x
    #[arg(long, default_value_t = 64)]
    qx: usize,

    /// Detector pixels along y
    #[arg(long, default_value_t = 64)]
    qy: usize,

    /// Bin width along x
    #[arg(long, default_value_t = 8)]
    bin_x: usize,

    /// Bin width along y
    #[arg(long, default_value_t = 8)]
    bin_y: usize,

    /// Worker threads (1 = serial, 0 = rayon's global pool)
    #[arg(short, long, default_value_t = 1)]
    threads: usize,

    /// Sum intensities of peaks sharing a bin instead of keeping the last one
    #[arg(long)]
    accumulate: bool,

    /// Mask out peaks within this radius of the pattern centre (beamstop)
    #[arg(long)]
    mask_center: Option<f64>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    info!("=== Starting 4D-STEM Classification Demo ===");
    let start_time = Instant::now();

    let runtime = RuntimeConfig::with_threads(args.threads);
    let collision = if args.accumulate {
        BinCollision::Accumulate
    } else {
        BinCollision::Overwrite
    };
    let mut builder = PeakBinner::builder()
        .with_detector_shape(args.qx, args.qy)?
        .with_bin_size(args.bin_x, args.bin_y)?
        .with_collision(collision)
        .with_runtime_config(runtime);
    if let Some(radius) = args.mask_center {
        builder = builder.with_mask(center_mask(args.qx, args.qy, radius));
    }
    let binner = builder.build().context("invalid binning configuration")?;
    info!("Binner: {:?}", binner.info());

    let peaks = synthetic_peaks(&args)?;
    let stack = synthetic_stack(&args, &peaks);
    info!(
        "Generated {}x{} scan with {} peaks",
        args.scan_x,
        args.scan_y,
        peaks.num_peaks()
    );

    let total = args.scan_x * args.scan_y;
    let report_every = (total / 4).max(1);
    let progress = move |p: Progress| {
        if p.completed % report_every == 0 || p.completed == p.total {
            info!("Binned {}/{} scan positions", p.completed, p.total);
        }
    };
    let histogram = binner.bin_with_progress(&peaks, &progress)?;

    let labels = signature_labels(&histogram);
    let classes = ClassAverager::new()
        .with_empty_cluster_policy(EmptyClusterPolicy::Error)
        .with_runtime_config(runtime)
        .average(&stack, &labels)?;

    println!("\nResults:");
    println!("  Histogram shape: {:?}", histogram.data().dim());
    println!("  Clusters found: {}", classes.n_clusters());
    for (n, count) in classes.counts().iter().enumerate() {
        let mean = classes.image(n).map(|image| image.mean().unwrap_or(0.0)).unwrap_or(0.0);
        println!("    cluster {}: {} patterns, mean intensity {:.3}", n, count, mean);
    }

    info!("=== Demo Complete (took {:.2?}) ===", start_time.elapsed());
    Ok(())
}

/// Positions with `ry < Ry / 2` show phase A (peaks along qx), the rest phase B
/// (peaks along qy). Every pattern also carries the unscattered central beam.
fn synthetic_peaks(args: &Args) -> Result<PointListArray> {
    let mut peaks = PointListArray::new(args.scan_x, args.scan_y);
    let (cx, cy) = (args.qx as f64 / 2.0, args.qy as f64 / 2.0);
    let (gx, gy) = (args.qx as f64 / 4.0, args.qy as f64 / 4.0);

    for rx in 0..args.scan_x {
        for ry in 0..args.scan_y {
            let jitter = ((rx + ry) % 3) as f64 * 0.25;
            peaks.add_peak(rx, ry, BraggPeak::new(cx, cy, 100.0))?;
            let spots = if ry < args.scan_y / 2 {
                [(cx - gx + jitter, cy), (cx + gx - jitter, cy)]
            } else {
                [(cx, cy - gy + jitter), (cx, cy + gy - jitter)]
            };
            for (qx, qy) in spots {
                peaks.add_peak(rx, ry, BraggPeak::new(qx, qy, 40.0 + jitter))?;
            }
        }
    }
    Ok(peaks)
}

fn synthetic_stack(args: &Args, peaks: &PointListArray) -> Array4<f32> {
    let mut stack = Array4::<f32>::from_elem((args.scan_x, args.scan_y, args.qx, args.qy), 1.0);
    for rx in 0..args.scan_x {
        for ry in 0..args.scan_y {
            for peak in peaks.point_list(rx, ry) {
                let (px, py) = (peak.qx as usize, peak.qy as usize);
                stack[[rx, ry, px, py]] += peak.intensity as f32;
            }
        }
    }
    stack
}

fn center_mask(qx: usize, qy: usize, radius: f64) -> Array2<bool> {
    let (cx, cy) = (qx as f64 / 2.0, qy as f64 / 2.0);
    Array2::from_shape_fn((qx, qy), |(x, y)| {
        let (dx, dy) = (x as f64 - cx, y as f64 - cy);
        (dx * dx + dy * dy).sqrt() > radius
    })
}

/// Stand-in for an external clusterer: positions whose occupied bins match
/// share a label, numbered in order of first appearance.
fn signature_labels(histogram: &PeakHistogram) -> Vec<usize> {
    let features = histogram.feature_matrix();
    let mut clusters: HashMap<Vec<usize>, usize> = HashMap::new();
    features
        .rows()
        .into_iter()
        .map(|row| {
            let signature: Vec<usize> = row
                .iter()
                .enumerate()
                .filter(|(_, &value)| value > 0.0)
                .map(|(bin, _)| bin)
                .collect();
            let next = clusters.len();
            *clusters.entry(signature).or_insert(next)
        })
        .collect()
}
