use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use image_segmentation_wasm::segmentation::centroid_hex;
use image_segmentation_wasm::{
    Convergence, KMeansConfig, Palette, PixelLayout, SegmentOptions, segment_file,
};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ConvergenceMode {
    /// Stop when no centroid moves farther than --epsilon
    FixedPoint,
    /// Stop as soon as no centroid is NaN (historical behavior)
    LegacyNan,
}

/// Split an image into color clusters with k-means and write a recolored mask.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Input raster (binary P5/P6, or any format the image crate reads)
    #[arg(default_value = "imagen.pgm")]
    input: PathBuf,

    /// Output raster; written as binary P6 unless the extension names another image format
    #[arg(default_value = "imagen_segmentada.ppm")]
    output: PathBuf,

    /// Number of clusters
    #[arg(short = 'k', long = "clusters", default_value_t = 2)]
    clusters: usize,

    /// Upper bound on k-means iterations
    #[arg(long, default_value_t = 100)]
    max_iterations: usize,

    /// Early-stopping rule
    #[arg(long, value_enum, default_value_t = ConvergenceMode::FixedPoint)]
    convergence: ConvergenceMode,

    /// Largest centroid movement still counted as converged (fixed-point mode)
    #[arg(long, default_value_t = 1e-4)]
    epsilon: f32,

    /// Seed for picking the initial centroids (random when omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Read three bytes per pixel regardless of the declared format
    #[arg(long)]
    packed: bool,

    /// Comma-separated list of hex colors, one per cluster (default: red,green)
    #[arg(short = 'c', long)]
    palette: Option<String>,

    /// Print a JSON summary of the run to stdout
    #[arg(long)]
    json: bool,

    /// Log every iteration
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let palette = match &args.palette {
        Some(list) => {
            let entries: Vec<&str> = list.split(',').collect();
            Palette::from_hex(&entries).context("invalid --palette")?
        }
        None => Palette::binary(),
    };

    let convergence = match args.convergence {
        ConvergenceMode::FixedPoint => Convergence::FixedPoint { epsilon: args.epsilon },
        ConvergenceMode::LegacyNan => Convergence::LegacyNan,
    };

    let options = SegmentOptions {
        kmeans: KMeansConfig::new(args.clusters)
            .with_max_iterations(args.max_iterations)
            .with_convergence(convergence),
        seed: args.seed,
        initial_centroids: None,
        layout: if args.packed { PixelLayout::Packed } else { PixelLayout::Declared },
        palette,
    };

    let result = segment_file(&args.input, &args.output, &options).with_context(|| {
        format!(
            "segmenting {} into {} failed",
            args.input.display(),
            args.output.display()
        )
    })?;

    if args.json {
        let summary = serde_json::json!({
            "input": args.input.display().to_string(),
            "output": args.output.display().to_string(),
            "iterations": result.iterations,
            "converged": result.converged,
            "centroids": centroid_hex(&result.centroids),
            "cluster_sizes": result.cluster_sizes,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Saved → {}", args.output.display());
    }

    Ok(())
}
