use std::path::PathBuf;

use thiserror::Error;

use crate::raster::RasterError;

/// Errors surfaced by the segmentation pipeline.
///
/// Empty clusters and non-convergence are not errors; they are handled inside the engine.
#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("cannot access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Raster(#[from] RasterError),

    #[error("cluster count must be at least 1, got {0}")]
    InvalidClusterCount(usize),

    #[error("convergence epsilon must be finite and non-negative, got {0}")]
    InvalidEpsilon(f32),

    #[error("expected {expected} initial centroids, got {actual}")]
    InitialCentroidCount { expected: usize, actual: usize },

    #[error("palette has {colors} colors but {k} clusters need one each")]
    PaletteTooSmall { k: usize, colors: usize },

    #[error("invalid hex color {0:?}: expected 6 hex digits")]
    InvalidHex(String),
}

pub type Result<T, E = SegmentError> = std::result::Result<T, E>;
