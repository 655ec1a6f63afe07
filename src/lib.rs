use std::path::Path;

use js_sys::{Array, Object, Reflect, Uint8Array};
use tracing::info;
use wasm_bindgen::prelude::*;

pub mod error;
pub mod kmeans;
pub mod point;
pub mod raster;
pub mod segmentation;

pub use error::{Result, SegmentError};
pub use kmeans::{Convergence, KMeansConfig, KMeansResult};
pub use point::Point;
pub use raster::{PixelLayout, Raster, RasterError};
pub use segmentation::Palette;

use segmentation::{centroid_hex, recolor};

/// Everything a segmentation run can be configured with.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SegmentOptions {
    pub kmeans: KMeansConfig,
    /// Seed for sampling the starting centroids. OS entropy when `None`.
    pub seed: Option<u64>,
    /// Explicit starting centroids; takes precedence over `seed`.
    pub initial_centroids: Option<Vec<Point>>,
    pub layout: PixelLayout,
    pub palette: Palette,
}

/// A recolored mask together with the clustering that produced it.
#[derive(Clone, Debug)]
pub struct Segmentation {
    /// RGB raster, same size as the input, one palette color per pixel. Palette colors are
    /// full-range bytes, so the mask's max value is always 255.
    pub mask: Raster,
    pub result: KMeansResult,
}

/// Cluster the pixels of `raster` by color and paint each one with its cluster's palette color.
///
/// Steps performed:
/// 1. Promote every pixel to a 3D point (gray `v` becomes `(v, v, v)`).
/// 2. Run k-means from explicit centroids, a seed, or OS randomness, in that order of preference.
/// 3. Re-color every pixel with the palette entry of its final label.
pub fn segment_raster(raster: &Raster, options: &SegmentOptions) -> Result<Segmentation> {
    let config = &options.kmeans;
    config.validate()?;
    options.palette.ensure_covers(config.k)?;

    let points = raster.points();
    info!(
        width = raster.width(),
        height = raster.height(),
        points = points.len(),
        k = config.k,
        "segmenting raster"
    );

    let result = match (&options.initial_centroids, options.seed) {
        (Some(initial), _) => kmeans::run_from(&points, config, initial.clone())?,
        (None, Some(seed)) => kmeans::run_seeded(&points, config, seed)?,
        (None, None) => kmeans::run(&points, config, None)?,
    };

    let rgb = recolor(&result.labels, &options.palette)?;
    let mask = Raster::from_rgb(raster.width(), raster.height(), rgb)?;
    Ok(Segmentation { mask, result })
}

/// Decode `input`, segment it, and return the `P6` encoded mask plus the centroids as hex.
pub fn segment_bytes(input: &[u8], options: &SegmentOptions) -> Result<(Vec<u8>, Vec<String>)> {
    let raster = raster::load(input, options.layout)?;
    let segmentation = segment_raster(&raster, options)?;
    Ok((
        raster::encode_ppm(&segmentation.mask),
        centroid_hex(&segmentation.result.centroids),
    ))
}

/// Read `input`, segment it, and write the mask to `output`.
pub fn segment_file(input: &Path, output: &Path, options: &SegmentOptions) -> Result<KMeansResult> {
    let raster = raster::read_raster(input, options.layout)?;
    let segmentation = segment_raster(&raster, options)?;
    raster::write_raster(output, &segmentation.mask)?;
    info!(path = %output.display(), "wrote segmentation mask");
    Ok(segmentation.result)
}

/// Segment an uploaded image for JavaScript callers.
///
/// Returns `{ image: Uint8Array, centroids: string[] }` where `image` holds a binary `P6`
/// raster and `centroids` the final cluster means as `RRGGBB`.
#[wasm_bindgen]
pub fn segment(
    input: Vec<u8>,
    n_clusters: usize,
    seed: Option<u32>,
    palette: Option<Array>,
) -> std::result::Result<Object, JsValue> {
    let to_js = |e: SegmentError| JsValue::from_str(&e.to_string());

    let palette = match palette {
        Some(js_palette) => {
            let mut entries = Vec::new();
            for val in js_palette.iter() {
                let s = val
                    .as_string()
                    .ok_or_else(|| JsValue::from_str("Palette values must be strings"))?;
                entries.push(s);
            }
            Palette::from_hex(&entries).map_err(to_js)?
        }
        None => Palette::binary(),
    };

    let options = SegmentOptions {
        kmeans: KMeansConfig::new(n_clusters),
        seed: seed.map(u64::from),
        palette,
        ..SegmentOptions::default()
    };
    let (ppm, centroids) = segment_bytes(&input, &options).map_err(to_js)?;

    let img_js = Uint8Array::from(ppm.as_slice());
    let centroids_js = Array::new();
    for hex in centroids {
        centroids_js.push(&JsValue::from_str(&hex));
    }

    let result = Object::new();
    Reflect::set(&result, &JsValue::from_str("image"), &img_js)?;
    Reflect::set(&result, &JsValue::from_str("centroids"), &centroids_js)?;
    Ok(result)
}
