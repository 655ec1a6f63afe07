//! Raster boundary: netpbm decoding/encoding plus a fallback through the `image` crate.
//!
//! - `decode_pnm`: binary `P5`/`P6` into a validated [`Raster`].
//! - `load`: netpbm when the magic matches, any `image`-supported format otherwise.
//! - `encode_ppm`: `P6\n<w> <h>\n<max>\n` followed by RGB triplets.
//! - `read_raster` / `write_raster`: the same on disk.
use std::borrow::Cow;
use std::fs;
use std::path::Path;

use image::{ImageFormat, RgbImage};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::SegmentError;
use crate::point::Point;

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("raster header ended before the {0}")]
    TruncatedHeader(&'static str),

    #[error("invalid {field} in raster header: {value:?}")]
    InvalidHeaderField { field: &'static str, value: String },

    #[error("max value {0} is outside 1..=255; only 8-bit rasters are supported")]
    UnsupportedMaxValue(u32),

    #[error("raster {width}x{height} is too large to address")]
    DimensionOverflow { width: u32, height: u32 },

    #[error(
        "pixel data too short for {width}x{height} with {channels} bytes per pixel: \
         expected {expected} bytes, found {actual}"
    )]
    ShortPixelData {
        width: u32,
        height: u32,
        channels: usize,
        expected: usize,
        actual: usize,
    },

    #[error("buffer of {actual} bytes does not match {width}x{height} with {channels} channels")]
    BufferSize {
        width: u32,
        height: u32,
        channels: usize,
        actual: usize,
    },

    #[error("unsupported channel count {0}; expected 1 or 3")]
    UnsupportedChannels(usize),

    #[error("sample {value} at byte {offset} exceeds the declared max value {max_value}")]
    SampleOutOfRange {
        offset: usize,
        value: u8,
        max_value: u8,
    },

    #[error("image decode/encode failed: {0}")]
    Image(#[from] image::ImageError),
}

/// How many bytes per pixel to read from a netpbm body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PixelLayout {
    /// One byte for `P5`, three for `P6`, as the header declares.
    #[default]
    Declared,
    /// Always three bytes per pixel, even when the header says `P5`.
    ///
    /// Matches the historical tool, which read color triplets out of files tagged as gray.
    Packed,
}

/// A decoded 8-bit raster with interleaved channels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Raster {
    width: u32,
    height: u32,
    max_value: u8,
    channels: usize,
    data: Vec<u8>,
}

fn byte_len(width: u32, height: u32, channels: usize) -> Result<usize, RasterError> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(channels))
        .ok_or(RasterError::DimensionOverflow { width, height })
}

impl Raster {
    /// Wrap an interleaved buffer. `data` must hold exactly `width * height * channels` bytes,
    /// none of them above `max_value`.
    pub fn new(
        width: u32,
        height: u32,
        max_value: u8,
        channels: usize,
        data: Vec<u8>,
    ) -> Result<Self, RasterError> {
        if channels != 1 && channels != 3 {
            return Err(RasterError::UnsupportedChannels(channels));
        }
        if max_value == 0 {
            return Err(RasterError::UnsupportedMaxValue(0));
        }
        if data.len() != byte_len(width, height, channels)? {
            return Err(RasterError::BufferSize {
                width,
                height,
                channels,
                actual: data.len(),
            });
        }
        if let Some((offset, &value)) = data.iter().enumerate().find(|(_, v)| **v > max_value) {
            return Err(RasterError::SampleOutOfRange {
                offset,
                value,
                max_value,
            });
        }
        Ok(Self {
            width,
            height,
            max_value,
            channels,
            data,
        })
    }

    /// An RGB raster with max value 255.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self, RasterError> {
        Self::new(width, height, u8::MAX, 3, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn max_value(&self) -> u8 {
        self.max_value
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// One point per pixel: gray `v` becomes `(v, v, v)`, RGB stays as is.
    pub fn points(&self) -> Vec<Point> {
        match self.channels {
            1 => self.data.iter().map(|&v| Point::from_gray(v)).collect(),
            _ => self
                .data
                .chunks_exact(3)
                .map(|c| Point::from_rgb([c[0], c[1], c[2]]))
                .collect(),
        }
    }

    /// Interleaved RGB bytes, expanding gray if needed.
    pub fn rgb_bytes(&self) -> Cow<'_, [u8]> {
        match self.channels {
            1 => Cow::Owned(self.data.iter().flat_map(|&v| [v, v, v]).collect()),
            _ => Cow::Borrowed(&self.data),
        }
    }
}

// ------------------------------------------------------------
// netpbm header scanning
// ------------------------------------------------------------

struct HeaderCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> HeaderCursor<'a> {
    fn skip_separators(&mut self) {
        while let Some(&b) = self.bytes.get(self.pos) {
            if b == b'#' {
                while let Some(&c) = self.bytes.get(self.pos) {
                    self.pos += 1;
                    if c == b'\n' || c == b'\r' {
                        break;
                    }
                }
            } else if b.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn token(&mut self, field: &'static str) -> Result<&'a [u8], RasterError> {
        self.skip_separators();
        let start = self.pos;
        while let Some(&b) = self.bytes.get(self.pos) {
            if b.is_ascii_whitespace() || b == b'#' {
                break;
            }
            self.pos += 1;
        }
        if start == self.pos {
            return Err(RasterError::TruncatedHeader(field));
        }
        Ok(&self.bytes[start..self.pos])
    }

    fn number(&mut self, field: &'static str) -> Result<u32, RasterError> {
        let token = self.token(field)?;
        std::str::from_utf8(token)
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .ok_or_else(|| RasterError::InvalidHeaderField {
                field,
                value: String::from_utf8_lossy(token).into_owned(),
            })
    }
}

fn is_pnm(bytes: &[u8]) -> bool {
    bytes.starts_with(b"P5") || bytes.starts_with(b"P6")
}

/// Decode a binary `P5` (gray) or `P6` (RGB) raster.
///
/// The header is `<magic> <width> <height> <max-value>`, whitespace separated with `#` comments
/// allowed, and exactly one whitespace byte separates it from the pixel data. Bytes past the
/// expected pixel data are ignored.
pub fn decode_pnm(bytes: &[u8], layout: PixelLayout) -> Result<Raster, RasterError> {
    let mut cursor = HeaderCursor { bytes, pos: 0 };

    let magic = cursor.token("format tag")?;
    let declared = match magic {
        b"P5" => 1,
        b"P6" => 3,
        other => {
            return Err(RasterError::InvalidHeaderField {
                field: "format tag",
                value: String::from_utf8_lossy(other).into_owned(),
            });
        }
    };
    let width = cursor.number("width")?;
    let height = cursor.number("height")?;
    let max_value = cursor.number("max value")?;
    if !(1..=255).contains(&max_value) {
        return Err(RasterError::UnsupportedMaxValue(max_value));
    }

    match bytes.get(cursor.pos) {
        Some(b) if b.is_ascii_whitespace() => cursor.pos += 1,
        Some(_) => {
            return Err(RasterError::InvalidHeaderField {
                field: "max value",
                value: String::from_utf8_lossy(&bytes[cursor.pos..(cursor.pos + 1)]).into_owned(),
            });
        }
        None => {}
    }

    let channels = match layout {
        PixelLayout::Declared => declared,
        PixelLayout::Packed => {
            if declared == 1 {
                warn!("reading gray-tagged raster as packed RGB triplets");
            }
            3
        }
    };

    let expected = byte_len(width, height, channels)?;
    let body = &bytes[cursor.pos..];
    if body.len() < expected {
        return Err(RasterError::ShortPixelData {
            width,
            height,
            channels,
            expected,
            actual: body.len(),
        });
    }
    if layout == PixelLayout::Declared && declared == 1 && body.len() == 3 * expected {
        warn!(
            width,
            height,
            "gray-tagged raster holds three bytes per pixel; only the first third is read, \
             use --packed to read it as RGB"
        );
    } else if body.len() > expected {
        debug!(extra = body.len() - expected, "ignoring trailing bytes after pixel data");
    }

    Raster::new(width, height, max_value as u8, channels, body[..expected].to_vec())
}

/// Decode netpbm directly, anything else through `image` as 8-bit RGB.
pub fn load(bytes: &[u8], layout: PixelLayout) -> Result<Raster, RasterError> {
    if is_pnm(bytes) {
        return decode_pnm(bytes, layout);
    }
    let rgb = image::load_from_memory(bytes)?.to_rgb8();
    let (width, height) = rgb.dimensions();
    Raster::from_rgb(width, height, rgb.into_raw())
}

/// Serialize as binary `P6`, carrying the raster's max value over.
pub fn encode_ppm(raster: &Raster) -> Vec<u8> {
    let header = format!("P6\n{} {}\n{}\n", raster.width, raster.height, raster.max_value);
    let rgb = raster.rgb_bytes();
    let mut out = Vec::with_capacity(header.len() + rgb.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(&rgb);
    out
}

pub fn read_raster(path: &Path, layout: PixelLayout) -> Result<Raster, SegmentError> {
    let bytes = fs::read(path).map_err(|source| SegmentError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(load(&bytes, layout)?)
}

/// Write `raster` to `path`. netpbm (and unknown) extensions get `P6`; other image extensions
/// are encoded by `image`.
pub fn write_raster(path: &Path, raster: &Raster) -> Result<(), SegmentError> {
    let io_err = |source| SegmentError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }

    match ImageFormat::from_path(path) {
        Ok(ImageFormat::Pnm) | Err(_) => fs::write(path, encode_ppm(raster)).map_err(io_err),
        Ok(format) => {
            let rgb = raster.rgb_bytes().into_owned();
            let image = RgbImage::from_raw(raster.width, raster.height, rgb).ok_or(
                RasterError::BufferSize {
                    width: raster.width,
                    height: raster.height,
                    channels: 3,
                    actual: raster.data.len(),
                },
            )?;
            image
                .save_with_format(path, format)
                .map_err(|e| SegmentError::Raster(e.into()))
        }
    }
}
