use palette::Srgb;

use crate::error::{Result, SegmentError};
use crate::point::Point;

/// Output colors indexed by cluster id.
#[derive(Clone, Debug, PartialEq)]
pub struct Palette {
    colors: Vec<Srgb<u8>>,
}

impl Default for Palette {
    fn default() -> Self {
        Self::binary()
    }
}

impl Palette {
    pub fn new(colors: Vec<Srgb<u8>>) -> Self {
        Self { colors }
    }

    /// Cluster 0 is pure red, cluster 1 pure green.
    pub fn binary() -> Self {
        Self::new(vec![Srgb::new(255, 0, 0), Srgb::new(0, 255, 0)])
    }

    /// Parse `RRGGBB` entries, with or without a leading `#`.
    pub fn from_hex<S: AsRef<str>>(entries: &[S]) -> Result<Self> {
        let colors = entries
            .iter()
            .map(|s| parse_hex(s.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(colors))
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn color(&self, cluster: usize) -> Option<Srgb<u8>> {
        self.colors.get(cluster).copied()
    }

    /// Every cluster id below `k` must have a color.
    pub fn ensure_covers(&self, k: usize) -> Result<()> {
        if self.colors.len() < k {
            return Err(SegmentError::PaletteTooSmall {
                k,
                colors: self.colors.len(),
            });
        }
        Ok(())
    }
}

fn parse_hex(s: &str) -> Result<Srgb<u8>> {
    let hex = s.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(SegmentError::InvalidHex(s.to_string()));
    }
    let channel = |i: usize| {
        u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| SegmentError::InvalidHex(s.to_string()))
    };
    Ok(Srgb::new(channel(0)?, channel(2)?, channel(4)?))
}

/// Paint each label with its palette color, producing interleaved RGB bytes.
pub fn recolor(labels: &[usize], palette: &Palette) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(labels.len() * 3);
    for &label in labels {
        let c = palette.color(label).ok_or(SegmentError::PaletteTooSmall {
            k: label + 1,
            colors: palette.len(),
        })?;
        out.extend_from_slice(&[c.red, c.green, c.blue]);
    }
    Ok(out)
}

/// Centroids as upper-case `RRGGBB` strings.
pub fn centroid_hex(centroids: &[Point]) -> Vec<String> {
    centroids
        .iter()
        .map(|c| {
            let [r, g, b] = c.to_rgb();
            format!("{r:02X}{g:02X}{b:02X}")
        })
        .collect()
}
