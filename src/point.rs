/// A color in raw channel space, one per input pixel.
///
/// Channels are stored as `f32` so that centroids (means of many points) share the same type as
/// the points they summarize.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Promote an RGB triplet to a point.
    pub fn from_rgb([r, g, b]: [u8; 3]) -> Self {
        Self::new(r as f32, g as f32, b as f32)
    }

    /// Promote a single gray value `v` to `(v, v, v)`.
    pub fn from_gray(v: u8) -> Self {
        let v = v as f32;
        Self::new(v, v, v)
    }

    #[inline(always)]
    pub fn distance_squared(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    /// Euclidean distance in channel space.
    #[inline(always)]
    pub fn distance(&self, other: &Point) -> f32 {
        self.distance_squared(other).sqrt()
    }

    pub fn has_nan(&self) -> bool {
        self.x.is_nan() || self.y.is_nan() || self.z.is_nan()
    }

    /// Round and clamp each channel into a byte. NaN channels become 0.
    pub fn to_rgb(&self) -> [u8; 3] {
        let q = |c: f32| if c.is_nan() { 0 } else { c.round().clamp(0.0, 255.0) as u8 };
        [q(self.x), q(self.y), q(self.z)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gray_promotes_to_equal_channels() {
        assert_eq!(Point::from_gray(17), Point::new(17.0, 17.0, 17.0));
    }

    #[test]
    fn distance_is_euclidean() {
        let a = Point::new(0.0, 0.0, 0.0);
        let b = Point::new(1.0, 2.0, 2.0);
        assert_eq!(a.distance_squared(&b), 9.0);
        assert_eq!(a.distance(&b), 3.0);
        assert_eq!(b.distance(&a), 3.0);
    }

    #[test]
    fn nan_detection_and_byte_conversion() {
        let p = Point::new(f32::NAN, 300.0, -4.0);
        assert!(p.has_nan());
        assert_eq!(p.to_rgb(), [0, 255, 0]);
        assert!(!Point::from_rgb([1, 2, 3]).has_nan());
        assert_eq!(Point::new(127.5, 0.4, 254.6).to_rgb(), [128, 0, 255]);
    }
}
