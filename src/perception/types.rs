use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::errors::{PilotError, PilotResult};

/// A device pixel coordinate. Serialised as `[x, y]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[i32; 2]", into = "[i32; 2]")]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: Point) -> f64 {
        let dx = (self.x - other.x) as f64;
        let dy = (self.y - other.y) as f64;
        dx.hypot(dy)
    }
}

impl From<[i32; 2]> for Point {
    fn from([x, y]: [i32; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [i32; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Screen rectangle in device pixels. Serialised as `[x, y, w, h]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u32; 4]", into = "[u32; 4]")]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x as i32
            && p.y >= self.y as i32
            && p.x < (self.x + self.w) as i32
            && p.y < (self.y + self.h) as i32
    }

    pub fn center(&self) -> Point {
        Point::new((self.x + self.w / 2) as i32, (self.y + self.h / 2) as i32)
    }

    /// Intersection with a `width × height` frame as `(x0, y0, x1, y1)`,
    /// end-exclusive. `None` when nothing of the region is on screen.
    pub fn clip(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x1 = self.x.saturating_add(self.w).min(width);
        let y1 = self.y.saturating_add(self.h).min(height);
        if self.x >= x1 || self.y >= y1 {
            return None;
        }
        Some((self.x, self.y, x1, y1))
    }
}

impl From<[u32; 4]> for Region {
    fn from([x, y, w, h]: [u32; 4]) -> Self {
        Self { x, y, w, h }
    }
}

impl From<Region> for [u32; 4] {
    fn from(r: Region) -> Self {
        [r.x, r.y, r.w, r.h]
    }
}

/// Inclusive HSV bounds, OpenCV 8-bit convention (H 0–180, S/V 0–255).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsvRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HsvRange {
    pub fn new(lower: [u8; 3], upper: [u8; 3]) -> Self {
        Self { lower, upper }
    }

    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|i| hsv[i] >= self.lower[i] && hsv[i] <= self.upper[i])
    }
}

/// Group accepted components that sit on the same row of the list.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusterSpec {
    #[serde(default = "default_min_members")]
    pub min_members: usize,
    /// Maximum vertical distance between neighbouring members, in pixels.
    #[serde(default = "default_max_gap")]
    pub max_gap: u32,
}

fn default_min_members() -> usize {
    2
}

fn default_max_gap() -> u32 {
    80
}

/// A named visual pattern: colour ranges restricted to a region, filtered by
/// component area, or scored by fill fraction for full-screen flashes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionTarget {
    /// Filled in from the calibration key when loaded.
    #[serde(default)]
    pub name: String,
    pub ranges: Vec<HsvRange>,
    pub region: Region,
    /// Accepted component area `[min, max]` in pixels.
    #[serde(default = "default_area")]
    pub area: [u32; 2],
    /// Fraction of region pixels that must be in range. Skips component
    /// extraction when set.
    #[serde(default)]
    pub fill_threshold: Option<f32>,
    /// Accepted bounding-box aspect ratio `[min, max]` (width / height).
    #[serde(default)]
    pub aspect: Option<[f32; 2]>,
    #[serde(default)]
    pub cluster: Option<ClusterSpec>,
}

fn default_area() -> [u32; 2] {
    [1, u32::MAX]
}

impl DetectionTarget {
    pub fn new(name: impl Into<String>, ranges: Vec<HsvRange>, region: Region, area: [u32; 2]) -> Self {
        Self {
            name: name.into(),
            ranges,
            region,
            area,
            fill_threshold: None,
            aspect: None,
            cluster: None,
        }
    }

    pub fn validate(&self) -> PilotResult<()> {
        let bad = |why: &str| Err(PilotError::Calibration(format!("target '{}': {why}", self.name)));
        if self.ranges.is_empty() {
            return bad("needs at least one colour range");
        }
        for r in &self.ranges {
            if (0..3).any(|i| r.lower[i] > r.upper[i]) {
                return bad("range lower bound exceeds upper bound");
            }
            if r.upper[0] > 180 {
                return bad("hue is limited to 0..=180");
            }
        }
        if self.region.w == 0 || self.region.h == 0 {
            return bad("region is empty");
        }
        if self.area[0] > self.area[1] {
            return bad("area min exceeds max");
        }
        if let Some(t) = self.fill_threshold {
            if !(t > 0.0 && t <= 1.0) {
                return bad("fill_threshold must be in (0, 1]");
            }
        }
        if let Some([lo, hi]) = self.aspect {
            if lo > hi || lo < 0.0 {
                return bad("aspect bounds are inverted");
            }
        }
        Ok(())
    }
}

/// Outcome of one `detect` call. Never retained across ticks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionResult {
    pub found: bool,
    pub point: Option<Point>,
    /// Component area in pixels, or fill fraction for flash targets.
    pub confidence: f64,
}

impl DetectionResult {
    pub fn absent() -> Self {
        Self {
            found: false,
            point: None,
            confidence: 0.0,
        }
    }

    pub fn at(point: Point, confidence: f64) -> Self {
        Self {
            found: true,
            point: Some(point),
            confidence,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotMeta {
    pub width: u32,
    pub height: u32,
    pub captured_at: chrono::DateTime<chrono::Utc>,
}

/// A decoded device frame.
#[derive(Debug, Clone)]
pub struct Screenshot {
    image: RgbImage,
    pub meta: ScreenshotMeta,
}

impl Screenshot {
    pub fn from_rgb(image: RgbImage) -> Self {
        let meta = ScreenshotMeta {
            width: image.width(),
            height: image.height(),
            captured_at: chrono::Utc::now(),
        };
        Self { image, meta }
    }

    /// Decode PNG/JPEG bytes as returned by `screencap -p`.
    pub fn decode(bytes: &[u8]) -> PilotResult<Self> {
        if bytes.is_empty() {
            return Err(PilotError::Perception("empty screenshot payload".into()));
        }
        let img = image::load_from_memory(bytes)?;
        Ok(Self::from_rgb(img.to_rgb8()))
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }
}
