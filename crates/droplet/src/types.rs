use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use geo_types::{Coord, LineString, Polygon};
use strum::{Display, EnumString, IntoStaticStr};

/// Decoded grayscale image. Measurement steps only ever borrow it.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelGrid {
    image: GrayImage,
}

impl PixelGrid {
    pub fn new(image: GrayImage) -> Self {
        Self { image }
    }

    /// Reduce any decoded image (RGB, RGBA, 16-bit...) to 8-bit luma
    pub fn from_dynamic(image: &DynamicImage) -> Self {
        Self::new(image.to_luma8())
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Intensity at `(x, y)`; panics outside the grid like `GrayImage::get_pixel`
    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.image.get_pixel(x, y)[0]
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.image
    }

    /// Left-right mirror image of this grid
    pub fn mirrored(&self) -> PixelGrid {
        Self::new(image::imageops::flip_horizontal(&self.image))
    }
}

/// Closed outer boundary of the droplet silhouette.
///
/// Points are pixel centres, 8-connected, without consecutive duplicates, and
/// wound clockwise as seen on screen (y axis pointing down).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contour {
    points: Vec<[f64; 2]>,
    /// Dimensions of the frame the contour was traced in
    pub image_width: u32,
    pub image_height: u32,
}

impl Contour {
    /// Build a contour from a traced ring, dropping repeated points and
    /// normalizing the winding to clockwise on screen.
    pub fn new(points: Vec<[f64; 2]>, image_width: u32, image_height: u32) -> Self {
        let mut ring: Vec<[f64; 2]> = Vec::with_capacity(points.len());
        for p in points {
            if ring.last() != Some(&p) {
                ring.push(p);
            }
        }
        while ring.len() > 1 && ring.first() == ring.last() {
            ring.pop();
        }

        let mut contour = Self {
            points: ring,
            image_width,
            image_height,
        };
        // geo measures in y-up axes, so a positive signed area is clockwise on screen
        if contour.signed_area() < 0.0 {
            contour.points.reverse();
        }
        contour
    }

    pub fn points(&self) -> &[[f64; 2]] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Point at a cyclic index
    pub fn at(&self, index: usize) -> [f64; 2] {
        self.points[index % self.points.len()]
    }

    /// Index reached by stepping once from `index` in `direction`
    pub fn step(&self, index: usize, direction: Direction) -> usize {
        let n = self.points.len();
        match direction {
            Direction::Forward => (index + 1) % n,
            Direction::Backward => (index + n - 1) % n,
        }
    }

    /// Whether a point sits on the outermost pixel ring of the frame
    pub fn on_frame(&self, p: [f64; 2]) -> bool {
        p[0] <= 0.0
            || p[1] <= 0.0
            || p[0] >= f64::from(self.image_width) - 1.0
            || p[1] >= f64::from(self.image_height) - 1.0
    }

    /// Convert to geo-types Polygon for geometric operations
    pub fn to_geo_polygon(&self) -> Polygon<f64> {
        let coords: Vec<Coord<f64>> = self.points.iter().map(|&[x, y]| Coord { x, y }).collect();
        Polygon::new(LineString::new(coords), vec![])
    }

    pub fn signed_area(&self) -> f64 {
        use geo::Area;
        self.to_geo_polygon().signed_area()
    }

    pub fn area(&self) -> f64 {
        use geo::Area;
        self.to_geo_polygon().unsigned_area()
    }

    /// Get the bounding box of the contour
    pub fn bounding_box(&self) -> ([f64; 2], [f64; 2]) {
        let mut min = [f64::INFINITY; 2];
        let mut max = [f64::NEG_INFINITY; 2];
        for &[x, y] in &self.points {
            min = [min[0].min(x), min[1].min(y)];
            max = [max[0].max(x), max[1].max(y)];
        }
        (min, max)
    }
}

/// Walking direction along a contour's point order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn reversed(self) -> Self {
        match self {
            Self::Forward => Self::Backward,
            Self::Backward => Self::Forward,
        }
    }
}

/// Straight line `y = slope * x + intercept` in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineModel {
    pub slope: f64,
    pub intercept: f64,
}

impl LineModel {
    pub fn horizontal(y: f64) -> Self {
        Self {
            slope: 0.0,
            intercept: y,
        }
    }

    pub fn y_at(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }

    /// Unit vector along the line, pointing towards +x
    pub fn direction(&self) -> [f64; 2] {
        let norm = self.slope.hypot(1.0);
        [1.0 / norm, self.slope / norm]
    }

    /// Unit normal pointing up on screen (towards -y)
    pub fn up(&self) -> [f64; 2] {
        let norm = self.slope.hypot(1.0);
        [self.slope / norm, -1.0 / norm]
    }

    /// Signed perpendicular distance above the line; negative below it
    pub fn height_of(&self, p: [f64; 2]) -> f64 {
        (self.y_at(p[0]) - p[1]) / self.slope.hypot(1.0)
    }

    /// Foot of the perpendicular from `p`
    pub fn project(&self, p: [f64; 2]) -> [f64; 2] {
        let h = self.height_of(p);
        let up = self.up();
        [p[0] - h * up[0], p[1] - h * up[1]]
    }

    pub fn tilt_deg(&self) -> f64 {
        self.slope.atan().to_degrees()
    }
}

/// Where a contact point sits on the contour and how to reach the apex from it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContactPoint {
    /// Position on the baseline
    pub position: [f64; 2],
    /// Index of the contour point the contact was taken from
    pub contour_index: usize,
    /// Direction along the contour that leads up to the apex
    pub toward_apex: Direction,
}

/// Which strategy produced the baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BaselineSource {
    /// Long near-horizontal intensity edge of the substrate
    SurfaceEdge,
    /// Lower edge of the silhouette's bounding box
    BoundingBox,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub line: LineModel,
    pub left: ContactPoint,
    pub right: ContactPoint,
    pub source: BaselineSource,
}

impl Baseline {
    pub fn contact(&self, side: Side) -> &ContactPoint {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub fn contact_width(&self) -> f64 {
        let [lx, ly] = self.left.position;
        let [rx, ry] = self.right.position;
        (rx - lx).hypot(ry - ly)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

/// Contour points from a contact point up towards the apex, height-monotone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContourBranch {
    pub side: Side,
    pub points: Vec<[f64; 2]>,
}

impl ContourBranch {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Pipeline stage a failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Loading,
    EdgeExtraction,
    BaselineDetection,
    Splitting,
    Fitting,
    /// Caller-side scheduling: timeouts and worker failures
    Batch,
}

/// Geometric model that produced a side's angle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FitModel {
    Circle,
    Polynomial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SideMeasurement {
    pub side: Side,
    /// Contact angle in degrees, inside (0, 180)
    pub angle_deg: f64,
    /// Number of branch points the fit saw
    pub branch_len: usize,
    pub model: FitModel,
    /// RMS perpendicular residual of the fit in pixels
    pub residual_px: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AngleResult {
    /// Representative angle in degrees, rounded to the engine precision
    pub angle_deg: f64,
    pub left: Option<SideMeasurement>,
    pub right: Option<SideMeasurement>,
}

impl AngleResult {
    pub fn side(&self, side: Side) -> Option<&SideMeasurement> {
        match side {
            Side::Left => self.left.as_ref(),
            Side::Right => self.right.as_ref(),
        }
    }
}
