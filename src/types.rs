use std::{ops::Range, sync::Arc, time::Instant};

use serde::{Deserialize, Serialize};

/// Number of points produced by the landmark regressor.
pub const NUM_LANDMARKS: usize = 68;

pub const JAW: Range<usize> = 0..17;
pub const NOSE_BRIDGE: Range<usize> = 27..31;
pub const NOSE_TIP: Range<usize> = 31..36;
pub const LEFT_EYE: Range<usize> = 36..42;
pub const RIGHT_EYE: Range<usize> = 42..48;

/// Top of the nose bridge, used as the forehead reference.
pub const NOSE_BRIDGE_TOP: usize = 27;
/// Jaw outline points closest to the ear lobes.
pub const LEFT_EAR_JAW: usize = 2;
pub const RIGHT_EAR_JAW: usize = 14;

#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
}

impl Frame {
    pub fn from_rgba_image(image: image::RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            rgba: image.into_raw(),
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }

    pub fn is_usable(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.rgba.len() == self.width as usize * self.height as usize * 4
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// The pixel source currently shown behind the overlay.
#[derive(Clone, Debug)]
pub enum VisualFrame {
    /// Latest frame of an active camera stream. Replaced every capture tick.
    LiveCamera(Arc<Frame>),
    /// A decoded photo. Fixed for as long as it stays selected.
    StillImage(Arc<Frame>),
}

impl VisualFrame {
    pub fn frame(&self) -> &Arc<Frame> {
        match self {
            VisualFrame::LiveCamera(frame) | VisualFrame::StillImage(frame) => frame,
        }
    }

    pub fn size(&self) -> FrameSize {
        self.frame().size()
    }

    pub fn is_live(&self) -> bool {
        matches!(self, VisualFrame::LiveCamera(_))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    pub fn midpoint(&self, other: &Point) -> Point {
        Point::new((self.x + other.x) * 0.5, (self.y + other.y) * 0.5)
    }

    /// Angle of the vector from `self` to `other`.
    pub fn angle_to(&self, other: &Point) -> f32 {
        (other.y - self.y).atan2(other.x - self.x)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// 68 facial keypoints in the coordinate space of the analyzed frame.
#[derive(Clone, Debug, PartialEq)]
pub struct LandmarkSet {
    points: [Point; NUM_LANDMARKS],
    seq: u64,
    frame_size: FrameSize,
}

impl LandmarkSet {
    /// Returns `None` unless exactly [`NUM_LANDMARKS`] points are supplied.
    pub fn new(points: &[Point], seq: u64, frame_size: FrameSize) -> Option<Self> {
        let points: [Point; NUM_LANDMARKS] = points.try_into().ok()?;
        Some(Self {
            points,
            seq,
            frame_size,
        })
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn frame_size(&self) -> FrameSize {
        self.frame_size
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn point(&self, idx: usize) -> Point {
        self.points[idx]
    }

    pub fn region(&self, range: Range<usize>) -> &[Point] {
        &self.points[range]
    }

    pub fn centroid(&self, range: Range<usize>) -> Point {
        let region = self.region(range);
        let (sx, sy) = region
            .iter()
            .fold((0.0_f32, 0.0_f32), |acc, p| (acc.0 + p.x, acc.1 + p.y));
        let n = region.len().max(1) as f32;
        Point::new(sx / n, sy / n)
    }

    pub fn left_eye_center(&self) -> Point {
        self.centroid(LEFT_EYE)
    }

    pub fn right_eye_center(&self) -> Point {
        self.centroid(RIGHT_EYE)
    }

    pub fn jaw(&self) -> &[Point] {
        self.region(JAW)
    }

    /// Maps the points into another frame size, e.g. when the camera
    /// renegotiated its resolution after the set was produced.
    pub fn rescaled(&self, target: FrameSize) -> LandmarkSet {
        if target == self.frame_size || self.frame_size.is_empty() {
            return self.clone();
        }
        let sx = target.width as f32 / self.frame_size.width as f32;
        let sy = target.height as f32 / self.frame_size.height as f32;
        let mut points = self.points;
        for p in points.iter_mut() {
            p.x *= sx;
            p.y *= sy;
        }
        LandmarkSet {
            points,
            seq: self.seq,
            frame_size: target,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum DetectionState {
    /// Models are not ready yet.
    #[default]
    Loading,
    /// Models are ready but the latest attempt found no face.
    Searching,
    Found(Arc<LandmarkSet>),
}

impl DetectionState {
    pub fn landmarks(&self) -> Option<&Arc<LandmarkSet>> {
        match self {
            DetectionState::Found(landmarks) => Some(landmarks),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, DetectionState::Found(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductType {
    Glasses,
    Hat,
    Earrings,
}

impl ProductType {
    pub fn label(&self) -> &'static str {
        match self {
            ProductType::Glasses => "Glasses",
            ProductType::Hat => "Hat",
            ProductType::Earrings => "Earrings",
        }
    }
}
