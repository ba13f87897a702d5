//! Converts a detection result into the placement of a product overlay.
//!
//! All geometry is expressed in the pixel space of the frame that is being shown.
//! Every product type yields a small inline list of anchors: one for glasses and
//! hats, two for earrings. The list lives on the stack so the render loop can solve
//! anchors every tick without allocating.

use serde::{Deserialize, Serialize};

use crate::types::{
    DetectionState, FrameSize, LEFT_EAR_JAW, LandmarkSet, NOSE_BRIDGE_TOP, Point, ProductType,
    RIGHT_EAR_JAW,
};

pub const MAX_ANCHORS: usize = 2;

/// The user scale multiplier never drops below this, so a fallback anchor always
/// has a visible size.
const MIN_USER_SCALE: f32 = 0.05;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AnchorTransform {
    pub center: Point,
    pub width: f32,
    pub height: f32,
    pub rotation: f32,
}

impl AnchorTransform {
    pub fn is_drawable(&self) -> bool {
        self.width > 0.0
            && self.height > 0.0
            && self.width.is_finite()
            && self.height.is_finite()
            && self.rotation.is_finite()
            && self.center.is_finite()
    }
}

/// Fixed-capacity list of anchors for one product placement.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Anchors {
    slots: [AnchorTransform; MAX_ANCHORS],
    len: usize,
}

impl Anchors {
    pub fn single(anchor: AnchorTransform) -> Self {
        let mut anchors = Self::default();
        anchors.push(anchor);
        anchors
    }

    pub fn pair(first: AnchorTransform, second: AnchorTransform) -> Self {
        let mut anchors = Self::default();
        anchors.push(first);
        anchors.push(second);
        anchors
    }

    /// A zero-sized anchor at the origin, returned when the frame has no size yet.
    pub fn degenerate() -> Self {
        Self::single(AnchorTransform::default())
    }

    pub fn push(&mut self, anchor: AnchorTransform) {
        if self.len < MAX_ANCHORS {
            self.slots[self.len] = anchor;
            self.len += 1;
        } else {
            log::warn!("anchor list full, dropping extra anchor");
        }
    }

    pub fn as_slice(&self) -> &[AnchorTransform] {
        &self.slots[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [AnchorTransform] {
        &mut self.slots[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_drawable(&self) -> bool {
        !self.is_empty() && self.as_slice().iter().all(AnchorTransform::is_drawable)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnchorTransform> {
        self.as_slice().iter()
    }
}

/// Placement tunables. Scale constants are empirical defaults, not physical
/// measurements; the user controls (`scale`, `offset_x`, `offset_y`) are applied
/// on top of them every tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Glasses width as a multiple of the inter-eye distance.
    pub k_glasses: f32,
    /// Height/width ratio for glasses when the sprite's own aspect is not used.
    pub glasses_aspect: f32,
    /// Upward shift of the glasses center, as a fraction of overlay height.
    pub bridge_lift: f32,
    /// Hat width as a multiple of the jaw-outline height.
    pub k_hat: f32,
    pub hat_aspect: f32,
    /// Distance from the nose bridge top to the estimated hairline, as a fraction of
    /// the jaw-outline height.
    pub hairline_ratio: f32,
    /// Earring square size as a multiple of the inter-eye distance.
    pub k_earring: f32,
    /// Width of the centered fallback anchor relative to frame width.
    pub fallback_width_fraction: f32,
    /// Use the sprite's intrinsic aspect ratio when it is known.
    pub use_sprite_aspect: bool,
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            k_glasses: 2.2,
            glasses_aspect: 0.5,
            bridge_lift: 0.05,
            k_hat: 1.6,
            hat_aspect: 0.75,
            hairline_ratio: 0.6,
            k_earring: 0.35,
            fallback_width_fraction: 0.45,
            use_sprite_aspect: true,
            scale: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }
}

impl FitConfig {
    fn user_scale(&self) -> f32 {
        if self.scale.is_finite() {
            self.scale.max(MIN_USER_SCALE)
        } else {
            1.0
        }
    }

    fn aspect_for(&self, product: ProductType, sprite_aspect: Option<f32>) -> f32 {
        let fixed = match product {
            ProductType::Glasses => self.glasses_aspect,
            ProductType::Hat => self.hat_aspect,
            ProductType::Earrings => 1.0,
        };
        match sprite_aspect {
            Some(aspect) if self.use_sprite_aspect && aspect.is_finite() && aspect > 0.0 => aspect,
            _ => fixed,
        }
    }

    fn offset(&self, p: Point) -> Point {
        Point::new(p.x + self.offset_x, p.y + self.offset_y)
    }
}

/// Solves the overlay placement for the current detection state.
///
/// `sprite_aspect` is the sprite's height/width ratio when a sprite is loaded.
/// Without a face (or when landmark geometry collapses) a centered fallback is
/// returned, so a valid frame always yields drawable anchors.
pub fn solve(
    state: &DetectionState,
    product: ProductType,
    frame: FrameSize,
    sprite_aspect: Option<f32>,
    cfg: &FitConfig,
) -> Anchors {
    if frame.is_empty() {
        return Anchors::degenerate();
    }

    let aspect = cfg.aspect_for(product, sprite_aspect);
    if let DetectionState::Found(landmarks) = state {
        let landmarks = landmarks.rescaled(frame);
        let anchors = match product {
            ProductType::Glasses => Anchors::single(place_glasses(&landmarks, aspect, cfg)),
            ProductType::Hat => Anchors::single(place_hat(&landmarks, aspect, cfg)),
            ProductType::Earrings => place_earrings(&landmarks, cfg),
        };
        if anchors.is_drawable() {
            return anchors;
        }
        log::debug!("landmark geometry degenerate, using centered placement");
    }

    fallback(product, frame, aspect, cfg)
}

fn eye_line(landmarks: &LandmarkSet) -> (Point, Point) {
    (landmarks.left_eye_center(), landmarks.right_eye_center())
}

/// Moves `p` by `amount` along the "up" direction of a frame rotated by `rotation`.
fn lift(p: Point, rotation: f32, amount: f32) -> Point {
    Point::new(p.x + rotation.sin() * amount, p.y - rotation.cos() * amount)
}

fn place_glasses(landmarks: &LandmarkSet, aspect: f32, cfg: &FitConfig) -> AnchorTransform {
    let (left, right) = eye_line(landmarks);
    let width = left.distance(&right) * cfg.k_glasses * cfg.user_scale();
    let height = width * aspect;
    let rotation = left.angle_to(&right);
    let center = lift(left.midpoint(&right), rotation, height * cfg.bridge_lift);

    AnchorTransform {
        center: cfg.offset(center),
        width,
        height,
        rotation,
    }
}

fn place_hat(landmarks: &LandmarkSet, aspect: f32, cfg: &FitConfig) -> AnchorTransform {
    let (min_y, max_y) = landmarks
        .jaw()
        .iter()
        .fold((f32::MAX, f32::MIN), |acc, p| (acc.0.min(p.y), acc.1.max(p.y)));
    let head_height = (max_y - min_y).max(0.0);
    let width = head_height * cfg.k_hat * cfg.user_scale();
    let height = width * aspect;

    let (left, right) = eye_line(landmarks);
    let rotation = left.angle_to(&right);
    let forehead = landmarks.point(NOSE_BRIDGE_TOP);
    let hairline = lift(forehead, rotation, head_height * cfg.hairline_ratio);
    // Bottom edge of the hat sits on the hairline.
    let center = lift(hairline, rotation, height * 0.5);

    AnchorTransform {
        center: cfg.offset(center),
        width,
        height,
        rotation,
    }
}

fn place_earrings(landmarks: &LandmarkSet, cfg: &FitConfig) -> Anchors {
    let (left, right) = eye_line(landmarks);
    let size = left.distance(&right) * cfg.k_earring * cfg.user_scale();

    let hang = |lobe: Point| AnchorTransform {
        center: cfg.offset(Point::new(lobe.x, lobe.y + size * 0.5)),
        width: size,
        height: size,
        rotation: 0.0,
    };

    Anchors::pair(
        hang(landmarks.point(LEFT_EAR_JAW)),
        hang(landmarks.point(RIGHT_EAR_JAW)),
    )
}

fn fallback(product: ProductType, frame: FrameSize, aspect: f32, cfg: &FitConfig) -> Anchors {
    let fw = frame.width as f32;
    let fh = frame.height as f32;
    let center = Point::new(fw * 0.5, fh * 0.5);
    let span = fw * cfg.fallback_width_fraction.clamp(0.01, 1.0) * cfg.user_scale();

    match product {
        ProductType::Glasses | ProductType::Hat => Anchors::single(AnchorTransform {
            center: cfg.offset(center),
            width: span,
            height: span * aspect,
            rotation: 0.0,
        }),
        ProductType::Earrings => {
            let size = span * 0.25;
            let at = |dx: f32| AnchorTransform {
                center: cfg.offset(Point::new(center.x + dx, center.y)),
                width: size,
                height: size,
                rotation: 0.0,
            };
            Anchors::pair(at(-span * 0.5), at(span * 0.5))
        }
    }
}
