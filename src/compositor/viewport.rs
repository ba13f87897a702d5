use crate::{
    anchor::{AnchorTransform, Anchors},
    types::{FrameSize, Point, VisualFrame},
};

/// Placement of a frame inside the render surface.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    scale_x: f32,
    scale_y: f32,
}

impl Viewport {
    pub fn identity(size: FrameSize) -> Self {
        Self {
            x: 0,
            y: 0,
            width: size.width,
            height: size.height,
            scale_x: 1.0,
            scale_y: 1.0,
        }
    }

    /// Fills the whole surface, ignoring the frame's aspect ratio.
    pub fn stretch(frame: FrameSize, surface: FrameSize) -> Self {
        if frame.is_empty() || surface.is_empty() {
            return Self::identity(surface);
        }
        Self {
            x: 0,
            y: 0,
            width: surface.width,
            height: surface.height,
            scale_x: surface.width as f32 / frame.width as f32,
            scale_y: surface.height as f32 / frame.height as f32,
        }
    }

    /// Largest centered rectangle with the frame's aspect ratio.
    pub fn fit(frame: FrameSize, surface: FrameSize) -> Self {
        if frame.is_empty() || surface.is_empty() {
            return Self::identity(surface);
        }
        let scale = (surface.width as f32 / frame.width as f32)
            .min(surface.height as f32 / frame.height as f32);
        let width = ((frame.width as f32 * scale).round() as u32).clamp(1, surface.width);
        let height = ((frame.height as f32 * scale).round() as u32).clamp(1, surface.height);
        Self {
            x: (surface.width - width) / 2,
            y: (surface.height - height) / 2,
            width,
            height,
            scale_x: width as f32 / frame.width as f32,
            scale_y: height as f32 / frame.height as f32,
        }
    }

    /// Live camera frames are stretched, still photos letterboxed.
    pub fn for_frame(frame: &VisualFrame, surface: FrameSize) -> Self {
        match frame {
            VisualFrame::LiveCamera(_) => Self::stretch(frame.size(), surface),
            VisualFrame::StillImage(_) => Self::fit(frame.size(), surface),
        }
    }

    pub fn covers(&self, surface: FrameSize) -> bool {
        self.x == 0 && self.y == 0 && self.width == surface.width && self.height == surface.height
    }

    pub fn map_point(&self, p: Point) -> Point {
        Point::new(
            self.x as f32 + p.x * self.scale_x,
            self.y as f32 + p.y * self.scale_y,
        )
    }

    /// Maps an anchor from frame pixels to surface pixels. Under non-uniform
    /// scale the rotated axes are stretched individually.
    pub fn map_anchor(&self, anchor: &AnchorTransform) -> AnchorTransform {
        let (sin, cos) = anchor.rotation.sin_cos();
        let (ax, ay) = (cos * self.scale_x, sin * self.scale_y);
        let (bx, by) = (-sin * self.scale_x, cos * self.scale_y);
        AnchorTransform {
            center: self.map_point(anchor.center),
            width: anchor.width * ax.hypot(ay),
            height: anchor.height * bx.hypot(by),
            rotation: ay.atan2(ax),
        }
    }

    pub fn map_anchors(&self, anchors: &Anchors) -> Anchors {
        let mut mapped = *anchors;
        for a in mapped.as_mut_slice() {
            *a = self.map_anchor(a);
        }
        mapped
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use approx::assert_abs_diff_eq;

    use super::*;

    const SURFACE: FrameSize = FrameSize::new(640, 480);

    #[test]
    fn fit_letterboxes_portrait_photo() {
        let vp = Viewport::fit(FrameSize::new(300, 600), SURFACE);
        assert_eq!((vp.x, vp.y, vp.width, vp.height), (200, 0, 240, 480));
        let p = vp.map_point(Point::new(150.0, 300.0));
        assert_abs_diff_eq!(p.x, 320.0, epsilon = 1e-3);
        assert_abs_diff_eq!(p.y, 240.0, epsilon = 1e-3);
    }

    #[test]
    fn stretch_covers_surface() {
        let vp = Viewport::stretch(FrameSize::new(1280, 720), SURFACE);
        assert!(vp.covers(SURFACE));
        let p = vp.map_point(Point::new(1280.0, 720.0));
        assert_abs_diff_eq!(p.x, 640.0, epsilon = 1e-3);
        assert_abs_diff_eq!(p.y, 480.0, epsilon = 1e-3);
    }

    #[test]
    fn anchors_follow_non_uniform_scale() {
        let vp = Viewport::stretch(FrameSize::new(100, 100), FrameSize::new(200, 100));
        let level = AnchorTransform {
            center: Point::new(50.0, 50.0),
            width: 10.0,
            height: 10.0,
            rotation: 0.0,
        };
        let mapped = vp.map_anchor(&level);
        assert_abs_diff_eq!(mapped.center.x, 100.0);
        assert_abs_diff_eq!(mapped.width, 20.0);
        assert_abs_diff_eq!(mapped.height, 10.0);
        assert_abs_diff_eq!(mapped.rotation, 0.0);

        let upright = vp.map_anchor(&AnchorTransform {
            rotation: FRAC_PI_2,
            ..level
        });
        assert_abs_diff_eq!(upright.width, 10.0, epsilon = 1e-4);
        assert_abs_diff_eq!(upright.height, 20.0, epsilon = 1e-4);
        assert_abs_diff_eq!(upright.rotation, FRAC_PI_2, epsilon = 1e-5);
    }

    #[test]
    fn empty_frame_maps_to_identity() {
        let vp = Viewport::fit(FrameSize::new(0, 10), SURFACE);
        assert!(vp.covers(SURFACE));
    }
}
