//! Exponential smoothing of anchors at render cadence.

use std::f32::consts::{PI, TAU};

use crate::anchor::{AnchorTransform, Anchors};

pub const DEFAULT_ALPHA: f32 = 0.25;

pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Signed shortest angular difference from `a` to `b`, in `[-PI, PI]`.
pub fn angle_delta(a: f32, b: f32) -> f32 {
    let diff = b - a;
    diff.sin().atan2(diff.cos())
}

/// Interpolates along the short arc between two angles.
pub fn lerp_angle(a: f32, b: f32, t: f32) -> f32 {
    wrap_angle(a + angle_delta(a, b) * t)
}

/// Normalizes an angle into `(-PI, PI]`.
pub fn wrap_angle(theta: f32) -> f32 {
    let wrapped = (theta + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI { wrapped + TAU } else { wrapped }
}

/// Low-pass filter over consecutive anchor lists.
///
/// The smoothed value is owned here and handed out by reference, so the render
/// loop reuses the same buffer every tick.
#[derive(Debug, Clone)]
pub struct TemporalSmoother {
    alpha: f32,
    smoothed: Anchors,
    primed: bool,
}

impl TemporalSmoother {
    pub fn new(alpha: f32) -> Self {
        let alpha = if alpha.is_finite() {
            alpha.clamp(0.0, 1.0)
        } else {
            DEFAULT_ALPHA
        };
        Self {
            alpha,
            smoothed: Anchors::default(),
            primed: false,
        }
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn set_alpha(&mut self, alpha: f32) {
        if alpha.is_finite() {
            self.alpha = alpha.clamp(0.0, 1.0);
        }
    }

    /// Forgets the previous value; the next update starts fresh.
    pub fn reset(&mut self) {
        self.primed = false;
        self.smoothed = Anchors::default();
    }

    pub fn current(&self) -> Option<&Anchors> {
        self.primed.then_some(&self.smoothed)
    }

    /// Moves the smoothed value toward `raw` and returns it.
    ///
    /// The first update, a change in the number of anchors, or a non-drawable raw
    /// value re-seeds the filter with `raw` exactly.
    pub fn update(&mut self, raw: &Anchors) -> &Anchors {
        if !raw.is_drawable() {
            self.smoothed = *raw;
            self.primed = false;
            return &self.smoothed;
        }

        if !self.primed || self.smoothed.len() != raw.len() {
            self.smoothed = *raw;
            self.primed = true;
            return &self.smoothed;
        }

        let alpha = self.alpha;
        for (s, r) in self.smoothed.as_mut_slice().iter_mut().zip(raw.iter()) {
            step(s, r, alpha);
        }
        &self.smoothed
    }
}

impl Default for TemporalSmoother {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHA)
    }
}

fn step(s: &mut AnchorTransform, r: &AnchorTransform, alpha: f32) {
    s.center.x = lerp(s.center.x, r.center.x, alpha);
    s.center.y = lerp(s.center.y, r.center.y, alpha);
    s.width = lerp(s.width, r.width, alpha);
    s.height = lerp(s.height, r.height, alpha);
    s.rotation = lerp_angle(s.rotation, r.rotation, alpha);
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::types::Point;

    fn anchor(x: f32, y: f32, w: f32, rotation: f32) -> Anchors {
        Anchors::single(AnchorTransform {
            center: Point::new(x, y),
            width: w,
            height: w * 0.5,
            rotation,
        })
    }

    fn first(a: &Anchors) -> AnchorTransform {
        a.as_slice()[0]
    }

    #[test]
    fn first_update_is_exact() {
        let mut smoother = TemporalSmoother::new(0.25);
        assert!(smoother.current().is_none());
        let raw = anchor(10.0, 20.0, 30.0, 0.3);
        assert_eq!(*smoother.update(&raw), raw);
        assert!(smoother.current().is_some());
    }

    #[test]
    fn steps_by_alpha() {
        let mut smoother = TemporalSmoother::new(0.5);
        smoother.update(&anchor(0.0, 0.0, 10.0, 0.0));
        let s = first(smoother.update(&anchor(10.0, 20.0, 30.0, 0.0)));
        assert_abs_diff_eq!(s.center.x, 5.0);
        assert_abs_diff_eq!(s.center.y, 10.0);
        assert_abs_diff_eq!(s.width, 20.0);
    }

    #[test]
    fn converges_without_overshoot() {
        let mut smoother = TemporalSmoother::new(DEFAULT_ALPHA);
        smoother.update(&anchor(0.0, 0.0, 50.0, 0.0));
        let targets = [(40.0, 10.0), (45.0, 12.0), (60.0, 30.0), (60.0, 30.0), (58.0, 29.0)];
        for _ in 0..5 {
            for &(x, y) in &targets {
                let raw = anchor(x, y, 80.0, 0.2);
                let before = first(smoother.current().unwrap());
                let after = first(smoother.update(&raw));
                assert!((after.center.x - x).abs() <= (before.center.x - x).abs() + 1e-5);
                assert!((after.center.y - y).abs() <= (before.center.y - y).abs() + 1e-5);
                assert!((after.width - 80.0).abs() <= (before.width - 80.0).abs() + 1e-5);
                assert!(
                    angle_delta(after.rotation, 0.2).abs()
                        <= angle_delta(before.rotation, 0.2).abs() + 1e-5
                );
            }
        }
    }

    #[test]
    fn rotation_takes_short_path_across_pi() {
        let mut smoother = TemporalSmoother::new(0.25);
        smoother.update(&anchor(0.0, 0.0, 10.0, 3.0));
        let short_arc = angle_delta(3.0, -3.0).abs();
        assert!(short_arc < 0.3);

        for _ in 0..40 {
            let r = first(smoother.update(&anchor(0.0, 0.0, 10.0, -3.0))).rotation;
            assert!(r > -PI && r <= PI);
            assert!(angle_delta(r, 3.0).abs() <= short_arc + 1e-4);
            assert!(angle_delta(r, -3.0).abs() <= short_arc + 1e-4);
        }
        let settled = first(smoother.current().unwrap()).rotation;
        assert_abs_diff_eq!(angle_delta(settled, -3.0), 0.0, epsilon = 1e-3);
    }

    #[test]
    fn reseeds_when_anchor_count_changes() {
        let mut smoother = TemporalSmoother::new(0.25);
        smoother.update(&anchor(0.0, 0.0, 10.0, 0.0));
        let pair = Anchors::pair(
            first(&anchor(100.0, 0.0, 10.0, 0.0)),
            first(&anchor(200.0, 0.0, 10.0, 0.0)),
        );
        assert_eq!(*smoother.update(&pair), pair);
    }

    #[test]
    fn degenerate_input_passes_through_and_unprimes() {
        let mut smoother = TemporalSmoother::new(0.25);
        smoother.update(&anchor(0.0, 0.0, 10.0, 0.0));
        let degenerate = Anchors::degenerate();
        assert!(!smoother.update(&degenerate).is_drawable());
        assert!(smoother.current().is_none());
        let raw = anchor(50.0, 50.0, 10.0, 0.0);
        assert_eq!(*smoother.update(&raw), raw);
    }

    #[test]
    fn wrap_angle_range() {
        assert_abs_diff_eq!(wrap_angle(PI), PI, epsilon = 1e-6);
        assert_abs_diff_eq!(wrap_angle(-PI), PI, epsilon = 1e-6);
        assert_abs_diff_eq!(wrap_angle(3.0 * PI / 2.0), -PI / 2.0, epsilon = 1e-5);
    }
}
