//! Per-tick drawing of background and overlay into the render surface.

mod draw;
mod viewport;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use image::{Rgba, RgbaImage};

pub use self::draw::{Blitter, draw_sprite, fill};
pub use self::viewport::Viewport;

use crate::{
    anchor::{self, Anchors, FitConfig},
    assets::OverlaySprite,
    config::SurfaceConfig,
    smoothing::TemporalSmoother,
    types::{DetectionState, FrameSize, ProductType, VisualFrame},
};

/// Everything a tick reads. Handles are borrowed fresh every tick, so swapping
/// the background or sprite between ticks is always safe.
#[derive(Clone, Copy)]
pub struct TickInput<'a> {
    pub background: Option<&'a VisualFrame>,
    pub detection: &'a DetectionState,
    pub sprite: Option<&'a OverlaySprite>,
    pub product: ProductType,
    pub fit: &'a FitConfig,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub background_drawn: bool,
    pub overlay_drawn: bool,
}

pub struct Compositor {
    surface: RgbaImage,
    placeholder: Rgba<u8>,
    smoother: TemporalSmoother,
    blitter: Blitter,
    anchors: Anchors,
    rendered: bool,
}

impl Compositor {
    pub fn new(surface: &SurfaceConfig, smoother: TemporalSmoother) -> Self {
        let width = surface.width.max(1);
        let height = surface.height.max(1);
        let placeholder = Rgba(surface.placeholder);
        Self {
            surface: RgbaImage::from_pixel(width, height, placeholder),
            placeholder,
            smoother,
            blitter: Blitter::new(),
            anchors: Anchors::default(),
            rendered: false,
        }
    }

    pub fn surface(&self) -> &RgbaImage {
        &self.surface
    }

    pub fn surface_size(&self) -> FrameSize {
        FrameSize::new(self.surface.width(), self.surface.height())
    }

    /// `true` once at least one tick completed.
    pub fn has_rendered(&self) -> bool {
        self.rendered
    }

    /// Smoothed anchors of the last tick, in surface pixels.
    pub fn anchors(&self) -> &Anchors {
        &self.anchors
    }

    pub fn set_smoothing_alpha(&mut self, alpha: f32) {
        self.smoother.set_alpha(alpha);
    }

    /// Drops smoothing history so the next anchor is taken as-is.
    pub fn reset_smoothing(&mut self) {
        self.smoother.reset();
    }

    /// Clears and fully redraws the surface.
    pub fn tick(&mut self, input: TickInput<'_>) -> TickReport {
        let mut report = TickReport::default();
        let surface_size = self.surface_size();

        fill(&mut self.surface, self.placeholder);

        let background = input
            .background
            .filter(|frame| frame.frame().is_usable());
        let viewport = match background {
            Some(frame) => {
                let vp = Viewport::for_frame(frame, surface_size);
                match self.blitter.blit(&mut self.surface, frame.frame(), &vp) {
                    Ok(()) => report.background_drawn = true,
                    Err(err) => log::warn!("failed to draw background: {err:?}"),
                }
                vp
            }
            None => Viewport::identity(surface_size),
        };

        // Without a background the product is previewed on the placeholder.
        let frame_size = background.map_or(surface_size, |frame| frame.size());
        let raw = anchor::solve(
            input.detection,
            input.product,
            frame_size,
            input.sprite.map(OverlaySprite::aspect),
            input.fit,
        );
        self.anchors = *self.smoother.update(&viewport.map_anchors(&raw));

        if let Some(sprite) = input.sprite {
            if self.anchors.is_drawable() {
                for a in self.anchors.iter() {
                    draw_sprite(&mut self.surface, &sprite.bitmap, a);
                }
                report.overlay_drawn = true;
            }
        }

        self.rendered = true;
        report
    }
}

/// Cancellation handle for the render loop. Clones share the flag.
#[derive(Clone, Debug)]
pub struct FrameLoop {
    running: Arc<AtomicBool>,
}

impl FrameLoop {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stops scheduling further ticks. Returns whether this call stopped it;
    /// later calls are no-ops.
    pub fn stop(&self) -> bool {
        self.running.swap(false, Ordering::AcqRel)
    }
}

impl Default for FrameLoop {
    fn default() -> Self {
        Self::new()
    }
}
