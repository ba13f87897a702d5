use anyhow::{Context, Result};
use fast_image_resize as fir;
use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use super::viewport::Viewport;
use crate::{
    anchor::AnchorTransform,
    types::{Frame, FrameSize},
};

pub fn fill(surface: &mut RgbaImage, color: Rgba<u8>) {
    surface
        .par_chunks_exact_mut(4)
        .for_each(|px| px.copy_from_slice(&color.0));
}

/// Scales frames into the surface. Keeps its resizer and scratch buffer across
/// ticks.
#[derive(Default)]
pub struct Blitter {
    resizer: fir::Resizer,
    scratch: Option<fir::images::Image<'static>>,
}

impl Blitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blit(&mut self, surface: &mut RgbaImage, frame: &Frame, vp: &Viewport) -> Result<()> {
        let (sw, sh) = surface.dimensions();
        let src = fir::images::ImageRef::new(
            frame.width,
            frame.height,
            &frame.rgba,
            fir::PixelType::U8x4,
        )?;
        let options = fir::ResizeOptions::new()
            .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));

        if vp.covers(FrameSize::new(sw, sh)) {
            let mut dst =
                fir::images::Image::from_slice_u8(sw, sh, &mut **surface, fir::PixelType::U8x4)?;
            self.resizer
                .resize(&src, &mut dst, Some(&options))
                .context("background resize failed")?;
            return Ok(());
        }

        let scratch = match self.scratch.take() {
            Some(img) if img.width() == vp.width && img.height() == vp.height => img,
            _ => fir::images::Image::new(vp.width, vp.height, fir::PixelType::U8x4),
        };
        let scratch = self.scratch.insert(scratch);
        self.resizer
            .resize(&src, scratch, Some(&options))
            .context("background resize failed")?;

        let src_stride = vp.width as usize * 4;
        let dst_stride = sw as usize * 4;
        let x_offset = vp.x as usize * 4;
        let rows = scratch.buffer();
        let visible_rows = (vp.height as usize).min(sh.saturating_sub(vp.y) as usize);
        let copy_len = src_stride.min(dst_stride.saturating_sub(x_offset));
        surface
            .par_chunks_exact_mut(dst_stride)
            .skip(vp.y as usize)
            .take(visible_rows)
            .enumerate()
            .for_each(|(row, dst)| {
                let src = &rows[row * src_stride..row * src_stride + copy_len];
                dst[x_offset..x_offset + copy_len].copy_from_slice(src);
            });
        Ok(())
    }
}

/// Draws `sprite` centered on `anchor`, rotated by its angle and scaled to its
/// size, blending over the existing surface contents.
pub fn draw_sprite(surface: &mut RgbaImage, sprite: &RgbaImage, anchor: &AnchorTransform) {
    if !anchor.is_drawable() || sprite.width() == 0 || sprite.height() == 0 {
        return;
    }
    let (sw, sh) = surface.dimensions();
    let (sin, cos) = anchor.rotation.sin_cos();
    let half_w = anchor.width * 0.5;
    let half_h = anchor.height * 0.5;

    // Axis-aligned bounds of the rotated rectangle, clipped to the surface.
    let ext_x = half_w * cos.abs() + half_h * sin.abs();
    let ext_y = half_w * sin.abs() + half_h * cos.abs();
    let x0 = (anchor.center.x - ext_x).floor().max(0.0) as u32;
    let y0 = (anchor.center.y - ext_y).floor().max(0.0) as u32;
    let x1 = ((anchor.center.x + ext_x).ceil().max(0.0) as u32).min(sw);
    let y1 = ((anchor.center.y + ext_y).ceil().max(0.0) as u32).min(sh);
    if x0 >= x1 || y0 >= y1 {
        return;
    }

    let spr_w = sprite.width() as f32;
    let spr_h = sprite.height() as f32;
    let stride = sw as usize * 4;
    surface
        .par_chunks_exact_mut(stride)
        .enumerate()
        .skip(y0 as usize)
        .take((y1 - y0) as usize)
        .for_each(|(y, row)| {
            let dy = y as f32 + 0.5 - anchor.center.y;
            for x in x0..x1 {
                let dx = x as f32 + 0.5 - anchor.center.x;
                // Inverse rotation into the sprite's local frame.
                let u = dx * cos + dy * sin;
                let v = -dx * sin + dy * cos;
                if u.abs() > half_w || v.abs() > half_h {
                    continue;
                }
                let su = (u / anchor.width + 0.5) * spr_w - 0.5;
                let sv = (v / anchor.height + 0.5) * spr_h - 0.5;
                let src = sample_rgba(sprite, su, sv);
                let idx = x as usize * 4;
                blend_over(&mut row[idx..idx + 4], src);
            }
        });
}

/// Bilinear sample with edge clamping, interpolated in premultiplied space.
fn sample_rgba(image: &RgbaImage, x: f32, y: f32) -> [f32; 4] {
    let max_x = image.width() as i64 - 1;
    let max_y = image.height() as i64 - 1;
    let x0f = x.floor();
    let y0f = y.floor();
    let fx = x - x0f;
    let fy = y - y0f;
    let (x0, y0) = (x0f as i64, y0f as i64);

    let fetch = |px: i64, py: i64| -> [f32; 4] {
        let p = image.get_pixel(px.clamp(0, max_x) as u32, py.clamp(0, max_y) as u32).0;
        let a = p[3] as f32 / 255.0;
        [p[0] as f32 * a, p[1] as f32 * a, p[2] as f32 * a, a]
    };
    let c00 = fetch(x0, y0);
    let c10 = fetch(x0 + 1, y0);
    let c01 = fetch(x0, y0 + 1);
    let c11 = fetch(x0 + 1, y0 + 1);

    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    std::array::from_fn(|c| lerp(lerp(c00[c], c10[c], fx), lerp(c01[c], c11[c], fx), fy))
}

/// Source-over with a premultiplied source.
fn blend_over(dst: &mut [u8], src: [f32; 4]) {
    let a = src[3];
    if a <= 0.0 {
        return;
    }
    let inv = 1.0 - a;
    for c in 0..3 {
        dst[c] = (src[c] + dst[c] as f32 * inv).round().clamp(0.0, 255.0) as u8;
    }
    let da = dst[3] as f32 / 255.0;
    dst[3] = ((a + da * inv) * 255.0).round().clamp(0.0, 255.0) as u8;
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use super::*;
    use crate::types::Point;

    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

    fn anchor(x: f32, y: f32, w: f32, h: f32, rotation: f32) -> AnchorTransform {
        AnchorTransform {
            center: Point::new(x, y),
            width: w,
            height: h,
            rotation,
        }
    }

    /// Resampling a flat color may be off by one in fixed-point math.
    fn close(actual: [u8; 4], expected: [u8; 4]) -> bool {
        actual.iter().zip(expected).all(|(a, e)| a.abs_diff(e) <= 1)
    }

    fn solid_frame(width: u32, height: u32, rgb: [u8; 3]) -> Frame {
        Frame::from_rgba_image(RgbaImage::from_pixel(
            width,
            height,
            Rgba([rgb[0], rgb[1], rgb[2], 255]),
        ))
    }

    #[test]
    fn sprite_covers_its_anchor_only() {
        let mut surface = RgbaImage::from_pixel(100, 100, BLACK);
        let sprite = RgbaImage::from_pixel(8, 4, Rgba([0, 0, 255, 255]));
        draw_sprite(&mut surface, &sprite, &anchor(50.0, 50.0, 40.0, 20.0, 0.0));

        assert_eq!(surface.get_pixel(50, 50).0, [0, 0, 255, 255]);
        assert_eq!(surface.get_pixel(32, 50).0, [0, 0, 255, 255]);
        assert_eq!(surface.get_pixel(50, 65).0, BLACK.0);
        assert_eq!(surface.get_pixel(75, 50).0, BLACK.0);
    }

    #[test]
    fn rotation_turns_the_sprite() {
        let mut surface = RgbaImage::from_pixel(100, 100, BLACK);
        let sprite = RgbaImage::from_pixel(8, 1, Rgba([255, 255, 255, 255]));
        draw_sprite(&mut surface, &sprite, &anchor(50.0, 50.0, 60.0, 6.0, FRAC_PI_2));

        assert_eq!(surface.get_pixel(50, 75).0, [255, 255, 255, 255]);
        assert_eq!(surface.get_pixel(75, 50).0, BLACK.0);
    }

    #[test]
    fn translucent_sprite_blends() {
        let mut surface = RgbaImage::from_pixel(20, 20, BLACK);
        let sprite = RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 128]));
        draw_sprite(&mut surface, &sprite, &anchor(10.0, 10.0, 10.0, 10.0, 0.0));
        let px = surface.get_pixel(10, 10).0;
        assert!((127..=129).contains(&px[0]), "red was {}", px[0]);
        assert_eq!(px[1], 0);
        assert_eq!(px[3], 255);
    }

    #[test]
    fn degenerate_anchor_draws_nothing() {
        let mut surface = RgbaImage::from_pixel(20, 20, BLACK);
        let sprite = RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 255]));
        draw_sprite(&mut surface, &sprite, &anchor(10.0, 10.0, 0.0, 10.0, 0.0));
        draw_sprite(&mut surface, &sprite, &anchor(-500.0, 10.0, 10.0, 10.0, 0.0));
        assert!(surface.pixels().all(|p| *p == BLACK));
    }

    #[test]
    fn letterboxed_blit_leaves_borders() {
        let surface_size = FrameSize::new(64, 48);
        let mut surface = RgbaImage::from_pixel(64, 48, BLACK);
        let frame = solid_frame(16, 24, [0, 200, 0]);
        let vp = Viewport::fit(frame.size(), surface_size);
        assert_eq!((vp.x, vp.width), (16, 32));

        let mut blitter = Blitter::new();
        blitter.blit(&mut surface, &frame, &vp).unwrap();
        assert_eq!(surface.get_pixel(2, 24).0, BLACK.0);
        assert!(close(surface.get_pixel(32, 24).0, [0, 200, 0, 255]));
        assert_eq!(surface.get_pixel(61, 24).0, BLACK.0);

        // Reusing the blitter with a different frame size re-sizes the scratch.
        let wide = solid_frame(40, 10, [9, 9, 9]);
        let vp = Viewport::fit(wide.size(), surface_size);
        blitter.blit(&mut surface, &wide, &vp).unwrap();
        assert!(close(surface.get_pixel(32, 24).0, [9, 9, 9, 255]));
    }

    #[test]
    fn stretched_blit_fills_surface() {
        let mut surface = RgbaImage::from_pixel(32, 24, BLACK);
        let frame = solid_frame(8, 8, [200, 10, 10]);
        let vp = Viewport::stretch(frame.size(), FrameSize::new(32, 24));
        Blitter::new().blit(&mut surface, &frame, &vp).unwrap();
        assert!(surface.pixels().all(|p| close(p.0, [200, 10, 10, 255])));
    }
}
