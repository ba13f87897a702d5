use std::cmp::Ordering;

use anyhow::{Context, Result, anyhow, ensure};
use fast_image_resize as fir;
use ndarray::Array4;
use rayon::prelude::*;

use crate::types::{Frame, NUM_LANDMARKS, Point};

#[derive(Clone, Debug)]
pub struct LetterboxInfo {
    pub input_size: u32,
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub orig_w: u32,
    pub orig_h: u32,
}

impl LetterboxInfo {
    /// Maps a point in the letterboxed input back to frame pixels.
    pub fn unproject(&self, x: f32, y: f32) -> (f32, f32) {
        let fx = (x - self.pad_x) / self.scale;
        let fy = (y - self.pad_y) / self.scale;
        (
            fx.clamp(0.0, self.orig_w.saturating_sub(1) as f32),
            fy.clamp(0.0, self.orig_h.saturating_sub(1) as f32),
        )
    }
}

/// Axis-aligned square crop of the frame fed to the landmark regressor.
#[derive(Clone, Debug)]
pub struct CropTransform {
    pub center: (f32, f32),
    pub side: f32,
    pub output_size: u32,
}

impl CropTransform {
    /// Maps crop-input pixels back to frame pixels. Points may fall outside the
    /// frame when the face is partly out of view; they are left unclamped so the
    /// face geometry stays intact.
    pub fn project(&self, x: f32, y: f32) -> Point {
        let half = self.output_size as f32 / 2.0;
        let scale = self.side / self.output_size as f32;
        Point::new(
            self.center.0 + (x - half) * scale,
            self.center.1 + (y - half) * scale,
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FaceBox {
    /// `[x1, y1, x2, y2]` in frame pixels.
    pub bbox: [f32; 4],
    pub score: f32,
}

/// Per-channel normalization applied when building an input tensor.
#[derive(Clone, Copy, Debug)]
pub struct Normalize {
    pub mean: f32,
    pub std: f32,
}

impl Normalize {
    /// `(v - 127) / 128`, the usual convention for lightweight face detectors.
    pub const CENTERED: Normalize = Normalize {
        mean: 127.0,
        std: 128.0,
    };
    /// `v / 255`.
    pub const UNIT: Normalize = Normalize {
        mean: 0.0,
        std: 255.0,
    };

    fn apply(&self, v: f32) -> f32 {
        (v - self.mean) / self.std
    }
}

fn check_frame(frame: &Frame) -> Result<()> {
    let expected_len = (frame.width as usize)
        .saturating_mul(frame.height as usize)
        .saturating_mul(4);
    ensure!(
        frame.rgba.len() == expected_len && expected_len > 0,
        "frame buffer size mismatch: got {}, expected {}",
        frame.rgba.len(),
        expected_len
    );
    Ok(())
}

/// Resizes the frame into a `target_size` square keeping aspect (black padding)
/// and returns an NCHW tensor.
pub fn prepare_frame_with_size(
    frame: &Frame,
    target_size: u32,
    norm: Normalize,
) -> Result<(Array4<f32>, LetterboxInfo)> {
    check_frame(frame)?;
    ensure!(target_size > 0, "detector input size must be positive");

    let scale = target_size as f32 / (frame.width.max(frame.height) as f32);
    let new_w = ((frame.width as f32 * scale).round() as u32).clamp(1, target_size);
    let new_h = ((frame.height as f32 * scale).round() as u32).clamp(1, target_size);

    let src_image = fir::images::ImageRef::new(
        frame.width,
        frame.height,
        &frame.rgba,
        fir::PixelType::U8x4,
    )?;
    let mut dst_image = fir::images::Image::new(new_w, new_h, fir::PixelType::U8x4);
    let mut resizer = fir::Resizer::new();
    let resize_options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    resizer
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("fast resize failed")?;
    let resized = dst_image.into_vec();

    let size = target_size as usize;
    let pad_x = (size - new_w as usize) / 2;
    let pad_y = (size - new_h as usize) / 2;
    let plane = size * size;
    let background = norm.apply(0.0);
    let mut data = vec![background; plane * 3];

    let (r_plane, rest) = data.split_at_mut(plane);
    let (g_plane, b_plane) = rest.split_at_mut(plane);
    let src_stride = new_w as usize * 4;
    r_plane
        .par_chunks_mut(size)
        .zip(g_plane.par_chunks_mut(size))
        .zip(b_plane.par_chunks_mut(size))
        .enumerate()
        .for_each(|(row, ((r, g), b))| {
            let Some(src_row) = row.checked_sub(pad_y).filter(|&y| y < new_h as usize) else {
                return;
            };
            let src = &resized[src_row * src_stride..(src_row + 1) * src_stride];
            for (x, px) in src.chunks_exact(4).enumerate() {
                r[pad_x + x] = norm.apply(px[0] as f32);
                g[pad_x + x] = norm.apply(px[1] as f32);
                b[pad_x + x] = norm.apply(px[2] as f32);
            }
        });

    let input = Array4::<f32>::from_shape_vec((1, 3, size, size), data)
        .map_err(|err| anyhow!("failed to build input tensor: {err}"))?;

    let letterbox = LetterboxInfo {
        input_size: target_size,
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
        orig_w: frame.width,
        orig_h: frame.height,
    };

    Ok((input, letterbox))
}

/// Decodes detector outputs (`scores [.., N, 2]`, `boxes [.., N, 4]` in
/// normalized corner form relative to the letterboxed input) into face boxes in
/// frame pixels, best first.
pub fn decode_detections(
    scores: &[f32],
    boxes: &[f32],
    letterbox: &LetterboxInfo,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<FaceBox>> {
    ensure!(
        scores.len() % 2 == 0 && boxes.len() % 4 == 0,
        "unexpected detector output lengths: scores {}, boxes {}",
        scores.len(),
        boxes.len()
    );
    let count = scores.len() / 2;
    ensure!(
        boxes.len() / 4 == count,
        "detector output mismatch: {count} scores, {} boxes",
        boxes.len() / 4
    );

    let input = letterbox.input_size as f32;
    let mut candidates = Vec::new();
    for (score_pair, b) in scores.chunks_exact(2).zip(boxes.chunks_exact(4)) {
        let score = score_pair[1];
        if score.is_nan() || score < score_threshold {
            continue;
        }
        let (x1, y1) = letterbox.unproject(b[0] * input, b[1] * input);
        let (x2, y2) = letterbox.unproject(b[2] * input, b[3] * input);
        if x2 <= x1 || y2 <= y1 {
            continue;
        }
        candidates.push(FaceBox {
            bbox: [x1, y1, x2, y2],
            score,
        });
    }

    let kept = nms(&candidates, nms_threshold);
    Ok(kept.into_iter().map(|idx| candidates[idx]).collect())
}

pub fn nms(candidates: &[FaceBox], threshold: f32) -> Vec<usize> {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|a, b| {
        candidates[*b]
            .score
            .partial_cmp(&candidates[*a].score)
            .unwrap_or(Ordering::Equal)
    });

    let mut keep: Vec<usize> = Vec::new();
    'outer: for &idx in &order {
        for &k in &keep {
            if iou(&candidates[idx].bbox, &candidates[k].bbox) >= threshold {
                continue 'outer;
            }
        }
        keep.push(idx);
    }
    keep
}

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if inter <= 0.0 {
        return 0.0;
    }

    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

/// Square crop around a face box, grown by `margin` (0.2 = 20% larger).
pub fn crop_from_box(face: &FaceBox, margin: f32) -> ((f32, f32), f32) {
    let [x1, y1, x2, y2] = face.bbox;
    let center = ((x1 + x2) * 0.5, (y1 + y2) * 0.5);
    let side = (x2 - x1).max(y2 - y1) * (1.0 + margin.max(0.0));
    (center, side.max(1.0))
}

pub fn prepare_crop(
    frame: &Frame,
    center: (f32, f32),
    side: f32,
    output_size: u32,
    norm: Normalize,
) -> Result<(Array4<f32>, CropTransform)> {
    check_frame(frame)?;
    ensure!(output_size > 0, "landmark input size must be positive");

    let size = output_size as usize;
    let plane = size * size;
    let transform = CropTransform {
        center,
        side,
        output_size,
    };
    let mut data = vec![0.0_f32; plane * 3];
    let (r_plane, rest) = data.split_at_mut(plane);
    let (g_plane, b_plane) = rest.split_at_mut(plane);

    let half = output_size as f32 / 2.0;
    let scale = side / output_size as f32;
    r_plane
        .par_chunks_mut(size)
        .zip(g_plane.par_chunks_mut(size))
        .zip(b_plane.par_chunks_mut(size))
        .enumerate()
        .for_each(|(y, ((r, g), b))| {
            let src_y = center.1 + (y as f32 + 0.5 - half) * scale;
            for x in 0..size {
                let src_x = center.0 + (x as f32 + 0.5 - half) * scale;
                let [sr, sg, sb] = sample_rgb(frame, src_x, src_y);
                r[x] = norm.apply(sr);
                g[x] = norm.apply(sg);
                b[x] = norm.apply(sb);
            }
        });

    let array = Array4::<f32>::from_shape_vec((1, 3, size, size), data)
        .map_err(|err| anyhow!("failed to build crop tensor: {err}"))?;
    Ok((array, transform))
}

/// Decodes `2 * NUM_LANDMARKS` coordinates normalized to the crop into frame
/// points.
pub fn decode_landmarks(flat: &[f32], transform: &CropTransform) -> Result<Vec<Point>> {
    ensure!(
        flat.len() >= NUM_LANDMARKS * 2,
        "unexpected landmarks length: got {}, need {}",
        flat.len(),
        NUM_LANDMARKS * 2
    );

    let size = transform.output_size as f32;
    let points: Vec<Point> = flat
        .chunks_exact(2)
        .take(NUM_LANDMARKS)
        .map(|xy| transform.project(xy[0] * size, xy[1] * size))
        .collect();
    ensure!(
        points.iter().all(Point::is_finite),
        "landmark regressor produced non-finite coordinates"
    );
    Ok(points)
}

/// Bilinear sample in 0..=255 per channel; outside the frame reads as black.
fn sample_rgb(frame: &Frame, x: f32, y: f32) -> [f32; 3] {
    if x.is_nan() || y.is_nan() {
        return [0.0, 0.0, 0.0];
    }
    // Pixel centers sit at +0.5.
    let x = x - 0.5;
    let y = y - 0.5;
    let x0 = x.floor();
    let y0 = y.floor();

    let (w, h) = (frame.width as i32, frame.height as i32);
    let fetch = |cx: f32, cy: f32| -> [f32; 3] {
        let ix = cx as i32;
        let iy = cy as i32;
        if ix < 0 || iy < 0 || ix >= w || iy >= h {
            return [0.0, 0.0, 0.0];
        }
        let idx = (iy as usize * frame.width as usize + ix as usize) * 4;
        [
            frame.rgba[idx] as f32,
            frame.rgba[idx + 1] as f32,
            frame.rgba[idx + 2] as f32,
        ]
    };

    let fx = x - x0;
    let fy = y - y0;
    let c00 = fetch(x0, y0);
    let c10 = fetch(x0 + 1.0, y0);
    let c01 = fetch(x0, y0 + 1.0);
    let c11 = fetch(x0 + 1.0, y0 + 1.0);

    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    std::array::from_fn(|c| lerp(lerp(c00[c], c10[c], fx), lerp(c01[c], c11[c], fx), fy))
}
