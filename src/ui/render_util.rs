use super::{Arc, ImageBuffer, ImageFrame, RenderImage, Rgba};
use image::RgbaImage;

pub(super) fn surface_to_image(surface: &RgbaImage) -> Option<Arc<RenderImage>> {
    let (width, height) = surface.dimensions();
    let mut bgra = surface.as_raw().clone();

    // GPUI expects BGRA; converting here avoids the async asset pipeline and flicker.
    for px in bgra.chunks_exact_mut(4) {
        px.swap(0, 2);
    }

    let buffer = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(width, height, bgra)?;
    Some(Arc::new(RenderImage::new(vec![ImageFrame::new(buffer)])))
}
