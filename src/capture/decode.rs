//! Camera buffer → RGBA `Frame` conversion for every pixel format the device
//! negotiation may settle on.

use std::time::Instant;

use anyhow::{Result, anyhow, ensure};
use nokhwa::{Buffer, utils::FrameFormat};
use rayon::prelude::*;
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPackedImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_rgba, yuyv422_to_rgba,
};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

use crate::types::Frame;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Packed {
    Rgb,
    Bgr,
    Gray,
}

impl Packed {
    fn bytes_per_pixel(self) -> usize {
        match self {
            Packed::Rgb | Packed::Bgr => 3,
            Packed::Gray => 1,
        }
    }
}

pub fn decode_camera_buffer(buffer: &Buffer) -> Result<Frame> {
    let resolution = buffer.resolution();
    let (mut width, mut height) = (resolution.width_x, resolution.height_y);
    let data = buffer.buffer();

    let rgba = match buffer.source_frame_format() {
        FrameFormat::NV12 => nv12(data, width, height)?,
        FrameFormat::YUYV => yuyv(data, width, height)?,
        FrameFormat::MJPEG => {
            let (rgba, w, h) = mjpeg(data)?;
            // The JPEG header is authoritative; drivers occasionally misreport.
            width = w;
            height = h;
            rgba
        }
        FrameFormat::RAWRGB => expand_packed(data, width, height, Packed::Rgb)?,
        FrameFormat::RAWBGR => expand_packed(data, width, height, Packed::Bgr)?,
        FrameFormat::GRAY => expand_packed(data, width, height, Packed::Gray)?,
    };

    Ok(Frame {
        rgba,
        width,
        height,
        timestamp: Instant::now(),
    })
}

fn pixel_count(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

fn nv12(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let y_len = pixel_count(width, height);
    let uv_len = y_len / 2;
    ensure!(
        data.len() >= y_len + uv_len,
        "NV12 buffer too small: got {}, expected {}",
        data.len(),
        y_len + uv_len
    );

    let image = YuvBiPlanarImage {
        y_plane: &data[..y_len],
        y_stride: width,
        uv_plane: &data[y_len..y_len + uv_len],
        uv_stride: width,
        width,
        height,
    };
    let mut rgba = vec![0u8; y_len * 4];
    yuv_nv12_to_rgba(
        &image,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
        YuvConversionMode::Balanced,
    )
    .map_err(|err| anyhow!("NV12 conversion failed: {err:?}"))?;
    Ok(rgba)
}

fn yuyv(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let expected = pixel_count(width, height) * 2;
    ensure!(
        data.len() >= expected,
        "YUYV buffer too small: got {}, expected {expected}",
        data.len()
    );

    let packed = YuvPackedImage {
        yuy: data,
        yuy_stride: width * 2,
        width,
        height,
    };
    let mut rgba = vec![0u8; pixel_count(width, height) * 4];
    yuyv422_to_rgba(
        &packed,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
    )
    .map_err(|err| anyhow!("YUYV conversion failed: {err:?}"))?;
    Ok(rgba)
}

fn mjpeg(data: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgba = decoder
        .decode()
        .map_err(|err| anyhow!("MJPEG decode failed: {err:?}"))?;
    let info = decoder
        .info()
        .ok_or_else(|| anyhow!("MJPEG decoder returned no header info"))?;
    let (width, height) = (u32::from(info.width), u32::from(info.height));
    ensure!(
        rgba.len() >= pixel_count(width, height) * 4,
        "MJPEG decode produced {} bytes for {width}x{height}",
        rgba.len()
    );
    Ok((rgba, width, height))
}

fn expand_packed(data: &[u8], width: u32, height: u32, layout: Packed) -> Result<Vec<u8>> {
    let bpp = layout.bytes_per_pixel();
    let expected = pixel_count(width, height) * bpp;
    ensure!(
        data.len() >= expected,
        "{layout:?} buffer too small: got {}, expected {expected}",
        data.len()
    );

    let mut rgba = vec![0u8; pixel_count(width, height) * 4];
    rgba.par_chunks_mut(4)
        .zip(data[..expected].par_chunks_exact(bpp))
        .for_each(|(dst, src)| {
            let [r, g, b] = match layout {
                Packed::Rgb => [src[0], src[1], src[2]],
                Packed::Bgr => [src[2], src[1], src[0]],
                Packed::Gray => [src[0]; 3],
            };
            dst.copy_from_slice(&[r, g, b, 255]);
        });
    Ok(rgba)
}
