use std::{sync::atomic::Ordering, time::Instant};

use anyhow::{Result, anyhow};
use crossbeam_channel::Sender;
use nokhwa::{
    Camera,
    pixel_format::RgbFormat,
    query,
    utils::{
        ApiBackend, CameraIndex, CameraInfo, FrameFormat, RequestedFormat, RequestedFormatType,
    },
};

use super::{CameraProvider, CameraStream, decode};
use crate::{error::CaptureError, types::Frame};

// Prefer formats that macOS built-in cameras accept; some reject YUYV even though
// it is reported as supported.
const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
    FrameFormat::RAWRGB,
    FrameFormat::RAWBGR,
    FrameFormat::GRAY,
    FrameFormat::YUYV,
    FrameFormat::NV12,
    FrameFormat::MJPEG,
];

const PERMISSION_HINTS: &[&str] = &["permission", "denied", "not authorized", "unauthorized"];

fn requested_formats() -> [RequestedFormat<'static>; 3] {
    [
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestFrameRate,
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestResolution,
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ]
}

#[derive(Clone, Debug)]
pub struct CameraDevice {
    pub index: CameraIndex,
    pub label: String,
}

pub fn available_cameras() -> Result<Vec<CameraDevice>> {
    let cameras = query(ApiBackend::Auto)?;
    Ok(cameras
        .into_iter()
        .map(|info: CameraInfo| CameraDevice {
            index: info.index().clone(),
            label: info.human_name(),
        })
        .collect())
}

fn open_camera(index: &CameraIndex) -> Result<Camera> {
    let mut last_err = None;

    for requested in requested_formats() {
        match Camera::new(index.clone(), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => return Ok(camera),
                Err(err) => last_err = Some(err.into()),
            },
            Err(err) => last_err = Some(err.into()),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("no supported capture format")))
}

fn classify_open_error(err: &anyhow::Error) -> CaptureError {
    let text = format!("{err:#}");
    let lowered = text.to_lowercase();
    if PERMISSION_HINTS.iter().any(|hint| lowered.contains(hint)) {
        CaptureError::PermissionDenied
    } else {
        CaptureError::DeviceUnavailable(text)
    }
}

/// Webcam provider backed by nokhwa.
#[derive(Clone, Debug)]
pub struct NokhwaCamera {
    index: CameraIndex,
}

impl NokhwaCamera {
    pub fn new(index: CameraIndex) -> Self {
        Self { index }
    }

    /// Camera by position in the system's device list.
    pub fn with_index(index: u32) -> Self {
        Self::new(CameraIndex::Index(index))
    }
}

impl CameraProvider for NokhwaCamera {
    fn start_stream(&mut self, frame_tx: Sender<Frame>) -> Result<CameraStream, CaptureError> {
        // Probe on the caller's thread so permission and device errors surface
        // from `start`; the probe handle is released before the capture thread
        // opens its own.
        drop(open_camera(&self.index).map_err(|err| classify_open_error(&err))?);

        let index = self.index.clone();
        Ok(CameraStream::spawn(move |stop| {
            let mut camera = match open_camera(&index) {
                Ok(cam) => cam,
                Err(err) => {
                    log::error!("failed to open camera: {err:?}");
                    return;
                }
            };

            while !stop.load(Ordering::Relaxed) {
                let started = Instant::now();
                let buffer = match camera.frame() {
                    Ok(buffer) => buffer,
                    Err(err) => {
                        log::warn!(
                            "camera frame read failed (after {:?}): {err:?}",
                            started.elapsed()
                        );
                        continue;
                    }
                };

                match decode::decode_camera_buffer(&buffer) {
                    // Drop the frame when the UI has not consumed the previous ones.
                    Ok(frame) => {
                        let _ = frame_tx.try_send(frame);
                    }
                    Err(err) => log::warn!("failed to decode camera frame: {err:?}"),
                }
            }

            if let Err(err) = camera.stop_stream() {
                log::debug!("camera stop_stream failed: {err:?}");
            }
        }))
    }
}
