use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::Sender;

use super::{CameraProvider, CameraStream};
use crate::{error::CaptureError, types::Frame};

const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Synthetic camera producing a moving gradient. Tracks how many of its streams
/// are alive so device-hold behavior can be checked without hardware.
#[derive(Debug, Clone)]
pub struct TestPatternCamera {
    width: u32,
    height: u32,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl TestPatternCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn active_streams(&self) -> Arc<AtomicUsize> {
        self.active.clone()
    }

    /// Highest number of simultaneously running streams observed so far.
    pub fn peak_streams(&self) -> Arc<AtomicUsize> {
        self.peak.clone()
    }
}

impl CameraProvider for TestPatternCamera {
    fn start_stream(&mut self, frame_tx: Sender<Frame>) -> Result<CameraStream, CaptureError> {
        let (width, height) = (self.width, self.height);
        if width == 0 || height == 0 {
            return Err(CaptureError::DeviceUnavailable(
                "test pattern has no size".to_string(),
            ));
        }

        let active = self.active.clone();
        let peak = self.peak.clone();
        Ok(CameraStream::spawn(move |stop| {
            let now_active = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now_active, Ordering::SeqCst);

            let mut tick: u32 = 0;
            while !stop.load(Ordering::Relaxed) {
                let frame = render_pattern(width, height, tick);
                let _ = frame_tx.try_send(frame);
                tick = tick.wrapping_add(1);
                thread::sleep(FRAME_INTERVAL);
            }

            active.fetch_sub(1, Ordering::SeqCst);
        }))
    }
}

fn render_pattern(width: u32, height: u32, tick: u32) -> Frame {
    let mut rgba = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        for x in 0..width {
            let r = (x.wrapping_add(tick) % width * 255 / width) as u8;
            let g = (y * 255 / height) as u8;
            rgba.extend_from_slice(&[r, g, 128, 255]);
        }
    }
    Frame {
        rgba,
        width,
        height,
        timestamp: Instant::now(),
    }
}
