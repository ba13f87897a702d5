//! Owns the camera lifecycle and the optional still photo, and exposes whichever
//! of them should currently be shown.

#[cfg(feature = "camera-nokhwa")]
mod decode;
#[cfg(feature = "camera-nokhwa")]
mod device;
mod test_pattern;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded};

#[cfg(feature = "camera-nokhwa")]
pub use device::{CameraDevice, NokhwaCamera, available_cameras};
pub use test_pattern::TestPatternCamera;

use crate::{
    error::CaptureError,
    types::{Frame, VisualFrame},
};

// A couple of frames of slack; the capture thread drops frames when the UI lags.
const FRAME_QUEUE_DEPTH: usize = 2;

/// Something that can open a camera and push frames from a background thread.
pub trait CameraProvider: Send {
    fn start_stream(&mut self, frame_tx: Sender<Frame>) -> Result<CameraStream, CaptureError>;
}

/// Handle to a running capture thread. Stopping (or dropping) it joins the
/// thread, which releases the device.
#[derive(Debug)]
pub struct CameraStream {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CameraStream {
    /// Spawns `run` on a capture thread. `run` must return once the flag it is
    /// given becomes `true`.
    pub fn spawn<F>(run: F) -> Self
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = thread::spawn(move || run(stop_flag));
        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Provider used when no camera backend is compiled in.
#[derive(Debug, Default)]
pub struct NoCamera;

impl CameraProvider for NoCamera {
    fn start_stream(&mut self, _frame_tx: Sender<Frame>) -> Result<CameraStream, CaptureError> {
        Err(CaptureError::DeviceUnavailable(
            "camera support not compiled in".to_string(),
        ))
    }
}

/// The system camera at `index` when a backend is compiled in.
#[cfg(feature = "camera-nokhwa")]
pub fn default_provider(index: u32) -> Box<dyn CameraProvider> {
    Box::new(NokhwaCamera::with_index(index))
}

#[cfg(not(feature = "camera-nokhwa"))]
pub fn default_provider(_index: u32) -> Box<dyn CameraProvider> {
    Box::new(NoCamera)
}

struct ActiveCamera {
    stream: CameraStream,
    frame_rx: Receiver<Frame>,
}

pub struct CaptureSource {
    provider: Box<dyn CameraProvider>,
    camera: Option<ActiveCamera>,
    live: Option<Arc<Frame>>,
    still: Option<Arc<Frame>>,
}

impl CaptureSource {
    pub fn new(provider: Box<dyn CameraProvider>) -> Self {
        Self {
            provider,
            camera: None,
            live: None,
            still: None,
        }
    }

    /// Acquires the camera. Any previous stream is stopped first so at most one
    /// device hold exists at a time. On failure the still photo (if any) stays
    /// available as background.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        self.stop();

        let (frame_tx, frame_rx) = bounded(FRAME_QUEUE_DEPTH);
        match self.provider.start_stream(frame_tx) {
            Ok(stream) => {
                log::info!("camera stream started");
                self.camera = Some(ActiveCamera { stream, frame_rx });
                Ok(())
            }
            Err(err) => {
                log::warn!("camera start failed: {err}");
                Err(err)
            }
        }
    }

    /// Releases the camera. Harmless when no stream is running.
    pub fn stop(&mut self) {
        if let Some(camera) = self.camera.take() {
            camera.stream.stop();
            log::info!("camera stream stopped");
        }
        self.live = None;
    }

    /// Switches to a still photo, tearing the camera down first.
    pub fn show_still(&mut self, frame: Arc<Frame>) {
        self.stop();
        self.still = Some(frame);
    }

    pub fn is_camera_active(&self) -> bool {
        self.camera.is_some()
    }

    /// Pulls the newest frame from the capture thread. Returns `Ok(true)` when a
    /// new usable frame replaced the previous one, and an error when the stream
    /// ended on its own (device lost, or the capture thread failed to open it).
    pub fn poll(&mut self) -> Result<bool, CaptureError> {
        let Some(camera) = self.camera.as_ref() else {
            return Ok(false);
        };

        let mut latest = None;
        let disconnected = loop {
            match camera.frame_rx.try_recv() {
                Ok(frame) if frame.is_usable() => latest = Some(frame),
                Ok(_) => {}
                Err(TryRecvError::Empty) => break false,
                Err(TryRecvError::Disconnected) => break true,
            }
        };

        if disconnected {
            log::warn!("camera capture thread ended");
            if let Some(camera) = self.camera.take() {
                camera.stream.stop();
            }
            self.live = None;
            return Err(CaptureError::DeviceUnavailable(
                "camera stream ended".to_string(),
            ));
        }

        match latest {
            Some(frame) => {
                self.live = Some(Arc::new(frame));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Latest camera frame; `None` until the stream delivered a frame with
    /// nonzero dimensions.
    pub fn live_frame(&self) -> Option<&Arc<Frame>> {
        self.live.as_ref()
    }

    pub fn still_frame(&self) -> Option<&Arc<Frame>> {
        self.still.as_ref()
    }

    /// The frame to show: the live camera frame when usable, else the still photo.
    pub fn current_frame(&self) -> Option<VisualFrame> {
        if self.camera.is_some() {
            if let Some(frame) = &self.live {
                return Some(VisualFrame::LiveCamera(frame.clone()));
            }
        }
        self.still
            .as_ref()
            .map(|frame| VisualFrame::StillImage(frame.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    struct FailingCamera(CaptureError);

    impl CameraProvider for FailingCamera {
        fn start_stream(&mut self, _: Sender<Frame>) -> Result<CameraStream, CaptureError> {
            Err(self.0.clone())
        }
    }

    fn wait_for_frame(source: &mut CaptureSource) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if source.poll() == Ok(true) {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    fn still(width: u32, height: u32) -> Arc<Frame> {
        Arc::new(Frame::from_rgba_image(image::RgbaImage::new(width, height)))
    }

    #[test]
    fn no_frame_before_first_delivery() {
        let source = CaptureSource::new(Box::new(NoCamera));
        assert!(source.current_frame().is_none());
        assert!(source.live_frame().is_none());
    }

    #[test]
    fn restart_never_holds_two_streams() {
        let camera = TestPatternCamera::new(64, 48);
        let active = camera.active_streams();
        let peak = camera.peak_streams();
        let mut source = CaptureSource::new(Box::new(camera));

        for _ in 0..3 {
            source.start().unwrap();
            assert!(wait_for_frame(&mut source));
            source.stop();
            assert_eq!(active.load(Ordering::SeqCst), 0);
        }
        source.start().unwrap();
        assert!(wait_for_frame(&mut source));
        source.start().unwrap();
        assert!(wait_for_frame(&mut source));
        assert_eq!(peak.load(Ordering::SeqCst), 1);

        source.stop();
        source.stop();
        assert_eq!(active.load(Ordering::SeqCst), 0);
        assert!(!source.is_camera_active());
    }

    #[test]
    fn live_frame_wins_over_still() {
        let mut source = CaptureSource::new(Box::new(TestPatternCamera::new(32, 24)));
        source.show_still(still(8, 8));
        assert!(matches!(source.current_frame(), Some(VisualFrame::StillImage(_))));

        source.start().unwrap();
        assert!(wait_for_frame(&mut source));
        let frame = source.current_frame().unwrap();
        assert!(frame.is_live());
        assert_eq!(frame.size().width, 32);
    }

    #[test]
    fn switching_to_still_releases_camera() {
        let camera = TestPatternCamera::new(32, 24);
        let active = camera.active_streams();
        let mut source = CaptureSource::new(Box::new(camera));
        source.start().unwrap();
        assert!(wait_for_frame(&mut source));

        source.show_still(still(10, 10));
        assert_eq!(active.load(Ordering::SeqCst), 0);
        assert!(source.live_frame().is_none());
        assert!(matches!(source.current_frame(), Some(VisualFrame::StillImage(_))));
    }

    struct EndingCamera;

    impl CameraProvider for EndingCamera {
        fn start_stream(&mut self, frame_tx: Sender<Frame>) -> Result<CameraStream, CaptureError> {
            Ok(CameraStream::spawn(move |_| drop(frame_tx)))
        }
    }

    #[test]
    fn ended_stream_is_reported_once() {
        let mut source = CaptureSource::new(Box::new(EndingCamera));
        source.show_still(still(10, 10));
        source.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut result = Ok(false);
        while Instant::now() < deadline && result == Ok(false) {
            result = source.poll();
            thread::sleep(Duration::from_millis(2));
        }
        assert!(matches!(result, Err(CaptureError::DeviceUnavailable(_))));
        assert!(!source.is_camera_active());
        assert_eq!(source.poll(), Ok(false));
        assert!(matches!(source.current_frame(), Some(VisualFrame::StillImage(_))));
    }

    #[test]
    fn permission_denied_keeps_still_fallback() {
        let mut source =
            CaptureSource::new(Box::new(FailingCamera(CaptureError::PermissionDenied)));
        source.show_still(still(10, 10));
        assert_eq!(source.start(), Err(CaptureError::PermissionDenied));
        assert!(!source.is_camera_active());
        assert!(matches!(source.current_frame(), Some(VisualFrame::StillImage(_))));
    }
}
