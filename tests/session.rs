use std::{
    collections::HashMap,
    sync::{Arc, atomic::Ordering},
    thread,
    time::{Duration, Instant},
};

use approx::assert_abs_diff_eq;
use crossbeam_channel::Sender;
use facefit::{
    TrackingPhase, TryOnSession,
    assets::{AssetFetcher, AssetLoader},
    capture::{CameraProvider, CameraStream, TestPatternCamera},
    catalog::Product,
    config::AppConfig,
    error::{AssetError, CaptureError, SnapshotError},
    perception::{FaceLandmarker, PerceptionEngine},
    snapshot::export_png,
    types::{Frame, LEFT_EYE, NUM_LANDMARKS, Point, ProductType, RIGHT_EYE},
};
use image::{Rgba, RgbaImage};

const PLACEHOLDER: [u8; 4] = [0x2b, 0x2d, 0x31, 0xff];
const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);
const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

struct DeniedCamera;

impl CameraProvider for DeniedCamera {
    fn start_stream(&mut self, _: Sender<Frame>) -> Result<CameraStream, CaptureError> {
        Err(CaptureError::PermissionDenied)
    }
}

/// Opens fine, then the capture thread ends before delivering a frame.
struct VanishingCamera;

impl CameraProvider for VanishingCamera {
    fn start_stream(&mut self, frame_tx: Sender<Frame>) -> Result<CameraStream, CaptureError> {
        Ok(CameraStream::spawn(move |_| drop(frame_tx)))
    }
}

/// Serves canned bytes per source, optionally after a delay.
#[derive(Default)]
struct CannedFetcher {
    entries: HashMap<String, (Vec<u8>, Duration)>,
}

impl CannedFetcher {
    fn with(mut self, source: &str, image: RgbaImage, delay: Duration) -> Self {
        let png = export_png(&image).unwrap();
        self.entries.insert(source.to_string(), (png, delay));
        self
    }
}

impl AssetFetcher for CannedFetcher {
    fn fetch(&self, source: &str) -> Result<Vec<u8>, AssetError> {
        let (bytes, delay) = self.entries.get(source).ok_or_else(|| AssetError::Fetch {
            source_url: source.to_string(),
            reason: "not found".to_string(),
        })?;
        thread::sleep(*delay);
        Ok(bytes.clone())
    }
}

/// Always reports the same face: eyes at (280, 200) and (360, 200).
struct FixedFace;

impl FaceLandmarker for FixedFace {
    fn detect(&mut self, _frame: &Frame) -> anyhow::Result<Option<Vec<Point>>> {
        let mut points = vec![Point::new(320.0, 260.0); NUM_LANDMARKS];
        for idx in LEFT_EYE {
            points[idx] = Point::new(280.0, 200.0);
        }
        for idx in RIGHT_EYE {
            points[idx] = Point::new(360.0, 200.0);
        }
        Ok(Some(points))
    }
}

fn ready_engine() -> PerceptionEngine {
    PerceptionEngine::spawn(|_| Ok(FixedFace))
}

fn missing_models() -> PerceptionEngine {
    PerceptionEngine::spawn(|_| -> anyhow::Result<FixedFace> {
        anyhow::bail!("face_detector.onnx not found")
    })
}

fn glasses(id: &str) -> Product {
    Product::new(id, id, format!("{id}.png"), ProductType::Glasses)
}

/// Ticks until `done` holds or two seconds pass.
fn tick_until(session: &mut TryOnSession, mut done: impl FnMut(&TryOnSession) -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        session.tick(Instant::now());
        if done(session) {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn denied_camera_still_renders_placeholder() {
    let config = AppConfig::default();
    let mut session = TryOnSession::new(
        &config,
        Box::new(DeniedCamera),
        AssetLoader::new(Arc::new(CannedFetcher::default())),
        missing_models(),
    );

    assert_eq!(session.start_camera(), Err(CaptureError::PermissionDenied));
    assert!(matches!(session.snapshot_png(), Err(SnapshotError::NotRendered)));

    let report = session.tick(Instant::now()).expect("loop running");
    assert!(!report.background_drawn);
    assert!(session.surface().pixels().all(|p| p.0 == PLACEHOLDER));

    let status = session.status();
    assert_eq!(status.camera_error, Some(CaptureError::PermissionDenied));
    assert!(!status.camera_active);

    assert!(tick_until(&mut session, |s| matches!(
        s.status().tracking,
        TrackingPhase::ModelsUnavailable(_)
    )));
    let png = session.snapshot_png().unwrap();
    assert_eq!(&png[..4], b"\x89PNG");
}

#[test]
fn camera_lost_after_start_is_reported() {
    let config = AppConfig::default();
    let mut session = TryOnSession::new(
        &config,
        Box::new(VanishingCamera),
        AssetLoader::new(Arc::new(CannedFetcher::default())),
        missing_models(),
    );

    session.start_camera().unwrap();
    assert!(tick_until(&mut session, |s| s.status().camera_error.is_some()));

    let status = session.status();
    assert!(!status.camera_active);
    assert!(matches!(
        status.camera_error,
        Some(CaptureError::DeviceUnavailable(_))
    ));
    assert!(session.tick(Instant::now()).is_some());
}

#[test]
fn photo_with_face_anchors_glasses_on_eyes() {
    let config = AppConfig::default();
    let fetcher = CannedFetcher::default()
        .with("photo.png", RgbaImage::from_pixel(640, 480, Rgba([90, 90, 90, 255])), Duration::ZERO)
        .with("aviator.png", RgbaImage::from_pixel(40, 20, BLUE), Duration::ZERO);
    let mut session = TryOnSession::new(
        &config,
        Box::new(DeniedCamera),
        AssetLoader::new(Arc::new(fetcher)),
        ready_engine(),
    );

    session.select_product(&glasses("aviator"));
    session.use_photo("photo.png");
    assert!(tick_until(&mut session, |s| {
        let status = s.status();
        status.tracking == TrackingPhase::FaceFound && !status.loading_overlay
    }));

    // Let smoothing settle on the detected face.
    for _ in 0..80 {
        session.tick(Instant::now());
    }
    let anchor = session.compositor().anchors().as_slice()[0];
    assert_abs_diff_eq!(anchor.center.x, 320.0, epsilon = 0.5);
    assert_abs_diff_eq!(anchor.rotation, 0.0, epsilon = 1e-3);
    assert_abs_diff_eq!(anchor.width, 80.0 * config.fit.k_glasses, epsilon = 0.5);

    let px = session
        .surface()
        .get_pixel(anchor.center.x as u32, anchor.center.y as u32);
    assert_eq!(*px, BLUE);
    let corner = session.surface().get_pixel(5, 5).0;
    assert!(corner[..3].iter().all(|c| c.abs_diff(90) <= 1), "{corner:?}");
}

#[test]
fn newer_selection_wins_over_slow_load() {
    let config = AppConfig::default();
    let fetcher = CannedFetcher::default()
        .with("slow.png", RgbaImage::from_pixel(20, 10, RED), Duration::from_millis(150))
        .with("fast.png", RgbaImage::from_pixel(20, 10, BLUE), Duration::ZERO);
    let mut session = TryOnSession::new(
        &config,
        Box::new(DeniedCamera),
        AssetLoader::new(Arc::new(fetcher)),
        missing_models(),
    );

    session.select_product(&glasses("slow"));
    session.select_product(&glasses("fast"));
    assert!(tick_until(&mut session, |s| !s.status().loading_overlay));

    thread::sleep(Duration::from_millis(200));
    let report = session.tick(Instant::now()).unwrap();
    assert!(report.overlay_drawn);
    assert_eq!(session.selected_product().map(|p| p.id.as_str()), Some("fast"));
    assert_eq!(*session.surface().get_pixel(320, 240), BLUE);
}

#[test]
fn broken_overlay_is_reported_without_stopping_the_loop() {
    let config = AppConfig::default();
    let mut session = TryOnSession::new(
        &config,
        Box::new(DeniedCamera),
        AssetLoader::new(Arc::new(CannedFetcher::default())),
        missing_models(),
    );

    session.select_product(&glasses("missing"));
    assert!(tick_until(&mut session, |s| s.status().asset_error.is_some()));
    let report = session.tick(Instant::now()).unwrap();
    assert!(!report.overlay_drawn);
}

#[test]
fn shutdown_releases_camera_and_stops_ticks() {
    let config = AppConfig::default();
    let camera = TestPatternCamera::new(320, 240);
    let active = camera.active_streams();
    let mut session = TryOnSession::new(
        &config,
        Box::new(camera),
        AssetLoader::new(Arc::new(CannedFetcher::default())),
        missing_models(),
    );
    let frame_loop = session.frame_loop();

    session.start_camera().unwrap();
    assert!(tick_until(&mut session, |s| s.compositor().has_rendered()
        && s.status().camera_active
        && active.load(Ordering::SeqCst) == 1));
    assert!(tick_until(&mut session, |s| s
        .surface()
        .pixels()
        .any(|p| p.0 != PLACEHOLDER)));

    session.shutdown();
    session.shutdown();
    assert!(!frame_loop.is_running());
    assert_eq!(active.load(Ordering::SeqCst), 0);
    assert!(session.tick(Instant::now()).is_none());
}
