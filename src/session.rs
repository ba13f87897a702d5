//! The try-on session: one object the host UI drives once per frame.

use std::{
    sync::Arc,
    time::Instant,
};

use crossbeam_channel::{Receiver, TryRecvError};
use image::RgbaImage;

use crate::{
    anchor::FitConfig,
    assets::{AssetLoader, OverlaySprite},
    capture::{self, CameraProvider, CaptureSource},
    catalog::Product,
    compositor::{Compositor, FrameLoop, TickInput, TickReport},
    config::AppConfig,
    error::{AssetError, CaptureError, SnapshotError},
    perception::{DetectionCadence, DownloadProgress, ModelStatus, PerceptionEngine, SubmitOutcome},
    smoothing::TemporalSmoother,
    snapshot::{self, SnapshotSink},
    types::{DetectionState, Frame, ProductType, VisualFrame},
};

/// What the face tracker is doing, for display.
#[derive(Clone, Debug, PartialEq)]
pub enum TrackingPhase {
    PreparingModels(Option<DownloadProgress>),
    LookingForFace,
    FaceFound,
    ModelsUnavailable(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct TryOnStatus {
    pub tracking: TrackingPhase,
    pub camera_active: bool,
    pub camera_error: Option<CaptureError>,
    pub asset_error: Option<AssetError>,
    pub loading_overlay: bool,
    pub loading_photo: bool,
}

impl TryOnStatus {
    pub fn headline(&self) -> String {
        match &self.tracking {
            TrackingPhase::PreparingModels(Some(progress)) => match progress.total {
                Some(total) if total > 0 => format!(
                    "Downloading {} model... {}%",
                    progress.model.label(),
                    progress.downloaded * 100 / total
                ),
                _ => format!("Downloading {} model...", progress.model.label()),
            },
            TrackingPhase::PreparingModels(None) => "Loading models...".to_string(),
            TrackingPhase::LookingForFace => "Detecting...".to_string(),
            TrackingPhase::FaceFound => "Face detected".to_string(),
            TrackingPhase::ModelsUnavailable(_) => {
                "Face tracking unavailable, showing centered preview".to_string()
            }
        }
    }
}

struct PendingSprite {
    product_id: String,
    rx: Receiver<Result<OverlaySprite, AssetError>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SourceKey {
    Live,
    Still(usize),
}

fn source_key(frame: &VisualFrame) -> SourceKey {
    match frame {
        VisualFrame::LiveCamera(_) => SourceKey::Live,
        VisualFrame::StillImage(still) => SourceKey::Still(Arc::as_ptr(still) as usize),
    }
}

fn take_ready<T>(rx: &Receiver<T>) -> Option<Option<T>> {
    match rx.try_recv() {
        Ok(value) => Some(Some(value)),
        Err(TryRecvError::Empty) => None,
        Err(TryRecvError::Disconnected) => Some(None),
    }
}

pub struct TryOnSession {
    capture: CaptureSource,
    assets: AssetLoader,
    engine: PerceptionEngine,
    cadence: DetectionCadence,
    compositor: Compositor,
    frame_loop: FrameLoop,
    fit: FitConfig,
    product: Option<Product>,
    sprite: Option<OverlaySprite>,
    pending_sprite: Option<PendingSprite>,
    pending_photo: Option<Receiver<Result<Arc<Frame>, AssetError>>>,
    camera_error: Option<CaptureError>,
    asset_error: Option<AssetError>,
    source: Option<SourceKey>,
}

impl TryOnSession {
    pub fn new(
        config: &AppConfig,
        camera: Box<dyn CameraProvider>,
        assets: AssetLoader,
        engine: PerceptionEngine,
    ) -> Self {
        let smoother = TemporalSmoother::new(config.smoothing.alpha);
        Self {
            capture: CaptureSource::new(camera),
            assets,
            engine,
            cadence: DetectionCadence::new(config.cadence.live_interval()),
            compositor: Compositor::new(&config.surface, smoother),
            frame_loop: FrameLoop::new(),
            fit: config.fit.clone(),
            product: None,
            sprite: None,
            pending_sprite: None,
            pending_photo: None,
            camera_error: None,
            asset_error: None,
            source: None,
        }
    }

    /// Session with the system camera, the default asset fetcher and the ONNX
    /// face models from `config`.
    pub fn from_config(config: &AppConfig) -> Self {
        let engine = PerceptionEngine::spawn_onnx(config.models.clone(), config.detector.clone());
        Self::new(
            config,
            capture::default_provider(config.camera.index),
            AssetLoader::default(),
            engine,
        )
    }

    /// Acquires the camera. On failure the error is kept for display and the
    /// previous still photo (if any) stays as background.
    pub fn start_camera(&mut self) -> Result<(), CaptureError> {
        self.pending_photo = None;
        match self.capture.start() {
            Ok(()) => {
                self.camera_error = None;
                self.source_changed();
                Ok(())
            }
            Err(err) => {
                self.camera_error = Some(err.clone());
                Err(err)
            }
        }
    }

    pub fn stop_camera(&mut self) {
        if self.capture.is_camera_active() {
            self.capture.stop();
            self.source_changed();
        }
    }

    pub fn is_camera_active(&self) -> bool {
        self.capture.is_camera_active()
    }

    /// Switches to a still photo. The camera is released right away; the photo
    /// becomes the background once decoded.
    pub fn use_photo(&mut self, source: &str) {
        self.stop_camera();
        self.camera_error = None;
        self.pending_photo = Some(self.assets.spawn_background(source.to_string()));
    }

    /// Makes `product` current and starts loading its overlay. A load still in
    /// progress for a previous product is abandoned.
    pub fn select_product(&mut self, product: &Product) {
        if self.product.as_ref() == Some(product) && self.sprite.is_some() {
            return;
        }
        log::info!("selected {} ({})", product.name, product.product_type.label());
        self.product = Some(product.clone());
        self.sprite = None;
        self.asset_error = None;
        self.pending_sprite = Some(PendingSprite {
            product_id: product.id.clone(),
            rx: self
                .assets
                .spawn_sprite(product.overlay.clone(), product.product_type),
        });
    }

    pub fn selected_product(&self) -> Option<&Product> {
        self.product.as_ref()
    }

    pub fn fit(&self) -> &FitConfig {
        &self.fit
    }

    /// Live placement tunables; read on every tick.
    pub fn fit_mut(&mut self) -> &mut FitConfig {
        &mut self.fit
    }

    pub fn set_smoothing_alpha(&mut self, alpha: f32) {
        self.compositor.set_smoothing_alpha(alpha);
    }

    pub fn detection_state(&self) -> &DetectionState {
        self.engine.current_state()
    }

    pub fn frame_loop(&self) -> FrameLoop {
        self.frame_loop.clone()
    }

    pub fn surface(&self) -> &RgbaImage {
        self.compositor.surface()
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    /// Runs one render tick. Returns `None` once the loop has been stopped.
    pub fn tick(&mut self, now: Instant) -> Option<TickReport> {
        if !self.frame_loop.is_running() {
            return None;
        }

        self.poll_assets();
        if let Err(err) = self.capture.poll() {
            self.camera_error = Some(err);
        }
        if self.engine.poll() {
            self.cadence.settled(now);
        }

        let frame = self.capture.current_frame();
        let key = frame.as_ref().map(source_key);
        if key != self.source {
            self.source_changed();
            self.source = key;
        }

        if let Some(frame) = &frame {
            if !self.engine.is_busy() && self.cadence.is_due(now, frame) {
                let outcome = self.engine.detect_once(frame);
                if outcome == SubmitOutcome::Submitted {
                    self.cadence.dispatched(frame);
                }
            }
        }

        let product = self
            .sprite
            .as_ref()
            .map(|s| s.product_type)
            .or(self.product.as_ref().map(|p| p.product_type))
            .unwrap_or(ProductType::Glasses);
        Some(self.compositor.tick(TickInput {
            background: frame.as_ref(),
            detection: self.engine.current_state(),
            sprite: self.sprite.as_ref(),
            product,
            fit: &self.fit,
        }))
    }

    pub fn status(&self) -> TryOnStatus {
        let tracking = match self.engine.status() {
            ModelStatus::Loading => {
                TrackingPhase::PreparingModels(self.engine.download_progress())
            }
            ModelStatus::Unavailable(err) => TrackingPhase::ModelsUnavailable(err.to_string()),
            ModelStatus::Ready if self.engine.current_state().is_found() => {
                TrackingPhase::FaceFound
            }
            ModelStatus::Ready => TrackingPhase::LookingForFace,
        };
        TryOnStatus {
            tracking,
            camera_active: self.capture.is_camera_active(),
            camera_error: self.camera_error.clone(),
            asset_error: self.asset_error.clone(),
            loading_overlay: self.pending_sprite.is_some(),
            loading_photo: self.pending_photo.is_some(),
        }
    }

    pub fn snapshot_png(&self) -> Result<Vec<u8>, SnapshotError> {
        if !self.compositor.has_rendered() {
            return Err(SnapshotError::NotRendered);
        }
        snapshot::export_png(self.compositor.surface())
    }

    pub fn save_snapshot(&self, sink: &dyn SnapshotSink) -> Result<String, SnapshotError> {
        let png = self.snapshot_png()?;
        sink.save(&png)
    }

    /// Stops the render loop and releases the camera and the detector. Safe to
    /// call more than once.
    pub fn shutdown(&mut self) {
        if self.frame_loop.stop() {
            log::info!("try-on session shutting down");
        }
        self.capture.stop();
        self.engine.shutdown();
        self.pending_sprite = None;
        self.pending_photo = None;
    }

    fn source_changed(&mut self) {
        self.engine.cancel_pending();
        self.cadence.reset();
        self.compositor.reset_smoothing();
    }

    fn poll_assets(&mut self) {
        if let Some(pending) = &self.pending_sprite {
            if let Some(result) = take_ready(&pending.rx) {
                let product_id = pending.product_id.clone();
                self.pending_sprite = None;
                match result {
                    Some(Ok(sprite)) => {
                        log::debug!("overlay for {product_id} ready");
                        self.sprite = Some(sprite);
                    }
                    Some(Err(err)) => {
                        log::warn!("overlay for {product_id} failed: {err}");
                        self.asset_error = Some(err);
                    }
                    None => log::warn!("overlay loader for {product_id} vanished"),
                }
            }
        }

        if let Some(rx) = &self.pending_photo {
            if let Some(result) = take_ready(rx) {
                self.pending_photo = None;
                match result {
                    Some(Ok(frame)) => self.capture.show_still(frame),
                    Some(Err(err)) => {
                        log::warn!("photo failed to load: {err}");
                        self.asset_error = Some(err);
                    }
                    None => log::warn!("photo loader vanished"),
                }
            }
        }
    }
}

impl Drop for TryOnSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
