//! Face detection on a worker thread.
//!
//! The worker loads the models once and then runs one detection per job. The
//! [`PerceptionEngine`] handle lives on the UI thread: it owns the current
//! [`DetectionState`], allows at most one job in flight, and discards results
//! that belong to a cancelled epoch.

mod cadence;
pub mod common;
mod ort;

use std::{
    sync::Arc,
    thread,
};

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded, unbounded};

pub use self::cadence::DetectionCadence;
pub use self::ort::{DetectorConfig, OrtLandmarker};

use crate::{
    config::ModelsConfig,
    error::PerceptionError,
    model_download::{ModelDownloadEvent, ModelKind},
    types::{DetectionState, Frame, LandmarkSet, Point, VisualFrame},
};

/// One face detector + 68-point landmark regressor.
pub trait FaceLandmarker: Send + 'static {
    /// Returns the landmarks of the most confident face, or `None` when no face
    /// clears the detector threshold.
    fn detect(&mut self, frame: &Frame) -> anyhow::Result<Option<Vec<Point>>>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelStatus {
    Loading,
    Ready,
    Unavailable(PerceptionError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DownloadProgress {
    pub model: ModelKind,
    pub downloaded: u64,
    pub total: Option<u64>,
}

/// Result of asking the engine to analyze a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted,
    /// A detection is still running; nothing was queued.
    Busy,
    NotReady,
    Unavailable,
}

struct DetectJob {
    epoch: u64,
    seq: u64,
    frame: Arc<Frame>,
}

enum WorkerEvent {
    Download(ModelDownloadEvent),
    Ready,
    Unavailable(PerceptionError),
    Detected {
        epoch: u64,
        landmarks: Option<LandmarkSet>,
    },
}

pub struct PerceptionEngine {
    job_tx: Option<Sender<DetectJob>>,
    event_rx: Receiver<WorkerEvent>,
    _worker: thread::JoinHandle<()>,
    state: DetectionState,
    status: ModelStatus,
    download: Option<DownloadProgress>,
    in_flight: bool,
    epoch: u64,
    next_seq: u64,
}

impl PerceptionEngine {
    /// Starts the worker. `load` runs on the worker thread and may report model
    /// download progress through the callback it is given.
    pub fn spawn<L, F>(load: F) -> Self
    where
        L: FaceLandmarker,
        F: FnOnce(&mut dyn FnMut(ModelDownloadEvent)) -> anyhow::Result<L> + Send + 'static,
    {
        let (job_tx, job_rx) = bounded::<DetectJob>(1);
        let (event_tx, event_rx) = unbounded();
        let worker = thread::spawn(move || run_worker(load, job_rx, event_tx));

        Self {
            job_tx: Some(job_tx),
            event_rx,
            _worker: worker,
            state: DetectionState::Loading,
            status: ModelStatus::Loading,
            download: None,
            in_flight: false,
            epoch: 0,
            next_seq: 1,
        }
    }

    /// Engine backed by the ONNX face models described in `models`.
    pub fn spawn_onnx(models: ModelsConfig, detector: DetectorConfig) -> Self {
        Self::spawn(move |on_event| OrtLandmarker::load(&models, detector, on_event))
    }

    pub fn current_state(&self) -> &DetectionState {
        &self.state
    }

    pub fn status(&self) -> &ModelStatus {
        &self.status
    }

    pub fn download_progress(&self) -> Option<DownloadProgress> {
        self.download
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight
    }

    /// Queues one detection against `frame`. Never starts a second detection
    /// while one is running.
    pub fn detect_once(&mut self, frame: &VisualFrame) -> SubmitOutcome {
        match self.status {
            ModelStatus::Loading => return SubmitOutcome::NotReady,
            ModelStatus::Unavailable(_) => return SubmitOutcome::Unavailable,
            ModelStatus::Ready => {}
        }
        if self.in_flight {
            return SubmitOutcome::Busy;
        }
        let Some(job_tx) = self.job_tx.as_ref() else {
            return SubmitOutcome::Unavailable;
        };

        let job = DetectJob {
            epoch: self.epoch,
            seq: self.next_seq,
            frame: frame.frame().clone(),
        };
        match job_tx.try_send(job) {
            Ok(()) => {
                self.next_seq += 1;
                self.in_flight = true;
                SubmitOutcome::Submitted
            }
            Err(err) => {
                log::debug!("detection job not queued: {err}");
                SubmitOutcome::Busy
            }
        }
    }

    /// Drops whatever is in flight from consideration: its result will not be
    /// applied. The state falls back to `Searching` once models are ready.
    pub fn cancel_pending(&mut self) {
        self.epoch += 1;
        if self.status == ModelStatus::Ready {
            self.state = DetectionState::Searching;
        }
    }

    /// Applies worker events. Returns `true` when an in-flight detection settled
    /// (whether or not its result was kept).
    pub fn poll(&mut self) -> bool {
        let mut settled = false;
        loop {
            let event = match self.event_rx.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.status != ModelStatus::Ready || self.in_flight {
                        self.mark_unavailable(PerceptionError::ModelsUnavailable(
                            "perception worker stopped".to_string(),
                        ));
                    }
                    break;
                }
            };

            match event {
                WorkerEvent::Download(event) => self.apply_download(event),
                WorkerEvent::Ready => {
                    log::info!("face models loaded");
                    self.status = ModelStatus::Ready;
                    self.download = None;
                    if self.state == DetectionState::Loading {
                        self.state = DetectionState::Searching;
                    }
                }
                WorkerEvent::Unavailable(err) => self.mark_unavailable(err),
                WorkerEvent::Detected { epoch, landmarks } => {
                    self.in_flight = false;
                    settled = true;
                    if epoch != self.epoch {
                        log::debug!("discarding detection from cancelled epoch {epoch}");
                        continue;
                    }
                    self.state = match landmarks {
                        Some(set) => DetectionState::Found(Arc::new(set)),
                        None => DetectionState::Searching,
                    };
                }
            }
        }
        settled
    }

    /// Stops accepting work. Results still in flight are never applied.
    pub fn shutdown(&mut self) {
        self.epoch += 1;
        self.job_tx = None;
        self.in_flight = false;
    }

    fn apply_download(&mut self, event: ModelDownloadEvent) {
        self.download = match event {
            ModelDownloadEvent::Started { model, total } => Some(DownloadProgress {
                model,
                downloaded: 0,
                total,
            }),
            ModelDownloadEvent::Progress {
                model,
                downloaded,
                total,
            } => Some(DownloadProgress {
                model,
                downloaded,
                total,
            }),
            ModelDownloadEvent::AlreadyPresent { .. } | ModelDownloadEvent::Finished { .. } => None,
        };
    }

    fn mark_unavailable(&mut self, err: PerceptionError) {
        if matches!(self.status, ModelStatus::Unavailable(_)) {
            return;
        }
        log::error!("{err}; face anchoring disabled for this session");
        self.status = ModelStatus::Unavailable(err);
        self.download = None;
        self.in_flight = false;
        self.job_tx = None;
    }
}

impl Drop for PerceptionEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker<L, F>(load: F, job_rx: Receiver<DetectJob>, event_tx: Sender<WorkerEvent>)
where
    L: FaceLandmarker,
    F: FnOnce(&mut dyn FnMut(ModelDownloadEvent)) -> anyhow::Result<L>,
{
    let mut forward = |event: ModelDownloadEvent| {
        let _ = event_tx.send(WorkerEvent::Download(event));
    };
    let mut landmarker = match load(&mut forward) {
        Ok(landmarker) => landmarker,
        Err(err) => {
            log::error!("failed to load face models: {err:?}");
            let _ = event_tx.send(WorkerEvent::Unavailable(PerceptionError::ModelsUnavailable(
                format!("{err:#}"),
            )));
            return;
        }
    };
    if event_tx.send(WorkerEvent::Ready).is_err() {
        return;
    }

    while let Ok(job) = job_rx.recv() {
        let landmarks = match landmarker.detect(&job.frame) {
            Ok(Some(points)) => {
                let set = LandmarkSet::new(&points, job.seq, job.frame.size());
                if set.is_none() {
                    log::warn!(
                        "landmark model returned {} points, expected 68",
                        points.len()
                    );
                }
                set
            }
            Ok(None) => None,
            Err(err) => {
                log::warn!("face detection failed: {err:?}");
                None
            }
        };

        let event = WorkerEvent::Detected {
            epoch: job.epoch,
            landmarks,
        };
        if event_tx.send(event).is_err() {
            break;
        }
    }
    log::debug!("perception worker exiting");
}
