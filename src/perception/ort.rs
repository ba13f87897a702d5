use std::path::Path;

use anyhow::{Context, Result, bail};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;
use serde::{Deserialize, Serialize};

use super::{
    FaceLandmarker,
    common::{self, Normalize},
};
use crate::{
    config::ModelsConfig,
    model_download::{ModelDownloadEvent, ModelKind, ensure_model_ready},
    types::{Frame, Point},
};

/// Detector operating parameters. Input sizes must match the model artifacts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Side of the square detector input.
    pub input_size: u32,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    /// Side of the square landmark regressor input.
    pub landmark_input_size: u32,
    /// Growth of the face box before cropping for the landmark regressor.
    pub crop_margin: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_size: 320,
            score_threshold: 0.5,
            nms_threshold: 0.3,
            landmark_input_size: 112,
            crop_margin: 0.25,
        }
    }
}

impl DetectorConfig {
    /// Both model inputs need a nonzero side.
    pub fn is_usable(&self) -> bool {
        self.input_size > 0 && self.landmark_input_size > 0
    }
}

pub struct OrtLandmarker {
    detector: Session,
    landmarks: Session,
    cfg: DetectorConfig,
}

fn load_session(path: &Path, what: &str) -> Result<Session> {
    Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(2)?
        .commit_from_file(path)
        .with_context(|| format!("failed to load {what} from {}", path.display()))
}

impl OrtLandmarker {
    pub fn new(detector_path: &Path, landmark_path: &Path, cfg: DetectorConfig) -> Result<Self> {
        let detector = load_session(detector_path, "face detector")?;
        let landmarks = load_session(landmark_path, "landmark regressor")?;
        log::info!(
            "face models ready: detector {} (input {}), landmarks {} (input {})",
            detector_path.display(),
            cfg.input_size,
            landmark_path.display(),
            cfg.landmark_input_size
        );
        Ok(Self {
            detector,
            landmarks,
            cfg,
        })
    }

    /// Ensures both artifacts are on disk (downloading when configured) and
    /// opens them.
    pub fn load(
        models: &ModelsConfig,
        cfg: DetectorConfig,
        on_event: &mut dyn FnMut(ModelDownloadEvent),
    ) -> Result<Self> {
        let detector_path = models.detector_path();
        let landmark_path = models.landmark_path();
        let base_url = models.download_base_url.as_deref();

        ensure_model_ready(ModelKind::FaceDetector, &detector_path, base_url, &mut *on_event)?;
        ensure_model_ready(ModelKind::Landmark68, &landmark_path, base_url, &mut *on_event)?;
        Self::new(&detector_path, &landmark_path, cfg)
    }

    fn run_detector(&mut self, frame: &Frame) -> Result<Vec<common::FaceBox>> {
        let (input, letterbox) =
            common::prepare_frame_with_size(frame, self.cfg.input_size, Normalize::CENTERED)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .detector
            .run(ort::inputs![tensor])
            .context("failed to run face detector session")?;

        if outputs.len() < 2 {
            bail!(
                "face detector returned {} outputs, expected scores and boxes",
                outputs.len()
            );
        }
        let scores: Vec<f32> = outputs[0].try_extract_array::<f32>()?.iter().copied().collect();
        let boxes: Vec<f32> = outputs[1].try_extract_array::<f32>()?.iter().copied().collect();

        common::decode_detections(
            &scores,
            &boxes,
            &letterbox,
            self.cfg.score_threshold,
            self.cfg.nms_threshold,
        )
    }
}

impl FaceLandmarker for OrtLandmarker {
    fn detect(&mut self, frame: &Frame) -> Result<Option<Vec<Point>>> {
        let faces = self.run_detector(frame)?;
        let Some(face) = faces.first() else {
            return Ok(None);
        };

        let (center, side) = common::crop_from_box(face, self.cfg.crop_margin);
        let (input, transform) = common::prepare_crop(
            frame,
            center,
            side,
            self.cfg.landmark_input_size,
            Normalize::UNIT,
        )?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .landmarks
            .run(ort::inputs![tensor])
            .context("failed to run landmark session")?;
        if outputs.len() < 1 {
            bail!("landmark model returned no outputs");
        }
        let flat: Vec<f32> = outputs[0].try_extract_array::<f32>()?.iter().copied().collect();

        log::debug!(
            "face at {:?} (score {:.2}), {} candidates",
            face.bbox,
            face.score,
            faces.len()
        );
        common::decode_landmarks(&flat, &transform).map(Some)
    }
}
