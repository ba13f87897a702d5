use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    anchor::FitConfig, catalog::Product, perception::DetectorConfig, smoothing::DEFAULT_ALPHA,
};

pub const CONFIG_ENV: &str = "FACEFIT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "facefit.json";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub models: ModelsConfig,
    pub detector: DetectorConfig,
    pub cadence: CadenceConfig,
    pub smoothing: SmoothingConfig,
    pub fit: FitConfig,
    pub surface: SurfaceConfig,
    pub camera: CameraConfig,
    pub snapshots: SnapshotConfig,
    pub catalog: Vec<Product>,
    /// Photo shown when the camera is off; a path, URL or data URI.
    pub photo: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            models: ModelsConfig::default(),
            detector: DetectorConfig::default(),
            cadence: CadenceConfig::default(),
            smoothing: SmoothingConfig::default(),
            fit: FitConfig::default(),
            surface: SurfaceConfig::default(),
            camera: CameraConfig::default(),
            snapshots: SnapshotConfig::default(),
            catalog: crate::catalog::default_catalog(),
            photo: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub directory: PathBuf,
    pub detector_file: String,
    pub landmark_file: String,
    /// Base URL missing model files are downloaded from. Without it, missing
    /// files disable face anchoring.
    pub download_base_url: Option<String>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("models"),
            detector_file: "face_detector.onnx".to_string(),
            landmark_file: "face_landmark_68.onnx".to_string(),
            download_base_url: None,
        }
    }
}

impl ModelsConfig {
    pub fn detector_path(&self) -> PathBuf {
        self.directory.join(&self.detector_file)
    }

    pub fn landmark_path(&self) -> PathBuf {
        self.directory.join(&self.landmark_file)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    /// Delay between live-camera detections, counted from the previous settle.
    pub live_interval_ms: u64,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            live_interval_ms: 450,
        }
    }
}

impl CadenceConfig {
    pub fn live_interval(&self) -> Duration {
        Duration::from_millis(self.live_interval_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    pub alpha: f32,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    pub width: u32,
    pub height: u32,
    /// RGBA fill used when there is no background.
    pub placeholder: [u8; 4],
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            placeholder: [0x2b, 0x2d, 0x31, 0xff],
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub index: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub directory: PathBuf,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("snapshots"),
        }
    }
}

impl AppConfig {
    /// Loads from `FACEFIT_CONFIG` or `facefit.json`. A missing file yields the
    /// defaults; a malformed one is logged and ignored.
    pub fn load() -> Self {
        let path = env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        if !path.exists() {
            log::info!("no config at {}, using defaults", path.display());
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => {
                log::info!("loaded configuration from {}", path.display());
                config
            }
            Err(err) => {
                log::warn!("ignoring config {}: {err:#}", path.display());
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let mut config: AppConfig =
            serde_json::from_str(content).context("failed to parse configuration")?;
        if config.catalog.is_empty() {
            config.catalog = crate::catalog::default_catalog();
        }
        if !config.detector.is_usable() {
            log::warn!(
                "detector input sizes {}/{} are invalid, using defaults",
                config.detector.input_size,
                config.detector.landmark_input_size
            );
            config.detector = DetectorConfig::default();
        }
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
    }
}
