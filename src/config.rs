use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::annotate::DEFAULT_JPEG_QUALITY;
use crate::detect::{DetectParams, Device};
use crate::package::PipelineConfig;
use crate::predictor::{EngineOptions, PredictArgs, DEFAULT_OUT_DIR};

pub const CONFIG_ENV: &str = "YOLO_DET_CONFIG";
const DEFAULT_WEIGHTS: &str = "data/yolo11n.onnx";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AppConfigFile {
    predict: Option<PredictConfigFile>,
    package: Option<PipelineConfig>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PredictConfigFile {
    weights: Option<PathBuf>,
    device: Option<String>,
    conf: Option<f32>,
    iou: Option<f32>,
    save: Option<bool>,
    out_dir: Option<PathBuf>,
    imgsz: Option<u32>,
    max_det: Option<usize>,
    classes: Option<Vec<usize>>,
    agnostic_nms: Option<bool>,
    vid_stride: Option<u32>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub predict: PredictSettings,
    pub package: PipelineConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictSettings {
    pub weights: PathBuf,
    /// Kept as text; `YoloDetector::new` parses it.
    pub device: Option<String>,
    pub conf: f32,
    pub iou: f32,
    pub save: bool,
    pub out_dir: PathBuf,
    pub imgsz: u32,
    pub max_det: usize,
    pub classes: Option<Vec<usize>>,
    pub agnostic_nms: bool,
    pub vid_stride: u32,
    pub jpeg_quality: u8,
}

impl Default for PredictSettings {
    fn default() -> Self {
        Self::from_file(PredictConfigFile::default())
    }
}

impl PredictSettings {
    fn from_file(file: PredictConfigFile) -> Self {
        let params = DetectParams::default();
        Self {
            weights: file
                .weights
                .unwrap_or_else(|| PathBuf::from(DEFAULT_WEIGHTS)),
            device: file.device,
            conf: file.conf.unwrap_or(params.conf),
            iou: file.iou.unwrap_or(params.iou),
            save: file.save.unwrap_or(true),
            out_dir: file
                .out_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUT_DIR)),
            imgsz: file.imgsz.unwrap_or(params.imgsz),
            max_det: file.max_det.unwrap_or(params.max_det),
            classes: file.classes,
            agnostic_nms: file.agnostic_nms.unwrap_or(false),
            vid_stride: file.vid_stride.unwrap_or(1),
            jpeg_quality: file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.predict_args().validate()?;
        if let Some(device) = &self.device {
            device.parse::<Device>()?;
        }
        Ok(())
    }

    /// Arguments for one `predict` call; `max_frames` and the stop flag stay
    /// at their defaults.
    pub fn predict_args(&self) -> PredictArgs {
        PredictArgs {
            conf: self.conf,
            iou: self.iou,
            save: self.save,
            out_dir: self.out_dir.clone(),
            engine: EngineOptions {
                imgsz: self.imgsz,
                max_det: self.max_det,
                classes: self.classes.clone(),
                agnostic_nms: self.agnostic_nms,
                vid_stride: self.vid_stride,
                jpeg_quality: self.jpeg_quality,
                ..EngineOptions::default()
            },
        }
    }
}

impl AppConfig {
    /// Defaults, then the file named by `YOLO_DET_CONFIG`, then environment
    /// overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_ENV).ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let cfg = Self::from_file(read_config_file(path)?);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AppConfigFile) -> Self {
        Self {
            predict: PredictSettings::from_file(file.predict.unwrap_or_default()),
            package: file.package.unwrap_or_default(),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(weights) = env_value("YOLO_DET_WEIGHTS") {
            self.predict.weights = PathBuf::from(weights);
        }
        if let Some(device) = env_value("YOLO_DET_DEVICE") {
            self.predict.device = Some(device);
        }
        if let Some(out_dir) = env_value("YOLO_DET_OUT_DIR") {
            self.predict.out_dir = PathBuf::from(out_dir);
        }
        if let Some(conf) = env_value("YOLO_DET_CONF") {
            self.predict.conf = conf
                .parse()
                .map_err(|_| anyhow!("YOLO_DET_CONF must be a number, got '{}'", conf))?;
        }
        if let Some(iou) = env_value("YOLO_DET_IOU") {
            self.predict.iou = iou
                .parse()
                .map_err(|_| anyhow!("YOLO_DET_IOU must be a number, got '{}'", iou))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.predict.validate()?;
        self.package.validate()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_file(AppConfigFile::default())
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<AppConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
