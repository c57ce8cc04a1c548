//! `YoloDetector`: load a model once, run it over any source.
//!
//! ```no_run
//! use yolo_det::{PredictArgs, Source, YoloDetector};
//!
//! let mut det = YoloDetector::new("data/yolo11n.onnx", None)?;
//! let results = det.predict(Source::parse("data/xiaomi_su7.jpg")?, &PredictArgs::default())?;
//! for item in &results {
//!     println!("{} {:?}", item.source, item.detections);
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};

use crate::annotate::{annotate, output_path, write_jpeg, DEFAULT_JPEG_QUALITY};
use crate::detect::{DetectParams, DetectorBackend, Device, FrameResult, StubBackend};
use crate::frame::SourceId;
use crate::ingest::{FrameReader, ReaderOptions, Source, StopFlag};

pub const DEFAULT_OUT_DIR: &str = "runs/pred";

/// Options forwarded unchanged to the engine (backend and reader).
#[derive(Clone, Debug)]
pub struct EngineOptions {
    pub imgsz: u32,
    pub max_det: usize,
    pub classes: Option<Vec<usize>>,
    pub agnostic_nms: bool,
    pub vid_stride: u32,
    pub max_frames: Option<u64>,
    pub jpeg_quality: u8,
    pub stop: StopFlag,
}

impl Default for EngineOptions {
    fn default() -> Self {
        let params = DetectParams::default();
        Self {
            imgsz: params.imgsz,
            max_det: params.max_det,
            classes: None,
            agnostic_nms: false,
            vid_stride: 1,
            max_frames: None,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            stop: StopFlag::new(),
        }
    }
}

/// Arguments of one `predict` call.
#[derive(Clone, Debug)]
pub struct PredictArgs {
    pub conf: f32,
    pub iou: f32,
    /// Write an annotated copy of every frame to `out_dir`.
    pub save: bool,
    pub out_dir: PathBuf,
    pub engine: EngineOptions,
}

impl Default for PredictArgs {
    fn default() -> Self {
        let params = DetectParams::default();
        Self {
            conf: params.conf,
            iou: params.iou,
            save: true,
            out_dir: PathBuf::from(DEFAULT_OUT_DIR),
            engine: EngineOptions::default(),
        }
    }
}

impl PredictArgs {
    /// Reject thresholds outside `[0, 1]`, an `imgsz` that is not a positive
    /// multiple of 32, and zero `max_det`, `vid_stride` or `jpeg_quality`.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.conf) {
            bail!("conf must be within [0, 1], got {}", self.conf);
        }
        if !(0.0..=1.0).contains(&self.iou) {
            bail!("iou must be within [0, 1], got {}", self.iou);
        }
        let engine = &self.engine;
        if engine.imgsz == 0 || engine.imgsz % 32 != 0 {
            bail!("imgsz must be a positive multiple of 32, got {}", engine.imgsz);
        }
        if engine.max_det == 0 {
            bail!("max_det must be greater than zero");
        }
        if engine.vid_stride == 0 {
            bail!("vid_stride must be at least 1");
        }
        if !(1..=100).contains(&engine.jpeg_quality) {
            bail!("jpeg_quality must be within 1..=100, got {}", engine.jpeg_quality);
        }
        Ok(())
    }

    fn detect_params(&self) -> DetectParams {
        DetectParams {
            conf: self.conf,
            iou: self.iou,
            imgsz: self.engine.imgsz,
            max_det: self.engine.max_det,
            classes: self.engine.classes.clone(),
            agnostic_nms: self.engine.agnostic_nms,
        }
    }

    fn reader_options(&self) -> ReaderOptions {
        ReaderOptions {
            vid_stride: self.engine.vid_stride,
            max_frames: self.engine.max_frames,
            stop: self.engine.stop.clone(),
        }
    }
}

/// A loaded detection model plus the device it runs on.
pub struct YoloDetector {
    backend: Box<dyn DetectorBackend>,
    device: Device,
}

impl YoloDetector {
    /// Load the model at `weight_path`.
    ///
    /// Fails with an `io::ErrorKind::NotFound` error when the file is missing.
    /// `stub://` selects the synthetic backend instead of a file.
    pub fn new<P: AsRef<Path>>(weight_path: P, device: Option<&str>) -> Result<Self> {
        let weight_path = weight_path.as_ref();
        let device = device.map(str::parse::<Device>).transpose()?.unwrap_or_default();

        if weight_path.to_string_lossy().starts_with("stub://") {
            return Self::with_backend(StubBackend::new(), device);
        }
        if !weight_path.exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("weight file not found: {}", weight_path.display()),
            )
            .into());
        }

        let detector = Self::from_backend(load_backend(weight_path)?, device)?;
        log::info!(
            "model loaded: {} on {} ({} backend, {} classes)",
            weight_path.display(),
            detector.device,
            detector.backend.name(),
            detector.backend.class_names().len()
        );
        Ok(detector)
    }

    /// Wrap an already constructed backend.
    pub fn with_backend<B: DetectorBackend + 'static>(backend: B, device: Device) -> Result<Self> {
        Self::from_backend(Box::new(backend), device)
    }

    fn from_backend(backend: Box<dyn DetectorBackend>, device: Device) -> Result<Self> {
        if !backend.supports_device(device) {
            bail!(
                "{} backend cannot run on {} (supported: cpu)",
                backend.name(),
                device
            );
        }
        Ok(Self { backend, device })
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn class_names(&self) -> &[String] {
        self.backend.class_names()
    }

    /// Run detection on every frame of `source`.
    ///
    /// Returns one result per frame in reader order. With `args.save`, also
    /// writes an annotated JPEG per frame under `args.out_dir`.
    pub fn predict(&mut self, source: Source, args: &PredictArgs) -> Result<Vec<FrameResult>> {
        self.predict_iter(source, args)?.collect()
    }

    /// Streaming form of `predict`: frames are read and detected lazily.
    pub fn predict_iter(&mut self, source: Source, args: &PredictArgs) -> Result<Predictions<'_>> {
        args.validate()?;
        if args.save {
            std::fs::create_dir_all(&args.out_dir).with_context(|| {
                format!("failed to create output dir {}", args.out_dir.display())
            })?;
        }
        let params = args.detect_params();
        self.backend.warm_up(&params)?;
        let reader = source.open(&args.reader_options())?;
        log::debug!("predicting on {} with {:?}", source, params);

        Ok(Predictions {
            detector: self,
            reader,
            params,
            save_to: args.save.then(|| args.out_dir.clone()),
            jpeg_quality: args.engine.jpeg_quality,
            position: 0,
            finished: false,
        })
    }
}

fn load_backend(weight_path: &Path) -> Result<Box<dyn DetectorBackend>> {
    let ext = weight_path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "onnx" => load_onnx(weight_path),
        "pt" | "pth" => Err(anyhow!(
            "{} is a PyTorch checkpoint; export it to ONNX first (yolo export model={} format=onnx)",
            weight_path.display(),
            weight_path.display()
        )),
        other => Err(anyhow!(
            "unsupported weight format '{}' for {} (expected .onnx)",
            other,
            weight_path.display()
        )),
    }
}

#[cfg(feature = "backend-tract")]
fn load_onnx(weight_path: &Path) -> Result<Box<dyn DetectorBackend>> {
    Ok(Box::new(crate::detect::TractBackend::new(weight_path)?))
}

#[cfg(not(feature = "backend-tract"))]
fn load_onnx(weight_path: &Path) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!(
        "cannot load {}: ONNX inference requires the backend-tract feature",
        weight_path.display()
    ))
}

/// Lazily evaluated prediction results.
pub struct Predictions<'a> {
    detector: &'a mut YoloDetector,
    reader: Box<dyn FrameReader>,
    params: DetectParams,
    save_to: Option<PathBuf>,
    jpeg_quality: u8,
    position: u64,
    finished: bool,
}

impl Predictions<'_> {
    fn step(&mut self) -> Result<Option<FrameResult>> {
        let Some(frame) = self.reader.next_frame()? else {
            return Ok(None);
        };
        let position = self.position;
        self.position += 1;

        let detections = self.detector.backend.detect(&frame, &self.params)?;

        if let Some(out_dir) = &self.save_to {
            let path = output_path(out_dir, &frame, position);
            let annotated = annotate(
                frame.image(),
                &detections,
                self.detector.backend.class_names(),
            );
            write_jpeg(&annotated, &path, self.jpeg_quality)?;
            log::debug!("saved {}", path.display());
        }

        let source = match frame.source {
            SourceId::Index(_) => SourceId::Index(position),
            other => other,
        };
        log::debug!("{}: {} detections", source, detections.len());
        Ok(Some(FrameResult { source, detections }))
    }
}

impl Iterator for Predictions<'_> {
    type Item = Result<FrameResult>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.step() {
            Ok(Some(result)) => Some(Ok(result)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}
