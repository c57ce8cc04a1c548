//! yolo-det
//!
//! A thin wrapper around a pretrained YOLO detection model plus a release
//! packaging pipeline.
//!
//! # Module Structure
//!
//! - `frame`: decoded frames and where they came from (`Frame`, `SourceId`)
//! - `ingest`: frame sources (images, directories, video, streams, cameras)
//! - `detect`: the inference seam (`DetectorBackend`, tract ONNX backend,
//!   letterbox/NMS post-processing)
//! - `annotate`: box and label rendering, JPEG output naming
//! - `predictor`: `YoloDetector`, the load-once / predict-many wrapper
//! - `package`: clean → copy → compile → relocate → strip → metadata → bundle
//! - `config`, `ui`: TOML/env configuration and stage progress output

pub mod annotate;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod package;
pub mod predictor;
pub mod ui;

pub use config::{AppConfig, PredictSettings};
pub use detect::{DetectParams, Detection, DetectorBackend, Device, FrameResult, StubBackend};
#[cfg(feature = "backend-tract")]
pub use detect::TractBackend;
pub use frame::{Frame, FrameKind, SourceId};
pub use ingest::{FrameReader, ReaderOptions, Source, StopFlag};
pub use package::{Pipeline, PipelineConfig, PipelineOutput, Stage};
pub use predictor::{EngineOptions, PredictArgs, Predictions, YoloDetector};
