#![cfg(feature = "backend-tract")]

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{DetectParams, DetectorBackend};
use crate::detect::names::{coco_names, parse_imgsz, parse_names};
use crate::detect::postprocess::{decode_predictions, letterbox, non_max_suppression, scale_boxes};
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Tract-based backend for YOLO ONNX exports.
///
/// The ONNX graph is parsed once; an optimized plan is built lazily for each
/// input size requested and reused for later frames.
pub struct TractBackend {
    model: InferenceModel,
    plans: HashMap<u32, TypedRunnableModel<TypedModel>>,
    names: Vec<String>,
    native_imgsz: u32,
}

impl TractBackend {
    /// Load an ONNX model from disk.
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let model_path = model_path.as_ref();
        let onnx = tract_onnx::onnx();
        let proto = onnx
            .proto_model_for_path(model_path)
            .with_context(|| format!("failed to read ONNX model from {}", model_path.display()))?;

        let metadata: HashMap<&str, &str> = proto
            .metadata_props
            .iter()
            .map(|entry| (entry.key.as_str(), entry.value.as_str()))
            .collect();
        let names = metadata
            .get("names")
            .map(|raw| parse_names(raw))
            .filter(|names| !names.is_empty())
            .unwrap_or_else(coco_names);
        let native_imgsz = metadata
            .get("imgsz")
            .and_then(|raw| parse_imgsz(raw))
            .unwrap_or(640);

        let model = onnx
            .model_for_proto_model(&proto)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?;

        log::debug!(
            "TractBackend: {} classes, exported at imgsz={}",
            names.len(),
            native_imgsz
        );

        Ok(Self {
            model,
            plans: HashMap::new(),
            names,
            native_imgsz,
        })
    }

    /// Input size the model was exported with.
    pub fn native_imgsz(&self) -> u32 {
        self.native_imgsz
    }

    fn plan(&mut self, imgsz: u32) -> Result<&TypedRunnableModel<TypedModel>> {
        if !self.plans.contains_key(&imgsz) {
            let side = imgsz as usize;
            let plan = self
                .model
                .clone()
                .with_input_fact(0, f32::fact([1, 3, side, side]).into())
                .context("failed to set input fact")?
                .into_optimized()
                .context("failed to optimize ONNX model")?
                .into_runnable()
                .context("failed to build runnable ONNX model")?;
            log::debug!("TractBackend: built plan for imgsz={}", imgsz);
            self.plans.insert(imgsz, plan);
        }
        self.plans
            .get(&imgsz)
            .ok_or_else(|| anyhow!("no plan for imgsz={}", imgsz))
    }
}

fn build_input(image: &image::RgbImage) -> Tensor {
    let (width, height) = image.dimensions();
    tract_ndarray::Array4::from_shape_fn(
        (1, 3, height as usize, width as usize),
        |(_, channel, y, x)| image.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
    )
    .into_tensor()
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn class_names(&self) -> &[String] {
        &self.names
    }

    fn warm_up(&mut self, params: &DetectParams) -> Result<()> {
        self.plan(params.imgsz).map(|_| ())
    }

    fn detect(&mut self, frame: &Frame, params: &DetectParams) -> Result<Vec<Detection>> {
        let (canvas, mapping) = letterbox(frame.image(), params.imgsz)?;
        let input = build_input(&canvas);

        let outputs = self
            .plan(params.imgsz)?
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;

        let shape = view.shape().to_vec();
        let (channels, anchors) = match shape.as_slice() {
            [1, channels, anchors] => (*channels, *anchors),
            other => bail!("unexpected model output shape {:?}", other),
        };
        if channels != 4 + self.names.len() {
            log::debug!(
                "TractBackend: output has {} class channels but {} names are known",
                channels.saturating_sub(4),
                self.names.len()
            );
        }

        let raw: Vec<f32> = view.iter().copied().collect();
        let candidates = decode_predictions(&raw, channels, anchors, params)?;
        let mut detections =
            non_max_suppression(candidates, params.iou, params.agnostic_nms, params.max_det);
        scale_boxes(&mut detections, &mapping, frame.width(), frame.height());
        Ok(detections)
    }
}
