use anyhow::Result;

use crate::detect::backend::{DetectParams, DetectorBackend};
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Stub backend for testing and dry runs (`stub://` weights).
///
/// Reports one object of class 0 covering the centre half of every frame.
pub struct StubBackend {
    names: Vec<String>,
    confidence: f32,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            names: vec!["object".to_string()],
            confidence: 0.9,
        }
    }

    /// Override the confidence reported for every frame.
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn class_names(&self) -> &[String] {
        &self.names
    }

    fn detect(&mut self, frame: &Frame, params: &DetectParams) -> Result<Vec<Detection>> {
        if self.confidence <= params.conf || !params.keeps_class(0) || params.max_det == 0 {
            return Ok(Vec::new());
        }
        let (w, h) = (frame.width() as f32, frame.height() as f32);
        Ok(vec![Detection {
            xyxy: [w * 0.25, h * 0.25, w * 0.75, h * 0.75],
            cls: 0,
            conf: self.confidence,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::path::PathBuf;

    #[test]
    fn stub_backend_reports_centre_box() {
        let mut backend = StubBackend::new();
        let frame = Frame::still(RgbImage::new(100, 40), PathBuf::from("a.png"));

        let dets = backend.detect(&frame, &DetectParams::default()).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].xyxy, [25.0, 10.0, 75.0, 30.0]);
        assert_eq!(dets[0].conf, 0.9);
    }

    #[test]
    fn stub_backend_honours_threshold_and_class_filter() {
        let mut backend = StubBackend::new().with_confidence(0.3);
        let frame = Frame::still(RgbImage::new(10, 10), PathBuf::from("a.png"));

        let strict = DetectParams {
            conf: 0.5,
            ..DetectParams::default()
        };
        assert!(backend.detect(&frame, &strict).unwrap().is_empty());

        let other_class = DetectParams {
            classes: Some(vec![3]),
            ..DetectParams::default()
        };
        assert!(backend.detect(&frame, &other_class).unwrap().is_empty());
    }
}
