use serde::{Deserialize, Serialize};

use crate::frame::SourceId;

/// One detected object, in original-frame pixel coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Corners `[x1, y1, x2, y2]`.
    pub xyxy: [f32; 4],
    /// Class id, an index into the model's class names.
    pub cls: usize,
    /// Confidence in `[0, 1]`.
    pub conf: f32,
}

impl Detection {
    pub fn width(&self) -> f32 {
        self.xyxy[2] - self.xyxy[0]
    }

    pub fn height(&self) -> f32 {
        self.xyxy[3] - self.xyxy[1]
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Box is axis-aligned with non-negative extent and confidence is in range.
    pub fn is_well_formed(&self) -> bool {
        self.width() >= 0.0 && self.height() >= 0.0 && (0.0..=1.0).contains(&self.conf)
    }
}

/// Detections for one image or video frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameResult {
    pub source: SourceId,
    pub detections: Vec<Detection>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_geometry() {
        let det = Detection {
            xyxy: [10.0, 20.0, 30.0, 60.0],
            cls: 2,
            conf: 0.5,
        };
        assert_eq!(det.width(), 20.0);
        assert_eq!(det.height(), 40.0);
        assert_eq!(det.area(), 800.0);
        assert!(det.is_well_formed());

        let inverted = Detection {
            xyxy: [30.0, 20.0, 10.0, 60.0],
            ..det
        };
        assert!(!inverted.is_well_formed());
        assert_eq!(inverted.area(), 0.0);
    }

    #[test]
    fn frame_result_json_shape() {
        let result = FrameResult {
            source: SourceId::Index(0),
            detections: vec![Detection {
                xyxy: [1.0, 2.0, 3.0, 4.0],
                cls: 0,
                conf: 0.75,
            }],
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["source"], "0");
        assert_eq!(json["detections"][0]["cls"], 0);
        assert_eq!(json["detections"][0]["xyxy"][2], 3.0);
    }
}
