//! Pre- and post-processing shared by model backends.
//!
//! YOLOv8/YOLOv11 ONNX exports take a letterboxed `[1, 3, S, S]` input and
//! produce a `[1, 4 + nc, anchors]` output: box centre/size followed by one
//! score per class for every anchor.

use anyhow::{bail, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use crate::detect::backend::DetectParams;
use crate::detect::result::Detection;

/// Grey used by ultralytics for letterbox padding.
pub const PAD_VALUE: u8 = 114;

/// Mapping between original-frame and model-input coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub size: u32,
}

/// Resize `image` into a `size`x`size` canvas, keeping aspect ratio and
/// centring it on grey padding.
pub fn letterbox(image: &RgbImage, size: u32) -> Result<(RgbImage, Letterbox)> {
    if size == 0 {
        bail!("letterbox size must be positive");
    }
    let (width, height) = image.dimensions();
    let scale = (size as f32 / width.max(1) as f32).min(size as f32 / height.max(1) as f32);
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, size);
    let left = ((size - new_w) as f32 / 2.0 - 0.1).round().max(0.0);
    let top = ((size - new_h) as f32 / 2.0 - 0.1).round().max(0.0);

    let mut canvas = RgbImage::from_pixel(size, size, Rgb([PAD_VALUE; 3]));
    if (new_w, new_h) == (width, height) {
        imageops::replace(&mut canvas, image, left as i64, top as i64);
    } else {
        let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);
        imageops::replace(&mut canvas, &resized, left as i64, top as i64);
    }

    Ok((
        canvas,
        Letterbox {
            scale,
            pad_x: left,
            pad_y: top,
            size,
        },
    ))
}

/// Decode a raw `[4 + nc, anchors]` prediction block (channel-major) into
/// candidate boxes in model-input coordinates.
///
/// Applies the confidence threshold and class filter; does not suppress.
pub fn decode_predictions(
    output: &[f32],
    channels: usize,
    anchors: usize,
    params: &DetectParams,
) -> Result<Vec<Detection>> {
    if channels <= 4 {
        bail!("prediction block needs more than 4 channels, got {}", channels);
    }
    if output.len() != channels * anchors {
        bail!(
            "prediction block has {} values, expected {}x{}",
            output.len(),
            channels,
            anchors
        );
    }

    let at = |channel: usize, anchor: usize| output[channel * anchors + anchor];
    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let mut best_cls = 0;
        let mut best_score = f32::NEG_INFINITY;
        for channel in 4..channels {
            let score = at(channel, anchor);
            if score > best_score {
                best_score = score;
                best_cls = channel - 4;
            }
        }
        if !best_score.is_finite() || best_score <= params.conf || !params.keeps_class(best_cls) {
            continue;
        }

        let (cx, cy) = (at(0, anchor), at(1, anchor));
        let (w, h) = (at(2, anchor).max(0.0), at(3, anchor).max(0.0));
        candidates.push(Detection {
            xyxy: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
            cls: best_cls,
            conf: best_score.clamp(0.0, 1.0),
        });
    }
    Ok(candidates)
}

/// Intersection over union of two `xyxy` boxes.
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = ix * iy;
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Greedy non-maximum suppression.
///
/// Boxes of different classes never suppress each other unless `agnostic`.
/// Output is sorted by descending confidence and holds at most `max_det` boxes.
pub fn non_max_suppression(
    mut detections: Vec<Detection>,
    iou_threshold: f32,
    agnostic: bool,
    max_det: usize,
) -> Vec<Detection> {
    detections.sort_by(|a, b| b.conf.total_cmp(&a.conf));

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len().min(max_det));
    for candidate in detections {
        if kept.len() >= max_det {
            break;
        }
        let suppressed = kept.iter().any(|k| {
            (agnostic || k.cls == candidate.cls) && iou(&k.xyxy, &candidate.xyxy) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

/// Map boxes from model-input coordinates back onto a `width`x`height` frame,
/// clipping to the frame.
pub fn scale_boxes(detections: &mut [Detection], letterbox: &Letterbox, width: u32, height: u32) {
    let (w, h) = (width as f32, height as f32);
    for det in detections {
        let [x1, y1, x2, y2] = det.xyxy;
        det.xyxy = [
            ((x1 - letterbox.pad_x) / letterbox.scale).clamp(0.0, w),
            ((y1 - letterbox.pad_y) / letterbox.scale).clamp(0.0, h),
            ((x2 - letterbox.pad_x) / letterbox.scale).clamp(0.0, w),
            ((y2 - letterbox.pad_y) / letterbox.scale).clamp(0.0, h),
        ];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(xyxy: [f32; 4], cls: usize, conf: f32) -> Detection {
        Detection { xyxy, cls, conf }
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = [0.0, 0.0, 10.0, 10.0];
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(iou(&a, &[20.0, 20.0, 30.0, 30.0]), 0.0);
        let half = iou(&a, &[5.0, 0.0, 15.0, 10.0]);
        assert!((half - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn nms_is_class_aware_by_default() {
        let dets = vec![
            det([0.0, 0.0, 10.0, 10.0], 0, 0.9),
            det([1.0, 1.0, 11.0, 11.0], 0, 0.8),
            det([1.0, 1.0, 11.0, 11.0], 1, 0.7),
        ];
        let kept = non_max_suppression(dets.clone(), 0.45, false, 300);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].conf, 0.9);
        assert_eq!(kept[1].cls, 1);

        let kept = non_max_suppression(dets, 0.45, true, 300);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn nms_respects_max_det() {
        let dets = (0..10)
            .map(|i| det([i as f32 * 20.0, 0.0, i as f32 * 20.0 + 10.0, 10.0], 0, 0.5))
            .collect();
        assert_eq!(non_max_suppression(dets, 0.45, false, 4).len(), 4);
    }

    #[test]
    fn letterbox_pads_short_side() {
        let image = RgbImage::from_pixel(320, 160, Rgb([255, 0, 0]));
        let (canvas, lb) = letterbox(&image, 640).unwrap();
        assert_eq!(canvas.dimensions(), (640, 640));
        assert_eq!(lb.scale, 2.0);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 160.0);
        assert_eq!(canvas.get_pixel(5, 5), &Rgb([PAD_VALUE; 3]));
        assert_eq!(canvas.get_pixel(320, 320), &Rgb([255, 0, 0]));
    }

    #[test]
    fn letterbox_rejects_zero_size() {
        assert!(letterbox(&RgbImage::new(10, 10), 0).is_err());
    }

    #[test]
    fn scale_boxes_undoes_letterbox_and_clips() {
        let lb = Letterbox {
            scale: 2.0,
            pad_x: 0.0,
            pad_y: 160.0,
            size: 640,
        };
        let mut dets = vec![
            det([100.0, 200.0, 300.0, 400.0], 0, 0.9),
            det([600.0, 100.0, 700.0, 500.0], 0, 0.9),
        ];
        scale_boxes(&mut dets, &lb, 320, 160);
        assert_eq!(dets[0].xyxy, [50.0, 20.0, 150.0, 120.0]);
        assert_eq!(dets[1].xyxy, [300.0, 0.0, 320.0, 160.0]);
    }

    #[test]
    fn decode_picks_best_class_and_filters() {
        // 6 channels (4 box + 2 classes), 3 anchors, channel-major.
        let output = vec![
            50.0, 10.0, 30.0, // cx
            50.0, 10.0, 30.0, // cy
            20.0, 4.0, 6.0, // w
            10.0, 4.0, 6.0, // h
            0.1, 0.9, 0.05, // class 0
            0.8, 0.2, 0.1, // class 1
        ];
        let params = DetectParams::default();
        let dets = decode_predictions(&output, 6, 3, &params).unwrap();
        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].cls, 1);
        assert_eq!(dets[0].xyxy, [40.0, 45.0, 60.0, 55.0]);
        assert_eq!(dets[1].cls, 0);

        let only_zero = DetectParams {
            classes: Some(vec![0]),
            ..DetectParams::default()
        };
        let dets = decode_predictions(&output, 6, 3, &only_zero).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].cls, 0);
    }

    #[test]
    fn decode_rejects_mismatched_shape() {
        let params = DetectParams::default();
        assert!(decode_predictions(&[0.0; 10], 6, 3, &params).is_err());
        assert!(decode_predictions(&[0.0; 12], 4, 3, &params).is_err());
    }
}
