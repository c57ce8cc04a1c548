use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Compute device a model runs on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Device {
    #[default]
    Cpu,
    Cuda(u32),
}

impl FromStr for Device {
    type Err = anyhow::Error;

    /// Accepts `cpu`, `cuda`, `cuda:N`, or a bare ordinal `N` (meaning `cuda:N`).
    fn from_str(s: &str) -> Result<Self> {
        let value = s.trim().to_ascii_lowercase();
        if value == "cpu" {
            return Ok(Device::Cpu);
        }
        if value == "cuda" {
            return Ok(Device::Cuda(0));
        }
        let ordinal = value.strip_prefix("cuda:").unwrap_or(&value);
        ordinal
            .parse::<u32>()
            .map(Device::Cuda)
            .map_err(|_| anyhow!("invalid device '{}' (expected cpu, cuda, cuda:N or N)", s))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
        }
    }
}

/// Per-call detection parameters handed to a backend unchanged.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectParams {
    /// Minimum confidence to keep a candidate.
    pub conf: f32,
    /// IoU above which NMS suppresses the weaker box.
    pub iou: f32,
    /// Square model input size in pixels.
    pub imgsz: u32,
    /// Maximum detections kept per frame.
    pub max_det: usize,
    /// Keep only these class ids.
    pub classes: Option<Vec<usize>>,
    /// Run NMS across classes instead of per class.
    pub agnostic_nms: bool,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            conf: 0.25,
            iou: 0.45,
            imgsz: 640,
            max_det: 300,
            classes: None,
            agnostic_nms: false,
        }
    }
}

impl DetectParams {
    pub fn keeps_class(&self, cls: usize) -> bool {
        self.classes
            .as_ref()
            .map_or(true, |classes| classes.contains(&cls))
    }
}

/// Detection engine behind `YoloDetector`.
///
/// A backend owns the loaded model. It receives whole frames and returns boxes
/// already mapped back to frame pixel coordinates, filtered and suppressed.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Class names indexed by class id.
    fn class_names(&self) -> &[String];

    /// Returns true when the backend can run on `device`.
    fn supports_device(&self, device: Device) -> bool {
        matches!(device, Device::Cpu)
    }

    /// Run detection on one frame.
    fn detect(&mut self, frame: &Frame, params: &DetectParams) -> Result<Vec<Detection>>;

    /// Optional warm-up hook, called once per prediction call.
    fn warm_up(&mut self, _params: &DetectParams) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_selectors() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("CUDA".parse::<Device>().unwrap(), Device::Cuda(0));
        assert_eq!("cuda:1".parse::<Device>().unwrap(), Device::Cuda(1));
        assert_eq!("2".parse::<Device>().unwrap(), Device::Cuda(2));
        assert!("tpu".parse::<Device>().is_err());
        assert!("cuda:x".parse::<Device>().is_err());
    }

    #[test]
    fn device_display_round_trips_through_parse() {
        for device in [Device::Cpu, Device::Cuda(3)] {
            assert_eq!(device.to_string().parse::<Device>().unwrap(), device);
        }
    }

    #[test]
    fn class_filter() {
        let mut params = DetectParams::default();
        assert!(params.keeps_class(42));
        params.classes = Some(vec![0, 2]);
        assert!(params.keeps_class(2));
        assert!(!params.keeps_class(1));
    }
}
