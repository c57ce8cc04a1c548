//! Decoded frames and their source identifiers.
//!
//! Every reader in `ingest` produces `Frame` values: one RGB image plus where it
//! came from. The identifier is what ends up in `FrameResult::source` and what
//! the annotator uses to name saved images.

use std::fmt;
use std::path::{Path, PathBuf};

use image::RgbImage;
use serde::{Serialize, Serializer};

/// Where a frame came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceId {
    /// Image file, or a video file the frame was decoded from.
    Path(PathBuf),
    /// Network stream (rtsp://, http://, ...).
    Stream(String),
    /// Sourceless frame (camera, synthetic), identified by position.
    Index(u64),
}

impl SourceId {
    pub fn path(&self) -> Option<&Path> {
        match self {
            SourceId::Path(path) => Some(path),
            _ => None,
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::Path(path) => write!(f, "{}", path.display()),
            SourceId::Stream(url) => f.write_str(url),
            SourceId::Index(idx) => write!(f, "{idx}"),
        }
    }
}

impl Serialize for SourceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Whether a frame stands alone or is one of many from the same source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    Still,
    Sequence,
}

/// One decoded RGB frame.
pub struct Frame {
    image: RgbImage,
    pub source: SourceId,
    /// Position of the frame within its own source (0 for still images).
    pub index: u64,
    pub kind: FrameKind,
}

impl Frame {
    pub fn new(image: RgbImage, source: SourceId, index: u64, kind: FrameKind) -> Self {
        Self {
            image,
            source,
            index,
            kind,
        }
    }

    pub fn still(image: RgbImage, path: PathBuf) -> Self {
        Self::new(image, SourceId::Path(path), 0, FrameKind::Still)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("source", &self.source)
            .field("index", &self.index)
            .field("kind", &self.kind)
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_id_displays_like_the_input() {
        assert_eq!(
            SourceId::Path(PathBuf::from("images/car.jpg")).to_string(),
            "images/car.jpg"
        );
        assert_eq!(
            SourceId::Stream("rtsp://10.0.0.2/live".into()).to_string(),
            "rtsp://10.0.0.2/live"
        );
        assert_eq!(SourceId::Index(7).to_string(), "7");
    }

    #[test]
    fn source_id_serializes_as_string() {
        let json = serde_json::to_string(&SourceId::Index(3)).unwrap();
        assert_eq!(json, "\"3\"");
        let json = serde_json::to_string(&SourceId::Path(PathBuf::from("a.png"))).unwrap();
        assert_eq!(json, "\"a.png\"");
    }

    #[test]
    fn still_frame_reports_dimensions() {
        let frame = Frame::still(RgbImage::new(32, 16), PathBuf::from("x.png"));
        assert_eq!(frame.width(), 32);
        assert_eq!(frame.height(), 16);
        assert_eq!(frame.kind, FrameKind::Still);
        assert_eq!(frame.source.path(), Some(Path::new("x.png")));
    }
}
