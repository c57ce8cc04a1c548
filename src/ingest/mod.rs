//! Frame sources.
//!
//! This module turns a `Source` into a stream of decoded `Frame`s:
//! - Image files and lists of image files (always available)
//! - Directories, expanded to their image and video files
//! - Local video files and network streams (feature: ingest-ffmpeg)
//! - Cameras by index (feature: ingest-v4l2)
//! - Synthetic `stub://` frames (testing)
//!
//! Readers only decode. Stride, frame limits and Ctrl-C handling are applied
//! uniformly by `LimitedReader`.

#[cfg(feature = "ingest-ffmpeg")]
pub(crate) mod file_ffmpeg;
mod source;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub(crate) mod v4l2;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::frame::{Frame, FrameKind};

pub use source::{list_media, media_kind, MediaKind, Source, IMAGE_EXTENSIONS, VIDEO_EXTENSIONS};
pub use synthetic::SyntheticReader;

/// Produces frames until the source is exhausted.
pub trait FrameReader {
    /// Next decoded frame, or `None` at end of input.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// Shared flag that ends unbounded capture (camera, streams) early.
#[derive(Clone, Debug, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag on Ctrl-C. Only one handler can be installed per process.
    pub fn install_ctrlc(&self) -> Result<()> {
        let flag = self.clone();
        ctrlc::set_handler(move || {
            log::warn!("interrupt received, finishing current frame");
            flag.trigger();
        })
        .context("failed to install Ctrl-C handler")
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Options applied while reading a source.
#[derive(Clone, Debug)]
pub struct ReaderOptions {
    /// Keep every Nth frame of video, stream and camera sources.
    pub vid_stride: u32,
    /// Stop after this many delivered frames.
    pub max_frames: Option<u64>,
    pub stop: StopFlag,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            vid_stride: 1,
            max_frames: None,
            stop: StopFlag::new(),
        }
    }
}

impl Source {
    /// Open a reader over this source.
    pub fn open(&self, options: &ReaderOptions) -> Result<Box<dyn FrameReader>> {
        let inner: Box<dyn FrameReader> = match self {
            Source::Image(path) => Box::new(PathListReader::new(vec![path.clone()])),
            Source::Images(paths) => Box::new(PathListReader::new(paths.clone())),
            Source::Directory(dir) => Box::new(PathListReader::new(list_media(dir)?)),
            Source::Video(path) => open_video(&path.to_string_lossy(), true)?,
            Source::Stream(url) => open_video(url, false)?,
            Source::Camera(index) => open_camera(*index)?,
            Source::Synthetic(url) => Box::new(SyntheticReader::parse(url)?),
        };
        Ok(Box::new(LimitedReader::new(inner, options.clone())))
    }
}

fn read_image(path: &Path) -> Result<Frame> {
    let image = image::open(path)
        .with_context(|| format!("failed to decode image {}", path.display()))?
        .to_rgb8();
    Ok(Frame::still(image, path.to_path_buf()))
}

#[cfg(feature = "ingest-ffmpeg")]
fn open_video(target: &str, is_file: bool) -> Result<Box<dyn FrameReader>> {
    Ok(Box::new(file_ffmpeg::FfmpegReader::open(target, is_file)?))
}

#[cfg(not(feature = "ingest-ffmpeg"))]
fn open_video(target: &str, _is_file: bool) -> Result<Box<dyn FrameReader>> {
    anyhow::bail!(
        "cannot decode '{}': video and stream input requires the ingest-ffmpeg feature",
        target
    )
}

#[cfg(feature = "ingest-v4l2")]
fn open_camera(index: u32) -> Result<Box<dyn FrameReader>> {
    let mut source = v4l2::V4l2Reader::new(v4l2::V4l2Config {
        device: format!("/dev/video{index}"),
        index,
        ..v4l2::V4l2Config::default()
    });
    source.connect()?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_camera(index: u32) -> Result<Box<dyn FrameReader>> {
    anyhow::bail!(
        "cannot open camera {}: camera capture requires the ingest-v4l2 feature",
        index
    )
}

/// Reads a list of image and video files in order.
struct PathListReader {
    pending: VecDeque<PathBuf>,
    current: Option<Box<dyn FrameReader>>,
}

impl PathListReader {
    fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            pending: paths.into(),
            current: None,
        }
    }
}

impl FrameReader for PathListReader {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(reader) = self.current.as_mut() {
                match reader.next_frame()? {
                    Some(frame) => return Ok(Some(frame)),
                    None => self.current = None,
                }
            }
            let Some(path) = self.pending.pop_front() else {
                return Ok(None);
            };
            match media_kind(&path) {
                Some(MediaKind::Video) => {
                    self.current = Some(open_video(&path.to_string_lossy(), true)?);
                }
                _ => return read_image(&path).map(Some),
            }
        }
    }
}

/// Applies stride, frame limit and the stop flag on top of any reader.
struct LimitedReader {
    inner: Box<dyn FrameReader>,
    options: ReaderOptions,
    delivered: u64,
}

impl LimitedReader {
    fn new(inner: Box<dyn FrameReader>, options: ReaderOptions) -> Self {
        Self {
            inner,
            options,
            delivered: 0,
        }
    }
}

impl FrameReader for LimitedReader {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let stride = u64::from(self.options.vid_stride.max(1));
        loop {
            if self.options.stop.is_set() {
                log::info!("capture stopped after {} frames", self.delivered);
                return Ok(None);
            }
            if let Some(max) = self.options.max_frames {
                if self.delivered >= max {
                    return Ok(None);
                }
            }
            let Some(frame) = self.inner.next_frame()? else {
                return Ok(None);
            };
            if frame.kind == FrameKind::Sequence && frame.index % stride != 0 {
                continue;
            }
            self.delivered += 1;
            return Ok(Some(frame));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn write_png(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(8, 6, image::Rgb([10, 20, 30]))
            .save(&path)
            .unwrap();
        path
    }

    fn drain(mut reader: Box<dyn FrameReader>) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = reader.next_frame().unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn image_list_yields_one_frame_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_png(dir.path(), "a.png");
        let b = write_png(dir.path(), "b.png");

        let frames = drain(
            Source::Images(vec![b.clone(), a.clone()])
                .open(&ReaderOptions::default())
                .unwrap(),
        );
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].source.path(), Some(b.as_path()));
        assert_eq!(frames[1].source.path(), Some(a.as_path()));
        assert_eq!(frames[0].width(), 8);
    }

    #[test]
    fn unreadable_image_propagates_error() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.png");
        std::fs::write(&bad, b"not a png").unwrap();

        let mut reader = Source::Image(bad).open(&ReaderOptions::default()).unwrap();
        assert!(reader.next_frame().is_err());
    }

    #[test]
    fn stride_and_limit_apply_to_sequences() {
        let options = ReaderOptions {
            vid_stride: 2,
            max_frames: Some(2),
            ..ReaderOptions::default()
        };
        let frames = drain(
            Source::Synthetic("stub://cam?frames=10&width=4&height=4".into())
                .open(&options)
                .unwrap(),
        );
        let indices: Vec<u64> = frames.iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn stride_does_not_skip_still_images() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![
            write_png(dir.path(), "a.png"),
            write_png(dir.path(), "b.png"),
            write_png(dir.path(), "c.png"),
        ];
        let options = ReaderOptions {
            vid_stride: 3,
            ..ReaderOptions::default()
        };
        assert_eq!(drain(Source::Images(paths).open(&options).unwrap()).len(), 3);
    }

    #[test]
    fn stop_flag_ends_unbounded_capture() {
        let options = ReaderOptions::default();
        let mut reader = Source::Synthetic("stub://cam?width=4&height=4".into())
            .open(&options)
            .unwrap();
        assert!(reader.next_frame().unwrap().is_some());
        options.stop.trigger();
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[cfg(not(feature = "ingest-ffmpeg"))]
    #[test]
    fn video_without_ffmpeg_is_rejected() {
        let err = Source::Video(PathBuf::from("clip.mp4"))
            .open(&ReaderOptions::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("ingest-ffmpeg"));
    }
}
