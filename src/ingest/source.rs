use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};

pub const IMAGE_EXTENSIONS: &[&str] = &[
    "bmp", "jpeg", "jpg", "png", "tif", "tiff", "webp",
];
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "asf", "avi", "gif", "m4v", "mkv", "mov", "mp4", "mpeg", "mpg", "ts", "wmv", "webm",
];

/// Any input `YoloDetector::predict` accepts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Source {
    Image(PathBuf),
    Images(Vec<PathBuf>),
    Directory(PathBuf),
    Video(PathBuf),
    Camera(u32),
    Stream(String),
    /// `stub://name?frames=N&width=W&height=H` synthetic frames.
    Synthetic(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

/// Classify a path by extension.
pub fn media_kind(path: &Path) -> Option<MediaKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Image)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Video)
    } else {
        None
    }
}

impl Source {
    /// Interpret a command-line style source string.
    ///
    /// Integers select a camera, `stub://` selects synthetic frames, any other
    /// `scheme://` is a stream, existing directories are expanded, and files
    /// are classified by extension.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            bail!("source must not be empty");
        }
        if let Ok(index) = raw.parse::<u32>() {
            return Ok(Source::Camera(index));
        }
        if raw.starts_with("stub://") {
            return Ok(Source::Synthetic(raw.to_string()));
        }
        if raw.contains("://") {
            url::Url::parse(raw).with_context(|| format!("invalid stream URL '{raw}'"))?;
            return Ok(Source::Stream(raw.to_string()));
        }
        Self::from_path(raw)
    }

    /// Classify a filesystem path.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.is_dir() {
            return Ok(Source::Directory(path.to_path_buf()));
        }
        match media_kind(path) {
            Some(MediaKind::Image) => Ok(Source::Image(path.to_path_buf())),
            Some(MediaKind::Video) => Ok(Source::Video(path.to_path_buf())),
            None => Err(anyhow!(
                "unsupported source '{}': expected an image ({}) or video ({}) file",
                path.display(),
                IMAGE_EXTENSIONS.join(", "),
                VIDEO_EXTENSIONS.join(", ")
            )),
        }
    }

    /// Expand a list of sources given on the command line.
    ///
    /// Several image paths collapse into `Source::Images`; anything else must
    /// be given alone.
    pub fn parse_many<S: AsRef<str>>(raw: &[S]) -> Result<Self> {
        match raw {
            [] => bail!("no source given"),
            [single] => Self::parse(single.as_ref()),
            many => {
                let mut paths = Vec::with_capacity(many.len());
                for item in many {
                    match Self::parse(item.as_ref())? {
                        Source::Image(path) => paths.push(path),
                        other => bail!(
                            "only image files can be combined into one source, got {}",
                            other
                        ),
                    }
                }
                Ok(Source::Images(paths))
            }
        }
    }

    /// Whether frames from this source carry no path or URL.
    pub fn is_sourceless(&self) -> bool {
        matches!(self, Source::Camera(_) | Source::Synthetic(_))
    }
}

impl From<Vec<PathBuf>> for Source {
    fn from(paths: Vec<PathBuf>) -> Self {
        Source::Images(paths)
    }
}

impl From<u32> for Source {
    fn from(index: u32) -> Self {
        Source::Camera(index)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Image(path) | Source::Directory(path) | Source::Video(path) => {
                write!(f, "{}", path.display())
            }
            Source::Images(paths) => write!(f, "{} images", paths.len()),
            Source::Camera(index) => write!(f, "camera {index}"),
            Source::Stream(url) | Source::Synthetic(url) => f.write_str(url),
        }
    }
}

/// List the image and video files directly inside `dir`, sorted by name.
pub fn list_media(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read source directory {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("failed to list {}", dir.display()))?
            .path();
        if path.is_file() && media_kind(&path).is_some() {
            files.push(path);
        }
    }
    files.sort();
    if files.is_empty() {
        bail!("no images or videos found in {}", dir.display());
    }
    Ok(files)
}
