//! Synthetic frame source (`stub://`) for tests and dry runs.
//!
//! `stub://<name>?frames=N&width=W&height=H` produces `N` frames (unbounded when
//! `frames` is omitted) of `W`x`H` pixels. Frames behave like camera frames:
//! they carry no path and are numbered from zero.

use anyhow::{anyhow, bail, Context, Result};
use image::RgbImage;

use super::FrameReader;
use crate::frame::{Frame, FrameKind, SourceId};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyntheticConfig {
    pub name: String,
    pub frames: Option<u64>,
    pub width: u32,
    pub height: u32,
}

pub struct SyntheticReader {
    config: SyntheticConfig,
    frame_count: u64,
    /// Simulated scene state, bumped every 50 frames.
    scene_state: u8,
}

impl SyntheticReader {
    pub fn new(config: SyntheticConfig) -> Self {
        log::info!(
            "SyntheticReader: {} ({}x{}, {} frames)",
            config.name,
            config.width,
            config.height,
            config
                .frames
                .map_or_else(|| "unbounded".to_string(), |n| n.to_string())
        );
        Self {
            config,
            frame_count: 0,
            scene_state: 0,
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let url = url::Url::parse(raw).with_context(|| format!("invalid synthetic source '{raw}'"))?;
        if url.scheme() != "stub" {
            bail!("synthetic sources use the stub:// scheme, got '{}'", raw);
        }

        let mut config = SyntheticConfig {
            name: url.host_str().unwrap_or("stub").to_string(),
            frames: None,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        };
        for (key, value) in url.query_pairs() {
            let parse = |what: &str| -> Result<u64> {
                value
                    .parse::<u64>()
                    .map_err(|_| anyhow!("stub:// {} must be an integer, got '{}'", what, value))
            };
            match key.as_ref() {
                "frames" => config.frames = Some(parse("frames")?),
                "width" => config.width = u32::try_from(parse("width")?)?,
                "height" => config.height = u32::try_from(parse("height")?)?,
                other => log::warn!("SyntheticReader: ignoring unknown option '{}'", other),
            }
        }
        if config.width == 0 || config.height == 0 {
            bail!("stub:// frames must have non-zero width and height");
        }
        Ok(Self::new(config))
    }

    /// Fill a frame with a moving diagonal pattern.
    fn generate_synthetic_pixels(&mut self) -> RgbImage {
        if self.frame_count > 0 && self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let shift = self.frame_count + self.scene_state as u64;
        RgbImage::from_fn(self.config.width, self.config.height, |x, y| {
            let v = ((x as u64 + y as u64 + shift) % 256) as u8;
            image::Rgb([v, v.wrapping_add(85), v.wrapping_add(170)])
        })
    }
}

impl FrameReader for SyntheticReader {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self
            .config
            .frames
            .is_some_and(|limit| self.frame_count >= limit)
        {
            return Ok(None);
        }
        let image = self.generate_synthetic_pixels();
        let index = self.frame_count;
        self.frame_count += 1;
        Ok(Some(Frame::new(
            image,
            SourceId::Index(index),
            index,
            FrameKind::Sequence,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_options() {
        let reader = SyntheticReader::parse("stub://cam?frames=3&width=32&height=24").unwrap();
        assert_eq!(
            reader.config,
            SyntheticConfig {
                name: "cam".into(),
                frames: Some(3),
                width: 32,
                height: 24,
            }
        );
        assert!(SyntheticReader::parse("stub://cam?width=abc").is_err());
        assert!(SyntheticReader::parse("stub://cam?width=0").is_err());
    }

    #[test]
    fn produces_the_requested_number_of_frames() -> Result<()> {
        let mut reader = SyntheticReader::parse("stub://cam?frames=3&width=16&height=8")?;
        let mut seen = Vec::new();
        while let Some(frame) = reader.next_frame()? {
            assert_eq!((frame.width(), frame.height()), (16, 8));
            seen.push(frame.source.clone());
        }
        assert_eq!(
            seen,
            vec![SourceId::Index(0), SourceId::Index(1), SourceId::Index(2)]
        );
        Ok(())
    }

    #[test]
    fn consecutive_frames_differ() -> Result<()> {
        let mut reader = SyntheticReader::parse("stub://cam?width=8&height=8")?;
        let first = reader.next_frame()?.unwrap().into_image();
        let second = reader.next_frame()?.unwrap().into_image();
        assert_ne!(first, second);
        Ok(())
    }
}
