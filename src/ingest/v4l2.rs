//! Camera capture through V4L2.
//!
//! Cameras are addressed by index (`0` → `/dev/video0`). The reader asks for
//! RGB3 frames and falls back to decoding MJPG when the device refuses.

use anyhow::{bail, Context, Result};
use ouroboros::self_referencing;

use super::FrameReader;
use crate::frame::{Frame, FrameKind, SourceId};

#[derive(Clone, Debug)]
pub(crate) struct V4l2Config {
    /// Device path (e.g., "/dev/video0").
    pub device: String,
    /// Camera index the device was selected by.
    pub index: u32,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            index: 0,
            target_fps: 30,
            width: 640,
            height: 480,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PixelFormat {
    Rgb3,
    Mjpg,
}

pub(crate) struct V4l2Reader {
    config: V4l2Config,
    state: Option<V4l2State>,
    format: PixelFormat,
    frame_count: u64,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Reader {
    pub(crate) fn new(config: V4l2Config) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            format: PixelFormat::Rgb3,
            frame_count: 0,
        }
    }

    pub(crate) fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open camera {} ({})", self.config.index, self.config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Reader: failed to set RGB3 on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        self.format = if format.fourcc == v4l::FourCC::new(b"RGB3") {
            PixelFormat::Rgb3
        } else if format.fourcc == v4l::FourCC::new(b"MJPG") {
            PixelFormat::Mjpg
        } else {
            bail!(
                "camera {} delivers unsupported pixel format {}",
                self.config.index,
                format.fourcc
            );
        };

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Reader: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let state = V4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Reader: connected to {} ({}x{}, {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(())
    }

    fn decode(&self, buf: &[u8]) -> Result<image::RgbImage> {
        match self.format {
            PixelFormat::Rgb3 => {
                let expected = (self.active_width as usize) * (self.active_height as usize) * 3;
                let pixels = buf
                    .get(..expected)
                    .context("v4l2 buffer is shorter than the negotiated frame")?
                    .to_vec();
                image::RgbImage::from_raw(self.active_width, self.active_height, pixels)
                    .context("v4l2 buffer does not match frame dimensions")
            }
            PixelFormat::Mjpg => Ok(image::load_from_memory(buf)
                .context("decode MJPG camera frame")?
                .to_rgb8()),
        }
    }
}

impl FrameReader for V4l2Reader {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("camera not connected")?;
        let buf = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .context("capture v4l2 frame")?;
        let image = self.decode(&buf)?;

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
