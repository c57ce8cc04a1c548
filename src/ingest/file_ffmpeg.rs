//! Video file and network stream decoding using FFmpeg.
//!
//! One reader covers local files (`clip.mp4`) and anything FFmpeg can open by
//! URL (`rtsp://`, `http://.../index.m3u8`). Frames are converted to RGB24.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use std::path::PathBuf;

use super::FrameReader;
use crate::frame::{Frame, FrameKind, SourceId};

pub(crate) struct FfmpegReader {
    target: String,
    is_file: bool,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    frame_count: u64,
    eof: bool,
}

impl FfmpegReader {
    pub(crate) fn open(target: &str, is_file: bool) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&target)
            .with_context(|| format!("failed to open '{}' with ffmpeg", target))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("'{}' has no video track", target))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        log::info!(
            "FfmpegReader: opened {} ({}x{})",
            target,
            decoder.width(),
            decoder.height()
        );

        Ok(Self {
            target: target.to_string(),
            is_file,
            input,
            stream_index,
            decoder,
            scaler,
            frame_count: 0,
            eof: false,
        })
    }

    fn source_id(&self) -> SourceId {
        if self.is_file {
            SourceId::Path(PathBuf::from(&self.target))
        } else {
            SourceId::Stream(self.target.clone())
        }
    }
}

impl FrameReader for FfmpegReader {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            let received = receive_status(self.decoder.receive_frame(&mut decoded))
                .with_context(|| format!("decode video frame from {}", self.target))?;
            if received == Receive::Frame {
                let mut rgb_frame = ffmpeg::frame::Video::empty();
                self.scaler
                    .run(&decoded, &mut rgb_frame)
                    .context("scale frame to RGB")?;
                let image = frame_to_image(&rgb_frame)?;

                let index = self.frame_count;
                self.frame_count += 1;
                return Ok(Some(Frame::new(
                    image,
                    self.source_id(),
                    index,
                    FrameKind::Sequence,
                )));
            }
            if received == Receive::Drained || self.eof {
                log::info!(
                    "FfmpegReader: {} finished after {} frames",
                    self.target,
                    self.frame_count
                );
                return Ok(None);
            }

            let next = self
                .input
                .packets()
                .next()
                .map(|(stream, packet)| (stream.index(), packet));
            match next {
                Some((index, packet)) if index == self.stream_index => {
                    self.decoder
                        .send_packet(&packet)
                        .context("send packet to ffmpeg decoder")?;
                }
                Some(_) => {}
                None => {
                    self.decoder.send_eof().context("flush ffmpeg decoder")?;
                    self.eof = true;
                }
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Receive {
    Frame,
    /// The decoder wants another packet.
    Again,
    /// Fully flushed after `send_eof`.
    Drained,
}

fn receive_status(result: Result<(), ffmpeg::Error>) -> Result<Receive> {
    match result {
        Ok(()) => Ok(Receive::Frame),
        Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
            Ok(Receive::Again)
        }
        Err(ffmpeg::Error::Eof) => Ok(Receive::Drained),
        Err(err) => Err(err.into()),
    }
}

fn frame_to_image(frame: &ffmpeg::frame::Video) -> Result<image::RgbImage> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    let pixels = if stride == row_bytes {
        data.get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than its dimensions")?
            .to_vec()
    } else {
        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            let end = start + row_bytes;
            pixels.extend_from_slice(
                data.get(start..end)
                    .context("ffmpeg frame row is out of bounds")?,
            );
        }
        pixels
    };

    image::RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| anyhow!("ffmpeg frame does not match {}x{}", width, height))
}
