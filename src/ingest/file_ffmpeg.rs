//! Local video file source using FFmpeg.
//!
//! Decoding happens in-memory; frames are converted to packed RGB24 before they leave
//! this module. Nothing is written to disk.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use image::RgbImage;
use std::path::{Path, PathBuf};

use super::VideoSource;

struct Decoding {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    frame_rate: Option<f64>,
    eof_sent: bool,
}

pub(crate) struct FfmpegFileSource {
    path: PathBuf,
    frame_limit: Option<u64>,
    decoding: Option<Decoding>,
    frame_count: u64,
}

impl FfmpegFileSource {
    pub(crate) fn new(path: &Path, frame_limit: Option<u64>) -> Self {
        Self {
            path: path.to_path_buf(),
            frame_limit,
            decoding: None,
            frame_count: 0,
        }
    }
}

impl VideoSource for FfmpegFileSource {
    fn describe(&self) -> String {
        format!("video file '{}'", self.path.display())
    }

    fn open(&mut self) -> Result<()> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&self.path).with_context(|| {
            format!("failed to open file input '{}' with ffmpeg", self.path.display())
        })?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let rate = input_stream.avg_frame_rate();
        let frame_rate = if rate.denominator() != 0 && rate.numerator() > 0 {
            Some(f64::from(rate))
        } else {
            None
        };
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
            "FileSource: connected to {} (ffmpeg, {}x{})",
            self.path.display(),
            decoder.width(),
            decoder.height()
        );
        self.decoding = Some(Decoding {
            input,
            stream_index,
            decoder,
            scaler,
            frame_rate,
            eof_sent: false,
        });
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.frame_limit.is_some_and(|limit| self.frame_count >= limit) {
            return Ok(None);
        }
        let decoding = self
            .decoding
            .as_mut()
            .ok_or_else(|| anyhow!("video file read before open"))?;

        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if decoding.decoder.receive_frame(&mut decoded).is_ok() {
                let mut rgb_frame = ffmpeg::frame::Video::empty();
                decoding
                    .scaler
                    .run(&decoded, &mut rgb_frame)
                    .context("scale frame to RGB")?;
                self.frame_count += 1;
                return frame_to_image(&rgb_frame).map(Some);
            }
            if decoding.eof_sent {
                return Ok(None);
            }

            let mut fed = false;
            for (stream, packet) in decoding.input.packets() {
                if stream.index() != decoding.stream_index {
                    continue;
                }
                decoding
                    .decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?;
                fed = true;
                break;
            }
            if !fed {
                decoding
                    .decoder
                    .send_eof()
                    .context("flush ffmpeg decoder")?;
                decoding.eof_sent = true;
            }
        }
    }

    fn frame_rate(&self) -> Option<f64> {
        self.decoding.as_ref().and_then(|d| d.frame_rate)
    }

    fn close(&mut self) {
        if self.decoding.take().is_some() {
            log::info!(
                "FileSource: closed {} after {} frames",
                self.path.display(),
                self.frame_count
            );
        }
    }
}

fn frame_to_image(frame: &ffmpeg::frame::Video) -> Result<RgbImage> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    let pixels = if stride == row_bytes {
        data.get(..row_bytes * height as usize)
            .context("ffmpeg frame is truncated")?
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

    RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| anyhow!("ffmpeg frame buffer does not match {}x{}", width, height))
}
