/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! The boundary to the host OS media framework: hardware video codecs and
//! the MP4 sample muxer. The crate only drives these interfaces; the
//! embedding shell supplies the platform implementation.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::IngestError;
use crate::surface::DisplaySurface;

pub const MIME_H264: &str = "video/avc";
pub const MIME_HEVC: &str = "video/hevc";

/// Sample flags for [`SampleMuxer::write_sample`] and codec buffers.
pub mod sample_flags {
    pub const KEY_FRAME: u32 = 1;
    pub const CODEC_CONFIG: u32 = 1 << 1;
    pub const END_OF_STREAM: u32 = 1 << 2;
}

/// A track/codec format descriptor, keyed by MIME type and dimensions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaFormat {
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub bitrate: u32,
    /// Keyframe interval in seconds (encoder configuration).
    pub i_frame_interval_s: u32,
    pub low_latency: bool,
    /// Codec-specific data buffers in track order (`csd-0`, `csd-1`, ...).
    pub csd: Vec<Vec<u8>>,
}

impl MediaFormat {
    pub fn video(mime: &str, width: u32, height: u32) -> Self {
        Self {
            mime: mime.to_string(),
            width,
            height,
            ..Default::default()
        }
    }

    pub fn with_low_latency(mut self) -> Self {
        self.low_latency = true;
        self
    }

    pub fn with_csd(mut self, csd: Vec<Vec<u8>>) -> Self {
        self.csd = csd;
        self
    }

    pub fn is_hevc(&self) -> bool {
        self.mime == MIME_HEVC
    }
}

/// One result of polling a codec's output side.
#[derive(Debug, Clone)]
pub enum CodecOutput {
    /// A ready output buffer, identified by index.
    Buffer {
        index: usize,
        pts_us: i64,
        flags: u32,
    },
    /// The codec renegotiated its output format (mid-stream resolution or
    /// MIME change on decode; the track descriptor on encode).
    FormatChanged(MediaFormat),
    /// Nothing ready within the timeout.
    TryAgainLater,
}

/// A hardware video codec instance (encoder or decoder).
///
/// Buffer acquisition is by index with a bounded wait, mirroring the host
/// framework contract. A decoder created with a surface renders on
/// [`VideoCodec::release_output`] with `render = true` and never exposes
/// pixel data; an encoder exposes its output via
/// [`VideoCodec::output_data`].
pub trait VideoCodec: Send {
    /// Acquire a free input slot, waiting up to `timeout`.
    fn dequeue_input(&mut self, timeout: Duration) -> Option<usize>;

    /// Fill the acquired slot and submit it with the given presentation
    /// time. An empty `data` with [`sample_flags::END_OF_STREAM`] signals
    /// end of stream.
    fn queue_input(
        &mut self,
        index: usize,
        data: &[u8],
        pts_us: i64,
        flags: u32,
    ) -> Result<(), IngestError>;

    /// Poll the output side, waiting up to `timeout`.
    fn dequeue_output(&mut self, timeout: Duration) -> Result<CodecOutput, IngestError>;

    /// Copy out the bytes of a dequeued output buffer (encoder side).
    fn output_data(&mut self, index: usize) -> Vec<u8>;

    /// Release a dequeued output buffer; `render = true` sends it to the
    /// bound surface (decoder side).
    fn release_output(&mut self, index: usize, render: bool);

    /// Stop and release the codec. Idempotent.
    fn stop(&mut self);
}

/// The MP4 container muxer.
pub trait SampleMuxer: Send {
    /// Register a track from a format descriptor. Must precede `start`.
    fn add_track(&mut self, format: &MediaFormat) -> Result<usize, IngestError>;

    fn start(&mut self) -> Result<(), IngestError>;

    /// Write one sample. `pts_us` is microseconds relative to the first
    /// sample of the recording.
    fn write_sample(
        &mut self,
        track: usize,
        data: &[u8],
        pts_us: i64,
        flags: u32,
    ) -> Result<(), IngestError>;

    /// Finalize the container. Idempotent.
    fn stop(&mut self) -> Result<(), IngestError>;
}

/// Factory for codecs and muxers, implemented by the embedding shell.
pub trait MediaEngine: Send + Sync {
    /// Create a low-latency decoder rendering into `surface`.
    fn create_decoder(
        &self,
        format: &MediaFormat,
        surface: Arc<dyn DisplaySurface>,
    ) -> Result<Box<dyn VideoCodec>, IngestError>;

    fn create_encoder(&self, format: &MediaFormat) -> Result<Box<dyn VideoCodec>, IngestError>;

    fn create_muxer(&self, path: &Path) -> Result<Box<dyn SampleMuxer>, IngestError>;
}
