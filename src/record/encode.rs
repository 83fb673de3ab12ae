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

//! The encode branch of the recorder: uncompressed input converted to NV12
//! on the writer thread and pushed through an H.264 hardware encoder into
//! the muxer.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::IngestError;
use crate::frame::{FourCc, FrameInfo, VideoFrameCopy};
use crate::media::{sample_flags, CodecOutput, MediaFormat, SampleMuxer, VideoCodec, MIME_H264};
use crate::render::bt601_luma_chroma;

/// Bounded wait against the encoder's buffer pools.
const CODEC_TIMEOUT: Duration = Duration::from_millis(10);
/// Bound on TRY_AGAIN retries while draining at end of stream.
const EOS_DRAIN_ATTEMPTS: u32 = 15;
/// Encoder configuration.
const ENCODER_FRAME_RATE: u32 = 30;
const ENCODER_I_FRAME_INTERVAL_S: u32 = 1;
/// 8 Mbps at 1080p, scaled by pixel area.
const BITRATE_PER_1080P: u64 = 8_000_000;

/// Bitrate scaled linearly with pixel area from 8 Mbps at 1920x1080,
/// clamped to [1, 20] Mbps.
pub fn bitrate_for(width: u32, height: u32) -> u32 {
    let area = width as u64 * height as u64;
    let scaled = BITRATE_PER_1080P * area / (1920 * 1080);
    scaled.clamp(1_000_000, 20_000_000) as u32
}

/// The encoder configuration for a recording of the given size.
pub fn encoder_format(width: u32, height: u32) -> MediaFormat {
    MediaFormat {
        mime: MIME_H264.to_string(),
        width,
        height,
        frame_rate: ENCODER_FRAME_RATE,
        bitrate: bitrate_for(width, height),
        i_frame_interval_s: ENCODER_I_FRAME_INTERVAL_S,
        low_latency: false,
        csd: Vec::new(),
    }
}

/// Per-recording state of the uncompressed-input branch.
pub struct EncodeWriter {
    encoder: Box<dyn VideoCodec>,
    muxer: Box<dyn SampleMuxer>,
    nv12: Vec<u8>,
    video_track: Option<usize>,
    muxer_started: bool,
    first_timestamp_us: Option<i64>,
    last_pts_us: i64,
    samples_written: u64,
}

impl EncodeWriter {
    pub fn new(encoder: Box<dyn VideoCodec>, muxer: Box<dyn SampleMuxer>) -> Self {
        Self {
            encoder,
            muxer,
            nv12: Vec::new(),
            video_track: None,
            muxer_started: false,
            first_timestamp_us: None,
            last_pts_us: 0,
            samples_written: 0,
        }
    }

    /// Convert one frame to NV12, feed the encoder, and drain its output.
    pub fn write_frame(&mut self, frame: &VideoFrameCopy) -> Result<(), IngestError> {
        convert_to_nv12(&frame.info, &frame.data, &mut self.nv12)?;

        let first = *self
            .first_timestamp_us
            .get_or_insert(frame.info.timestamp_us);
        let pts_us = frame.info.timestamp_us - first;
        self.last_pts_us = pts_us;

        match self.encoder.dequeue_input(CODEC_TIMEOUT) {
            Some(index) => {
                self.encoder.queue_input(index, &self.nv12, pts_us, 0)?;
            }
            None => debug!("no encoder input slot; frame dropped"),
        }
        self.drain(false)
    }

    /// Signal end of stream, drain the remaining output, and finalize.
    pub fn finish(&mut self) -> Result<(), IngestError> {
        if let Some(index) = self.encoder.dequeue_input(CODEC_TIMEOUT) {
            self.encoder
                .queue_input(index, &[], self.last_pts_us, sample_flags::END_OF_STREAM)?;
        } else {
            warn!("no input slot for the end-of-stream buffer");
        }
        self.drain(true)?;
        if self.muxer_started {
            self.muxer.stop()?;
            info!(samples = self.samples_written, "encoded recording finalized");
        }
        self.encoder.stop();
        Ok(())
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Pull everything the encoder has ready. In steady state we stop at
    /// the first TRY_AGAIN; at end of stream we retry up to the bound or
    /// until the EOS-flagged buffer appears.
    fn drain(&mut self, eos: bool) -> Result<(), IngestError> {
        let mut try_again = 0u32;
        loop {
            match self.encoder.dequeue_output(CODEC_TIMEOUT)? {
                CodecOutput::FormatChanged(format) => {
                    if !self.muxer_started {
                        let track = self.muxer.add_track(&format)?;
                        self.muxer.start()?;
                        self.video_track = Some(track);
                        self.muxer_started = true;
                        info!(mime = %format.mime, "encoder output format set; muxer started");
                    }
                }
                CodecOutput::Buffer { index, pts_us, flags } => {
                    let data = self.encoder.output_data(index);
                    let config = flags & sample_flags::CODEC_CONFIG != 0;
                    if self.muxer_started && !config && !data.is_empty() {
                        let track = self.video_track.expect("muxer started without a track");
                        self.muxer.write_sample(
                            track,
                            &data,
                            pts_us,
                            flags & sample_flags::KEY_FRAME,
                        )?;
                        self.samples_written += 1;
                    }
                    self.encoder.release_output(index, false);
                    if flags & sample_flags::END_OF_STREAM != 0 {
                        return Ok(());
                    }
                }
                CodecOutput::TryAgainLater => {
                    if !eos {
                        return Ok(());
                    }
                    try_again += 1;
                    if try_again >= EOS_DRAIN_ATTEMPTS {
                        warn!("end-of-stream drain gave up after {EOS_DRAIN_ATTEMPTS} attempts");
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn nv12_len(width: u32, height: u32) -> usize {
    let (w, h) = (width as usize, height as usize);
    w * h + 2 * w.div_ceil(2) * h.div_ceil(2)
}

/// Convert a supported uncompressed frame to semi-planar NV12.
///
/// RGB inputs go through BT.601 limited-range with luma clamped to
/// [16, 235] and chroma to [16, 240]; chroma is averaged over each 2x2
/// block. UYVY is already 4:2:2 YUV and only needs repacking with the
/// chroma rows averaged in vertical pairs.
pub(crate) fn convert_to_nv12(
    info: &FrameInfo,
    data: &[u8],
    out: &mut Vec<u8>,
) -> Result<(), IngestError> {
    match info.fourcc {
        FourCc::Uyvy => uyvy_to_nv12(info, data, out),
        FourCc::Bgra | FourCc::Bgrx => rgb_to_nv12(info, data, out, true),
        FourCc::Rgba | FourCc::Rgbx => rgb_to_nv12(info, data, out, false),
        other => Err(IngestError::UnsupportedRecordingFormat(other.to_string())),
    }
}

fn rgb_to_nv12(
    info: &FrameInfo,
    data: &[u8],
    out: &mut Vec<u8>,
    blue_first: bool,
) -> Result<(), IngestError> {
    let (w, h) = (info.width as usize, info.height as usize);
    let row_bytes = w * 4;
    let layout = info.row_layout(row_bytes, data.len())?;
    out.resize(nv12_len(info.width, info.height), 0);
    let (y_plane, uv_plane) = out.split_at_mut(w * h);

    let rgb_at = |row: usize, x: usize| -> (i32, i32, i32) {
        let px = &data[layout.offset(row as u32) + x * 4..][..4];
        if blue_first {
            (px[2] as i32, px[1] as i32, px[0] as i32)
        } else {
            (px[0] as i32, px[1] as i32, px[2] as i32)
        }
    };

    for row in 0..h {
        for x in 0..w {
            let (r, g, b) = rgb_at(row, x);
            let (y, _, _) = bt601_luma_chroma(r, g, b);
            y_plane[row * w + x] = y;
        }
    }

    let uv_cols = w.div_ceil(2);
    for uv_row in 0..h.div_ceil(2) {
        for uv_col in 0..uv_cols {
            let (mut r_sum, mut g_sum, mut b_sum, mut n) = (0i32, 0i32, 0i32, 0i32);
            for dy in 0..2 {
                for dx in 0..2 {
                    let (row, x) = (uv_row * 2 + dy, uv_col * 2 + dx);
                    if row < h && x < w {
                        let (r, g, b) = rgb_at(row, x);
                        r_sum += r;
                        g_sum += g;
                        b_sum += b;
                        n += 1;
                    }
                }
            }
            let (_, u, v) = bt601_luma_chroma(r_sum / n, g_sum / n, b_sum / n);
            uv_plane[uv_row * uv_cols * 2 + uv_col * 2] = u;
            uv_plane[uv_row * uv_cols * 2 + uv_col * 2 + 1] = v;
        }
    }
    Ok(())
}

fn uyvy_to_nv12(info: &FrameInfo, data: &[u8], out: &mut Vec<u8>) -> Result<(), IngestError> {
    let (w, h) = (info.width as usize, info.height as usize);
    let row_bytes = w.div_ceil(2) * 4;
    let layout = info.row_layout(row_bytes, data.len())?;
    out.resize(nv12_len(info.width, info.height), 0);
    let (y_plane, uv_plane) = out.split_at_mut(w * h);

    for row in 0..h {
        let src = &data[layout.offset(row as u32)..][..row_bytes];
        for x in 0..w {
            // Quadruple U,Y0,V,Y1: luma sits at odd byte offsets.
            y_plane[row * w + x] = src[(x / 2) * 4 + 1 + (x % 2) * 2];
        }
    }

    let uv_cols = w.div_ceil(2);
    for uv_row in 0..h.div_ceil(2) {
        let top = &data[layout.offset((uv_row * 2) as u32)..][..row_bytes];
        let bottom_row = (uv_row * 2 + 1).min(h - 1);
        let bottom = &data[layout.offset(bottom_row as u32)..][..row_bytes];
        for uv_col in 0..uv_cols {
            let quad = uv_col * 4;
            let u = (top[quad] as u16 + bottom[quad] as u16) / 2;
            let v = (top[quad + 2] as u16 + bottom[quad + 2] as u16) / 2;
            uv_plane[uv_row * uv_cols * 2 + uv_col * 2] = u as u8;
            uv_plane[uv_row * uv_cols * 2 + uv_col * 2 + 1] = v as u8;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockEncoder, MockMuxer};

    fn uncompressed_frame(
        fourcc: FourCc,
        width: u32,
        height: u32,
        data: Vec<u8>,
        timestamp_us: i64,
    ) -> VideoFrameCopy {
        VideoFrameCopy {
            info: FrameInfo {
                width,
                height,
                fourcc,
                line_stride_bytes: 0,
                frame_rate_n: 30,
                frame_rate_d: 1,
                timestamp_us,
                progressive: true,
            },
            data,
        }
    }

    #[test]
    fn bitrate_scales_with_area() {
        assert_eq!(bitrate_for(1920, 1080), 8_000_000);
        assert_eq!(bitrate_for(3840, 2160), 20_000_000); // clamped
        assert_eq!(bitrate_for(160, 120), 1_000_000); // clamped
        let hd = bitrate_for(1280, 720);
        assert!(hd > 3_000_000 && hd < 4_000_000);
    }

    #[test]
    fn black_bgra_converts_to_black_nv12() {
        let info = uncompressed_frame(FourCc::Bgra, 4, 2, vec![0u8; 4 * 2 * 4], 0).info;
        let mut nv12 = Vec::new();
        convert_to_nv12(&info, &vec![0u8; 4 * 2 * 4], &mut nv12).unwrap();
        assert_eq!(nv12.len(), 4 * 2 + 2 * 2 * 1);
        assert!(nv12[..8].iter().all(|&y| y == 16));
        assert!(nv12[8..].iter().all(|&c| c == 128));
    }

    #[test]
    fn white_bgra_hits_the_luma_ceiling() {
        let data = vec![255u8; 2 * 2 * 4];
        let info = uncompressed_frame(FourCc::Bgra, 2, 2, data.clone(), 0).info;
        let mut nv12 = Vec::new();
        convert_to_nv12(&info, &data, &mut nv12).unwrap();
        assert!(nv12[..4].iter().all(|&y| y == 235));
        assert!(nv12[4..].iter().all(|&c| c == 128));
    }

    #[test]
    fn saturated_red_chroma_is_clamped() {
        // BGRA red pixels: B=0, G=0, R=255.
        let px = [0u8, 0, 255, 255];
        let data: Vec<u8> = px.iter().copied().cycle().take(2 * 2 * 4).collect();
        let info = uncompressed_frame(FourCc::Bgra, 2, 2, data.clone(), 0).info;
        let mut nv12 = Vec::new();
        convert_to_nv12(&info, &data, &mut nv12).unwrap();
        let v = nv12[5];
        assert_eq!(v, 240, "V must clamp to the chroma ceiling");
    }

    #[test]
    fn uyvy_repacks_luma_and_averages_chroma() {
        // 2x2 UYVY: top row chroma (100, 200), bottom row chroma (120, 220).
        let data = vec![
            100u8, 50, 200, 60, // row 0: U,Y0,V,Y1
            120, 70, 220, 80, // row 1
        ];
        let info = uncompressed_frame(FourCc::Uyvy, 2, 2, data.clone(), 0).info;
        let mut nv12 = Vec::new();
        convert_to_nv12(&info, &data, &mut nv12).unwrap();
        assert_eq!(&nv12[..4], &[50, 60, 70, 80]);
        assert_eq!(&nv12[4..], &[110, 210]);
    }

    #[test]
    fn compressed_input_is_rejected() {
        let info = uncompressed_frame(FourCc::Bgra, 2, 2, vec![], 0).info;
        let info = FrameInfo {
            fourcc: FourCc::H264,
            ..info
        };
        let mut nv12 = Vec::new();
        assert!(matches!(
            convert_to_nv12(&info, &[0u8; 16], &mut nv12),
            Err(IngestError::UnsupportedRecordingFormat(_))
        ));
    }

    #[test]
    fn encode_branch_muxes_after_format_change() {
        let encoder = MockEncoder::new();
        let muxer = MockMuxer::new();
        let recorded = muxer.recorded();
        let mut writer = EncodeWriter::new(Box::new(encoder), Box::new(muxer));

        let data = vec![0u8; 4 * 2 * 4];
        for n in 0..5i64 {
            writer
                .write_frame(&uncompressed_frame(FourCc::Bgra, 4, 2, data.clone(), n * 33_333))
                .unwrap();
        }
        writer.finish().unwrap();

        let mp4 = recorded.lock().unwrap();
        assert!(mp4.started);
        assert!(mp4.stopped);
        assert_eq!(mp4.tracks.len(), 1);
        assert_eq!(mp4.tracks[0].mime, MIME_H264);
        // The mock encoder emits one sample per input; config samples are
        // not written.
        assert_eq!(mp4.samples.len(), 5);
        assert_eq!(mp4.samples[0].pts_us, 0);
        assert_eq!(mp4.samples[4].pts_us, 4 * 33_333);
        assert_eq!(writer.samples_written(), 5);
    }
}
