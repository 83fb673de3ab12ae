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

//! Passthrough muxing of compressed elementary streams.
//!
//! Frames are parsed for NAL units and written verbatim as MP4 samples; no
//! transcoding happens anywhere on this path. The muxer starts only once
//! the codec-specific data is complete: SPS+PPS for H.264, VPS+SPS+PPS for
//! H.265.

use tracing::{debug, info, warn};

use crate::error::IngestError;
use crate::frame::VideoFrameCopy;
use crate::media::{sample_flags, MediaFormat, SampleMuxer, MIME_H264, MIME_HEVC};
use crate::record::annexb::{self, h264, h265};

/// Per-recording state of the compressed-input branch.
pub struct PassthroughWriter {
    muxer: Box<dyn SampleMuxer>,
    is_hevc: bool,
    width: u32,
    height: u32,
    csd_vps: Option<Vec<u8>>,
    csd_sps: Option<Vec<u8>>,
    csd_pps: Option<Vec<u8>>,
    csd_assembled: bool,
    first_timestamp_us: Option<i64>,
    video_track: Option<usize>,
    muxer_started: bool,
    samples_written: u64,
}

impl PassthroughWriter {
    pub fn new(muxer: Box<dyn SampleMuxer>, is_hevc: bool, width: u32, height: u32) -> Self {
        Self {
            muxer,
            is_hevc,
            width,
            height,
            csd_vps: None,
            csd_sps: None,
            csd_pps: None,
            csd_assembled: false,
            first_timestamp_us: None,
            video_track: None,
            muxer_started: false,
            samples_written: 0,
        }
    }

    /// Write one captured frame as one sample.
    ///
    /// Frames arriving before the CSD is complete are dropped; the
    /// recording is still considered live. A muxer write failure is
    /// reported but non-fatal: the caller logs and moves to the next frame.
    pub fn write_frame(&mut self, frame: &VideoFrameCopy) -> Result<(), IngestError> {
        let units = annexb::parse_nal_units(&frame.data, self.is_hevc);
        if units.is_empty() {
            debug!("frame without NAL units; skipped");
            return Ok(());
        }

        if !self.csd_assembled {
            self.harvest_csd(&frame.data, &units);
            if self.csd_assembled {
                self.start_muxer()?;
            }
        }
        if !self.muxer_started {
            debug!("dropping frame before codec-specific data is complete");
            return Ok(());
        }

        let first = *self.first_timestamp_us.get_or_insert(frame.info.timestamp_us);
        let pts_us = frame.info.timestamp_us - first;
        let keyframe = annexb::contains_idr(&units, self.is_hevc);
        let flags = if keyframe { sample_flags::KEY_FRAME } else { 0 };

        let track = self.video_track.expect("muxer started without a track");
        self.muxer.write_sample(track, &frame.data, pts_us, flags)?;
        self.samples_written += 1;
        Ok(())
    }

    /// Finalize the container. Safe to call when nothing was written.
    pub fn finish(&mut self) -> Result<(), IngestError> {
        if self.muxer_started {
            self.muxer.stop()?;
            info!(samples = self.samples_written, "passthrough recording finalized");
        } else {
            warn!("recording ended before codec-specific data was assembled");
        }
        Ok(())
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Harvest one copy of each parameter set out of the frame.
    fn harvest_csd(&mut self, frame: &[u8], units: &[annexb::NalUnit]) {
        for unit in units {
            let bytes = unit.bytes(frame);
            if self.is_hevc {
                match unit.nal_type {
                    h265::NAL_VPS if self.csd_vps.is_none() => {
                        self.csd_vps = Some(bytes.to_vec());
                    }
                    h265::NAL_SPS if self.csd_sps.is_none() => {
                        self.csd_sps = Some(bytes.to_vec());
                    }
                    h265::NAL_PPS if self.csd_pps.is_none() => {
                        self.csd_pps = Some(bytes.to_vec());
                    }
                    _ => {}
                }
            } else {
                match unit.nal_type {
                    h264::NAL_SPS if self.csd_sps.is_none() => {
                        self.csd_sps = Some(bytes.to_vec());
                    }
                    h264::NAL_PPS if self.csd_pps.is_none() => {
                        self.csd_pps = Some(bytes.to_vec());
                    }
                    _ => {}
                }
            }
        }
        self.csd_assembled = if self.is_hevc {
            self.csd_vps.is_some() && self.csd_sps.is_some() && self.csd_pps.is_some()
        } else {
            self.csd_sps.is_some() && self.csd_pps.is_some()
        };
    }

    /// Build the track descriptor from the collected CSD and start the
    /// muxer, exactly once.
    fn start_muxer(&mut self) -> Result<(), IngestError> {
        let format = if self.is_hevc {
            // H.265: csd-0 is VPS ‖ SPS ‖ PPS, in that order.
            let mut csd0 = Vec::new();
            csd0.extend_from_slice(self.csd_vps.as_ref().unwrap());
            csd0.extend_from_slice(self.csd_sps.as_ref().unwrap());
            csd0.extend_from_slice(self.csd_pps.as_ref().unwrap());
            MediaFormat::video(MIME_HEVC, self.width, self.height).with_csd(vec![csd0])
        } else {
            // H.264: csd-0 = SPS, csd-1 = PPS.
            MediaFormat::video(MIME_H264, self.width, self.height).with_csd(vec![
                self.csd_sps.clone().unwrap(),
                self.csd_pps.clone().unwrap(),
            ])
        };
        let track = self.muxer.add_track(&format)?;
        self.muxer.start()?;
        self.video_track = Some(track);
        self.muxer_started = true;
        info!(
            hevc = self.is_hevc,
            width = self.width,
            height = self.height,
            "muxer started with assembled codec-specific data"
        );
        Ok(())
    }
}
