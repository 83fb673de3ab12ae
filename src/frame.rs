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

//! Video frame model: FourCC classification, borrowed leases, owned copies.

use std::fmt;
use std::marker::PhantomData;
use std::slice;
use std::sync::Arc;

use crate::error::IngestError;
use crate::runtime::{NdiRuntime, RawHandle, RawVideoFrame, NULL_HANDLE};

pub const FOURCC_UYVY: u32 = 0x5956_5955;
pub const FOURCC_BGRA: u32 = 0x4152_4742;
pub const FOURCC_BGRX: u32 = 0x5852_4742;
pub const FOURCC_RGBA: u32 = 0x4142_4752;
pub const FOURCC_RGBX: u32 = 0x5842_4752;
pub const FOURCC_NV12: u32 = 0x3231_564E;
pub const FOURCC_I420: u32 = 0x3032_3449;
pub const FOURCC_H264: u32 = 0x3436_3248;
pub const FOURCC_HEVC: u32 = 0x4356_4548;

/// Four-character code naming a pixel or codec layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FourCc {
    Uyvy,
    Bgra,
    Bgrx,
    Rgba,
    Rgbx,
    Nv12,
    I420,
    H264,
    Hevc,
    Unknown(u32),
}

impl FourCc {
    pub fn from_u32(code: u32) -> Self {
        match code {
            FOURCC_UYVY => FourCc::Uyvy,
            FOURCC_BGRA => FourCc::Bgra,
            FOURCC_BGRX => FourCc::Bgrx,
            FOURCC_RGBA => FourCc::Rgba,
            FOURCC_RGBX => FourCc::Rgbx,
            FOURCC_NV12 => FourCc::Nv12,
            FOURCC_I420 => FourCc::I420,
            FOURCC_H264 => FourCc::H264,
            FOURCC_HEVC => FourCc::Hevc,
            other => FourCc::Unknown(other),
        }
    }

    pub fn as_u32(&self) -> u32 {
        match self {
            FourCc::Uyvy => FOURCC_UYVY,
            FourCc::Bgra => FOURCC_BGRA,
            FourCc::Bgrx => FOURCC_BGRX,
            FourCc::Rgba => FOURCC_RGBA,
            FourCc::Rgbx => FOURCC_RGBX,
            FourCc::Nv12 => FOURCC_NV12,
            FourCc::I420 => FOURCC_I420,
            FourCc::H264 => FOURCC_H264,
            FourCc::Hevc => FOURCC_HEVC,
            FourCc::Unknown(code) => *code,
        }
    }

    /// A compressed frame carries an elementary stream, not pixels.
    pub fn is_compressed(&self) -> bool {
        matches!(self, FourCc::H264 | FourCc::Hevc)
    }

    /// Bytes per pixel for packed uncompressed layouts. `None` for
    /// compressed and planar formats.
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            FourCc::Uyvy => Some(2),
            FourCc::Bgra | FourCc::Bgrx | FourCc::Rgba | FourCc::Rgbx => Some(4),
            _ => None,
        }
    }

    /// Human label for the video-info digest.
    pub fn label(&self) -> String {
        match self {
            FourCc::H264 => "H.264".to_string(),
            FourCc::Hevc => "H.265".to_string(),
            other => format!("Raw {other}"),
        }
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FourCc::Unknown(code) => {
                let b = code.to_le_bytes();
                if b.iter().all(|c| c.is_ascii_graphic()) {
                    write!(f, "{}{}{}{}", b[0] as char, b[1] as char, b[2] as char, b[3] as char)
                } else {
                    write!(f, "0x{code:08X}")
                }
            }
            FourCc::Uyvy => write!(f, "UYVY"),
            FourCc::Bgra => write!(f, "BGRA"),
            FourCc::Bgrx => write!(f, "BGRX"),
            FourCc::Rgba => write!(f, "RGBA"),
            FourCc::Rgbx => write!(f, "RGBX"),
            FourCc::Nv12 => write!(f, "NV12"),
            FourCc::I420 => write!(f, "I420"),
            FourCc::H264 => write!(f, "H264"),
            FourCc::Hevc => write!(f, "HEVC"),
        }
    }
}

/// Geometry and timing of one captured frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInfo {
    pub width: u32,
    pub height: u32,
    pub fourcc: FourCc,
    /// Signed stride in bytes: 0 for compressed, negative for bottom-up.
    pub line_stride_bytes: i32,
    pub frame_rate_n: u32,
    pub frame_rate_d: u32,
    /// Presentation timestamp in microseconds, publisher timebase.
    pub timestamp_us: i64,
    pub progressive: bool,
}

impl FrameInfo {
    pub fn is_compressed(&self) -> bool {
        self.fourcc.is_compressed()
    }

    pub fn fps(&self) -> f64 {
        if self.frame_rate_d == 0 {
            0.0
        } else {
            self.frame_rate_n as f64 / self.frame_rate_d as f64
        }
    }

    /// Resolve the stride policy against a concrete buffer.
    ///
    /// A zero stride means tightly packed; a negative stride flips row
    /// iteration (row 0 lives at the buffer tail); a positive stride smaller
    /// than the minimum row bytes is invalid. The buffer must hold
    /// `(height - 1) * |stride| + row_bytes`.
    pub fn row_layout(&self, row_bytes: usize, data_len: usize) -> Result<RowLayout, IngestError> {
        let declared = self.line_stride_bytes;
        let stride_abs = if declared == 0 {
            row_bytes
        } else {
            declared.unsigned_abs() as usize
        };
        if stride_abs < row_bytes {
            return Err(IngestError::InvalidStride {
                stride: declared,
                row_bytes,
            });
        }
        let need = (self.height.saturating_sub(1) as usize) * stride_abs + row_bytes;
        if data_len < need {
            return Err(IngestError::InvalidBuffer {
                got: data_len,
                need,
            });
        }
        Ok(RowLayout {
            stride_abs,
            bottom_up: declared < 0,
            height: self.height,
        })
    }
}

/// Row addressing for a validated uncompressed buffer.
#[derive(Debug, Clone, Copy)]
pub struct RowLayout {
    stride_abs: usize,
    bottom_up: bool,
    height: u32,
}

impl RowLayout {
    /// Byte offset of `row` (top-down display order) in the source buffer.
    pub fn offset(&self, row: u32) -> usize {
        if self.bottom_up {
            (self.height - 1 - row) as usize * self.stride_abs
        } else {
            row as usize * self.stride_abs
        }
    }
}

/// The scoped lease over a captured frame's native buffer.
///
/// The byte region is exclusively borrowed from the runtime between capture
/// and release; dropping the lease performs the release exactly once. The
/// lease is `!Send` on purpose: consumers that outlive it (the recorder)
/// must take a [`VideoFrameCopy`] before it drops.
pub struct FrameLease {
    runtime: Arc<dyn NdiRuntime>,
    receiver: RawHandle,
    raw: RawVideoFrame,
    info: FrameInfo,
    _not_send: PhantomData<*const ()>,
}

impl FrameLease {
    pub(crate) fn new(runtime: Arc<dyn NdiRuntime>, receiver: RawHandle, raw: RawVideoFrame) -> Self {
        let fourcc = FourCc::from_u32(raw.fourcc);
        let info = FrameInfo {
            width: raw.width.max(0) as u32,
            height: raw.height.max(0) as u32,
            fourcc,
            line_stride_bytes: if fourcc.is_compressed() {
                0
            } else {
                raw.line_stride_bytes
            },
            frame_rate_n: raw.frame_rate_n.max(0) as u32,
            frame_rate_d: raw.frame_rate_d.max(0) as u32,
            timestamp_us: raw.timestamp_us,
            progressive: raw.progressive,
        };
        Self {
            runtime,
            receiver,
            raw,
            info,
            _not_send: PhantomData,
        }
    }

    pub fn info(&self) -> &FrameInfo {
        &self.info
    }

    /// The borrowed byte region. Valid only while the lease is alive.
    pub fn data(&self) -> &[u8] {
        if self.raw.data.is_null() || self.raw.data_len == 0 {
            return &[];
        }
        unsafe { slice::from_raw_parts(self.raw.data, self.raw.data_len) }
    }

    /// Deep-copy the frame for consumers that outlive the lease.
    pub fn to_owned_copy(&self) -> VideoFrameCopy {
        VideoFrameCopy {
            info: self.info,
            data: self.data().to_vec(),
        }
    }
}

impl Drop for FrameLease {
    fn drop(&mut self) {
        // A null receiver handle makes the release a no-op downstream.
        if self.receiver != NULL_HANDLE {
            self.runtime.receiver_free_video(self.receiver, &self.raw);
        }
    }
}

/// An owned snapshot of a frame, safe to hand across threads.
#[derive(Debug, Clone)]
pub struct VideoFrameCopy {
    pub info: FrameInfo,
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_codes_roundtrip() {
        for code in [
            FOURCC_UYVY,
            FOURCC_BGRA,
            FOURCC_BGRX,
            FOURCC_RGBA,
            FOURCC_RGBX,
            FOURCC_NV12,
            FOURCC_I420,
            FOURCC_H264,
            FOURCC_HEVC,
        ] {
            assert_eq!(FourCc::from_u32(code).as_u32(), code);
        }
    }

    #[test]
    fn compressed_classification() {
        assert!(FourCc::H264.is_compressed());
        assert!(FourCc::Hevc.is_compressed());
        assert!(!FourCc::Uyvy.is_compressed());
        assert!(!FourCc::Bgra.is_compressed());
    }

    #[test]
    fn digest_labels() {
        assert_eq!(FourCc::H264.label(), "H.264");
        assert_eq!(FourCc::Hevc.label(), "H.265");
        assert_eq!(FourCc::Uyvy.label(), "Raw UYVY");
    }

    fn info(width: u32, height: u32, stride: i32) -> FrameInfo {
        FrameInfo {
            width,
            height,
            fourcc: FourCc::Bgra,
            line_stride_bytes: stride,
            frame_rate_n: 30,
            frame_rate_d: 1,
            timestamp_us: 0,
            progressive: true,
        }
    }

    #[test]
    fn zero_stride_means_tightly_packed() {
        let layout = info(4, 2, 0).row_layout(16, 32).unwrap();
        assert_eq!(layout.offset(0), 0);
        assert_eq!(layout.offset(1), 16);
    }

    #[test]
    fn negative_stride_flips_rows() {
        let layout = info(4, 3, -16).row_layout(16, 48).unwrap();
        assert_eq!(layout.offset(0), 32);
        assert_eq!(layout.offset(2), 0);
    }

    #[test]
    fn short_stride_is_rejected() {
        assert!(matches!(
            info(4, 2, 8).row_layout(16, 64),
            Err(IngestError::InvalidStride { stride: 8, .. })
        ));
    }

    #[test]
    fn undersized_buffer_is_rejected() {
        assert!(matches!(
            info(4, 2, 16).row_layout(16, 31),
            Err(IngestError::InvalidBuffer { got: 31, need: 32 })
        ));
    }

    #[test]
    fn padded_stride_addresses_rows() {
        let layout = info(4, 2, 32).row_layout(16, 48).unwrap();
        assert_eq!(layout.offset(0), 0);
        assert_eq!(layout.offset(1), 32);
    }
}
