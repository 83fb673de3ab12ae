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

//! Uncompressed frame rendering: pixel conversion plus surface blit.

mod convert;

pub(crate) use convert::bt601_luma_chroma;

use tracing::warn;

use crate::error::IngestError;
use crate::frame::{FourCc, FrameInfo};
use crate::surface::DisplaySurface;

/// Converts borrowed uncompressed frames to RGBA and blits them to the
/// display surface.
///
/// One destination backing buffer and one per-row scratch buffer are kept
/// across frames and reallocated only when the dimensions change.
pub struct UncompressedRenderer {
    rgba: Vec<u8>,
    row_scratch: Vec<u8>,
    width: u32,
    height: u32,
}

impl UncompressedRenderer {
    pub fn new() -> Self {
        Self {
            rgba: Vec::new(),
            row_scratch: Vec::new(),
            width: 0,
            height: 0,
        }
    }

    /// Convert `data` and draw it onto `surface`, stretched to the full
    /// canvas with filtering.
    ///
    /// Unsupported formats and geometry violations drop the frame with an
    /// error return; the caller logs and continues.
    pub fn render(
        &mut self,
        info: &FrameInfo,
        data: &[u8],
        surface: &dyn DisplaySurface,
    ) -> Result<(), IngestError> {
        let row_bytes = source_row_bytes(info)?;
        let layout = info.row_layout(row_bytes, data.len())?;
        self.ensure_buffers(info.width, info.height, row_bytes);

        let dst_row_bytes = info.width as usize * 4;
        for row in 0..info.height {
            let offset = layout.offset(row);
            self.row_scratch[..row_bytes].copy_from_slice(&data[offset..offset + row_bytes]);
            let dst = &mut self.rgba[row as usize * dst_row_bytes..][..dst_row_bytes];
            match info.fourcc {
                FourCc::Bgra => convert::bgra_row_to_rgba(&self.row_scratch[..row_bytes], dst),
                FourCc::Bgrx => convert::bgrx_row_to_rgba(&self.row_scratch[..row_bytes], dst),
                FourCc::Rgba => convert::rgba_row_copy(&self.row_scratch[..row_bytes], dst),
                FourCc::Rgbx => convert::rgbx_row_to_rgba(&self.row_scratch[..row_bytes], dst),
                FourCc::Uyvy => {
                    convert::uyvy_row_to_rgba(&self.row_scratch[..row_bytes], dst, info.width)
                }
                other => {
                    return Err(IngestError::UnsupportedPixelFormat(other.to_string()));
                }
            }
        }

        match surface.lock_canvas() {
            Some(mut canvas) => {
                canvas.draw_rgba(&self.rgba, info.width, info.height);
            }
            None => warn!("surface canvas unavailable; frame dropped"),
        }
        Ok(())
    }

    /// The converted RGBA output of the last frame (`width * height * 4`
    /// bytes).
    pub fn backing_rgba(&self) -> &[u8] {
        &self.rgba
    }

    /// Release the backing buffers, e.g. on surface teardown.
    pub fn recycle(&mut self) {
        self.rgba = Vec::new();
        self.row_scratch = Vec::new();
        self.width = 0;
        self.height = 0;
    }

    fn ensure_buffers(&mut self, width: u32, height: u32, row_bytes: usize) {
        if self.width != width || self.height != height || self.row_scratch.len() < row_bytes {
            self.rgba = vec![0u8; width as usize * height as usize * 4];
            self.row_scratch = vec![0u8; row_bytes];
            self.width = width;
            self.height = height;
        }
    }
}

impl Default for UncompressedRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Minimum bytes one source row occupies for the frame's format.
fn source_row_bytes(info: &FrameInfo) -> Result<usize, IngestError> {
    match info.fourcc {
        // Each 4-byte quadruple carries two pixels.
        FourCc::Uyvy => Ok((info.width as usize + 1) / 2 * 4),
        FourCc::Bgra | FourCc::Bgrx | FourCc::Rgba | FourCc::Rgbx => Ok(info.width as usize * 4),
        other => Err(IngestError::UnsupportedPixelFormat(other.to_string())),
    }
}
