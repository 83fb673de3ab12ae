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

//! The boundary to the native NDI runtime.
//!
//! Everything above this module is safe Rust; everything below it is the
//! vendor SDK. Handles are raw `u64` values with `0` meaning null so the
//! owning components can apply the atomic load / swap-to-null discipline
//! required for teardown.

use std::sync::Arc;

use crate::source::SourceDescriptor;
use crate::surface::DisplaySurface;

#[cfg(feature = "ndi-sdk")]
pub mod sdk;

/// Opaque native handle. `NULL_HANDLE` means "no handle".
pub type RawHandle = u64;

pub const NULL_HANDLE: RawHandle = 0;

/// Receiver bandwidth modes. Discriminants match the native enum mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Bandwidth {
    MetadataOnly = 0,
    AudioOnly = 1,
    Lowest = 2,
    Highest = 3,
}

/// Receiver color-format preference.
///
/// Each variant names the format used for progressive frames first and for
/// fielded frames second. Discriminants match the native enum mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum ColorFormat {
    /// Display-friendly default: the application-layer decoder handles
    /// compressed frames, so uncompressed ones arrive blit-ready.
    #[default]
    BgrxBgra = 0,
    UyvyBgra = 1,
    RgbxRgba = 2,
    UyvyRgba = 3,
    Fastest = 100,
    Best = 101,
}

/// Options accepted when creating a receiver.
#[derive(Debug, Clone)]
pub struct ReceiverOptions {
    pub name: String,
    pub bandwidth: Bandwidth,
    pub color_format: ColorFormat,
    pub allow_video_fields: bool,
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        Self {
            name: "ndi-ingest".to_string(),
            bandwidth: Bandwidth::Highest,
            color_format: ColorFormat::default(),
            allow_video_fields: false,
        }
    }
}

/// A captured video frame exactly as the native layer hands it over.
///
/// The `data` pointer borrows the runtime's buffer and is valid only until
/// the matching [`NdiRuntime::receiver_free_video`] call on the same
/// receiver. The struct is deliberately `!Send`: leases stay on the capture
/// thread and cross-thread consumers take owned copies.
#[derive(Debug)]
pub struct RawVideoFrame {
    /// Opaque per-frame handle used only for the matching free call.
    pub frame_handle: RawHandle,
    pub width: i32,
    pub height: i32,
    /// Signed line stride in bytes. Zero for compressed frames, negative
    /// for bottom-up uncompressed layouts.
    pub line_stride_bytes: i32,
    pub frame_rate_n: i32,
    pub frame_rate_d: i32,
    /// FourCC naming the pixel/codec layout.
    pub fourcc: u32,
    /// Presentation timestamp in microseconds, publisher timebase.
    pub timestamp_us: i64,
    pub data: *const u8,
    /// Content length: `data_size_in_bytes` for compressed frames,
    /// `|stride| * height` for uncompressed ones.
    pub data_len: usize,
    pub progressive: bool,
}

/// A captured audio frame (interleaved f32 samples).
///
/// Audio is captured by the runtime but not routed by this core; the
/// contract is kept complete so embedders can drain and free audio frames.
#[derive(Debug)]
pub struct RawAudioFrame {
    pub frame_handle: RawHandle,
    pub sample_rate: i32,
    pub channels: i32,
    pub samples_per_channel: i32,
    pub timestamp_us: i64,
    pub data: *const f32,
    pub data_len: usize,
}

/// Raw frame counters reported by the receiver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverPerformance {
    pub total_video_frames: u64,
    pub dropped_video_frames: u64,
    pub total_audio_frames: u64,
    pub dropped_audio_frames: u64,
    pub total_metadata_frames: u64,
}

/// The native NDI runtime surface consumed by this crate.
///
/// Every method must be callable from any thread; implementations guard
/// their handles internally (the SDK backend keeps a mutex per wrapper, the
/// way the original C wrapper does).
pub trait NdiRuntime: Send + Sync {
    fn initialize(&self) -> bool;
    fn destroy(&self);
    fn is_initialized(&self) -> bool;
    fn version(&self) -> String;

    /// Create a source finder. Returns [`NULL_HANDLE`] on failure.
    fn finder_create(
        &self,
        show_local_sources: bool,
        groups: Option<&str>,
        extra_ips: Option<&str>,
    ) -> RawHandle;
    fn finder_destroy(&self, finder: RawHandle);
    /// Block until the source set changes or the timeout elapses.
    /// Returns `true` when the native layer reports a change.
    fn finder_wait_for_sources(&self, finder: RawHandle, timeout_ms: u32) -> bool;
    fn finder_current_sources(&self, finder: RawHandle) -> Vec<SourceDescriptor>;

    /// Create a receiver. Returns [`NULL_HANDLE`] on failure.
    fn receiver_create(&self, options: &ReceiverOptions) -> RawHandle;
    fn receiver_destroy(&self, recv: RawHandle);
    fn receiver_connect(&self, recv: RawHandle, source: &SourceDescriptor) -> bool;
    fn receiver_disconnect(&self, recv: RawHandle);
    /// Capture one video frame. `None` on timeout or when only non-video
    /// data arrived. A `Some` return must be freed exactly once with
    /// [`NdiRuntime::receiver_free_video`] on the same receiver.
    fn receiver_capture_video(&self, recv: RawHandle, timeout_ms: u32) -> Option<RawVideoFrame>;
    /// Return a captured frame's buffer to the runtime. Freeing with a null
    /// receiver handle is a no-op.
    fn receiver_free_video(&self, recv: RawHandle, frame: &RawVideoFrame);
    fn receiver_capture_audio(&self, recv: RawHandle, timeout_ms: u32) -> Option<RawAudioFrame>;
    fn receiver_free_audio(&self, recv: RawHandle, frame: &RawAudioFrame);
    fn receiver_performance(&self, recv: RawHandle) -> ReceiverPerformance;
    /// Number of upstream connections currently established (0 or 1 for a
    /// single-source receiver).
    fn receiver_no_connections(&self, recv: RawHandle) -> i32;
    /// Bind or unbind a display surface for the native-side decode path.
    /// Left unbound when the application layer decodes (the default here).
    fn receiver_set_surface(
        &self,
        recv: RawHandle,
        surface: Option<Arc<dyn DisplaySurface>>,
    ) -> bool;
}
