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

//! [`NdiRuntime`] backed by the official NDI v6 SDK.
//!
//! Enabled with the `ndi-sdk` feature; requires `libndi` on the link path.
//! Every SDK instance lives behind a mutex that is held across each SDK
//! call, and destroy nulls the instance under that same mutex — capture,
//! connect, and destroy can never overlap inside the SDK.

#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use std::collections::HashMap;
use std::ffi::{c_char, c_float, c_int, CStr, CString};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{error, warn};

use crate::source::SourceDescriptor;
use crate::surface::DisplaySurface;

use super::{
    NdiRuntime, RawAudioFrame, RawHandle, RawVideoFrame, ReceiverOptions, ReceiverPerformance,
    NULL_HANDLE,
};

// --- SDK ABI ---------------------------------------------------------------

type NDIlib_find_instance_t = *mut std::ffi::c_void;
type NDIlib_recv_instance_t = *mut std::ffi::c_void;

const NDILIB_FRAME_TYPE_VIDEO: c_int = 1;
const NDILIB_FRAME_TYPE_AUDIO: c_int = 2;
const NDILIB_FRAME_FORMAT_TYPE_PROGRESSIVE: c_int = 1;

#[repr(C)]
struct NDIlib_source_t {
    p_ndi_name: *const c_char,
    p_url_address: *const c_char,
}

#[repr(C)]
struct NDIlib_find_create_t {
    show_local_sources: bool,
    p_groups: *const c_char,
    p_extra_ips: *const c_char,
}

#[repr(C)]
struct NDIlib_recv_create_v3_t {
    source_to_connect_to: NDIlib_source_t,
    color_format: c_int,
    bandwidth: c_int,
    allow_video_fields: bool,
    p_ndi_recv_name: *const c_char,
}

#[repr(C)]
struct NDIlib_video_frame_v2_t {
    xres: c_int,
    yres: c_int,
    FourCC: u32,
    frame_rate_N: c_int,
    frame_rate_D: c_int,
    picture_aspect_ratio: c_float,
    frame_format_type: c_int,
    timecode: i64,
    p_data: *mut u8,
    // Union of line_stride_in_bytes and data_size_in_bytes.
    line_stride_or_size: c_int,
    p_metadata: *const c_char,
    timestamp: i64,
}

#[repr(C)]
struct NDIlib_audio_frame_v2_t {
    sample_rate: c_int,
    no_channels: c_int,
    no_samples: c_int,
    timecode: i64,
    p_data: *mut c_float,
    channel_stride_in_bytes: c_int,
    p_metadata: *const c_char,
    timestamp: i64,
}

#[repr(C)]
#[derive(Default, Clone, Copy)]
struct NDIlib_recv_performance_t {
    video_frames: i64,
    audio_frames: i64,
    metadata_frames: i64,
}

#[link(name = "ndi")]
extern "C" {
    fn NDIlib_initialize() -> bool;
    fn NDIlib_destroy();
    fn NDIlib_version() -> *const c_char;

    fn NDIlib_find_create_v2(settings: *const NDIlib_find_create_t) -> NDIlib_find_instance_t;
    fn NDIlib_find_destroy(instance: NDIlib_find_instance_t);
    fn NDIlib_find_wait_for_sources(instance: NDIlib_find_instance_t, timeout_ms: u32) -> bool;
    fn NDIlib_find_get_current_sources(
        instance: NDIlib_find_instance_t,
        no_sources: *mut u32,
    ) -> *const NDIlib_source_t;

    fn NDIlib_recv_create_v3(settings: *const NDIlib_recv_create_v3_t) -> NDIlib_recv_instance_t;
    fn NDIlib_recv_destroy(instance: NDIlib_recv_instance_t);
    fn NDIlib_recv_connect(instance: NDIlib_recv_instance_t, source: *const NDIlib_source_t);
    fn NDIlib_recv_capture_v2(
        instance: NDIlib_recv_instance_t,
        video: *mut NDIlib_video_frame_v2_t,
        audio: *mut NDIlib_audio_frame_v2_t,
        metadata: *mut std::ffi::c_void,
        timeout_ms: u32,
    ) -> c_int;
    fn NDIlib_recv_free_video_v2(
        instance: NDIlib_recv_instance_t,
        frame: *const NDIlib_video_frame_v2_t,
    );
    fn NDIlib_recv_free_audio_v2(
        instance: NDIlib_recv_instance_t,
        frame: *const NDIlib_audio_frame_v2_t,
    );
    fn NDIlib_recv_get_performance(
        instance: NDIlib_recv_instance_t,
        total: *mut NDIlib_recv_performance_t,
        dropped: *mut NDIlib_recv_performance_t,
    );
    fn NDIlib_recv_get_no_connections(instance: NDIlib_recv_instance_t) -> c_int;
}

// --- Handle wrappers -------------------------------------------------------

/// An SDK instance behind its guard. Destroy nulls the pointer under the
/// lock; every caller re-checks for null after locking.
struct Guarded<T> {
    instance: Mutex<T>,
    // CStrings the SDK may keep referencing for the instance lifetime.
    _strings: Vec<CString>,
}

type FinderWrapper = Guarded<NDIlib_find_instance_t>;
type ReceiverWrapper = Guarded<NDIlib_recv_instance_t>;

struct VideoFrameHandle {
    frame: NDIlib_video_frame_v2_t,
}

struct AudioFrameHandle {
    frame: NDIlib_audio_frame_v2_t,
    interleaved: Vec<f32>,
}

/// The production runtime, linking against `libndi`.
pub struct SdkRuntime {
    initialized: AtomicBool,
    finders: Mutex<HashMap<RawHandle, Arc<FinderWrapper>>>,
    receivers: Mutex<HashMap<RawHandle, Arc<ReceiverWrapper>>>,
    next_handle: AtomicU64,
}

// Raw SDK pointers are only ever dereferenced while the owning wrapper's
// mutex is held; the SDK itself documents find/recv calls as thread-safe.
unsafe impl Send for SdkRuntime {}
unsafe impl Sync for SdkRuntime {}

impl SdkRuntime {
    pub fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            finders: Mutex::new(HashMap::new()),
            receivers: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    fn allocate_handle(&self) -> RawHandle {
        self.next_handle.fetch_add(1, Ordering::AcqRel)
    }

    fn finder(&self, handle: RawHandle) -> Option<Arc<FinderWrapper>> {
        self.finders.lock().unwrap().get(&handle).cloned()
    }

    fn receiver(&self, handle: RawHandle) -> Option<Arc<ReceiverWrapper>> {
        self.receivers.lock().unwrap().get(&handle).cloned()
    }

    fn timestamp_us(timestamp_100ns: i64) -> i64 {
        // The SDK reports 100 ns units; the pipeline runs on microseconds.
        timestamp_100ns / 10
    }
}

impl Default for SdkRuntime {
    fn default() -> Self {
        Self::new()
    }
}

fn to_cstring(value: Option<&str>) -> Option<CString> {
    value.and_then(|v| CString::new(v).ok())
}

fn cstr_ptr(value: &Option<CString>) -> *const c_char {
    value.as_ref().map_or(ptr::null(), |s| s.as_ptr())
}

impl NdiRuntime for SdkRuntime {
    fn initialize(&self) -> bool {
        if self.initialized.load(Ordering::Acquire) {
            return true;
        }
        let ok = unsafe { NDIlib_initialize() };
        if ok {
            self.initialized.store(true, Ordering::Release);
        } else {
            error!("NDIlib_initialize failed");
        }
        ok
    }

    fn destroy(&self) {
        if self.initialized.swap(false, Ordering::AcqRel) {
            unsafe { NDIlib_destroy() };
        }
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn version(&self) -> String {
        unsafe {
            let version = NDIlib_version();
            if version.is_null() {
                "unknown".to_string()
            } else {
                CStr::from_ptr(version).to_string_lossy().into_owned()
            }
        }
    }

    fn finder_create(
        &self,
        show_local_sources: bool,
        groups: Option<&str>,
        extra_ips: Option<&str>,
    ) -> RawHandle {
        if !self.is_initialized() {
            error!("finder_create: runtime not initialized");
            return NULL_HANDLE;
        }
        let groups = to_cstring(groups);
        let extra_ips = to_cstring(extra_ips);
        let settings = NDIlib_find_create_t {
            show_local_sources,
            p_groups: cstr_ptr(&groups),
            p_extra_ips: cstr_ptr(&extra_ips),
        };
        let instance = unsafe { NDIlib_find_create_v2(&settings) };
        if instance.is_null() {
            error!("NDIlib_find_create_v2 failed");
            return NULL_HANDLE;
        }
        let handle = self.allocate_handle();
        self.finders.lock().unwrap().insert(
            handle,
            Arc::new(Guarded {
                instance: Mutex::new(instance),
                _strings: groups.into_iter().chain(extra_ips).collect(),
            }),
        );
        handle
    }

    fn finder_destroy(&self, finder: RawHandle) {
        let wrapper = self.finders.lock().unwrap().remove(&finder);
        if let Some(wrapper) = wrapper {
            let mut instance = wrapper.instance.lock().unwrap();
            if !instance.is_null() {
                unsafe { NDIlib_find_destroy(*instance) };
                *instance = ptr::null_mut();
            }
        }
    }

    fn finder_wait_for_sources(&self, finder: RawHandle, timeout_ms: u32) -> bool {
        let Some(wrapper) = self.finder(finder) else {
            return false;
        };
        let instance = wrapper.instance.lock().unwrap();
        if instance.is_null() {
            return false;
        }
        unsafe { NDIlib_find_wait_for_sources(*instance, timeout_ms) }
    }

    fn finder_current_sources(&self, finder: RawHandle) -> Vec<SourceDescriptor> {
        let Some(wrapper) = self.finder(finder) else {
            return Vec::new();
        };
        let instance = wrapper.instance.lock().unwrap();
        if instance.is_null() {
            return Vec::new();
        }
        let mut count: u32 = 0;
        let sources = unsafe { NDIlib_find_get_current_sources(*instance, &mut count) };
        if sources.is_null() {
            return Vec::new();
        }
        (0..count as usize)
            .map(|i| unsafe {
                let source = &*sources.add(i);
                let name = if source.p_ndi_name.is_null() {
                    String::new()
                } else {
                    CStr::from_ptr(source.p_ndi_name).to_string_lossy().into_owned()
                };
                let url = if source.p_url_address.is_null() {
                    None
                } else {
                    Some(
                        CStr::from_ptr(source.p_url_address)
                            .to_string_lossy()
                            .into_owned(),
                    )
                };
                SourceDescriptor { name, url }
            })
            .collect()
    }

    fn receiver_create(&self, options: &ReceiverOptions) -> RawHandle {
        if !self.is_initialized() {
            error!("receiver_create: runtime not initialized");
            return NULL_HANDLE;
        }
        let name = to_cstring(Some(options.name.as_str()));
        let settings = NDIlib_recv_create_v3_t {
            source_to_connect_to: NDIlib_source_t {
                p_ndi_name: ptr::null(),
                p_url_address: ptr::null(),
            },
            color_format: options.color_format as c_int,
            bandwidth: options.bandwidth as c_int,
            allow_video_fields: options.allow_video_fields,
            p_ndi_recv_name: cstr_ptr(&name),
        };
        let instance = unsafe { NDIlib_recv_create_v3(&settings) };
        if instance.is_null() {
            error!("NDIlib_recv_create_v3 failed");
            return NULL_HANDLE;
        }
        let handle = self.allocate_handle();
        self.receivers.lock().unwrap().insert(
            handle,
            Arc::new(Guarded {
                instance: Mutex::new(instance),
                _strings: name.into_iter().collect(),
            }),
        );
        handle
    }

    fn receiver_destroy(&self, recv: RawHandle) {
        let wrapper = self.receivers.lock().unwrap().remove(&recv);
        if let Some(wrapper) = wrapper {
            let mut instance = wrapper.instance.lock().unwrap();
            if !instance.is_null() {
                unsafe { NDIlib_recv_destroy(*instance) };
                *instance = ptr::null_mut();
            }
        }
    }

    fn receiver_connect(&self, recv: RawHandle, source: &SourceDescriptor) -> bool {
        let Some(wrapper) = self.receiver(recv) else {
            return false;
        };
        let Ok(name) = CString::new(source.name.as_str()) else {
            return false;
        };
        let url = source.url.as_deref().and_then(|u| CString::new(u).ok());
        let ndi_source = NDIlib_source_t {
            p_ndi_name: name.as_ptr(),
            p_url_address: cstr_ptr(&url),
        };
        let instance = wrapper.instance.lock().unwrap();
        if instance.is_null() {
            return false;
        }
        unsafe { NDIlib_recv_connect(*instance, &ndi_source) };
        true
    }

    fn receiver_disconnect(&self, recv: RawHandle) {
        if let Some(wrapper) = self.receiver(recv) {
            let instance = wrapper.instance.lock().unwrap();
            if !instance.is_null() {
                unsafe { NDIlib_recv_connect(*instance, ptr::null()) };
            }
        }
    }

    fn receiver_capture_video(&self, recv: RawHandle, timeout_ms: u32) -> Option<RawVideoFrame> {
        let wrapper = self.receiver(recv)?;
        let instance = wrapper.instance.lock().unwrap();
        if instance.is_null() {
            return None;
        }
        let mut frame: NDIlib_video_frame_v2_t = unsafe { std::mem::zeroed() };
        let frame_type = unsafe {
            NDIlib_recv_capture_v2(
                *instance,
                &mut frame,
                ptr::null_mut(),
                ptr::null_mut(),
                timeout_ms,
            )
        };
        if frame_type != NDILIB_FRAME_TYPE_VIDEO {
            return None;
        }
        if frame.p_data.is_null() {
            warn!("video frame with null data; freeing");
            unsafe { NDIlib_recv_free_video_v2(*instance, &frame) };
            return None;
        }

        let fourcc = frame.FourCC;
        let compressed =
            fourcc == crate::frame::FOURCC_H264 || fourcc == crate::frame::FOURCC_HEVC;
        let data_len = if compressed {
            frame.line_stride_or_size.max(0) as usize
        } else {
            frame.line_stride_or_size.unsigned_abs() as usize * frame.yres.max(0) as usize
        };
        if data_len == 0 {
            warn!("video frame with zero-sized buffer; freeing");
            unsafe { NDIlib_recv_free_video_v2(*instance, &frame) };
            return None;
        }

        let raw = RawVideoFrame {
            frame_handle: NULL_HANDLE, // patched below
            width: frame.xres,
            height: frame.yres,
            line_stride_bytes: if compressed { 0 } else { frame.line_stride_or_size },
            frame_rate_n: frame.frame_rate_N,
            frame_rate_d: frame.frame_rate_D,
            fourcc,
            timestamp_us: Self::timestamp_us(frame.timestamp),
            data: frame.p_data,
            data_len,
            progressive: frame.frame_format_type == NDILIB_FRAME_FORMAT_TYPE_PROGRESSIVE,
        };
        let handle = Box::new(VideoFrameHandle { frame });
        Some(RawVideoFrame {
            frame_handle: Box::into_raw(handle) as RawHandle,
            ..raw
        })
    }

    fn receiver_free_video(&self, recv: RawHandle, frame: &RawVideoFrame) {
        if recv == NULL_HANDLE || frame.frame_handle == NULL_HANDLE {
            return;
        }
        let handle = unsafe { Box::from_raw(frame.frame_handle as *mut VideoFrameHandle) };
        if let Some(wrapper) = self.receiver(recv) {
            let instance = wrapper.instance.lock().unwrap();
            if !instance.is_null() {
                unsafe { NDIlib_recv_free_video_v2(*instance, &handle.frame) };
            }
        }
    }

    fn receiver_capture_audio(&self, recv: RawHandle, timeout_ms: u32) -> Option<RawAudioFrame> {
        let wrapper = self.receiver(recv)?;
        let instance = wrapper.instance.lock().unwrap();
        if instance.is_null() {
            return None;
        }
        let mut frame: NDIlib_audio_frame_v2_t = unsafe { std::mem::zeroed() };
        let frame_type = unsafe {
            NDIlib_recv_capture_v2(
                *instance,
                ptr::null_mut(),
                &mut frame,
                ptr::null_mut(),
                timeout_ms,
            )
        };
        if frame_type != NDILIB_FRAME_TYPE_AUDIO {
            return None;
        }
        let (rate, channels, samples) = (frame.sample_rate, frame.no_channels, frame.no_samples);
        if frame.p_data.is_null() || rate <= 0 || channels <= 0 || samples <= 0 {
            unsafe { NDIlib_recv_free_audio_v2(*instance, &frame) };
            return None;
        }

        // Planar to interleaved, the layout every host audio sink wants.
        let stride_samples = frame.channel_stride_in_bytes as usize / std::mem::size_of::<f32>();
        let mut interleaved = vec![0.0f32; channels as usize * samples as usize];
        unsafe {
            for s in 0..samples as usize {
                for c in 0..channels as usize {
                    let plane = frame.p_data.add(c * stride_samples);
                    interleaved[s * channels as usize + c] = *plane.add(s);
                }
            }
        }

        let timestamp_us = Self::timestamp_us(frame.timestamp);
        let handle = Box::new(AudioFrameHandle { frame, interleaved });
        let data = handle.interleaved.as_ptr();
        let data_len = handle.interleaved.len();
        Some(RawAudioFrame {
            frame_handle: Box::into_raw(handle) as RawHandle,
            sample_rate: rate,
            channels,
            samples_per_channel: samples,
            timestamp_us,
            data,
            data_len,
        })
    }

    fn receiver_free_audio(&self, recv: RawHandle, frame: &RawAudioFrame) {
        if recv == NULL_HANDLE || frame.frame_handle == NULL_HANDLE {
            return;
        }
        let handle = unsafe { Box::from_raw(frame.frame_handle as *mut AudioFrameHandle) };
        if let Some(wrapper) = self.receiver(recv) {
            let instance = wrapper.instance.lock().unwrap();
            if !instance.is_null() {
                unsafe { NDIlib_recv_free_audio_v2(*instance, &handle.frame) };
            }
        }
    }

    fn receiver_performance(&self, recv: RawHandle) -> ReceiverPerformance {
        let Some(wrapper) = self.receiver(recv) else {
            return ReceiverPerformance::default();
        };
        let instance = wrapper.instance.lock().unwrap();
        if instance.is_null() {
            return ReceiverPerformance::default();
        }
        let mut total = NDIlib_recv_performance_t::default();
        let mut dropped = NDIlib_recv_performance_t::default();
        unsafe { NDIlib_recv_get_performance(*instance, &mut total, &mut dropped) };
        ReceiverPerformance {
            total_video_frames: total.video_frames.max(0) as u64,
            dropped_video_frames: dropped.video_frames.max(0) as u64,
            total_audio_frames: total.audio_frames.max(0) as u64,
            dropped_audio_frames: dropped.audio_frames.max(0) as u64,
            total_metadata_frames: total.metadata_frames.max(0) as u64,
        }
    }

    fn receiver_no_connections(&self, recv: RawHandle) -> i32 {
        let Some(wrapper) = self.receiver(recv) else {
            return 0;
        };
        let instance = wrapper.instance.lock().unwrap();
        if instance.is_null() {
            return 0;
        }
        unsafe { NDIlib_recv_get_no_connections(*instance) }
    }

    fn receiver_set_surface(
        &self,
        _recv: RawHandle,
        _surface: Option<Arc<dyn DisplaySurface>>,
    ) -> bool {
        // Surface-mode decode at the SDK level is a host-windowing concern;
        // this build decodes in the application layer instead.
        false
    }
}
