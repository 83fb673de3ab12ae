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

//! Mock collaborators for tests.
//!
//! Only compiled for unit tests and under the `testing` feature. The mock
//! runtime is scriptable per receiver (frames, null captures, connection
//! flips) and tracks every outstanding native buffer so tests can assert
//! the exactly-once release contract.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::IngestError;
use crate::frame::{FourCc, FrameLease};
use crate::media::{
    sample_flags, CodecOutput, MediaEngine, MediaFormat, SampleMuxer, VideoCodec, MIME_H264,
};
use crate::runtime::{
    NdiRuntime, RawAudioFrame, RawHandle, RawVideoFrame, ReceiverOptions, ReceiverPerformance,
    NULL_HANDLE,
};
use crate::source::SourceDescriptor;
use crate::surface::{Canvas, DisplaySurface};

// ---------------------------------------------------------------------------
// Mock NDI runtime
// ---------------------------------------------------------------------------

/// One scripted frame for the mock runtime.
#[derive(Debug, Clone)]
pub struct TestVideoFrame {
    pub width: u32,
    pub height: u32,
    pub fourcc: FourCc,
    pub stride: i32,
    pub frame_rate: (u32, u32),
    pub timestamp_us: i64,
    pub progressive: bool,
    pub data: Vec<u8>,
}

impl TestVideoFrame {
    pub fn uncompressed(fourcc: FourCc, width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            fourcc,
            stride: 0,
            frame_rate: (30, 1),
            timestamp_us: 0,
            progressive: true,
            data,
        }
    }

    pub fn compressed(fourcc: FourCc, data: Vec<u8>, timestamp_us: i64) -> Self {
        Self {
            width: 1920,
            height: 1080,
            fourcc,
            stride: 0,
            frame_rate: (30, 1),
            timestamp_us,
            progressive: true,
            data,
        }
    }

    pub fn with_timestamp(mut self, timestamp_us: i64) -> Self {
        self.timestamp_us = timestamp_us;
        self
    }

    pub fn with_stride(mut self, stride: i32) -> Self {
        self.stride = stride;
        self
    }
}

#[derive(Debug, Clone)]
enum ScriptedCapture {
    Frame(TestVideoFrame),
    Null,
}

#[derive(Default)]
struct MockReceiverState {
    connected_to: Option<SourceDescriptor>,
    connected: bool,
    script: VecDeque<ScriptedCapture>,
    outstanding: HashMap<u64, Box<[u8]>>,
    performance: ReceiverPerformance,
}

#[derive(Default)]
struct MockState {
    sources: Vec<SourceDescriptor>,
    source_change: bool,
    finders: HashMap<u64, ()>,
    receivers: HashMap<u64, MockReceiverState>,
    destroyed_finders: u64,
    destroyed_receivers: u64,
    released_frames: u64,
}

/// Scriptable in-memory stand-in for the native runtime.
#[derive(Default)]
pub struct MockRuntime {
    initialized: AtomicBool,
    next_handle: AtomicU64,
    fail_next_create: AtomicBool,
    fail_next_connect: AtomicBool,
    inner: Mutex<MockState>,
    cond: Condvar,
}

impl MockRuntime {
    pub fn new() -> Arc<Self> {
        let runtime = Arc::new(Self {
            next_handle: AtomicU64::new(1),
            ..Self::default()
        });
        runtime.initialize();
        runtime
    }

    /// A runtime that has not been initialized.
    pub fn uninitialized() -> Arc<Self> {
        Arc::new(Self {
            next_handle: AtomicU64::new(1),
            ..Self::default()
        })
    }

    /// Replace the advertised source set and raise the change flag.
    pub fn set_sources(&self, sources: Vec<SourceDescriptor>) {
        let mut state = self.inner.lock().unwrap();
        state.sources = sources;
        state.source_change = true;
        self.cond.notify_all();
    }

    /// Script a frame on every live receiver.
    pub fn push_frame(&self, frame: TestVideoFrame) {
        let mut state = self.inner.lock().unwrap();
        for receiver in state.receivers.values_mut() {
            receiver.script.push_back(ScriptedCapture::Frame(frame.clone()));
        }
        self.cond.notify_all();
    }

    /// Script `count` null captures on every live receiver.
    pub fn push_nulls(&self, count: usize) {
        let mut state = self.inner.lock().unwrap();
        for receiver in state.receivers.values_mut() {
            for _ in 0..count {
                receiver.script.push_back(ScriptedCapture::Null);
            }
        }
        self.cond.notify_all();
    }

    /// Flip the native `is-connected` answer on every live receiver.
    pub fn set_connected(&self, connected: bool) {
        let mut state = self.inner.lock().unwrap();
        for receiver in state.receivers.values_mut() {
            receiver.connected = connected;
        }
    }

    pub fn set_performance(&self, performance: ReceiverPerformance) {
        let mut state = self.inner.lock().unwrap();
        for receiver in state.receivers.values_mut() {
            receiver.performance = performance;
        }
    }

    pub fn fail_next_create(&self) {
        self.fail_next_create.store(true, Ordering::Release);
    }

    pub fn fail_next_connect(&self) {
        self.fail_next_connect.store(true, Ordering::Release);
    }

    /// Captured-but-unreleased frames across all receivers.
    pub fn outstanding_frames(&self) -> usize {
        let state = self.inner.lock().unwrap();
        state.receivers.values().map(|r| r.outstanding.len()).sum()
    }

    pub fn released_frames(&self) -> u64 {
        self.inner.lock().unwrap().released_frames
    }

    pub fn destroyed_receivers(&self) -> u64 {
        self.inner.lock().unwrap().destroyed_receivers
    }

    pub fn destroyed_finders(&self) -> u64 {
        self.inner.lock().unwrap().destroyed_finders
    }

    pub fn live_receivers(&self) -> usize {
        self.inner.lock().unwrap().receivers.len()
    }

    pub fn live_finders(&self) -> usize {
        self.inner.lock().unwrap().finders.len()
    }

    pub fn connected_source(&self) -> Option<SourceDescriptor> {
        let state = self.inner.lock().unwrap();
        state
            .receivers
            .values()
            .find_map(|r| r.connected_to.clone())
    }

    fn allocate_handle(&self) -> RawHandle {
        self.next_handle.fetch_add(1, Ordering::AcqRel)
    }
}

impl NdiRuntime for MockRuntime {
    fn initialize(&self) -> bool {
        self.initialized.store(true, Ordering::Release);
        true
    }

    fn destroy(&self) {
        self.initialized.store(false, Ordering::Release);
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn version(&self) -> String {
        "mock-ndi 6.0".to_string()
    }

    fn finder_create(
        &self,
        _show_local_sources: bool,
        _groups: Option<&str>,
        _extra_ips: Option<&str>,
    ) -> RawHandle {
        if !self.is_initialized() || self.fail_next_create.swap(false, Ordering::AcqRel) {
            return NULL_HANDLE;
        }
        let handle = self.allocate_handle();
        self.inner.lock().unwrap().finders.insert(handle, ());
        handle
    }

    fn finder_destroy(&self, finder: RawHandle) {
        let mut state = self.inner.lock().unwrap();
        if state.finders.remove(&finder).is_some() {
            state.destroyed_finders += 1;
        }
    }

    fn finder_wait_for_sources(&self, finder: RawHandle, timeout_ms: u32) -> bool {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);
        let mut state = self.inner.lock().unwrap();
        loop {
            if !state.finders.contains_key(&finder) {
                return false;
            }
            if state.source_change {
                state.source_change = false;
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self.cond.wait_timeout(state, deadline - now).unwrap();
            state = guard;
        }
    }

    fn finder_current_sources(&self, finder: RawHandle) -> Vec<SourceDescriptor> {
        let state = self.inner.lock().unwrap();
        if state.finders.contains_key(&finder) {
            state.sources.clone()
        } else {
            Vec::new()
        }
    }

    fn receiver_create(&self, _options: &ReceiverOptions) -> RawHandle {
        if !self.is_initialized() || self.fail_next_create.swap(false, Ordering::AcqRel) {
            return NULL_HANDLE;
        }
        let handle = self.allocate_handle();
        self.inner
            .lock()
            .unwrap()
            .receivers
            .insert(handle, MockReceiverState::default());
        handle
    }

    fn receiver_destroy(&self, recv: RawHandle) {
        let mut state = self.inner.lock().unwrap();
        if state.receivers.remove(&recv).is_some() {
            state.destroyed_receivers += 1;
        }
        self.cond.notify_all();
    }

    fn receiver_connect(&self, recv: RawHandle, source: &SourceDescriptor) -> bool {
        if self.fail_next_connect.swap(false, Ordering::AcqRel) {
            return false;
        }
        let mut state = self.inner.lock().unwrap();
        match state.receivers.get_mut(&recv) {
            Some(receiver) => {
                receiver.connected_to = Some(source.clone());
                receiver.connected = true;
                true
            }
            None => false,
        }
    }

    fn receiver_disconnect(&self, recv: RawHandle) {
        let mut state = self.inner.lock().unwrap();
        if let Some(receiver) = state.receivers.get_mut(&recv) {
            receiver.connected_to = None;
            receiver.connected = false;
        }
    }

    fn receiver_capture_video(&self, recv: RawHandle, timeout_ms: u32) -> Option<RawVideoFrame> {
        if recv == NULL_HANDLE {
            return None;
        }
        let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);
        let mut state = self.inner.lock().unwrap();
        loop {
            let receiver = state.receivers.get_mut(&recv)?;
            if let Some(entry) = receiver.script.pop_front() {
                return match entry {
                    ScriptedCapture::Null => None,
                    ScriptedCapture::Frame(frame) => {
                        let handle = self.next_handle.fetch_add(1, Ordering::AcqRel);
                        let storage = frame.data.into_boxed_slice();
                        let data = storage.as_ptr();
                        let data_len = storage.len();
                        receiver.outstanding.insert(handle, storage);
                        receiver.performance.total_video_frames += 1;
                        Some(RawVideoFrame {
                            frame_handle: handle,
                            width: frame.width as i32,
                            height: frame.height as i32,
                            line_stride_bytes: frame.stride,
                            frame_rate_n: frame.frame_rate.0 as i32,
                            frame_rate_d: frame.frame_rate.1 as i32,
                            fourcc: frame.fourcc.as_u32(),
                            timestamp_us: frame.timestamp_us,
                            data,
                            data_len,
                            progressive: frame.progressive,
                        })
                    }
                };
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self.cond.wait_timeout(state, deadline - now).unwrap();
            state = guard;
        }
    }

    fn receiver_free_video(&self, recv: RawHandle, frame: &RawVideoFrame) {
        if recv == NULL_HANDLE {
            return; // release race: no-op
        }
        let mut state = self.inner.lock().unwrap();
        state.released_frames += 1;
        if let Some(receiver) = state.receivers.get_mut(&recv) {
            receiver.outstanding.remove(&frame.frame_handle);
        }
    }

    fn receiver_capture_audio(&self, _recv: RawHandle, _timeout_ms: u32) -> Option<RawAudioFrame> {
        None
    }

    fn receiver_free_audio(&self, _recv: RawHandle, _frame: &RawAudioFrame) {}

    fn receiver_performance(&self, recv: RawHandle) -> ReceiverPerformance {
        let state = self.inner.lock().unwrap();
        state
            .receivers
            .get(&recv)
            .map(|r| r.performance)
            .unwrap_or_default()
    }

    fn receiver_no_connections(&self, recv: RawHandle) -> i32 {
        let state = self.inner.lock().unwrap();
        match state.receivers.get(&recv) {
            Some(receiver) if receiver.connected => 1,
            _ => 0,
        }
    }

    fn receiver_set_surface(
        &self,
        recv: RawHandle,
        _surface: Option<Arc<dyn DisplaySurface>>,
    ) -> bool {
        recv != NULL_HANDLE
    }
}

/// Mint a lease over a scripted frame, backed by a throwaway mock
/// receiver. Unit tests use this to drive the router directly.
pub fn test_lease(runtime: &Arc<MockRuntime>, frame: TestVideoFrame) -> FrameLease {
    let handle = runtime.receiver_create(&ReceiverOptions::default());
    assert_ne!(handle, NULL_HANDLE);
    {
        let mut state = runtime.inner.lock().unwrap();
        state
            .receivers
            .get_mut(&handle)
            .unwrap()
            .script
            .push_back(ScriptedCapture::Frame(frame));
    }
    let raw = runtime
        .receiver_capture_video(handle, 0)
        .expect("scripted frame");
    FrameLease::new(runtime.clone(), handle, raw)
}

// ---------------------------------------------------------------------------
// Mock media engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RecordedSample {
    pub track: usize,
    pub data: Vec<u8>,
    pub pts_us: i64,
    pub flags: u32,
}

/// Everything a mock muxer was told, for assertions.
#[derive(Debug, Default)]
pub struct RecordedMp4 {
    pub tracks: Vec<MediaFormat>,
    pub samples: Vec<RecordedSample>,
    pub started: bool,
    pub stopped: bool,
}

/// In-memory muxer capturing tracks and samples.
pub struct MockMuxer {
    recorded: Arc<Mutex<RecordedMp4>>,
    write_gate: Option<crossbeam_channel::Receiver<()>>,
}

impl MockMuxer {
    pub fn new() -> Self {
        Self {
            recorded: Arc::new(Mutex::new(RecordedMp4::default())),
            write_gate: None,
        }
    }

    /// Every `write_sample` call blocks until the gate yields one token;
    /// the backpressure tests drip-feed it.
    pub fn with_gate(gate: crossbeam_channel::Receiver<()>) -> Self {
        Self {
            recorded: Arc::new(Mutex::new(RecordedMp4::default())),
            write_gate: Some(gate),
        }
    }

    pub fn recorded(&self) -> Arc<Mutex<RecordedMp4>> {
        self.recorded.clone()
    }
}

impl Default for MockMuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleMuxer for MockMuxer {
    fn add_track(&mut self, format: &MediaFormat) -> Result<usize, IngestError> {
        let mut recorded = self.recorded.lock().unwrap();
        if recorded.started {
            return Err(IngestError::MuxerWriteFailed(
                "add_track after start".to_string(),
            ));
        }
        recorded.tracks.push(format.clone());
        Ok(recorded.tracks.len() - 1)
    }

    fn start(&mut self) -> Result<(), IngestError> {
        self.recorded.lock().unwrap().started = true;
        Ok(())
    }

    fn write_sample(
        &mut self,
        track: usize,
        data: &[u8],
        pts_us: i64,
        flags: u32,
    ) -> Result<(), IngestError> {
        if let Some(gate) = &self.write_gate {
            let _ = gate.recv();
        }
        let mut recorded = self.recorded.lock().unwrap();
        if !recorded.started {
            return Err(IngestError::MuxerWriteFailed(
                "write before start".to_string(),
            ));
        }
        recorded.samples.push(RecordedSample {
            track,
            data: data.to_vec(),
            pts_us,
            flags,
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<(), IngestError> {
        self.recorded.lock().unwrap().stopped = true;
        Ok(())
    }
}

/// Shared observer for a mock decoder instance.
#[derive(Default)]
pub struct DecoderProbe {
    format: Mutex<Option<MediaFormat>>,
    rendered: AtomicU64,
    stopped: AtomicBool,
}

impl DecoderProbe {
    pub fn rendered(&self) -> u64 {
        self.rendered.load(Ordering::Acquire)
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn format(&self) -> Option<MediaFormat> {
        self.format.lock().unwrap().clone()
    }
}

/// Surface-mode decoder stand-in: every queued input becomes one rendered
/// output buffer.
struct MockDecoder {
    probe: Arc<DecoderProbe>,
    pending: VecDeque<(i64, u32)>,
    next_index: usize,
    stalled: Arc<AtomicBool>,
}

impl VideoCodec for MockDecoder {
    fn dequeue_input(&mut self, timeout: Duration) -> Option<usize> {
        if self.stalled.load(Ordering::Acquire) {
            std::thread::sleep(timeout);
            return None;
        }
        self.next_index = self.next_index.wrapping_add(1);
        Some(self.next_index)
    }

    fn queue_input(
        &mut self,
        _index: usize,
        _data: &[u8],
        pts_us: i64,
        flags: u32,
    ) -> Result<(), IngestError> {
        self.pending.push_back((pts_us, flags));
        Ok(())
    }

    fn dequeue_output(&mut self, timeout: Duration) -> Result<CodecOutput, IngestError> {
        match self.pending.pop_front() {
            Some((pts_us, flags)) => Ok(CodecOutput::Buffer {
                index: self.next_index,
                pts_us,
                flags,
            }),
            None => {
                std::thread::sleep(timeout);
                Ok(CodecOutput::TryAgainLater)
            }
        }
    }

    fn output_data(&mut self, _index: usize) -> Vec<u8> {
        Vec::new()
    }

    fn release_output(&mut self, _index: usize, render: bool) {
        if render {
            self.probe.rendered.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn stop(&mut self) {
        self.probe.stopped.store(true, Ordering::Release);
    }
}

/// H.264 "encoder" that reports a track format once, emits one config
/// sample, then echoes every input as an encoded sample.
pub struct MockEncoder {
    format_sent: bool,
    config_sent: bool,
    pending: VecDeque<(Vec<u8>, i64)>,
    buffers: HashMap<usize, (Vec<u8>, i64, u32)>,
    next_index: usize,
    eos_pending: bool,
    last_pts: i64,
    frames_seen: u64,
}

impl MockEncoder {
    pub fn new() -> Self {
        Self {
            format_sent: false,
            config_sent: false,
            pending: VecDeque::new(),
            buffers: HashMap::new(),
            next_index: 0,
            eos_pending: false,
            last_pts: 0,
            frames_seen: 0,
        }
    }

    fn stash(&mut self, data: Vec<u8>, pts_us: i64, flags: u32) -> usize {
        self.next_index += 1;
        self.buffers.insert(self.next_index, (data, pts_us, flags));
        self.next_index
    }
}

impl Default for MockEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoCodec for MockEncoder {
    fn dequeue_input(&mut self, _timeout: Duration) -> Option<usize> {
        Some(self.next_index + 1)
    }

    fn queue_input(
        &mut self,
        _index: usize,
        data: &[u8],
        pts_us: i64,
        flags: u32,
    ) -> Result<(), IngestError> {
        if flags & sample_flags::END_OF_STREAM != 0 {
            self.eos_pending = true;
            return Ok(());
        }
        self.pending.push_back((data.to_vec(), pts_us));
        self.last_pts = pts_us;
        Ok(())
    }

    fn dequeue_output(&mut self, _timeout: Duration) -> Result<CodecOutput, IngestError> {
        if !self.format_sent {
            self.format_sent = true;
            let format = MediaFormat::video(MIME_H264, 1920, 1080)
                .with_csd(vec![vec![0, 0, 0, 1, 0x67], vec![0, 0, 0, 1, 0x68]]);
            return Ok(CodecOutput::FormatChanged(format));
        }
        if !self.config_sent {
            self.config_sent = true;
            let index = self.stash(vec![0, 0, 0, 1, 0x67], 0, sample_flags::CODEC_CONFIG);
            return Ok(CodecOutput::Buffer {
                index,
                pts_us: 0,
                flags: sample_flags::CODEC_CONFIG,
            });
        }
        if let Some((data, pts_us)) = self.pending.pop_front() {
            let flags = if self.frames_seen == 0 {
                sample_flags::KEY_FRAME
            } else {
                0
            };
            self.frames_seen += 1;
            let index = self.stash(data, pts_us, flags);
            let (_, pts_us, flags) = self.buffers[&index].clone();
            return Ok(CodecOutput::Buffer {
                index,
                pts_us,
                flags,
            });
        }
        if self.eos_pending {
            self.eos_pending = false;
            let index = self.stash(Vec::new(), self.last_pts, sample_flags::END_OF_STREAM);
            return Ok(CodecOutput::Buffer {
                index,
                pts_us: self.last_pts,
                flags: sample_flags::END_OF_STREAM,
            });
        }
        Ok(CodecOutput::TryAgainLater)
    }

    fn output_data(&mut self, index: usize) -> Vec<u8> {
        self.buffers
            .get(&index)
            .map(|(data, _, _)| data.clone())
            .unwrap_or_default()
    }

    fn release_output(&mut self, index: usize, _render: bool) {
        self.buffers.remove(&index);
    }

    fn stop(&mut self) {}
}

/// Mock host media framework: hands out mock codecs and in-memory muxers
/// and keeps probes for assertions.
#[derive(Default)]
pub struct MockMediaEngine {
    muxers: Mutex<Vec<Arc<Mutex<RecordedMp4>>>>,
    decoders: Mutex<Vec<Arc<DecoderProbe>>>,
    encoders_created: AtomicUsize,
    decoder_stalled: Arc<AtomicBool>,
    muxer_gate: Mutex<Option<crossbeam_channel::Receiver<()>>>,
}

impl MockMediaEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// All muxers created so far, oldest first.
    pub fn muxers(&self) -> Vec<Arc<Mutex<RecordedMp4>>> {
        self.muxers.lock().unwrap().clone()
    }

    pub fn last_muxer(&self) -> Option<Arc<Mutex<RecordedMp4>>> {
        self.muxers.lock().unwrap().last().cloned()
    }

    pub fn decoders(&self) -> Vec<Arc<DecoderProbe>> {
        self.decoders.lock().unwrap().clone()
    }

    pub fn encoders_created(&self) -> usize {
        self.encoders_created.load(Ordering::Acquire)
    }

    /// Make decoders refuse input slots (queue saturation).
    pub fn set_decoder_stalled(&self, stalled: bool) {
        self.decoder_stalled.store(stalled, Ordering::Release);
    }

    /// Gate every subsequently created muxer's writes on this channel.
    pub fn set_muxer_gate(&self, gate: crossbeam_channel::Receiver<()>) {
        *self.muxer_gate.lock().unwrap() = Some(gate);
    }
}

impl MediaEngine for MockMediaEngine {
    fn create_decoder(
        &self,
        format: &MediaFormat,
        _surface: Arc<dyn DisplaySurface>,
    ) -> Result<Box<dyn VideoCodec>, IngestError> {
        let probe = Arc::new(DecoderProbe::default());
        *probe.format.lock().unwrap() = Some(format.clone());
        self.decoders.lock().unwrap().push(probe.clone());
        Ok(Box::new(MockDecoder {
            probe,
            pending: VecDeque::new(),
            next_index: 0,
            stalled: self.decoder_stalled.clone(),
        }))
    }

    fn create_encoder(&self, _format: &MediaFormat) -> Result<Box<dyn VideoCodec>, IngestError> {
        self.encoders_created.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(MockEncoder::new()))
    }

    fn create_muxer(&self, _path: &Path) -> Result<Box<dyn SampleMuxer>, IngestError> {
        let muxer = match self.muxer_gate.lock().unwrap().clone() {
            Some(gate) => MockMuxer::with_gate(gate),
            None => MockMuxer::new(),
        };
        self.muxers.lock().unwrap().push(muxer.recorded());
        Ok(Box::new(muxer))
    }
}

// ---------------------------------------------------------------------------
// Test surface
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SurfaceLog {
    blits: Vec<(u32, u32, Vec<u8>)>,
    locks: usize,
    unlocks: usize,
}

/// A lockable surface that records every blit.
#[derive(Default)]
pub struct TestSurface {
    log: Mutex<SurfaceLog>,
    available: AtomicBool,
}

impl TestSurface {
    pub fn new() -> Self {
        Self {
            log: Mutex::new(SurfaceLog::default()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    pub fn blit_count(&self) -> usize {
        self.log.lock().unwrap().blits.len()
    }

    pub fn last_blit(&self) -> Option<(u32, u32, Vec<u8>)> {
        self.log.lock().unwrap().blits.last().cloned()
    }

    /// Lock/unlock counts must stay balanced.
    pub fn lock_balance(&self) -> (usize, usize) {
        let log = self.log.lock().unwrap();
        (log.locks, log.unlocks)
    }
}

struct TestCanvas<'a> {
    log: &'a Mutex<SurfaceLog>,
}

impl DisplaySurface for TestSurface {
    fn lock_canvas(&self) -> Option<Box<dyn Canvas + '_>> {
        if !self.available.load(Ordering::Acquire) {
            return None;
        }
        self.log.lock().unwrap().locks += 1;
        Some(Box::new(TestCanvas { log: &self.log }))
    }
}

impl Canvas for TestCanvas<'_> {
    fn draw_rgba(&mut self, pixels: &[u8], width: u32, height: u32) {
        self.log
            .lock()
            .unwrap()
            .blits
            .push((width, height, pixels.to_vec()));
    }
}

impl Drop for TestCanvas<'_> {
    fn drop(&mut self) {
        self.log.lock().unwrap().unlocks += 1;
    }
}
