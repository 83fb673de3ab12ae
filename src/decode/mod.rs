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

//! The hardware decoder adapter for compressed frames.
//!
//! Output goes straight to the display surface (surface-mode decode); the
//! application never reads pixels back. Two worker threads shuttle data:
//! one feeds the codec from a bounded queue, one drains and renders.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, error, info, warn};

use crate::error::IngestError;
use crate::frame::FourCc;
use crate::media::{CodecOutput, MediaEngine, MediaFormat, VideoCodec, MIME_H264, MIME_HEVC};
use crate::surface::DisplaySurface;
use crate::thread_util::join_timeout;

/// Real-time bound on buffered compressed frames.
const INPUT_QUEUE_CAPACITY: usize = 5;
/// Input thread's wait on the frame queue.
const QUEUE_POLL: Duration = Duration::from_millis(100);
/// Bounded waits against the codec's buffer pools.
const CODEC_TIMEOUT: Duration = Duration::from_millis(10);
/// Worker join bound during shutdown.
const SHUTDOWN_JOIN: Duration = Duration::from_secs(2);

/// One compressed frame on its way to the codec.
pub struct CompressedFrame {
    pub data: Vec<u8>,
    pub pts_us: i64,
    pub frame_rate: (u32, u32),
}

/// Drives a low-latency hardware decoder bound to a display surface.
pub struct SurfaceDecoder {
    mime: &'static str,
    width: u32,
    height: u32,
    input_tx: Sender<CompressedFrame>,
    /// Producer-side view of the queue, used to evict the oldest entry
    /// when the queue is full.
    input_rx: Receiver<CompressedFrame>,
    running: Arc<AtomicBool>,
    frames_decoded: Arc<AtomicU64>,
    last_frame_rate: Arc<Mutex<(u32, u32)>>,
    input_thread: Option<JoinHandle<()>>,
    output_thread: Option<JoinHandle<()>>,
}

impl SurfaceDecoder {
    /// Create the codec and start both worker threads.
    pub fn start(
        engine: &dyn MediaEngine,
        fourcc: FourCc,
        width: u32,
        height: u32,
        surface: Arc<dyn DisplaySurface>,
    ) -> Result<Self, IngestError> {
        let mime = mime_for(fourcc)?;
        let format = MediaFormat::video(mime, width, height).with_low_latency();
        let codec = engine.create_decoder(&format, surface)?;
        let codec = Arc::new(Mutex::new(codec));

        let (input_tx, input_rx) = bounded::<CompressedFrame>(INPUT_QUEUE_CAPACITY);
        let running = Arc::new(AtomicBool::new(true));
        let frames_decoded = Arc::new(AtomicU64::new(0));
        let last_frame_rate = Arc::new(Mutex::new((0u32, 0u32)));

        let input_thread = {
            let codec = codec.clone();
            let running = running.clone();
            let rx = input_rx.clone();
            let last_frame_rate = last_frame_rate.clone();
            std::thread::Builder::new()
                .name("decoder-input".to_string())
                .spawn(move || input_loop(codec, rx, running, last_frame_rate))
                .expect("failed to spawn decoder input thread")
        };
        let output_thread = {
            let codec = codec.clone();
            let running = running.clone();
            let frames_decoded = frames_decoded.clone();
            std::thread::Builder::new()
                .name("decoder-output".to_string())
                .spawn(move || output_loop(codec, running, frames_decoded))
                .expect("failed to spawn decoder output thread")
        };

        info!(mime, width, height, "surface decoder started");
        Ok(Self {
            mime,
            width,
            height,
            input_tx,
            input_rx,
            running,
            frames_decoded,
            last_frame_rate,
            input_thread: Some(input_thread),
            output_thread: Some(output_thread),
        })
    }

    /// Whether this decoder instance still matches the incoming stream. A
    /// mismatch requires teardown and recreation.
    pub fn matches(&self, fourcc: FourCc, width: u32, height: u32) -> bool {
        mime_for(fourcc).map(|m| m == self.mime).unwrap_or(false)
            && self.width == width
            && self.height == height
    }

    /// Queue one compressed frame. When the queue is full the oldest entry
    /// is evicted first: real-time takes priority over completeness.
    pub fn submit(&self, frame: CompressedFrame) {
        let mut frame = frame;
        loop {
            match self.input_tx.try_send(frame) {
                Ok(()) => return,
                Err(TrySendError::Full(f)) => {
                    if self.input_rx.try_recv().is_ok() {
                        debug!("decoder queue full; dropped oldest frame");
                    }
                    frame = f;
                }
                Err(TrySendError::Disconnected(_)) => {
                    warn!("decoder input queue is gone; frame dropped");
                    return;
                }
            }
        }
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded.load(Ordering::Relaxed)
    }

    /// Last frame-rate fraction observed on the input side, for display.
    pub fn last_frame_rate(&self) -> (u32, u32) {
        *self.last_frame_rate.lock().unwrap()
    }

    /// Stop both workers, clear the queue, and release the codec.
    pub fn shutdown(&mut self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(t) = self.input_thread.take() {
            join_timeout(t, SHUTDOWN_JOIN, "decoder-input");
        }
        if let Some(t) = self.output_thread.take() {
            join_timeout(t, SHUTDOWN_JOIN, "decoder-output");
        }
        while self.input_rx.try_recv().is_ok() {}
        info!("surface decoder stopped");
    }
}

impl Drop for SurfaceDecoder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn mime_for(fourcc: FourCc) -> Result<&'static str, IngestError> {
    match fourcc {
        FourCc::H264 => Ok(MIME_H264),
        FourCc::Hevc => Ok(MIME_HEVC),
        other => Err(IngestError::UnsupportedPixelFormat(other.to_string())),
    }
}

fn input_loop(
    codec: Arc<Mutex<Box<dyn VideoCodec>>>,
    rx: Receiver<CompressedFrame>,
    running: Arc<AtomicBool>,
    last_frame_rate: Arc<Mutex<(u32, u32)>>,
) {
    while running.load(Ordering::Acquire) {
        let frame = match rx.recv_timeout(QUEUE_POLL) {
            Ok(frame) => frame,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        };
        *last_frame_rate.lock().unwrap() = frame.frame_rate;

        let mut codec = codec.lock().unwrap();
        match codec.dequeue_input(CODEC_TIMEOUT) {
            Some(index) => {
                if let Err(e) = codec.queue_input(index, &frame.data, frame.pts_us, 0) {
                    error!("decoder input submit failed: {e}");
                }
            }
            // No slot inside the bound: the codec is saturated, drop.
            None => debug!("no decoder input slot; frame dropped"),
        }
    }
}

fn output_loop(
    codec: Arc<Mutex<Box<dyn VideoCodec>>>,
    running: Arc<AtomicBool>,
    frames_decoded: Arc<AtomicU64>,
) {
    while running.load(Ordering::Acquire) {
        let result = codec.lock().unwrap().dequeue_output(CODEC_TIMEOUT);
        match result {
            Ok(CodecOutput::Buffer { index, .. }) => {
                // Rendering happens inside the codec/compositor.
                codec.lock().unwrap().release_output(index, true);
                frames_decoded.fetch_add(1, Ordering::Relaxed);
            }
            Ok(CodecOutput::FormatChanged(format)) => {
                info!(
                    mime = %format.mime,
                    width = format.width,
                    height = format.height,
                    "decoder output format changed"
                );
            }
            Ok(CodecOutput::TryAgainLater) => {}
            Err(e) => {
                // The decoder is not restarted mid-cycle; keep draining.
                error!("decoder fault: {e}");
            }
        }
    }
    codec.lock().unwrap().stop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockMediaEngine, TestSurface};

    fn test_frame(n: u8) -> CompressedFrame {
        CompressedFrame {
            data: vec![n; 8],
            pts_us: n as i64 * 33_333,
            frame_rate: (30, 1),
        }
    }

    #[test]
    fn decodes_and_renders_submitted_frames() {
        let engine = MockMediaEngine::new();
        let surface = Arc::new(TestSurface::new());
        let mut decoder =
            SurfaceDecoder::start(&engine, FourCc::H264, 1920, 1080, surface).unwrap();

        for n in 0..3 {
            decoder.submit(test_frame(n));
        }
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while decoder.frames_decoded() < 3 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(decoder.frames_decoded(), 3);
        assert_eq!(decoder.last_frame_rate(), (30, 1));
        decoder.shutdown();

        let decoders = engine.decoders();
        assert_eq!(decoders.len(), 1);
        assert_eq!(decoders[0].rendered(), 3);
        assert!(decoders[0].stopped());
    }

    #[test]
    fn full_queue_evicts_oldest() {
        let engine = MockMediaEngine::new();
        // Stall the codec so nothing is drained from the queue.
        engine.set_decoder_stalled(true);
        let surface = Arc::new(TestSurface::new());
        let decoder = SurfaceDecoder::start(&engine, FourCc::H264, 1920, 1080, surface).unwrap();

        // Let the input thread park in its first poll, then overfill.
        std::thread::sleep(Duration::from_millis(20));
        for n in 0..(INPUT_QUEUE_CAPACITY as u8 + 3) {
            decoder.submit(test_frame(n));
        }
        // The queue holds at most the capacity; the newest frames survive.
        assert!(decoder.input_rx.len() <= INPUT_QUEUE_CAPACITY);
    }

    #[test]
    fn reconfigure_is_detected() {
        let engine = MockMediaEngine::new();
        let surface = Arc::new(TestSurface::new());
        let decoder = SurfaceDecoder::start(&engine, FourCc::H264, 1280, 720, surface).unwrap();
        assert!(decoder.matches(FourCc::H264, 1280, 720));
        assert!(!decoder.matches(FourCc::H264, 1920, 1080));
        assert!(!decoder.matches(FourCc::Hevc, 1280, 720));
    }

    #[test]
    fn unsupported_fourcc_is_rejected() {
        let engine = MockMediaEngine::new();
        let surface = Arc::new(TestSurface::new());
        assert!(matches!(
            SurfaceDecoder::start(&engine, FourCc::Uyvy, 640, 480, surface),
            Err(IngestError::UnsupportedPixelFormat(_))
        ));
    }
}
