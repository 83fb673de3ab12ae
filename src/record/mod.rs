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

//! Stream recording to MP4, off the capture thread.
//!
//! A single background writer owns all mutable muxer state. The capture
//! side only ever deep-copies frames into a bounded queue with a short
//! blocking offer, so a slow disk can never stall capture.

pub mod annexb;
mod encode;
mod files;
mod passthrough;

pub use encode::{bitrate_for, encoder_format};
pub use files::{list_recordings, RecordingFile};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::Local;
use crossbeam_channel::{bounded, Receiver, Sender};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::IngestError;
use crate::frame::{FourCc, FrameInfo, VideoFrameCopy};
use crate::media::MediaEngine;
use crate::thread_util::join_timeout;

use self::encode::EncodeWriter;
use self::passthrough::PassthroughWriter;

/// Frames buffered between the capture thread and the writer.
const QUEUE_CAPACITY: usize = 30;
/// How long the capture thread may block offering a frame.
const OFFER_TIMEOUT: Duration = Duration::from_millis(200);
/// Writer's wait on the frame queue.
const WRITER_POLL: Duration = Duration::from_millis(100);
/// Writer join bound on stop (3 s, then a 1 s grace period).
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(3);
const STOP_JOIN_GRACE: Duration = Duration::from_secs(1);

/// Recorder state exposed to the embedding UI.
#[derive(Debug, Clone)]
pub enum RecordingState {
    Idle,
    Recording { started: Instant },
    /// Finished; carries the finalized file when one was produced.
    Stopped(Option<PathBuf>),
    Error(String),
}

impl RecordingState {
    pub fn duration(&self) -> Option<Duration> {
        match self {
            RecordingState::Recording { started } => Some(started.elapsed()),
            _ => None,
        }
    }
}

enum RecordSink {
    Passthrough(PassthroughWriter),
    Encode(EncodeWriter),
}

impl RecordSink {
    fn write_frame(&mut self, frame: &VideoFrameCopy) -> Result<(), IngestError> {
        match self {
            RecordSink::Passthrough(w) => w.write_frame(frame),
            RecordSink::Encode(w) => w.write_frame(frame),
        }
    }

    fn finish(&mut self) -> Result<(), IngestError> {
        match self {
            RecordSink::Passthrough(w) => w.finish(),
            RecordSink::Encode(w) => w.finish(),
        }
    }
}

/// Persists the stream to MP4 on a background writer thread.
pub struct StreamRecorder {
    engine: Arc<dyn MediaEngine>,
    recordings_dir: PathBuf,
    recording: Arc<AtomicBool>,
    queue_tx: Mutex<Option<Sender<VideoFrameCopy>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    state_tx: watch::Sender<RecordingState>,
}

impl StreamRecorder {
    pub fn new(engine: Arc<dyn MediaEngine>, recordings_dir: impl Into<PathBuf>) -> Self {
        let (state_tx, _) = watch::channel(RecordingState::Idle);
        Self {
            engine,
            recordings_dir: recordings_dir.into(),
            recording: Arc::new(AtomicBool::new(false)),
            queue_tx: Mutex::new(None),
            writer: Mutex::new(None),
            state_tx,
        }
    }

    /// Start a recording for a stream shaped like `info`.
    ///
    /// The branch is picked from the FourCC: compressed input is muxed
    /// verbatim, uncompressed input is re-encoded to H.264. Only one
    /// recording can be active; a second start is rejected.
    pub fn start(&self, info: &FrameInfo) -> Result<PathBuf, IngestError> {
        if self
            .recording
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(IngestError::RecordingAlreadyActive);
        }
        match self.start_inner(info) {
            Ok(path) => Ok(path),
            Err(e) => {
                self.recording.store(false, Ordering::Release);
                self.state_tx
                    .send_replace(RecordingState::Error(e.to_string()));
                Err(e)
            }
        }
    }

    fn start_inner(&self, info: &FrameInfo) -> Result<PathBuf, IngestError> {
        let path = self.recording_path(info)?;
        std::fs::create_dir_all(&self.recordings_dir)?;

        let sink = match info.fourcc {
            FourCc::H264 | FourCc::Hevc => {
                let muxer = self.engine.create_muxer(&path)?;
                RecordSink::Passthrough(PassthroughWriter::new(
                    muxer,
                    info.fourcc == FourCc::Hevc,
                    info.width,
                    info.height,
                ))
            }
            FourCc::Uyvy | FourCc::Bgra | FourCc::Bgrx | FourCc::Rgba | FourCc::Rgbx => {
                let encoder = self
                    .engine
                    .create_encoder(&encode::encoder_format(info.width, info.height))?;
                let muxer = self.engine.create_muxer(&path)?;
                RecordSink::Encode(EncodeWriter::new(encoder, muxer))
            }
            other => {
                return Err(IngestError::UnsupportedRecordingFormat(other.to_string()));
            }
        };

        let (tx, rx) = bounded::<VideoFrameCopy>(QUEUE_CAPACITY);
        let recording = self.recording.clone();
        let state_tx = self.state_tx.clone();
        let writer_path = path.clone();
        let writer = std::thread::Builder::new()
            .name("recorder-writer".to_string())
            .spawn(move || writer_loop(sink, rx, recording, state_tx, writer_path))
            .expect("failed to spawn recorder writer thread");

        *self.queue_tx.lock().unwrap() = Some(tx);
        *self.writer.lock().unwrap() = Some(writer);
        self.state_tx.send_replace(RecordingState::Recording {
            started: Instant::now(),
        });
        info!(path = %path.display(), "recording started");
        Ok(path)
    }

    /// Stop the active recording and finalize the file. Idempotent.
    pub fn stop(&self) {
        if self
            .recording
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        // Closing the queue lets the writer drain what is buffered, then
        // run end-of-stream processing.
        drop(self.queue_tx.lock().unwrap().take());
        if let Some(writer) = self.writer.lock().unwrap().take() {
            if !join_timeout(writer, STOP_JOIN_TIMEOUT + STOP_JOIN_GRACE, "recorder-writer") {
                warn!("recorder writer abandoned during stop");
            }
        }
    }

    /// Offer one owned frame to the writer queue. Blocks at most 200 ms
    /// when the queue is full, then drops the frame.
    pub fn offer(&self, frame: VideoFrameCopy) {
        if !self.recording.load(Ordering::Acquire) {
            return;
        }
        let tx = self.queue_tx.lock().unwrap().clone();
        if let Some(tx) = tx {
            match tx.send_timeout(frame, OFFER_TIMEOUT) {
                Ok(()) => {}
                Err(crossbeam_channel::SendTimeoutError::Timeout(_)) => {
                    warn!("recorder queue full for {OFFER_TIMEOUT:?}; frame dropped");
                }
                Err(crossbeam_channel::SendTimeoutError::Disconnected(_)) => {}
            }
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    /// Watch the recorder state (`Idle | Recording | Stopped | Error`).
    pub fn state(&self) -> watch::Receiver<RecordingState> {
        self.state_tx.subscribe()
    }

    pub fn recordings_dir(&self) -> &Path {
        &self.recordings_dir
    }

    fn recording_path(&self, info: &FrameInfo) -> Result<PathBuf, IngestError> {
        let codec = match info.fourcc {
            FourCc::Hevc => "H265",
            // Both the H.264 passthrough and every re-encoded format land
            // in an H.264 track.
            _ => "H264",
        };
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        Ok(self.recordings_dir.join(format!(
            "NDI_{stamp}_{}x{}_{codec}.mp4",
            info.width, info.height
        )))
    }
}

impl Drop for StreamRecorder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn writer_loop(
    mut sink: RecordSink,
    rx: Receiver<VideoFrameCopy>,
    recording: Arc<AtomicBool>,
    state_tx: watch::Sender<RecordingState>,
    path: PathBuf,
) {
    loop {
        match rx.recv_timeout(WRITER_POLL) {
            Ok(frame) => {
                if let Err(e) = sink.write_frame(&frame) {
                    // Keep going with the next frame.
                    error!("sample write failed: {e}");
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                if !recording.load(Ordering::Acquire) {
                    // Drain whatever is still buffered before end-of-stream.
                    while let Ok(frame) = rx.try_recv() {
                        if let Err(e) = sink.write_frame(&frame) {
                            error!("sample write failed: {e}");
                        }
                    }
                    break;
                }
            }
            // Queue closed by stop(); everything buffered has been
            // delivered already.
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }

    match sink.finish() {
        Ok(()) => {
            state_tx.send_replace(RecordingState::Stopped(Some(path)));
        }
        Err(e) => {
            error!("finalizing recording failed: {e}");
            state_tx.send_replace(RecordingState::Error(e.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockMediaEngine;

    fn compressed_info() -> FrameInfo {
        FrameInfo {
            width: 1920,
            height: 1080,
            fourcc: FourCc::H264,
            line_stride_bytes: 0,
            frame_rate_n: 30,
            frame_rate_d: 1,
            timestamp_us: 0,
            progressive: true,
        }
    }

    fn recorder(engine: &Arc<MockMediaEngine>) -> (StreamRecorder, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let recorder = StreamRecorder::new(engine.clone(), dir.path().join("recordings"));
        (recorder, dir)
    }

    #[test]
    fn start_stop_cycle_is_the_only_legal_one() {
        let engine = Arc::new(MockMediaEngine::new());
        let (recorder, _dir) = recorder(&engine);

        let info = compressed_info();
        recorder.start(&info).unwrap();
        assert!(recorder.is_recording());
        // A second start is rejected while one is active.
        assert!(matches!(
            recorder.start(&info),
            Err(IngestError::RecordingAlreadyActive)
        ));
        recorder.stop();
        assert!(!recorder.is_recording());
        // Stop is idempotent.
        recorder.stop();
        // And a fresh start works again.
        recorder.start(&info).unwrap();
        recorder.stop();
    }

    #[test]
    fn filename_follows_the_convention() {
        let engine = Arc::new(MockMediaEngine::new());
        let (recorder, _dir) = recorder(&engine);
        let path = recorder.start(&compressed_info()).unwrap();
        recorder.stop();

        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("NDI_"), "{name}");
        assert!(name.ends_with("_1920x1080_H264.mp4"), "{name}");
        // NDI_YYYYMMDD_HHMMSS_WxH_CODEC.mp4
        assert_eq!(name.len(), "NDI_20250101_120000_1920x1080_H264.mp4".len());
    }

    #[test]
    fn unsupported_format_is_rejected() {
        let engine = Arc::new(MockMediaEngine::new());
        let (recorder, _dir) = recorder(&engine);
        let info = FrameInfo {
            fourcc: FourCc::I420,
            ..compressed_info()
        };
        assert!(matches!(
            recorder.start(&info),
            Err(IngestError::UnsupportedRecordingFormat(_))
        ));
        assert!(!recorder.is_recording());
        // The failed start leaves the recorder restartable.
        recorder.start(&compressed_info()).unwrap();
        recorder.stop();
    }

    #[test]
    fn state_reaches_stopped_with_the_file() {
        let engine = Arc::new(MockMediaEngine::new());
        let (recorder, _dir) = recorder(&engine);
        let mut state = recorder.state();
        let path = recorder.start(&compressed_info()).unwrap();
        assert!(matches!(
            &*state.borrow_and_update(),
            RecordingState::Recording { .. }
        ));
        recorder.stop();
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if let RecordingState::Stopped(Some(p)) = &*state.borrow_and_update() {
                assert_eq!(p, &path);
                break;
            }
            assert!(Instant::now() < deadline, "writer never reached Stopped");
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}
