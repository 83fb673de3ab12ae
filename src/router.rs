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

//! Per-frame dispatch from the capture thread to renderer, decoder, and
//! recorder.
//!
//! The whole algorithm runs synchronously on the capture thread; the only
//! blocking points are the bounded recorder offer and the decoder-init
//! mutex on the first compressed frame. A borrowed frame never crosses a
//! thread: the recorder gets a deep copy, the decoder a copied byte view.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::decode::{CompressedFrame, SurfaceDecoder};
use crate::error::IngestError;
use crate::frame::{FourCc, FrameInfo, FrameLease};
use crate::media::MediaEngine;
use crate::record::{RecordingState, StreamRecorder};
use crate::render::UncompressedRenderer;
use crate::surface::DisplaySurface;

/// Sliding window over which the bitrate is measured, and the publish
/// cadence of the digest string.
const BITRATE_WINDOW: Duration = Duration::from_millis(1000);
const BITRATE_PUBLISH_INTERVAL: Duration = Duration::from_millis(1000);

/// Routes captured frames to the active consumers.
pub struct FrameRouter {
    engine: Arc<dyn MediaEngine>,
    recorder: Arc<StreamRecorder>,
    surface: RwLock<Option<Arc<dyn DisplaySurface>>>,
    renderer: Mutex<UncompressedRenderer>,
    decoder: Mutex<Option<SurfaceDecoder>>,
    decoder_ready: AtomicBool,
    /// (width, height, fourcc) of the last routed frame, for digest
    /// change detection.
    last_format: Mutex<Option<(u32, u32, FourCc)>>,
    /// Most recent frame shape, consulted when a recording starts.
    last_video: Mutex<Option<FrameInfo>>,
    video_info_tx: watch::Sender<Option<String>>,
    bitrate_tx: watch::Sender<Option<String>>,
    bitrate: Mutex<BitrateWindow>,
}

impl FrameRouter {
    pub fn new(engine: Arc<dyn MediaEngine>, recorder: Arc<StreamRecorder>) -> Self {
        let (video_info_tx, _) = watch::channel(None);
        let (bitrate_tx, _) = watch::channel(None);
        Self {
            engine,
            recorder,
            surface: RwLock::new(None),
            renderer: Mutex::new(UncompressedRenderer::new()),
            decoder: Mutex::new(None),
            decoder_ready: AtomicBool::new(false),
            last_format: Mutex::new(None),
            last_video: Mutex::new(None),
            video_info_tx,
            bitrate_tx,
            bitrate: Mutex::new(BitrateWindow::new()),
        }
    }

    /// Bind or unbind the display surface. Unbinding tears down the
    /// decoder and recycles the renderer's buffers.
    pub fn set_surface(&self, surface: Option<Arc<dyn DisplaySurface>>) {
        if surface.is_none() {
            self.teardown_decoder();
            self.renderer.lock().unwrap().recycle();
        }
        *self.surface.write().unwrap() = surface;
    }

    /// Route one captured frame. The lease releases the native buffer when
    /// this returns, on every path.
    pub fn route(&self, lease: FrameLease) {
        let info = *lease.info();

        // 1. No surface, no consumers: drop (the lease still releases).
        let Some(surface) = self.surface.read().unwrap().clone() else {
            return;
        };

        // 2. Track the stream shape and publish the digest on change.
        self.update_video_info(&info);

        // 3. The recorder outlives the lease, so it gets a deep copy.
        if self.recorder.is_recording() {
            self.recorder.offer(lease.to_owned_copy());
        }

        // 4./5. Exactly one of renderer and decoder sees the frame.
        if info.is_compressed() {
            self.dispatch_compressed(&info, lease.data());
        } else {
            if self.decoder_ready.load(Ordering::Acquire) {
                // Compressed-to-uncompressed switch.
                self.teardown_decoder();
            }
            let mut renderer = self.renderer.lock().unwrap();
            if let Err(e) = renderer.render(&info, lease.data(), surface.as_ref()) {
                warn!("frame dropped by renderer: {e}");
            }
        }

        // 6. Bitrate digest.
        let published = self
            .bitrate
            .lock()
            .unwrap()
            .push(lease.data().len(), Instant::now());
        if let Some(text) = published {
            self.bitrate_tx.send_replace(Some(text));
        }
    }

    /// Start recording the stream using the most recently routed shape.
    pub fn start_recording(&self) -> Result<PathBuf, IngestError> {
        let info = self.last_video.lock().unwrap().ok_or_else(|| {
            IngestError::UnsupportedRecordingFormat("No video stream to record".to_string())
        })?;
        self.recorder.start(&info)
    }

    pub fn stop_recording(&self) {
        self.recorder.stop();
    }

    pub fn recording_state(&self) -> watch::Receiver<RecordingState> {
        self.recorder.state()
    }

    /// `"{W}x{H} @ {fps} | {label}"` of the current stream.
    pub fn video_info(&self) -> watch::Receiver<Option<String>> {
        self.video_info_tx.subscribe()
    }

    /// `"{X.Y} Mbps"` / `"{N} Kbps"`, republished every second.
    pub fn bitrate(&self) -> watch::Receiver<Option<String>> {
        self.bitrate_tx.subscribe()
    }

    /// Connection went away: finalize any recording and drop the decoder.
    pub fn on_connection_down(&self) {
        self.recorder.stop();
        self.teardown_decoder();
        self.video_info_tx.send_replace(None);
        self.bitrate_tx.send_replace(None);
        *self.last_format.lock().unwrap() = None;
    }

    fn update_video_info(&self, info: &FrameInfo) {
        *self.last_video.lock().unwrap() = Some(*info);
        let key = (info.width, info.height, info.fourcc);
        let mut last = self.last_format.lock().unwrap();
        if *last != Some(key) {
            *last = Some(key);
            let digest = format!(
                "{}x{} @ {} | {}",
                info.width,
                info.height,
                format_fps(info.fps()),
                info.fourcc.label()
            );
            info!(%digest, "video stream shape changed");
            self.video_info_tx.send_replace(Some(digest));
        }
    }

    fn dispatch_compressed(&self, info: &FrameInfo, data: &[u8]) {
        // Double-checked lazy init: flag read, then the mutex, then flag
        // and surface again. The surface can be unbound between checks.
        if !self.decoder_ready.load(Ordering::Acquire) {
            let mut guard = self.decoder.lock().unwrap();
            if !self.decoder_ready.load(Ordering::Acquire) {
                let Some(surface) = self.surface.read().unwrap().clone() else {
                    return;
                };
                match SurfaceDecoder::start(
                    self.engine.as_ref(),
                    info.fourcc,
                    info.width,
                    info.height,
                    surface,
                ) {
                    Ok(decoder) => {
                        *guard = Some(decoder);
                        self.decoder_ready.store(true, Ordering::Release);
                    }
                    Err(e) => {
                        error!("decoder init failed: {e}");
                        return;
                    }
                }
            }
        }

        let mut guard = self.decoder.lock().unwrap();
        if let Some(decoder) = guard.as_mut() {
            if !decoder.matches(info.fourcc, info.width, info.height) {
                // Stream geometry changed mid-connection: recreate while
                // holding the surface; in-flight frames are dropped.
                decoder.shutdown();
                let surface = self.surface.read().unwrap().clone();
                let replacement = surface.and_then(|s| {
                    SurfaceDecoder::start(
                        self.engine.as_ref(),
                        info.fourcc,
                        info.width,
                        info.height,
                        s,
                    )
                    .map_err(|e| error!("decoder reconfigure failed: {e}"))
                    .ok()
                });
                match replacement {
                    Some(decoder) => *guard = Some(decoder),
                    None => {
                        *guard = None;
                        self.decoder_ready.store(false, Ordering::Release);
                        return;
                    }
                }
            }
        }
        if let Some(decoder) = guard.as_ref() {
            decoder.submit(CompressedFrame {
                data: data.to_vec(),
                pts_us: info.timestamp_us,
                frame_rate: (info.frame_rate_n, info.frame_rate_d),
            });
        }
    }

    fn teardown_decoder(&self) {
        let mut guard = self.decoder.lock().unwrap();
        if let Some(mut decoder) = guard.take() {
            decoder.shutdown();
        }
        self.decoder_ready.store(false, Ordering::Release);
    }
}

fn format_fps(fps: f64) -> String {
    if (fps - fps.round()).abs() < 0.005 {
        format!("{}", fps.round() as u64)
    } else {
        format!("{fps:.2}")
    }
}

/// Sliding-window byte counter for the bitrate digest.
struct BitrateWindow {
    samples: VecDeque<(Instant, usize)>,
    last_publish: Option<Instant>,
}

impl BitrateWindow {
    fn new() -> Self {
        Self {
            samples: VecDeque::new(),
            last_publish: None,
        }
    }

    /// Record `bytes` at `now`; returns the digest string when a publish
    /// interval has elapsed.
    fn push(&mut self, bytes: usize, now: Instant) -> Option<String> {
        self.samples.push_back((now, bytes));
        while let Some(&(t, _)) = self.samples.front() {
            if now.duration_since(t) > BITRATE_WINDOW {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        let due = match self.last_publish {
            None => true,
            Some(t) => now.duration_since(t) >= BITRATE_PUBLISH_INTERVAL,
        };
        if !due {
            return None;
        }
        self.last_publish = Some(now);
        let bits: u64 = self.samples.iter().map(|&(_, b)| b as u64 * 8).sum();
        let bps = bits as f64 / BITRATE_WINDOW.as_secs_f64();
        Some(format_bitrate(bps))
    }
}

fn format_bitrate(bps: f64) -> String {
    if bps >= 1_000_000.0 {
        format!("{:.1} Mbps", bps / 1_000_000.0)
    } else {
        format!("{} Kbps", (bps / 1000.0).round() as u64)
    }
}
