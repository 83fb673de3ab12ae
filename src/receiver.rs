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

//! The receiver: owns the native handle, drives the capture loop, and
//! exposes the connection state machine.
//!
//! Teardown discipline: the capture loop reads the handle through one
//! atomic load per iteration and exits on null; disconnect clears the
//! receiving flag, joins the loop with a bounded wait, and only then swaps
//! the handle to null and destroys it. The native handle is never destroyed
//! under a live capture call.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::IngestError;
use crate::frame::FrameLease;
use crate::media::MediaEngine;
use crate::record::{RecordingState, StreamRecorder};
use crate::router::FrameRouter;
use crate::runtime::{NdiRuntime, ReceiverOptions, NULL_HANDLE};
use crate::source::SourceDescriptor;
use crate::surface::DisplaySurface;
use crate::thread_util::join_timeout;

/// Consecutive null captures required (with the other guards) to declare
/// the connection lost.
pub const CONNECTION_LOST_THRESHOLD: u32 = 5;
/// Bounded wait on the native capture call.
const CAPTURE_TIMEOUT_MS: u32 = 1000;
/// Capture-thread join bounds: the asynchronous disconnect path waits
/// longer than the synchronous one, but both join before destroy.
const DISCONNECT_JOIN_TIMEOUT: Duration = Duration::from_secs(3);
const DISCONNECT_SYNC_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Receiver connection state, exposed to the embedding UI.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting(SourceDescriptor),
    Connected(SourceDescriptor),
    Error(String),
}

/// Snapshot of receiver performance counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub total_video_frames: u64,
    pub dropped_video_frames: u64,
    pub total_audio_frames: u64,
    pub dropped_audio_frames: u64,
    pub total_metadata_frames: u64,
    /// 100 * (1 - dropped/total), clamped; 100 before any frames, 0
    /// without an active connection.
    pub quality: u8,
}

/// Publishes connection state to watchers and transition subscribers.
pub(crate) struct StateHub {
    watch_tx: watch::Sender<ConnectionState>,
    subscribers: Mutex<Vec<crossbeam_channel::Sender<ConnectionState>>>,
}

impl StateHub {
    fn new() -> Self {
        let (watch_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            watch_tx,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn current(&self) -> ConnectionState {
        self.watch_tx.borrow().clone()
    }

    pub(crate) fn publish(&self, state: ConnectionState) {
        if self.current() == state {
            return;
        }
        info!(?state, "connection state");
        self.watch_tx.send_replace(state.clone());
        self.subscribers
            .lock()
            .unwrap()
            .retain(|tx| tx.send(state.clone()).is_ok());
    }

    fn subscribe_watch(&self) -> watch::Receiver<ConnectionState> {
        self.watch_tx.subscribe()
    }

    fn subscribe_transitions(&self) -> crossbeam_channel::Receiver<ConnectionState> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }
}

/// Owns the native receiver and its capture thread. One receiver is alive
/// at a time in the application.
pub struct NdiReceiver {
    runtime: Arc<dyn NdiRuntime>,
    options: ReceiverOptions,
    handle: Arc<AtomicU64>,
    receiving: Arc<AtomicBool>,
    hub: Arc<StateHub>,
    router: Arc<FrameRouter>,
    capture_thread: Mutex<Option<JoinHandle<()>>>,
}

impl NdiReceiver {
    pub fn new(
        runtime: Arc<dyn NdiRuntime>,
        options: ReceiverOptions,
        engine: Arc<dyn MediaEngine>,
        recordings_dir: impl Into<PathBuf>,
    ) -> Self {
        let recorder = Arc::new(StreamRecorder::new(engine.clone(), recordings_dir));
        let router = Arc::new(FrameRouter::new(engine, recorder));
        Self {
            runtime,
            options,
            handle: Arc::new(AtomicU64::new(NULL_HANDLE)),
            receiving: Arc::new(AtomicBool::new(false)),
            hub: Arc::new(StateHub::new()),
            router,
            capture_thread: Mutex::new(None),
        }
    }

    /// Connect to `source`. Legal from any state: an active connection is
    /// torn down first.
    pub fn connect(&self, source: SourceDescriptor) -> Result<(), IngestError> {
        self.disconnect();
        self.hub.publish(ConnectionState::Connecting(source.clone()));

        let handle = self.runtime.receiver_create(&self.options);
        if handle == NULL_HANDLE {
            let msg = "receiver create returned null".to_string();
            self.hub.publish(ConnectionState::Error(msg.clone()));
            return Err(IngestError::HandleCreationFailed(msg));
        }
        if !self.runtime.receiver_connect(handle, &source) {
            self.runtime.receiver_destroy(handle);
            self.hub
                .publish(ConnectionState::Error(format!("connect to {} failed", source.name)));
            return Err(IngestError::ConnectionFailed(source.name));
        }

        self.handle.store(handle, Ordering::Release);
        self.receiving.store(true, Ordering::Release);

        let runtime = self.runtime.clone();
        let handle_slot = self.handle.clone();
        let receiving = self.receiving.clone();
        let hub = self.hub.clone();
        let router = self.router.clone();
        let thread = std::thread::Builder::new()
            .name("ndi-capture".to_string())
            .spawn(move || capture_loop(runtime, handle_slot, receiving, hub, router, source))
            .expect("failed to spawn capture thread");
        *self.capture_thread.lock().unwrap() = Some(thread);
        Ok(())
    }

    /// Disconnect and release the native receiver. Idempotent.
    pub fn disconnect(&self) {
        self.shutdown(DISCONNECT_JOIN_TIMEOUT);
        self.hub.publish(ConnectionState::Disconnected);
    }

    /// Synchronous disconnect for teardown paths that cannot wait: a short
    /// join, then destroy.
    pub fn disconnect_now(&self) {
        self.shutdown(DISCONNECT_SYNC_JOIN_TIMEOUT);
        self.hub.publish(ConnectionState::Disconnected);
    }

    fn shutdown(&self, join_bound: Duration) {
        self.receiving.store(false, Ordering::Release);
        if let Some(thread) = self.capture_thread.lock().unwrap().take() {
            join_timeout(thread, join_bound, "ndi-capture");
        }
        let handle = self.handle.swap(NULL_HANDLE, Ordering::AcqRel);
        if handle != NULL_HANDLE {
            self.runtime.receiver_disconnect(handle);
            self.runtime.receiver_destroy(handle);
        }
        self.router.on_connection_down();
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.hub.subscribe_watch()
    }

    /// Subscribe to every state transition (the reconnect policy uses
    /// this; the watch channel only shows the latest state).
    pub fn subscribe_states(&self) -> crossbeam_channel::Receiver<ConnectionState> {
        self.hub.subscribe_transitions()
    }

    pub fn performance(&self) -> ReceiverStats {
        let handle = self.handle.load(Ordering::Acquire);
        if handle == NULL_HANDLE {
            return ReceiverStats::default();
        }
        let perf = self.runtime.receiver_performance(handle);
        let connections = self.runtime.receiver_no_connections(handle);
        let quality = if connections <= 0 {
            0
        } else if perf.total_video_frames == 0 {
            100
        } else {
            let drop_rate =
                perf.dropped_video_frames as f64 / perf.total_video_frames as f64;
            (100.0 - drop_rate * 100.0).clamp(0.0, 100.0) as u8
        };
        ReceiverStats {
            total_video_frames: perf.total_video_frames,
            dropped_video_frames: perf.dropped_video_frames,
            total_audio_frames: perf.total_audio_frames,
            dropped_audio_frames: perf.dropped_audio_frames,
            total_metadata_frames: perf.total_metadata_frames,
            quality,
        }
    }

    /// Bind the display surface for the application-layer render/decode
    /// path.
    pub fn set_display_surface(&self, surface: Option<Arc<dyn DisplaySurface>>) {
        self.router.set_surface(surface);
    }

    /// Bind the surface at the native receiver instead. Unused while the
    /// application layer decodes compressed frames itself.
    pub fn bind_native_surface(&self, surface: Option<Arc<dyn DisplaySurface>>) -> bool {
        let handle = self.handle.load(Ordering::Acquire);
        if handle == NULL_HANDLE {
            return false;
        }
        self.runtime.receiver_set_surface(handle, surface)
    }

    pub fn start_recording(&self) -> Result<PathBuf, IngestError> {
        self.router.start_recording()
    }

    pub fn stop_recording(&self) {
        self.router.stop_recording();
    }

    pub fn recording_state(&self) -> watch::Receiver<RecordingState> {
        self.router.recording_state()
    }

    pub fn video_info(&self) -> watch::Receiver<Option<String>> {
        self.router.video_info()
    }

    pub fn bitrate(&self) -> watch::Receiver<Option<String>> {
        self.router.bitrate()
    }

    pub fn router(&self) -> &Arc<FrameRouter> {
        &self.router
    }
}

impl Drop for NdiReceiver {
    fn drop(&mut self) {
        self.shutdown(DISCONNECT_SYNC_JOIN_TIMEOUT);
    }
}

fn capture_loop(
    runtime: Arc<dyn NdiRuntime>,
    handle_slot: Arc<AtomicU64>,
    receiving: Arc<AtomicBool>,
    hub: Arc<StateHub>,
    router: Arc<FrameRouter>,
    source: SourceDescriptor,
) {
    let mut consecutive_null = 0u32;
    let mut received_any = false;

    while receiving.load(Ordering::Acquire) {
        // One atomic load per iteration; disconnect swaps to null only
        // after this loop is joined.
        let handle = handle_slot.load(Ordering::Acquire);
        if handle == NULL_HANDLE {
            break;
        }

        match runtime.receiver_capture_video(handle, CAPTURE_TIMEOUT_MS) {
            Some(raw) => {
                consecutive_null = 0;
                if !received_any {
                    received_any = true;
                    hub.publish(ConnectionState::Connected(source.clone()));
                }
                // The lease releases the frame on drop, on every path.
                let lease = FrameLease::new(runtime.clone(), handle, raw);
                router.route(lease);
            }
            None => {
                consecutive_null += 1;
                let connected = runtime.receiver_no_connections(handle) > 0;
                if connected && matches!(hub.current(), ConnectionState::Connecting(_)) {
                    // Handshake finished before the first frame arrived.
                    hub.publish(ConnectionState::Connected(source.clone()));
                }
                // Triple guard: frames seen before, enough consecutive
                // nulls, and the native layer agrees we are offline.
                if received_any
                    && consecutive_null >= CONNECTION_LOST_THRESHOLD
                    && !connected
                {
                    warn!(
                        source = %source.name,
                        nulls = consecutive_null,
                        "connection lost"
                    );
                    hub.publish(ConnectionState::Error(
                        IngestError::ConnectionLost(source.name.clone()).to_string(),
                    ));
                    router.on_connection_down();
                    break;
                }
            }
        }
    }
}
