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

//! LAN source discovery.
//!
//! [`SourceFinder::start_discovery`] yields a restartable stream of
//! source-set snapshots. A worker thread polls the native finder with a
//! bounded wait and emits a snapshot only when the set actually changed, so
//! an idle network produces no once-per-second churn.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::IngestError;
use crate::runtime::{NdiRuntime, NULL_HANDLE};
use crate::source::{same_source_set, SourceDescriptor};
use crate::thread_util::join_timeout;

/// Bounded wait for the native change notification.
const SOURCE_POLL_TIMEOUT_MS: u32 = 1000;
/// Snapshot stream depth; the UI only ever wants the latest few.
const SNAPSHOT_CHANNEL_CAPACITY: usize = 16;
/// The poll loop exits within one wait timeout of the stop flag.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_millis(2 * SOURCE_POLL_TIMEOUT_MS as u64);

/// Discovery options forwarded to the native finder.
#[derive(Debug, Clone)]
pub struct FinderOptions {
    pub show_local_sources: bool,
    pub groups: Option<String>,
    pub extra_ips: Option<String>,
}

impl Default for FinderOptions {
    fn default() -> Self {
        Self {
            show_local_sources: true,
            groups: None,
            extra_ips: None,
        }
    }
}

/// Owns the native finder and its polling thread.
pub struct SourceFinder {
    runtime: Arc<dyn NdiRuntime>,
    options: FinderOptions,
    handle: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SourceFinder {
    pub(crate) fn new(runtime: Arc<dyn NdiRuntime>, options: FinderOptions) -> Self {
        Self {
            runtime,
            options,
            handle: Arc::new(AtomicU64::new(NULL_HANDLE)),
            stop: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    /// Start discovery and return the snapshot stream.
    ///
    /// Each item is the full ordered list of currently known sources. A
    /// running discovery is stopped first, so the call always yields a
    /// fresh stream. Dropping the stream stops the poll loop on its next
    /// emission attempt; [`SourceFinder::stop_discovery`] stops it within
    /// one wait timeout.
    pub fn start_discovery(
        &self,
    ) -> Result<mpsc::Receiver<Vec<SourceDescriptor>>, IngestError> {
        if !self.runtime.is_initialized() {
            return Err(IngestError::RuntimeNotInitialized);
        }
        self.stop_discovery();

        let handle = self.runtime.finder_create(
            self.options.show_local_sources,
            self.options.groups.as_deref(),
            self.options.extra_ips.as_deref(),
        );
        if handle == NULL_HANDLE {
            return Err(IngestError::HandleCreationFailed(
                "finder create returned null".to_string(),
            ));
        }
        self.handle.store(handle, Ordering::Release);
        self.stop.store(false, Ordering::Release);

        let (tx, rx) = mpsc::channel(SNAPSHOT_CHANNEL_CAPACITY);
        let runtime = self.runtime.clone();
        let handle_slot = self.handle.clone();
        let stop = self.stop.clone();
        let worker = std::thread::Builder::new()
            .name("ndi-finder".to_string())
            .spawn(move || poll_loop(runtime, handle_slot, stop, tx))
            .expect("failed to spawn finder thread");
        *self.worker.lock().unwrap() = Some(worker);

        info!("source discovery started");
        Ok(rx)
    }

    /// Stop discovery and release the native finder. Idempotent; safe to
    /// call concurrently with stream cancellation.
    pub fn stop_discovery(&self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.lock().unwrap().take() {
            join_timeout(worker, STOP_JOIN_TIMEOUT, "ndi-finder");
        }
        // The loop normally destroys the handle on exit; this covers the
        // abandoned-worker case and makes the teardown exactly-once.
        let handle = self.handle.swap(NULL_HANDLE, Ordering::AcqRel);
        if handle != NULL_HANDLE {
            self.runtime.finder_destroy(handle);
            info!("source discovery stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.load(Ordering::Acquire) != NULL_HANDLE
    }
}

impl Drop for SourceFinder {
    fn drop(&mut self) {
        self.stop_discovery();
    }
}

fn poll_loop(
    runtime: Arc<dyn NdiRuntime>,
    handle_slot: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    tx: mpsc::Sender<Vec<SourceDescriptor>>,
) {
    // The empty set counts as already emitted: a quiet startup produces no
    // snapshot until the first source appears.
    let mut last_emitted: Vec<SourceDescriptor> = Vec::new();

    loop {
        if stop.load(Ordering::Acquire) {
            break;
        }
        let handle = handle_slot.load(Ordering::Acquire);
        if handle == NULL_HANDLE {
            break;
        }

        let changed = runtime.finder_wait_for_sources(handle, SOURCE_POLL_TIMEOUT_MS);
        if stop.load(Ordering::Acquire) {
            break;
        }
        let handle = handle_slot.load(Ordering::Acquire);
        if handle == NULL_HANDLE {
            break;
        }
        let sources = runtime.finder_current_sources(handle);

        if changed || !same_source_set(&sources, &last_emitted) {
            debug!(count = sources.len(), "source set changed");
            match tx.try_send(sources.clone()) {
                Ok(()) => last_emitted = sources,
                // Consumer lagging; leave last_emitted untouched so the
                // snapshot is retried on the next poll.
                Err(mpsc::error::TrySendError::Full(_)) => {}
                // Stream dropped by the consumer; treat as cancellation.
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }
        }
    }

    let handle = handle_slot.swap(NULL_HANDLE, Ordering::AcqRel);
    if handle != NULL_HANDLE {
        runtime.finder_destroy(handle);
    } else {
        warn!("finder handle already released");
    }
}
