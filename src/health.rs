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

//! Connection-health policy: automatic reconnection after an outage.
//!
//! The policy watches the receiver's state transitions. When an outage hits
//! a previously working connection and the `auto_reconnect` preference is
//! on, it schedules a delayed reconnect, up to a bounded number of attempts
//! per outage. A successful connection resets the counters and persists the
//! source as "last connected".

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use tracing::{debug, info, warn};

use crate::prefs::Preferences;
use crate::receiver::{ConnectionState, NdiReceiver};
use crate::source::SourceDescriptor;
use crate::thread_util::join_timeout;

pub const RECONNECT_DELAY: Duration = Duration::from_millis(3000);
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

const MONITOR_POLL: Duration = Duration::from_millis(200);
const MONITOR_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

struct PolicyShared {
    receiver: Arc<NdiReceiver>,
    prefs: Arc<dyn Preferences>,
    delay: Duration,
    attempts: AtomicU32,
    auto_reconnecting: AtomicBool,
    /// Cancel handle of the pending reconnect timer, if one is armed.
    pending: Mutex<Option<Sender<()>>>,
    /// Last successfully connected source; reconnects always target it.
    last_source: Mutex<Option<SourceDescriptor>>,
}

/// Watches receiver state and drives reconnection.
pub struct ReconnectPolicy {
    shared: Arc<PolicyShared>,
    stop: Arc<AtomicBool>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl ReconnectPolicy {
    /// Attach the policy to `receiver` with the standard 3 s delay.
    pub fn spawn(receiver: Arc<NdiReceiver>, prefs: Arc<dyn Preferences>) -> Self {
        Self::spawn_with_delay(receiver, prefs, RECONNECT_DELAY)
    }

    /// Attach with a custom delay (tests shorten it).
    pub fn spawn_with_delay(
        receiver: Arc<NdiReceiver>,
        prefs: Arc<dyn Preferences>,
        delay: Duration,
    ) -> Self {
        let transitions = receiver.subscribe_states();
        let shared = Arc::new(PolicyShared {
            receiver,
            prefs,
            delay,
            attempts: AtomicU32::new(0),
            auto_reconnecting: AtomicBool::new(false),
            pending: Mutex::new(None),
            last_source: Mutex::new(None),
        });
        let stop = Arc::new(AtomicBool::new(false));
        let monitor = {
            let shared = shared.clone();
            let stop = stop.clone();
            std::thread::Builder::new()
                .name("reconnect-policy".to_string())
                .spawn(move || {
                    while !stop.load(Ordering::Acquire) {
                        match transitions.recv_timeout(MONITOR_POLL) {
                            Ok(state) => handle_transition(&shared, state),
                            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                        }
                    }
                })
                .expect("failed to spawn reconnect monitor thread")
        };
        Self {
            shared,
            stop,
            monitor: Mutex::new(Some(monitor)),
        }
    }

    /// Attempts made in the current outage, for display.
    pub fn attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::Acquire)
    }

    pub fn is_auto_reconnecting(&self) -> bool {
        self.shared.auto_reconnecting.load(Ordering::Acquire)
    }

    /// User cancellation: drop the pending timer and saturate the attempt
    /// counter so nothing rearms until the next successful connection.
    pub fn cancel(&self) {
        cancel_pending(&self.shared);
        self.shared
            .attempts
            .store(MAX_RECONNECT_ATTEMPTS, Ordering::Release);
        self.shared.auto_reconnecting.store(false, Ordering::Release);
        info!("auto-reconnect cancelled by user");
    }

    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Release);
        cancel_pending(&self.shared);
        if let Some(monitor) = self.monitor.lock().unwrap().take() {
            join_timeout(monitor, MONITOR_JOIN_TIMEOUT, "reconnect-policy");
        }
    }
}

impl Drop for ReconnectPolicy {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn handle_transition(shared: &Arc<PolicyShared>, state: ConnectionState) {
    match state {
        ConnectionState::Connected(source) => {
            shared.attempts.store(0, Ordering::Release);
            shared.auto_reconnecting.store(false, Ordering::Release);
            cancel_pending(shared);
            shared.prefs.set_last_source(&source);
            *shared.last_source.lock().unwrap() = Some(source);
        }
        ConnectionState::Error(_) => {
            if !shared.prefs.auto_reconnect() {
                debug!("auto-reconnect disabled; staying down");
                return;
            }
            schedule_reconnect(shared);
        }
        ConnectionState::Disconnected => {
            // Explicit teardown; an armed timer must not fire afterwards.
            cancel_pending(shared);
        }
        ConnectionState::Connecting(_) => {}
    }
}

fn schedule_reconnect(shared: &Arc<PolicyShared>) {
    let Some(source) = shared.last_source.lock().unwrap().clone() else {
        // Never connected in this session; nothing to go back to.
        return;
    };
    let attempt = shared.attempts.fetch_add(1, Ordering::AcqRel) + 1;
    if attempt > MAX_RECONNECT_ATTEMPTS {
        shared
            .attempts
            .store(MAX_RECONNECT_ATTEMPTS, Ordering::Release);
        shared.auto_reconnecting.store(false, Ordering::Release);
        warn!("giving up after {MAX_RECONNECT_ATTEMPTS} reconnect attempts");
        return;
    }
    shared.auto_reconnecting.store(true, Ordering::Release);

    let (cancel_tx, cancel_rx) = bounded::<()>(1);
    *shared.pending.lock().unwrap() = Some(cancel_tx);

    let delay = shared.delay;
    let shared = shared.clone();
    let _ = std::thread::Builder::new()
        .name("reconnect-timer".to_string())
        .spawn(move || {
            match cancel_rx.recv_timeout(delay) {
                // Timer expired uncancelled: try again.
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                    info!(source = %source.name, attempt, "auto-reconnecting");
                    if let Err(e) = shared.receiver.connect(source.clone()) {
                        warn!("reconnect attempt failed: {e}");
                    }
                }
                _ => debug!("reconnect timer cancelled"),
            }
        });
}

fn cancel_pending(shared: &PolicyShared) {
    if let Some(cancel) = shared.pending.lock().unwrap().take() {
        let _ = cancel.send(());
    }
}
