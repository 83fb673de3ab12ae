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

use std::sync::Arc;
use std::time::Duration;

use super::{harness, wait_until};
use crate::frame::FourCc;
use crate::health::{ReconnectPolicy, MAX_RECONNECT_ATTEMPTS};
use crate::prefs::{MemoryPreferences, Preferences};
use crate::receiver::ConnectionState;
use crate::source::SourceDescriptor;
use crate::testing::TestVideoFrame;

const TEST_DELAY: Duration = Duration::from_millis(100);

fn cam_a() -> SourceDescriptor {
    SourceDescriptor::with_url("CamA (HostX)", "ndi://10.0.0.2:5960")
}

fn frame() -> TestVideoFrame {
    TestVideoFrame::uncompressed(FourCc::Bgra, 2, 2, vec![0x40; 16])
}

fn lose_connection(h: &super::Harness) {
    h.runtime.set_connected(false);
    h.runtime.push_nulls(5);
    assert!(wait_until(Duration::from_secs(3), || {
        matches!(&*h.receiver.state().borrow(), ConnectionState::Error(_))
    }));
}

#[test]
fn reconnects_and_persists_the_source() {
    let h = harness();
    let prefs: Arc<MemoryPreferences> = Arc::new(MemoryPreferences::new());
    let policy =
        ReconnectPolicy::spawn_with_delay(h.receiver.clone(), prefs.clone(), TEST_DELAY);

    h.receiver.connect(cam_a()).unwrap();
    h.runtime.push_frame(frame());
    assert!(wait_until(Duration::from_secs(2), || {
        matches!(&*h.receiver.state().borrow(), ConnectionState::Connected(_))
    }));
    assert!(wait_until(Duration::from_secs(1), || {
        prefs.last_source().map(|s| s.name) == Some("CamA (HostX)".to_string())
    }));
    assert_eq!(
        prefs.last_source().unwrap().url.as_deref(),
        Some("ndi://10.0.0.2:5960")
    );

    lose_connection(&h);
    assert!(wait_until(Duration::from_secs(1), || {
        policy.is_auto_reconnecting()
    }));

    // The mock accepts the reconnect; the handshake promotes the state
    // once the capture wait times out against an empty script.
    assert!(wait_until(Duration::from_secs(5), || {
        matches!(&*h.receiver.state().borrow(), ConnectionState::Connected(_))
    }));
    assert!(wait_until(Duration::from_secs(1), || {
        policy.attempts() == 0 && !policy.is_auto_reconnecting()
    }));

    policy.shutdown();
    h.receiver.disconnect();
}

#[test]
fn stays_down_when_the_preference_is_off() {
    let h = harness();
    let prefs: Arc<MemoryPreferences> = Arc::new(MemoryPreferences::new());
    prefs.set_auto_reconnect(false);
    let policy =
        ReconnectPolicy::spawn_with_delay(h.receiver.clone(), prefs.clone(), TEST_DELAY);

    h.receiver.connect(cam_a()).unwrap();
    h.runtime.push_frame(frame());
    assert!(wait_until(Duration::from_secs(2), || {
        matches!(&*h.receiver.state().borrow(), ConnectionState::Connected(_))
    }));

    lose_connection(&h);
    std::thread::sleep(4 * TEST_DELAY);
    assert!(matches!(
        &*h.receiver.state().borrow(),
        ConnectionState::Error(_)
    ));
    assert!(!policy.is_auto_reconnecting());
    policy.shutdown();
}

#[test]
fn manual_disconnect_does_not_rearm() {
    let h = harness();
    let prefs: Arc<MemoryPreferences> = Arc::new(MemoryPreferences::new());
    let policy =
        ReconnectPolicy::spawn_with_delay(h.receiver.clone(), prefs.clone(), TEST_DELAY);

    h.receiver.connect(cam_a()).unwrap();
    h.runtime.push_frame(frame());
    assert!(wait_until(Duration::from_secs(2), || {
        matches!(&*h.receiver.state().borrow(), ConnectionState::Connected(_))
    }));

    h.receiver.disconnect();
    std::thread::sleep(4 * TEST_DELAY);
    assert!(matches!(
        &*h.receiver.state().borrow(),
        ConnectionState::Disconnected
    ));
    assert!(!policy.is_auto_reconnecting());
    policy.shutdown();
}

#[test]
fn cancel_saturates_the_attempt_counter() {
    let h = harness();
    let prefs: Arc<MemoryPreferences> = Arc::new(MemoryPreferences::new());
    let policy =
        ReconnectPolicy::spawn_with_delay(h.receiver.clone(), prefs.clone(), TEST_DELAY);

    h.receiver.connect(cam_a()).unwrap();
    h.runtime.push_frame(frame());
    assert!(wait_until(Duration::from_secs(2), || {
        matches!(&*h.receiver.state().borrow(), ConnectionState::Connected(_))
    }));

    lose_connection(&h);
    assert!(wait_until(Duration::from_secs(1), || {
        policy.is_auto_reconnecting()
    }));
    policy.cancel();
    assert_eq!(policy.attempts(), MAX_RECONNECT_ATTEMPTS);
    assert!(!policy.is_auto_reconnecting());
    policy.shutdown();
}

#[test]
fn never_connected_means_nothing_to_reconnect_to() {
    let h = harness();
    let prefs: Arc<MemoryPreferences> = Arc::new(MemoryPreferences::new());
    let policy =
        ReconnectPolicy::spawn_with_delay(h.receiver.clone(), prefs.clone(), TEST_DELAY);

    // An error without any prior Connected state must not arm the timer.
    h.runtime.fail_next_create();
    let _ = h.receiver.connect(cam_a());
    std::thread::sleep(4 * TEST_DELAY);
    assert!(!policy.is_auto_reconnecting());
    assert_eq!(policy.attempts(), 0);
    policy.shutdown();
}
