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

use std::time::Duration;

use super::{harness, wait_until};
use crate::error::IngestError;
use crate::frame::FourCc;
use crate::receiver::ConnectionState;
use crate::runtime::ReceiverPerformance;
use crate::source::SourceDescriptor;
use crate::testing::TestVideoFrame;

fn cam_a() -> SourceDescriptor {
    SourceDescriptor::new("CamA (HostX)")
}

fn bgra_frame() -> TestVideoFrame {
    TestVideoFrame::uncompressed(FourCc::Bgra, 2, 2, vec![0x80; 2 * 2 * 4])
}

#[test]
fn connect_renders_and_releases_every_frame() {
    let h = harness();
    h.receiver.connect(cam_a()).unwrap();

    for n in 0..3 {
        h.runtime
            .push_frame(bgra_frame().with_timestamp(n * 33_333));
    }
    assert!(wait_until(Duration::from_secs(2), || h.surface.blit_count() >= 3));
    assert!(matches!(
        &*h.receiver.state().borrow(),
        ConnectionState::Connected(s) if s.name == "CamA (HostX)"
    ));
    let (w, height, pixels) = h.surface.last_blit().unwrap();
    assert_eq!((w, height), (2, 2));
    assert_eq!(pixels.len(), 2 * 2 * 4);

    h.receiver.disconnect();
    assert!(matches!(
        &*h.receiver.state().borrow(),
        ConnectionState::Disconnected
    ));
    // Exactly-once release: nothing outstanding after teardown, and every
    // capture was returned to the runtime.
    assert_eq!(h.runtime.outstanding_frames(), 0);
    assert_eq!(h.runtime.released_frames(), 3);
    assert_eq!(h.runtime.live_receivers(), 0);
}

#[test]
fn connection_loss_needs_all_three_guards() {
    let h = harness();
    h.receiver.connect(cam_a()).unwrap();
    h.runtime.push_frame(bgra_frame());
    assert!(wait_until(Duration::from_secs(2), || {
        matches!(&*h.receiver.state().borrow(), ConnectionState::Connected(_))
    }));

    // Four consecutive nulls while the native layer still reports a
    // connection: NOT lost.
    h.runtime.push_nulls(4);
    std::thread::sleep(Duration::from_millis(200));
    assert!(matches!(
        &*h.receiver.state().borrow(),
        ConnectionState::Connected(_)
    ));

    // Nulls keep coming and the native layer goes offline: lost.
    h.runtime.set_connected(false);
    h.runtime.push_nulls(5);
    assert!(wait_until(Duration::from_secs(3), || {
        matches!(&*h.receiver.state().borrow(), ConnectionState::Error(_))
    }));
    assert_eq!(h.runtime.outstanding_frames(), 0);
}

#[test]
fn no_loss_without_a_prior_frame() {
    let h = harness();
    // The mock reports connected=true right after connect, so the state
    // promotes to Connected off the handshake; but with zero frames ever
    // received the null counter must not declare a loss even when the
    // link flips off during the initial stall.
    h.receiver.connect(cam_a()).unwrap();
    h.runtime.set_connected(false);
    h.runtime.push_nulls(10);
    std::thread::sleep(Duration::from_millis(300));
    assert!(!matches!(
        &*h.receiver.state().borrow(),
        ConnectionState::Error(_)
    ));
    h.receiver.disconnect();
}

#[test]
fn reconnect_cycle_restores_the_same_source() {
    let h = harness();
    h.receiver.connect(cam_a()).unwrap();
    h.runtime.push_frame(bgra_frame());
    assert!(wait_until(Duration::from_secs(2), || {
        matches!(&*h.receiver.state().borrow(), ConnectionState::Connected(_))
    }));

    h.receiver.disconnect();
    assert_eq!(h.runtime.destroyed_receivers(), 1);

    h.receiver.connect(cam_a()).unwrap();
    h.runtime.push_frame(bgra_frame());
    assert!(wait_until(Duration::from_secs(2), || {
        matches!(
            &*h.receiver.state().borrow(),
            ConnectionState::Connected(s) if s.name == "CamA (HostX)"
        )
    }));
    h.receiver.disconnect();
    assert_eq!(h.runtime.destroyed_receivers(), 2);
    assert_eq!(h.runtime.live_receivers(), 0);
}

#[test]
fn disconnect_is_idempotent() {
    let h = harness();
    h.receiver.connect(cam_a()).unwrap();
    h.receiver.disconnect();
    h.receiver.disconnect();
    assert_eq!(h.runtime.destroyed_receivers(), 1);
}

#[test]
fn create_failure_surfaces_as_error_state() {
    let h = harness();
    h.runtime.fail_next_create();
    assert!(matches!(
        h.receiver.connect(cam_a()),
        Err(IngestError::HandleCreationFailed(_))
    ));
    assert!(matches!(
        &*h.receiver.state().borrow(),
        ConnectionState::Error(_)
    ));
}

#[test]
fn connect_failure_destroys_the_fresh_handle() {
    let h = harness();
    h.runtime.fail_next_connect();
    assert!(matches!(
        h.receiver.connect(cam_a()),
        Err(IngestError::ConnectionFailed(_))
    ));
    assert_eq!(h.runtime.live_receivers(), 0);
}

#[test]
fn performance_quality_tracks_drop_rate() {
    let h = harness();
    // No handle yet: zero quality.
    assert_eq!(h.receiver.performance().quality, 0);

    h.receiver.connect(cam_a()).unwrap();
    // Connected but no frames yet: perfect quality.
    assert!(wait_until(Duration::from_secs(2), || {
        h.receiver.performance().quality == 100
    }));

    h.runtime.set_performance(ReceiverPerformance {
        total_video_frames: 200,
        dropped_video_frames: 10,
        ..Default::default()
    });
    let stats = h.receiver.performance();
    assert_eq!(stats.quality, 95);
    assert_eq!(stats.total_video_frames, 200);

    // No active connection pins quality at zero.
    h.runtime.set_connected(false);
    assert_eq!(h.receiver.performance().quality, 0);
    h.receiver.disconnect();
}

#[test]
fn video_info_digest_tracks_the_stream() {
    let h = harness();
    h.receiver.connect(cam_a()).unwrap();
    h.runtime.push_frame(bgra_frame());
    assert!(wait_until(Duration::from_secs(2), || {
        h.receiver.video_info().borrow().is_some()
    }));
    assert_eq!(
        h.receiver.video_info().borrow().as_deref(),
        Some("2x2 @ 30 | Raw BGRA")
    );

    // A compressed stream switches the digest label.
    h.runtime.push_frame(TestVideoFrame::compressed(
        FourCc::H264,
        vec![0, 0, 0, 1, 0x65, 0xAA],
        0,
    ));
    assert!(wait_until(Duration::from_secs(2), || {
        h.receiver.video_info().borrow().as_deref() == Some("1920x1080 @ 30 | H.264")
    }));
    h.receiver.disconnect();
}
