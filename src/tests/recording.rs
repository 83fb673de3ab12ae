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
use crate::error::IngestError;
use crate::frame::{FourCc, FrameInfo, VideoFrameCopy};
use crate::media::{sample_flags, MIME_H264, MIME_HEVC};
use crate::receiver::ConnectionState;
use crate::record::annexb::test_streams::{h264_header, h265_header, nal};
use crate::record::annexb::{h264, h265};
use crate::record::{RecordingState, StreamRecorder};
use crate::source::SourceDescriptor;
use crate::testing::{MockMediaEngine, TestVideoFrame};

const SC4: &[u8] = &[0, 0, 0, 1];

fn h264_csd_idr_frame() -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let sps = nal(SC4, h264_header(h264::NAL_SPS), &[0x42, 0x00, 0x1E]);
    let pps = nal(SC4, h264_header(h264::NAL_PPS), &[0xCE, 0x38]);
    let mut frame = sps.clone();
    frame.extend(nal(SC4, h264_header(h264::NAL_PPS), &[0xCE, 0x38]));
    frame.extend(nal(SC4, h264_header(h264::NAL_IDR), &[0x11; 6]));
    (frame, sps, pps)
}

#[test]
fn passthrough_h264_end_to_end() {
    let h = harness();
    h.receiver.connect(SourceDescriptor::new("CamA (HostX)")).unwrap();

    // Warm the stream so the router has a published shape to record.
    h.runtime.push_frame(TestVideoFrame::compressed(
        FourCc::H264,
        nal(SC4, h264_header(1), &[0x00; 4]),
        0,
    ));
    assert!(wait_until(Duration::from_secs(2), || {
        h.receiver.video_info().borrow().is_some()
    }));

    let path = h.receiver.start_recording().unwrap();
    assert!(path.to_string_lossy().contains("1920x1080_H264"));

    let (first_frame, sps, pps) = h264_csd_idr_frame();
    h.runtime
        .push_frame(TestVideoFrame::compressed(FourCc::H264, first_frame, 0));
    for n in 1..=10i64 {
        h.runtime.push_frame(TestVideoFrame::compressed(
            FourCc::H264,
            nal(SC4, h264_header(1), &[n as u8; 5]),
            n * 33_333,
        ));
    }

    let recorded = h.engine.last_muxer().unwrap();
    assert!(wait_until(Duration::from_secs(3), || {
        recorded.lock().unwrap().samples.len() == 11
    }));
    h.receiver.stop_recording();
    assert!(wait_until(Duration::from_secs(2), || {
        recorded.lock().unwrap().stopped
    }));

    let mp4 = recorded.lock().unwrap();
    assert_eq!(mp4.tracks.len(), 1);
    assert_eq!(mp4.tracks[0].mime, MIME_H264);
    assert_eq!(mp4.tracks[0].csd, vec![sps, pps]);
    assert_eq!(
        mp4.samples[0].flags & sample_flags::KEY_FRAME,
        sample_flags::KEY_FRAME
    );
    for (n, sample) in mp4.samples.iter().enumerate() {
        assert_eq!(sample.pts_us, n as i64 * 33_333);
    }
    assert!(mp4.samples[1..]
        .iter()
        .all(|s| s.flags & sample_flags::KEY_FRAME == 0));

    // The decoder saw the same frames; passthrough and decode coexist.
    assert!(!h.engine.decoders().is_empty());
    h.receiver.disconnect();
    assert_eq!(h.runtime.outstanding_frames(), 0);
}

#[test]
fn passthrough_h265_assembles_concatenated_csd() {
    let h = harness();
    h.receiver.connect(SourceDescriptor::new("CamA (HostX)")).unwrap();

    h.runtime.push_frame(TestVideoFrame::compressed(
        FourCc::Hevc,
        nal(SC4, h265_header(1), &[0x00; 4]),
        0,
    ));
    assert!(wait_until(Duration::from_secs(2), || {
        h.receiver.video_info().borrow().is_some()
    }));
    h.receiver.start_recording().unwrap();

    let vps = nal(SC4, h265_header(h265::NAL_VPS), &[0x0C]);
    let sps = nal(SC4, h265_header(h265::NAL_SPS), &[0x0D, 0x0E]);
    let pps = nal(SC4, h265_header(h265::NAL_PPS), &[0x0F]);
    let mut first = vps.clone();
    first.extend_from_slice(&sps);
    first.extend_from_slice(&pps);
    first.extend(nal(SC4, h265_header(h265::NAL_IDR_W_RADL), &[0x22; 4]));
    h.runtime
        .push_frame(TestVideoFrame::compressed(FourCc::Hevc, first, 0));
    for n in 1..=9i64 {
        h.runtime.push_frame(TestVideoFrame::compressed(
            FourCc::Hevc,
            nal(SC4, h265_header(1), &[n as u8; 3]),
            n * 33_333,
        ));
    }

    let recorded = h.engine.last_muxer().unwrap();
    assert!(wait_until(Duration::from_secs(3), || {
        recorded.lock().unwrap().samples.len() == 10
    }));
    h.receiver.stop_recording();
    assert!(wait_until(Duration::from_secs(2), || {
        recorded.lock().unwrap().stopped
    }));

    let mp4 = recorded.lock().unwrap();
    assert_eq!(mp4.tracks[0].mime, MIME_HEVC);
    assert_eq!(mp4.tracks[0].csd, vec![[vps, sps, pps].concat()]);
    assert_eq!(
        mp4.samples[0].flags & sample_flags::KEY_FRAME,
        sample_flags::KEY_FRAME
    );
    assert!(mp4.samples[1..]
        .iter()
        .all(|s| s.flags & sample_flags::KEY_FRAME == 0));
    h.receiver.disconnect();
}

#[test]
fn uncompressed_stream_records_through_the_encoder() {
    let h = harness();
    h.receiver.connect(SourceDescriptor::new("CamA (HostX)")).unwrap();

    h.runtime.push_frame(TestVideoFrame::uncompressed(
        FourCc::Uyvy,
        4,
        2,
        vec![0x80, 0x10, 0x80, 0x10, 0x80, 0x10, 0x80, 0x10, 0x80, 0x10, 0x80, 0x10, 0x80, 0x10, 0x80, 0x10],
    ));
    assert!(wait_until(Duration::from_secs(2), || {
        h.receiver.video_info().borrow().is_some()
    }));
    h.receiver.start_recording().unwrap();

    for n in 0..5i64 {
        h.runtime.push_frame(
            TestVideoFrame::uncompressed(
                FourCc::Uyvy,
                4,
                2,
                vec![0x80, 0x10, 0x80, 0x10, 0x80, 0x10, 0x80, 0x10, 0x80, 0x10, 0x80, 0x10, 0x80, 0x10, 0x80, 0x10],
            )
            .with_timestamp(n * 33_333),
        );
    }

    let recorded = h.engine.last_muxer().unwrap();
    assert!(wait_until(Duration::from_secs(3), || {
        recorded.lock().unwrap().samples.len() == 5
    }));
    h.receiver.stop_recording();
    assert!(wait_until(Duration::from_secs(2), || {
        recorded.lock().unwrap().stopped
    }));
    assert_eq!(h.engine.encoders_created(), 1);
    h.receiver.disconnect();
}

#[test]
fn recording_without_a_stream_is_rejected() {
    let h = harness();
    h.receiver.connect(SourceDescriptor::new("CamA (HostX)")).unwrap();
    let err = h.receiver.start_recording().unwrap_err();
    assert_eq!(
        err,
        IngestError::UnsupportedRecordingFormat("No video stream to record".to_string())
    );
    h.receiver.disconnect();
}

#[test]
fn connection_loss_stops_the_recording() {
    let h = harness();
    h.receiver.connect(SourceDescriptor::new("CamA (HostX)")).unwrap();
    h.runtime.push_frame(TestVideoFrame::compressed(
        FourCc::H264,
        nal(SC4, h264_header(1), &[0x00; 4]),
        0,
    ));
    assert!(wait_until(Duration::from_secs(2), || {
        h.receiver.video_info().borrow().is_some()
    }));
    h.receiver.start_recording().unwrap();

    h.runtime.set_connected(false);
    h.runtime.push_nulls(5);
    assert!(wait_until(Duration::from_secs(3), || {
        matches!(&*h.receiver.state().borrow(), ConnectionState::Error(_))
    }));
    assert!(wait_until(Duration::from_secs(2), || {
        matches!(
            &*h.receiver.recording_state().borrow(),
            RecordingState::Stopped(_) | RecordingState::Error(_)
        )
    }));
}

/// Backpressure: a stalled writer bounds the queue at its capacity plus
/// the one frame in flight; late offers time out after 200 ms and drop.
#[test]
fn writer_backpressure_drops_late_frames() {
    let engine = Arc::new(MockMediaEngine::new());
    let (gate_tx, gate_rx) = crossbeam_channel::unbounded::<()>();
    engine.set_muxer_gate(gate_rx);
    let dir = tempfile::tempdir().unwrap();
    let recorder = StreamRecorder::new(engine.clone(), dir.path().join("recordings"));

    let info = FrameInfo {
        width: 1920,
        height: 1080,
        fourcc: FourCc::H264,
        line_stride_bytes: 0,
        frame_rate_n: 30,
        frame_rate_d: 1,
        timestamp_us: 0,
        progressive: true,
    };
    recorder.start(&info).unwrap();

    // Every frame carries CSD + IDR so each one reaches the gated
    // write_sample call.
    let (frame_bytes, _, _) = h264_csd_idr_frame();
    for n in 0..40i64 {
        recorder.offer(VideoFrameCopy {
            info: FrameInfo {
                timestamp_us: n * 33_333,
                ..info
            },
            data: frame_bytes.clone(),
        });
    }

    // Release the writer and finalize.
    drop(gate_tx);
    recorder.stop();
    let recorded = engine.last_muxer().unwrap();
    assert!(wait_until(Duration::from_secs(3), || {
        recorded.lock().unwrap().stopped
    }));

    // One frame was in flight, thirty were queued, the other nine timed
    // out against the full queue and were dropped.
    assert_eq!(recorded.lock().unwrap().samples.len(), 31);
}
