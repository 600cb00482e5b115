//! Integration tests for the paced capture loop: pacing, recovery, shutdown.

mod common;

use std::thread;
use std::time::{Duration, Instant};

use camlink::error::{ExitReason, SourceError, Stage};
use camlink::pipeline::{CancelReason, CancellationToken, CaptureSettings, PacedCapture};

use common::*;

fn settings(interval_ms: u64) -> CaptureSettings {
    CaptureSettings {
        interval: Duration::from_millis(interval_ms),
        read_timeout: Duration::from_millis(20),
        stall_ceiling: Duration::from_secs(1),
        reopen_after_failures: 0,
        max_reconnect_attempts: 3,
        reconnect_backoff: Duration::from_millis(2),
    }
}

#[test]
fn transient_failures_then_one_frame() {
    init_test_tracing();
    let token = CancellationToken::new();

    let mut steps: Vec<Step> = (0..3)
        .map(|_| Step::Fail(SourceError::Timeout(Duration::from_millis(20))))
        .collect();
    steps.extend(frames(1));
    let source = ScriptedSource::new(steps, &token);
    let sink = RecordingSink::cancel_after(1, &token);

    let mut capture = PacedCapture::new(source, sink.clone(), profile(), settings(5));
    let reason = capture.run(&token);

    assert_eq!(reason, ExitReason::Cancelled(CancelReason::UserInterrupt));
    let stats = capture.stats();
    assert_eq!(stats.forwarded, 1);
    assert_eq!(stats.transient_errors, 3);
    assert_eq!(capture.sequence(), 1);

    let log = sink.snapshot();
    assert_eq!(log.writes.len(), 1);
    assert_eq!(log.writes[0].1, profile().expected_byte_size());
    assert!(log.closed);
}

#[test]
fn rejected_frames_are_skipped() {
    init_test_tracing();
    let token = CancellationToken::new();

    let mut steps = vec![Step::Frame(short_frame())];
    steps.extend(frames(2));
    let source = ScriptedSource::new(steps, &token);
    let sink = RecordingSink::cancel_after(2, &token);

    let mut capture = PacedCapture::new(source, sink.clone(), profile(), settings(5));
    let reason = capture.run(&token);

    assert!(!reason.is_fatal());
    assert_eq!(capture.stats().rejected, 1);
    assert_eq!(capture.stats().forwarded, 2);
    // Sequence only advances for frames the sink took
    assert_eq!(capture.sequence(), 2);
    assert!(sink
        .snapshot()
        .writes
        .iter()
        .all(|(_, len)| *len == profile().expected_byte_size()));
}

#[test]
fn empty_frame_counts_as_transient() {
    init_test_tracing();
    let token = CancellationToken::new();

    let mut steps = vec![Step::Frame(camlink::RawFrame::new(Vec::new(), WIDTH, HEIGHT))];
    steps.extend(frames(1));
    let source = ScriptedSource::new(steps, &token);
    let sink = RecordingSink::cancel_after(1, &token);

    let mut capture = PacedCapture::new(source, sink, profile(), settings(5));
    capture.run(&token);

    assert_eq!(capture.stats().transient_errors, 1);
    assert_eq!(capture.stats().rejected, 0);
    assert_eq!(capture.stats().forwarded, 1);
}

#[test]
fn sink_failure_stops_the_loop() {
    init_test_tracing();
    let token = CancellationToken::new();

    let source = ScriptedSource::new(frames(10), &token);
    let mut capture = PacedCapture::new(source, FailingSink::after(2), profile(), settings(5));
    let reason = capture.run(&token);

    assert!(matches!(reason, ExitReason::SinkClosed(_)));
    assert_eq!(reason.stage(), Some(Stage::Sink));
    assert!(!token.is_cancelled());
    assert_eq!(capture.stats().forwarded, 2);

    let (source, sink) = capture.into_parts();
    assert_eq!(source.reads, 3);
    assert!(sink.closed);
}

#[test]
fn writes_are_at_least_one_interval_apart() {
    init_test_tracing();
    let token = CancellationToken::new();
    let interval = Duration::from_millis(15);

    let source = ScriptedSource::new(frames(20), &token);
    let sink = RecordingSink::cancel_after(8, &token);
    let mut capture = PacedCapture::new(source, sink.clone(), profile(), settings(15));
    capture.run(&token);

    let writes = sink.snapshot().writes;
    assert_eq!(writes.len(), 8);
    for pair in writes.windows(2) {
        let gap = pair[1].0 - pair[0].0;
        assert!(
            gap + Duration::from_millis(1) >= interval,
            "writes {gap:?} apart"
        );
    }
}

#[test]
fn slow_reads_drop_ticks_instead_of_bursting() {
    init_test_tracing();
    let token = CancellationToken::new();

    // Each read spans about three ticks
    let source = ScriptedSource::new(frames(6), &token).with_latency(Duration::from_millis(25));
    let sink = RecordingSink::cancel_after(5, &token);
    let mut capture = PacedCapture::new(source, sink.clone(), profile(), settings(10));
    capture.run(&token);

    assert!(capture.stats().dropped_ticks > 0);
    let writes = sink.snapshot().writes;
    for pair in writes.windows(2) {
        assert!(pair[1].0 - pair[0].0 + Duration::from_millis(1) >= Duration::from_millis(10));
    }
}

#[test]
fn nothing_is_written_after_cancellation() {
    init_test_tracing();
    let token = CancellationToken::new();
    let sink = RecordingSink::new();

    let canceller = {
        let token = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(120));
            let at = Instant::now();
            token.cancel(CancelReason::OsSignal);
            at
        })
    };

    let settings = settings(10);
    let bound = settings.read_timeout + settings.interval + Duration::from_millis(50);
    let mut capture = PacedCapture::new(SteadySource, sink.clone(), profile(), settings);
    let reason = capture.run(&token);
    let returned = Instant::now();
    let cancelled_at = canceller.join().unwrap();

    assert_eq!(reason, ExitReason::Cancelled(CancelReason::OsSignal));
    assert!(returned - cancelled_at <= bound, "took {:?}", returned - cancelled_at);

    let log = sink.snapshot();
    assert!(!log.writes.is_empty());
    for (at, _) in &log.writes {
        assert!(*at <= cancelled_at + Duration::from_millis(5));
    }
    assert!(log.closed);
}

#[test]
fn pre_cancelled_token_reads_nothing() {
    init_test_tracing();
    let token = CancellationToken::new();
    token.cancel(CancelReason::OsSignal);

    let sink = RecordingSink::new();
    let source = ScriptedSource::new(frames(3), &token);
    let mut capture = PacedCapture::new(source, sink.clone(), profile(), settings(5));

    assert_eq!(
        capture.run(&token),
        ExitReason::Cancelled(CancelReason::OsSignal)
    );
    let (source, _) = capture.into_parts();
    assert_eq!(source.reads, 0);
    assert!(sink.snapshot().writes.is_empty());
    assert!(sink.snapshot().closed);
}

#[test]
fn closed_source_is_reopened() {
    init_test_tracing();
    let token = CancellationToken::new();

    let steps = vec![
        Step::Frame(good_frame()),
        Step::Fail(SourceError::Closed),
        Step::Frame(good_frame()),
    ];
    let source = ScriptedSource::new(steps, &token)
        .with_open_results(vec![Err(SourceError::Open("busy".into())), Ok(())]);
    let sink = RecordingSink::cancel_after(2, &token);

    let mut capture = PacedCapture::new(source, sink, profile(), settings(5));
    let reason = capture.run(&token);

    assert!(!reason.is_fatal());
    assert_eq!(capture.stats().reconnects, 1);
    assert_eq!(capture.stats().forwarded, 2);
    let (source, _) = capture.into_parts();
    assert_eq!(source.closes, 1);
    assert_eq!(source.opens, 2);
}

#[test]
fn reconnect_gives_up_after_max_attempts() {
    init_test_tracing();
    let token = CancellationToken::new();

    let source = ScriptedSource::new(vec![Step::Fail(SourceError::Closed)], &token)
        .with_open_results(
            (0..3)
                .map(|_| Err(SourceError::Open("unplugged".into())))
                .collect(),
        );
    let sink = RecordingSink::new();
    let mut capture = PacedCapture::new(source, sink.clone(), profile(), settings(5));
    let reason = capture.run(&token);

    assert!(matches!(reason, ExitReason::SourceClosed(_)));
    assert_eq!(reason.stage(), Some(Stage::Source));
    assert!(sink.snapshot().closed);
    let (source, _) = capture.into_parts();
    assert_eq!(source.opens, 3);
}

#[test]
fn long_failure_streak_triggers_reopen() {
    init_test_tracing();
    let token = CancellationToken::new();

    let mut steps: Vec<Step> = (0..3)
        .map(|_| Step::Fail(SourceError::Device("EIO".into())))
        .collect();
    steps.extend(frames(1));
    let source = ScriptedSource::new(steps, &token);
    let sink = RecordingSink::cancel_after(1, &token);

    let mut settings = settings(5);
    settings.reopen_after_failures = 3;
    let mut capture = PacedCapture::new(source, sink, profile(), settings);
    capture.run(&token);

    assert_eq!(capture.stats().transient_errors, 3);
    assert_eq!(capture.stats().reconnects, 1);
    assert_eq!(capture.stats().forwarded, 1);
}

#[test]
fn stalled_sink_is_treated_as_closed() {
    init_test_tracing();
    let token = CancellationToken::new();

    let source = ScriptedSource::new(frames(5), &token);
    let sink = SlowSink {
        delay: Duration::from_millis(60),
        writes: 0,
    };
    let mut settings = settings(5);
    settings.stall_ceiling = Duration::from_millis(20);

    let mut capture = PacedCapture::new(source, sink, profile(), settings);
    let reason = capture.run(&token);

    assert!(matches!(reason, ExitReason::SinkClosed(_)));
    let (_, sink) = capture.into_parts();
    assert_eq!(sink.writes, 1);
}

#[cfg(unix)]
#[test]
fn stuck_encoder_process_does_not_hang_shutdown() {
    use std::os::unix::fs::PermissionsExt;

    use camlink::capture::{FrameProfile, PixelFormat};
    use camlink::pipeline::EncoderSink;
    use camlink::{EncoderConfig, RawFrame, StreamConfig};

    init_test_tracing();
    let token = CancellationToken::new();

    let script = std::env::temp_dir().join(format!("camlink-stuck-loop-{}", std::process::id()));
    std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let profile = FrameProfile::new(1280, 720, PixelFormat::Bgr24).unwrap();
    let encoder = EncoderConfig {
        program: script.to_string_lossy().into_owned(),
        ..EncoderConfig::default()
    };
    let mut settings = settings(5);
    settings.stall_ceiling = Duration::from_millis(200);
    let sink = EncoderSink::spawn(
        &encoder,
        &StreamConfig::default(),
        &profile,
        30,
        settings.stall_ceiling,
    )
    .unwrap();

    let steps = (0..4)
        .map(|_| Step::Frame(RawFrame::new(vec![0u8; profile.expected_byte_size()], 1280, 720)))
        .collect();
    let source = ScriptedSource::new(steps, &token);
    let mut capture = PacedCapture::new(source, sink, profile, settings);

    let started = Instant::now();
    let reason = capture.run(&token);

    assert!(matches!(reason, ExitReason::SinkClosed(_)));
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "run took {:?}",
        started.elapsed()
    );
    let _ = std::fs::remove_file(script);
}
