use super::segmented::{FaultKind, SegmentedEvent};
use super::sink::SinkEvent;
use super::*;
use crate::error::SinkError;
use crate::test_support::{MockBackend, MockSink};

const FULL: Capabilities = Capabilities {
    segmented_backend: true,
    native_segmented: false,
};

fn adaptive(url: &str) -> ResolvedStream {
    ResolvedStream {
        url: url.to_string(),
        delivery_mode: DeliveryMode::AdaptiveSegmented,
    }
}

fn progressive(url: &str) -> ResolvedStream {
    ResolvedStream {
        url: url.to_string(),
        delivery_mode: DeliveryMode::DirectProgressive,
    }
}

fn engine(sink: &MockSink, backend: &MockBackend) -> PlaybackEngine {
    PlaybackEngine::new(sink.boxed(), Some(backend.boxed()), true, 3)
}

fn network_error() -> SegmentedEvent {
    SegmentedEvent::Error {
        kind: FaultKind::Network,
        fatal: true,
        details: "manifestLoadError".to_string(),
    }
}

fn parsed(url: &str) -> SegmentedEvent {
    SegmentedEvent::ManifestParsed {
        media_url: url.to_string(),
        variants: 1,
    }
}

#[test]
fn test_shape_detection() {
    assert_eq!(stream_shape("http://host/live/u/p/1.m3u8"), StreamShape::Manifest);
    assert_eq!(stream_shape("http://host/list.M3U"), StreamShape::Manifest);
    assert_eq!(stream_shape("http://host/playlist?id=3"), StreamShape::Manifest);
    assert_eq!(stream_shape("http://host/x?format=hls"), StreamShape::Manifest);
    assert_eq!(stream_shape("http://host/x.isml/manifest"), StreamShape::Manifest);
    assert_eq!(stream_shape("http://host/live/u/p/1.ts"), StreamShape::TransportStream);
    assert_eq!(stream_shape("http://host/movie/u/p/7.mkv"), StreamShape::Progressive);
    assert_eq!(stream_shape("http://host/movie/u/p/7.mp4?token=1"), StreamShape::Progressive);
}

#[test]
fn test_live_manifest_is_adaptive() {
    let mode = classify("http://host/stream.m3u8", ContentKind::LiveChannel, FULL);
    assert_eq!(mode, DeliveryMode::AdaptiveSegmented);
}

#[test]
fn test_live_is_segmented_whatever_the_url() {
    let mode = classify("http://host/u/p/42", ContentKind::LiveChannel, FULL);
    assert_eq!(mode, DeliveryMode::AdaptiveSegmented);
    let mode = classify("http://host/ch.mp4", ContentKind::Channel, FULL);
    assert_eq!(mode, DeliveryMode::AdaptiveSegmented);
}

#[test]
fn test_movie_file_is_progressive() {
    let mode = classify("http://host/movie/u/p/7.mkv", ContentKind::Movie, FULL);
    assert_eq!(mode, DeliveryMode::DirectProgressive);
}

#[test]
fn test_native_only_without_backend() {
    let native = Capabilities {
        segmented_backend: false,
        native_segmented: true,
    };
    assert_eq!(
        classify("http://host/a.m3u8", ContentKind::Movie, native),
        DeliveryMode::NativeSegmented
    );
    assert_eq!(
        classify("http://host/a.m3u8", ContentKind::Movie, Capabilities::default()),
        DeliveryMode::DirectProgressive
    );
}

#[test]
fn test_capabilities_reflect_collaborators() {
    let sink = MockSink::native();
    let engine = PlaybackEngine::new(sink.boxed(), None, true, 3);
    assert_eq!(
        engine.capabilities(),
        Capabilities {
            segmented_backend: false,
            native_segmented: true,
        }
    );
}

#[test]
fn test_adaptive_ready_on_manifest_and_autoplays() {
    let sink = MockSink::new();
    let backend = MockBackend::new();
    let mut engine = engine(&sink, &backend);

    assert!(engine.attach(&adaptive("http://host/a.m3u8"), true));
    assert_eq!(engine.state(), EngineState::Attaching);
    assert_eq!(backend.state().loads, vec!["http://host/a.m3u8".to_string()]);

    backend.push(parsed("http://host/a/720.m3u8"));
    let out = engine.poll();
    assert_eq!(out, vec![EngineOutput::Ready]);
    assert_eq!(engine.state(), EngineState::Ready { warning: false });
    assert_eq!(sink.loads(), vec!["http://host/a/720.m3u8".to_string()]);
    assert_eq!(sink.plays(), 1);
}

#[test]
fn test_progressive_ready_on_metadata() {
    let sink = MockSink::new();
    let backend = MockBackend::new();
    let mut engine = engine(&sink, &backend);

    engine.attach(&progressive("http://host/m.mp4"), false);
    assert_eq!(backend.state().sessions_created, 0);
    assert_eq!(sink.loads(), vec!["http://host/m.mp4".to_string()]);

    sink.push(SinkEvent::MetadataLoaded { duration: Some(5400.0) });
    let out = engine.poll();
    assert_eq!(
        out,
        vec![
            EngineOutput::Ready,
            EngineOutput::MetadataLoaded { duration: Some(5400.0) }
        ]
    );
    assert!(engine.metadata_loaded());
}

#[test]
fn test_same_url_is_not_reattached() {
    let sink = MockSink::new();
    let backend = MockBackend::new();
    let mut engine = engine(&sink, &backend);

    assert!(engine.attach(&adaptive("http://host/a.m3u8"), true));
    assert!(!engine.attach(&adaptive("http://host/a.m3u8"), true));
    assert_eq!(backend.state().sessions_created, 1);
    assert_eq!(backend.state().destroyed, 0);
}

#[test]
fn test_url_change_tears_down_previous_session() {
    let sink = MockSink::new();
    let backend = MockBackend::new();
    let mut engine = engine(&sink, &backend);

    engine.attach(&adaptive("http://host/a.m3u8"), true);
    engine.attach(&adaptive("http://host/b.m3u8"), true);
    assert_eq!(backend.state().sessions_created, 2);
    assert_eq!(backend.state().destroyed, 1);
}

#[test]
fn test_network_fault_reloads_without_teardown() {
    let sink = MockSink::new();
    let backend = MockBackend::new();
    let mut engine = engine(&sink, &backend);

    engine.attach(&adaptive("http://host/a.m3u8"), true);
    backend.push(parsed("http://host/a.m3u8"));
    engine.poll();

    backend.push(network_error());
    let out = engine.poll();
    assert!(matches!(
        out.as_slice(),
        [EngineOutput::Fault(PlaybackFault::Transport { attempt: 1, .. })]
    ));
    assert_eq!(engine.state(), EngineState::Recovering(RecoveryKind::Network));
    assert_eq!(backend.state().start_loads, 1);
    assert_eq!(backend.state().destroyed, 0);

    // Second fault before the reload lands: still only a reload
    backend.push(network_error());
    engine.poll();
    assert_eq!(backend.state().start_loads, 2);
    assert_eq!(backend.state().destroyed, 0);
    assert!(engine.has_session());

    backend.push(parsed("http://host/a.m3u8"));
    let out = engine.poll();
    assert_eq!(out, vec![EngineOutput::Ready]);
    assert!(!engine.codec_warning());
}

#[test]
fn test_repeated_faults_escalate_past_limit() {
    let sink = MockSink::new();
    let backend = MockBackend::new();
    let mut engine = PlaybackEngine::new(sink.boxed(), Some(backend.boxed()), true, 2);

    engine.attach(&adaptive("http://host/a.m3u8"), true);
    for _ in 0..2 {
        backend.push(network_error());
        engine.poll();
    }
    assert_eq!(engine.state(), EngineState::Recovering(RecoveryKind::Network));

    backend.push(network_error());
    let out = engine.poll();
    assert!(matches!(
        out.as_slice(),
        [EngineOutput::Fault(PlaybackFault::Media(_))]
    ));
    assert_eq!(engine.state(), EngineState::Failed);
    assert!(engine.codec_warning());
    assert_eq!(backend.state().destroyed, 1);
}

#[test]
fn test_ready_resets_fault_count() {
    let sink = MockSink::new();
    let backend = MockBackend::new();
    let mut engine = PlaybackEngine::new(sink.boxed(), Some(backend.boxed()), true, 1);

    engine.attach(&adaptive("http://host/a.m3u8"), true);
    for _ in 0..3 {
        backend.push(network_error());
        backend.push(parsed("http://host/a.m3u8"));
        engine.poll();
    }
    assert_eq!(engine.state(), EngineState::Ready { warning: false });
    assert_eq!(backend.state().start_loads, 3);
}

#[test]
fn test_media_fault_recovers_in_place() {
    let sink = MockSink::new();
    let backend = MockBackend::new();
    let mut engine = engine(&sink, &backend);

    engine.attach(&adaptive("http://host/vod.m3u8"), false);
    backend.push(parsed("http://host/vod.m3u8"));
    sink.push(SinkEvent::TimeUpdate { current: 120.0, duration: Some(3600.0) });
    engine.poll();

    backend.push(SegmentedEvent::Error {
        kind: FaultKind::Media,
        fatal: true,
        details: "bufferAppendError".to_string(),
    });
    engine.poll();
    assert_eq!(engine.state(), EngineState::Recovering(RecoveryKind::Media));
    assert_eq!(backend.state().media_recoveries, 1);

    backend.push(SegmentedEvent::Recovered);
    engine.poll();
    assert_eq!(engine.state(), EngineState::Ready { warning: false });
    // Reloaded and put back where it was
    assert_eq!(sink.seeks(), vec![120.0]);
}

#[test]
fn test_other_fatal_fault_fails_and_tears_down() {
    let sink = MockSink::new();
    let backend = MockBackend::new();
    let mut engine = engine(&sink, &backend);

    engine.attach(&adaptive("http://host/a.m3u8"), true);
    backend.push(SegmentedEvent::Error {
        kind: FaultKind::Other,
        fatal: true,
        details: "internal".to_string(),
    });
    engine.poll();
    assert_eq!(engine.state(), EngineState::Failed);
    assert!(!engine.has_session());
    assert_eq!(backend.state().destroyed, 1);
}

#[test]
fn test_non_fatal_backend_error_ignored() {
    let sink = MockSink::new();
    let backend = MockBackend::new();
    let mut engine = engine(&sink, &backend);

    engine.attach(&adaptive("http://host/a.m3u8"), true);
    backend.push(SegmentedEvent::Error {
        kind: FaultKind::Network,
        fatal: false,
        details: "fragLoadTimeOut".to_string(),
    });
    assert!(engine.poll().is_empty());
    assert_eq!(engine.state(), EngineState::Attaching);
}

#[test]
fn test_progressive_load_error_fails_without_retry() {
    let sink = MockSink::new();
    let backend = MockBackend::new();
    let mut engine = engine(&sink, &backend);

    engine.attach(&progressive("http://host/m.avi"), false);
    sink.push(SinkEvent::Error(SinkError::Unsupported("codec".to_string())));
    let out = engine.poll();
    assert!(matches!(
        out.as_slice(),
        [EngineOutput::Fault(PlaybackFault::Media(_))]
    ));
    assert_eq!(engine.state(), EngineState::Failed);
    assert!(engine.codec_warning());
    assert_eq!(sink.loads().len(), 1);
}

#[test]
fn test_autoplay_rejection_is_a_warning() {
    let sink = MockSink::new();
    sink.set_reject_play(true);
    let backend = MockBackend::new();
    let mut engine = engine(&sink, &backend);

    engine.attach(&progressive("http://host/m.mp4"), false);
    sink.push(SinkEvent::MetadataLoaded { duration: None });
    let out = engine.poll();
    assert!(out.contains(&EngineOutput::Fault(PlaybackFault::AutoplayRejected)));
    assert_eq!(engine.state(), EngineState::Ready { warning: true });
    assert!(engine.autoplay_blocked());

    sink.set_reject_play(false);
    assert!(engine.play().is_ok());
    assert!(!engine.autoplay_blocked());
    assert_eq!(engine.state(), EngineState::Ready { warning: false });
}

#[test]
fn test_autoplay_disabled_does_not_play() {
    let sink = MockSink::new();
    let backend = MockBackend::new();
    let mut engine = PlaybackEngine::new(sink.boxed(), Some(backend.boxed()), false, 3);

    engine.attach(&progressive("http://host/m.mp4"), false);
    sink.push(SinkEvent::MetadataLoaded { duration: None });
    engine.poll();
    assert_eq!(sink.plays(), 0);
}

#[test]
fn test_buffering_flag_is_advisory() {
    let sink = MockSink::new();
    let backend = MockBackend::new();
    let mut engine = engine(&sink, &backend);

    engine.attach(&progressive("http://host/m.mp4"), false);
    sink.push(SinkEvent::MetadataLoaded { duration: None });
    sink.push(SinkEvent::Waiting);
    engine.poll();
    assert!(engine.is_buffering());
    assert_eq!(engine.state(), EngineState::Ready { warning: false });

    sink.push(SinkEvent::Playing);
    engine.poll();
    assert!(!engine.is_buffering());
}

#[test]
fn test_direct_live_error_reloads_in_place() {
    let sink = MockSink::new();
    let mut engine = PlaybackEngine::new(sink.boxed(), None, true, 3);

    engine.attach(&progressive("rtmp://host/live"), true);
    sink.push(SinkEvent::MetadataLoaded { duration: None });
    engine.poll();

    sink.push(SinkEvent::Error(SinkError::Network("eof".to_string())));
    engine.poll();
    assert_eq!(sink.loads().len(), 2);
    assert_eq!(engine.state(), EngineState::Attaching);
}

#[test]
fn test_detach_clears_everything() {
    let sink = MockSink::new();
    let backend = MockBackend::new();
    let mut engine = engine(&sink, &backend);

    engine.attach(&adaptive("http://host/a.m3u8"), true);
    engine.detach();
    assert_eq!(engine.state(), EngineState::Idle);
    assert_eq!(engine.delivery_mode(), None);
    assert_eq!(backend.state().destroyed, 1);
    assert_eq!(sink.state().clears, 1);

    // Same URL again after a detach is a fresh attach
    assert!(engine.attach(&adaptive("http://host/a.m3u8"), true));
}

#[test]
fn test_drop_destroys_session() {
    let sink = MockSink::new();
    let backend = MockBackend::new();
    {
        let mut engine = engine(&sink, &backend);
        engine.attach(&adaptive("http://host/a.m3u8"), true);
    }
    assert_eq!(backend.state().destroyed, 1);
}
