use super::*;
use crate::engine::segmented::{FaultKind, SegmentedEvent};
use crate::engine::sink::SinkEvent;
use crate::error::SinkError;
use crate::models::{ContentKind, EpisodeEntry, EpisodePayload};
use crate::test_support::{
    program, MockBackend, MockEpisodes, MockSchedule, MockSink, MockStreams,
};

struct Harness {
    controller: PlaybackController,
    sink: MockSink,
    backend: MockBackend,
    streams: Arc<MockStreams>,
    storage: MemoryStorage,
}

fn harness() -> Harness {
    harness_with(|b| b)
}

fn harness_with(
    extra: impl FnOnce(PlaybackControllerBuilder) -> PlaybackControllerBuilder,
) -> Harness {
    let sink = MockSink::new();
    let backend = MockBackend::new();
    let streams = MockStreams::new();
    let storage = MemoryStorage::new();
    let builder = PlaybackController::builder("profile-1")
        .stream_source(Arc::clone(&streams))
        .storage(storage.clone())
        .sink(sink.clone())
        .segmented_backend(backend.clone());
    let controller = extra(builder).build().unwrap();
    Harness {
        controller,
        sink,
        backend,
        streams,
        storage,
    }
}

/// Run worker tasks to completion, including follow-ups
fn settle(controller: &mut PlaybackController) {
    for _ in 0..10 {
        if !controller.has_pending_tasks() {
            break;
        }
        assert!(controller.wait_for_tasks(Duration::from_secs(5)));
        controller.poll();
    }
}

fn time_update(current: f64, duration: f64) -> SinkEvent {
    SinkEvent::TimeUpdate {
        current,
        duration: Some(duration),
    }
}

fn episode(id: i64, num: i32, next: Option<EpisodePayload>) -> EpisodePayload {
    EpisodePayload {
        episode_id: Some(id),
        series_id: 9,
        season: 1,
        episode_num: num,
        title: format!("Episode {}", num),
        container_extension: Some("mkv".to_string()),
        next_episode: next.map(Box::new),
    }
}

fn entry(id: i64, num: i32) -> EpisodeEntry {
    EpisodeEntry {
        id,
        title: format!("Episode {}", num),
        season: 1,
        episode_num: num,
        container_extension: "mkv".to_string(),
    }
}

/// Select a movie, resolve it and let playback report `position`
fn watch_movie(h: &mut Harness, id: i64, position: f64) {
    h.controller.select_content(ContentReference::movie(id, "Film"));
    settle(&mut h.controller);
    h.sink.push(SinkEvent::MetadataLoaded {
        duration: Some(3000.0),
    });
    h.controller.poll();
    h.sink.push(time_update(position, 3000.0));
    h.controller.poll();
}

#[test]
fn test_build_requires_sink() {
    let result = PlaybackController::builder("p")
        .stream_source(MockStreams::new())
        .build();
    assert!(matches!(
        result,
        Err(SessionError::MissingCollaborator("playback sink"))
    ));
}

#[test]
fn test_build_rejects_invalid_config() {
    let config = PlayerConfig {
        position_save_interval_secs: 0,
        ..Default::default()
    };
    let result = PlaybackController::builder("p")
        .config(config)
        .stream_source(MockStreams::new())
        .sink(MockSink::new())
        .build();
    assert!(matches!(result, Err(SessionError::Config(_))));
}

#[test]
fn test_movie_resolves_and_plays_directly() {
    let mut h = harness();
    h.controller.select_content(ContentReference::movie(1001, "Film"));
    settle(&mut h.controller);

    assert_eq!(h.sink.loads(), vec!["http://mock/movie/1001.mp4".to_string()]);
    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.delivery_mode, Some(DeliveryMode::DirectProgressive));
    assert_eq!(snapshot.engine_state, EngineState::Attaching);

    h.sink.push(SinkEvent::MetadataLoaded {
        duration: Some(3000.0),
    });
    h.controller.poll();
    assert_eq!(h.sink.plays(), 1);
    assert_eq!(h.controller.snapshot().transport.duration, Some(3000.0));
}

#[test]
fn test_catalogue_container_used_for_url() {
    let mut h = harness();
    let mut reference = ContentReference::movie(5, "Film");
    if let crate::models::ContentPayload::Movie(m) = &mut reference.payload {
        m.container_extension = Some("mkv".to_string());
    }
    h.controller.select_content(reference);
    settle(&mut h.controller);
    assert_eq!(h.sink.loads(), vec!["http://mock/movie/5.mkv".to_string()]);
}

#[test]
fn test_one_outbound_call_per_identity() {
    let mut h = harness();
    h.controller.select_content(ContentReference::movie(7, "Film (HD)"));
    h.controller.select_content(ContentReference::movie(7, "Film"));
    settle(&mut h.controller);
    h.controller.select_content(ContentReference::movie(7, "Film"));
    settle(&mut h.controller);

    assert_eq!(h.streams.calls(), 1);
    assert_eq!(h.sink.loads().len(), 1);
}

#[test]
fn test_stale_resolution_is_dropped() {
    let mut h = harness();
    h.controller.select_content(ContentReference::movie(1, "First"));
    h.controller.select_content(ContentReference::movie(2, "Second"));
    settle(&mut h.controller);

    assert_eq!(h.streams.calls(), 2);
    assert_eq!(h.sink.loads(), vec!["http://mock/movie/2.mp4".to_string()]);
    assert_eq!(
        h.controller.snapshot().identity,
        Some(ContentIdentity::new(ContentKind::Movie, "2"))
    );
}

#[test]
fn test_failed_resolution_banner_and_retry() {
    let mut h = harness();
    h.streams.set_fail(true);
    h.controller.select_content(ContentReference::movie(3, "Film"));
    settle(&mut h.controller);

    assert!(matches!(
        h.controller.snapshot().banner,
        Banner::StreamUnavailable(_)
    ));
    assert!(h
        .controller
        .drain_notices()
        .iter()
        .any(|n| matches!(n, SessionNotice::StreamUnavailable(_))));
    assert!(h.sink.loads().is_empty());

    // Selecting it again retries
    h.streams.set_fail(false);
    h.controller.select_content(ContentReference::movie(3, "Film"));
    settle(&mut h.controller);
    assert_eq!(h.streams.calls(), 2);
    assert_eq!(h.controller.snapshot().banner, Banner::None);
    assert_eq!(h.sink.loads().len(), 1);
}

#[test]
fn test_unsupported_media_shows_compatibility_banner() {
    let mut h = harness();
    h.controller.select_content(ContentReference::movie(4, "Film"));
    settle(&mut h.controller);
    h.sink
        .push(SinkEvent::Error(SinkError::Unsupported("hevc".to_string())));
    h.controller.poll();

    let snapshot = h.controller.snapshot();
    assert!(matches!(snapshot.banner, Banner::Compatibility(_)));
    assert!(snapshot.codec_warning);
    assert_eq!(snapshot.engine_state, EngineState::Failed);
    assert!(h
        .controller
        .drain_notices()
        .iter()
        .any(|n| matches!(n, SessionNotice::CompatibilityWarning(_))));
}

#[test]
fn test_live_manifest_goes_adaptive_and_survives_network_fault() {
    let mut h = harness();
    h.controller
        .select_content(ContentReference::channel("News", "http://host/live/1.m3u8"));
    assert_eq!(h.streams.calls(), 0);
    assert_eq!(h.backend.state().loads, vec!["http://host/live/1.m3u8".to_string()]);

    h.backend.push(SegmentedEvent::ManifestParsed {
        media_url: "http://host/live/1.m3u8".to_string(),
        variants: 1,
    });
    h.controller.poll();
    assert!(matches!(
        h.controller.snapshot().engine_state,
        EngineState::Ready { .. }
    ));

    h.backend.push(SegmentedEvent::Error {
        kind: FaultKind::Network,
        fatal: true,
        details: "fragLoadError".to_string(),
    });
    h.controller.poll();

    let backend = h.backend.state();
    assert_eq!(backend.start_loads, 1);
    assert_eq!(backend.destroyed, 0);
    assert_eq!(backend.sessions_created, 1);
    drop(backend);

    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.delivery_mode, Some(DeliveryMode::AdaptiveSegmented));
    assert_eq!(snapshot.banner, Banner::None);
}

#[test]
fn test_live_content_never_prompts_or_saves() {
    let mut h = harness();
    h.controller
        .select_content(ContentReference::channel("News", "http://host/live/1.ts"));
    h.sink.push(time_update(600.0, 0.0));
    h.controller.poll();
    h.controller.pause();

    assert!(h.storage.is_empty());
    assert_eq!(h.controller.snapshot().resume_prompt, None);
    assert!(!h
        .controller
        .drain_notices()
        .iter()
        .any(|n| matches!(n, SessionNotice::ResumePrompt { .. })));
}

#[test]
fn test_movie_resume_round_trip() {
    let mut h = harness();
    watch_movie(&mut h, 1001, 45.0);
    assert_eq!(h.storage.len(), 1);

    // Switch away and come back
    h.controller
        .select_content(ContentReference::channel("News", "http://host/live/1.m3u8"));
    h.controller.drain_notices();
    h.controller.select_content(ContentReference::movie(1001, "Film"));

    assert!(h
        .controller
        .drain_notices()
        .contains(&SessionNotice::ResumePrompt { position: 45.0 }));
    assert_eq!(h.controller.snapshot().resume_prompt, Some(45.0));

    h.controller.confirm_resume();
    settle(&mut h.controller);
    h.sink.push(SinkEvent::MetadataLoaded {
        duration: Some(3000.0),
    });
    h.controller.poll();

    assert_eq!(h.sink.seeks(), vec![45.0]);
    assert_eq!(h.controller.snapshot().resume_prompt, None);
    assert_eq!(h.controller.snapshot().transport.position, 45.0);
}

#[test]
fn test_resume_confirmed_after_metadata_seeks_once() {
    let mut h = harness();
    watch_movie(&mut h, 1001, 45.0);

    h.controller
        .select_content(ContentReference::channel("News", "http://host/live/1.m3u8"));
    h.controller.select_content(ContentReference::movie(1001, "Film"));
    settle(&mut h.controller);
    h.sink.push(SinkEvent::MetadataLoaded {
        duration: Some(3000.0),
    });
    h.controller.poll();
    assert!(h.sink.seeks().is_empty());
    assert_eq!(h.controller.snapshot().resume_prompt, Some(45.0));

    h.controller.confirm_resume();
    assert_eq!(h.sink.seeks(), vec![45.0]);
    assert_eq!(h.controller.snapshot().transport.position, 45.0);

    // A later metadata event must not seek again
    h.sink.push(SinkEvent::MetadataLoaded {
        duration: Some(3000.0),
    });
    h.controller.poll();
    assert_eq!(h.sink.seeks(), vec![45.0]);
}

#[test]
fn test_short_position_is_not_offered() {
    let mut h = harness();
    watch_movie(&mut h, 1002, 25.0);
    h.controller.deselect();
    h.controller.select_content(ContentReference::movie(1002, "Film"));

    assert_eq!(h.controller.snapshot().resume_prompt, None);
    assert!(!h
        .controller
        .drain_notices()
        .iter()
        .any(|n| matches!(n, SessionNotice::ResumePrompt { .. })));
}

#[test]
fn test_restart_discards_prompt_and_overwrites() {
    let mut h = harness();
    watch_movie(&mut h, 1003, 300.0);
    h.controller.deselect();

    h.controller.select_content(ContentReference::movie(1003, "Film"));
    h.controller.restart_from_beginning();
    settle(&mut h.controller);
    h.sink.push(SinkEvent::MetadataLoaded {
        duration: Some(3000.0),
    });
    h.sink.push(time_update(12.0, 3000.0));
    h.controller.poll();
    h.controller.deselect();

    assert!(h.sink.seeks().is_empty());
    h.controller.select_content(ContentReference::movie(1003, "Film"));
    assert_eq!(h.controller.snapshot().resume_prompt, None);
}

#[test]
fn test_unanswered_prompt_keeps_stored_position() {
    let mut h = harness();
    watch_movie(&mut h, 1004, 900.0);
    h.controller.deselect();

    // Playback starts from zero while the prompt is still open
    h.controller.select_content(ContentReference::movie(1004, "Film"));
    settle(&mut h.controller);
    h.sink.push(time_update(3.0, 3000.0));
    h.controller.poll();
    h.controller.deselect();

    h.controller.select_content(ContentReference::movie(1004, "Film"));
    assert_eq!(h.controller.snapshot().resume_prompt, Some(900.0));
}

#[test]
fn test_finished_movie_clears_record() {
    let mut h = harness();
    watch_movie(&mut h, 1005, 2990.0);
    assert_eq!(h.storage.len(), 1);

    h.sink.push(SinkEvent::Ended);
    h.controller.poll();

    assert!(h.storage.is_empty());
    assert!(h
        .controller
        .drain_notices()
        .contains(&SessionNotice::PlaybackEnded));
}

#[test]
fn test_pause_flushes_position() {
    let mut h = harness();
    watch_movie(&mut h, 1006, 100.0);
    h.sink.push(SinkEvent::Playing);
    h.sink.push(time_update(102.0, 3000.0));
    h.controller.poll();

    h.controller.pause();
    h.controller.deselect();
    h.controller.select_content(ContentReference::movie(1006, "Film"));
    assert_eq!(h.controller.snapshot().resume_prompt, Some(102.0));
}

#[test]
fn test_autoplay_rejection_surfaces_notice() {
    let mut h = harness();
    h.sink.set_reject_play(true);
    h.controller.select_content(ContentReference::movie(8, "Film"));
    settle(&mut h.controller);
    h.sink.push(SinkEvent::MetadataLoaded { duration: None });
    h.controller.poll();

    assert!(h.controller.snapshot().autoplay_blocked);
    assert!(h
        .controller
        .drain_notices()
        .contains(&SessionNotice::AutoplayBlocked));
    assert!(h.controller.play().is_err());
}

#[test]
fn test_live_channel_guide_single_fetch() {
    let epoch = Utc::now().timestamp();
    let schedule = MockSchedule::with_short(vec![
        program("Morning News", epoch - 600, 1800),
        program("Weather", epoch + 1200, 600),
    ]);
    let mut h = harness_with(|b| b.schedule_source(Arc::clone(&schedule)));

    h.controller.select_content(ContentReference::live(42, "News 24"));
    settle(&mut h.controller);
    h.controller.poll();
    h.controller.poll();

    assert_eq!(schedule.short_calls(), 1);
    assert_eq!(schedule.full_calls(), 0);
    let snapshot = h.controller.snapshot();
    let current = snapshot.current_program.unwrap();
    assert_eq!(current.title, "Morning News");
    assert!(current.contains(Utc::now().timestamp()));
    assert_eq!(snapshot.next_program.unwrap().title, "Weather");
}

#[test]
fn test_empty_short_guide_falls_back_to_full_schedule() {
    let epoch = Utc::now().timestamp();
    let schedule = MockSchedule::with_full(vec![
        program("Earlier", epoch - 7200, 3600),
        program("Film Night", epoch - 300, 3600),
        program("Late Show", epoch + 3300, 3600),
    ]);
    let mut h = harness_with(|b| b.schedule_source(Arc::clone(&schedule)));

    h.controller.select_content(ContentReference::live(43, "Movies"));
    settle(&mut h.controller);

    assert_eq!(schedule.short_calls(), 1);
    assert_eq!(schedule.full_calls(), 1);
    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.current_program.unwrap().title, "Film Night");
    assert_eq!(snapshot.next_program.unwrap().title, "Late Show");
}

#[test]
fn test_guide_cached_across_channel_switches() {
    let epoch = Utc::now().timestamp();
    let schedule = MockSchedule::with_short(vec![program("Show", epoch - 60, 3600)]);
    let mut h = harness_with(|b| b.schedule_source(Arc::clone(&schedule)));

    h.controller.select_content(ContentReference::live(42, "News"));
    settle(&mut h.controller);
    h.controller.select_content(ContentReference::movie(1, "Film"));
    settle(&mut h.controller);
    h.controller.select_content(ContentReference::live(42, "News"));
    settle(&mut h.controller);

    assert_eq!(schedule.short_calls(), 1);
    assert_eq!(
        h.controller.snapshot().current_program.map(|p| p.title),
        Some("Show".to_string())
    );
}

#[test]
fn test_countdown_fires_once_and_commits() {
    let mut h = harness();
    let reference = ContentReference::episode(episode(101, 1, Some(episode(102, 2, None))));
    h.controller.select_content(reference);
    settle(&mut h.controller);
    assert_eq!(h.controller.snapshot().transition, TransitionState::Armed);

    let t0 = Instant::now();
    let epoch = Utc::now().timestamp();
    h.sink.push(time_update(2975.0, 3000.0));
    h.controller.poll_at(t0, epoch);
    h.sink.push(time_update(2976.0, 3000.0));
    h.controller.poll_at(t0, epoch);

    let started = h
        .controller
        .drain_notices()
        .into_iter()
        .filter(|n| matches!(n, SessionNotice::CountdownStarted { .. }))
        .count();
    assert_eq!(started, 1);
    assert_eq!(h.controller.snapshot_at(t0).countdown, Some(10));

    h.controller.poll_at(t0 + Duration::from_secs(10), epoch);
    assert!(h.controller.drain_notices().contains(&SessionNotice::NextEpisode {
        title: "Episode 2".to_string()
    }));
    assert_eq!(
        h.controller.snapshot().identity,
        Some(ContentIdentity::new(ContentKind::Episode, "102"))
    );
    settle(&mut h.controller);
    assert_eq!(h.sink.loads().last().unwrap(), "http://mock/series/102.mkv");
}

#[test]
fn test_cancelled_countdown_stays_cancelled() {
    let mut h = harness();
    let reference = ContentReference::episode(episode(101, 1, Some(episode(102, 2, None))));
    h.controller.select_content(reference);
    settle(&mut h.controller);

    let t0 = Instant::now();
    let epoch = Utc::now().timestamp();
    h.sink.push(time_update(2980.0, 3000.0));
    h.controller.poll_at(t0, epoch);
    h.controller.cancel_next_episode();

    h.sink.push(time_update(100.0, 3000.0));
    h.sink.push(time_update(2990.0, 3000.0));
    h.sink.push(SinkEvent::Ended);
    h.controller.poll_at(t0 + Duration::from_secs(30), epoch);

    assert_eq!(h.controller.snapshot().transition, TransitionState::Cancelled);
    assert_eq!(
        h.controller.snapshot().identity,
        Some(ContentIdentity::new(ContentKind::Episode, "101"))
    );
}

#[test]
fn test_successor_discovered_from_series_listing() {
    let episodes = MockEpisodes::with(vec![entry(103, 3), entry(101, 1), entry(102, 2)]);
    let mut h = harness_with(|b| b.episode_source(Arc::clone(&episodes)));

    h.controller
        .select_content(ContentReference::episode(episode(101, 1, None)));
    settle(&mut h.controller);
    assert_eq!(episodes.calls(), 1);
    assert_eq!(h.controller.snapshot().transition, TransitionState::Armed);

    h.controller.confirm_next_episode();
    assert_eq!(
        h.controller.snapshot().identity,
        Some(ContentIdentity::new(ContentKind::Episode, "102"))
    );
    settle(&mut h.controller);

    // The listing is reused for the episode after that
    assert_eq!(episodes.calls(), 1);
    assert_eq!(h.controller.snapshot().transition, TransitionState::Armed);
}

fn series_keyed(num: i32, next: Option<EpisodePayload>) -> EpisodePayload {
    EpisodePayload {
        episode_id: None,
        ..episode(0, num, next)
    }
}

#[test]
fn test_series_keyed_episodes_still_roll_over() {
    let third = series_keyed(3, None);
    let second = series_keyed(2, Some(third));
    let first = series_keyed(1, Some(second));
    let mut h = harness();

    h.controller.select_content(ContentReference::episode(first));
    settle(&mut h.controller);
    assert_eq!(h.controller.snapshot().transition, TransitionState::Armed);
    let series = Some(ContentIdentity::new(ContentKind::Episode, "9"));
    assert_eq!(h.controller.snapshot().identity, series);

    h.controller.confirm_next_episode();
    settle(&mut h.controller);
    assert!(h.controller.drain_notices().contains(&SessionNotice::NextEpisode {
        title: "Episode 2".to_string()
    }));
    // Same identity, but the machine re-arms for the episode after
    assert_eq!(h.controller.snapshot().identity, series);
    assert_eq!(h.controller.snapshot().transition, TransitionState::Armed);
    assert_eq!(
        h.controller.reference().and_then(|r| r.as_episode()).map(|e| e.episode_num),
        Some(2)
    );

    h.controller.confirm_next_episode();
    settle(&mut h.controller);
    assert_eq!(h.controller.snapshot().transition, TransitionState::Idle);
    assert_eq!(
        h.controller.reference().and_then(|r| r.as_episode()).map(|e| e.episode_num),
        Some(3)
    );
    // Series-keyed resolution is memoized
    assert_eq!(h.streams.calls(), 1);
}

#[test]
fn test_last_episode_stays_idle() {
    let episodes = MockEpisodes::with(vec![entry(101, 1), entry(102, 2)]);
    let mut h = harness_with(|b| b.episode_source(Arc::clone(&episodes)));

    h.controller
        .select_content(ContentReference::episode(episode(102, 2, None)));
    settle(&mut h.controller);
    assert_eq!(h.controller.snapshot().transition, TransitionState::Idle);

    h.sink.push(SinkEvent::Ended);
    h.controller.poll();
    assert_eq!(
        h.controller.snapshot().identity,
        Some(ContentIdentity::new(ContentKind::Episode, "102"))
    );
}

#[test]
fn test_transport_commands_reach_sink() {
    let mut h = harness();
    h.controller.select_content(ContentReference::movie(9, "Film"));
    settle(&mut h.controller);

    h.controller.set_volume(1.5);
    h.controller.toggle_mute();
    h.controller.toggle_fullscreen();
    h.controller.select_subtitle_track(Some(1));
    h.controller.select_audio_track(2);
    h.controller.seek(-5.0);

    let state = h.sink.state();
    assert_eq!(state.volume, Some(1.0));
    assert_eq!(state.muted, Some(true));
    assert_eq!(state.fullscreen, Some(true));
    assert_eq!(state.subtitle_track, Some(Some(1)));
    assert_eq!(state.audio_track, Some(2));
    assert_eq!(state.seeks, vec![0.0]);
    drop(state);

    let transport = h.controller.snapshot().transport;
    assert!(transport.muted);
    assert!(transport.fullscreen);
    assert_eq!(transport.audio_track, Some(2));
}

#[test]
fn test_deselect_tears_down() {
    let mut h = harness();
    h.controller
        .select_content(ContentReference::channel("News", "http://host/live/1.m3u8"));
    h.controller.deselect();

    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.identity, None);
    assert_eq!(snapshot.engine_state, EngineState::Idle);
    assert_eq!(h.backend.state().destroyed, 1);
    assert!(h.sink.state().clears >= 1);
}

#[test]
fn test_now_playing_notice_on_select() {
    let mut h = harness();
    h.controller.select_content(ContentReference::movie(10, "Big Film"));
    let notices = h.controller.drain_notices();
    assert!(notices.iter().any(|n| matches!(
        n,
        SessionNotice::NowPlaying(np) if np.title == "Big Film" && np.kind == ContentKind::Movie
    )));
}
