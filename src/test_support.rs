//! Recording collaborators for unit tests

use crate::engine::segmented::{SegmentedBackend, SegmentedEvent, SegmentedSession};
use crate::engine::sink::{PlayRejected, PlaybackSink, SinkEvent};
use crate::error::ProviderError;
use crate::models::{EpisodeEntry, ProgramEntry};
use crate::provider::{ChannelKey, EpisodeListSource, ResolveRequest, ScheduleSource, StreamSource};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct SinkState {
    pub native_segmented: bool,
    pub reject_play: bool,
    pub loads: Vec<String>,
    pub clears: usize,
    pub plays: usize,
    pub pauses: usize,
    pub seeks: Vec<f64>,
    pub volume: Option<f32>,
    pub muted: Option<bool>,
    pub fullscreen: Option<bool>,
    pub picture_in_picture: Option<bool>,
    pub subtitle_track: Option<Option<usize>>,
    pub audio_track: Option<usize>,
    pub pending: VecDeque<SinkEvent>,
}

/// Sink whose state is shared with the test through clones
#[derive(Clone, Default)]
pub struct MockSink {
    state: Arc<Mutex<SinkState>>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn native() -> Self {
        let sink = Self::default();
        sink.state().native_segmented = true;
        sink
    }

    pub fn state(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap()
    }

    pub fn push(&self, event: SinkEvent) {
        self.state().pending.push_back(event);
    }

    pub fn loads(&self) -> Vec<String> {
        self.state().loads.clone()
    }

    pub fn seeks(&self) -> Vec<f64> {
        self.state().seeks.clone()
    }

    pub fn plays(&self) -> usize {
        self.state().plays
    }

    pub fn set_reject_play(&self, reject: bool) {
        self.state().reject_play = reject;
    }

    pub fn boxed(&self) -> Box<dyn PlaybackSink> {
        Box::new(self.clone())
    }
}

impl PlaybackSink for MockSink {
    fn supports_native_segmented(&self) -> bool {
        self.state().native_segmented
    }

    fn load_source(&mut self, url: &str) {
        self.state().loads.push(url.to_string());
    }

    fn clear_source(&mut self) {
        self.state().clears += 1;
    }

    fn play(&mut self) -> Result<(), PlayRejected> {
        let mut state = self.state();
        if state.reject_play {
            return Err(PlayRejected);
        }
        state.plays += 1;
        Ok(())
    }

    fn pause(&mut self) {
        self.state().pauses += 1;
    }

    fn seek(&mut self, position_secs: f64) {
        self.state().seeks.push(position_secs);
    }

    fn set_volume(&mut self, volume: f32) {
        self.state().volume = Some(volume);
    }

    fn set_muted(&mut self, muted: bool) {
        self.state().muted = Some(muted);
    }

    fn set_fullscreen(&mut self, fullscreen: bool) {
        self.state().fullscreen = Some(fullscreen);
    }

    fn set_picture_in_picture(&mut self, enabled: bool) {
        self.state().picture_in_picture = Some(enabled);
    }

    fn select_subtitle_track(&mut self, index: Option<usize>) {
        self.state().subtitle_track = Some(index);
    }

    fn select_audio_track(&mut self, index: usize) {
        self.state().audio_track = Some(index);
    }

    fn poll_events(&mut self) -> Vec<SinkEvent> {
        self.state().pending.drain(..).collect()
    }
}

#[derive(Debug, Default)]
pub struct BackendState {
    pub sessions_created: usize,
    pub loads: Vec<String>,
    pub start_loads: usize,
    pub media_recoveries: usize,
    pub destroyed: usize,
    pub pending: VecDeque<SegmentedEvent>,
}

#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<BackendState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap()
    }

    pub fn push(&self, event: SegmentedEvent) {
        self.state().pending.push_back(event);
    }

    pub fn boxed(&self) -> Box<dyn SegmentedBackend> {
        Box::new(self.clone())
    }
}

impl SegmentedBackend for MockBackend {
    fn create_session(&self) -> Box<dyn SegmentedSession> {
        self.state().sessions_created += 1;
        Box::new(MockSession {
            state: Arc::clone(&self.state),
            destroyed: false,
        })
    }
}

struct MockSession {
    state: Arc<Mutex<BackendState>>,
    destroyed: bool,
}

impl SegmentedSession for MockSession {
    fn load(&mut self, url: &str) {
        self.state.lock().unwrap().loads.push(url.to_string());
    }

    fn start_load(&mut self) {
        self.state.lock().unwrap().start_loads += 1;
    }

    fn recover_media_error(&mut self) {
        self.state.lock().unwrap().media_recoveries += 1;
    }

    fn destroy(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            self.state.lock().unwrap().destroyed += 1;
        }
    }

    fn poll_events(&mut self) -> Vec<SegmentedEvent> {
        if self.destroyed {
            return Vec::new();
        }
        self.state.lock().unwrap().pending.drain(..).collect()
    }
}

/// Stream source answering `http://mock/<tag>/<id>.<ext>`
#[derive(Default)]
pub struct MockStreams {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    pub requests: Mutex<Vec<ResolveRequest>>,
}

impl MockStreams {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl StreamSource for MockStreams {
    fn resolve_stream_url(&self, request: &ResolveRequest) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProviderError::Status(404));
        }
        let ext = request
            .container_hint
            .as_deref()
            .unwrap_or(&request.default_extension);
        Ok(format!(
            "http://mock/{}/{}.{}",
            request.tag, request.content_id, ext
        ))
    }
}

#[derive(Default)]
pub struct MockSchedule {
    pub short_calls: AtomicUsize,
    pub full_calls: AtomicUsize,
    pub short: Mutex<Vec<ProgramEntry>>,
    pub full: Mutex<Vec<ProgramEntry>>,
}

impl MockSchedule {
    pub fn with_short(entries: Vec<ProgramEntry>) -> Arc<Self> {
        let schedule = Self::default();
        *schedule.short.lock().unwrap() = entries;
        Arc::new(schedule)
    }

    pub fn with_full(entries: Vec<ProgramEntry>) -> Arc<Self> {
        let schedule = Self::default();
        *schedule.full.lock().unwrap() = entries;
        Arc::new(schedule)
    }

    pub fn short_calls(&self) -> usize {
        self.short_calls.load(Ordering::SeqCst)
    }

    pub fn full_calls(&self) -> usize {
        self.full_calls.load(Ordering::SeqCst)
    }
}

impl ScheduleSource for MockSchedule {
    fn fetch_current_and_next(
        &self,
        _profile_id: &str,
        _channel: &ChannelKey,
    ) -> Result<Vec<ProgramEntry>, ProviderError> {
        self.short_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.short.lock().unwrap().clone())
    }

    fn fetch_full_schedule(
        &self,
        _profile_id: &str,
        _channel: &ChannelKey,
    ) -> Result<Vec<ProgramEntry>, ProviderError> {
        self.full_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.full.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct MockEpisodes {
    pub calls: AtomicUsize,
    pub episodes: Mutex<Vec<EpisodeEntry>>,
}

impl MockEpisodes {
    pub fn with(episodes: Vec<EpisodeEntry>) -> Arc<Self> {
        let source = Self::default();
        *source.episodes.lock().unwrap() = episodes;
        Arc::new(source)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EpisodeListSource for MockEpisodes {
    fn fetch_series_episodes(
        &self,
        _profile_id: &str,
        _series_id: i64,
    ) -> Result<Vec<EpisodeEntry>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.episodes.lock().unwrap().clone())
    }
}

/// Program running from `start` for `length` seconds
pub fn program(title: &str, start: i64, length: i64) -> ProgramEntry {
    ProgramEntry {
        title: title.to_string(),
        description: None,
        start_epoch: start,
        stop_epoch: start + length,
        category: None,
    }
}
