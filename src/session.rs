//! Playback session controller
//!
//! Composition root for one playback surface. Driven from a single thread:
//! commands come in from the host, `poll` drains worker results and sink
//! events, and `snapshot` exposes the observable state.

use crate::config::PlayerConfig;
use crate::engine::segmented::SegmentedBackend;
use crate::engine::sink::{PlayRejected, PlaybackSink};
use crate::engine::{DeliveryMode, EngineOutput, EngineState, PlaybackEngine, ResolvedStream};
use crate::epg::{Correlation, FetchKind, Lookup, ProgramCorrelator};
use crate::error::{PlaybackFault, ProviderError, SessionError};
use crate::identity::{identify, Identification};
use crate::models::{
    ContentIdentity, ContentReference, EpisodeEntry, EpisodePayload, ProgramEntry,
};
use crate::provider::{ChannelKey, EpisodeListSource, PositionStorage, ScheduleSource, StreamSource};
use crate::resolver::{Completion, ResolveOutcome, ResolveTicket, StreamResolver};
use crate::resume::{MemoryStorage, ResumeTracker};
use crate::telemetry::{NowPlaying, Telemetry, TelemetryEffect, TransportStatus};
use crate::transition::{TransitionEvent, TransitionMachine, TransitionState};
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Background task messages
enum TaskResult {
    StreamResolved {
        ticket: ResolveTicket,
        result: Result<String, ProviderError>,
    },
    ScheduleLoaded {
        channel: ContentIdentity,
        key: ChannelKey,
        kind: FetchKind,
        result: Result<Vec<ProgramEntry>, ProviderError>,
    },
    EpisodesLoaded {
        series_id: i64,
        result: Result<Vec<EpisodeEntry>, ProviderError>,
    },
}

/// The one banner shown over the player
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Banner {
    None,
    StreamUnavailable(String),
    /// Codec/container problem; supersedes "stream unavailable"
    Compatibility(String),
}

/// One-shot notifications for the host
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    ResumePrompt { position: f64 },
    StreamUnavailable(String),
    CompatibilityWarning(String),
    AutoplayBlocked,
    CountdownStarted { seconds: u64 },
    NextEpisode { title: String },
    NowPlaying(NowPlaying),
    PositionSaved { position: f64 },
    PlaybackEnded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSnapshot {
    pub identity: Option<ContentIdentity>,
    pub delivery_mode: Option<DeliveryMode>,
    pub engine_state: EngineState,
    pub buffering: bool,
    pub codec_warning: bool,
    pub banner: Banner,
    pub autoplay_blocked: bool,
    pub current_program: Option<ProgramEntry>,
    pub next_program: Option<ProgramEntry>,
    /// Offered resume position while the prompt is visible
    pub resume_prompt: Option<f64>,
    pub transition: TransitionState,
    /// Seconds left while the next-episode countdown is visible
    pub countdown: Option<u64>,
    pub transport: TransportStatus,
}

pub struct PlaybackControllerBuilder {
    profile_id: String,
    config: PlayerConfig,
    streams: Option<Arc<dyn StreamSource>>,
    schedule: Option<Arc<dyn ScheduleSource>>,
    episodes: Option<Arc<dyn EpisodeListSource>>,
    storage: Option<Box<dyn PositionStorage>>,
    sink: Option<Box<dyn PlaybackSink>>,
    backend: Option<Box<dyn SegmentedBackend>>,
}

impl PlaybackControllerBuilder {
    pub fn config(mut self, config: PlayerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn stream_source<S: StreamSource + 'static>(mut self, source: Arc<S>) -> Self {
        let source: Arc<dyn StreamSource> = source;
        self.streams = Some(source);
        self
    }

    pub fn schedule_source<S: ScheduleSource + 'static>(mut self, source: Arc<S>) -> Self {
        let source: Arc<dyn ScheduleSource> = source;
        self.schedule = Some(source);
        self
    }

    pub fn episode_source<S: EpisodeListSource + 'static>(mut self, source: Arc<S>) -> Self {
        let source: Arc<dyn EpisodeListSource> = source;
        self.episodes = Some(source);
        self
    }

    pub fn storage<S: PositionStorage + 'static>(mut self, storage: S) -> Self {
        self.storage = Some(Box::new(storage));
        self
    }

    pub fn sink<S: PlaybackSink + 'static>(mut self, sink: S) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    pub fn segmented_backend<B: SegmentedBackend + 'static>(mut self, backend: B) -> Self {
        self.backend = Some(Box::new(backend));
        self
    }

    pub fn build(self) -> Result<PlaybackController, SessionError> {
        self.config.validate()?;
        let streams = self
            .streams
            .ok_or(SessionError::MissingCollaborator("stream source"))?;
        let sink = self
            .sink
            .ok_or(SessionError::MissingCollaborator("playback sink"))?;
        let storage = self.storage.unwrap_or_else(|| {
            info!("[RESUME] No storage configured, positions kept in memory");
            Box::new(MemoryStorage::new())
        });

        let config = self.config;
        let engine = PlaybackEngine::new(
            sink,
            self.backend,
            config.autoplay,
            config.recovery_attempt_limit,
        );
        let resume = ResumeTracker::new(
            &self.profile_id,
            storage,
            config.resume_threshold_secs,
            config.position_save_interval(),
        );
        let correlator = ProgramCorrelator::new(
            Duration::from_secs(config.epg_refresh_interval_secs),
            config.epg_offset_secs(),
        );
        let transition = TransitionMachine::new(
            config.next_episode_threshold_secs,
            Duration::from_secs(config.next_episode_countdown_secs),
        );
        let (task_sender, task_receiver) = channel();

        Ok(PlaybackController {
            resolver: StreamResolver::new(&self.profile_id),
            profile_id: self.profile_id,
            config,
            streams,
            schedule: self.schedule,
            episodes: self.episodes,
            engine,
            resume,
            correlator,
            transition,
            telemetry: Telemetry::new(),
            reference: None,
            identity: None,
            banner: Banner::None,
            programs: Correlation::default(),
            last_epg_check: None,
            notices: Vec::new(),
            task_sender,
            task_receiver,
            arrived: VecDeque::new(),
            pending_tasks: 0,
            series_lookups: HashSet::new(),
            series_cache: HashMap::new(),
        })
    }
}

pub struct PlaybackController {
    profile_id: String,
    config: PlayerConfig,
    streams: Arc<dyn StreamSource>,
    schedule: Option<Arc<dyn ScheduleSource>>,
    episodes: Option<Arc<dyn EpisodeListSource>>,
    engine: PlaybackEngine,
    resolver: StreamResolver,
    resume: ResumeTracker,
    correlator: ProgramCorrelator,
    transition: TransitionMachine,
    telemetry: Telemetry,
    reference: Option<ContentReference>,
    identity: Option<ContentIdentity>,
    banner: Banner,
    /// Programs currently displayed for a live channel
    programs: Correlation,
    last_epg_check: Option<Instant>,
    notices: Vec<SessionNotice>,
    task_sender: Sender<TaskResult>,
    task_receiver: Receiver<TaskResult>,
    /// Results received by `wait_for_tasks`, applied on the next poll
    arrived: VecDeque<TaskResult>,
    pending_tasks: usize,
    series_lookups: HashSet<i64>,
    series_cache: HashMap<i64, Vec<EpisodeEntry>>,
}

impl PlaybackController {
    pub fn builder(profile_id: &str) -> PlaybackControllerBuilder {
        PlaybackControllerBuilder {
            profile_id: profile_id.to_string(),
            config: PlayerConfig::default(),
            streams: None,
            schedule: None,
            episodes: None,
            storage: None,
            sink: None,
            backend: None,
        }
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn reference(&self) -> Option<&ContentReference> {
        self.reference.as_ref()
    }

    // ---- Selection ----

    pub fn select_content(&mut self, reference: ContentReference) {
        self.select_at(reference, Instant::now(), Utc::now().timestamp());
    }

    fn select_at(&mut self, reference: ContentReference, now: Instant, epoch: i64) {
        let identity = match identify(Some(&reference)) {
            Identification::Resolved(identity) => identity,
            Identification::Unresolvable => {
                self.deselect();
                return;
            }
        };

        if self.identity.as_ref() == Some(&identity) {
            // Same resumable unit: keep the session, retry a failed resolution
            let previous = self.reference.replace(reference.clone());
            let previous_episode = previous.as_ref().and_then(|r| r.as_episode());
            let new_episode = match (previous_episode, reference.as_episode()) {
                (Some(old), Some(new)) => old.position() != new.position(),
                _ => false,
            };
            if new_episode {
                // Series-keyed episodes share an identity but still roll over
                if let Some(episode) = reference.as_episode() {
                    self.load_transition(episode);
                }
                self.start_resolution();
                self.notices.push(SessionNotice::NowPlaying(NowPlaying::for_reference(
                    &reference, None,
                )));
            } else if matches!(self.banner, Banner::StreamUnavailable(_)) {
                self.banner = Banner::None;
                self.start_resolution();
            }
            return;
        }

        info!(identity = %identity, name = %reference.display_name(), "[PLAY] Selected");
        self.end_current(now);
        self.identity = Some(identity.clone());
        self.reference = Some(reference.clone());

        if let Some(position) = self.resume.begin(&identity) {
            self.notices.push(SessionNotice::ResumePrompt { position });
        }

        match reference.as_episode() {
            Some(episode) => self.load_transition(episode),
            None => self.transition.reset(),
        }

        self.start_resolution();

        if identity.kind.is_live() {
            self.refresh_programs(now, epoch);
        }
        self.notices.push(SessionNotice::NowPlaying(NowPlaying::for_reference(
            &reference,
            self.programs.current.clone(),
        )));
    }

    /// Clear the selection and stop playback
    pub fn deselect(&mut self) {
        if self.identity.is_none() {
            return;
        }
        info!("[PLAY] Deselected");
        self.end_current(Instant::now());
        self.resolver.clear();
        self.identity = None;
        self.reference = None;
    }

    fn end_current(&mut self, now: Instant) {
        if self.resume.flush(now) {
            self.notice_position();
        }
        self.resume.end_session();
        self.transition.reset();
        self.engine.detach();
        self.resolver.cancel_in_flight();
        self.telemetry.reset();
        self.banner = Banner::None;
        self.programs = Correlation::default();
        self.last_epg_check = None;
    }

    fn start_resolution(&mut self) {
        let (Some(identity), Some(reference)) = (self.identity.clone(), self.reference.as_ref())
        else {
            return;
        };
        let caps = self.engine.capabilities();

        match self.resolver.resolve(&identity, reference, caps) {
            ResolveOutcome::Ready(stream) => self.attach(&stream),
            ResolveOutcome::Unchanged => {
                if let Some(stream) = self.resolver.resolved_for(&identity).cloned() {
                    self.attach(&stream);
                }
            }
            ResolveOutcome::Dispatch { request, ticket } => {
                let source = Arc::clone(&self.streams);
                let sender = self.task_sender.clone();
                self.pending_tasks += 1;
                thread::spawn(move || {
                    let result = source.resolve_stream_url(&request);
                    let _ = sender.send(TaskResult::StreamResolved { ticket, result });
                });
            }
            ResolveOutcome::InFlight => {}
        }
    }

    fn attach(&mut self, stream: &ResolvedStream) {
        let live = self.identity.as_ref().is_some_and(|id| id.kind.is_live());
        self.engine.attach(stream, live);
    }

    // ---- Resume ----

    pub fn confirm_resume(&mut self) {
        if self.resume.confirm_resume().is_none() {
            return;
        }
        if self.engine.metadata_loaded() {
            self.apply_pending_seek();
        }
    }

    pub fn restart_from_beginning(&mut self) {
        self.resume.restart();
    }

    fn apply_pending_seek(&mut self) {
        if let Some(position) = self.resume.take_pending_seek() {
            info!(position, "[RESUME] Seeking to saved position");
            self.engine.seek(position);
            self.telemetry.set_position(position);
        }
    }

    // ---- Next episode ----

    pub fn confirm_next_episode(&mut self) {
        if let Some(event) = self.transition.confirm() {
            self.handle_transition_event(event, Instant::now(), Utc::now().timestamp());
        }
    }

    pub fn cancel_next_episode(&mut self) {
        self.transition.cancel();
    }

    fn load_transition(&mut self, episode: &EpisodePayload) {
        let successor = episode.next_episode.as_deref().cloned();
        let known = successor.is_some();
        self.transition.load_episode(successor);
        if !known {
            self.request_successor(episode);
        }
    }

    fn request_successor(&mut self, episode: &EpisodePayload) {
        let Some(source) = self.episodes.clone() else {
            return;
        };
        let series_id = episode.series_id;

        if let Some(list) = self.series_cache.get(&series_id) {
            if let Some(next) = find_successor(list, episode) {
                self.transition.arm(next);
            }
            return;
        }
        if !self.series_lookups.insert(series_id) {
            return;
        }

        debug!(series_id, "[NEXT] Looking up series episodes");
        let profile_id = self.profile_id.clone();
        let sender = self.task_sender.clone();
        self.pending_tasks += 1;
        thread::spawn(move || {
            let result = source.fetch_series_episodes(&profile_id, series_id);
            let _ = sender.send(TaskResult::EpisodesLoaded { series_id, result });
        });
    }

    fn handle_transition_event(&mut self, event: TransitionEvent, now: Instant, epoch: i64) {
        match event {
            TransitionEvent::CountdownStarted { seconds } => {
                self.notices.push(SessionNotice::CountdownStarted { seconds });
            }
            TransitionEvent::Commit(next) => {
                let reference = ContentReference::episode(next);
                self.notices.push(SessionNotice::NextEpisode {
                    title: reference.display_name(),
                });
                self.select_at(reference, now, epoch);
            }
        }
    }

    // ---- Program guide ----

    fn channel_key(&self) -> Option<(ContentIdentity, ChannelKey)> {
        let identity = self.identity.as_ref()?;
        let reference = self.reference.as_ref()?;
        Some((
            identity.clone(),
            ChannelKey {
                channel_id: identity.id.clone(),
                epg_channel_id: reference.epg_channel_id().map(str::to_string),
            },
        ))
    }

    fn refresh_programs(&mut self, now: Instant, epoch: i64) {
        if self.schedule.is_none() {
            return;
        }
        let Some((identity, key)) = self.channel_key() else {
            return;
        };
        self.last_epg_check = Some(now);

        match self.correlator.current_and_next(&identity, now, epoch) {
            Lookup::Cached(correlation) => self.show_programs(correlation),
            Lookup::FetchNeeded(kind) => self.spawn_schedule_fetch(identity, key, kind),
            Lookup::Pending => {}
        }
    }

    fn spawn_schedule_fetch(&mut self, channel: ContentIdentity, key: ChannelKey, kind: FetchKind) {
        let Some(source) = self.schedule.clone() else {
            return;
        };
        let profile_id = self.profile_id.clone();
        let sender = self.task_sender.clone();
        self.pending_tasks += 1;
        thread::spawn(move || {
            let result = match kind {
                FetchKind::CurrentAndNext => source.fetch_current_and_next(&profile_id, &key),
                FetchKind::FullSchedule => source.fetch_full_schedule(&profile_id, &key),
            };
            let _ = sender.send(TaskResult::ScheduleLoaded {
                channel,
                key,
                kind,
                result,
            });
        });
    }

    fn show_programs(&mut self, correlation: Correlation) {
        let changed = correlation.current != self.programs.current;
        self.programs = correlation;
        if changed {
            if let Some(reference) = &self.reference {
                if let Some(current) = &self.programs.current {
                    info!(title = %current.title, "[EPG] Now airing");
                }
                self.notices.push(SessionNotice::NowPlaying(NowPlaying::for_reference(
                    reference,
                    self.programs.current.clone(),
                )));
            }
        }
    }

    fn programs_due(&self, now: Instant, epoch: i64) -> bool {
        let Some(identity) = &self.identity else {
            return false;
        };
        if !identity.kind.is_live() || self.schedule.is_none() {
            return false;
        }
        let cadence = match self.last_epg_check {
            Some(last) => now.saturating_duration_since(last) >= self.correlator.refresh_interval(),
            None => true,
        };
        let ended = self
            .programs
            .current
            .as_ref()
            .is_some_and(|p| p.stop_epoch <= self.correlator.guide_time(epoch));
        cadence || ended
    }

    // ---- Event loop ----

    pub fn poll(&mut self) {
        self.poll_at(Instant::now(), Utc::now().timestamp());
    }

    /// Drain worker results and sink events, then drive timers
    pub fn poll_at(&mut self, now: Instant, epoch: i64) {
        let mut tasks: Vec<TaskResult> = self.arrived.drain(..).collect();
        while let Ok(task) = self.task_receiver.try_recv() {
            self.pending_tasks = self.pending_tasks.saturating_sub(1);
            tasks.push(task);
        }
        for task in tasks {
            self.handle_task(task, now, epoch);
        }

        for output in self.engine.poll() {
            self.handle_engine_output(output, now, epoch);
        }

        if let Some(event) = self.transition.tick(now) {
            self.handle_transition_event(event, now, epoch);
        }

        if self.programs_due(now, epoch) {
            self.refresh_programs(now, epoch);
        }
    }

    /// Block until outstanding worker results arrive or `timeout` passes
    ///
    /// Results are applied on the next poll. Returns false on timeout.
    pub fn wait_for_tasks(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.pending_tasks > 0 {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.task_receiver.recv_timeout(left) {
                Ok(task) => {
                    self.pending_tasks -= 1;
                    self.arrived.push_back(task);
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return false;
                }
            }
        }
        true
    }

    pub fn has_pending_tasks(&self) -> bool {
        self.pending_tasks > 0 || !self.arrived.is_empty()
    }

    fn handle_task(&mut self, task: TaskResult, now: Instant, epoch: i64) {
        match task {
            TaskResult::StreamResolved { ticket, result } => {
                let caps = self.engine.capabilities();
                match self.resolver.complete(ticket, result, caps) {
                    Completion::Applied(stream) => self.attach(&stream),
                    Completion::Unavailable(reason) => {
                        self.surface(PlaybackFault::Resolution(reason));
                    }
                    Completion::Stale => {}
                }
            }
            TaskResult::ScheduleLoaded {
                channel,
                key,
                kind,
                result,
            } => {
                match self.correlator.complete_fetch(&channel, kind, result, now, epoch) {
                    Some(follow_up) => self.spawn_schedule_fetch(channel, key, follow_up),
                    None if self.identity.as_ref() == Some(&channel) => {
                        self.refresh_programs(now, epoch);
                    }
                    // Cached for when the user tunes back
                    None => {}
                }
            }
            TaskResult::EpisodesLoaded { series_id, result } => {
                self.series_lookups.remove(&series_id);
                match result {
                    Ok(list) => {
                        debug!(series_id, episodes = list.len(), "[NEXT] Series episodes loaded");
                        self.series_cache.insert(series_id, list);
                        let current = self
                            .reference
                            .as_ref()
                            .and_then(|r| r.as_episode())
                            .filter(|e| e.series_id == series_id)
                            .cloned();
                        if let (Some(episode), TransitionState::Idle) =
                            (current, self.transition.state())
                        {
                            if let Some(list) = self.series_cache.get(&series_id) {
                                if let Some(next) = find_successor(list, &episode) {
                                    self.transition.arm(next);
                                }
                            }
                        }
                    }
                    Err(e) => warn!(series_id, error = %e, "[NEXT] Series lookup failed"),
                }
            }
        }
    }

    fn handle_engine_output(&mut self, output: EngineOutput, now: Instant, epoch: i64) {
        match output {
            EngineOutput::Ready => {
                if matches!(self.banner, Banner::Compatibility(_)) {
                    self.banner = Banner::None;
                }
            }
            EngineOutput::MetadataLoaded { duration } => {
                self.telemetry.metadata_loaded(duration);
                self.apply_pending_seek();
            }
            EngineOutput::Fault(fault) => self.surface(fault),
            EngineOutput::Sink(event) => {
                self.telemetry.set_buffering(self.engine.is_buffering());
                for effect in self.telemetry.observe(&event) {
                    self.apply_effect(effect, now, epoch);
                }
            }
        }
    }

    fn apply_effect(&mut self, effect: TelemetryEffect, now: Instant, epoch: i64) {
        match effect {
            TelemetryEffect::RecordPosition { current, duration } => {
                if self.resume.update_playback_position(current, duration, now) {
                    self.notice_position();
                }
            }
            TelemetryEffect::FlushPosition => {
                if self.resume.flush(now) {
                    self.notice_position();
                }
            }
            TelemetryEffect::TransitionTime { current, duration } => {
                if let Some(event) = self.transition.on_time_update(current, duration, now) {
                    self.handle_transition_event(event, now, epoch);
                }
            }
            TelemetryEffect::PauseChanged(paused) => self.transition.set_paused(paused, now),
            TelemetryEffect::Ended => {
                self.notices.push(SessionNotice::PlaybackEnded);
                self.resume.mark_finished();
                if let Some(event) = self.transition.on_ended(now) {
                    self.handle_transition_event(event, now, epoch);
                }
            }
        }
    }

    fn notice_position(&mut self) {
        self.notices.push(SessionNotice::PositionSaved {
            position: self.telemetry.status().position,
        });
    }

    /// Route a fault to the banner and the notices
    fn surface(&mut self, fault: PlaybackFault) {
        match fault {
            PlaybackFault::Resolution(reason) => {
                warn!(reason = %reason, "[PLAY] Stream unavailable");
                if !matches!(self.banner, Banner::Compatibility(_)) {
                    self.banner = Banner::StreamUnavailable(reason.clone());
                }
                self.notices.push(SessionNotice::StreamUnavailable(reason));
            }
            PlaybackFault::Media(details) => {
                self.banner = Banner::Compatibility(details.clone());
                self.notices.push(SessionNotice::CompatibilityWarning(details));
            }
            PlaybackFault::Transport { attempt, details } => {
                debug!(attempt, details = %details, "[PLAY] Transport fault absorbed");
            }
            PlaybackFault::AutoplayRejected => {
                self.notices.push(SessionNotice::AutoplayBlocked);
            }
        }
    }

    // ---- Transport commands ----

    pub fn play(&mut self) -> Result<(), PlayRejected> {
        self.engine.play()
    }

    pub fn pause(&mut self) {
        let now = Instant::now();
        self.engine.pause();
        self.transition.set_paused(true, now);
        if self.resume.flush(now) {
            self.notice_position();
        }
    }

    pub fn toggle_pause(&mut self) {
        if self.telemetry.status().paused {
            if self.play().is_err() {
                self.notices.push(SessionNotice::AutoplayBlocked);
            }
        } else {
            self.pause();
        }
    }

    pub fn seek(&mut self, position_secs: f64) {
        let position = position_secs.max(0.0);
        self.engine.seek(position);
        self.telemetry.set_position(position);
    }

    pub fn set_volume(&mut self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        let muted = self.telemetry.status().muted;
        self.engine.set_volume(volume);
        self.telemetry.set_volume(volume, muted);
    }

    pub fn toggle_mute(&mut self) {
        let status = self.telemetry.status();
        let (volume, muted) = (status.volume, !status.muted);
        self.engine.set_muted(muted);
        self.telemetry.set_volume(volume, muted);
    }

    pub fn toggle_fullscreen(&mut self) {
        let fullscreen = !self.telemetry.status().fullscreen;
        self.engine.set_fullscreen(fullscreen);
        self.telemetry.set_fullscreen(fullscreen);
    }

    pub fn toggle_picture_in_picture(&mut self) {
        let enabled = !self.telemetry.status().picture_in_picture;
        self.engine.set_picture_in_picture(enabled);
        self.telemetry.set_picture_in_picture(enabled);
    }

    pub fn select_subtitle_track(&mut self, index: Option<usize>) {
        self.engine.select_subtitle_track(index);
        self.telemetry.set_subtitle_track(index);
    }

    pub fn select_audio_track(&mut self, index: usize) {
        self.engine.select_audio_track(index);
        self.telemetry.set_audio_track(index);
    }

    // ---- Observation ----

    pub fn drain_notices(&mut self) -> Vec<SessionNotice> {
        std::mem::take(&mut self.notices)
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.snapshot_at(Instant::now())
    }

    pub fn snapshot_at(&self, now: Instant) -> PlaybackSnapshot {
        PlaybackSnapshot {
            identity: self.identity.clone(),
            delivery_mode: self.engine.delivery_mode(),
            engine_state: self.engine.state(),
            buffering: self.engine.is_buffering(),
            codec_warning: self.engine.codec_warning(),
            banner: self.banner.clone(),
            autoplay_blocked: self.engine.autoplay_blocked(),
            current_program: self.programs.current.clone(),
            next_program: self.programs.next.clone(),
            resume_prompt: self.resume.prompt_position(),
            transition: self.transition.state(),
            countdown: self.transition.countdown_remaining(now),
            transport: self.telemetry.status().clone(),
        }
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        debug!("[PLAY] Controller dropped, flushing position");
        self.resume.end_session();
        self.engine.detach();
    }
}

/// The episode after `current` by (season, episode)
fn find_successor(list: &[EpisodeEntry], current: &EpisodePayload) -> Option<EpisodePayload> {
    let position = current.position();
    list.iter()
        .filter(|e| (e.season, e.episode_num) > position)
        .min_by_key(|e| (e.season, e.episode_num))
        .map(|e| EpisodePayload {
            episode_id: Some(e.id),
            series_id: current.series_id,
            season: e.season,
            episode_num: e.episode_num,
            title: e.title.clone(),
            container_extension: Some(e.container_extension.clone()).filter(|c| !c.is_empty()),
            next_episode: None,
        })
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
