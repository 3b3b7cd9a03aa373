//! Protocol selection and the adaptive playback engine
//!
//! The engine owns the sink and, for segmented streams, one backend session.
//! Everything else in the controller goes through the engine to touch either.

pub mod segmented;
pub mod sink;

use crate::error::{PlaybackFault, SinkError};
use crate::models::ContentKind;
use segmented::{FaultKind, SegmentedBackend, SegmentedEvent, SegmentedSession};
use sink::{PlaybackSink, SinkEvent};
use tracing::{debug, info, warn};

/// How a resolved stream is fed to the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Through a segmented backend session
    AdaptiveSegmented,
    /// Manifest handed straight to a sink that understands it
    NativeSegmented,
    DirectProgressive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStream {
    pub url: String,
    pub delivery_mode: DeliveryMode,
}

/// What the current engine can play
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub segmented_backend: bool,
    pub native_segmented: bool,
}

/// URL shape, ignoring the content kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamShape {
    Manifest,
    TransportStream,
    Progressive,
}

pub fn stream_shape(url: &str) -> StreamShape {
    let lower = url.to_lowercase();
    let (path, query) = match lower.split_once('?') {
        Some((p, q)) => (p, q),
        None => (lower.as_str(), ""),
    };
    let path = path.split('#').next().unwrap_or(path);

    if path.ends_with(".m3u8")
        || path.ends_with(".m3u")
        || path.contains("/playlist")
        || path.contains("manifest")
        || path.contains("/hls/")
    {
        return StreamShape::Manifest;
    }
    if query.contains("manifest") || query.contains("hls") {
        return StreamShape::Manifest;
    }
    if path.ends_with(".ts") {
        return StreamShape::TransportStream;
    }
    StreamShape::Progressive
}

/// Pick the delivery mode for a URL
///
/// Live content is segmented whatever the URL looks like; providers often
/// serve live streams from extensionless paths.
pub fn classify(url: &str, kind: ContentKind, caps: Capabilities) -> DeliveryMode {
    let segmented = kind.is_live() || stream_shape(url) != StreamShape::Progressive;
    if !segmented {
        return DeliveryMode::DirectProgressive;
    }
    if caps.segmented_backend {
        DeliveryMode::AdaptiveSegmented
    } else if caps.native_segmented {
        DeliveryMode::NativeSegmented
    } else {
        DeliveryMode::DirectProgressive
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryKind {
    Network,
    Media,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Attaching,
    /// `warning` is set while autoplay is blocked
    Ready { warning: bool },
    Recovering(RecoveryKind),
    Failed,
}

/// What the controller needs to hear about after a poll
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutput {
    Ready,
    MetadataLoaded { duration: Option<f64> },
    Fault(PlaybackFault),
    /// Transport event passed through for telemetry
    Sink(SinkEvent),
}

pub struct PlaybackEngine {
    sink: Box<dyn PlaybackSink>,
    backend: Option<Box<dyn SegmentedBackend>>,
    session: Option<Box<dyn SegmentedSession>>,
    state: EngineState,
    attached: Option<ResolvedStream>,
    live: bool,
    /// URL currently loaded into the sink
    sink_source: Option<String>,
    autoplay: bool,
    autoplay_attempted: bool,
    wants_playing: bool,
    autoplay_blocked: bool,
    codec_warning: bool,
    buffering: bool,
    metadata_loaded: bool,
    last_position: f64,
    consecutive_faults: u32,
    recovery_limit: u32,
}

impl PlaybackEngine {
    pub fn new(
        sink: Box<dyn PlaybackSink>,
        backend: Option<Box<dyn SegmentedBackend>>,
        autoplay: bool,
        recovery_limit: u32,
    ) -> Self {
        Self {
            sink,
            backend,
            session: None,
            state: EngineState::Idle,
            attached: None,
            live: false,
            sink_source: None,
            autoplay,
            autoplay_attempted: false,
            wants_playing: false,
            autoplay_blocked: false,
            codec_warning: false,
            buffering: false,
            metadata_loaded: false,
            last_position: 0.0,
            consecutive_faults: 0,
            recovery_limit,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            segmented_backend: self.backend.is_some(),
            native_segmented: self.sink.supports_native_segmented(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn delivery_mode(&self) -> Option<DeliveryMode> {
        self.attached.as_ref().map(|s| s.delivery_mode)
    }

    pub fn attached_url(&self) -> Option<&str> {
        self.attached.as_ref().map(|s| s.url.as_str())
    }

    pub fn is_buffering(&self) -> bool {
        self.buffering
    }

    pub fn codec_warning(&self) -> bool {
        self.codec_warning
    }

    pub fn autoplay_blocked(&self) -> bool {
        self.autoplay_blocked
    }

    pub fn metadata_loaded(&self) -> bool {
        self.metadata_loaded
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn set_autoplay(&mut self, autoplay: bool) {
        self.autoplay = autoplay;
    }

    /// Attach a resolved stream; returns false when nothing changed
    pub fn attach(&mut self, stream: &ResolvedStream, live: bool) -> bool {
        if self.attached.as_ref().map(|s| s.url.as_str()) == Some(stream.url.as_str()) {
            debug!(url = %stream.url, "[PLAY] Same URL, keeping current attach");
            return false;
        }

        self.teardown_session();
        self.reset_stream_state();
        self.attached = Some(stream.clone());
        self.live = live;
        self.state = EngineState::Attaching;

        info!(url = %stream.url, mode = ?stream.delivery_mode, live, "[PLAY] Attaching");

        match stream.delivery_mode {
            DeliveryMode::AdaptiveSegmented => match &self.backend {
                Some(backend) => {
                    let mut session = backend.create_session();
                    session.load(&stream.url);
                    self.session = Some(session);
                }
                None => {
                    // Classified without a backend; play what we can
                    warn!("[PLAY] No segmented backend, loading directly");
                    self.load_sink(&stream.url);
                }
            },
            DeliveryMode::NativeSegmented | DeliveryMode::DirectProgressive => {
                self.load_sink(&stream.url);
            }
        }
        true
    }

    /// Drop the current stream and clear the sink
    pub fn detach(&mut self) {
        if self.attached.is_none() && self.session.is_none() {
            return;
        }
        debug!("[PLAY] Detaching");
        self.teardown_session();
        self.sink.clear_source();
        self.reset_stream_state();
        self.attached = None;
        self.state = EngineState::Idle;
    }

    fn reset_stream_state(&mut self) {
        self.sink_source = None;
        self.autoplay_attempted = false;
        self.wants_playing = false;
        self.autoplay_blocked = false;
        self.codec_warning = false;
        self.buffering = false;
        self.metadata_loaded = false;
        self.last_position = 0.0;
        self.consecutive_faults = 0;
    }

    fn teardown_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            debug!("[PLAY] Destroying segmented session");
            session.destroy();
        }
    }

    fn load_sink(&mut self, url: &str) {
        self.sink.load_source(url);
        self.sink_source = Some(url.to_string());
    }

    /// Drain backend and sink events
    pub fn poll(&mut self) -> Vec<EngineOutput> {
        let mut out = Vec::new();

        let backend_events = match self.session.as_mut() {
            Some(session) => session.poll_events(),
            None => Vec::new(),
        };
        for event in backend_events {
            self.handle_segmented_event(event, &mut out);
        }

        for event in self.sink.poll_events() {
            self.handle_sink_event(event, &mut out);
        }
        out
    }

    fn handle_segmented_event(&mut self, event: SegmentedEvent, out: &mut Vec<EngineOutput>) {
        // Anything queued before a fatal teardown is moot
        if self.session.is_none() {
            return;
        }
        match event {
            SegmentedEvent::ManifestParsed { media_url, variants } => {
                debug!(url = %media_url, variants, "[HLS] Manifest parsed");
                let reload = matches!(self.state, EngineState::Recovering(_))
                    || self.sink_source.as_deref() != Some(media_url.as_str());
                if reload {
                    self.load_sink(&media_url);
                }
                if matches!(self.state, EngineState::Attaching | EngineState::Recovering(_)) {
                    self.enter_ready(out);
                }
            }
            SegmentedEvent::Recovered => {
                if self.state == EngineState::Recovering(RecoveryKind::Media) {
                    if let Some(url) = self.sink_source.clone() {
                        self.load_sink(&url);
                        if !self.live && self.last_position > 0.0 {
                            self.sink.seek(self.last_position);
                        }
                    }
                    self.enter_ready(out);
                }
            }
            SegmentedEvent::Error { kind, fatal, details } => {
                if !fatal {
                    debug!(kind = ?kind, details = %details, "[HLS] Non-fatal error");
                    return;
                }
                match kind {
                    FaultKind::Network => self.recover(RecoveryKind::Network, details, out),
                    FaultKind::Media => self.recover(RecoveryKind::Media, details, out),
                    FaultKind::Other => self.fail(PlaybackFault::Media(details), out),
                }
            }
        }
    }

    fn handle_sink_event(&mut self, event: SinkEvent, out: &mut Vec<EngineOutput>) {
        if self.attached.is_none() {
            return;
        }
        match event {
            SinkEvent::MetadataLoaded { duration } => {
                self.metadata_loaded = true;
                if self.state == EngineState::Attaching && self.session.is_none() {
                    self.enter_ready(out);
                }
                out.push(EngineOutput::MetadataLoaded { duration });
            }
            SinkEvent::Waiting => {
                self.buffering = true;
                out.push(EngineOutput::Sink(event));
            }
            SinkEvent::CanPlay => {
                self.buffering = false;
                out.push(EngineOutput::Sink(event));
            }
            SinkEvent::Playing => {
                self.buffering = false;
                self.clear_autoplay_warning();
                out.push(EngineOutput::Sink(event));
            }
            SinkEvent::TimeUpdate { current, .. } => {
                self.last_position = current;
                out.push(EngineOutput::Sink(event));
            }
            SinkEvent::Error(err) => self.handle_sink_error(err, out),
            other => out.push(EngineOutput::Sink(other)),
        }
    }

    fn handle_sink_error(&mut self, err: SinkError, out: &mut Vec<EngineOutput>) {
        if self.state == EngineState::Failed {
            return;
        }
        warn!(error = %err, live = self.live, "[PLAY] Sink error");

        if self.session.is_some() {
            match err {
                SinkError::Network(details) => self.recover(RecoveryKind::Network, details, out),
                SinkError::Unsupported(details) => {
                    self.recover(RecoveryKind::Media, details, out)
                }
                SinkError::Other(details) => self.fail(PlaybackFault::Media(details), out),
            }
        } else if self.live {
            // Live streams drop all the time; reopen in place
            self.recover(RecoveryKind::Network, err.to_string(), out);
        } else {
            self.fail(PlaybackFault::Media(err.to_string()), out);
        }
    }

    fn recover(&mut self, kind: RecoveryKind, details: String, out: &mut Vec<EngineOutput>) {
        self.consecutive_faults += 1;
        if self.consecutive_faults > self.recovery_limit {
            warn!(
                attempts = self.consecutive_faults,
                "[PLAY] Recovery limit reached, giving up"
            );
            self.fail(
                PlaybackFault::Media(format!(
                    "Gave up after {} recovery attempts: {}",
                    self.recovery_limit, details
                )),
                out,
            );
            return;
        }

        info!(kind = ?kind, attempt = self.consecutive_faults, details = %details, "[PLAY] Recovering");
        self.state = EngineState::Recovering(kind);
        out.push(EngineOutput::Fault(PlaybackFault::Transport {
            attempt: self.consecutive_faults,
            details,
        }));

        match (self.session.as_mut(), kind) {
            (Some(session), RecoveryKind::Network) => session.start_load(),
            (Some(session), RecoveryKind::Media) => session.recover_media_error(),
            (None, _) => {
                // Direct live reload; ready again once metadata arrives
                if let Some(url) = self.sink_source.clone() {
                    self.load_sink(&url);
                }
                self.state = EngineState::Attaching;
            }
        }
    }

    fn fail(&mut self, fault: PlaybackFault, out: &mut Vec<EngineOutput>) {
        warn!(fault = %fault, "[PLAY] Playback failed");
        self.teardown_session();
        self.state = EngineState::Failed;
        self.codec_warning = true;
        self.buffering = false;
        out.push(EngineOutput::Fault(fault));
    }

    fn enter_ready(&mut self, out: &mut Vec<EngineOutput>) {
        self.state = EngineState::Ready { warning: false };
        self.codec_warning = false;
        self.consecutive_faults = 0;

        let should_play = if !self.autoplay_attempted {
            self.autoplay_attempted = true;
            self.autoplay
        } else {
            self.wants_playing
        };

        out.push(EngineOutput::Ready);

        if should_play {
            match self.sink.play() {
                Ok(()) => {
                    self.wants_playing = true;
                }
                Err(_) => {
                    info!("[PLAY] Autoplay rejected, waiting for play");
                    self.autoplay_blocked = true;
                    self.state = EngineState::Ready { warning: true };
                    out.push(EngineOutput::Fault(PlaybackFault::AutoplayRejected));
                }
            }
        }
    }

    fn clear_autoplay_warning(&mut self) {
        self.autoplay_blocked = false;
        if self.state == (EngineState::Ready { warning: true }) {
            self.state = EngineState::Ready { warning: false };
        }
    }

    pub fn play(&mut self) -> Result<(), sink::PlayRejected> {
        self.sink.play()?;
        self.wants_playing = true;
        self.clear_autoplay_warning();
        Ok(())
    }

    pub fn pause(&mut self) {
        self.wants_playing = false;
        self.sink.pause();
    }

    pub fn seek(&mut self, position_secs: f64) {
        let position = position_secs.max(0.0);
        self.last_position = position;
        self.sink.seek(position);
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.sink.set_volume(volume.clamp(0.0, 1.0));
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.sink.set_muted(muted);
    }

    pub fn set_fullscreen(&mut self, fullscreen: bool) {
        self.sink.set_fullscreen(fullscreen);
    }

    pub fn set_picture_in_picture(&mut self, enabled: bool) {
        self.sink.set_picture_in_picture(enabled);
    }

    pub fn select_subtitle_track(&mut self, index: Option<usize>) {
        self.sink.select_subtitle_track(index);
    }

    pub fn select_audio_track(&mut self, index: usize) {
        self.sink.select_audio_track(index);
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.teardown_session();
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
