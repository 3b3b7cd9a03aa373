//! Playback telemetry bridge
//!
//! Turns sink events into observable transport status and into the
//! side effects the controller applies to the resume store and the
//! transition machine.

use crate::engine::sink::SinkEvent;
use crate::models::{ContentKind, ContentReference, DisplayMetadata, ProgramEntry};

#[derive(Debug, Clone, PartialEq)]
pub struct TransportStatus {
    pub paused: bool,
    pub volume: f32,
    pub muted: bool,
    pub position: f64,
    pub duration: Option<f64>,
    pub buffering: bool,
    pub fullscreen: bool,
    pub picture_in_picture: bool,
    pub subtitle_track: Option<usize>,
    pub audio_track: Option<usize>,
}

impl Default for TransportStatus {
    fn default() -> Self {
        Self {
            paused: true,
            volume: 1.0,
            muted: false,
            position: 0.0,
            duration: None,
            buffering: false,
            fullscreen: false,
            picture_in_picture: false,
            subtitle_track: None,
            audio_track: None,
        }
    }
}

/// What the controller must do in response to an event
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEffect {
    /// Throttled position checkpoint
    RecordPosition { current: f64, duration: Option<f64> },
    /// Write the position now
    FlushPosition,
    TransitionTime { current: f64, duration: Option<f64> },
    PauseChanged(bool),
    Ended,
}

/// Now-playing line sent back to the host
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlaying {
    pub title: String,
    pub kind: ContentKind,
    pub metadata: Option<DisplayMetadata>,
    /// Airing program, for live content
    pub program: Option<ProgramEntry>,
}

impl NowPlaying {
    pub fn for_reference(reference: &ContentReference, program: Option<ProgramEntry>) -> Self {
        Self {
            title: reference.display_name(),
            kind: reference.kind(),
            metadata: reference.display_metadata.clone(),
            program,
        }
    }
}

#[derive(Debug, Default)]
pub struct Telemetry {
    status: TransportStatus,
    /// Volume/mute survive content changes
    sticky_volume: Option<(f32, bool)>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> &TransportStatus {
        &self.status
    }

    /// New content: clear per-stream fields
    pub fn reset(&mut self) {
        let (volume, muted) = self
            .sticky_volume
            .unwrap_or((self.status.volume, self.status.muted));
        let fullscreen = self.status.fullscreen;
        self.status = TransportStatus {
            volume,
            muted,
            fullscreen,
            ..TransportStatus::default()
        };
    }

    pub fn metadata_loaded(&mut self, duration: Option<f64>) {
        if duration.is_some() {
            self.status.duration = duration;
        }
    }

    pub fn set_buffering(&mut self, buffering: bool) {
        self.status.buffering = buffering;
    }

    pub fn set_volume(&mut self, volume: f32, muted: bool) {
        self.status.volume = volume;
        self.status.muted = muted;
        self.sticky_volume = Some((volume, muted));
    }

    pub fn set_fullscreen(&mut self, fullscreen: bool) {
        self.status.fullscreen = fullscreen;
    }

    pub fn set_picture_in_picture(&mut self, enabled: bool) {
        self.status.picture_in_picture = enabled;
    }

    pub fn set_subtitle_track(&mut self, index: Option<usize>) {
        self.status.subtitle_track = index;
    }

    pub fn set_audio_track(&mut self, index: usize) {
        self.status.audio_track = Some(index);
    }

    pub fn set_position(&mut self, position: f64) {
        self.status.position = position;
    }

    pub fn observe(&mut self, event: &SinkEvent) -> Vec<TelemetryEffect> {
        match event {
            SinkEvent::Playing => {
                self.status.buffering = false;
                if self.status.paused {
                    self.status.paused = false;
                    return vec![TelemetryEffect::PauseChanged(false)];
                }
                Vec::new()
            }
            SinkEvent::Paused => {
                if self.status.paused {
                    return Vec::new();
                }
                self.status.paused = true;
                vec![
                    TelemetryEffect::PauseChanged(true),
                    TelemetryEffect::FlushPosition,
                ]
            }
            SinkEvent::Waiting => {
                self.status.buffering = true;
                Vec::new()
            }
            SinkEvent::CanPlay => {
                self.status.buffering = false;
                Vec::new()
            }
            SinkEvent::TimeUpdate { current, duration } => {
                self.status.position = *current;
                if duration.is_some() {
                    self.status.duration = *duration;
                }
                let duration = self.status.duration;
                vec![
                    TelemetryEffect::RecordPosition {
                        current: *current,
                        duration,
                    },
                    TelemetryEffect::TransitionTime {
                        current: *current,
                        duration,
                    },
                ]
            }
            SinkEvent::VolumeChanged { volume, muted } => {
                self.set_volume(*volume, *muted);
                Vec::new()
            }
            SinkEvent::Ended => {
                self.status.paused = true;
                vec![TelemetryEffect::FlushPosition, TelemetryEffect::Ended]
            }
            SinkEvent::MetadataLoaded { duration } => {
                self.metadata_loaded(*duration);
                Vec::new()
            }
            SinkEvent::Error(_) => Vec::new(),
        }
    }
}
