//! Playback sink interface
//!
//! The sink is the one media element of a session. Only
//! [`PlaybackEngine`](super::PlaybackEngine) holds it.

use crate::error::SinkError;

/// Events reported by the sink, drained with [`PlaybackSink::poll_events`]
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    /// Container/stream metadata is known
    MetadataLoaded { duration: Option<f64> },
    CanPlay,
    Playing,
    Paused,
    /// Stalled waiting for data
    Waiting,
    TimeUpdate { current: f64, duration: Option<f64> },
    VolumeChanged { volume: f32, muted: bool },
    Ended,
    Error(SinkError),
}

/// `play()` refused, e.g. by an autoplay policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayRejected;

pub trait PlaybackSink {
    /// Whether HLS manifests can be opened directly
    fn supports_native_segmented(&self) -> bool;

    fn load_source(&mut self, url: &str);
    fn clear_source(&mut self);

    fn play(&mut self) -> Result<(), PlayRejected>;
    fn pause(&mut self);
    fn seek(&mut self, position_secs: f64);
    fn set_volume(&mut self, volume: f32);
    fn set_muted(&mut self, muted: bool);

    fn set_fullscreen(&mut self, _fullscreen: bool) {}
    fn set_picture_in_picture(&mut self, _enabled: bool) {}
    fn select_subtitle_track(&mut self, _index: Option<usize>) {}
    fn select_audio_track(&mut self, _index: usize) {}

    fn poll_events(&mut self) -> Vec<SinkEvent>;
}
