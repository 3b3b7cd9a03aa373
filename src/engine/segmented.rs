//! Segmented (adaptive) playback backend
//!
//! A backend session owns the network side of an HLS or raw MPEG-TS stream:
//! it loads the manifest, picks a variant and hands the sink a media URL.
//! Sessions are created per attach and must be destroyed when the URL
//! changes.

use super::{stream_shape, StreamShape};
use crate::config::ConnectionQuality;
use m3u8_rs::{parse_playlist_res, Playlist, VariantStream};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// MPEG-TS packet size and sync byte
const TS_PACKET_SIZE: usize = 188;
const TS_SYNC_BYTE: u8 = 0x47;

/// Fault category reported by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Network,
    Media,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SegmentedEvent {
    /// Manifest loaded; the sink should play `media_url`
    ManifestParsed { media_url: String, variants: usize },
    /// In-place recovery finished
    Recovered,
    Error {
        kind: FaultKind,
        fatal: bool,
        details: String,
    },
}

/// One engine instance bound to one URL
pub trait SegmentedSession {
    fn load(&mut self, url: &str);
    /// Reissue the load after a network fault
    fn start_load(&mut self);
    /// Reset decoding after a media fault
    fn recover_media_error(&mut self);
    /// Release the instance; no events are delivered afterwards
    fn destroy(&mut self);
    fn poll_events(&mut self) -> Vec<SegmentedEvent>;
}

/// Factory for sessions
pub trait SegmentedBackend {
    fn create_session(&self) -> Box<dyn SegmentedSession>;
}

/// HLS backend built on `ureq` and `m3u8-rs`
pub struct HlsBackend {
    agent: ureq::Agent,
    user_agent: String,
    quality: ConnectionQuality,
}

impl HlsBackend {
    pub fn new(user_agent: &str, quality: ConnectionQuality) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(30)))
            .timeout_connect(Some(Duration::from_secs(10)))
            .build()
            .new_agent();
        Self {
            agent,
            user_agent: user_agent.to_string(),
            quality,
        }
    }
}

impl SegmentedBackend for HlsBackend {
    fn create_session(&self) -> Box<dyn SegmentedSession> {
        Box::new(HlsSession::new(
            self.agent.clone(),
            self.user_agent.clone(),
            self.quality,
        ))
    }
}

struct HlsSession {
    agent: ureq::Agent,
    user_agent: String,
    quality: ConnectionQuality,
    url: Option<String>,
    sender: Sender<SegmentedEvent>,
    receiver: Receiver<SegmentedEvent>,
    destroyed: Arc<AtomicBool>,
}

impl HlsSession {
    fn new(agent: ureq::Agent, user_agent: String, quality: ConnectionQuality) -> Self {
        let (sender, receiver) = channel();
        Self {
            agent,
            user_agent,
            quality,
            url: None,
            sender,
            receiver,
            destroyed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn spawn_fetch(&self) {
        let Some(url) = self.url.clone() else { return };
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }

        // Non-HTTP live sources (udp://, rtmp://) go straight to the sink
        let http = url.starts_with("http://") || url.starts_with("https://");
        if !http || stream_shape(&url) == StreamShape::Progressive {
            let _ = self.sender.send(SegmentedEvent::ManifestParsed {
                media_url: url,
                variants: 0,
            });
            return;
        }

        let agent = self.agent.clone();
        let user_agent = self.user_agent.clone();
        let quality = self.quality;
        let sender = self.sender.clone();
        let destroyed = Arc::clone(&self.destroyed);

        thread::spawn(move || {
            let event = fetch_manifest(&agent, &url, &user_agent, quality);
            // Drop results for sessions torn down while the request ran
            if !destroyed.load(Ordering::SeqCst) {
                let _ = sender.send(event);
            }
        });
    }
}

impl SegmentedSession for HlsSession {
    fn load(&mut self, url: &str) {
        debug!(url = %url, "[HLS] Loading");
        self.url = Some(url.to_string());
        self.spawn_fetch();
    }

    fn start_load(&mut self) {
        debug!("[HLS] Reloading after network fault");
        self.spawn_fetch();
    }

    fn recover_media_error(&mut self) {
        // Decoder state lives in the sink, which the engine reattaches
        let _ = self.sender.send(SegmentedEvent::Recovered);
    }

    fn destroy(&mut self) {
        self.destroyed.store(true, Ordering::SeqCst);
        self.url = None;
    }

    fn poll_events(&mut self) -> Vec<SegmentedEvent> {
        let mut events = Vec::new();
        if self.destroyed.load(Ordering::SeqCst) {
            return events;
        }
        loop {
            match self.receiver.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        events
    }
}

fn fetch_manifest(
    agent: &ureq::Agent,
    url: &str,
    user_agent: &str,
    quality: ConnectionQuality,
) -> SegmentedEvent {
    let response = match agent.get(url).header("User-Agent", user_agent).call() {
        Ok(r) => r,
        Err(e) => {
            warn!(url = %url, error = %e, "[HLS] Request failed");
            return SegmentedEvent::Error {
                kind: FaultKind::Network,
                fatal: true,
                details: format!("Request failed: {}", e),
            };
        }
    };

    if stream_shape(url) == StreamShape::TransportStream {
        let mut probe = vec![0u8; TS_PACKET_SIZE * 2];
        let mut reader = response.into_body().into_reader();
        return match reader.read_exact(&mut probe) {
            Ok(()) => probe_transport_stream(url, &probe),
            Err(e) => SegmentedEvent::Error {
                kind: FaultKind::Network,
                fatal: true,
                details: format!("Read failed: {}", e),
            },
        };
    }

    let mut response = response;
    let body = match response.body_mut().read_to_vec() {
        Ok(b) => b,
        Err(e) => {
            return SegmentedEvent::Error {
                kind: FaultKind::Network,
                fatal: true,
                details: format!("Read failed: {}", e),
            }
        }
    };

    parse_manifest(url, &body, quality)
}

/// Check that a raw stream starts on MPEG-TS packet boundaries
fn probe_transport_stream(url: &str, probe: &[u8]) -> SegmentedEvent {
    let synced = probe
        .iter()
        .step_by(TS_PACKET_SIZE)
        .all(|b| *b == TS_SYNC_BYTE);
    if synced {
        SegmentedEvent::ManifestParsed {
            media_url: url.to_string(),
            variants: 0,
        }
    } else {
        SegmentedEvent::Error {
            kind: FaultKind::Media,
            fatal: true,
            details: "Not an MPEG-TS stream (missing sync byte)".to_string(),
        }
    }
}

fn parse_manifest(url: &str, body: &[u8], quality: ConnectionQuality) -> SegmentedEvent {
    match parse_playlist_res(body) {
        Ok(Playlist::MasterPlaylist(master)) => {
            let Some(variant) = select_variant(&master.variants, quality) else {
                return SegmentedEvent::Error {
                    kind: FaultKind::Media,
                    fatal: true,
                    details: "Master playlist has no variants".to_string(),
                };
            };
            match resolve_uri(url, &variant.uri) {
                Some(media_url) => SegmentedEvent::ManifestParsed {
                    media_url,
                    variants: master.variants.len(),
                },
                None => SegmentedEvent::Error {
                    kind: FaultKind::Other,
                    fatal: true,
                    details: format!("Bad variant URI: {}", variant.uri),
                },
            }
        }
        Ok(Playlist::MediaPlaylist(_)) => SegmentedEvent::ManifestParsed {
            media_url: url.to_string(),
            variants: 1,
        },
        Err(e) => SegmentedEvent::Error {
            kind: FaultKind::Media,
            fatal: true,
            details: format!("Failed to parse playlist: {}", e),
        },
    }
}

/// Pick a variant for the configured connection quality
pub fn select_variant(
    variants: &[VariantStream],
    quality: ConnectionQuality,
) -> Option<&VariantStream> {
    // I-frame streams are trick-play only
    let mut playable: Vec<&VariantStream> =
        variants.iter().filter(|v| !v.is_i_frame).collect();
    if playable.is_empty() {
        return None;
    }
    playable.sort_by_key(|v| v.bandwidth);

    let picked = match quality {
        ConnectionQuality::Fast => playable[playable.len() - 1],
        ConnectionQuality::VerySlow => playable[0],
        ConnectionQuality::Normal | ConnectionQuality::Slow | ConnectionQuality::Custom => {
            playable[(playable.len() - 1) / 2]
        }
    };
    Some(picked)
}

fn resolve_uri(base: &str, uri: &str) -> Option<String> {
    if let Ok(absolute) = Url::parse(uri) {
        return Some(absolute.to_string());
    }
    let base = Url::parse(base).ok()?;
    base.join(uri).ok().map(|u| u.to_string())
}
