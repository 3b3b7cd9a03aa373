//! Data models for the playback session

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which kind of content a reference points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// Playlist channel (M3U/XSPF entry) with a known URL
    Channel,
    /// Xtream live stream
    LiveChannel,
    Movie,
    Episode,
}

impl ContentKind {
    /// Live content never gets resume records and is always treated as segmented
    pub fn is_live(&self) -> bool {
        matches!(self, ContentKind::Channel | ContentKind::LiveChannel)
    }

    /// Tag used in resume keys and log lines
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Channel => "channel",
            ContentKind::LiveChannel => "live",
            ContentKind::Movie => "movie",
            ContentKind::Episode => "episode",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Playlist channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelPayload {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub epg_channel_id: Option<String>,
    #[serde(default)]
    pub logo: Option<String>,
}

/// Xtream live stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveStreamPayload {
    pub stream_id: i64,
    pub name: String,
    #[serde(default)]
    pub epg_channel_id: Option<String>,
    #[serde(default)]
    pub stream_icon: Option<String>,
}

/// Xtream VOD entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoviePayload {
    pub stream_id: i64,
    pub name: String,
    #[serde(default)]
    pub container_extension: Option<String>,
}

/// Series episode, optionally linked to the episode that follows it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodePayload {
    /// Episode stream id; some providers omit it
    #[serde(default)]
    pub episode_id: Option<i64>,
    pub series_id: i64,
    pub season: i32,
    pub episode_num: i32,
    pub title: String,
    #[serde(default)]
    pub container_extension: Option<String>,
    #[serde(default)]
    pub next_episode: Option<Box<EpisodePayload>>,
}

impl EpisodePayload {
    /// Ordering key within a series
    pub fn position(&self) -> (i32, i32) {
        (self.season, self.episode_num)
    }
}

/// Kind-specific record carried by a [`ContentReference`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentPayload {
    Channel(ChannelPayload),
    LiveChannel(LiveStreamPayload),
    Movie(MoviePayload),
    Episode(EpisodePayload),
}

/// Descriptive metadata shown while playing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayMetadata {
    pub title: String,
    #[serde(default)]
    pub year: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub rating: Option<String>,
    /// Runtime in seconds
    #[serde(default)]
    pub duration: Option<u64>,
    #[serde(default)]
    pub cast: Option<String>,
    #[serde(default)]
    pub director: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub season_number: Option<i32>,
    #[serde(default)]
    pub episode_number: Option<i32>,
}

/// What the user asked to play. Never mutated; a new selection replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentReference {
    pub payload: ContentPayload,
    #[serde(default)]
    pub explicit_url: Option<String>,
    #[serde(default)]
    pub display_metadata: Option<DisplayMetadata>,
}

impl ContentReference {
    pub fn channel(name: &str, url: &str) -> Self {
        Self {
            payload: ContentPayload::Channel(ChannelPayload {
                name: name.to_string(),
                url: url.to_string(),
                epg_channel_id: None,
                logo: None,
            }),
            explicit_url: Some(url.to_string()),
            display_metadata: None,
        }
    }

    pub fn live(stream_id: i64, name: &str) -> Self {
        Self::from_payload(ContentPayload::LiveChannel(LiveStreamPayload {
            stream_id,
            name: name.to_string(),
            epg_channel_id: None,
            stream_icon: None,
        }))
    }

    pub fn movie(stream_id: i64, name: &str) -> Self {
        Self::from_payload(ContentPayload::Movie(MoviePayload {
            stream_id,
            name: name.to_string(),
            container_extension: None,
        }))
    }

    pub fn episode(episode: EpisodePayload) -> Self {
        let metadata = DisplayMetadata {
            title: episode.title.clone(),
            season_number: Some(episode.season),
            episode_number: Some(episode.episode_num),
            ..Default::default()
        };
        Self {
            payload: ContentPayload::Episode(episode),
            explicit_url: None,
            display_metadata: Some(metadata),
        }
    }

    pub fn from_payload(payload: ContentPayload) -> Self {
        // Playlist channels always carry their URL
        let explicit_url = match &payload {
            ContentPayload::Channel(c) => Some(c.url.clone()),
            _ => None,
        };
        Self {
            payload,
            explicit_url,
            display_metadata: None,
        }
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.explicit_url = Some(url.to_string());
        self
    }

    pub fn with_metadata(mut self, metadata: DisplayMetadata) -> Self {
        self.display_metadata = Some(metadata);
        self
    }

    pub fn kind(&self) -> ContentKind {
        match self.payload {
            ContentPayload::Channel(_) => ContentKind::Channel,
            ContentPayload::LiveChannel(_) => ContentKind::LiveChannel,
            ContentPayload::Movie(_) => ContentKind::Movie,
            ContentPayload::Episode(_) => ContentKind::Episode,
        }
    }

    /// Name shown in logs and the now-playing line
    pub fn display_name(&self) -> String {
        if let Some(meta) = &self.display_metadata {
            if !meta.title.is_empty() {
                return meta.title.clone();
            }
        }
        match &self.payload {
            ContentPayload::Channel(c) => c.name.clone(),
            ContentPayload::LiveChannel(l) => l.name.clone(),
            ContentPayload::Movie(m) => m.name.clone(),
            ContentPayload::Episode(e) => {
                format!("S{:02}E{:02} {}", e.season, e.episode_num, e.title)
            }
        }
    }

    /// Container extension known from the catalogue, if any
    pub fn container_hint(&self) -> Option<&str> {
        match &self.payload {
            ContentPayload::Movie(m) => m.container_extension.as_deref(),
            ContentPayload::Episode(e) => e.container_extension.as_deref(),
            _ => None,
        }
    }

    /// XMLTV channel id for guide lookups
    pub fn epg_channel_id(&self) -> Option<&str> {
        match &self.payload {
            ContentPayload::Channel(c) => c.epg_channel_id.as_deref(),
            ContentPayload::LiveChannel(l) => l.epg_channel_id.as_deref(),
            _ => None,
        }
    }

    pub fn as_episode(&self) -> Option<&EpisodePayload> {
        match &self.payload {
            ContentPayload::Episode(e) => Some(e),
            _ => None,
        }
    }
}

/// Stable key derived from a [`ContentReference`]
///
/// Equality and hashing only look at `(kind, id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentIdentity {
    pub kind: ContentKind,
    pub id: String,
    /// Episode keyed by its parent series because it had no stream id
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub series_fallback: bool,
}

impl ContentIdentity {
    pub fn new(kind: ContentKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            series_fallback: false,
        }
    }

    pub fn is_series_fallback(&self) -> bool {
        self.series_fallback
    }
}

impl PartialEq for ContentIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.id == other.id
    }
}

impl Eq for ContentIdentity {}

impl std::hash::Hash for ContentIdentity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.id.hash(state);
    }
}

impl fmt::Display for ContentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// A scheduled program on a live channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramEntry {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Start time as Unix timestamp
    pub start_epoch: i64,
    /// End time as Unix timestamp (exclusive)
    pub stop_epoch: i64,
    #[serde(default)]
    pub category: Option<String>,
}

impl ProgramEntry {
    pub fn contains(&self, now: i64) -> bool {
        self.start_epoch <= now && now < self.stop_epoch
    }
}

/// Episode row from a series listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeEntry {
    pub id: i64,
    pub title: String,
    pub season: i32,
    pub episode_num: i32,
    pub container_extension: String,
}
