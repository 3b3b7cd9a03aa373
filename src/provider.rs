//! Collaborator interfaces consumed by the controller
//!
//! Implementations are called from worker threads, so they must be
//! `Send + Sync`. Blocking is fine.

use crate::error::{ProviderError, StorageError};
use crate::models::{EpisodeEntry, ProgramEntry};
use crate::resume::{ResumeKey, ResumeRecord};
use std::fmt;

/// Provider-side content type used to build stream URLs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentTypeTag {
    Live,
    /// On-demand movie
    Movie,
    /// On-demand series episode
    Series,
}

impl ContentTypeTag {
    pub fn is_on_demand(&self) -> bool {
        !matches!(self, ContentTypeTag::Live)
    }

    /// Path segment in Xtream stream URLs
    pub fn path_segment(&self) -> &'static str {
        match self {
            ContentTypeTag::Live => "live",
            ContentTypeTag::Movie => "movie",
            ContentTypeTag::Series => "series",
        }
    }

    /// Extension used when the catalogue does not name a container
    pub fn default_extension(&self) -> &'static str {
        match self {
            ContentTypeTag::Live => "m3u8",
            ContentTypeTag::Movie | ContentTypeTag::Series => "mp4",
        }
    }
}

impl fmt::Display for ContentTypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_segment())
    }
}

/// Parameters of one outbound URL resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveRequest {
    pub profile_id: String,
    pub tag: ContentTypeTag,
    pub content_id: String,
    /// Extension without the leading dot
    pub default_extension: String,
    /// Container named by the catalogue entry
    pub container_hint: Option<String>,
}

/// Channel lookup key for guide fetches
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    /// Identity id of the channel (stream id or channel name)
    pub channel_id: String,
    /// XMLTV id, when known
    pub epg_channel_id: Option<String>,
}

/// Resolves playable URLs
pub trait StreamSource: Send + Sync {
    fn resolve_stream_url(&self, request: &ResolveRequest) -> Result<String, ProviderError>;
}

/// Program guide lookups
pub trait ScheduleSource: Send + Sync {
    /// Short listing, usually the current and next program
    fn fetch_current_and_next(
        &self,
        profile_id: &str,
        channel: &ChannelKey,
    ) -> Result<Vec<ProgramEntry>, ProviderError>;

    /// Everything the provider knows for the channel
    fn fetch_full_schedule(
        &self,
        profile_id: &str,
        channel: &ChannelKey,
    ) -> Result<Vec<ProgramEntry>, ProviderError>;
}

/// Series listings used to find the episode that follows
pub trait EpisodeListSource: Send + Sync {
    fn fetch_series_episodes(
        &self,
        profile_id: &str,
        series_id: i64,
    ) -> Result<Vec<EpisodeEntry>, ProviderError>;
}

/// Persisted playback positions
///
/// Called on the controller thread.
pub trait PositionStorage {
    fn load(&self, key: &ResumeKey) -> Result<Option<ResumeRecord>, StorageError>;
    fn save(&mut self, record: &ResumeRecord) -> Result<(), StorageError>;
    fn remove(&mut self, key: &ResumeKey) -> Result<(), StorageError>;
}
