//! Content identity derivation
//!
//! Every cache in the session (URL memo, resume records, guide lookups) is
//! keyed by the [`ContentIdentity`] computed here.

use crate::models::{ContentIdentity, ContentKind, ContentPayload, ContentReference};
use tracing::warn;

/// Result of identifying the current selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identification {
    Resolved(ContentIdentity),
    /// Nothing selected. This is the idle state, not an error.
    Unresolvable,
}

impl Identification {
    pub fn identity(&self) -> Option<&ContentIdentity> {
        match self {
            Identification::Resolved(id) => Some(id),
            Identification::Unresolvable => None,
        }
    }
}

/// Derive the identity for a reference
///
/// Episodes without their own stream id fall back to the parent series id,
/// so every such episode of a series shares one resume record and one URL
/// memo entry. The returned identity is marked with `series_fallback`.
pub fn identify(reference: Option<&ContentReference>) -> Identification {
    let Some(reference) = reference else {
        return Identification::Unresolvable;
    };

    let identity = match &reference.payload {
        ContentPayload::Channel(channel) => {
            ContentIdentity::new(ContentKind::Channel, channel.name.clone())
        }
        ContentPayload::LiveChannel(live) => {
            ContentIdentity::new(ContentKind::LiveChannel, live.stream_id.to_string())
        }
        ContentPayload::Movie(movie) => {
            ContentIdentity::new(ContentKind::Movie, movie.stream_id.to_string())
        }
        ContentPayload::Episode(episode) => match episode.episode_id {
            Some(id) => ContentIdentity::new(ContentKind::Episode, id.to_string()),
            None => {
                warn!(
                    series_id = episode.series_id,
                    season = episode.season,
                    episode = episode.episode_num,
                    "[IDENTITY] Episode has no stream id, keying by series"
                );
                let mut identity =
                    ContentIdentity::new(ContentKind::Episode, episode.series_id.to_string());
                identity.series_fallback = true;
                identity
            }
        },
    };

    Identification::Resolved(identity)
}
