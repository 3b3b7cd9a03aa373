//! Playback-session controller for Xtream Codes IPTV clients
//!
//! [`PlaybackController`] takes a [`ContentReference`], resolves a playable
//! URL through a [`provider::StreamSource`], drives one playback sink,
//! recovers from transport faults, offers to resume on-demand content,
//! tracks the airing program for live channels and rolls series episodes
//! over to the next one.

pub mod api;
pub mod config;
pub mod engine;
pub mod epg;
pub mod error;
pub mod external_player;
#[cfg(feature = "internal-player")]
pub mod ffmpeg_player;
pub mod identity;
pub mod models;
pub mod provider;
pub mod resolver;
pub mod resume;
pub mod session;
pub mod telemetry;
pub mod transition;

#[cfg(test)]
mod test_support;

pub use config::PlayerConfig;
pub use engine::{DeliveryMode, EngineState};
pub use error::{PlaybackFault, ProviderError, SessionError};
pub use models::{ContentIdentity, ContentKind, ContentReference};
pub use session::{Banner, PlaybackController, PlaybackSnapshot, SessionNotice};
