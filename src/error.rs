//! Error types

use thiserror::Error;

/// Failure talking to a content provider
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Request failed: {0}")]
    Http(#[from] ureq::Error),

    #[error("HTTP error: {0}")]
    Status(u16),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected response: {0}")]
    Malformed(String),

    #[error("EPG error: {0}")]
    Epg(String),

    #[error("Not supported by this provider: {0}")]
    Unsupported(&'static str),
}

/// Failure reading or writing persisted resume positions
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid resume file: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
}

/// Errors reported by a playback sink
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SinkError {
    /// Source could not be opened or decoded
    #[error("Unsupported media: {0}")]
    Unsupported(String),

    /// Connection dropped or timed out
    #[error("Network error: {0}")]
    Network(String),

    #[error("Player failed: {0}")]
    Other(String),
}

/// Playback faults, ordered by how far they surface
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlaybackFault {
    /// No URL could be obtained; renders "stream unavailable"
    #[error("Stream unavailable: {0}")]
    Resolution(String),

    /// Network interruption, reloaded in place
    #[error("Transport fault (attempt {attempt}): {details}")]
    Transport { attempt: u32, details: String },

    /// Unsupported codec/container or unrecoverable decode error
    #[error("Media fault: {0}")]
    Media(String),

    /// Browser-style autoplay block; waits for an explicit play
    #[error("Autoplay rejected")]
    AutoplayRejected,
}

impl PlaybackFault {
    /// Surfaced faults must reach the UI; absorbed ones only get logged
    pub fn is_surfaced(&self) -> bool {
        matches!(self, PlaybackFault::Resolution(_) | PlaybackFault::Media(_))
    }
}

/// Failure assembling a controller
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
