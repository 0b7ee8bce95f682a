use std::fmt::{Display, Formatter};

/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, MediaSourceError>;

/// Error type for binding media sources to a playback surface.
#[derive(Debug)]
pub enum MediaSourceError {
    InvalidSourceUrl {
        url: String,
        source: url::ParseError,
    },
    UnsupportedSource {
        url: String,
    },
    SessionCreate {
        url: String,
        reason: String,
    },
    PlaybackRejected {
        reason: String,
    },
}

impl Display for MediaSourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSourceUrl { url, source } => {
                write!(f, "invalid source url {url:?}: {source}")
            }
            Self::UnsupportedSource { url } => {
                write!(f, "no delivery path can play source: {url}")
            }
            Self::SessionCreate { url, reason } => {
                write!(f, "adaptive session failed for {url}: {reason}")
            }
            Self::PlaybackRejected { reason } => write!(f, "playback rejected: {reason}"),
        }
    }
}

impl std::error::Error for MediaSourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidSourceUrl { source, .. } => Some(source),
            _ => None,
        }
    }
}
