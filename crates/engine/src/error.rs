use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// Result type used by the engine crate.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors produced by engine commands, providers and record validation.
#[derive(Debug)]
pub enum EngineError {
    NoRecordBound,
    RecordNotFound {
        record_ref: String,
    },
    InvalidRecord {
        record_id: String,
        reason: String,
    },
    InvalidBranch {
        index: usize,
        reason: String,
    },
    BranchIndexOutOfRange {
        index: usize,
        len: usize,
    },
    ItemIndexOutOfRange {
        index: usize,
        len: usize,
    },
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
    InvalidConfig {
        reason: String,
    },
    Io {
        context: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    Serialization {
        context: &'static str,
        source: serde_json::Error,
    },
    Provider {
        reason: String,
    },
    Engagement {
        reason: String,
    },
    Media(media_source::MediaSourceError),
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoRecordBound => write!(f, "no record is bound"),
            Self::RecordNotFound { record_ref } => {
                write!(f, "video record not found: {record_ref}")
            }
            Self::InvalidRecord { record_id, reason } => {
                write!(f, "invalid video record {record_id:?}: {reason}")
            }
            Self::InvalidBranch { index, reason } => {
                write!(f, "invalid branch point #{index}: {reason}")
            }
            Self::BranchIndexOutOfRange { index, len } => {
                write!(f, "branch index {index} out of range (record has {len})")
            }
            Self::ItemIndexOutOfRange { index, len } => {
                write!(f, "feed item {index} out of range (feed has {len})")
            }
            Self::InvalidUrl { url, source } => write!(f, "invalid url {url:?}: {source}"),
            Self::InvalidConfig { reason } => write!(f, "invalid engine config: {reason}"),
            Self::Io {
                context,
                path,
                source,
            } => write!(f, "{context}: {} ({source})", path.display()),
            Self::Serialization { context, source } => write!(f, "{context}: {source}"),
            Self::Provider { reason } => write!(f, "feed provider failed: {reason}"),
            Self::Engagement { reason } => write!(f, "engagement sink failed: {reason}"),
            Self::Media(err) => write!(f, "media source error: {err}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidUrl { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            Self::Serialization { source, .. } => Some(source),
            Self::Media(err) => Some(err),
            _ => None,
        }
    }
}

impl From<media_source::MediaSourceError> for EngineError {
    fn from(value: media_source::MediaSourceError) -> Self {
        Self::Media(value)
    }
}
