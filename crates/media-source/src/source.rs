use url::Url;

use crate::error::{MediaSourceError, Result};

const MANIFEST_EXTENSION: &str = ".m3u8";

/// Delivery format inferred from a source URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Plain progressive file (MP4, WebM, ...).
    Progressive,
    /// Adaptive-streaming playlist (URL path ending with `.m3u8`).
    AdaptiveManifest,
}

/// A parsed, absolute media locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSource {
    url: Url,
    kind: SourceKind,
}

impl MediaSource {
    /// Parses an absolute source URL and classifies its delivery format.
    ///
    /// Query strings and fragments do not affect classification.
    ///
    /// # Example
    /// ```
    /// use media_source::{MediaSource, SourceKind};
    ///
    /// let source = MediaSource::parse("https://cdn.example/v/playlist.m3u8?token=1")
    ///     .expect("valid url");
    /// assert_eq!(source.kind(), SourceKind::AdaptiveManifest);
    /// ```
    pub fn parse(url: &str) -> Result<Self> {
        let parsed = Url::parse(url.trim()).map_err(|source| MediaSourceError::InvalidSourceUrl {
            url: url.to_owned(),
            source,
        })?;
        let kind = classify(&parsed);
        Ok(Self { url: parsed, kind })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

fn classify(url: &Url) -> SourceKind {
    let last_segment = url.path().rsplit('/').next().unwrap_or_default();
    if last_segment
        .to_ascii_lowercase()
        .ends_with(MANIFEST_EXTENSION)
    {
        SourceKind::AdaptiveManifest
    } else {
        SourceKind::Progressive
    }
}
