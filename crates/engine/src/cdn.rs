use url::Url;

use crate::error::{EngineError, Result};
use crate::record::RawVideoRecord;

/// Resolves CDN-relative media paths to absolute URLs.
///
/// # Example
/// ```
/// use engine::cdn::CdnResolver;
///
/// let cdn = CdnResolver::new("https://my-replaygram.b-cdn.net").expect("valid base");
/// assert_eq!(
///     cdn.resolve("/stories/fork.mp4").expect("joinable"),
///     "https://my-replaygram.b-cdn.net/stories/fork.mp4"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdnResolver {
    base: Url,
}

impl CdnResolver {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base = Url::parse(base_url.trim()).map_err(|source| EngineError::InvalidUrl {
            url: base_url.to_owned(),
            source,
        })?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { base })
    }

    /// Returns `path` unchanged when it is already an `http(s)` URL, otherwise
    /// joins it under the CDN base.
    pub fn resolve(&self, path: &str) -> Result<String> {
        let trimmed = path.trim();
        if is_absolute_http(trimmed) {
            return Ok(trimmed.to_owned());
        }
        let relative = trimmed.trim_start_matches('/');
        self.base
            .join(relative)
            .map(String::from)
            .map_err(|source| EngineError::InvalidUrl {
                url: trimmed.to_owned(),
                source,
            })
    }

    /// Resolves every media locator in an authored record. Empty locators are
    /// left for validation to reject or drop.
    pub fn resolve_record(&self, mut raw: RawVideoRecord) -> Result<RawVideoRecord> {
        if !raw.source_url.trim().is_empty() {
            raw.source_url = self.resolve(&raw.source_url)?;
        }
        if let Some(poster) = raw.poster_url.as_mut() {
            if !poster.trim().is_empty() {
                *poster = self.resolve(poster)?;
            }
        }
        for branch in &mut raw.branches {
            if let Some(target) = branch.target_url.as_mut() {
                if !target.trim().is_empty() {
                    *target = self.resolve(target)?;
                }
            }
        }
        Ok(raw)
    }
}

/// Strips the storage prefix and file extension some references carry, so
/// `/data/feed_1.json` and `feed_1` name the same record.
pub fn normalize_record_ref(record_ref: &str) -> String {
    let trimmed = record_ref.trim();
    let without_prefix = trimmed.strip_prefix("/data/").unwrap_or(trimmed);
    without_prefix
        .strip_suffix(".json")
        .unwrap_or(without_prefix)
        .to_owned()
}

fn is_absolute_http(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}
