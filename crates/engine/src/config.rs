use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{EngineError, Result};
use crate::time::FireWindow;

/// Tunables shared by every engine in a feed session.
///
/// Every field has a default, so an empty JSON object is a valid config.
///
/// # Example
/// ```
/// use engine::EngineConfig;
///
/// let config = EngineConfig::from_json_str(r#"{ "fireWindowMs": 750 }"#)
///     .expect("valid config");
/// assert_eq!(config.fire_window_ms, 750);
/// assert_eq!(config.prompt_dwell_ms, 5_000);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub fire_window_ms: u64,
    pub prompt_dwell_ms: u64,
    pub visibility_threshold: f64,
    pub cdn_base_url: String,
    pub entry_prefix: String,
    pub entry_limit: usize,
    pub count_views: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fire_window_ms: 500,
            prompt_dwell_ms: 5_000,
            visibility_threshold: 0.6,
            cdn_base_url: String::from("https://my-replaygram.b-cdn.net"),
            entry_prefix: String::from("feed_"),
            entry_limit: 10,
            count_views: true,
        }
    }
}

impl EngineConfig {
    /// Parses and validates a JSON config document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|source| {
            EngineError::Serialization {
                context: "parse engine config",
                source,
            }
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| EngineError::Io {
            context: "read engine config",
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fire_window_ms == 0 {
            return Err(invalid("fireWindowMs must be positive"));
        }
        if self.prompt_dwell_ms == 0 {
            return Err(invalid("promptDwellMs must be positive"));
        }
        if !(self.visibility_threshold > 0.0 && self.visibility_threshold <= 1.0) {
            return Err(invalid("visibilityThreshold must be in (0, 1]"));
        }
        let base = Url::parse(&self.cdn_base_url).map_err(|source| EngineError::InvalidUrl {
            url: self.cdn_base_url.clone(),
            source,
        })?;
        if base.cannot_be_a_base() {
            return Err(invalid("cdnBaseUrl cannot be used as a base url"));
        }
        Ok(())
    }

    pub fn fire_window(&self) -> FireWindow {
        FireWindow::new(Duration::from_millis(self.fire_window_ms))
    }

    pub fn prompt_dwell(&self) -> Duration {
        Duration::from_millis(self.prompt_dwell_ms)
    }
}

fn invalid(reason: &str) -> EngineError {
    EngineError::InvalidConfig {
        reason: reason.to_owned(),
    }
}
