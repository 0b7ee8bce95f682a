use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cdn::{CdnResolver, normalize_record_ref};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::record::{RawVideoRecord, RecordId, VideoRecord};

const SEED_STORIES: &str = include_str!("../data/seed_stories.json");

/// Source of entry points and video records.
///
/// Calls may block; callers treat failures as retryable.
pub trait FeedDataProvider: Send + Sync {
    /// Returns the ordered entry-point record ids of the feed.
    fn list_entry_points(&self) -> Result<Vec<RecordId>>;

    /// Fetches one record by id or storage path.
    fn get_record(&self, record_ref: &str) -> Result<VideoRecord>;
}

/// On-disk catalog layout: `{ "videos": [ ... ] }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub videos: Vec<RawVideoRecord>,
}

/// In-memory document catalog.
///
/// Documents are kept as authored; CDN resolution and validation happen on
/// every fetch, so a malformed document fails its own lookups only.
#[derive(Debug, Clone)]
pub struct CatalogProvider {
    documents: Vec<RawVideoRecord>,
    cdn: CdnResolver,
    entry_prefix: String,
    entry_limit: usize,
}

impl CatalogProvider {
    /// Builds a catalog, seeding the sample story when `documents` is empty.
    pub fn new(documents: Vec<RawVideoRecord>, config: &EngineConfig) -> Result<Self> {
        let documents = if documents.is_empty() {
            info!("catalog empty; seeding sample story");
            seed_documents()?
        } else {
            documents
        };
        Ok(Self {
            documents,
            cdn: CdnResolver::new(&config.cdn_base_url)?,
            entry_prefix: config.entry_prefix.clone(),
            entry_limit: config.entry_limit,
        })
    }

    /// Catalog holding only the sample story.
    pub fn seeded(config: &EngineConfig) -> Result<Self> {
        Self::new(Vec::new(), config)
    }

    pub fn from_json_str(json: &str, config: &EngineConfig) -> Result<Self> {
        let catalog: CatalogFile =
            serde_json::from_str(json).map_err(|source| EngineError::Serialization {
                context: "parse catalog",
                source,
            })?;
        Self::new(catalog.videos, config)
    }

    pub fn from_json_file(path: impl AsRef<Path>, config: &EngineConfig) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| EngineError::Io {
            context: "read catalog",
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json, config)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl FeedDataProvider for CatalogProvider {
    fn list_entry_points(&self) -> Result<Vec<RecordId>> {
        Ok(self
            .documents
            .iter()
            .map(|document| document.id.trim())
            .filter(|id| !id.is_empty() && id.starts_with(&self.entry_prefix))
            .take(self.entry_limit)
            .map(str::to_owned)
            .collect())
    }

    fn get_record(&self, record_ref: &str) -> Result<VideoRecord> {
        let id = normalize_record_ref(record_ref);
        debug!(record_ref, id = %id, "catalog lookup");
        let document = self
            .documents
            .iter()
            .find(|document| document.id.trim() == id)
            .ok_or_else(|| EngineError::RecordNotFound {
                record_ref: record_ref.to_owned(),
            })?;
        let resolved = self.cdn.resolve_record(document.clone())?;
        VideoRecord::from_raw(resolved)
    }
}

fn seed_documents() -> Result<Vec<RawVideoRecord>> {
    let catalog: CatalogFile =
        serde_json::from_str(SEED_STORIES).map_err(|source| EngineError::Serialization {
            context: "parse seed stories",
            source,
        })?;
    Ok(catalog.videos)
}
