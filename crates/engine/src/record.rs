use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cdn::normalize_record_ref;
use crate::error::{EngineError, Result};
use crate::schedule::BranchSchedule;
use crate::time::{delay_from_seconds, seconds_to_micros};

/// Opaque identifier of a video record.
pub type RecordId = String;

/// Where a branch leads when the viewer picks it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchTarget {
    /// Another record, fetched from the feed provider.
    Record(String),
    /// A bare media URL played with the parent record's metadata.
    Url(String),
}

/// Branch point as authored, before validation.
///
/// Accepts the legacy authoring field names as aliases.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBranchPoint {
    pub appear_at_second: f64,
    #[serde(default, alias = "PauseAtappersecond")]
    pub pause_on_appear: bool,
    #[serde(
        default,
        alias = "DurationPauseseconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub auto_resume_after_seconds: Option<f64>,
    pub label: String,
    #[serde(default, alias = "labelpositionx")]
    pub position_x: f64,
    #[serde(default, alias = "labelpositiony")]
    pub position_y: f64,
    #[serde(default, alias = "targetJson", skip_serializing_if = "Option::is_none")]
    pub target_record_ref: Option<String>,
    #[serde(
        default,
        alias = "targetVideoUrl",
        skip_serializing_if = "Option::is_none"
    )]
    pub target_url: Option<String>,
}

/// One validated candidate interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBranchPoint", into = "RawBranchPoint")]
pub struct BranchPoint {
    appear_at_second: f64,
    pause_on_appear: bool,
    auto_resume_after_seconds: Option<f64>,
    label: String,
    position_x: f64,
    position_y: f64,
    target: BranchTarget,
}

impl BranchPoint {
    /// Validates one authored branch point. `index` is only used in errors.
    pub fn from_raw(index: usize, raw: RawBranchPoint) -> Result<Self> {
        let fail = |reason: &str| EngineError::InvalidBranch {
            index,
            reason: reason.to_owned(),
        };

        if !raw.appear_at_second.is_finite() || raw.appear_at_second < 0.0 {
            return Err(fail("appearAtSecond must be a non-negative number"));
        }
        if raw
            .auto_resume_after_seconds
            .is_some_and(|delay| !delay.is_finite() || delay < 0.0)
        {
            return Err(fail("autoResumeAfterSeconds must be a non-negative number"));
        }
        if raw
            .auto_resume_after_seconds
            .is_some_and(|delay| Duration::try_from_secs_f64(delay).is_err())
        {
            return Err(fail("autoResumeAfterSeconds is out of range"));
        }
        for position in [raw.position_x, raw.position_y] {
            if !(0.0..=100.0).contains(&position) {
                return Err(fail("prompt position must be a percentage in 0..=100"));
            }
        }
        let label = raw.label.trim();
        if label.is_empty() {
            return Err(fail("label must not be empty"));
        }

        let record_ref = non_empty(raw.target_record_ref.as_deref());
        let target_url = non_empty(raw.target_url.as_deref());
        let target = match (record_ref, target_url) {
            (Some(record_ref), _) => BranchTarget::Record(normalize_record_ref(record_ref)),
            (None, Some(url)) => BranchTarget::Url(url.to_owned()),
            (None, None) => return Err(fail("branch has no target record or url")),
        };

        Ok(Self {
            appear_at_second: raw.appear_at_second,
            pause_on_appear: raw.pause_on_appear,
            auto_resume_after_seconds: raw.auto_resume_after_seconds,
            label: label.to_owned(),
            position_x: raw.position_x,
            position_y: raw.position_y,
            target,
        })
    }

    pub fn appear_at_second(&self) -> f64 {
        self.appear_at_second
    }

    pub fn appear_at_us(&self) -> i64 {
        seconds_to_micros(self.appear_at_second)
    }

    pub fn pause_on_appear(&self) -> bool {
        self.pause_on_appear
    }

    /// Auto-resume delay, present only for pausing branches with a positive
    /// delay.
    pub fn auto_resume_after(&self) -> Option<Duration> {
        if !self.pause_on_appear {
            return None;
        }
        self.auto_resume_after_seconds.and_then(delay_from_seconds)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn position_x(&self) -> f64 {
        self.position_x
    }

    pub fn position_y(&self) -> f64 {
        self.position_y
    }

    pub fn target(&self) -> &BranchTarget {
        &self.target
    }
}

impl TryFrom<RawBranchPoint> for BranchPoint {
    type Error = EngineError;

    fn try_from(value: RawBranchPoint) -> Result<Self> {
        Self::from_raw(0, value)
    }
}

impl From<BranchPoint> for RawBranchPoint {
    fn from(value: BranchPoint) -> Self {
        let (target_record_ref, target_url) = match value.target {
            BranchTarget::Record(record_ref) => (Some(record_ref), None),
            BranchTarget::Url(url) => (None, Some(url)),
        };
        Self {
            appear_at_second: value.appear_at_second,
            pause_on_appear: value.pause_on_appear,
            auto_resume_after_seconds: value.auto_resume_after_seconds,
            label: value.label,
            position_x: value.position_x,
            position_y: value.position_y,
            target_record_ref,
            target_url,
        }
    }
}

/// Video record as stored by the content service, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawVideoRecord {
    #[serde(default)]
    pub id: String,
    #[serde(alias = "mainVideoUrl")]
    pub source_url: String,
    #[serde(default, alias = "thumbnailUrl", skip_serializing_if = "Option::is_none")]
    pub poster_url: Option<String>,
    #[serde(default)]
    pub branches: Vec<RawBranchPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One playable unit with its branch schedule.
///
/// Records are replaced wholesale, never mutated, while bound to an engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawVideoRecord", into = "RawVideoRecord")]
pub struct VideoRecord {
    id: RecordId,
    source_url: String,
    poster_url: Option<String>,
    branches: BranchSchedule,
    uploader_id: Option<String>,
    title: Option<String>,
    description: Option<String>,
}

impl VideoRecord {
    /// Validates an authored record, rejecting malformed branch points.
    pub fn from_raw(raw: RawVideoRecord) -> Result<Self> {
        let id = raw.id.trim().to_owned();
        if id.is_empty() {
            return Err(EngineError::InvalidRecord {
                record_id: raw.id,
                reason: String::from("id must not be empty"),
            });
        }
        let Some(source_url) = non_empty(Some(&raw.source_url)).map(str::to_owned) else {
            return Err(EngineError::InvalidRecord {
                record_id: id,
                reason: String::from("source url must not be empty"),
            });
        };

        let branches = raw
            .branches
            .into_iter()
            .enumerate()
            .map(|(index, branch)| BranchPoint::from_raw(index, branch))
            .collect::<Result<Vec<_>>>()
            .map_err(|error| EngineError::InvalidRecord {
                record_id: id.clone(),
                reason: error.to_string(),
            })?;

        Ok(Self {
            id,
            source_url,
            poster_url: non_empty(raw.poster_url.as_deref()).map(str::to_owned),
            branches: BranchSchedule::new(branches),
            uploader_id: raw.uploader_id,
            title: raw.title,
            description: raw.description,
        })
    }

    /// Builds the record played when a branch targets a bare media URL.
    ///
    /// The URL doubles as the record id; metadata is inherited from `parent`.
    pub fn from_direct_url(parent: &VideoRecord, url: &str) -> Result<Self> {
        Self::from_raw(RawVideoRecord {
            id: url.to_owned(),
            source_url: url.to_owned(),
            poster_url: None,
            branches: Vec::new(),
            uploader_id: parent.uploader_id.clone(),
            title: parent.title.clone(),
            description: parent.description.clone(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn poster_url(&self) -> Option<&str> {
        self.poster_url.as_deref()
    }

    pub fn branches(&self) -> &BranchSchedule {
        &self.branches
    }

    pub fn uploader_id(&self) -> Option<&str> {
        self.uploader_id.as_deref()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// In-app route used when sharing this record.
    pub fn share_path(&self) -> String {
        format!("/#/explore/{}", self.id)
    }
}

impl TryFrom<RawVideoRecord> for VideoRecord {
    type Error = EngineError;

    fn try_from(value: RawVideoRecord) -> Result<Self> {
        Self::from_raw(value)
    }
}

impl From<VideoRecord> for RawVideoRecord {
    fn from(value: VideoRecord) -> Self {
        Self {
            id: value.id,
            source_url: value.source_url,
            poster_url: value.poster_url,
            branches: value
                .branches
                .into_points()
                .into_iter()
                .map(RawBranchPoint::from)
                .collect(),
            uploader_id: value.uploader_id,
            title: value.title,
            description: value.description,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
