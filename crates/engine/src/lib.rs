//! UI-agnostic branching playback engine for the Replaygram feed.

pub mod api;
pub mod cdn;
pub mod config;
pub mod engagement;
pub mod error;
pub mod feed;
pub mod observer;
pub mod provider;
pub mod record;
pub mod schedule;
pub mod session;
pub mod time;
pub mod timers;
pub mod visibility;

pub use api::{
    Command, Engine, EngineErrorEvent, EngineErrorKind, Event, PauseReason, PlayerSnapshot,
    PlayerState, PromptView, RecordSummary,
};
pub use config::EngineConfig;
pub use engagement::{EngagementSink, InMemoryEngagement, format_view_count};
pub use error::{EngineError, Result};
pub use feed::{Feed, FeedCommand, FeedEvent};
pub use observer::SubscriptionId;
pub use provider::{CatalogFile, CatalogProvider, FeedDataProvider};
pub use record::{BranchPoint, BranchTarget, RawBranchPoint, RawVideoRecord, RecordId, VideoRecord};
pub use schedule::BranchSchedule;
pub use session::{FeedSession, MuteHandle, Services};
pub use visibility::{FeedLayout, VisibilitySensor};
