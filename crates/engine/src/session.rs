use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::engagement::EngagementSink;
use crate::provider::FeedDataProvider;

/// Feed-wide mute flag.
///
/// Clones share one flag. Starts muted, since runtimes only autoplay muted
/// media.
#[derive(Debug, Clone)]
pub struct MuteHandle(Arc<AtomicBool>);

impl Default for MuteHandle {
    fn default() -> Self {
        Self::new(true)
    }
}

impl MuteHandle {
    pub fn new(muted: bool) -> Self {
        Self(Arc::new(AtomicBool::new(muted)))
    }

    pub fn is_muted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, muted: bool) {
        self.0.store(muted, Ordering::Release);
    }
}

/// State shared by every item of one feed session.
#[derive(Debug, Clone, Default)]
pub struct FeedSession {
    mute: MuteHandle,
    viewer: Option<String>,
}

impl FeedSession {
    pub fn new(mute: MuteHandle, viewer: Option<String>) -> Self {
        Self { mute, viewer }
    }

    /// Session for a signed-in viewer.
    pub fn signed_in(viewer: impl Into<String>) -> Self {
        Self {
            viewer: Some(viewer.into()),
            ..Self::default()
        }
    }

    pub fn mute(&self) -> &MuteHandle {
        &self.mute
    }

    pub fn viewer(&self) -> Option<&str> {
        self.viewer.as_deref()
    }
}

/// External collaborators an engine calls into.
#[derive(Clone)]
pub struct Services {
    pub provider: Arc<dyn FeedDataProvider>,
    pub engagement: Arc<dyn EngagementSink>,
}

impl Services {
    pub fn new(
        provider: Arc<dyn FeedDataProvider>,
        engagement: Arc<dyn EngagementSink>,
    ) -> Self {
        Self {
            provider,
            engagement,
        }
    }
}

impl Debug for Services {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}
