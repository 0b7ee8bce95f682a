use url::Url;

use crate::error::{MediaSourceError, Result};
use crate::surface::PlaybackSurface;

/// One live adaptive-streaming pipeline attached to a surface.
pub trait AdaptiveSession {
    /// Stops loading and detaches from the surface. Must be called before a
    /// replacement session is attached to the same surface.
    fn destroy(&mut self);
}

/// Factory for adaptive-streaming sessions.
pub trait AdaptiveRuntime {
    type Session: AdaptiveSession;

    /// Returns true when this runtime can drive manifests on this platform.
    fn is_supported(&self) -> bool;

    /// Loads `manifest` and attaches the resulting session to `surface`.
    fn attach(
        &mut self,
        manifest: &Url,
        surface: &mut dyn PlaybackSurface,
    ) -> Result<Self::Session>;
}

/// Runtime for platforms without adaptive-streaming support.
///
/// Manifests then fall back to native surface playback when available.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAdaptiveRuntime;

/// Session type of [`NoAdaptiveRuntime`]; it can never be constructed.
#[derive(Debug)]
pub enum NoSession {}

impl AdaptiveSession for NoSession {
    fn destroy(&mut self) {
        match *self {}
    }
}

impl AdaptiveRuntime for NoAdaptiveRuntime {
    type Session = NoSession;

    fn is_supported(&self) -> bool {
        false
    }

    fn attach(
        &mut self,
        manifest: &Url,
        _surface: &mut dyn PlaybackSurface,
    ) -> Result<Self::Session> {
        Err(MediaSourceError::SessionCreate {
            url: manifest.to_string(),
            reason: "adaptive streaming is not supported".to_owned(),
        })
    }
}
