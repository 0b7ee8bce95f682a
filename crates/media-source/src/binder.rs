use tracing::{debug, info, warn};

use crate::adaptive::{AdaptiveRuntime, AdaptiveSession};
use crate::error::{MediaSourceError, Result};
use crate::source::{MediaSource, SourceKind};
use crate::surface::PlaybackSurface;

/// How a bound source reaches the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The surface loads the URL itself.
    Native,
    /// An adaptive session feeds the surface.
    Adaptive,
}

/// Load progress of the currently bound source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindState {
    Unbound,
    Loading,
    Ready,
    Failed,
}

/// Attaches sources to one exclusively owned playback surface.
///
/// At most one adaptive session is alive at a time: every rebind destroys the
/// previous session before anything new is attached, so two decode pipelines
/// never feed the same surface.
#[derive(Debug)]
pub struct SourceBinder<S, R>
where
    R: AdaptiveRuntime,
{
    surface: S,
    runtime: R,
    session: Option<R::Session>,
    source: Option<MediaSource>,
    state: BindState,
}

impl<S, R> SourceBinder<S, R>
where
    S: PlaybackSurface,
    R: AdaptiveRuntime,
{
    pub fn new(surface: S, runtime: R) -> Self {
        Self {
            surface,
            runtime,
            session: None,
            source: None,
            state: BindState::Unbound,
        }
    }

    /// Binds `url` to the surface, replacing whatever was bound before.
    ///
    /// On success the binder is `Loading` until [`SourceBinder::mark_ready`].
    /// On failure the binder is `Failed` and nothing is attached.
    pub fn bind(&mut self, url: &str) -> Result<Delivery> {
        self.teardown_session();
        self.source = None;

        let source = match MediaSource::parse(url) {
            Ok(source) => source,
            Err(error) => {
                self.state = BindState::Failed;
                return Err(error);
            }
        };

        let delivery = match self.attach(&source) {
            Ok(delivery) => delivery,
            Err(error) => {
                warn!(url = source.as_str(), %error, "source bind failed");
                self.state = BindState::Failed;
                return Err(error);
            }
        };

        info!(url = source.as_str(), ?delivery, "source bound");
        self.source = Some(source);
        self.state = BindState::Loading;
        Ok(delivery)
    }

    fn attach(&mut self, source: &MediaSource) -> Result<Delivery> {
        match source.kind() {
            SourceKind::AdaptiveManifest if self.runtime.is_supported() => {
                let session = self.runtime.attach(source.url(), &mut self.surface)?;
                self.session = Some(session);
                Ok(Delivery::Adaptive)
            }
            SourceKind::AdaptiveManifest if self.surface.plays_manifests_natively() => {
                self.surface.set_source(source.url());
                Ok(Delivery::Native)
            }
            SourceKind::AdaptiveManifest => Err(MediaSourceError::UnsupportedSource {
                url: source.as_str().to_owned(),
            }),
            SourceKind::Progressive => {
                self.surface.set_source(source.url());
                Ok(Delivery::Native)
            }
        }
    }

    /// Records that the surface can play through. Returns true when this
    /// completes a pending load.
    pub fn mark_ready(&mut self) -> bool {
        if self.state == BindState::Loading {
            self.state = BindState::Ready;
            return true;
        }
        false
    }

    /// Records a fatal stream failure and releases the adaptive session.
    pub fn mark_failed(&mut self) {
        if self.state == BindState::Unbound {
            return;
        }
        self.teardown_session();
        self.state = BindState::Failed;
    }

    /// Detaches everything from the surface.
    pub fn unbind(&mut self) {
        self.teardown_session();
        if self.source.take().is_some() {
            self.surface.clear_source();
        }
        self.state = BindState::Unbound;
    }

    pub fn state(&self) -> BindState {
        self.state
    }

    pub fn source(&self) -> Option<&MediaSource> {
        self.source.as_ref()
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    fn teardown_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.destroy();
            debug!("adaptive session destroyed");
        }
    }
}

impl<S, R> Drop for SourceBinder<S, R>
where
    R: AdaptiveRuntime,
{
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.destroy();
        }
    }
}
