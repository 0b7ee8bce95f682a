//! Binds media sources to playback surfaces for the Replaygram feed.

mod adaptive;
mod binder;
mod error;
mod headless;
mod source;
mod surface;

pub use adaptive::{AdaptiveRuntime, AdaptiveSession, NoAdaptiveRuntime, NoSession};
pub use binder::{BindState, Delivery, SourceBinder};
pub use error::{MediaSourceError, Result};
pub use headless::{HeadlessHlsRuntime, HeadlessSession, HeadlessSurface, SurfaceCall};
pub use source::{MediaSource, SourceKind};
pub use surface::PlaybackSurface;
pub use url::Url;
