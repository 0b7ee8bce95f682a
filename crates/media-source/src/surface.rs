use url::Url;

use crate::error::Result;

/// Playback element a source is bound to.
///
/// Implementations wrap whatever actually decodes and presents frames. All
/// calls happen on the owning engine's event loop.
pub trait PlaybackSurface {
    /// Points the surface at a progressive (or natively supported) source and
    /// starts loading it.
    fn set_source(&mut self, url: &Url);

    /// Detaches any source. The last presented frame may remain visible.
    fn clear_source(&mut self);

    /// Returns true when the surface decodes adaptive manifests by itself.
    fn plays_manifests_natively(&self) -> bool;

    /// Requests playback. An `Err` means the runtime refused to start
    /// (autoplay policy), which callers treat as a paused state.
    fn play(&mut self) -> Result<()>;

    fn pause(&mut self);

    fn is_paused(&self) -> bool;

    /// Moves the playhead to `seconds` from the start.
    fn seek(&mut self, seconds: f64);

    fn set_muted(&mut self, muted: bool);
}
