use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use url::Url;

use crate::adaptive::{AdaptiveRuntime, AdaptiveSession};
use crate::error::{MediaSourceError, Result};
use crate::surface::PlaybackSurface;

const DEFAULT_CLIP_SECONDS: f64 = 10.0;

/// One call observed by a [`HeadlessSurface`].
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceCall {
    SetSource(String),
    ClearSource,
    Play,
    Pause,
    Seek(f64),
    SetMuted(bool),
}

#[derive(Debug)]
struct HeadlessState {
    source: Option<String>,
    paused: bool,
    position: f64,
    clip_seconds: f64,
    muted: bool,
    autoplay_allowed: bool,
    native_manifests: bool,
    calls: Vec<SurfaceCall>,
}

/// Surface without any decoder: it only tracks the playhead.
///
/// Clones share state, so a driver can keep a handle to advance playback while
/// the engine owns the bound copy. Playback loops at the clip length like a
/// feed video element with `loop` set.
#[derive(Debug, Clone)]
pub struct HeadlessSurface {
    state: Arc<Mutex<HeadlessState>>,
}

impl Default for HeadlessSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessSurface {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HeadlessState {
                source: None,
                paused: true,
                position: 0.0,
                clip_seconds: DEFAULT_CLIP_SECONDS,
                muted: false,
                autoplay_allowed: true,
                native_manifests: false,
                calls: Vec::new(),
            })),
        }
    }

    /// Sets the clip length the playhead wraps at.
    pub fn with_clip_seconds(self, seconds: f64) -> Self {
        self.lock().clip_seconds = seconds.max(f64::EPSILON);
        self
    }

    pub fn with_native_manifests(self, native: bool) -> Self {
        self.lock().native_manifests = native;
        self
    }

    /// When false, every `play` request is refused like a blocked autoplay.
    pub fn set_autoplay_allowed(&self, allowed: bool) {
        self.lock().autoplay_allowed = allowed;
    }

    /// Advances the playhead by `elapsed` when playing and returns the new
    /// position. Returns `None` while paused or unbound.
    pub fn advance(&self, elapsed: Duration) -> Option<f64> {
        let mut state = self.lock();
        if state.paused || state.source.is_none() {
            return None;
        }
        let mut position = state.position + elapsed.as_secs_f64();
        while position >= state.clip_seconds {
            position -= state.clip_seconds;
        }
        state.position = position;
        Some(position)
    }

    pub fn source(&self) -> Option<String> {
        self.lock().source.clone()
    }

    pub fn position(&self) -> f64 {
        self.lock().position
    }

    pub fn muted(&self) -> bool {
        self.lock().muted
    }

    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn lock(&self) -> MutexGuard<'_, HeadlessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PlaybackSurface for HeadlessSurface {
    fn set_source(&mut self, url: &Url) {
        let mut state = self.lock();
        state.calls.push(SurfaceCall::SetSource(url.to_string()));
        state.source = Some(url.to_string());
        state.position = 0.0;
        state.paused = true;
    }

    fn clear_source(&mut self) {
        let mut state = self.lock();
        state.calls.push(SurfaceCall::ClearSource);
        state.source = None;
        state.paused = true;
    }

    fn plays_manifests_natively(&self) -> bool {
        self.lock().native_manifests
    }

    fn play(&mut self) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(SurfaceCall::Play);
        if !state.autoplay_allowed {
            return Err(MediaSourceError::PlaybackRejected {
                reason: "autoplay is not allowed".to_owned(),
            });
        }
        state.paused = false;
        Ok(())
    }

    fn pause(&mut self) {
        let mut state = self.lock();
        state.calls.push(SurfaceCall::Pause);
        state.paused = true;
    }

    fn is_paused(&self) -> bool {
        self.lock().paused
    }

    fn seek(&mut self, seconds: f64) {
        let mut state = self.lock();
        state.calls.push(SurfaceCall::Seek(seconds));
        state.position = seconds.max(0.0);
    }

    fn set_muted(&mut self, muted: bool) {
        let mut state = self.lock();
        state.calls.push(SurfaceCall::SetMuted(muted));
        state.muted = muted;
    }
}

#[derive(Debug, Default)]
struct RuntimeLog {
    attached: Vec<String>,
    live: usize,
    destroyed: usize,
}

/// Adaptive runtime that attaches sessions without fetching anything.
///
/// The manifest URL is handed to the surface as its source so the headless
/// playhead can run. Clones share the session log.
#[derive(Debug, Clone)]
pub struct HeadlessHlsRuntime {
    supported: bool,
    fail_attach: bool,
    log: Arc<Mutex<RuntimeLog>>,
}

impl Default for HeadlessHlsRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessHlsRuntime {
    pub fn new() -> Self {
        Self {
            supported: true,
            fail_attach: false,
            log: Arc::new(Mutex::new(RuntimeLog::default())),
        }
    }

    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    /// Makes every `attach` fail as a fatal manifest error.
    pub fn failing() -> Self {
        Self {
            fail_attach: true,
            ..Self::new()
        }
    }

    /// Number of sessions attached and not yet destroyed.
    pub fn live_sessions(&self) -> usize {
        self.lock().live
    }

    pub fn destroyed_sessions(&self) -> usize {
        self.lock().destroyed
    }

    pub fn attached_manifests(&self) -> Vec<String> {
        self.lock().attached.clone()
    }

    fn lock(&self) -> MutexGuard<'_, RuntimeLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Session handed out by [`HeadlessHlsRuntime`].
#[derive(Debug)]
pub struct HeadlessSession {
    log: Arc<Mutex<RuntimeLog>>,
    destroyed: bool,
}

impl AdaptiveSession for HeadlessSession {
    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        log.live = log.live.saturating_sub(1);
        log.destroyed += 1;
    }
}

impl AdaptiveRuntime for HeadlessHlsRuntime {
    type Session = HeadlessSession;

    fn is_supported(&self) -> bool {
        self.supported
    }

    fn attach(
        &mut self,
        manifest: &Url,
        surface: &mut dyn PlaybackSurface,
    ) -> Result<Self::Session> {
        if self.fail_attach {
            return Err(MediaSourceError::SessionCreate {
                url: manifest.to_string(),
                reason: "manifest load failed".to_owned(),
            });
        }
        surface.set_source(manifest);
        let mut log = self.lock();
        log.attached.push(manifest.to_string());
        log.live += 1;
        Ok(HeadlessSession {
            log: Arc::clone(&self.log),
            destroyed: false,
        })
    }
}
