use std::time::Duration;

use media_source::{AdaptiveRuntime, PlaybackSurface, SourceBinder};
use tracing::{info, warn};

use crate::api::{Command, Engine, EngineErrorEvent, Event, PlayerSnapshot};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::record::RecordId;
use crate::session::{FeedSession, Services};
use crate::visibility::FeedLayout;

/// Commands accepted by a [`Feed`].
#[derive(Debug, Clone, PartialEq)]
pub enum FeedCommand {
    /// Forwards `command` to the item at `index`.
    Item { index: usize, command: Command },
    ScrollTo { offset: f64 },
    /// Snaps item `index` into full view.
    ScrollToItem { index: usize },
    SetMuted { muted: bool },
    Tick { now: Duration },
    Close,
}

/// An engine event tagged with the item that emitted it.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEvent {
    pub index: usize,
    pub event: Event,
}

/// Vertical snap feed of independent branching players.
///
/// Items share only the session (mute flag and viewer). A failure inside one
/// item is reported as that item's [`Event::Error`] and never reaches its
/// siblings.
#[derive(Debug)]
pub struct Feed<S, R>
where
    R: AdaptiveRuntime,
{
    entries: Vec<RecordId>,
    engines: Vec<Engine<S, R>>,
    layout: FeedLayout,
    session: FeedSession,
    scroll_offset: f64,
}

impl<S, R> Feed<S, R>
where
    S: PlaybackSurface,
    R: AdaptiveRuntime,
{
    /// Lists entry points, mounts one engine per entry and loads it, then
    /// scrolls to the top so the first item becomes active.
    ///
    /// `make_binder` is called once per entry with its index and id.
    pub fn open(
        services: Services,
        session: FeedSession,
        config: &EngineConfig,
        layout: FeedLayout,
        mut make_binder: impl FnMut(usize, &str) -> SourceBinder<S, R>,
    ) -> Result<(Self, Vec<FeedEvent>)> {
        let entries = services.provider.list_entry_points()?;
        info!(entries = entries.len(), "opening feed");

        let engines = entries
            .iter()
            .enumerate()
            .map(|(index, record_id)| {
                Engine::new(
                    make_binder(index, record_id),
                    services.clone(),
                    session.clone(),
                    config,
                )
            })
            .collect();
        let mut feed = Self {
            entries,
            engines,
            layout,
            session,
            scroll_offset: 0.0,
        };

        let mut events = Vec::new();
        for index in 0..feed.engines.len() {
            let record_ref = feed.entries[index].clone();
            feed.forward(index, Command::Load { record_ref }, &mut events);
        }
        feed.scroll_to(0.0, &mut events);
        Ok((feed, events))
    }

    pub fn handle_command(&mut self, command: FeedCommand) -> Result<Vec<FeedEvent>> {
        let mut events = Vec::new();
        match command {
            FeedCommand::Item { index, command } => {
                let engine = self.engine_mut(index)?;
                events.extend(
                    engine
                        .handle_command(command)?
                        .into_iter()
                        .map(|event| FeedEvent { index, event }),
                );
            }
            FeedCommand::ScrollTo { offset } => self.scroll_to(offset, &mut events),
            FeedCommand::ScrollToItem { index } => {
                self.engine(index)?;
                let offset = self.layout.offset_of(index);
                self.scroll_to(offset, &mut events);
            }
            FeedCommand::SetMuted { muted } => {
                self.session.mute().set(muted);
                for index in 0..self.engines.len() {
                    self.forward(index, Command::SyncMute, &mut events);
                }
            }
            FeedCommand::Tick { now } => {
                for index in 0..self.engines.len() {
                    self.forward(index, Command::Tick { now }, &mut events);
                }
            }
            FeedCommand::Close => {
                info!(items = self.engines.len(), "closing feed");
                for index in 0..self.engines.len() {
                    self.forward(index, Command::Unmount, &mut events);
                }
            }
        }
        Ok(events)
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    pub fn entries(&self) -> &[RecordId] {
        &self.entries
    }

    pub fn scroll_offset(&self) -> f64 {
        self.scroll_offset
    }

    pub fn layout(&self) -> FeedLayout {
        self.layout
    }

    pub fn session(&self) -> &FeedSession {
        &self.session
    }

    /// Index of the item currently authorized to play.
    pub fn active_index(&self) -> Option<usize> {
        self.engines.iter().position(Engine::is_active)
    }

    pub fn engine(&self, index: usize) -> Result<&Engine<S, R>> {
        let len = self.engines.len();
        self.engines
            .get(index)
            .ok_or(EngineError::ItemIndexOutOfRange { index, len })
    }

    pub fn engine_mut(&mut self, index: usize) -> Result<&mut Engine<S, R>> {
        let len = self.engines.len();
        self.engines
            .get_mut(index)
            .ok_or(EngineError::ItemIndexOutOfRange { index, len })
    }

    pub fn snapshots(&self) -> Vec<PlayerSnapshot> {
        self.engines.iter().map(Engine::snapshot).collect()
    }

    /// Feeds every item its intersection ratio at `offset`. Items leaving
    /// the viewport are processed before the one entering it, so two items
    /// never play at once.
    fn scroll_to(&mut self, offset: f64, events: &mut Vec<FeedEvent>) {
        self.scroll_offset = offset;
        let ratios: Vec<(usize, f64)> = (0..self.engines.len())
            .map(|index| (index, self.layout.ratio(index, offset)))
            .collect();
        let (entering, leaving): (Vec<_>, Vec<_>) =
            ratios.into_iter().partition(|(index, ratio)| {
                *ratio > 0.0 && *ratio >= self.engines[*index].visibility_threshold()
            });

        for (index, ratio) in leaving.into_iter().chain(entering) {
            self.forward(index, Command::IntersectionChanged { ratio }, events);
        }
    }

    /// Runs one command against one item, containing any failure.
    fn forward(&mut self, index: usize, command: Command, events: &mut Vec<FeedEvent>) {
        let Some(engine) = self.engines.get_mut(index) else {
            return;
        };
        match engine.handle_command(command) {
            Ok(emitted) => {
                events.extend(emitted.into_iter().map(|event| FeedEvent { index, event }));
            }
            Err(error) => {
                warn!(index, %error, "feed item command failed");
                events.push(FeedEvent {
                    index,
                    event: Event::Error(EngineErrorEvent::from_error(&error)),
                });
            }
        }
    }
}
