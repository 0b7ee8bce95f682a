use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter};
use std::time::Duration;

use media_source::{AdaptiveRuntime, BindState, Delivery, PlaybackSurface, SourceBinder};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::observer::{SubscriptionId, Subscribers};
use crate::record::{BranchTarget, RecordId, VideoRecord};
use crate::session::{FeedSession, Services};
use crate::time::{FireWindow, micros_to_seconds, seconds_to_micros};
use crate::timers::{TimerAction, TimerKey, TimerQueue};
use crate::visibility::VisibilitySensor;

/// Commands accepted by one feed item's engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Fetches the item's entry record and binds it.
    Load {
        record_ref: String,
    },
    /// Repeats the last failed load, bind or branch fetch.
    Retry,
    /// Intersection ratio of the item's container, fed to the visibility
    /// sensor.
    IntersectionChanged {
        ratio: f64,
    },
    /// Overrides the visibility sensor.
    SetActive {
        active: bool,
    },
    /// The surface can play through the bound source.
    SurfaceReady,
    /// The surface stalled waiting for data.
    SurfaceWaiting,
    /// The bound source failed fatally.
    SurfaceError {
        message: String,
    },
    /// Position sample pushed by the surface at wall-clock `now`.
    ///
    /// Advances the clock like `Tick` before branches are evaluated, so prompt
    /// deadlines count from the sample that fired them.
    TimeUpdate {
        position_seconds: f64,
        now: Duration,
    },
    /// Wall clock advanced to `now`; runs due prompt timers.
    Tick {
        now: Duration,
    },
    /// Viewer tapped the surface.
    TogglePlay,
    /// Viewer picked the branch at `index` of the current record.
    ///
    /// # Example
    /// ```ignore
    /// use engine::Command;
    ///
    /// let events = engine.handle_command(Command::SelectBranch { index: 0 })?;
    /// ```
    SelectBranch {
        index: usize,
    },
    /// Viewer backed out of a failed branch.
    DismissError,
    /// The session mute handle changed; re-applies it to this item's surface.
    ///
    /// The handle is written by the feed, never by a single item.
    SyncMute,
    ToggleLike,
    Unmount,
}

/// Why playback is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    User,
    Branch,
    /// The runtime refused to start playback; the viewer must tap.
    AutoplayBlocked,
    /// The item scrolled out of view.
    Inactive,
}

/// Per-item playback state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerState {
    /// No record bound.
    Idle,
    /// Idle after a fatal load or bind failure, with a retry affordance.
    Errored { message: String },
    Loading,
    Playing,
    Paused(PauseReason),
    Unmounted,
}

impl PlayerState {
    pub fn is_playing(&self) -> bool {
        matches!(self, Self::Playing)
    }
}

/// A prompt currently on screen.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptView {
    pub branch_index: usize,
    pub label: String,
    pub position_x: f64,
    pub position_y: f64,
    pub pauses_playback: bool,
}

/// Events emitted by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    StateChanged(PlayerState),
    ActiveChanged {
        active: bool,
    },
    RecordBound {
        record_id: RecordId,
        source_url: String,
        delivery: Delivery,
    },
    PromptShown(PromptView),
    PromptHidden {
        branch_index: usize,
    },
    /// A backward jump cleared every fired branch.
    BranchesRearmed,
    /// Deactivation rewound the item to the start.
    PositionReset,
    BranchLoadFailed {
        message: String,
    },
    NoticeCleared,
    BufferingChanged {
        buffering: bool,
    },
    MuteChanged {
        muted: bool,
    },
    LikeChanged {
        liked: bool,
    },
    ViewRecorded {
        record_id: RecordId,
    },
    LoginRequired,
    Error(EngineErrorEvent),
}

/// Coarse classification of an [`EngineError`] for UI display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    NoRecordBound,
    RecordNotFound,
    InvalidCommand,
    InvalidData,
    Media,
    Other,
}

impl From<&EngineError> for EngineErrorKind {
    fn from(value: &EngineError) -> Self {
        match value {
            EngineError::NoRecordBound => Self::NoRecordBound,
            EngineError::RecordNotFound { .. } => Self::RecordNotFound,
            EngineError::BranchIndexOutOfRange { .. } | EngineError::ItemIndexOutOfRange { .. } => {
                Self::InvalidCommand
            }
            EngineError::InvalidRecord { .. }
            | EngineError::InvalidBranch { .. }
            | EngineError::InvalidUrl { .. }
            | EngineError::InvalidConfig { .. }
            | EngineError::Serialization { .. } => Self::InvalidData,
            EngineError::Media(_) => Self::Media,
            _ => Self::Other,
        }
    }
}

/// User-facing error payload emitted as an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineErrorEvent {
    pub kind: EngineErrorKind,
    pub message: String,
}

impl EngineErrorEvent {
    pub fn from_error(error: &EngineError) -> Self {
        Self {
            kind: EngineErrorKind::from(error),
            message: error.to_string(),
        }
    }
}

/// Display metadata of the bound record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSummary {
    pub id: RecordId,
    pub source_url: String,
    pub poster_url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub uploader_id: Option<String>,
    pub branch_count: usize,
    pub share_path: String,
}

impl RecordSummary {
    fn from_record(record: &VideoRecord) -> Self {
        Self {
            id: record.id().to_owned(),
            source_url: record.source_url().to_owned(),
            poster_url: record.poster_url().map(str::to_owned),
            title: record.title().map(str::to_owned),
            description: record.description().map(str::to_owned),
            uploader_id: record.uploader_id().map(str::to_owned),
            branch_count: record.branches().len(),
            share_path: record.share_path(),
        }
    }
}

/// Immutable view of one item, enough to render it.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSnapshot {
    pub state: PlayerState,
    pub record: Option<RecordSummary>,
    pub prompts: Vec<PromptView>,
    pub active: bool,
    pub buffering: bool,
    pub muted: bool,
    pub liked: bool,
    pub position_seconds: f64,
    pub notice: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RetryAction {
    Load(String),
    Rebind,
    SelectBranch(usize),
}

/// Branching playback state machine for one feed item.
///
/// Owns its surface through the binder. Every transition runs inside
/// [`Engine::handle_command`]; subscribers see each emitted event in order.
pub struct Engine<S, R>
where
    R: AdaptiveRuntime,
{
    binder: SourceBinder<S, R>,
    services: Services,
    session: FeedSession,
    fire_window: FireWindow,
    prompt_dwell: Duration,
    count_views: bool,
    sensor: VisibilitySensor,
    state: PlayerState,
    record: Option<VideoRecord>,
    fired: BTreeSet<usize>,
    visible: BTreeSet<usize>,
    last_position_us: i64,
    active: bool,
    buffering: bool,
    timers: TimerQueue,
    clock: Duration,
    view_counted: bool,
    liked: bool,
    retry: Option<RetryAction>,
    branch_failure: Option<String>,
    subscribers: Subscribers<Event>,
}

impl<S, R> Debug for Engine<S, R>
where
    R: AdaptiveRuntime,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state)
            .field("record", &self.record.as_ref().map(VideoRecord::id))
            .field("active", &self.active)
            .field("fired", &self.fired)
            .field("visible", &self.visible)
            .field("last_position_us", &self.last_position_us)
            .field("pending_timers", &self.timers.len())
            .finish_non_exhaustive()
    }
}

impl<S, R> Engine<S, R>
where
    S: PlaybackSurface,
    R: AdaptiveRuntime,
{
    /// Creates an idle engine that owns `binder` and observes visibility.
    pub fn new(
        binder: SourceBinder<S, R>,
        services: Services,
        session: FeedSession,
        config: &EngineConfig,
    ) -> Self {
        let mut sensor = VisibilitySensor::new(config.visibility_threshold);
        sensor.observe();
        Self {
            binder,
            services,
            session,
            fire_window: config.fire_window(),
            prompt_dwell: config.prompt_dwell(),
            count_views: config.count_views,
            sensor,
            state: PlayerState::Idle,
            record: None,
            fired: BTreeSet::new(),
            visible: BTreeSet::new(),
            last_position_us: 0,
            active: false,
            buffering: false,
            timers: TimerQueue::new(),
            clock: Duration::ZERO,
            view_counted: false,
            liked: false,
            retry: None,
            branch_failure: None,
            subscribers: Subscribers::new(),
        }
    }

    /// Applies one command and returns emitted events.
    ///
    /// Load, bind and branch-fetch failures are reported as events and
    /// states. `Err` means the command itself was invalid.
    pub fn handle_command(&mut self, command: Command) -> Result<Vec<Event>> {
        if self.state == PlayerState::Unmounted {
            debug!(?command, "command ignored after unmount");
            return Ok(Vec::new());
        }

        let mut events = Vec::new();
        match command {
            Command::Load { record_ref } => self.load(record_ref, &mut events),
            Command::Retry => self.retry(&mut events)?,
            Command::IntersectionChanged { ratio } => {
                if let Some(visible) = self.sensor.update(ratio) {
                    self.set_active(visible, &mut events);
                }
            }
            Command::SetActive { active } => self.set_active(active, &mut events),
            Command::SurfaceReady => self.surface_ready(&mut events),
            Command::SurfaceWaiting => self.surface_waiting(&mut events),
            Command::SurfaceError { message } => self.surface_error(message, &mut events),
            Command::TimeUpdate {
                position_seconds,
                now,
            } => {
                self.tick(now, &mut events);
                self.sample_position(position_seconds, &mut events);
            }
            Command::Tick { now } => self.tick(now, &mut events),
            Command::TogglePlay => self.toggle_play(&mut events),
            Command::SelectBranch { index } => self.select_branch(index, &mut events)?,
            Command::DismissError => self.dismiss_error(&mut events),
            Command::SyncMute => self.sync_mute(&mut events),
            Command::ToggleLike => self.toggle_like(&mut events)?,
            Command::Unmount => self.unmount(&mut events),
        }

        for event in &events {
            self.subscribers.notify(event);
        }
        Ok(events)
    }

    pub fn subscribe(&mut self, observer: impl FnMut(&Event) + Send + 'static) -> SubscriptionId {
        self.subscribers.subscribe(observer)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            state: self.state.clone(),
            record: self.record.as_ref().map(RecordSummary::from_record),
            prompts: self
                .visible
                .iter()
                .filter_map(|index| self.prompt_view(*index))
                .collect(),
            active: self.active,
            buffering: self.buffering,
            muted: self.session.mute().is_muted(),
            liked: self.liked,
            position_seconds: micros_to_seconds(self.last_position_us),
            notice: self.branch_failure.clone(),
        }
    }

    pub fn state(&self) -> &PlayerState {
        &self.state
    }

    pub fn record(&self) -> Option<&VideoRecord> {
        self.record.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_buffering(&self) -> bool {
        self.buffering
    }

    pub fn is_liked(&self) -> bool {
        self.liked
    }

    pub fn fired_branches(&self) -> &BTreeSet<usize> {
        &self.fired
    }

    pub fn visible_branches(&self) -> &BTreeSet<usize> {
        &self.visible
    }

    pub fn last_position_seconds(&self) -> f64 {
        micros_to_seconds(self.last_position_us)
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn next_timer_deadline(&self) -> Option<Duration> {
        self.timers.next_deadline()
    }

    pub fn visibility_threshold(&self) -> f64 {
        self.sensor.threshold()
    }

    pub fn binder(&self) -> &SourceBinder<S, R> {
        &self.binder
    }

    pub fn surface(&self) -> &S {
        self.binder.surface()
    }

    fn load(&mut self, record_ref: String, events: &mut Vec<Event>) {
        match self.services.provider.get_record(&record_ref) {
            Ok(record) => self.bind_record(record, events),
            Err(error) => {
                warn!(record_ref = %record_ref, %error, "record load failed");
                self.retry = Some(RetryAction::Load(record_ref));
                self.set_state(
                    PlayerState::Errored {
                        message: error.to_string(),
                    },
                    events,
                );
            }
        }
    }

    fn retry(&mut self, events: &mut Vec<Event>) -> Result<()> {
        let Some(action) = self.retry.take() else {
            debug!("nothing to retry");
            return Ok(());
        };
        info!(?action, "retrying");
        match action {
            RetryAction::Load(record_ref) => self.load(record_ref, events),
            RetryAction::Rebind => {
                let record = self.record.take().ok_or(EngineError::NoRecordBound)?;
                self.bind_record(record, events);
            }
            RetryAction::SelectBranch(index) => self.select_branch(index, events)?,
        }
        Ok(())
    }

    /// Swaps in `record`, clearing every piece of per-record state first.
    fn bind_record(&mut self, record: VideoRecord, events: &mut Vec<Event>) {
        let cancelled = self.timers.clear();
        self.hide_all_prompts(events);
        self.fired.clear();
        self.last_position_us = 0;
        self.retry = None;
        self.view_counted = false;
        if self.branch_failure.take().is_some() {
            events.push(Event::NoticeCleared);
        }
        if self.buffering {
            self.buffering = false;
            events.push(Event::BufferingChanged { buffering: false });
        }

        let record_id = record.id().to_owned();
        let source_url = record.source_url().to_owned();
        let bound = self.binder.bind(&source_url);
        self.record = Some(record);

        match bound {
            Ok(delivery) => {
                info!(
                    record_id = %record_id,
                    ?delivery,
                    cancelled_timers = cancelled,
                    "record bound"
                );
                let muted = self.session.mute().is_muted();
                self.binder.surface_mut().set_muted(muted);
                events.push(Event::RecordBound {
                    record_id,
                    source_url,
                    delivery,
                });
                self.set_state(PlayerState::Loading, events);
                if self.active {
                    self.count_view(events);
                }
            }
            Err(error) => {
                warn!(record_id = %record_id, %error, "source bind failed");
                self.retry = Some(RetryAction::Rebind);
                self.set_state(
                    PlayerState::Errored {
                        message: error.to_string(),
                    },
                    events,
                );
            }
        }

        self.refresh_liked(events);
    }

    fn set_active(&mut self, active: bool, events: &mut Vec<Event>) {
        if self.active == active {
            return;
        }
        self.active = active;
        events.push(Event::ActiveChanged { active });

        if active {
            if self.record.is_some() && !matches!(self.state, PlayerState::Errored { .. }) {
                self.count_view(events);
            }
            if self.binder.state() == BindState::Ready {
                self.start_playback(events);
            }
            return;
        }

        self.view_counted = false;
        self.timers.clear();
        self.hide_all_prompts(events);
        self.fired.clear();
        self.last_position_us = 0;
        if self.record.is_some() {
            let surface = self.binder.surface_mut();
            surface.pause();
            surface.seek(0.0);
            events.push(Event::PositionReset);
        }
        if matches!(self.state, PlayerState::Playing | PlayerState::Paused(_)) {
            self.set_state(PlayerState::Paused(PauseReason::Inactive), events);
        }
    }

    fn surface_ready(&mut self, events: &mut Vec<Event>) {
        if self.buffering {
            self.buffering = false;
            events.push(Event::BufferingChanged { buffering: false });
        }
        if !self.binder.mark_ready() {
            return;
        }
        if self.active {
            self.start_playback(events);
        } else {
            self.set_state(PlayerState::Paused(PauseReason::Inactive), events);
        }
    }

    fn surface_waiting(&mut self, events: &mut Vec<Event>) {
        if self.buffering || !matches!(self.state, PlayerState::Playing | PlayerState::Paused(_)) {
            return;
        }
        self.buffering = true;
        events.push(Event::BufferingChanged { buffering: true });
    }

    fn surface_error(&mut self, message: String, events: &mut Vec<Event>) {
        if self.record.is_none() {
            return;
        }
        warn!(%message, "source failed");
        self.binder.mark_failed();
        self.timers.clear();
        self.hide_all_prompts(events);
        if self.buffering {
            self.buffering = false;
            events.push(Event::BufferingChanged { buffering: false });
        }
        self.retry = Some(RetryAction::Rebind);
        self.set_state(PlayerState::Errored { message }, events);
    }

    fn sample_position(&mut self, position_seconds: f64, events: &mut Vec<Event>) {
        if self.record.is_none() || self.binder.state() == BindState::Failed {
            return;
        }
        let position_us = seconds_to_micros(position_seconds);
        if position_us < self.last_position_us {
            debug!(
                from_us = self.last_position_us,
                to_us = position_us,
                "backward jump; re-arming branches"
            );
            self.timers.clear();
            self.hide_all_prompts(events);
            self.fired.clear();
            events.push(Event::BranchesRearmed);
        }
        self.last_position_us = position_us;

        if !self.active {
            return;
        }
        let Some(record) = self.record.as_ref() else {
            return;
        };
        let due = record
            .branches()
            .eligible_at(position_us, self.fire_window, &self.fired);
        for index in due {
            self.fire_branch(index, position_us, events);
        }
    }

    fn fire_branch(&mut self, index: usize, position_us: i64, events: &mut Vec<Event>) {
        let Some(record) = self.record.as_ref() else {
            return;
        };
        let Some(branch) = record.branches().get(index) else {
            return;
        };
        let key = TimerKey::new(record.id(), index);
        let pauses = branch.pause_on_appear();
        let resume_after = branch.auto_resume_after();
        let Some(view) = self.prompt_view(index) else {
            return;
        };

        info!(
            record_id = %key.record_id,
            branch_index = index,
            position_us,
            pauses,
            "branch fired"
        );
        self.fired.insert(index);
        self.visible.insert(index);
        events.push(Event::PromptShown(view));

        if pauses {
            self.binder.surface_mut().pause();
            self.set_state(PlayerState::Paused(PauseReason::Branch), events);
            if let Some(delay) = resume_after {
                self.schedule_prompt_timer(key, delay, TimerAction::HidePromptAndResume);
            }
        } else {
            self.schedule_prompt_timer(key, self.prompt_dwell, TimerAction::HidePrompt);
        }
    }

    fn schedule_prompt_timer(&mut self, key: TimerKey, delay: Duration, action: TimerAction) {
        match self.clock.checked_add(delay) {
            Some(deadline) => self.timers.schedule(key, deadline, action),
            None => warn!(
                record_id = %key.record_id,
                branch_index = key.branch_index,
                ?delay,
                "prompt deadline out of range; timer dropped"
            ),
        }
    }

    fn tick(&mut self, now: Duration, events: &mut Vec<Event>) {
        self.clock = self.clock.max(now);
        for timer in self.timers.take_due(self.clock) {
            let current = self.record.as_ref().map(VideoRecord::id);
            if current != Some(timer.key.record_id.as_str()) {
                debug!(record_id = %timer.key.record_id, "stale prompt timer ignored");
                continue;
            }
            let index = timer.key.branch_index;
            if self.visible.remove(&index) {
                events.push(Event::PromptHidden {
                    branch_index: index,
                });
            }
            if timer.action == TimerAction::HidePromptAndResume
                && self.active
                && self.binder.surface().is_paused()
                && self.state == PlayerState::Paused(PauseReason::Branch)
            {
                debug!(branch_index = index, "auto-resuming after branch prompt");
                self.start_playback(events);
            }
        }
    }

    fn toggle_play(&mut self, events: &mut Vec<Event>) {
        if !matches!(self.state, PlayerState::Playing | PlayerState::Paused(_)) {
            debug!(state = ?self.state, "toggle ignored");
            return;
        }
        if !self.binder.surface().is_paused() {
            self.binder.surface_mut().pause();
            self.set_state(PlayerState::Paused(PauseReason::User), events);
            return;
        }
        if !self.active {
            debug!("resume ignored while inactive");
            return;
        }

        if let Some(record) = self.record.as_ref() {
            self.timers.cancel_record(record.id());
        }
        self.hide_all_prompts(events);
        if self.branch_failure.take().is_some() {
            self.retry = None;
            events.push(Event::NoticeCleared);
        }
        self.start_playback(events);
    }

    fn select_branch(&mut self, index: usize, events: &mut Vec<Event>) -> Result<()> {
        let record = self.record.as_ref().ok_or(EngineError::NoRecordBound)?;
        let branch = record
            .branches()
            .get(index)
            .ok_or(EngineError::BranchIndexOutOfRange {
                index,
                len: record.branches().len(),
            })?;

        info!(record_id = record.id(), branch_index = index, "branch selected");
        let target = match branch.target() {
            BranchTarget::Record(record_ref) => self.services.provider.get_record(record_ref),
            BranchTarget::Url(url) => VideoRecord::from_direct_url(record, url),
        };
        let record_id = record.id().to_owned();

        self.timers.cancel_record(&record_id);
        self.hide_all_prompts(events);

        match target {
            Ok(next) => self.bind_record(next, events),
            Err(error) => {
                warn!(record_id = %record_id, branch_index = index, %error, "branch target failed");
                self.binder.surface_mut().pause();
                let message = error.to_string();
                self.branch_failure = Some(message.clone());
                self.retry = Some(RetryAction::SelectBranch(index));
                self.set_state(PlayerState::Paused(PauseReason::Branch), events);
                events.push(Event::BranchLoadFailed { message });
            }
        }
        Ok(())
    }

    fn dismiss_error(&mut self, events: &mut Vec<Event>) {
        if self.branch_failure.take().is_none() {
            return;
        }
        self.retry = None;
        events.push(Event::NoticeCleared);
    }

    fn sync_mute(&mut self, events: &mut Vec<Event>) {
        let muted = self.session.mute().is_muted();
        self.binder.surface_mut().set_muted(muted);
        events.push(Event::MuteChanged { muted });
    }

    fn toggle_like(&mut self, events: &mut Vec<Event>) -> Result<()> {
        let record_id = self
            .record
            .as_ref()
            .map(|record| record.id().to_owned())
            .ok_or(EngineError::NoRecordBound)?;
        let Some(viewer) = self.session.viewer() else {
            events.push(Event::LoginRequired);
            return Ok(());
        };

        let previous = self.liked;
        self.liked = !previous;
        events.push(Event::LikeChanged { liked: self.liked });
        if let Err(error) = self
            .services
            .engagement
            .set_liked(viewer, &record_id, self.liked)
        {
            warn!(record_id = %record_id, %error, "like update failed; reverting");
            self.liked = previous;
            events.push(Event::LikeChanged { liked: previous });
        }
        Ok(())
    }

    fn unmount(&mut self, events: &mut Vec<Event>) {
        let cancelled = self.timers.clear();
        self.hide_all_prompts(events);
        self.fired.clear();
        self.binder.unbind();
        self.sensor.unobserve();
        self.active = false;
        self.retry = None;
        info!(cancelled_timers = cancelled, "engine unmounted");
        self.set_state(PlayerState::Unmounted, events);
    }

    fn start_playback(&mut self, events: &mut Vec<Event>) {
        match self.binder.surface_mut().play() {
            Ok(()) => self.set_state(PlayerState::Playing, events),
            Err(error) => {
                debug!(%error, "playback start refused");
                self.set_state(PlayerState::Paused(PauseReason::AutoplayBlocked), events);
            }
        }
    }

    fn count_view(&mut self, events: &mut Vec<Event>) {
        if self.view_counted || !self.count_views {
            return;
        }
        let Some(record) = self.record.as_ref() else {
            return;
        };
        self.view_counted = true;
        let record_id = record.id().to_owned();
        match self.services.engagement.record_view(&record_id) {
            Ok(()) => events.push(Event::ViewRecorded { record_id }),
            Err(error) => warn!(record_id = %record_id, %error, "view count failed"),
        }
    }

    fn refresh_liked(&mut self, events: &mut Vec<Event>) {
        let liked = match (self.session.viewer(), self.record.as_ref()) {
            (Some(viewer), Some(record)) => self
                .services
                .engagement
                .is_liked(viewer, record.id())
                .unwrap_or_else(|error| {
                    warn!(record_id = record.id(), %error, "like lookup failed");
                    false
                }),
            _ => false,
        };
        if liked != self.liked {
            self.liked = liked;
            events.push(Event::LikeChanged { liked });
        }
    }

    fn hide_all_prompts(&mut self, events: &mut Vec<Event>) {
        for branch_index in std::mem::take(&mut self.visible) {
            events.push(Event::PromptHidden { branch_index });
        }
    }

    fn prompt_view(&self, index: usize) -> Option<PromptView> {
        let branch = self.record.as_ref()?.branches().get(index)?;
        Some(PromptView {
            branch_index: index,
            label: branch.label().to_owned(),
            position_x: branch.position_x(),
            position_y: branch.position_y(),
            pauses_playback: branch.pause_on_appear(),
        })
    }

    fn set_state(&mut self, state: PlayerState, events: &mut Vec<Event>) {
        if self.state == state {
            return;
        }
        debug!(from = ?self.state, to = ?state, "state changed");
        self.state = state.clone();
        events.push(Event::StateChanged(state));
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use media_source::{
        HeadlessHlsRuntime, HeadlessSurface, PlaybackSurface, SourceBinder, SurfaceCall,
    };

    use super::{Command, Engine, EngineErrorKind, Event, PauseReason, PlayerState};
    use crate::config::EngineConfig;
    use crate::engagement::{EngagementSink, InMemoryEngagement};
    use crate::error::EngineError;
    use crate::provider::FeedDataProvider;
    use crate::record::{RawBranchPoint, RawVideoRecord, RecordId, VideoRecord};
    use crate::session::{FeedSession, MuteHandle, Services};

    type TestEngine = Engine<HeadlessSurface, HeadlessHlsRuntime>;

    #[test]
    fn load_binds_record_and_waits_for_surface() {
        let (mut engine, surface) = engine_with(provider_with(vec![fork_record()]));

        let events = engine
            .handle_command(Command::Load {
                record_ref: String::from("feed_1"),
            })
            .expect("load should succeed");

        assert!(matches!(
            &events[0],
            Event::RecordBound { record_id, .. } if record_id == "feed_1"
        ));
        assert_eq!(engine.state(), &PlayerState::Loading);
        assert_eq!(
            surface.source().as_deref(),
            Some("https://cdn.example/fork.mp4")
        );
        assert!(surface.muted(), "feeds start muted");
    }

    #[test]
    fn ready_surface_plays_only_when_active() {
        let (mut engine, surface) = engine_with(provider_with(vec![fork_record()]));
        load(&mut engine, "feed_1");

        engine
            .handle_command(Command::SurfaceReady)
            .expect("ready should succeed");
        assert_eq!(
            engine.state(),
            &PlayerState::Paused(PauseReason::Inactive)
        );
        assert!(surface.is_paused());

        engine
            .handle_command(Command::SetActive { active: true })
            .expect("activate should succeed");
        assert_eq!(engine.state(), &PlayerState::Playing);
    }

    #[test]
    fn blocked_autoplay_is_a_paused_state_not_an_error() {
        let (mut engine, surface) = engine_with(provider_with(vec![fork_record()]));
        surface.set_autoplay_allowed(false);
        load(&mut engine, "feed_1");
        engine
            .handle_command(Command::SetActive { active: true })
            .expect("activate should succeed");

        engine
            .handle_command(Command::SurfaceReady)
            .expect("ready should succeed");

        assert_eq!(
            engine.state(),
            &PlayerState::Paused(PauseReason::AutoplayBlocked)
        );
        let plays = surface
            .calls()
            .into_iter()
            .filter(|call| *call == SurfaceCall::Play)
            .count();
        assert_eq!(plays, 1, "autoplay is not retried automatically");
    }

    #[test]
    fn failed_load_enters_errored_and_retry_recovers() {
        let provider = Arc::new(MockProvider::new(vec![fork_record()]));
        provider.fail_next("network down");
        let (mut engine, _surface) = engine_with(Arc::clone(&provider));

        load(&mut engine, "feed_1");
        assert!(matches!(engine.state(), PlayerState::Errored { .. }));

        engine
            .handle_command(Command::Retry)
            .expect("retry should succeed");
        assert_eq!(engine.state(), &PlayerState::Loading);
        assert_eq!(
            *provider.requests.lock().expect("lock requests"),
            vec![String::from("feed_1"), String::from("feed_1")]
        );
    }

    #[test]
    fn surface_error_releases_session_and_offers_retry() {
        let runtime = HeadlessHlsRuntime::new();
        let surface = HeadlessSurface::new();
        let mut record = fork_record();
        record.source_url = String::from("https://cdn.example/fork/playlist.m3u8");
        let mut engine = Engine::new(
            SourceBinder::new(surface, runtime.clone()),
            services(provider_with(vec![record])),
            FeedSession::default(),
            &EngineConfig::default(),
        );
        load(&mut engine, "feed_1");
        assert_eq!(runtime.live_sessions(), 1);

        engine
            .handle_command(Command::SurfaceError {
                message: String::from("manifest 404"),
            })
            .expect("error should be handled");
        assert_eq!(runtime.live_sessions(), 0);
        assert!(matches!(engine.state(), PlayerState::Errored { .. }));

        engine
            .handle_command(Command::Retry)
            .expect("retry should succeed");
        assert_eq!(engine.state(), &PlayerState::Loading);
        assert_eq!(runtime.live_sessions(), 1);
    }

    #[test]
    fn non_pausing_prompt_hides_after_dwell_without_touching_playback() {
        let mut record = fork_record();
        record.branches.truncate(1);
        record.branches[0].pause_on_appear = false;
        let (mut engine, surface) = playing_engine(record);

        engine
            .handle_command(Command::TimeUpdate {
                position_seconds: 2.1,
                now: Duration::ZERO,
            })
            .expect("sample should succeed");
        assert_eq!(engine.state(), &PlayerState::Playing);
        assert_eq!(engine.visible_branches(), &BTreeSet::from([0]));

        let events = engine
            .handle_command(Command::Tick {
                now: Duration::from_secs(5),
            })
            .expect("tick should succeed");

        assert_eq!(events, vec![Event::PromptHidden { branch_index: 0 }]);
        assert!(!surface.is_paused());
    }

    #[test]
    fn manual_resume_hides_prompts_and_cancels_auto_resume() {
        let (mut engine, _surface) = playing_engine(fork_record());
        engine
            .handle_command(Command::TimeUpdate {
                position_seconds: 2.1,
                now: Duration::ZERO,
            })
            .expect("sample should succeed");
        assert_eq!(engine.pending_timers(), 2);

        let events = engine
            .handle_command(Command::TogglePlay)
            .expect("toggle should succeed");

        assert!(events.contains(&Event::PromptHidden { branch_index: 0 }));
        assert!(events.contains(&Event::PromptHidden { branch_index: 1 }));
        assert_eq!(engine.state(), &PlayerState::Playing);
        assert_eq!(engine.pending_timers(), 0);
        assert!(engine.visible_branches().is_empty());
        assert!(engine.fired_branches().contains(&0));
    }

    #[test]
    fn selecting_a_direct_url_branch_binds_a_synthetic_record() {
        let mut record = fork_record();
        record.branches[1].target_record_ref = None;
        record.branches[1].target_url = Some(String::from("https://cdn.example/alt.mp4"));
        let (mut engine, surface) = playing_engine(record);

        engine
            .handle_command(Command::SelectBranch { index: 1 })
            .expect("select should succeed");

        let bound = engine.record().expect("record bound");
        assert_eq!(bound.id(), "https://cdn.example/alt.mp4");
        assert_eq!(bound.title(), Some("Fork in the Road"));
        assert!(bound.branches().is_empty());
        assert_eq!(
            surface.source().as_deref(),
            Some("https://cdn.example/alt.mp4")
        );
        assert_eq!(engine.state(), &PlayerState::Loading);
    }

    #[test]
    fn selecting_without_record_or_out_of_range_is_rejected() {
        let (mut engine, _surface) = engine_with(provider_with(vec![fork_record()]));
        assert!(matches!(
            engine.handle_command(Command::SelectBranch { index: 0 }),
            Err(EngineError::NoRecordBound)
        ));

        load(&mut engine, "feed_1");
        let result = engine.handle_command(Command::SelectBranch { index: 9 });
        let Err(error) = result else {
            panic!("out of range selection must fail");
        };
        assert_eq!(EngineErrorKind::from(&error), EngineErrorKind::InvalidCommand);
    }

    #[test]
    fn dismissing_a_branch_failure_keeps_record_paused() {
        let provider = Arc::new(MockProvider::new(vec![fork_record()]));
        let (mut engine, _surface) = engine_with(Arc::clone(&provider));
        activate_and_play(&mut engine, "feed_1");
        provider.fail_next("offline");

        engine
            .handle_command(Command::SelectBranch { index: 0 })
            .expect("select should succeed");
        assert_eq!(
            engine.snapshot().notice.as_deref(),
            Some("feed provider failed: offline")
        );

        let events = engine
            .handle_command(Command::DismissError)
            .expect("dismiss should succeed");
        assert_eq!(events, vec![Event::NoticeCleared]);
        assert_eq!(engine.state(), &PlayerState::Paused(PauseReason::Branch));
        assert_eq!(engine.record().map(VideoRecord::id), Some("feed_1"));

        let retried = engine
            .handle_command(Command::Retry)
            .expect("retry should succeed");
        assert!(retried.is_empty(), "dismissed failure has no retry left");
    }

    #[test]
    fn views_are_counted_once_per_activation() {
        let engagement = Arc::new(InMemoryEngagement::new());
        let mut engine = Engine::new(
            SourceBinder::new(HeadlessSurface::new(), HeadlessHlsRuntime::new()),
            Services::new(provider_with(vec![fork_record()]), engagement.clone()),
            FeedSession::default(),
            &EngineConfig::default(),
        );
        activate_and_play(&mut engine, "feed_1");
        for position in [0.5, 1.0, 1.5] {
            engine
                .handle_command(Command::TimeUpdate {
                    position_seconds: position,
                    now: Duration::ZERO,
                })
                .expect("sample should succeed");
        }
        assert_eq!(engagement.view_count("feed_1"), 1);

        for active in [false, true] {
            engine
                .handle_command(Command::SetActive { active })
                .expect("visibility change should succeed");
        }
        assert_eq!(engagement.view_count("feed_1"), 2);
    }

    #[test]
    fn disabled_view_counting_never_calls_the_sink() {
        let engagement = Arc::new(InMemoryEngagement::new());
        let config = EngineConfig {
            count_views: false,
            ..EngineConfig::default()
        };
        let mut engine = Engine::new(
            SourceBinder::new(HeadlessSurface::new(), HeadlessHlsRuntime::new()),
            Services::new(provider_with(vec![fork_record()]), engagement.clone()),
            FeedSession::default(),
            &config,
        );
        activate_and_play(&mut engine, "feed_1");

        assert_eq!(engagement.view_count("feed_1"), 0);
    }

    #[test]
    fn like_requires_a_signed_in_viewer() {
        let (mut engine, _surface) = engine_with(provider_with(vec![fork_record()]));
        load(&mut engine, "feed_1");

        let events = engine
            .handle_command(Command::ToggleLike)
            .expect("toggle like should succeed");

        assert_eq!(events, vec![Event::LoginRequired]);
        assert!(!engine.is_liked());
    }

    #[test]
    fn failed_like_is_reverted() {
        let engagement = Arc::new(FailingEngagement::default());
        let mut engine = Engine::new(
            SourceBinder::new(HeadlessSurface::new(), HeadlessHlsRuntime::new()),
            Services::new(provider_with(vec![fork_record()]), engagement.clone()),
            FeedSession::signed_in("ana"),
            &EngineConfig::default(),
        );
        load(&mut engine, "feed_1");

        let events = engine
            .handle_command(Command::ToggleLike)
            .expect("toggle like should succeed");

        assert_eq!(
            events,
            vec![
                Event::LikeChanged { liked: true },
                Event::LikeChanged { liked: false }
            ]
        );
        assert!(!engine.is_liked());
        assert_eq!(*engagement.like_calls.lock().expect("lock like calls"), 1);
    }

    #[test]
    fn like_state_is_refreshed_on_bind() {
        let engagement = Arc::new(InMemoryEngagement::new());
        engagement
            .set_liked("ana", "feed_1", true)
            .expect("seed like");
        let mut engine = Engine::new(
            SourceBinder::new(HeadlessSurface::new(), HeadlessHlsRuntime::new()),
            Services::new(provider_with(vec![fork_record()]), engagement),
            FeedSession::signed_in("ana"),
            &EngineConfig::default(),
        );

        let events = engine
            .handle_command(Command::Load {
                record_ref: String::from("feed_1"),
            })
            .expect("load should succeed");

        assert!(events.contains(&Event::LikeChanged { liked: true }));
        assert!(engine.snapshot().liked);
    }

    #[test]
    fn mute_survives_branch_swaps() {
        let mute = MuteHandle::default();
        let surface = HeadlessSurface::new();
        let mut engine = Engine::new(
            SourceBinder::new(surface.clone(), HeadlessHlsRuntime::new()),
            services(provider_with(vec![fork_record()])),
            FeedSession::new(mute.clone(), None),
            &EngineConfig::default(),
        );
        activate_and_play(&mut engine, "feed_1");
        mute.set(false);
        let events = engine
            .handle_command(Command::SyncMute)
            .expect("unmute should succeed");
        assert_eq!(events, vec![Event::MuteChanged { muted: false }]);

        engine
            .handle_command(Command::SelectBranch { index: 0 })
            .expect("select should succeed");

        assert!(!surface.muted());
        assert!(!engine.snapshot().muted);
    }

    #[test]
    fn buffering_does_not_disturb_branch_state() {
        let (mut engine, _surface) = playing_engine(fork_record());
        engine
            .handle_command(Command::TimeUpdate {
                position_seconds: 2.1,
                now: Duration::ZERO,
            })
            .expect("sample should succeed");

        let waiting = engine
            .handle_command(Command::SurfaceWaiting)
            .expect("waiting should succeed");
        assert_eq!(waiting, vec![Event::BufferingChanged { buffering: true }]);
        let ready = engine
            .handle_command(Command::SurfaceReady)
            .expect("ready should succeed");
        assert_eq!(ready, vec![Event::BufferingChanged { buffering: false }]);

        assert_eq!(engine.state(), &PlayerState::Paused(PauseReason::Branch));
        assert_eq!(engine.visible_branches(), &BTreeSet::from([0, 1]));
    }

    #[test]
    fn prompt_deadline_counts_from_the_sample_that_fired_it() {
        let (mut engine, surface) = playing_engine(fork_record());
        engine
            .handle_command(Command::Tick {
                now: Duration::ZERO,
            })
            .expect("tick should succeed");

        engine
            .handle_command(Command::TimeUpdate {
                position_seconds: 2.1,
                now: Duration::from_secs(3),
            })
            .expect("sample should succeed");
        assert_eq!(engine.next_timer_deadline(), Some(Duration::from_secs(8)));

        let early = engine
            .handle_command(Command::Tick {
                now: Duration::from_secs(5),
            })
            .expect("tick should succeed");
        assert!(early.is_empty());
        assert_eq!(engine.state(), &PlayerState::Paused(PauseReason::Branch));

        let due = engine
            .handle_command(Command::Tick {
                now: Duration::from_secs(8),
            })
            .expect("tick should succeed");
        assert!(due.contains(&Event::PromptHidden { branch_index: 0 }));
        assert!(due.contains(&Event::StateChanged(PlayerState::Playing)));
        assert!(!surface.is_paused());
    }

    #[test]
    fn out_of_range_prompt_deadline_drops_the_timer_without_panicking() {
        let (mut engine, surface) = playing_engine(fork_record());

        engine
            .handle_command(Command::TimeUpdate {
                position_seconds: 2.1,
                now: Duration::MAX,
            })
            .expect("sample should succeed");

        assert_eq!(engine.state(), &PlayerState::Paused(PauseReason::Branch));
        assert_eq!(engine.visible_branches(), &BTreeSet::from([0, 1]));
        assert_eq!(engine.pending_timers(), 0);
        assert!(surface.is_paused());
    }

    #[test]
    fn huge_authored_resume_delay_fails_the_load_instead_of_the_engine() {
        let mut record = fork_record();
        record.branches[0].auto_resume_after_seconds = Some(1e20);
        let (mut engine, _surface) = engine_with(provider_with(vec![record]));

        load(&mut engine, "feed_1");

        assert!(matches!(engine.state(), PlayerState::Errored { .. }));
        assert!(engine.record().is_none());
    }

    #[test]
    fn tap_does_not_resume_an_inactive_item() {
        let (mut engine, surface) = engine_with(provider_with(vec![fork_record()]));
        load(&mut engine, "feed_1");
        engine
            .handle_command(Command::SurfaceReady)
            .expect("ready should succeed");

        let events = engine
            .handle_command(Command::TogglePlay)
            .expect("toggle should succeed");

        assert!(events.is_empty());
        assert_eq!(
            engine.state(),
            &PlayerState::Paused(PauseReason::Inactive)
        );
        assert!(surface.is_paused());
    }

    #[test]
    fn unmount_cancels_timers_and_ignores_later_commands() {
        let (mut engine, surface) = playing_engine(fork_record());
        engine
            .handle_command(Command::TimeUpdate {
                position_seconds: 2.1,
                now: Duration::ZERO,
            })
            .expect("sample should succeed");

        engine
            .handle_command(Command::Unmount)
            .expect("unmount should succeed");
        assert_eq!(engine.pending_timers(), 0);
        assert_eq!(surface.source(), None);

        let events = engine
            .handle_command(Command::Tick {
                now: Duration::from_secs(60),
            })
            .expect("tick after unmount is a no-op");
        assert!(events.is_empty());
        assert_eq!(engine.state(), &PlayerState::Unmounted);
    }

    #[test]
    fn subscribers_receive_every_event_in_order() {
        let (mut engine, _surface) = engine_with(provider_with(vec![fork_record()]));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let id = {
            let seen = Arc::clone(&seen);
            engine.subscribe(move |event| seen.lock().expect("lock seen").push(event.clone()))
        };

        let events = engine
            .handle_command(Command::Load {
                record_ref: String::from("feed_1"),
            })
            .expect("load should succeed");
        assert!(engine.unsubscribe(id));
        engine
            .handle_command(Command::SyncMute)
            .expect("mute sync should succeed");

        assert_eq!(*seen.lock().expect("lock seen"), events);
    }

    #[test]
    fn error_event_carries_kind_and_message() {
        let error = EngineError::RecordNotFound {
            record_ref: String::from("nowhere"),
        };
        let event = super::EngineErrorEvent::from_error(&error);
        assert_eq!(event.kind, EngineErrorKind::RecordNotFound);
        assert_eq!(event.message, "video record not found: nowhere");
    }

    fn fork_record() -> RawVideoRecord {
        RawVideoRecord {
            id: String::from("feed_1"),
            source_url: String::from("https://cdn.example/fork.mp4"),
            title: Some(String::from("Fork in the Road")),
            branches: vec![
                RawBranchPoint {
                    appear_at_second: 2.0,
                    pause_on_appear: true,
                    auto_resume_after_seconds: Some(5.0),
                    label: String::from("Forest"),
                    position_x: 20.0,
                    position_y: 60.0,
                    target_record_ref: Some(String::from("forest_entry")),
                    target_url: None,
                },
                RawBranchPoint {
                    appear_at_second: 2.0,
                    pause_on_appear: true,
                    auto_resume_after_seconds: Some(5.0),
                    label: String::from("Mountain"),
                    position_x: 70.0,
                    position_y: 60.0,
                    target_record_ref: Some(String::from("mountain_climb")),
                    target_url: None,
                },
            ],
            ..RawVideoRecord::default()
        }
    }

    fn forest_record() -> RawVideoRecord {
        RawVideoRecord {
            id: String::from("forest_entry"),
            source_url: String::from("https://cdn.example/forest.mp4"),
            ..RawVideoRecord::default()
        }
    }

    fn provider_with(mut records: Vec<RawVideoRecord>) -> Arc<MockProvider> {
        records.push(forest_record());
        Arc::new(MockProvider::new(records))
    }

    fn services(provider: Arc<MockProvider>) -> Services {
        Services::new(provider, Arc::new(InMemoryEngagement::new()))
    }

    fn engine_with(provider: Arc<MockProvider>) -> (TestEngine, HeadlessSurface) {
        let surface = HeadlessSurface::new();
        let engine = Engine::new(
            SourceBinder::new(surface.clone(), HeadlessHlsRuntime::new()),
            services(provider),
            FeedSession::default(),
            &EngineConfig::default(),
        );
        (engine, surface)
    }

    fn playing_engine(record: RawVideoRecord) -> (TestEngine, HeadlessSurface) {
        let (mut engine, surface) = engine_with(provider_with(vec![record]));
        activate_and_play(&mut engine, "feed_1");
        (engine, surface)
    }

    fn load(engine: &mut TestEngine, record_ref: &str) {
        engine
            .handle_command(Command::Load {
                record_ref: record_ref.to_owned(),
            })
            .expect("load should succeed");
    }

    fn activate_and_play(engine: &mut TestEngine, record_ref: &str) {
        load(engine, record_ref);
        engine
            .handle_command(Command::SetActive { active: true })
            .expect("activate should succeed");
        engine
            .handle_command(Command::SurfaceReady)
            .expect("ready should succeed");
        assert_eq!(engine.state(), &PlayerState::Playing);
    }

    #[derive(Debug)]
    struct MockProvider {
        records: Vec<RawVideoRecord>,
        requests: Mutex<Vec<String>>,
        failure: Mutex<Option<String>>,
    }

    impl MockProvider {
        fn new(records: Vec<RawVideoRecord>) -> Self {
            Self {
                records,
                requests: Mutex::new(Vec::new()),
                failure: Mutex::new(None),
            }
        }

        fn fail_next(&self, reason: &str) {
            *self.failure.lock().expect("lock failure") = Some(reason.to_owned());
        }
    }

    impl FeedDataProvider for MockProvider {
        fn list_entry_points(&self) -> crate::Result<Vec<RecordId>> {
            Ok(self.records.iter().map(|record| record.id.clone()).collect())
        }

        fn get_record(&self, record_ref: &str) -> crate::Result<VideoRecord> {
            self.requests
                .lock()
                .expect("lock requests")
                .push(record_ref.to_owned());
            if let Some(reason) = self.failure.lock().expect("lock failure").take() {
                return Err(EngineError::Provider { reason });
            }
            let raw = self
                .records
                .iter()
                .find(|record| record.id == record_ref)
                .cloned()
                .ok_or_else(|| EngineError::RecordNotFound {
                    record_ref: record_ref.to_owned(),
                })?;
            VideoRecord::from_raw(raw)
        }
    }

    #[derive(Debug, Default)]
    struct FailingEngagement {
        like_calls: Mutex<usize>,
    }

    impl EngagementSink for FailingEngagement {
        fn record_view(&self, _record_id: &str) -> crate::Result<()> {
            Err(EngineError::Engagement {
                reason: String::from("offline"),
            })
        }

        fn set_liked(&self, _user_id: &str, _record_id: &str, _liked: bool) -> crate::Result<()> {
            *self.like_calls.lock().expect("lock like calls") += 1;
            Err(EngineError::Engagement {
                reason: String::from("offline"),
            })
        }

        fn is_liked(&self, _user_id: &str, _record_id: &str) -> crate::Result<bool> {
            Err(EngineError::Engagement {
                reason: String::from("offline"),
            })
        }
    }
}
