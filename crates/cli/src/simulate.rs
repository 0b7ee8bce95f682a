use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use engine::{
    CatalogProvider, Command, EngineConfig, Event, Feed, FeedCommand, FeedEvent, FeedLayout,
    FeedSession, InMemoryEngagement, MuteHandle, Services, format_view_count,
};
use media_source::{HeadlessHlsRuntime, HeadlessSurface, SourceBinder};
use tracing::{debug, info};

use crate::bridge::{BridgeMessage, BridgeReceiver, FeedCommandSender, spawn_feed_bridge};

const VIEWPORT_WIDTH: f64 = 390.0;
const VIEWPORT_HEIGHT: f64 = 844.0;

/// Parameters of one headless run.
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub seconds: f64,
    pub step: Duration,
    /// Branch indices picked, in order, whenever prompts appear.
    pub choices: Vec<usize>,
    /// Scroll to the second item after this many simulated seconds.
    pub scroll_after: Option<f64>,
    pub viewer: Option<String>,
}

/// Counters printed at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationReport {
    pub events: usize,
    pub prompts_shown: usize,
    pub branches_chosen: usize,
    pub records_bound: usize,
    pub errors: usize,
}

struct Driver<'a, W> {
    commands: FeedCommandSender,
    messages: BridgeReceiver,
    out: &'a mut W,
    clock: Duration,
    choices: VecDeque<usize>,
    report: SimulationReport,
}

impl<W: Write> Driver<'_, W> {
    /// Sends one command and prints everything it caused. Returns the events.
    fn send(&mut self, command: FeedCommand) -> Result<Vec<FeedEvent>> {
        debug!(?command, "dispatching");
        self.commands
            .send(command)
            .map_err(|_| anyhow!("feed thread stopped"))?;

        let mut events = Vec::new();
        loop {
            let message = self
                .messages
                .recv()
                .context("feed thread hung up before settling")?;
            match message {
                BridgeMessage::Settled => return Ok(events),
                BridgeMessage::Error(error) => {
                    self.report.errors += 1;
                    writeln!(
                        self.out,
                        "[{:>8.3}s] error {:?}: {}",
                        self.clock.as_secs_f64(),
                        error.kind,
                        error.message
                    )?;
                }
                BridgeMessage::Event(event) => {
                    self.report.events += 1;
                    self.print(&event)?;
                    events.push(event);
                }
            }
        }
    }

    fn print(&mut self, event: &FeedEvent) -> Result<()> {
        writeln!(
            self.out,
            "[{:>8.3}s] #{} {:?}",
            self.clock.as_secs_f64(),
            event.index,
            event.event
        )?;
        Ok(())
    }

    /// Plays the viewer's side: finishes loads and picks branches.
    fn react(&mut self, events: Vec<FeedEvent>) -> Result<()> {
        let mut pending = VecDeque::from(events);
        while let Some(event) = pending.pop_front() {
            let follow_up = match event.event {
                Event::RecordBound { .. } => {
                    self.report.records_bound += 1;
                    Some(Command::SurfaceReady)
                }
                Event::PromptShown(_) => {
                    self.report.prompts_shown += 1;
                    self.choices.pop_front().map(|index| {
                        self.report.branches_chosen += 1;
                        info!(item = event.index, branch_index = index, "choosing branch");
                        Command::SelectBranch { index }
                    })
                }
                _ => None,
            };
            if let Some(command) = follow_up {
                let caused = self.send(FeedCommand::Item {
                    index: event.index,
                    command,
                })?;
                pending.extend(caused);
            }
        }
        Ok(())
    }
}

/// Replays a headless feed session and prints every engine event to `out`.
pub fn run<W: Write>(
    catalog: CatalogProvider,
    config: &EngineConfig,
    options: SimulationOptions,
    out: &mut W,
) -> Result<SimulationReport> {
    let engagement = Arc::new(InMemoryEngagement::new());
    let services = Services::new(Arc::new(catalog), engagement.clone());
    let session = FeedSession::new(MuteHandle::default(), options.viewer.clone());
    let surfaces = Arc::new(Mutex::new(Vec::new()));

    let created = Arc::clone(&surfaces);
    let (feed, opened) = Feed::open(
        services,
        session,
        config,
        FeedLayout::new(VIEWPORT_WIDTH, VIEWPORT_HEIGHT),
        move |_index, _record_id| {
            let surface = HeadlessSurface::new();
            created
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(surface.clone());
            SourceBinder::new(surface, HeadlessHlsRuntime::new())
        },
    )
    .context("open feed")?;
    let entries = feed.entries().to_vec();
    let surfaces = surfaces
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    writeln!(out, "feed: {}", entries.join(", "))?;

    let (commands, messages, handle) = spawn_feed_bridge(feed);
    let mut driver = Driver {
        commands,
        messages,
        out,
        clock: Duration::ZERO,
        choices: options.choices.into(),
        report: SimulationReport::default(),
    };
    for event in &opened {
        driver.report.events += 1;
        driver.print(event)?;
    }
    driver.react(opened)?;

    let mut scrolled = false;
    while driver.clock.as_secs_f64() < options.seconds {
        driver.clock += options.step;
        let ticked = driver.send(FeedCommand::Tick { now: driver.clock })?;
        driver.react(ticked)?;

        for (index, surface) in surfaces.iter().enumerate() {
            let Some(position_seconds) = surface.advance(options.step) else {
                continue;
            };
            let sampled = driver.send(FeedCommand::Item {
                index,
                command: Command::TimeUpdate {
                    position_seconds,
                    now: driver.clock,
                },
            })?;
            driver.react(sampled)?;
        }

        let scroll_due = options
            .scroll_after
            .is_some_and(|after| driver.clock.as_secs_f64() >= after);
        if scroll_due && !scrolled && entries.len() > 1 {
            scrolled = true;
            let events = driver.send(FeedCommand::ScrollToItem { index: 1 })?;
            driver.react(events)?;
        }
    }

    let closed = driver.send(FeedCommand::Close)?;
    driver.react(closed)?;
    let Driver {
        commands,
        report,
        out,
        ..
    } = driver;
    drop(commands);
    handle
        .join()
        .map_err(|_| anyhow!("feed thread panicked"))?;

    writeln!(out, "---")?;
    for record_id in &entries {
        writeln!(
            out,
            "{record_id}: {} views",
            format_view_count(engagement.view_count(record_id))
        )?;
    }
    writeln!(
        out,
        "{} events, {} prompts, {} branches chosen, {} records bound, {} errors",
        report.events,
        report.prompts_shown,
        report.branches_chosen,
        report.records_bound,
        report.errors
    )?;
    Ok(report)
}
