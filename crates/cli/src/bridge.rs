use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use engine::{EngineErrorEvent, Feed, FeedCommand, FeedEvent};
use media_source::{AdaptiveRuntime, PlaybackSurface};

const COMMAND_CHANNEL_CAPACITY: usize = 32;
const MESSAGE_CHANNEL_CAPACITY: usize = 64;

/// Sender used by the driver to dispatch commands to the feed thread.
pub type FeedCommandSender = mpsc::SyncSender<FeedCommand>;

/// Receiver used by the driver to read what the feed thread emitted.
pub type BridgeReceiver = mpsc::Receiver<BridgeMessage>;

/// Messages emitted by the feed thread.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeMessage {
    Event(FeedEvent),
    Error(EngineErrorEvent),
    /// Every message caused by one command has been sent.
    Settled,
}

/// Moves `feed` onto its own thread and returns the channel pair driving it.
///
/// The thread exits when the command sender is dropped or the receiver hangs
/// up.
pub fn spawn_feed_bridge<S, R>(
    mut feed: Feed<S, R>,
) -> (FeedCommandSender, BridgeReceiver, JoinHandle<()>)
where
    S: PlaybackSurface + Send + 'static,
    R: AdaptiveRuntime + Send + 'static,
    R::Session: Send,
{
    let (command_tx, command_rx) = mpsc::sync_channel::<FeedCommand>(COMMAND_CHANNEL_CAPACITY);
    let (message_tx, message_rx) = mpsc::sync_channel::<BridgeMessage>(MESSAGE_CHANNEL_CAPACITY);

    let handle = thread::spawn(move || {
        while let Ok(command) = command_rx.recv() {
            let messages = match feed.handle_command(command) {
                Ok(events) => events.into_iter().map(BridgeMessage::Event).collect(),
                Err(error) => vec![BridgeMessage::Error(EngineErrorEvent::from_error(&error))],
            };
            for message in messages.into_iter().chain([BridgeMessage::Settled]) {
                if message_tx.send(message).is_err() {
                    return;
                }
            }
        }
    });

    (command_tx, message_rx, handle)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use engine::{
        CatalogProvider, Command, EngineConfig, EngineErrorKind, Event, Feed, FeedCommand,
        FeedLayout, FeedSession, InMemoryEngagement, Services,
    };
    use media_source::{HeadlessHlsRuntime, HeadlessSurface, SourceBinder};

    use super::{BridgeMessage, BridgeReceiver, spawn_feed_bridge};

    fn seeded_feed() -> Feed<HeadlessSurface, HeadlessHlsRuntime> {
        let config = EngineConfig::default();
        let provider = CatalogProvider::seeded(&config).expect("seeded catalog");
        let (feed, _events) = Feed::open(
            Services::new(Arc::new(provider), Arc::new(InMemoryEngagement::new())),
            FeedSession::default(),
            &config,
            FeedLayout::new(390.0, 844.0),
            |_index, _record_id| SourceBinder::new(HeadlessSurface::new(), HeadlessHlsRuntime::new()),
        )
        .expect("feed should open");
        feed
    }

    fn until_settled(messages: &BridgeReceiver) -> Vec<BridgeMessage> {
        let mut received = Vec::new();
        loop {
            let message = messages
                .recv_timeout(Duration::from_secs(1))
                .expect("bridge message");
            if message == BridgeMessage::Settled {
                return received;
            }
            received.push(message);
        }
    }

    #[test]
    fn bridge_forwards_item_events_in_order() {
        let (command_tx, messages, _handle) = spawn_feed_bridge(seeded_feed());

        command_tx
            .send(FeedCommand::Item {
                index: 0,
                command: Command::SurfaceReady,
            })
            .expect("send ready command");
        let received = until_settled(&messages);

        assert_eq!(received.len(), 1);
        let BridgeMessage::Event(event) = &received[0] else {
            panic!("ready must emit an event");
        };
        assert_eq!(event.index, 0);
        assert_eq!(event.event, Event::StateChanged(engine::PlayerState::Playing));
    }

    #[test]
    fn bridge_reports_invalid_commands_as_error_messages() {
        let (command_tx, messages, _handle) = spawn_feed_bridge(seeded_feed());

        command_tx
            .send(FeedCommand::Item {
                index: 42,
                command: Command::TogglePlay,
            })
            .expect("send command");
        let received = until_settled(&messages);

        let [BridgeMessage::Error(error)] = received.as_slice() else {
            panic!("expected a single error message, got {received:?}");
        };
        assert_eq!(error.kind, EngineErrorKind::InvalidCommand);
    }

    #[test]
    fn bridge_thread_exits_when_sender_is_dropped() {
        let (command_tx, _messages, handle) = spawn_feed_bridge(seeded_feed());
        drop(command_tx);
        handle.join().expect("bridge thread should exit cleanly");
    }
}
