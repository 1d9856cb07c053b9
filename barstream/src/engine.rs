//! Single-owner engine task.
//!
//! [`run`] takes exclusive ownership of a [`ChannelRegistry`] and serialises every mutation of
//! it: subscribe & unsubscribe [`Command`]s from any number of producers, and the
//! [`StreamerEvent`]s of the upstream connection. A tick and a subscription change on the same
//! channel therefore never interleave.

use crate::{
    bar::Bar,
    channel::ChannelKey,
    error::DataError,
    registry::ChannelRegistry,
    resolution::Resolution,
    sink::{BarSink, SubscriberId},
    transport::{StreamerEvent, Transport},
};
use std::fmt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// Registry mutation requested by a producer.
pub enum Command {
    Subscribe {
        channel: ChannelKey,
        resolution: Resolution,
        subscriber: SubscriberId,
        sink: Box<dyn BarSink + Send>,
        seed_bar: Option<Bar>,
        respond_to: Option<oneshot::Sender<Result<(), DataError>>>,
    },
    Unsubscribe {
        subscriber: SubscriberId,
    },
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Subscribe {
                channel,
                resolution,
                subscriber,
                seed_bar,
                ..
            } => f
                .debug_struct("Subscribe")
                .field("channel", channel)
                .field("resolution", resolution)
                .field("subscriber", subscriber)
                .field("seed_bar", seed_bar)
                .finish_non_exhaustive(),
            Command::Unsubscribe { subscriber } => f
                .debug_struct("Unsubscribe")
                .field("subscriber", subscriber)
                .finish(),
        }
    }
}

/// Drive the registry until both the command and the event channels are closed, then hand it
/// back to the caller.
pub async fn run<T>(
    mut registry: ChannelRegistry<T>,
    mut commands: mpsc::Receiver<Command>,
    mut events: mpsc::Receiver<StreamerEvent>,
) -> ChannelRegistry<T>
where
    T: Transport,
{
    let mut commands_open = true;
    let mut events_open = true;

    while commands_open || events_open {
        tokio::select! {
            biased;

            command = commands.recv(), if commands_open => match command {
                Some(command) => handle_command(&mut registry, command),
                None => {
                    debug!("command channel closed");
                    commands_open = false;
                }
            },
            event = events.recv(), if events_open => match event {
                Some(event) => handle_event(&mut registry, event),
                None => {
                    debug!("streamer event channel closed");
                    events_open = false;
                }
            },
        }
    }

    info!(channels = registry.len(), "bar engine stopped");
    registry
}

fn handle_command<T>(registry: &mut ChannelRegistry<T>, command: Command)
where
    T: Transport,
{
    match command {
        Command::Subscribe {
            channel,
            resolution,
            subscriber,
            sink,
            seed_bar,
            respond_to,
        } => {
            let result = registry.subscribe(channel, resolution, subscriber, sink, seed_bar);
            if let Some(respond_to) = respond_to {
                // Requester may have gone away
                let _ = respond_to.send(result);
            }
        }
        Command::Unsubscribe { subscriber } => {
            registry.unsubscribe(&subscriber);
        }
    }
}

fn handle_event<T>(registry: &mut ChannelRegistry<T>, event: StreamerEvent)
where
    T: Transport,
{
    match event {
        StreamerEvent::Trade(tick) => {
            registry.on_tick(&tick);
        }
        StreamerEvent::Connected => registry.on_connected(),
        StreamerEvent::Disconnected => {
            registry.on_disconnected();
            info!(
                channels = registry.len(),
                "streamer disconnected, channels will be resubscribed on reconnect"
            );
        }
    }
}
