//! Channel registry and bar fan-out.
//!
//! One [`Subscription`] is held per [`ChannelKey`], carrying the single active [`Resolution`],
//! the in-progress [`Bar`] and the ordered list of [`Handler`]s. Only one resolution is active
//! per channel: a later subscribe with a different resolution replaces it for every handler of
//! that channel. Serving several resolutions of one market at once would need channel keys that
//! also carry the resolution.
//!
//! A channel is present iff it has at least one handler. Upstream `SubAdd` / `SubRemove`
//! requests are only sent on the absent -> present and present -> absent transitions, and only
//! while the [`Transport`] is ready. Anything that changes while it is not ready is reconciled by
//! [`ChannelRegistry::resubscribe_all`] once the connection is (re-)established.

use crate::{
    bar::{Bar, TradeTick},
    channel::ChannelKey,
    error::DataError,
    protocol::SubRequest,
    resolution::Resolution,
    sink::{BarSink, Handler, SubscriberId},
    transport::Transport,
};
use fnv::FnvBuildHasher;
use indexmap::IndexMap;
use itertools::Itertools;
use tracing::{debug, info, warn};

/// Registry state for one upstream channel.
#[derive(Debug)]
pub struct Subscription {
    pub resolution: Resolution,
    pub current_bar: Option<Bar>,
    handlers: Vec<Handler>,
}

impl Subscription {
    fn new(resolution: Resolution, current_bar: Option<Bar>) -> Self {
        Self {
            resolution,
            current_bar,
            handlers: Vec::new(),
        }
    }

    /// Subscriber ids in registration order.
    pub fn subscribers(&self) -> impl Iterator<Item = &SubscriberId> {
        self.handlers.iter().map(|handler| &handler.id)
    }

    fn contains(&self, subscriber: &SubscriberId) -> bool {
        self.handlers.iter().any(|handler| &handler.id == subscriber)
    }
}

/// Owned registry of every active channel, its bar state and its handlers.
///
/// Mutated exclusively through `&mut self`: whoever owns the registry (see [`crate::engine`])
/// serialises subscribe, unsubscribe and tick processing.
#[derive(Debug)]
pub struct ChannelRegistry<T> {
    transport: T,
    channels: IndexMap<ChannelKey, Subscription, FnvBuildHasher>,
}

impl<T> ChannelRegistry<T>
where
    T: Transport,
{
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            channels: IndexMap::default(),
        }
    }

    /// Subscribe using the raw symbol & resolution tokens supplied by a chart client.
    ///
    /// A symbol that is not `Exchange:BASE/QUOTE`, or an unsupported resolution, is logged and
    /// leaves the registry untouched.
    pub fn subscribe_symbol<S>(
        &mut self,
        symbol: &str,
        resolution: &str,
        subscriber: SubscriberId,
        sink: S,
        seed_bar: Option<Bar>,
    ) -> Result<ChannelKey, DataError>
    where
        S: BarSink + Send + 'static,
    {
        let parsed = ChannelKey::from_symbol(symbol)
            .and_then(|channel| Ok((channel, resolution.parse::<Resolution>()?)));

        let (channel, resolution) = match parsed {
            Ok(parsed) => parsed,
            Err(error) => {
                warn!(%subscriber, symbol, resolution, %error, "ignoring invalid bar subscription");
                return Err(error);
            }
        };

        self.subscribe(channel.clone(), resolution, subscriber, sink, seed_bar)
            .map(|_| channel)
    }

    /// Register a handler under `channel`.
    ///
    /// The first handler of a channel creates its [`Subscription`] and triggers exactly one
    /// upstream `SubAdd`. Later handlers overwrite the channel's resolution & current bar (last
    /// subscribe wins) and are appended after existing handlers. A subscriber id already
    /// registered on any channel, or a seed bar whose next boundary is not representable, is
    /// rejected.
    pub fn subscribe<S>(
        &mut self,
        channel: ChannelKey,
        resolution: Resolution,
        subscriber: SubscriberId,
        sink: S,
        seed_bar: Option<Bar>,
    ) -> Result<(), DataError>
    where
        S: BarSink + Send + 'static,
    {
        if let Some(registered) = self.channel_of(&subscriber) {
            warn!(%channel, %registered, %subscriber, "subscriber id already registered");
            return Err(DataError::DuplicateSubscriber(subscriber));
        }

        if let Some(seed_bar) = seed_bar.filter(|bar| resolution.next_boundary(bar.time).is_none()) {
            warn!(%channel, %subscriber, time = seed_bar.time, "seed bar time out of range");
            return Err(DataError::SeedBarOutOfRange(seed_bar.time));
        }

        let handler = Handler::new(subscriber, Box::new(sink));

        if let Some(subscription) = self.channels.get_mut(&channel) {
            info!(
                %channel,
                subscriber = %handler.id,
                %resolution,
                "updating existing channel subscription"
            );
            subscription.resolution = resolution;
            subscription.current_bar = seed_bar;
            subscription.handlers.push(handler);
            return Ok(());
        }

        info!(%channel, subscriber = %handler.id, %resolution, "subscribing to channel");
        let mut subscription = Subscription::new(resolution, seed_bar);
        subscription.handlers.push(handler);
        self.channels.insert(channel.clone(), subscription);

        self.send_upstream(SubRequest::add([channel]));
        Ok(())
    }

    /// Remove the handler registered as `subscriber`.
    ///
    /// The scan stops at the first channel holding the id. If that leaves the channel without
    /// handlers the channel is dropped and exactly one upstream `SubRemove` is sent. Unknown ids
    /// are a no-op. Returns the channel the handler was removed from.
    pub fn unsubscribe(&mut self, subscriber: &SubscriberId) -> Option<ChannelKey> {
        let (index, channel, subscription) = self
            .channels
            .iter_mut()
            .enumerate()
            .find_map(|(index, (channel, subscription))| {
                subscription
                    .contains(subscriber)
                    .then_some((index, channel, subscription))
            })?;

        subscription
            .handlers
            .retain(|handler| &handler.id != subscriber);
        let channel = channel.clone();

        if subscription.handlers.is_empty() {
            info!(%channel, %subscriber, "unsubscribing from channel");
            self.channels.shift_remove_index(index);
            self.send_upstream(SubRequest::remove([channel.clone()]));
        } else {
            debug!(%channel, %subscriber, "removed bar handler");
        }

        Some(channel)
    }

    /// Fold a trade into its channel's current bar and deliver the result to every handler in
    /// registration order.
    ///
    /// Ticks for channels with no subscription, and ticks whose time cannot be placed in a
    /// period, are dropped. A handler that fails is logged and
    /// skipped; delivery continues with the next handler. Returns the updated bar.
    pub fn on_tick(&mut self, tick: &TradeTick) -> Option<Bar> {
        let subscription = self.channels.get_mut(&tick.channel)?;

        let Some(bar) = Bar::next(
            subscription.current_bar.as_ref(),
            subscription.resolution,
            tick,
        ) else {
            warn!(channel = %tick.channel, time = tick.time, "dropping trade with out of range time");
            return None;
        };
        subscription.current_bar = Some(bar);

        for handler in subscription.handlers.iter_mut() {
            if let Err(error) = handler.deliver(&bar) {
                warn!(
                    channel = %tick.channel,
                    subscriber = %handler.id,
                    %error,
                    "bar handler failed"
                );
            }
        }

        Some(bar)
    }

    /// Take over a (re-)established connection: mark the transport ready, then subscribe every
    /// registered channel with a single `SubAdd`.
    pub fn on_connected(&mut self) {
        self.transport.set_ready(true);
        self.resubscribe_all();
    }

    /// Stop sending upstream until the next [`ChannelRegistry::on_connected`].
    pub fn on_disconnected(&mut self) {
        self.transport.set_ready(false);
    }

    /// Issue one `SubAdd` covering every channel in the registry.
    ///
    /// Called when the transport (re-)becomes ready so channels registered while it was not,
    /// and channels that were active on a previous connection, are subscribed upstream.
    pub fn resubscribe_all(&mut self) {
        if self.channels.is_empty() {
            return;
        }

        info!(
            channels = %self.channels.keys().join(","),
            "subscribing all registered channels"
        );
        let request = SubRequest::add(self.channels.keys().cloned());
        self.send_upstream(request);
    }

    fn send_upstream(&mut self, request: SubRequest) {
        if !self.transport.is_ready() {
            debug!(?request, "transport not ready, deferring subscription request until connected");
            return;
        }

        debug!(?request, "sending subscription request");
        if let Err(error) = self.transport.send(&request) {
            warn!(?request, %error, "failed to send subscription request");
        }
    }

    /// Channel the `subscriber` is registered on, if any.
    pub fn channel_of(&self, subscriber: &SubscriberId) -> Option<&ChannelKey> {
        self.channels
            .iter()
            .find_map(|(channel, subscription)| subscription.contains(subscriber).then_some(channel))
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn contains(&self, channel: &ChannelKey) -> bool {
        self.channels.contains_key(channel)
    }

    pub fn subscription(&self, channel: &ChannelKey) -> Option<&Subscription> {
        self.channels.get(channel)
    }

    pub fn channels(&self) -> impl Iterator<Item = &ChannelKey> {
        self.channels.keys()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
