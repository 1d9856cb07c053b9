use crate::{bar::TradeTick, error::DataError, protocol::SubRequest};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;

/// Outbound half of the upstream connection, as seen by the
/// [`ChannelRegistry`](crate::registry::ChannelRegistry).
pub trait Transport {
    /// True while the connection is open and able to carry subscription control messages.
    fn is_ready(&self) -> bool;

    /// Record whether the owner of the registry has taken over a (re-)established connection.
    ///
    /// Set after the owner reacts to [`StreamerEvent::Connected`] and cleared on
    /// [`StreamerEvent::Disconnected`], so requests are not sent on a connection before the full
    /// resubscribe.
    fn set_ready(&mut self, ready: bool);

    /// Send a subscription control message upstream.
    fn send(&mut self, request: &SubRequest) -> Result<(), DataError>;
}

/// Upstream connection status updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting,
}

/// Events produced by the [`StreamerClient`](crate::streamer::StreamerClient) for the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamerEvent {
    /// A connection was (re-)established and is ready for subscription control messages.
    Connected,
    /// The connection was lost; a reconnect will follow.
    Disconnected,
    Trade(TradeTick),
}

/// [`Transport`] over the [`StreamerClient`](crate::streamer::StreamerClient) outbound queue.
///
/// Ready once the connection has been acknowledged via [`Transport::set_ready`] and while the
/// client's [`ConnectionStatus`] is still `Connected`.
#[derive(Debug, Clone)]
pub struct WsTransport {
    outbound_tx: mpsc::UnboundedSender<Message>,
    status_rx: watch::Receiver<ConnectionStatus>,
    acknowledged: bool,
}

impl WsTransport {
    pub fn new(
        outbound_tx: mpsc::UnboundedSender<Message>,
        status_rx: watch::Receiver<ConnectionStatus>,
    ) -> Self {
        Self {
            outbound_tx,
            status_rx,
            acknowledged: false,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }
}

impl Transport for WsTransport {
    fn is_ready(&self) -> bool {
        self.acknowledged && self.status() == ConnectionStatus::Connected
    }

    fn set_ready(&mut self, ready: bool) {
        self.acknowledged = ready;
    }

    fn send(&mut self, request: &SubRequest) -> Result<(), DataError> {
        let payload = serde_json::to_string(request)?;
        self.outbound_tx
            .send(Message::Text(payload.into()))
            .map_err(|_| DataError::Socket("outbound queue unavailable".to_string()))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelKey;

    #[test]
    fn test_ws_transport() {
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let mut transport = WsTransport::new(outbound_tx, status_rx);

        assert!(!transport.is_ready());

        // Socket connected, but not yet taken over by the registry owner
        status_tx.send(ConnectionStatus::Connected).unwrap();
        assert!(!transport.is_ready());

        transport.set_ready(true);
        assert!(transport.is_ready());

        let request = SubRequest::add([ChannelKey::new(
            "Binance".into(),
            "ETH".into(),
            "USDT".into(),
        )]);
        transport.send(&request).unwrap();

        match outbound_rx.try_recv().unwrap() {
            Message::Text(text) => assert_eq!(
                text.as_str(),
                r#"{"action":"SubAdd","subs":["0~Binance~ETH~USDT"]}"#
            ),
            other => panic!("unexpected outbound message: {other:?}"),
        }

        drop(outbound_rx);
        assert!(transport.send(&request).is_err());
    }

    #[test]
    fn test_ws_transport_not_ready_after_connection_loss() {
        let (outbound_tx, _outbound_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connected);
        let mut transport = WsTransport::new(outbound_tx, status_rx);
        transport.set_ready(true);
        assert!(transport.is_ready());

        // Lost before the owner handles StreamerEvent::Disconnected
        status_tx.send(ConnectionStatus::Reconnecting).unwrap();
        assert!(!transport.is_ready());

        // Reconnected, still waiting for the owner to resubscribe
        transport.set_ready(false);
        status_tx.send(ConnectionStatus::Connected).unwrap();
        assert!(!transport.is_ready());
    }
}
