/// WebSocket client for the upstream trade streamer
///
/// Provides automatic reconnection, heartbeat, read timeout detection and trade decoding.
use crate::{
    config::StreamerConfig,
    error::DataError,
    protocol::StreamerMessage,
    streams::timeout::TimeoutStream,
    transport::{ConnectionStatus, StreamerEvent, WsTransport},
};
use futures::{SinkExt, StreamExt};
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

type StreamerSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upstream trade streamer client.
///
/// The outbound queue and the event channel outlive individual connections, so the engine keeps
/// a single [`WsTransport`] and event receiver across reconnects.
#[derive(Debug)]
pub struct StreamerClient {
    config: StreamerConfig,
}

impl StreamerClient {
    pub fn new(config: StreamerConfig) -> Self {
        Self { config }
    }

    /// Start the connection loop on the tokio runtime.
    ///
    /// Returns the receiver of [`StreamerEvent`]s and the [`WsTransport`] used to send
    /// subscription control messages. The loop stops once the event receiver is dropped.
    pub fn start(self) -> (mpsc::Receiver<StreamerEvent>, WsTransport) {
        let (event_tx, event_rx) = mpsc::channel(self.config.channel_buffer_size);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);

        tokio::spawn(run_streamer_loop(
            self.config,
            event_tx,
            outbound_rx,
            status_tx,
        ));

        (event_rx, WsTransport::new(outbound_tx, status_rx))
    }
}

/// Why a single connection ended.
#[derive(Debug)]
enum ConnectionExit {
    /// The engine dropped the event receiver, stop for good.
    ReceiverDropped,
    /// The connection was lost, reconnect.
    Lost(DataError),
}

/// Main streamer connection loop with auto-reconnect
async fn run_streamer_loop(
    config: StreamerConfig,
    event_tx: mpsc::Sender<StreamerEvent>,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
    status_tx: watch::Sender<ConnectionStatus>,
) {
    let endpoint = match config.endpoint() {
        Ok(endpoint) => endpoint,
        Err(error) => {
            error!(%error, "streamer client not started");
            return;
        }
    };

    info!(url = %config.url, "starting streamer client");

    loop {
        let _ = status_tx.send(ConnectionStatus::Reconnecting);

        match connect_async(endpoint.as_str()).await {
            Ok((socket, _)) => {
                info!(url = %config.url, "connected to streamer");

                // Requests queued for a previous connection are superseded by the resubscribe
                // the engine issues on StreamerEvent::Connected.
                while outbound_rx.try_recv().is_ok() {}

                let _ = status_tx.send(ConnectionStatus::Connected);
                if event_tx.send(StreamerEvent::Connected).await.is_err() {
                    break;
                }

                let exit = run_connection(socket, &config, &event_tx, &mut outbound_rx).await;
                let _ = status_tx.send(ConnectionStatus::Disconnected);

                match exit {
                    ConnectionExit::ReceiverDropped => break,
                    ConnectionExit::Lost(error) => {
                        warn!(%error, "streamer connection lost, will reconnect...");
                    }
                }

                if event_tx.send(StreamerEvent::Disconnected).await.is_err() {
                    break;
                }
            }
            Err(error) => {
                error!(url = %config.url, %error, "failed to connect to streamer");
                let _ = status_tx.send(ConnectionStatus::Disconnected);
            }
        }

        if event_tx.is_closed() {
            break;
        }

        debug!("Waiting {:?} before reconnecting...", config.reconnect_delay);
        tokio::time::sleep(config.reconnect_delay).await;
    }

    let _ = status_tx.send(ConnectionStatus::Disconnected);
    info!("Event receiver dropped, stopping streamer client");
}

/// Drive one established connection until it is lost or the engine goes away.
async fn run_connection(
    socket: StreamerSocket,
    config: &StreamerConfig,
    event_tx: &mpsc::Sender<StreamerEvent>,
    outbound_rx: &mut mpsc::UnboundedReceiver<Message>,
) -> ConnectionExit {
    let (mut write, read) = socket.split();
    let mut read = TimeoutStream::new(read, config.read_timeout);

    let mut ping = tokio::time::interval(config.ping_interval);
    ping.tick().await;

    loop {
        tokio::select! {
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Some(exit) = handle_text(text.as_str(), event_tx).await {
                        return exit;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    return ConnectionExit::Lost(DataError::Socket(format!(
                        "streamer terminated with closing frame: {frame:?}"
                    )));
                }
                Some(Ok(_)) => {
                    // Ping, Pong & Binary frames - tungstenite answers pings automatically
                }
                Some(Err(error)) => return ConnectionExit::Lost(DataError::from(error)),
                None if read.timed_out() => {
                    return ConnectionExit::Lost(DataError::Socket(format!(
                        "read timeout: no data received for {} seconds",
                        config.read_timeout.as_secs()
                    )));
                }
                None => {
                    return ConnectionExit::Lost(DataError::Socket(
                        "streamer terminated without closing frame".to_string(),
                    ));
                }
            },
            Some(outbound) = outbound_rx.recv() => {
                if let Err(error) = write.send(outbound).await {
                    return ConnectionExit::Lost(DataError::from(error));
                }
            }
            _ = ping.tick() => {
                if let Err(error) = write.send(Message::Ping(vec![].into())).await {
                    debug!("Failed to send ping, connection likely dead");
                    return ConnectionExit::Lost(DataError::from(error));
                }
            }
        }
    }
}

/// Decode one text frame, forwarding trades to the engine.
///
/// Returns `Some` only if the connection should stop.
async fn handle_text(
    text: &str,
    event_tx: &mpsc::Sender<StreamerEvent>,
) -> Option<ConnectionExit> {
    match serde_json::from_str::<StreamerMessage>(text) {
        Ok(StreamerMessage::Trade(tick)) => {
            if event_tx.send(StreamerEvent::Trade(tick)).await.is_err() {
                return Some(ConnectionExit::ReceiverDropped);
            }
        }
        Ok(StreamerMessage::Welcome) => debug!("Received streamer welcome message"),
        Ok(StreamerMessage::SubscribeComplete { sub }) => {
            debug!(?sub, "streamer subscription complete")
        }
        Ok(StreamerMessage::UnsubscribeComplete { sub }) => {
            debug!(?sub, "streamer unsubscription complete")
        }
        Ok(StreamerMessage::Heartbeat) => debug!("Received streamer heartbeat"),
        Ok(StreamerMessage::Error {
            kind,
            message,
            parameter,
        }) => {
            warn!(%kind, ?message, ?parameter, "streamer reported error");
        }
        Ok(StreamerMessage::Ignore(_)) => {}
        Err(error) => {
            debug!(%error, raw = text.get(..200).unwrap_or(text), "Failed to parse streamer message");
        }
    }

    None
}
