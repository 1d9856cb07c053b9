mod client;

use crate::client::{ClientMessage, ClientSink, ServerMessage, parse_subscription, subscriber_id};
use barstream::{ChannelRegistry, Command, StreamerClient, StreamerConfig, SubscriberId, engine};
use futures::{SinkExt, StreamExt};
use std::{
    collections::HashSet,
    net::{IpAddr, Ipv4Addr, SocketAddr},
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{mpsc, oneshot},
};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

const DEFAULT_WS_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 9002);
const DEFAULT_COMMAND_BUFFER_SIZE: usize = 1_024;

#[tokio::main]
async fn main() {
    // Initialize logging
    init_logging();

    info!("Starting barstream WebSocket server");

    let config = StreamerConfig::from_env();
    info!(?config, "streamer configuration");

    // Upstream streamer -> engine -> per-client sinks
    let (events, transport) = StreamerClient::new(config).start();

    // Configurable command buffer via COMMAND_BUFFER_SIZE env var (default: 1,024)
    let command_buffer_size = std::env::var("COMMAND_BUFFER_SIZE")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_COMMAND_BUFFER_SIZE);
    let (command_tx, command_rx) = mpsc::channel(command_buffer_size);

    tokio::spawn(engine::run(
        ChannelRegistry::new(transport),
        command_rx,
        events,
    ));

    // Configurable via WS_ADDR env var (default: 0.0.0.0:9002)
    let server_addr = std::env::var("WS_ADDR")
        .ok()
        .and_then(|addr| match addr.parse::<SocketAddr>() {
            Ok(addr) => Some(addr),
            Err(error) => {
                warn!(%addr, %error, "invalid WS_ADDR, using default");
                None
            }
        })
        .unwrap_or(DEFAULT_WS_ADDR);

    tokio::select! {
        _ = start_websocket_server(server_addr, command_tx) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received ctrl-c, shutting down");
        }
    }
}

/// Start WebSocket server that serves bar subscriptions to connected clients
async fn start_websocket_server(addr: SocketAddr, command_tx: mpsc::Sender<Command>) {
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(error) => {
            error!(%addr, %error, "Failed to bind WebSocket server");
            return;
        }
    };

    info!("WebSocket server listening on ws://{}", addr);

    while let Ok((stream, peer_addr)) = listener.accept().await {
        info!("New WebSocket connection from {}", peer_addr);
        tokio::spawn(handle_client(stream, peer_addr, command_tx.clone()));
    }
}

/// Handle individual WebSocket client connection
async fn handle_client(stream: TcpStream, peer_addr: SocketAddr, command_tx: mpsc::Sender<Command>) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", peer_addr, e);
            return;
        }
    };

    info!("WebSocket handshake completed for {}", peer_addr);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let _ = outbound_tx.send(ServerMessage::welcome());

    // Spawn task to send bars & replies to this client
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(error) => warn!(%error, "failed to serialise server message"),
            }
        }
    });

    let mut subscribed = HashSet::new();

    // Handle incoming requests from client
    let recv_task = async {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    handle_request(
                        text.as_str(),
                        peer_addr,
                        &command_tx,
                        &outbound_tx,
                        &mut subscribed,
                    )
                    .await;
                }
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) => {
                    // Tungstenite handles pong automatically
                    debug!("Received ping from {}", peer_addr);
                }
                Err(e) => {
                    error!("WebSocket error for {}: {}", peer_addr, e);
                    break;
                }
                _ => {}
            }
        }
    };

    // Wait for either side to complete
    tokio::select! {
        _ = &mut send_task => {
            info!("Send task completed for {}", peer_addr);
        }
        _ = recv_task => {
            info!("Receive task completed for {}", peer_addr);
        }
    }
    send_task.abort();

    for subscriber in subscribed {
        if command_tx
            .send(Command::Unsubscribe { subscriber })
            .await
            .is_err()
        {
            break;
        }
    }

    info!("WebSocket connection closed for {}", peer_addr);
}

/// Apply one client request, replying on the client's outbound queue on failure.
async fn handle_request(
    text: &str,
    peer_addr: SocketAddr,
    command_tx: &mpsc::Sender<Command>,
    outbound_tx: &mpsc::UnboundedSender<ServerMessage>,
    subscribed: &mut HashSet<SubscriberId>,
) {
    let request = match serde_json::from_str::<ClientMessage>(text) {
        Ok(request) => request,
        Err(error) => {
            debug!(%peer_addr, %error, "invalid client request");
            let _ = outbound_tx.send(ServerMessage::error(format!("invalid request: {error}")));
            return;
        }
    };

    match request {
        ClientMessage::Subscribe {
            id,
            symbol,
            resolution,
            last_bar,
        } => {
            let (channel, resolution) = match parse_subscription(&symbol, &resolution) {
                Ok(parsed) => parsed,
                Err(error) => {
                    warn!(%peer_addr, %id, %symbol, %resolution, %error, "ignoring invalid bar subscription");
                    let _ = outbound_tx.send(ServerMessage::error(error.to_string()));
                    return;
                }
            };

            let subscriber = subscriber_id(peer_addr, &id);
            let (respond_tx, respond_rx) = oneshot::channel();
            let command = Command::Subscribe {
                channel,
                resolution,
                subscriber: subscriber.clone(),
                sink: Box::new(ClientSink::new(subscriber.clone(), id, outbound_tx.clone())),
                seed_bar: last_bar,
                respond_to: Some(respond_tx),
            };

            if command_tx.send(command).await.is_err() {
                error!("bar engine stopped, dropping subscribe request");
                return;
            }

            match respond_rx.await {
                Ok(Ok(())) => {
                    subscribed.insert(subscriber);
                }
                Ok(Err(error)) => {
                    let _ = outbound_tx.send(ServerMessage::error(error.to_string()));
                }
                Err(_) => error!("bar engine stopped before replying"),
            }
        }
        ClientMessage::Unsubscribe { id } => {
            let subscriber = subscriber_id(peer_addr, &id);
            subscribed.remove(&subscriber);
            if command_tx
                .send(Command::Unsubscribe { subscriber })
                .await
                .is_err()
            {
                error!("bar engine stopped, dropping unsubscribe request");
            }
        }
    }
}

/// Initialize logging
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
