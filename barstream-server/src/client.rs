use barstream::{Bar, BarSink, ChannelKey, DataError, Resolution, SubscriberId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::net::SocketAddr;
use tokio::sync::mpsc;

/// Request sent by a downstream chart client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        id: SmolStr,
        symbol: String,
        resolution: String,
        #[serde(default)]
        last_bar: Option<Bar>,
    },
    Unsubscribe {
        id: SmolStr,
    },
}

/// Message pushed to a downstream chart client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        message: String,
        timestamp: DateTime<Utc>,
    },
    Bar {
        id: SmolStr,
        bar: Bar,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn welcome() -> Self {
        Self::Welcome {
            message: "Connected to barstream bar feed".to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Engine-wide subscriber id for a client supplied id, unique per connection.
pub fn subscriber_id(peer_addr: SocketAddr, id: &str) -> SubscriberId {
    SubscriberId::new(format!("{peer_addr}/{id}"))
}

/// Parse the symbol & resolution tokens of a subscribe request.
pub fn parse_subscription(
    symbol: &str,
    resolution: &str,
) -> Result<(ChannelKey, Resolution), DataError> {
    Ok((ChannelKey::from_symbol(symbol)?, resolution.parse()?))
}

/// [`BarSink`] forwarding bars to one client connection's outbound queue.
#[derive(Debug)]
pub struct ClientSink {
    subscriber: SubscriberId,
    id: SmolStr,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ClientSink {
    pub fn new(
        subscriber: SubscriberId,
        id: SmolStr,
        tx: mpsc::UnboundedSender<ServerMessage>,
    ) -> Self {
        Self { subscriber, id, tx }
    }
}

impl BarSink for ClientSink {
    fn deliver(&mut self, bar: &Bar) -> Result<(), DataError> {
        self.tx
            .send(ServerMessage::Bar {
                id: self.id.clone(),
                bar: *bar,
            })
            .map_err(|_| DataError::SinkClosed(self.subscriber.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_de_client_message() {
        struct TestCase {
            input: &'static str,
            expected: Result<ClientMessage, ()>,
        }

        let tests = vec![
            TestCase {
                // TC0: subscribe without last bar
                input: r#"{"type":"subscribe","id":"chart-1","symbol":"Binance:ETH/USDT","resolution":"1"}"#,
                expected: Ok(ClientMessage::Subscribe {
                    id: "chart-1".into(),
                    symbol: "Binance:ETH/USDT".to_string(),
                    resolution: "1".to_string(),
                    last_bar: None,
                }),
            },
            TestCase {
                // TC1: subscribe with last bar missing volume
                input: r#"{"type":"subscribe","id":"chart-2","symbol":"Coinbase:BTC/USD","resolution":"1D","last_bar":{"time":1753142400000,"open":1.0,"high":2.0,"low":0.5,"close":1.5}}"#,
                expected: Ok(ClientMessage::Subscribe {
                    id: "chart-2".into(),
                    symbol: "Coinbase:BTC/USD".to_string(),
                    resolution: "1D".to_string(),
                    last_bar: Some(Bar {
                        time: 1753142400000,
                        open: 1.0,
                        high: 2.0,
                        low: 0.5,
                        close: 1.5,
                        volume: 0.0,
                    }),
                }),
            },
            TestCase {
                // TC2: unsubscribe
                input: r#"{"type":"unsubscribe","id":"chart-1"}"#,
                expected: Ok(ClientMessage::Unsubscribe {
                    id: "chart-1".into(),
                }),
            },
            TestCase {
                // TC3: unknown type is invalid
                input: r#"{"type":"resubscribe","id":"chart-1"}"#,
                expected: Err(()),
            },
            TestCase {
                // TC4: subscribe missing symbol is invalid
                input: r#"{"type":"subscribe","id":"chart-1","resolution":"1"}"#,
                expected: Err(()),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = serde_json::from_str::<ClientMessage>(test.input).map_err(|_| ());
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_ser_server_message() {
        let bar = ServerMessage::Bar {
            id: "chart-1".into(),
            bar: Bar {
                time: 1753200600000,
                open: 101.0,
                high: 102.0,
                low: 100.5,
                close: 101.5,
                volume: 3.0,
            },
        };
        assert_eq!(
            serde_json::to_string(&bar).unwrap(),
            r#"{"type":"bar","id":"chart-1","bar":{"time":1753200600000,"open":101.0,"high":102.0,"low":100.5,"close":101.5,"volume":3.0}}"#
        );

        assert_eq!(
            serde_json::to_string(&ServerMessage::error("unsupported resolution: 1W")).unwrap(),
            r#"{"type":"error","message":"unsupported resolution: 1W"}"#
        );
    }

    #[test]
    fn test_parse_subscription() {
        let (channel, resolution) = parse_subscription("Binance:ETH/USDT", "15").unwrap();
        assert_eq!(channel.to_string(), "0~Binance~ETH~USDT");
        assert_eq!(resolution.to_string(), "15");

        assert!(matches!(
            parse_subscription("ETH-USDT", "15"),
            Err(DataError::InvalidSymbol(_))
        ));
        assert!(matches!(
            parse_subscription("Binance:ETH/USDT", "1W"),
            Err(DataError::UnsupportedResolution(_))
        ));
    }

    #[test]
    fn test_client_sink() {
        let peer: SocketAddr = "127.0.0.1:50000".parse().unwrap();
        let subscriber = subscriber_id(peer, "chart-1");
        assert_eq!(subscriber, SubscriberId::new("127.0.0.1:50000/chart-1"));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sink = ClientSink::new(subscriber.clone(), "chart-1".into(), tx);

        sink.deliver(&Bar::default()).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerMessage::Bar {
                id: "chart-1".into(),
                bar: Bar::default(),
            }
        );

        drop(rx);
        assert_eq!(
            sink.deliver(&Bar::default()),
            Err(DataError::SinkClosed(subscriber))
        );
    }
}
