//! Streamer wire protocol.
//!
//! Inbound frames are JSON objects discriminated by a `TYPE` code, sent as a string (`"0"`) or
//! occasionally a number. Only `TYPE` `0` (trade) reaches the aggregation engine.
//!
//! Outbound subscription control frames take the form
//! `{"action": "SubAdd" | "SubRemove", "subs": ["0~{exchange}~{base}~{quote}"]}`.

use crate::{bar::TradeTick, channel::ChannelKey};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use smol_str::SmolStr;

/// Upstream subscription control action.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Serialize)]
pub enum SubAction {
    SubAdd,
    SubRemove,
}

/// Outbound subscription control message.
#[derive(Clone, Eq, PartialEq, Debug, Serialize)]
pub struct SubRequest {
    pub action: SubAction,
    pub subs: Vec<ChannelKey>,
}

impl SubRequest {
    pub fn add(subs: impl IntoIterator<Item = ChannelKey>) -> Self {
        Self {
            action: SubAction::SubAdd,
            subs: subs.into_iter().collect(),
        }
    }

    pub fn remove(subs: impl IntoIterator<Item = ChannelKey>) -> Self {
        Self {
            action: SubAction::SubRemove,
            subs: subs.into_iter().collect(),
        }
    }
}

/// Messages received from the upstream streamer.
#[derive(Clone, PartialEq, Debug)]
pub enum StreamerMessage {
    Trade(TradeTick),
    Welcome,
    SubscribeComplete { sub: Option<String> },
    UnsubscribeComplete { sub: Option<String> },
    Heartbeat,
    Error {
        kind: SmolStr,
        message: Option<String>,
        parameter: Option<String>,
    },
    Ignore(SmolStr),
}

impl StreamerMessage {
    pub const TYPE_TRADE: &'static str = "0";
    pub const TYPE_SUBSCRIBE_COMPLETE: &'static str = "16";
    pub const TYPE_UNSUBSCRIBE_COMPLETE: &'static str = "17";
    pub const TYPE_WELCOME: &'static str = "20";
    pub const TYPE_HEARTBEAT: &'static str = "999";
}

/// ### Raw Payload Examples
/// Trade
/// ```json
/// {
///     "TYPE": "0",
///     "M": "Coinbase",
///     "FSYM": "BTC",
///     "TSYM": "USD",
///     "F": "1",
///     "ID": "852793745",
///     "TS": 1753190418,
///     "Q": 0.34637342,
///     "P": 119283.1,
///     "TOTAL": 41316.495295202,
///     "RTS": 1753190418
/// }
/// ```
#[derive(Clone, PartialEq, Debug, Deserialize)]
struct StreamerTrade {
    #[serde(rename = "M")]
    exchange: SmolStr,
    #[serde(rename = "FSYM")]
    base: SmolStr,
    #[serde(rename = "TSYM")]
    quote: SmolStr,
    #[serde(rename = "TS")]
    time: i64,
    #[serde(rename = "P")]
    price: f64,
    #[serde(rename = "Q")]
    volume: f64,
}

impl From<StreamerTrade> for TradeTick {
    fn from(trade: StreamerTrade) -> Self {
        Self {
            channel: ChannelKey::new(trade.exchange, trade.base, trade.quote),
            time: trade.time,
            price: trade.price,
            volume: trade.volume,
        }
    }
}

fn type_code(value: &Value) -> Option<SmolStr> {
    match value.get("TYPE")? {
        Value::String(code) => Some(SmolStr::new(code.trim())),
        Value::Number(code) => Some(SmolStr::new(code.to_string())),
        _ => None,
    }
}

/// Streamer error codes are the three digit `4xx` & `5xx` range.
fn is_error_code(code: &str) -> bool {
    code.parse::<u16>()
        .is_ok_and(|code| (400..600).contains(&code))
}

fn str_field(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(Value::as_str).map(str::to_string)
}

impl<'de> Deserialize<'de> for StreamerMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;

        let Some(kind) = type_code(&value) else {
            return Ok(Self::Ignore(SmolStr::default()));
        };

        match kind.as_str() {
            Self::TYPE_TRADE => StreamerTrade::deserialize(value)
                .map(|trade| Self::Trade(TradeTick::from(trade)))
                .map_err(serde::de::Error::custom),
            Self::TYPE_SUBSCRIBE_COMPLETE => Ok(Self::SubscribeComplete {
                sub: str_field(&value, "SUB"),
            }),
            Self::TYPE_UNSUBSCRIBE_COMPLETE => Ok(Self::UnsubscribeComplete {
                sub: str_field(&value, "SUB"),
            }),
            Self::TYPE_WELCOME => Ok(Self::Welcome),
            Self::TYPE_HEARTBEAT => Ok(Self::Heartbeat),
            code if is_error_code(code) => Ok(Self::Error {
                message: str_field(&value, "MESSAGE"),
                parameter: str_field(&value, "PARAMETER"),
                kind: kind.clone(),
            }),
            _ => Ok(Self::Ignore(kind.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod de {
        use super::*;

        #[test]
        fn test_streamer_message() {
            struct TestCase {
                input: &'static str,
                expected: Result<StreamerMessage, ()>,
            }

            let tests = vec![
                TestCase {
                    // TC0: trade is deserialised
                    input: r#"
                        {
                            "TYPE": "0",
                            "M": "Coinbase",
                            "FSYM": "BTC",
                            "TSYM": "USD",
                            "F": "1",
                            "ID": "852793745",
                            "TS": 1753190418,
                            "Q": 0.34637342,
                            "P": 119283.1,
                            "TOTAL": 41316.495295202,
                            "RTS": 1753190418,
                            "CCSEQ": 852777369,
                            "TSNS": 654000000,
                            "RTSNS": 708000000
                        }
                    "#,
                    expected: Ok(StreamerMessage::Trade(TradeTick {
                        channel: ChannelKey::new("Coinbase".into(), "BTC".into(), "USD".into()),
                        time: 1753190418,
                        price: 119283.1,
                        volume: 0.34637342,
                    })),
                },
                TestCase {
                    // TC1: trade w/ numeric TYPE is deserialised
                    input: r#"{"TYPE":0,"M":"Binance","FSYM":"ETH","TSYM":"USDT","TS":1753190418,"Q":2,"P":3550.5}"#,
                    expected: Ok(StreamerMessage::Trade(TradeTick {
                        channel: ChannelKey::new("Binance".into(), "ETH".into(), "USDT".into()),
                        time: 1753190418,
                        price: 3550.5,
                        volume: 2.0,
                    })),
                },
                TestCase {
                    // TC2: trade missing price fails
                    input: r#"{"TYPE":"0","M":"Binance","FSYM":"ETH","TSYM":"USDT","TS":1753190418,"Q":2}"#,
                    expected: Err(()),
                },
                TestCase {
                    // TC3: welcome
                    input: r#"{"TYPE":"20","MESSAGE":"STREAMERWELCOME","SERVER_UPTIME_SECONDS":1262462,"SERVER_NAME":"08","SERVER_TIME_MS":1753184197855}"#,
                    expected: Ok(StreamerMessage::Welcome),
                },
                TestCase {
                    // TC4: subscribe complete
                    input: r#"{"TYPE":"16","MESSAGE":"SUBSCRIBECOMPLETE","SUB":"0~Binance~ETH~USDT"}"#,
                    expected: Ok(StreamerMessage::SubscribeComplete {
                        sub: Some("0~Binance~ETH~USDT".to_string()),
                    }),
                },
                TestCase {
                    // TC5: unsubscribe complete
                    input: r#"{"TYPE":"17","MESSAGE":"UNSUBSCRIBECOMPLETE","SUB":"0~Binance~ETH~USDT"}"#,
                    expected: Ok(StreamerMessage::UnsubscribeComplete {
                        sub: Some("0~Binance~ETH~USDT".to_string()),
                    }),
                },
                TestCase {
                    // TC6: heartbeat
                    input: r#"{"TYPE":"999","MESSAGE":"HEARTBEAT","TIMEMS":1753184227855}"#,
                    expected: Ok(StreamerMessage::Heartbeat),
                },
                TestCase {
                    // TC7: invalid subscription error
                    input: r#"{"TYPE":"500","MESSAGE":"INVALID_SUB","PARAMETER":"0~Nope~ETH~USDT","INFO":"We only support..."}"#,
                    expected: Ok(StreamerMessage::Error {
                        kind: "500".into(),
                        message: Some("INVALID_SUB".to_string()),
                        parameter: Some("0~Nope~ETH~USDT".to_string()),
                    }),
                },
                TestCase {
                    // TC8: unauthorized error
                    input: r#"{"TYPE":"401","MESSAGE":"UNAUTHORIZED"}"#,
                    expected: Ok(StreamerMessage::Error {
                        kind: "401".into(),
                        message: Some("UNAUTHORIZED".to_string()),
                        parameter: None,
                    }),
                },
                TestCase {
                    // TC9: other event types are ignored
                    input: r#"{"TYPE":"5","MARKET":"CCCAGG","FROMSYMBOL":"BTC"}"#,
                    expected: Ok(StreamerMessage::Ignore("5".into())),
                },
                TestCase {
                    // TC10: message without TYPE is ignored
                    input: r#"{"MESSAGE":"hello"}"#,
                    expected: Ok(StreamerMessage::Ignore(SmolStr::default())),
                },
                TestCase {
                    // TC11: codes starting with 4 or 5 outside 4xx/5xx are ignored
                    input: r#"{"TYPE":"42","MESSAGE":"NOT_AN_ERROR"}"#,
                    expected: Ok(StreamerMessage::Ignore("42".into())),
                },
                TestCase {
                    // TC12: numeric TYPE in the error range is an error
                    input: r#"{"TYPE":429,"MESSAGE":"TOO_MANY_SOCKETS_MAX_1_PER_CLIENT"}"#,
                    expected: Ok(StreamerMessage::Error {
                        kind: "429".into(),
                        message: Some("TOO_MANY_SOCKETS_MAX_1_PER_CLIENT".to_string()),
                        parameter: None,
                    }),
                },
                TestCase {
                    // TC13: four digit code is not an error
                    input: r#"{"TYPE":"5000"}"#,
                    expected: Ok(StreamerMessage::Ignore("5000".into())),
                },
            ];

            for (index, test) in tests.into_iter().enumerate() {
                let actual = serde_json::from_str::<StreamerMessage>(test.input);
                match (actual, test.expected) {
                    (Ok(actual), Ok(expected)) => {
                        assert_eq!(actual, expected, "TC{} failed", index)
                    }
                    (Err(_), Err(_)) => {
                        // Test passed
                    }
                    (actual, expected) => {
                        // Test failed
                        panic!(
                            "TC{index} failed because actual != expected. \nActual: {actual:?}\nExpected: {expected:?}\n"
                        );
                    }
                }
            }
        }
    }

    mod ser {
        use super::*;

        #[test]
        fn test_sub_request() {
            let eth = ChannelKey::new("Binance".into(), "ETH".into(), "USDT".into());
            let btc = ChannelKey::new("Coinbase".into(), "BTC".into(), "USD".into());

            assert_eq!(
                serde_json::to_string(&SubRequest::add([eth.clone()])).unwrap(),
                r#"{"action":"SubAdd","subs":["0~Binance~ETH~USDT"]}"#
            );
            assert_eq!(
                serde_json::to_string(&SubRequest::remove([eth, btc])).unwrap(),
                r#"{"action":"SubRemove","subs":["0~Binance~ETH~USDT","0~Coinbase~BTC~USD"]}"#
            );
        }
    }
}
