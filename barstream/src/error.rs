use crate::sink::SubscriberId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors generated in `barstream`.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Error)]
pub enum DataError {
    #[error("invalid symbol, expected Exchange:BASE/QUOTE: {0}")]
    InvalidSymbol(String),

    #[error("unsupported resolution: {0}")]
    UnsupportedResolution(String),

    #[error("subscriber id already registered: {0}")]
    DuplicateSubscriber(SubscriberId),

    #[error("seed bar time out of range for resolution: {0}")]
    SeedBarOutOfRange(i64),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("SocketError: {0}")]
    Socket(String),

    #[error("SerDe error: {0}")]
    Serde(String),

    #[error("BarSink for subscriber {0} is closed")]
    SinkClosed(SubscriberId),

    #[error("BarSink for subscriber {subscriber} failed: {reason}")]
    Sink {
        subscriber: SubscriberId,
        reason: String,
    },
}

impl From<tokio_tungstenite::tungstenite::Error> for DataError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Socket(format!("{value:?}"))
    }
}

impl From<serde_json::Error> for DataError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite;

    #[test]
    fn test_data_error_display() {
        struct TestCase {
            input: DataError,
            expected: &'static str,
        }

        let tests = vec![
            TestCase {
                // TC0: malformed symbol
                input: DataError::InvalidSymbol("BTC-USD".to_string()),
                expected: "invalid symbol, expected Exchange:BASE/QUOTE: BTC-USD",
            },
            TestCase {
                // TC1: tungstenite error converts to Socket
                input: DataError::from(tungstenite::Error::ConnectionClosed),
                expected: "SocketError: ConnectionClosed",
            },
            TestCase {
                // TC2: duplicate subscriber id
                input: DataError::DuplicateSubscriber(SubscriberId::new("chart-1")),
                expected: "subscriber id already registered: chart-1",
            },
            TestCase {
                // TC3: seed bar out of range
                input: DataError::SeedBarOutOfRange(i64::MAX),
                expected: "seed bar time out of range for resolution: 9223372036854775807",
            },
            TestCase {
                // TC4: closed sink
                input: DataError::SinkClosed(SubscriberId::new("chart-1")),
                expected: "BarSink for subscriber chart-1 is closed",
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = test.input.to_string();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_serde_json_error_converts_to_serde() {
        let error = serde_json::from_str::<u8>("not json").unwrap_err();
        assert!(matches!(DataError::from(error), DataError::Serde(_)));
    }
}
