use crate::error::DataError;
use derive_more::{Constructor, Display};
use serde::{Serialize, Serializer};
use smol_str::SmolStr;
use std::str::FromStr;

/// Upstream trade feed identifier: one per (exchange, base, quote) triple.
///
/// Displays as the streamer wire form `0~{exchange}~{base}~{quote}`, where the leading `0` is
/// the upstream trade sub-type. Independent of resolution: every resolution and subscriber of a
/// market shares the same [`ChannelKey`].
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Constructor)]
#[display("0~{exchange}~{base}~{quote}")]
pub struct ChannelKey {
    pub exchange: SmolStr,
    pub base: SmolStr,
    pub quote: SmolStr,
}

impl ChannelKey {
    /// Parse a full ticker of the form `Exchange:BASE/QUOTE` (eg/ `Binance:ETH/USDT`).
    pub fn from_symbol(symbol: &str) -> Result<Self, DataError> {
        let invalid = || DataError::InvalidSymbol(symbol.to_string());

        let (exchange, pair) = symbol.split_once(':').ok_or_else(invalid)?;
        let (base, quote) = pair.split_once('/').ok_or_else(invalid)?;

        if [exchange, base, quote].iter().all(|part| is_word(part)) {
            Ok(Self::new(
                SmolStr::new(exchange),
                SmolStr::new(base),
                SmolStr::new(quote),
            ))
        } else {
            Err(invalid())
        }
    }
}

impl FromStr for ChannelKey {
    type Err = DataError;

    fn from_str(symbol: &str) -> Result<Self, Self::Err> {
        Self::from_symbol(symbol)
    }
}

impl Serialize for ChannelKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

fn is_word(part: &str) -> bool {
    !part.is_empty()
        && part
            .chars()
            .all(|char| char.is_ascii_alphanumeric() || char == '_')
}
