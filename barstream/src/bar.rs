use crate::{channel::ChannelKey, resolution::Resolution};
use serde::{Deserialize, Serialize};

/// Normalised trade tick consumed by the bar aggregation engine.
#[derive(Clone, PartialEq, PartialOrd, Debug)]
pub struct TradeTick {
    pub channel: ChannelKey,
    /// Trade time in unix seconds.
    pub time: i64,
    pub price: f64,
    pub volume: f64,
}

impl TradeTick {
    /// Trade time in epoch milliseconds, or `None` if it is not representable.
    pub fn time_ms(&self) -> Option<i64> {
        self.time.checked_mul(1000)
    }
}

/// OHLCV aggregate covering one resolution period.
///
/// `time` is the period start in milliseconds since the unix epoch. This is also the record
/// delivered to every subscriber, and the shape accepted as a seed bar on subscribe (a missing
/// `volume` deserialises as zero).
#[derive(Copy, Clone, PartialEq, PartialOrd, Debug, Default, Deserialize, Serialize)]
pub struct Bar {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Bar {
    /// Open a new bar at `time` from a single trade.
    pub fn open_at(time: i64, price: f64, volume: f64) -> Self {
        Self {
            time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
        }
    }

    /// Compute the bar that results from applying `tick` to the in-progress `current` bar.
    ///
    /// If the tick falls at or past the boundary following `current.time` (under `resolution`),
    /// exactly one new bar is opened at that boundary, however far past it the tick is.
    /// Otherwise the tick is folded into `current`. Without a `current` bar the tick opens the
    /// period it falls in.
    ///
    /// Returns `None` if the tick time or the next boundary is outside the epoch-ms range.
    pub fn next(current: Option<&Self>, resolution: Resolution, tick: &TradeTick) -> Option<Self> {
        let tick_time_ms = tick.time_ms()?;

        let Some(current) = current else {
            return Some(Self::open_at(
                resolution.period_start(tick_time_ms)?,
                tick.price,
                tick.volume,
            ));
        };

        let next_boundary = resolution.next_boundary(current.time)?;
        if tick_time_ms >= next_boundary {
            Some(Self::open_at(next_boundary, tick.price, tick.volume))
        } else {
            Some(Self {
                high: current.high.max(tick.price),
                low: current.low.min(tick.price),
                close: tick.price,
                volume: current.volume + tick.volume,
                ..*current
            })
        }
    }
}
